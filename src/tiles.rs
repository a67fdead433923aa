// ============================================================================
// TILE PARTITIONER: fair scanline bucketing with a fast first tile
// ============================================================================
//
// A render pass divides its target region into `tile_count` disjoint tiles
// of roughly equal scanline cost.  The split works on the region's
// 1-pixel-tall scanline segments rather than on whole rectangles, so an
// irregular multi-rectangle selection divides just as evenly as a full
// canvas: the cost model is simply "number of segments", independent of
// shape complexity.
//
// Tile 0 is deliberately skewed: when more than one tile is requested its
// scan range is capped at a single scanline, and tile 1 starts early
// enough that nothing is skipped.  The orchestrator renders tile 0
// synchronously on the caller's thread, so a tiny tile 0 means the first
// visible result (and any configuration error) arrives almost instantly.
// The slightly uneven split is intentional policy, not an accident.

use crate::region::{Rect, Region};

/// Default number of tiles handed to each worker.  More tiles than workers
/// keeps the round-robin assignment reasonably balanced when scanline
/// costs vary across the image.
pub const TILES_PER_WORKER: usize = 8;

/// One slice of a render pass's target region, with a stable ordinal.
/// Tiles are immutable once the partitioner returns them.
#[derive(Clone, Debug)]
pub struct Tile {
    pub index: usize,
    pub region: Region,
}

/// Pick a tile count for an image of the given height: `TILES_PER_WORKER`
/// tiles per worker, but never more tiles than scanlines so tiny images
/// don't degenerate into empty slivers.
pub fn default_tile_count(worker_threads: usize, image_height: u32) -> usize {
    (worker_threads.max(1) * TILES_PER_WORKER)
        .min(image_height.max(1) as usize)
}

/// Split `region` into exactly `tile_count` ordered, disjoint tiles clipped
/// against `clip` (the destination surface bounds).
///
/// Guarantees:
/// - exactly `tile_count` tiles are returned, some possibly empty;
/// - tiles are pairwise disjoint and their union equals the clipped region;
/// - when `tile_count > 1`, tile 0 covers at most one scanline;
/// - output depends only on the inputs (no iteration-order surprises).
///
/// `tile_count` of zero is a programmer error.
pub fn split_region(region: &Region, tile_count: usize, clip: Rect) -> Vec<Tile> {
    assert!(tile_count > 0, "tile_count must be at least 1");

    let scans = region.scanlines();
    let total = scans.len();
    let mut tiles = Vec::with_capacity(tile_count);

    for i in 0..tile_count {
        // Fair integer bucketing; the last bucket absorbs the remainder.
        let mut begin = total * i / tile_count;
        let mut end = (total * (i + 1) / tile_count).min(total);

        if tile_count > 1 {
            if i == 0 {
                // Cap tile 0 at one scanline for a near-instant first result.
                end = end.min(1);
            } else if i == 1 {
                // Tile 1 starts where the capped tile 0 ended.
                begin = begin.min(1);
            }
        }

        let clipped: Vec<Rect> = scans[begin..end]
            .iter()
            .map(|s| s.intersect(&clip))
            .filter(|s| !s.is_empty())
            .collect();

        // from_rects re-consolidates: runs of full-width scanlines collapse
        // back into tall rectangles, cutting per-rect overhead downstream.
        tiles.push(Tile {
            index: i,
            region: Region::from_rects(&clipped),
        });
    }

    tiles
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pixel_set(region: &Region) -> HashSet<(i32, i32)> {
        let mut set = HashSet::new();
        for r in region.rects() {
            for y in r.y..r.bottom() {
                for x in r.x..r.right() {
                    set.insert((x, y));
                }
            }
        }
        set
    }

    #[test]
    fn returns_exactly_the_requested_tile_count() {
        let region = Region::from_rect(Rect::new(0, 0, 50, 100));
        let clip = Rect::new(0, 0, 50, 100);
        for n in [1, 2, 3, 7, 8, 64, 200] {
            let tiles = split_region(&region, n, clip);
            assert_eq!(tiles.len(), n);
            for (i, t) in tiles.iter().enumerate() {
                assert_eq!(t.index, i);
            }
        }
    }

    #[test]
    #[should_panic(expected = "tile_count")]
    fn zero_tile_count_is_a_programmer_error() {
        split_region(&Region::from_rect(Rect::new(0, 0, 4, 4)), 0, Rect::new(0, 0, 4, 4));
    }

    #[test]
    fn empty_region_yields_all_empty_tiles() {
        let tiles = split_region(&Region::empty(), 5, Rect::new(0, 0, 100, 100));
        assert_eq!(tiles.len(), 5);
        assert!(tiles.iter().all(|t| t.region.is_empty()));
    }

    #[test]
    fn tiles_cover_the_clipped_region_exactly() {
        // Irregular region: two disjoint blocks plus an overlap-merged strip.
        let region = Region::from_rects(&[
            Rect::new(0, 0, 10, 10),
            Rect::new(20, 20, 5, 5),
            Rect::new(3, 8, 30, 4),
        ]);
        let clip = Rect::new(0, 0, 28, 23);
        let tiles = split_region(&region, 6, clip);

        let expected = pixel_set(&region.intersect_rect(&clip));
        let mut seen = HashSet::new();
        for t in &tiles {
            for px in pixel_set(&t.region) {
                assert!(seen.insert(px), "pixel {px:?} covered by two tiles");
            }
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn tile_areas_sum_to_the_clipped_region_area() {
        let region = Region::from_rects(&[Rect::new(0, 0, 10, 10), Rect::new(20, 20, 5, 5)]);
        let clip = Rect::new(0, 0, 100, 100);
        let tiles = split_region(&region, 4, clip);
        let total: u64 = tiles.iter().map(|t| t.region.area()).sum();
        assert_eq!(total, 125);
    }

    #[test]
    fn first_tile_is_at_most_one_scanline() {
        let region = Region::from_rect(Rect::new(0, 0, 50, 100));
        let tiles = split_region(&region, 8, Rect::new(0, 0, 50, 100));
        let bounds = tiles[0].region.bounds();
        assert_eq!(bounds.height, 1);
        assert_eq!(bounds.y, 0);
        // And nothing was skipped: tile 1 starts on the very next scanline.
        assert_eq!(tiles[1].region.bounds().y, 1);
    }

    #[test]
    fn single_tile_gets_everything() {
        let region = Region::from_rect(Rect::new(0, 0, 30, 40));
        let tiles = split_region(&region, 1, Rect::new(0, 0, 30, 40));
        assert_eq!(tiles[0].region, region);
    }

    #[test]
    fn more_tiles_than_scanlines_leaves_trailing_tiles_empty() {
        let region = Region::from_rect(Rect::new(0, 0, 10, 3));
        let tiles = split_region(&region, 8, Rect::new(0, 0, 10, 3));
        assert_eq!(tiles.len(), 8);
        let total: u64 = tiles.iter().map(|t| t.region.area()).sum();
        assert_eq!(total, 30);
        assert!(tiles.iter().filter(|t| t.region.is_empty()).count() >= 5);
    }

    #[test]
    fn split_is_deterministic() {
        let region = Region::from_rects(&[Rect::new(0, 0, 17, 23), Rect::new(40, 5, 9, 31)]);
        let clip = Rect::new(0, 0, 64, 64);
        let a = split_region(&region, 7, clip);
        let b = split_region(&region, 7, clip);
        for (ta, tb) in a.iter().zip(&b) {
            assert_eq!(ta.region, tb.region);
        }
    }

    #[test]
    fn clip_outside_region_yields_empty_tiles() {
        let region = Region::from_rect(Rect::new(0, 0, 10, 10));
        let tiles = split_region(&region, 3, Rect::new(100, 100, 10, 10));
        assert!(tiles.iter().all(|t| t.region.is_empty()));
    }

    #[test]
    fn default_tile_count_is_bounded_by_image_height() {
        assert_eq!(default_tile_count(4, 1000), 32);
        assert_eq!(default_tile_count(4, 5), 5);
        assert_eq!(default_tile_count(0, 100), TILES_PER_WORKER);
    }
}
