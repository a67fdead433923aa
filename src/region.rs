// ============================================================================
// REGION MODEL: scanline-consolidated rectangle sets
// ============================================================================
//
// A `Region` describes an arbitrary 2-D area (a selection, a layer bounds,
// a tile) as a minimal list of non-overlapping axis-aligned rectangles.
// The list is kept in a canonical form: sorted top-to-bottom then
// left-to-right, with vertically adjacent rectangles of identical
// horizontal extent merged into one taller rectangle.  Canonical form
// makes equality, enumeration and area accounting trivial, and keeps the
// per-rectangle overhead of downstream consumers low.

/// Integer rectangle, half-open on both axes: `[x, x+width) x [y, y+height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const EMPTY: Rect = Rect {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from edges. `right`/`bottom` are exclusive.
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Rect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.width as u64 * self.height as u64
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Intersection of two rectangles.  Returns `Rect::EMPTY` when disjoint.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            Rect::EMPTY
        } else {
            Rect::from_edges(left, top, right, bottom)
        }
    }
}

/// A minimal, consolidated set of non-overlapping rectangles.
///
/// Construction always normalises: input rectangles may overlap, touch or
/// arrive in any order, and the stored form is canonical regardless.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub const fn empty() -> Self {
        Region { rects: Vec::new() }
    }

    pub fn from_rect(rect: Rect) -> Self {
        if rect.is_empty() {
            Region::empty()
        } else {
            Region { rects: vec![rect] }
        }
    }

    /// Union of an arbitrary rectangle list, consolidated to canonical form.
    pub fn from_rects(rects: &[Rect]) -> Self {
        Region {
            rects: consolidate(rects),
        }
    }

    /// The canonical rectangle list: top-to-bottom, left-to-right.
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Total pixel area.  Rectangles never overlap, so a plain sum is exact.
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Tight bounding rectangle, or `Rect::EMPTY` for the empty region.
    pub fn bounds(&self) -> Rect {
        let mut it = self.rects.iter();
        let Some(first) = it.next() else {
            return Rect::EMPTY;
        };
        let mut left = first.x;
        let mut top = first.y;
        let mut right = first.right();
        let mut bottom = first.bottom();
        for r in it {
            left = left.min(r.x);
            top = top.min(r.y);
            right = right.max(r.right());
            bottom = bottom.max(r.bottom());
        }
        Rect::from_edges(left, top, right, bottom)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains(x, y))
    }

    /// Clip against a single rectangle.
    pub fn intersect_rect(&self, clip: &Rect) -> Region {
        let clipped: Vec<Rect> = self
            .rects
            .iter()
            .map(|r| r.intersect(clip))
            .filter(|r| !r.is_empty())
            .collect();
        // Clipping can expose new vertical merges (stacked rects that only
        // differed outside the clip window), so re-consolidate.
        Region::from_rects(&clipped)
    }

    /// Intersection with another region.
    pub fn intersect(&self, other: &Region) -> Region {
        let mut pieces = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                let r = a.intersect(b);
                if !r.is_empty() {
                    pieces.push(r);
                }
            }
        }
        Region::from_rects(&pieces)
    }

    /// Union with another region.
    pub fn union(&self, other: &Region) -> Region {
        let mut all = self.rects.clone();
        all.extend_from_slice(&other.rects);
        Region::from_rects(&all)
    }

    /// Decompose into 1-pixel-tall scanline segments, ordered top-to-bottom
    /// then left-to-right.  This is the unit the tile partitioner divides by:
    /// splitting on segment count gives a fair split for any region shape.
    pub fn scanlines(&self) -> Vec<Rect> {
        let mut scans = Vec::new();
        for r in &self.rects {
            for y in r.y..r.bottom() {
                scans.push(Rect::new(r.x, y, r.width, 1));
            }
        }
        scans.sort_unstable_by_key(|s| (s.y, s.x));
        scans
    }
}

// ---- consolidation -------------------------------------------------------

/// Normalise an arbitrary rectangle list (overlaps allowed) into the
/// canonical consolidated form.
///
/// Works band-by-band: every distinct horizontal strip between two y
/// breakpoints carries a merged x-interval list, and each interval is then
/// fused with the rectangle directly above it when the horizontal extent
/// matches exactly.  The merge rule for two rectangles is: equal `left`,
/// equal `right`, and the lower one's top equals the upper one's bottom.
fn consolidate(rects: &[Rect]) -> Vec<Rect> {
    let live: Vec<&Rect> = rects.iter().filter(|r| !r.is_empty()).collect();
    if live.is_empty() {
        return Vec::new();
    }

    // Y breakpoints: every top and bottom edge.
    let mut ys: Vec<i32> = Vec::with_capacity(live.len() * 2);
    for r in &live {
        ys.push(r.y);
        ys.push(r.bottom());
    }
    ys.sort_unstable();
    ys.dedup();

    let mut out: Vec<Rect> = Vec::new();

    for band in ys.windows(2) {
        let (top, bottom) = (band[0], band[1]);

        // Merged x-intervals of all rectangles crossing this band.
        let mut spans: Vec<(i32, i32)> = live
            .iter()
            .filter(|r| r.y <= top && r.bottom() >= bottom)
            .map(|r| (r.x, r.right()))
            .collect();
        if spans.is_empty() {
            continue;
        }
        spans.sort_unstable();
        let mut merged: Vec<(i32, i32)> = Vec::with_capacity(spans.len());
        for (l, r) in spans {
            match merged.last_mut() {
                // Touching intervals fuse as well as overlapping ones.
                Some(last) if l <= last.1 => last.1 = last.1.max(r),
                _ => merged.push((l, r)),
            }
        }

        for (l, r) in merged {
            // Fuse with a rectangle ending exactly where this band starts.
            if let Some(above) = out
                .iter_mut()
                .rev()
                .find(|a| a.bottom() == top && a.x == l && a.right() == r)
            {
                above.height += bottom - top;
            } else {
                out.push(Rect::from_edges(l, top, r, bottom));
            }
        }
    }

    out.sort_unstable_by_key(|r| (r.y, r.x));
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_region_has_no_rects_and_zero_area() {
        let r = Region::empty();
        assert!(r.is_empty());
        assert_eq!(r.area(), 0);
        assert_eq!(r.bounds(), Rect::EMPTY);
        assert!(r.scanlines().is_empty());
    }

    #[test]
    fn degenerate_rects_are_dropped() {
        let r = Region::from_rects(&[Rect::new(5, 5, 0, 10), Rect::new(0, 0, 10, -3)]);
        assert!(r.is_empty());
    }

    #[test]
    fn stacked_same_width_rects_merge_vertically() {
        let r = Region::from_rects(&[Rect::new(0, 0, 10, 4), Rect::new(0, 4, 10, 6)]);
        assert_eq!(r.rects(), &[Rect::new(0, 0, 10, 10)]);
    }

    #[test]
    fn different_width_rows_stay_separate() {
        let r = Region::from_rects(&[Rect::new(0, 0, 10, 4), Rect::new(0, 4, 8, 6)]);
        assert_eq!(
            r.rects(),
            &[Rect::new(0, 0, 10, 4), Rect::new(0, 4, 8, 6)]
        );
    }

    #[test]
    fn overlapping_rects_union_without_double_counting() {
        let r = Region::from_rects(&[Rect::new(0, 0, 10, 10), Rect::new(5, 5, 10, 10)]);
        // 100 + 100 - 25 overlap
        assert_eq!(r.area(), 175);
        // Every pixel claimed exactly once.
        let mut count = 0u64;
        for y in 0..15 {
            for x in 0..15 {
                let claims = r.rects().iter().filter(|rc| rc.contains(x, y)).count();
                assert!(claims <= 1, "pixel ({x},{y}) claimed {claims} times");
                count += claims as u64;
            }
        }
        assert_eq!(count, 175);
    }

    #[test]
    fn touching_spans_on_one_row_fuse() {
        let r = Region::from_rects(&[Rect::new(0, 0, 5, 1), Rect::new(5, 0, 5, 1)]);
        assert_eq!(r.rects(), &[Rect::new(0, 0, 10, 1)]);
    }

    #[test]
    fn disjoint_rects_are_preserved() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 20, 5, 5);
        let r = Region::from_rects(&[a, b]);
        assert_eq!(r.rects(), &[a, b]);
        assert_eq!(r.area(), 125);
    }

    #[test]
    fn intersect_rect_clips_and_reconsolidates() {
        // Two stacked rects that only differ to the right of x=8.
        let r = Region::from_rects(&[Rect::new(0, 0, 10, 4), Rect::new(0, 4, 8, 6)]);
        let clipped = r.intersect_rect(&Rect::new(0, 0, 8, 100));
        assert_eq!(clipped.rects(), &[Rect::new(0, 0, 8, 10)]);
    }

    #[test]
    fn region_intersection_matches_pointwise() {
        let a = Region::from_rects(&[Rect::new(0, 0, 10, 10), Rect::new(20, 0, 10, 10)]);
        let b = Region::from_rects(&[Rect::new(5, 5, 20, 20)]);
        let i = a.intersect(&b);
        for y in -2..32 {
            for x in -2..32 {
                assert_eq!(
                    i.contains(x, y),
                    a.contains(x, y) && b.contains(x, y),
                    "mismatch at ({x},{y})"
                );
            }
        }
    }

    #[test]
    fn union_covers_both_inputs() {
        let a = Region::from_rect(Rect::new(0, 0, 4, 4));
        let b = Region::from_rect(Rect::new(10, 10, 4, 4));
        let u = a.union(&b);
        assert_eq!(u.area(), 32);
        assert!(u.contains(0, 0));
        assert!(u.contains(13, 13));
        assert!(!u.contains(5, 5));
    }

    #[test]
    fn scanlines_are_row_major_and_cover_the_region() {
        let r = Region::from_rects(&[Rect::new(0, 0, 10, 2), Rect::new(20, 1, 5, 2)]);
        let scans = r.scanlines();
        assert_eq!(
            scans,
            vec![
                Rect::new(0, 0, 10, 1),
                Rect::new(0, 1, 10, 1),
                Rect::new(20, 1, 5, 1),
                Rect::new(20, 2, 5, 1),
            ]
        );
        assert_eq!(scans.iter().map(Rect::area).sum::<u64>(), r.area());
    }

    #[test]
    fn construction_is_deterministic() {
        let input = [
            Rect::new(3, 7, 11, 5),
            Rect::new(0, 0, 10, 10),
            Rect::new(5, 5, 10, 10),
        ];
        let a = Region::from_rects(&input);
        let b = Region::from_rects(&input);
        assert_eq!(a, b);
        assert_eq!(a.scanlines(), b.scanlines());
    }

    #[test]
    fn input_order_does_not_change_canonical_form() {
        let a = Region::from_rects(&[Rect::new(0, 0, 10, 10), Rect::new(20, 20, 5, 5)]);
        let b = Region::from_rects(&[Rect::new(20, 20, 5, 5), Rect::new(0, 0, 10, 10)]);
        assert_eq!(a, b);
    }
}
