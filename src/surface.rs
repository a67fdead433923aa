// ============================================================================
// SURFACE: shared RGBA8 pixel buffer for concurrent tile rendering
// ============================================================================
//
// A `Surface` is a flat, row-major RGBA buffer that many worker threads
// touch at once during a render pass: every worker reads anywhere in the
// source surface, and writes only inside its own tile's rectangles of the
// destination surface.  The tile partition guarantees writers never
// overlap, which is what makes the interior-mutability scheme below sound
// without any per-pixel locking.
//
// Safety contract (upheld by the render orchestrator, required of any
// other caller of the write methods):
//
//   * concurrent `set_pixel` / `write_span` calls must target disjoint
//     pixels;
//   * nothing reads a pixel while another thread is writing that same
//     pixel (reading *other* pixels of the same surface is fine).
//
// The writability flag is a convention, not a lock: a pass freezes its
// source surface so stray writes from elsewhere in the application are
// dropped (and logged) instead of racing the workers' reads.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{Rgba, RgbaImage};

use crate::region::Rect;

pub const BYTES_PER_PIXEL: usize = 4;

pub struct Surface {
    width: u32,
    height: u32,
    data: UnsafeCell<Vec<u8>>,
    writable: AtomicBool,
}

// SAFETY: all mutation goes through the raw-pointer span writers, whose
// callers must guarantee disjointness (see module header).  The flag is
// atomic; the pixel data itself carries no references.
unsafe impl Send for Surface {}
unsafe impl Sync for Surface {}

impl Surface {
    /// Create a fully transparent surface.  Oversized dimensions are
    /// clamped to 1x1 rather than aborting, matching how the editor treats
    /// absurd canvas sizes.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = {
            let total = width as u64 * height as u64;
            if total > 256_000_000 || width == 0 || height == 0 {
                crate::log_warn!(
                    "Surface::new: dimensions {}x{} out of range, clamped to 1x1",
                    width,
                    height
                );
                (1, 1)
            } else {
                (width, height)
            }
        };
        Surface {
            width,
            height,
            data: UnsafeCell::new(vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL]),
            writable: AtomicBool::new(true),
        }
    }

    /// Import from an `image` crate buffer.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let surface = Surface::new(src.width(), src.height());
        if surface.width == src.width() && surface.height == src.height() {
            unsafe { (*surface.data.get()).copy_from_slice(src.as_raw()) };
        }
        surface
    }

    /// Export to an `image` crate buffer (copies the pixel data).
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_raw(self.width, self.height, self.raw().to_vec())
            .expect("surface byte length always matches its dimensions")
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Full surface extent as a rectangle at the origin.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    /// Freeze or thaw the surface.  A render pass freezes its source for
    /// the duration of the pass and restores it during cleanup.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }

    #[inline]
    fn offset(&self, x: i32, y: i32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    #[inline]
    fn raw(&self) -> &[u8] {
        // SAFETY: shared read; see module header for the aliasing contract.
        unsafe { &*self.data.get() }
    }

    /// Read one pixel.  Coordinates must be inside the surface.
    #[inline]
    pub fn pixel(&self, x: i32, y: i32) -> Rgba<u8> {
        debug_assert!(self.bounds().contains(x, y));
        let i = self.offset(x, y);
        let raw = self.raw();
        Rgba([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]])
    }

    /// Read one pixel with clamp-to-edge semantics.  Neighbourhood kernels
    /// (blurs etc.) use this at image borders.
    #[inline]
    pub fn pixel_clamped(&self, x: i32, y: i32) -> Rgba<u8> {
        self.pixel(
            x.clamp(0, self.width as i32 - 1),
            y.clamp(0, self.height as i32 - 1),
        )
    }

    /// Borrow the raw RGBA bytes of `[x0, x1)` on row `y`.
    pub fn row_span(&self, y: i32, x0: i32, x1: i32) -> &[u8] {
        debug_assert!(y >= 0 && y < self.height as i32);
        debug_assert!(x0 >= 0 && x0 <= x1 && x1 <= self.width as i32);
        &self.raw()[self.offset(x0, y)..self.offset(x1, y)]
    }

    /// Write one pixel.  Dropped (with a log line) when the surface is
    /// frozen.  Concurrent callers must target disjoint pixels.
    #[inline]
    pub fn set_pixel(&self, x: i32, y: i32, px: Rgba<u8>) {
        self.write_span(x, y, &px.0);
    }

    /// Write `pixels.len() / 4` consecutive pixels starting at `(x, y)`.
    /// The span must stay inside row `y`.  Dropped when frozen.
    pub fn write_span(&self, x: i32, y: i32, pixels: &[u8]) {
        debug_assert_eq!(pixels.len() % BYTES_PER_PIXEL, 0);
        debug_assert!(self.bounds().contains(x, y));
        debug_assert!(
            x as usize + pixels.len() / BYTES_PER_PIXEL <= self.width as usize,
            "span crosses the right edge"
        );
        if !self.is_writable() {
            crate::log_warn!("write to frozen surface dropped at ({}, {})", x, y);
            return;
        }
        let i = self.offset(x, y);
        // SAFETY: in-bounds (asserted above); disjointness across threads is
        // the caller's contract, so this never aliases a concurrent write.
        unsafe {
            let base = (*self.data.get()).as_mut_ptr().add(i);
            std::ptr::copy_nonoverlapping(pixels.as_ptr(), base, pixels.len());
        }
    }
}

impl Clone for Surface {
    fn clone(&self) -> Self {
        Surface {
            width: self.width,
            height: self.height,
            data: UnsafeCell::new(self.raw().to_vec()),
            writable: AtomicBool::new(self.is_writable()),
        }
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("writable", &self.is_writable())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_surface_is_transparent_and_writable() {
        let s = Surface::new(4, 3);
        assert_eq!((s.width(), s.height()), (4, 3));
        assert!(s.is_writable());
        assert_eq!(s.pixel(2, 1), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn set_and_read_pixel_round_trip() {
        let s = Surface::new(8, 8);
        s.set_pixel(3, 5, Rgba([10, 20, 30, 255]));
        assert_eq!(s.pixel(3, 5), Rgba([10, 20, 30, 255]));
        assert_eq!(s.pixel(3, 4), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn frozen_surface_drops_writes() {
        let s = Surface::new(4, 4);
        s.set_pixel(1, 1, Rgba([9, 9, 9, 9]));
        s.set_writable(false);
        s.set_pixel(1, 1, Rgba([99, 99, 99, 99]));
        assert_eq!(s.pixel(1, 1), Rgba([9, 9, 9, 9]));
        s.set_writable(true);
        s.set_pixel(1, 1, Rgba([7, 7, 7, 7]));
        assert_eq!(s.pixel(1, 1), Rgba([7, 7, 7, 7]));
    }

    #[test]
    fn clamped_sampling_extends_edges() {
        let s = Surface::new(2, 2);
        s.set_pixel(0, 0, Rgba([1, 2, 3, 4]));
        s.set_pixel(1, 1, Rgba([5, 6, 7, 8]));
        assert_eq!(s.pixel_clamped(-5, -5), Rgba([1, 2, 3, 4]));
        assert_eq!(s.pixel_clamped(10, 10), Rgba([5, 6, 7, 8]));
    }

    #[test]
    fn write_span_covers_consecutive_pixels() {
        let s = Surface::new(4, 1);
        s.write_span(1, 0, &[1, 1, 1, 1, 2, 2, 2, 2]);
        assert_eq!(s.pixel(0, 0), Rgba([0, 0, 0, 0]));
        assert_eq!(s.pixel(1, 0), Rgba([1, 1, 1, 1]));
        assert_eq!(s.pixel(2, 0), Rgba([2, 2, 2, 2]));
        assert_eq!(s.row_span(0, 1, 3), &[1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn rgba_image_round_trip() {
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(2, 1, Rgba([40, 50, 60, 70]));
        let s = Surface::from_rgba_image(&img);
        assert_eq!(s.pixel(2, 1), Rgba([40, 50, 60, 70]));
        assert_eq!(s.to_rgba_image(), img);
    }

    #[test]
    fn oversized_dimensions_clamp_to_one_pixel() {
        let s = Surface::new(0, 100);
        assert_eq!((s.width(), s.height()), (1, 1));
        let s = Surface::new(100_000, 100_000);
        assert_eq!((s.width(), s.height()), (1, 1));
    }

    #[test]
    fn disjoint_concurrent_writes_land() {
        use std::sync::Arc;
        let s = Arc::new(Surface::new(64, 64));
        let mut handles = Vec::new();
        for t in 0..4u8 {
            let s = s.clone();
            handles.push(std::thread::spawn(move || {
                // Each thread owns rows 16*t .. 16*t+16.
                for y in (t as i32 * 16)..(t as i32 * 16 + 16) {
                    for x in 0..64 {
                        s.set_pixel(x, y, Rgba([t, t, t, 255]));
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for t in 0..4u8 {
            assert_eq!(s.pixel(63, t as i32 * 16 + 15), Rgba([t, t, t, 255]));
        }
    }
}
