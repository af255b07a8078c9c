use std::ops::{Deref, Index, IndexMut};

/// Row-major 2-D buffer of pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer2<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    /// Iterates rows from bottom (`y = 0`) to top.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, T> {
        self.pixels.chunks_exact(self.width.max(1))
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }

    /// Copies the inclusive pixel range `[x0, x1] × [y0, y1]` into a new buffer.
    ///
    /// The range is clipped to the buffer; returns `None` when nothing remains.
    pub fn crop(&self, x0: usize, x1: usize, y0: usize, y1: usize) -> Option<Self> {
        if self.width == 0 || self.height == 0 || x0 > x1 || y0 > y1 {
            return None;
        }
        if x0 >= self.width || y0 >= self.height {
            return None;
        }
        let x1 = x1.min(self.width - 1);
        let y1 = y1.min(self.height - 1);
        let width = x1 - x0 + 1;
        let height = y1 - y0 + 1;

        let mut pixels = Vec::with_capacity(width * height);
        for row in self.rows().skip(y0).take(height) {
            pixels.extend_from_slice(&row[x0..=x1]);
        }
        Some(Self::new(width, height, pixels))
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}

impl<T> Deref for Buffer2<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stores_dimensions() {
        let buf = Buffer2::new(3, 2, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(buf.width(), 3);
        assert_eq!(buf.height(), 2);
        assert_eq!(buf.len(), 6);
    }

    #[test]
    #[should_panic(expected = "pixels length must equal width * height")]
    fn test_new_panics_on_size_mismatch() {
        Buffer2::new(3, 2, vec![1, 2, 3]);
    }

    #[test]
    fn test_index_is_row_major() {
        // row 0 = [10, 20, 30], row 1 = [40, 50, 60]
        let buf = Buffer2::new(3, 2, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(buf[(2, 0)], 30);
        assert_eq!(buf[(0, 1)], 40);
        assert_eq!(buf[(2, 1)], 60);
    }

    #[test]
    fn test_index_mut_tuple() {
        let mut buf = Buffer2::new_filled(2, 2, 0.0f32);
        buf[(1, 1)] = 7.5;
        buf[(0, 1)] = 2.5;
        assert_eq!(buf.pixels(), &[0.0, 0.0, 2.5, 7.5]);
    }

    #[test]
    fn test_crop_interior() {
        let buf = Buffer2::new(4, 3, (0..12).collect::<Vec<i32>>());
        let sub = buf.crop(1, 2, 1, 2).unwrap();
        assert_eq!(sub.width(), 2);
        assert_eq!(sub.height(), 2);
        assert_eq!(sub.pixels(), &[5, 6, 9, 10]);
    }

    #[test]
    fn test_crop_clips_to_buffer() {
        let buf = Buffer2::new(4, 3, (0..12).collect::<Vec<i32>>());
        let sub = buf.crop(2, 100, 0, 100).unwrap();
        assert_eq!(sub.width(), 2);
        assert_eq!(sub.height(), 3);
        assert_eq!(sub.pixels(), &[2, 3, 6, 7, 10, 11]);
    }

    #[test]
    fn test_crop_outside_is_none() {
        let buf = Buffer2::new_filled(4, 3, 1u8);
        assert!(buf.crop(4, 6, 0, 1).is_none());
        assert!(buf.crop(2, 1, 0, 1).is_none());
    }

    #[test]
    fn test_rows() {
        let buf = Buffer2::new(2, 2, vec![1, 2, 3, 4]);
        let rows: Vec<&[i32]> = buf.rows().collect();
        assert_eq!(rows, vec![&[1, 2][..], &[3, 4][..]]);
    }
}
