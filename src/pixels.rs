//! Per-device RGB pixel storage and the capability interface effects draw through.

/// Drawing surface handed to effect plug-ins.
///
/// Implemented directly by [`PixelBuffer`] and, for strings composed from
/// segments of several devices, by [`crate::virtual_string::VirtualTarget`].
/// Out-of-range indices are ignored on writes and read back as black.
pub trait PixelTarget {
    fn led_count(&self) -> u32;
    fn set_pixel(&mut self, index: i64, r: u8, g: u8, b: u8);
    fn get_pixel(&self, index: i64) -> [u8; 3];

    fn set_all_pixels(&mut self, r: u8, g: u8, b: u8) {
        for i in 0..self.led_count() as i64 {
            self.set_pixel(i, r, g, b);
        }
    }

    fn clear(&mut self) {
        self.set_all_pixels(0, 0, 0);
    }

    /// Scale every channel by `factor`, rounding down.
    fn multiply_all(&mut self, factor: f32) {
        for i in 0..self.led_count() as i64 {
            let [r, g, b] = self.get_pixel(i);
            self.set_pixel(i, scale_channel(r, factor), scale_channel(g, factor), scale_channel(b, factor));
        }
    }
}

pub(crate) fn scale_channel(value: u8, factor: f32) -> u8 {
    // `as u8` saturates, so negative or >1 factors clamp to 0..=255.
    (value as f32 * factor).floor() as u8
}

/// Raw R,G,B bytes for one physical string. `bytes.len() == led_count * 3` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixelBuffer {
    led_count: u32,
    bytes: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(led_count: u32) -> Self {
        Self {
            led_count,
            bytes: vec![0; led_count as usize * 3],
        }
    }

    /// Grow (zero-filled) or truncate to `led_count` LEDs, keeping existing pixels.
    pub fn resize(&mut self, led_count: u32) {
        if led_count == self.led_count {
            return;
        }
        self.bytes.resize(led_count as usize * 3, 0);
        self.led_count = led_count;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Overwrite from an externally supplied frame, truncating or zero-padding to fit.
    pub fn copy_from(&mut self, rgb: &[u8]) {
        let n = rgb.len().min(self.bytes.len());
        self.bytes[..n].copy_from_slice(&rgb[..n]);
        self.bytes[n..].fill(0);
    }

    fn offset(&self, index: i64) -> Option<usize> {
        if index < 0 || index >= self.led_count as i64 {
            return None;
        }
        Some(index as usize * 3)
    }
}

impl PixelTarget for PixelBuffer {
    fn led_count(&self) -> u32 {
        self.led_count
    }

    fn set_pixel(&mut self, index: i64, r: u8, g: u8, b: u8) {
        if let Some(base) = self.offset(index) {
            self.bytes[base] = r;
            self.bytes[base + 1] = g;
            self.bytes[base + 2] = b;
        }
    }

    fn get_pixel(&self, index: i64) -> [u8; 3] {
        match self.offset(index) {
            Some(base) => [self.bytes[base], self.bytes[base + 1], self.bytes[base + 2]],
            None => [0, 0, 0],
        }
    }

    fn set_all_pixels(&mut self, r: u8, g: u8, b: u8) {
        for chunk in self.bytes.chunks_exact_mut(3) {
            chunk[0] = r;
            chunk[1] = g;
            chunk[2] = b;
        }
    }

    fn clear(&mut self) {
        self.bytes.fill(0);
    }

    fn multiply_all(&mut self, factor: f32) {
        for byte in self.bytes.iter_mut() {
            *byte = scale_channel(*byte, factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_buffer(led_count: u32) -> PixelBuffer {
        let mut buffer = PixelBuffer::new(led_count);
        for i in 0..led_count as i64 {
            buffer.set_pixel(i, i as u8 + 1, 100, 200);
        }
        buffer
    }

    #[test]
    fn test_new_buffer_is_black_and_sized() {
        let buffer = PixelBuffer::new(4);
        assert_eq!(buffer.led_count(), 4);
        assert_eq!(buffer.bytes().len(), 12);
        assert!(buffer.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_grow_preserves_and_zero_fills() {
        let mut buffer = create_test_buffer(3);
        buffer.resize(5);

        assert_eq!(buffer.bytes().len(), 15, "Length must track led_count * 3");
        for i in 0..3 {
            assert_eq!(buffer.get_pixel(i), [i as u8 + 1, 100, 200], "Existing pixel {} should survive growth", i);
        }
        assert_eq!(buffer.get_pixel(3), [0, 0, 0]);
        assert_eq!(buffer.get_pixel(4), [0, 0, 0]);
    }

    #[test]
    fn test_shrink_truncates() {
        let mut buffer = create_test_buffer(5);
        buffer.resize(2);
        assert_eq!(buffer.bytes(), &[1, 100, 200, 2, 100, 200]);
        assert_eq!(buffer.get_pixel(2), [0, 0, 0], "Truncated pixels read back black");
    }

    #[test]
    fn test_out_of_range_writes_are_ignored() {
        let mut buffer = PixelBuffer::new(2);
        buffer.set_pixel(-1, 255, 255, 255);
        buffer.set_pixel(2, 255, 255, 255);
        buffer.set_pixel(i64::MAX, 255, 255, 255);
        assert!(buffer.bytes().iter().all(|&b| b == 0));
        assert_eq!(buffer.get_pixel(-5), [0, 0, 0]);
    }

    #[test]
    fn test_set_all_and_clear() {
        let mut buffer = PixelBuffer::new(3);
        buffer.set_all_pixels(10, 20, 30);
        assert_eq!(buffer.bytes(), &[10, 20, 30, 10, 20, 30, 10, 20, 30]);
        buffer.clear();
        assert!(buffer.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_multiply_all_floors() {
        let mut buffer = PixelBuffer::new(1);
        buffer.set_pixel(0, 255, 3, 101);
        buffer.multiply_all(0.5);
        assert_eq!(buffer.get_pixel(0), [127, 1, 50]);
        buffer.multiply_all(0.0);
        assert_eq!(buffer.get_pixel(0), [0, 0, 0]);
    }

    #[test]
    fn test_copy_from_pads_and_truncates() {
        let mut buffer = create_test_buffer(2);
        buffer.copy_from(&[9, 9, 9]);
        assert_eq!(buffer.bytes(), &[9, 9, 9, 0, 0, 0]);
        buffer.copy_from(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(buffer.bytes(), &[1, 2, 3, 4, 5, 6]);
    }
}
