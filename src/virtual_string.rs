//! Virtual strings: one logical LED strip stitched together from segments of
//! physical strings.
//!
//! A logical index is resolved by walking the segment list in order and
//! accumulating segment lengths. The write then lands on the owning physical
//! buffer at `from_index + offset`, or `from_index - offset` for a reversed
//! segment (`from_index > to_index`). Indices past the end of the virtual
//! string, segments referencing unknown devices, and segment ranges that run
//! past the physical buffer are all silently dropped by the buffer itself.

use crate::model::Segment;
use crate::pixels::{scale_channel, PixelBuffer, PixelTarget};
use std::collections::HashMap;

/// Access to physical buffers by device id.
pub trait BufferStore {
    fn buffer(&self, device_id: &str) -> Option<&PixelBuffer>;
    fn buffer_mut(&mut self, device_id: &str) -> Option<&mut PixelBuffer>;
}

impl BufferStore for HashMap<String, PixelBuffer> {
    fn buffer(&self, device_id: &str) -> Option<&PixelBuffer> {
        self.get(device_id)
    }

    fn buffer_mut(&mut self, device_id: &str) -> Option<&mut PixelBuffer> {
        self.get_mut(device_id)
    }
}

/// Map a logical index to `(segment, physical index)`.
pub fn resolve_index(segments: &[Segment], index: i64) -> Option<(&Segment, i64)> {
    if index < 0 {
        return None;
    }
    let mut remaining = index;
    for segment in segments {
        let len = segment.len() as i64;
        if remaining < len {
            let from = segment.from_index as i64;
            let physical = if segment.is_reversed() {
                from - remaining
            } else {
                from + remaining
            };
            return Some((segment, physical));
        }
        remaining -= len;
    }
    None
}

/// [`PixelTarget`] that writes through a segment list into physical buffers.
pub struct VirtualTarget<'a, S: BufferStore + ?Sized> {
    segments: &'a [Segment],
    store: &'a mut S,
    led_count: u32,
}

impl<'a, S: BufferStore + ?Sized> VirtualTarget<'a, S> {
    pub fn new(segments: &'a [Segment], store: &'a mut S) -> Self {
        let led_count = segments.iter().fold(0u32, |total, s| total.saturating_add(s.len()));
        Self {
            segments,
            store,
            led_count,
        }
    }
}

impl<S: BufferStore + ?Sized> PixelTarget for VirtualTarget<'_, S> {
    fn led_count(&self) -> u32 {
        self.led_count
    }

    fn set_pixel(&mut self, index: i64, r: u8, g: u8, b: u8) {
        let Some((segment, physical)) = resolve_index(self.segments, index) else {
            return;
        };
        if let Some(buffer) = self.store.buffer_mut(&segment.node_id) {
            buffer.set_pixel(physical, r, g, b);
        }
    }

    fn get_pixel(&self, index: i64) -> [u8; 3] {
        resolve_index(self.segments, index)
            .and_then(|(segment, physical)| {
                self.store
                    .buffer(&segment.node_id)
                    .map(|buffer| buffer.get_pixel(physical))
            })
            .unwrap_or([0, 0, 0])
    }

    // Whole-string operations walk the physical ranges, so their cost is
    // bounded by the backing buffers rather than the configured segment sizes.
    fn set_all_pixels(&mut self, r: u8, g: u8, b: u8) {
        for segment in self.segments {
            if let Some(buffer) = self.store.buffer_mut(&segment.node_id) {
                for i in segment.clipped_range(buffer.led_count()) {
                    buffer.set_pixel(i as i64, r, g, b);
                }
            }
        }
    }

    fn multiply_all(&mut self, factor: f32) {
        for segment in self.segments {
            if let Some(buffer) = self.store.buffer_mut(&segment.node_id) {
                for i in segment.clipped_range(buffer.led_count()) {
                    let [r, g, b] = buffer.get_pixel(i as i64);
                    buffer.set_pixel(i as i64, scale_channel(r, factor), scale_channel(g, factor), scale_channel(b, factor));
                }
            }
        }
    }
}
