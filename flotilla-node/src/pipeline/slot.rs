//! Single-slot frame mailbox between the decode and display threads.
//!
//! Not a queue: `publish` replaces whatever is there and never waits for
//! the reader, `latest` clones a pointer and never waits for the writer.
//! The lock only guards a pointer swap.

use parking_lot::Mutex;
use std::sync::Arc;

/// Packed RGB24 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub const BYTES_PER_PIXEL: usize = 3;

    pub fn blank(width: u32, height: u32, color: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * Self::BYTES_PER_PIXEL);
        for _ in 0..count {
            pixels.extend_from_slice(&color);
        }
        Self { width, height, pixels }
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::BYTES_PER_PIXEL
    }

    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Frame plus a counter that increases with every publish.
#[derive(Debug, Clone)]
pub struct Published {
    pub generation: u64,
    pub frame: Arc<Frame>,
}

#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Published>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame. Returns its generation.
    pub fn publish(&self, frame: Frame) -> u64 {
        let frame = Arc::new(frame);
        let previous = {
            let mut slot = self.inner.lock();
            let generation = slot.as_ref().map_or(1, |p| p.generation + 1);
            slot.replace(Published { generation, frame })
        };
        // the old frame is freed outside the lock
        previous.map_or(1, |p| p.generation + 1)
    }

    pub fn latest(&self) -> Option<Published> {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_empty_slot() {
        assert!(FrameSlot::new().latest().is_none());
    }

    #[test]
    fn test_latest_write_wins() {
        let slot = FrameSlot::new();
        assert_eq!(slot.publish(Frame::blank(2, 2, [1, 1, 1])), 1);
        assert_eq!(slot.publish(Frame::blank(2, 2, [2, 2, 2])), 2);
        let latest = slot.latest().unwrap();
        assert_eq!(latest.generation, 2);
        assert_eq!(latest.frame.pixel(1, 1), [2, 2, 2]);
    }

    #[test]
    fn test_reader_keeps_its_frame_after_overwrite() {
        let slot = FrameSlot::new();
        slot.publish(Frame::blank(1, 1, [9, 9, 9]));
        let held = slot.latest().unwrap();
        slot.publish(Frame::blank(1, 1, [0, 0, 0]));
        assert_eq!(held.frame.pixel(0, 0), [9, 9, 9]);
    }

    #[test]
    fn test_concurrent_publish_and_read() {
        let slot = FrameSlot::new();
        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 0..500u32 {
                    slot.publish(Frame::blank(4, 4, [(i % 256) as u8, 0, 0]));
                }
            })
        };
        let mut last_seen = 0;
        for _ in 0..500 {
            if let Some(p) = slot.latest() {
                assert!(p.generation >= last_seen);
                assert_eq!(p.frame.pixels.len(), Frame::byte_len(4, 4));
                last_seen = p.generation;
            }
        }
        writer.join().unwrap();
        assert_eq!(slot.latest().unwrap().generation, 500);
    }

    #[test]
    fn test_blank_frame() {
        let f = Frame::blank(3, 2, [10, 20, 30]);
        assert_eq!(f.pixels.len(), 18);
        assert_eq!(f.pixel(2, 1), [10, 20, 30]);
        assert!(Frame::blank(0, 5, [0, 0, 0]).is_empty());
    }
}
