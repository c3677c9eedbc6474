//! Consumer half of the pipeline: fixed-rate presentation gated by the blink state.

use super::slot::{Frame, FrameSlot};
use crate::blink::BlinkState;
use crate::screen::Screen;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Scale `frame` to fit `width`x`height` keeping its aspect ratio, centred
/// on `background`. Nearest-neighbour sampling.
pub fn letterbox(frame: &Frame, width: u32, height: u32, background: [u8; 3]) -> Frame {
    if frame.width == width && frame.height == height {
        return frame.clone();
    }
    let mut canvas = Frame::blank(width, height, background);
    if frame.is_empty() || width == 0 || height == 0 {
        return canvas;
    }

    let scale = f64::min(
        f64::from(width) / f64::from(frame.width),
        f64::from(height) / f64::from(frame.height),
    );
    let dw = ((f64::from(frame.width) * scale) as u32).clamp(1, width);
    let dh = ((f64::from(frame.height) * scale) as u32).clamp(1, height);
    let x0 = (width - dw) / 2;
    let y0 = (height - dh) / 2;

    let bpp = Frame::BYTES_PER_PIXEL;
    let columns: Vec<usize> = (0..dw)
        .map(|dx| (dx as u64 * u64::from(frame.width) / u64::from(dw)) as usize * bpp)
        .collect();
    for dy in 0..dh {
        let sy = (u64::from(dy) * u64::from(frame.height) / u64::from(dh)) as usize;
        let src_row = &frame.pixels[sy * frame.width as usize * bpp..][..frame.width as usize * bpp];
        let start = ((y0 + dy) as usize * width as usize + x0 as usize) * bpp;
        let dst_row = &mut canvas.pixels[start..start + dw as usize * bpp];
        for (dst, &sx) in dst_row.chunks_exact_mut(bpp).zip(&columns) {
            dst.copy_from_slice(&src_row[sx..sx + bpp]);
        }
    }
    canvas
}

/// What is currently on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shown {
    Nothing,
    Blank,
    Frame(u64),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisplayStats {
    pub ticks: u64,
    pub presents: u64,
    pub errors: u64,
}

pub(crate) struct DisplayWorker<D> {
    screen: D,
    slot: FrameSlot,
    blink: watch::Receiver<BlinkState>,
    background: [u8; 3],
    blank: Frame,
    shown: Shown,
    stats: DisplayStats,
}

impl<D: Screen> DisplayWorker<D> {
    pub(crate) fn new(screen: D, slot: FrameSlot, blink: watch::Receiver<BlinkState>, background: [u8; 3]) -> Self {
        let (width, height) = screen.size();
        Self {
            screen,
            slot,
            blink,
            background,
            blank: Frame::blank(width, height, background),
            shown: Shown::Nothing,
            stats: DisplayStats::default(),
        }
    }

    pub(crate) fn run(mut self, running: &AtomicBool, period: Duration) -> DisplayStats {
        let mut next = Instant::now();
        while running.load(Ordering::Acquire) {
            self.tick();
            next += period;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                // fell behind, don't try to catch up
                next = now;
            }
        }
        debug!("display loop stopped: {:?}", self.stats);
        self.stats
    }

    pub(crate) fn tick(&mut self) {
        self.stats.ticks += 1;
        let visible = self.blink.borrow().visible;
        let latest = if visible { self.slot.latest() } else { None };
        let wanted = latest.as_ref().map_or(Shown::Blank, |p| Shown::Frame(p.generation));
        if wanted == self.shown {
            return;
        }

        let result = match &latest {
            Some(p) => {
                let (width, height) = self.screen.size();
                let fitted = letterbox(&p.frame, width, height, self.background);
                self.screen.present(&fitted)
            }
            None => self.screen.present(&self.blank),
        };
        match result {
            Ok(()) => {
                self.stats.presents += 1;
                self.shown = wanted;
            }
            Err(e) => {
                self.stats.errors += 1;
                if self.stats.errors == 1 || self.stats.errors % 600 == 0 {
                    warn!("present failed ({} so far): {e}", self.stats.errors);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::DisplayError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<Frame>>>,
        fail: bool,
    }

    impl Screen for Recorder {
        fn size(&self) -> (u32, u32) {
            (4, 2)
        }

        fn present(&mut self, frame: &Frame) -> Result<(), DisplayError> {
            if self.fail {
                return Err(DisplayError::Geometry("unplugged".into()));
            }
            self.frames.lock().push(frame.clone());
            Ok(())
        }
    }

    fn state(visible: bool) -> BlinkState {
        BlinkState { visible, ..BlinkState::initial(500) }
    }

    #[test]
    fn test_letterbox_pillarbox() {
        // 1x1 red into 4x2: 2x2 block centred, one background column each side
        let red = Frame::blank(1, 1, [255, 0, 0]);
        let out = letterbox(&red, 4, 2, [0, 0, 9]);
        assert_eq!(out.pixel(0, 0), [0, 0, 9]);
        assert_eq!(out.pixel(1, 0), [255, 0, 0]);
        assert_eq!(out.pixel(2, 1), [255, 0, 0]);
        assert_eq!(out.pixel(3, 1), [0, 0, 9]);
    }

    #[test]
    fn test_letterbox_downscale_samples_nearest() {
        let mut src = Frame::blank(4, 4, [0, 0, 0]);
        // left half white
        for y in 0..4 {
            for x in 0..2 {
                let i = (y * 4 + x) * 3;
                src.pixels[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let out = letterbox(&src, 2, 2, [7, 7, 7]);
        assert_eq!(out.pixel(0, 0), [255, 255, 255]);
        assert_eq!(out.pixel(1, 1), [0, 0, 0]);
    }

    #[test]
    fn test_letterbox_same_size_is_copy() {
        let src = Frame::blank(4, 2, [3, 3, 3]);
        assert_eq!(letterbox(&src, 4, 2, [0, 0, 0]), src);
    }

    #[test]
    fn test_hidden_shows_blank_once() {
        let screen = Recorder::default();
        let slot = FrameSlot::new();
        slot.publish(Frame::blank(4, 2, [200, 200, 200]));
        let (_tx, rx) = watch::channel(state(false));
        let mut worker = DisplayWorker::new(screen.clone(), slot, rx, [0, 0, 0]);

        worker.tick();
        worker.tick();
        let frames = screen.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pixel(0, 0), [0, 0, 0]);
    }

    #[test]
    fn test_visible_presents_each_new_frame() {
        let screen = Recorder::default();
        let slot = FrameSlot::new();
        let (tx, rx) = watch::channel(state(true));
        let mut worker = DisplayWorker::new(screen.clone(), slot.clone(), rx, [0, 0, 0]);

        worker.tick(); // nothing decoded yet: blank
        slot.publish(Frame::blank(4, 2, [1, 1, 1]));
        worker.tick();
        worker.tick();
        slot.publish(Frame::blank(4, 2, [2, 2, 2]));
        worker.tick();
        tx.send_replace(state(false));
        worker.tick();

        let shades: Vec<u8> = screen.frames.lock().iter().map(|f| f.pixel(0, 0)[0]).collect();
        assert_eq!(shades, vec![0, 1, 2, 0]);
        assert_eq!(worker.stats.ticks, 5);
    }

    #[test]
    fn test_present_errors_are_retried() {
        let screen = Recorder { fail: true, ..Default::default() };
        let (_tx, rx) = watch::channel(state(true));
        let mut worker = DisplayWorker::new(screen, FrameSlot::new(), rx, [0, 0, 0]);
        worker.tick();
        worker.tick();
        assert_eq!(worker.stats.errors, 2);
        assert_eq!(worker.shown, Shown::Nothing);
    }
}
