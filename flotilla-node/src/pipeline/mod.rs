//! Frame pipeline: a decode thread and a display thread joined by a [`FrameSlot`].
//!
//! The decoder never waits for the display. The display reads the blink
//! state once per tick and either presents the newest frame or a blank
//! canvas. Both threads watch one running flag; [`FramePipeline::stop`]
//! clears it and joins them, which also drops the video source and screen.

mod decode;
mod display;
mod slot;

pub use decode::DecodeStats;
pub use display::DisplayStats;
pub use slot::Frame;

use crate::blink::BlinkState;
use crate::screen::Screen;
use crate::video::VideoSource;
use decode::DecodeWorker;
use display::DisplayWorker;
use slot::FrameSlot;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub refresh_hz: u32,
    pub background: [u8; 3],
    pub restart_attempts: u32,
}

pub struct FramePipeline {
    running: Arc<AtomicBool>,
    decode: JoinHandle<DecodeStats>,
    display: JoinHandle<DisplayStats>,
}

impl FramePipeline {
    pub fn start<S, D>(
        source: S,
        screen: D,
        blink: watch::Receiver<BlinkState>,
        opts: PipelineOptions,
    ) -> io::Result<Self>
    where
        S: VideoSource + 'static,
        D: Screen + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let slot = FrameSlot::new();
        let period = Duration::from_secs(1) / opts.refresh_hz.max(1);

        let decode = {
            let running = running.clone();
            let worker = DecodeWorker::new(source, slot.clone(), opts.restart_attempts);
            thread::Builder::new()
                .name("decode".into())
                .spawn(move || worker.run(&running))?
        };

        let display = {
            let running = running.clone();
            let worker = DisplayWorker::new(screen, slot, blink, opts.background);
            thread::Builder::new()
                .name("display".into())
                .spawn(move || worker.run(&running, period))
        };
        let display = match display {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::Release);
                let _ = decode.join();
                return Err(e);
            }
        };

        info!("frame pipeline started ({} Hz)", opts.refresh_hz);
        Ok(Self { running, decode, display })
    }

    /// Signal both threads and wait for them.
    pub fn stop(self) -> (DecodeStats, DisplayStats) {
        self.running.store(false, Ordering::Release);
        let decoded = self.decode.join().unwrap_or_else(|_| {
            error!("decode thread panicked");
            DecodeStats::default()
        });
        let shown = self.display.join().unwrap_or_else(|_| {
            error!("display thread panicked");
            DisplayStats::default()
        });
        info!(
            "frame pipeline stopped: {} frames decoded, {} presented",
            decoded.frames, shown.presents
        );
        (decoded, shown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::Headless;
    use crate::video::VideoError;

    /// Endless stream of tiny frames.
    struct Endless;

    impl VideoSource for Endless {
        fn read_frame(&mut self) -> Result<Option<Frame>, VideoError> {
            thread::sleep(Duration::from_millis(2));
            Ok(Some(Frame::blank(2, 2, [1, 2, 3])))
        }

        fn rewind(&mut self) -> Result<(), VideoError> {
            Ok(())
        }
    }

    #[test]
    fn test_start_and_stop() {
        let (_tx, rx) = watch::channel(BlinkState::initial(500));
        let opts = PipelineOptions { refresh_hz: 200, background: [0, 0, 0], restart_attempts: 5 };
        let pipeline = FramePipeline::start(Endless, Headless::new(8, 4), rx, opts).unwrap();

        thread::sleep(Duration::from_millis(100));
        let (decode, display) = pipeline.stop();
        assert!(decode.frames > 0);
        assert!(display.ticks > 0);
        assert!(display.presents > 0);
        assert_eq!(display.errors, 0);
    }
}
