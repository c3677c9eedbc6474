//! Producer half of the pipeline: read frames forever, publish each one.

use super::slot::FrameSlot;
use crate::video::VideoSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const FIRST_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(2);
const PAUSE_SLICE: Duration = Duration::from_millis(20);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u64,
    pub rewinds: u64,
    pub errors: u64,
}

pub(crate) struct DecodeWorker<S> {
    source: S,
    slot: FrameSlot,
    restart_attempts: u32,
    /// Rewinds since the last good frame.
    attempts: u32,
    stats: DecodeStats,
}

impl<S: VideoSource> DecodeWorker<S> {
    pub(crate) fn new(source: S, slot: FrameSlot, restart_attempts: u32) -> Self {
        Self {
            source,
            slot,
            restart_attempts,
            attempts: 0,
            stats: DecodeStats::default(),
        }
    }

    pub(crate) fn run(mut self, running: &AtomicBool) -> DecodeStats {
        while running.load(Ordering::Acquire) {
            self.step(running);
        }
        debug!("decode loop stopped: {:?}", self.stats);
        self.stats
    }

    /// One read. End of stream and read errors both lead to a rewind; once
    /// `restart_attempts` rewinds in a row produced nothing, each further
    /// rewind waits with a doubling delay.
    pub(crate) fn step(&mut self, running: &AtomicBool) {
        match self.source.read_frame() {
            Ok(Some(frame)) => {
                self.slot.publish(frame);
                self.stats.frames += 1;
                self.attempts = 0;
                return;
            }
            Ok(None) => debug!("end of stream after {} frames", self.stats.frames),
            Err(e) => {
                self.stats.errors += 1;
                warn!("decode failed: {e}");
            }
        }

        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.restart_attempts {
            let delay = backoff(self.attempts - self.restart_attempts);
            warn!("video produced no frames after {} restarts, retrying in {delay:?}", self.attempts - 1);
            pause(running, delay);
        }
        self.stats.rewinds += 1;
        if let Err(e) = self.source.rewind() {
            self.stats.errors += 1;
            warn!("rewind failed: {e}");
        }
    }
}

pub(crate) fn backoff(excess: u32) -> Duration {
    let shift = excess.saturating_sub(1).min(16);
    FIRST_BACKOFF.saturating_mul(1 << shift).min(MAX_BACKOFF)
}

/// Sleep for `total`, waking early when `running` drops.
fn pause(running: &AtomicBool, total: Duration) {
    let mut left = total;
    while !left.is_zero() && running.load(Ordering::Acquire) {
        let slice = left.min(PAUSE_SLICE);
        thread::sleep(slice);
        left -= slice;
    }
}
