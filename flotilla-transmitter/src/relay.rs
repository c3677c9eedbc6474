//! Poll loop: drain the control surface, broadcast every event, sleep briefly.

use crate::broadcast::{Broadcaster, DatagramSink};
use crate::surface::{ControlSurface, SurfaceError};
use flotilla_common::{ControlEvent, ControlMessage};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

/// LPD8 pads start at note 36.
const FIRST_PAD_NOTE: u8 = 36;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub relayed: u64,
    pub failed: u64,
}

/// Relay until `shutdown` resolves or the surface fails.
pub async fn run_relay<C, S, F>(
    surface: &mut C,
    broadcaster: &Broadcaster<S>,
    poll_interval: Duration,
    shutdown: F,
) -> Result<RelayStats, SurfaceError>
where
    C: ControlSurface,
    S: DatagramSink,
    F: Future<Output = ()>,
{
    let mut stats = RelayStats::default();
    tokio::pin!(shutdown);

    loop {
        for event in surface.poll_pending()? {
            describe(&event);
            let msg = ControlMessage::now(event);
            match broadcaster.send(&msg) {
                Ok(report) => {
                    stats.relayed += 1;
                    info!("✓ broadcast sent ({}/{} addresses)", report.delivered.len(), broadcaster.targets().len());
                }
                Err(e) => {
                    stats.failed += 1;
                    error!("✗ broadcast failed: {e}");
                }
            }
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    info!("relay stopped after {} events ({} failed)", stats.relayed + stats.failed, stats.failed);
    Ok(stats)
}

fn describe(event: &ControlEvent) {
    match event {
        ControlEvent::NoteOn(n) => {
            let pad = i16::from(n.note) - i16::from(FIRST_PAD_NOTE) + 1;
            info!("Pad {pad} pressed with velocity {}", n.velocity);
        }
        ControlEvent::ControlChange(c) => {
            info!("Knob: controller={}, value={}", c.controller, c.value);
        }
        ControlEvent::NoteOff(_) => {}
    }
}
