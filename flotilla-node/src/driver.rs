//! Clock and inbox for the blink state machine.
//!
//! Three event sources feed [`step`]: control messages from the receiver,
//! the toggle timer (period = current interval) and the randomization timer
//! (fixed period). Every new state is published on a `watch` channel that
//! the display consumer reads without blocking.

use crate::blink::{step, BlinkEvent, BlinkState, ControlMapping, Pattern, PatternDraw};
use flotilla_common::ControlMessage;
use rand::Rng;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub struct BlinkDriver<R> {
    state: BlinkState,
    mapping: ControlMapping,
    randomize_every: Duration,
    rng: R,
}

impl<R: Rng> BlinkDriver<R> {
    pub fn new(initial: BlinkState, mapping: ControlMapping, randomize_every: Duration, rng: R) -> Self {
        Self { state: initial, mapping, randomize_every, rng }
    }

    /// Run until every inbox sender is dropped. Returns the final state.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<ControlMessage>,
        publish: watch::Sender<BlinkState>,
    ) -> BlinkState {
        publish.send_replace(self.state);

        let toggle = sleep(self.interval());
        tokio::pin!(toggle);
        let mut randomize = interval_at(Instant::now() + self.randomize_every, self.randomize_every);
        randomize.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                msg = inbox.recv() => match msg {
                    Some(msg) => BlinkEvent::Control(msg.event),
                    None => break,
                },
                () = &mut toggle, if self.state.toggle_armed => BlinkEvent::Toggle,
                _ = randomize.tick() => BlinkEvent::Randomize(PatternDraw::sample(&mut self.rng)),
            };

            let before = self.state;
            self.state = step(before, &event, &self.mapping);
            self.log_transition(&event, &before);

            let restarted = !before.toggle_armed && self.state.toggle_armed;
            if event == BlinkEvent::Toggle || restarted || before.interval_ms != self.state.interval_ms {
                toggle.as_mut().reset(Instant::now() + self.interval());
            }
            if before != self.state {
                publish.send_replace(self.state);
            }
        }

        debug!("blink driver stopped");
        self.state
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.state.interval_ms))
    }

    fn log_transition(&self, event: &BlinkEvent, before: &BlinkState) {
        let after = &self.state;
        match event {
            BlinkEvent::Toggle => debug!("toggle -> visible={}", after.visible),
            BlinkEvent::Control(ev) if before != after => info!(
                "{} -> master={} blink={} visible={} interval={}ms",
                ev.kind(),
                after.master_enabled,
                after.blink_enabled,
                after.visible,
                after.interval_ms
            ),
            BlinkEvent::Control(ev) => debug!("{} ignored or unchanged", ev.kind()),
            BlinkEvent::Randomize(draw) if before != after || draw.pattern == Pattern::Off => {
                info!("random pattern {:?} -> interval={}ms armed={}", draw.pattern, after.interval_ms, after.toggle_armed)
            }
            BlinkEvent::Randomize(_) => debug!("randomization skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_common::{ControlData, ControlEvent, NoteData};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const MAPPING: ControlMapping = ControlMapping { blink_controller: 70, master_note: 36 };
    const HOUR: Duration = Duration::from_secs(3600);

    fn knob(value: u8) -> ControlMessage {
        ControlMessage::now(ControlEvent::ControlChange(ControlData { controller: 70, value, channel: 0 }))
    }

    fn pad() -> ControlMessage {
        ControlMessage::now(ControlEvent::NoteOn(NoteData { note: 36, velocity: 127, channel: 0 }))
    }

    fn driver(randomize_every: Duration) -> BlinkDriver<StdRng> {
        BlinkDriver::new(BlinkState::initial(500), MAPPING, randomize_every, StdRng::seed_from_u64(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_knob_zero_disables_blinking() {
        let (tx, rx) = mpsc::channel(8);
        let (state_tx, mut state_rx) = watch::channel(BlinkState::initial(500));
        let task = tokio::spawn(driver(HOUR).run(rx, state_tx));

        tx.send(knob(0)).await.unwrap();
        drop(tx);
        let last = task.await.unwrap();

        assert!(!last.blink_enabled);
        assert!(last.visible);
        assert_eq!(*state_rx.borrow_and_update(), last);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_timer_follows_interval() {
        let (tx, rx) = mpsc::channel(8);
        let (state_tx, mut state_rx) = watch::channel(BlinkState::initial(500));
        let started = Instant::now();
        let task = tokio::spawn(driver(HOUR).run(rx, state_tx));

        state_rx.changed().await.unwrap(); // initial publish
        state_rx.changed().await.unwrap();
        assert!(!state_rx.borrow_and_update().visible);
        assert!(started.elapsed() >= Duration::from_millis(500));

        state_rx.changed().await.unwrap();
        assert!(state_rx.borrow_and_update().visible);
        assert!(started.elapsed() >= Duration::from_millis(1000));

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_off_holds_hidden() {
        let (tx, rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(BlinkState::initial(500));
        let task = tokio::spawn(driver(HOUR).run(rx, state_tx));

        tx.send(pad()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = *state_rx.borrow();
        assert!(!state.master_enabled);
        assert!(!state.visible);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_randomization_keeps_interval_in_known_ranges() {
        let (tx, rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(BlinkState::initial(500));
        let task = tokio::spawn(driver(Duration::from_secs(2)).run(rx, state_tx));

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let state = *state_rx.borrow();
            let ms = state.interval_ms;
            let known = [50..=150, 200..=400, 500..=1000];
            assert!(known.iter().any(|r| r.contains(&ms)), "interval {ms}");
        }

        drop(tx);
        task.await.unwrap();
    }
}
