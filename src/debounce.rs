//! Coalesces bursts of registry mutations into single regeneration triggers.
//!
//! Two timers feed one trigger channel:
//!
//! * the **quiet** timer is re-armed by every mutation and fires once no
//!   mutation has arrived for the quiet period;
//! * the **ceiling** timer fires when nothing has triggered for the ceiling
//!   period, so output is produced on first run and refreshed under
//!   sustained churn.
//!
//! Any firing restarts the ceiling.  The trigger channel holds at most one
//! pending trigger; while a regeneration is queued, further firings fold
//! into it.

use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Default quiet period after the last mutation.
pub const DEFAULT_QUIET: Duration = Duration::from_millis(100);

/// Default ceiling between regenerations.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    quiet: Duration,
    ceiling: Duration,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET, DEFAULT_CEILING)
    }
}

impl Debouncer {
    pub fn new(quiet: Duration, ceiling: Duration) -> Self {
        Self { quiet, ceiling }
    }

    /// Creates the trigger channel consumed by the render loop.
    pub fn channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
        mpsc::channel(1)
    }

    /// Runs until `cancel` fires, the arm channel closes, or the render
    /// loop drops its trigger receiver.
    pub async fn run(
        self,
        mut arm: mpsc::Receiver<()>,
        trigger: mpsc::Sender<()>,
        cancel: CancellationToken,
    ) {
        let quiet = sleep(self.quiet);
        let ceiling = sleep(self.ceiling);
        tokio::pin!(quiet, ceiling);
        let mut armed = false;

        loop {
            let fired = tokio::select! {
                _ = cancel.cancelled() => return,
                msg = arm.recv() => {
                    if msg.is_none() {
                        return;
                    }
                    quiet.as_mut().reset(Instant::now() + self.quiet);
                    armed = true;
                    false
                }
                _ = &mut quiet, if armed => {
                    debug!("Quiet period elapsed, triggering regeneration");
                    true
                }
                _ = &mut ceiling => {
                    debug!("Ceiling elapsed, triggering regeneration");
                    true
                }
            };

            if fired {
                armed = false;
                ceiling.as_mut().reset(Instant::now() + self.ceiling);
                if let Err(mpsc::error::TrySendError::Closed(())) = trigger.try_send(()) {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        arm: mpsc::Sender<()>,
        triggers: mpsc::Receiver<()>,
        cancel: CancellationToken,
    }

    fn start(quiet: Duration, ceiling: Duration) -> Harness {
        let (arm, arm_rx) = mpsc::channel(64);
        let (trigger_tx, triggers) = Debouncer::channel();
        let cancel = CancellationToken::new();
        tokio::spawn(Debouncer::new(quiet, ceiling).run(arm_rx, trigger_tx, cancel.clone()));
        Harness {
            arm,
            triggers,
            cancel,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<()>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_trigger() {
        let mut h = start(DEFAULT_QUIET, DEFAULT_CEILING);

        for _ in 0..20 {
            h.arm.send(()).await.unwrap();
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(drain(&mut h.triggers), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(drain(&mut h.triggers), 1);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut h.triggers), 0);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_postpones_the_trigger() {
        let mut h = start(DEFAULT_QUIET, DEFAULT_CEILING);

        for _ in 0..10 {
            h.arm.send(()).await.unwrap();
            sleep(Duration::from_millis(60)).await;
            assert_eq!(drain(&mut h.triggers), 0);
        }
        sleep(Duration::from_millis(60)).await;
        assert_eq!(drain(&mut h.triggers), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_fires_without_mutations() {
        let mut h = start(DEFAULT_QUIET, Duration::from_secs(60));
        let started = Instant::now();

        h.triggers.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(60));

        h.triggers.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_bounds_staleness_under_churn() {
        let ceiling = Duration::from_secs(60);
        let mut h = start(DEFAULT_QUIET, ceiling);
        let started = Instant::now();
        let mut triggers = 0;

        while started.elapsed() < Duration::from_secs(185) {
            h.arm.send(()).await.unwrap();
            sleep(Duration::from_millis(50)).await;
            triggers += drain(&mut h.triggers);
        }
        let elapsed = started.elapsed();

        // The churn's last mutation still gets its quiet-period pass.
        sleep(DEFAULT_QUIET * 2).await;
        triggers += drain(&mut h.triggers);

        let expected = elapsed.as_secs().div_ceil(ceiling.as_secs());
        assert_eq!(expected, 4);
        assert!(triggers as u64 >= expected, "{triggers} < {expected}");
    }

    #[tokio::test(start_paused = true)]
    async fn sparse_mutations_still_meet_the_ceiling() {
        let ceiling = Duration::from_secs(60);
        let mut h = start(DEFAULT_QUIET, ceiling);
        let started = Instant::now();
        let mut triggers = 0;

        for _ in 0..4 {
            h.arm.send(()).await.unwrap();
            for _ in 0..90 {
                sleep(Duration::from_secs(1)).await;
                triggers += drain(&mut h.triggers);
            }
        }

        let expected = started.elapsed().as_secs().div_ceil(ceiling.as_secs());
        assert!(triggers as u64 >= expected, "{triggers} < {expected}");
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_arm_channel_closes() {
        let (arm, arm_rx) = mpsc::channel(1);
        let (trigger_tx, _triggers) = Debouncer::channel();
        let handle = tokio::spawn(Debouncer::default().run(
            arm_rx,
            trigger_tx,
            CancellationToken::new(),
        ));
        drop(arm);
        handle.await.unwrap();
    }
}
