//! Periodic eviction of dead sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::host::behavior::Behavior;

use super::registry::Shared;

/// Clears the in-progress flag when the sweep ends, including when the
/// sweep future is dropped mid-pass.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One sweep pass: snapshot, probe liveness without the write lock, then
/// remove the dead sessions in a single write.
///
/// Returns the number of sessions removed; `0` if another sweep was running.
pub(crate) async fn sweep<B: Behavior>(shared: &Shared<B>) -> usize {
    if shared.sweeping.swap(true, Ordering::AcqRel) {
        debug!("sweep already in progress, skipping");
        return 0;
    }
    let _guard = SweepGuard(&shared.sweeping);

    let dead: Vec<String> = shared
        .snapshot()
        .await
        .into_iter()
        .filter(|(_, session)| !session.is_alive())
        .map(|(id, _)| id)
        .collect();

    let removed = if dead.is_empty() {
        0
    } else {
        shared.remove_many(&dead).await
    };

    if removed > 0 {
        debug!(removed, "swept inactive sessions");
    }
    removed
}

/// Run sweeps every `interval` while `keep_clean` is `true`.
///
/// Turning `keep_clean` off stops scheduling after the current pass; turning
/// it on (or changing the interval) restarts the timer. Cancellation ends the
/// loop between passes; a pass already running completes first.
pub(crate) async fn run_sweeper<B: Behavior>(
    shared: Arc<Shared<B>>,
    mut keep_clean: watch::Receiver<bool>,
    mut interval: watch::Receiver<Duration>,
    cancel: CancellationToken,
) {
    loop {
        if !*keep_clean.borrow_and_update() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = keep_clean.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        let period = *interval.borrow_and_update();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = keep_clean.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                changed = interval.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    let _ = sweep(&shared).await;
                }
            }
        }
    }
}
