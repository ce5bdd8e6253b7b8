use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::clock::TICK_INTERVAL;

/// Cancellable once-per-interval task feeding playback ticks into the controller.
///
/// Each tick carries the generation it was started with; the controller discards ticks whose
/// generation no longer matches, so ticks already queued when the ticker is cancelled never land.
pub(crate) struct Ticker {
    generation: u64,
    cancel: CancellationToken,
}

impl Ticker {
    pub(crate) fn start(generation: u64, ticks: UnboundedSender<u64>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if ticks.send(generation).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { generation, cancel }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
