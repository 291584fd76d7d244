//! Delayed-show, immediate-hide loading indicator

use crate::core::events::{AppEvent, EventSender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Shown,
    Done,
}

/// Guard around one long-running operation.
///
/// `LoadingChanged(true)` is emitted only once the operation has outlived
/// the debounce window; dropping the guard hides the indicator right away,
/// and only if it was shown.
pub struct LoadingIndicator {
    phase: Arc<Mutex<Phase>>,
    events: EventSender,
    timer: Option<JoinHandle<()>>,
}

impl LoadingIndicator {
    pub fn start(events: EventSender, delay: Duration) -> Self {
        let phase = Arc::new(Mutex::new(Phase::Pending));

        // Outside a runtime there is nothing to time; never show.
        let timer = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let phase = Arc::clone(&phase);
            let events = events.clone();
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                let mut phase = phase.lock();
                if *phase == Phase::Pending {
                    *phase = Phase::Shown;
                    events.send(AppEvent::LoadingChanged(true));
                }
            })
        });

        Self {
            phase,
            events,
            timer,
        }
    }

    pub fn is_shown(&self) -> bool {
        *self.phase.lock() == Phase::Shown
    }
}

impl Drop for LoadingIndicator {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let mut phase = self.phase.lock();
        if *phase == Phase::Shown {
            self.events.send(AppEvent::LoadingChanged(false));
        }
        *phase = Phase::Done;
    }
}
