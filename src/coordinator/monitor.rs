//! Runtime status monitor
//!
//! Re-reads the focused services' runtime status on a fixed interval and
//! right after every activation change.

use super::ActivationCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawn the monitor task.
///
/// The task only holds a weak reference and ends on its own once the
/// coordinator is dropped.
pub fn spawn_runtime_monitor(
    coordinator: &Arc<ActivationCoordinator>,
    interval: Duration,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(coordinator);
    let mut changes = coordinator.signal().subscribe();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Runtime monitor started (every {:?})", interval);
        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        debug!("Activation signal closed, stopping runtime monitor");
                        break;
                    }
                    let token = *changes.borrow_and_update();
                    debug!("Activation token {}, polling runtime status", token);
                }
                _ = ticker.tick() => {}
            }

            let Some(coordinator) = weak.upgrade() else {
                debug!("Coordinator dropped, stopping runtime monitor");
                break;
            };
            coordinator.poll_runtime_status().await;
        }
    })
}
