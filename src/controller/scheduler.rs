//! Rotation scheduler.
//!
//! Secrets whose service account never produces another event still have
//! to rotate, so a timer enqueues a scan at a fixed interval. The tick goes
//! through the same queue as watch events, keeping all reconciliation on
//! the single worker. The interval should stay at or below half the
//! minimum grace period so every secret is re-examined inside its grace
//! window; the config default guarantees this.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::controller::watch::Event;

/// Enqueue [`Event::Tick`] every `period` until the worker goes away
pub fn spawn_ticker(tx: mpsc::Sender<Event>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the startup re-list already
        // covers that moment.
        interval.tick().await;
        loop {
            interval.tick().await;
            debug!("scheduling rotation scan");
            if tx.send(Event::Tick).await.is_err() {
                break;
            }
        }
    })
}
