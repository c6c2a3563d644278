//! # Tick Scheduler
//!
//! Drives [`SyncEngine::tick`] at a fixed cadence until told to stop.

use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::engine::SyncEngine;
use crate::transport::Transport;

/// Tick `engine` every `period` until `shutdown` turns true or its sender
/// is dropped. Returns the number of ticks run.
pub async fn run<T: Transport>(
    engine: &mut SyncEngine<T>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = 0;

    info!("Tick loop started ({:?} period)", period);
    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                let report = engine.tick();
                ticks += 1;
                if !report.is_idle() {
                    debug!("Tick {} report: {:?}", report.tick, report);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("Tick loop stopped after {} ticks", ticks);
    ticks
}
