//! Fixed-cadence loop that flushes one context's queue and dispatches what
//! the peer sends.
//!
//! The futures here are not `Send`: run them with `Runtime::block_on` on a
//! current-thread runtime or inside a `LocalSet`.

use std::future::Future;

use anyhow::{Context, Result};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::channel::BatchReceiver;
use crate::config::SessionConfig;
use crate::queue::MessageQueue;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverStats {
    pub ticks: u64,
    /// Flushes that actually sent a batch.
    pub batches_sent: u64,
    pub messages_sent: u64,
    pub batches_received: u64,
}

/// Runs until the peer disconnects or `until` resolves, then flushes once more.
pub async fn run_context(
    queue: MessageQueue,
    receiver: BatchReceiver,
    config: &SessionConfig,
    until: impl Future<Output = ()>,
) -> Result<DriverStats> {
    run_context_with(queue, receiver, config, until, |_| {}).await
}

/// Like [`run_context`], calling `on_tick` before every flush.
pub async fn run_context_with(
    queue: MessageQueue,
    mut receiver: BatchReceiver,
    config: &SessionConfig,
    until: impl Future<Output = ()>,
    mut on_tick: impl FnMut(&MessageQueue),
) -> Result<DriverStats> {
    let period = config
        .flush_interval()
        .context("invalid flush rate for session driver")?;
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(until);

    let mut stats = DriverStats::default();
    debug!(target: "queue", ?period, "driver started");
    loop {
        tokio::select! {
            _ = timer.tick() => {
                stats.ticks += 1;
                on_tick(&queue);
                record_flush(&mut stats, queue.flush());
            }
            batch = receiver.recv() => match batch {
                Some(batch) => {
                    stats.batches_received += 1;
                    queue.dispatch(batch);
                }
                None => {
                    info!(target: "queue", "peer disconnected; stopping driver");
                    break;
                }
            },
            _ = &mut until => {
                debug!(target: "queue", "driver stop requested");
                break;
            }
        }
    }

    record_flush(&mut stats, queue.flush());
    Ok(stats)
}

fn record_flush(stats: &mut DriverStats, sent: usize) {
    if sent > 0 {
        stats.batches_sent += 1;
        stats.messages_sent += sent as u64;
    }
}
