//! One thread's worth of Connections (spec §4.5): opens its connections,
//! waits for the fleet to reach IDLE, runs the optional load/warmup
//! phases, barrier-synchronizes with its siblings (and, when federated,
//! with the master via `agent.rs`), then drives measurement until every
//! owned Connection's exit condition holds.
//!
//! Grounded on the teacher's `tests/performance/get_blocks.rs`, which
//! spawns N synthetic peers behind a `tokio::sync::Barrier`, awaits them
//! via a `JoinSet`, and folds per-peer latency samples into one table —
//! the same shape this module uses for per-thread Connections feeding one
//! `ConnectionStats` total.

use std::sync::Arc;

use tokio::sync::Barrier;
use tokio::task::JoinSet;

use crate::connection::Connection;
use crate::error::Result;
use crate::item_lock::ItemLockTable;
use crate::options::Options;
use crate::random_bytes::RandomBytePool;
use crate::stats::ConnectionStats;
use crate::trace::TraceItem;
use crate::workload::WorkloadDriver;

pub struct ThreadWorker {
    options: Arc<Options>,
    random_pool: Arc<RandomBytePool>,
    item_lock: Option<Arc<ItemLockTable>>,
}

impl ThreadWorker {
    pub fn new(options: Arc<Options>, random_pool: Arc<RandomBytePool>, item_lock: Option<Arc<ItemLockTable>>) -> Self {
        Self { options, random_pool, item_lock }
    }

    /// Opens `connections_per_thread * servers.len()` Connections, runs
    /// them through load/warmup/measurement, and returns the merged
    /// `ConnectionStats` for this thread.
    pub async fn run(
        &self,
        servers: &[String],
        trace_receivers: Vec<Option<async_channel::Receiver<TraceItem>>>,
        phase_barrier: Arc<Barrier>,
    ) -> Result<ConnectionStats> {
        let mut connections = Vec::new();
        let mut trace_iter = trace_receivers.into_iter();

        for server in servers {
            for _ in 0..self.options.connections {
                let trace_rx = trace_iter.next().flatten();
                let workload = WorkloadDriver::new(&self.options, trace_rx)?;
                let conn = Connection::connect(
                    self.options.clone(),
                    server,
                    self.random_pool.clone(),
                    self.item_lock.clone(),
                    workload,
                )
                .await?;
                connections.push(conn);
            }
        }

        if !self.options.noload {
            for conn in &mut connections {
                conn.load().await?;
            }
        }

        // All Connections for this thread have reached IDLE; synchronize
        // with sibling threads (and the master, one level up) before
        // warmup and again before measurement (spec §4.5, §4.6 "Phase
        // barrier").
        phase_barrier.wait().await;

        if self.options.loadonly {
            return Ok(ConnectionStats::default());
        }

        if self.options.warmup > 0 {
            let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(self.options.warmup);
            for conn in &mut connections {
                conn.start_measurement();
            }
            tokio::time::sleep_until(deadline).await;
        }

        phase_barrier.wait().await;

        for conn in &mut connections {
            conn.start_measurement();
        }

        let mut joinset = JoinSet::new();
        for mut conn in connections {
            joinset.spawn(async move {
                conn.run_measurement().await?;
                Ok::<_, crate::error::MutenantError>(conn.stats)
            });
        }

        let mut total = ConnectionStats::default();
        while let Some(joined) = joinset.join_next().await {
            match joined {
                Ok(Ok(stats)) => total.merge(&stats),
                Ok(Err(e)) => tracing::warn!(error = %e, "connection ended with an error"),
                Err(e) => tracing::warn!(error = %e, "connection task panicked"),
            }
        }

        // All of this thread's Connections have hit their exit condition;
        // synchronize "measurement stop" with siblings/master before
        // stats are collected (spec §4.6 "Phase barrier").
        phase_barrier.wait().await;

        Ok(total)
    }
}
