//! The master side of the run (spec §4.6): connects out to every
//! configured agent, runs the handshake, drives its own local
//! `ThreadWorker`s in lockstep with the fleet via phase messages, then
//! collects and merges every agent's `AgentStats` into one total.
//!
//! Grounded on the same `JoinSet`-of-workers-behind-a-`Barrier` shape as
//! `worker.rs`/`agent.rs`; the master's local barrier has one extra slot
//! for this orchestrating task, which it steps forward in lockstep with
//! the `SyncReq`/`Proceed` messages it fans out to every agent.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio::task::JoinSet;

use crate::error::{MutenantError, Result};
use crate::item_lock::ItemLockTable;
use crate::options::Options;
use crate::random_bytes::RandomBytePool;
use crate::stats::{AgentStats, ConnectionStats};
use crate::trace::{self, TraceItem};
use crate::wire::{expect, read_message, write_message, WireMessage};
use crate::worker::ThreadWorker;

pub struct Master {
    options: Arc<Options>,
}

impl Master {
    pub fn new(options: Arc<Options>) -> Self {
        Self { options }
    }

    pub async fn run(self) -> Result<AgentStats> {
        let mut agent_conns = Vec::new();
        for host in &self.options.agents {
            let addr = if host.contains(':') { host.clone() } else { format!("{host}:{}", self.options.agent_port) };
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|source| MutenantError::Connect { addr: addr.clone(), source })?;
            agent_conns.push(stream);
        }

        // Step 1: ship Options verbatim to every agent.
        for conn in &mut agent_conns {
            write_message(conn, &WireMessage::Options((*self.options).clone())).await?;
        }

        // Step 2: collect each agent's reported connection count.
        let mut agent_counts = Vec::with_capacity(agent_conns.len());
        for conn in &mut agent_conns {
            let WireMessage::Count(count) = read_message(conn).await? else {
                return Err(MutenantError::AgentProtocol("expected Count".into()));
            };
            agent_counts.push(count);
        }

        // Step 3: per-server hostname handshake.
        for server in &self.options.servers {
            for conn in &mut agent_conns {
                write_message(conn, &WireMessage::ServerName(server.clone())).await?;
                expect(conn, "Ack", |m| matches!(m, WireMessage::Ack)).await?;
            }
        }

        // Step 4: broadcast the shared lambda denominator — this master's
        // own connection count plus every agent's reported count (spec §4.6
        // "Lambda accounting").
        let own_count = self.options.threads * self.options.connections;
        let lambda_denom = own_count + agent_counts.iter().sum::<u32>();
        for conn in &mut agent_conns {
            write_message(conn, &WireMessage::LambdaDenom(lambda_denom)).await?;
            expect(conn, "Thanks", |m| matches!(m, WireMessage::Thanks)).await?;
        }
        tracing::info!(lambda_denom, agents = agent_conns.len(), "fleet assembled");

        let random_pool = Arc::new(RandomBytePool::new());
        let item_lock = if self.options.enable_item_lock {
            Some(Arc::new(ItemLockTable::new(self.options.item_lock_table_size)))
        } else {
            None
        };

        let connections_per_thread = self.options.connections as usize * self.options.servers.len();
        let trace_receivers_per_thread: Vec<Vec<Option<async_channel::Receiver<TraceItem>>>> = if let Some(path) = &self.options.read_file {
            let dialect = crate::trace::TraceDialect::from_option(self.options.twitter_trace)?;
            let total_consumers = self.options.threads as usize * connections_per_thread;
            let receivers = trace::spawn_producer(path, dialect, total_consumers, 4096)?;
            let mut chunks = Vec::with_capacity(self.options.threads as usize);
            let mut iter = receivers.into_iter().map(Some);
            for _ in 0..self.options.threads {
                chunks.push((0..connections_per_thread).map(|_| iter.next().flatten()).collect());
            }
            chunks
        } else {
            (0..self.options.threads).map(|_| vec![None; connections_per_thread]).collect()
        };

        let barrier = Arc::new(Barrier::new(self.options.threads as usize + 1));
        let mut joinset = JoinSet::new();
        for trace_receivers in trace_receivers_per_thread {
            let options = self.options.clone();
            let random_pool = random_pool.clone();
            let item_lock = item_lock.clone();
            let barrier = barrier.clone();
            joinset.spawn(async move {
                let worker = ThreadWorker::new(options.clone(), random_pool, item_lock);
                worker.run(&options.servers, trace_receivers, barrier).await
            });
        }

        // Three phase transitions: ready/warmup-start, measurement-start,
        // measurement-stop.
        for _ in 0..3 {
            for conn in &mut agent_conns {
                write_message(conn, &WireMessage::SyncReq).await?;
                expect(conn, "Sync", |m| matches!(m, WireMessage::Sync)).await?;
            }
            for conn in &mut agent_conns {
                write_message(conn, &WireMessage::Proceed).await?;
            }
            barrier.wait().await;
            for conn in &mut agent_conns {
                expect(conn, "AckPhase", |m| matches!(m, WireMessage::AckPhase)).await?;
            }
        }

        let mut total = ConnectionStats::default();
        while let Some(joined) = joinset.join_next().await {
            match joined {
                Ok(Ok(stats)) => total.merge(&stats),
                Ok(Err(e)) => tracing::warn!(error = %e, "local worker thread ended with an error"),
                Err(e) => tracing::warn!(error = %e, "local worker thread panicked"),
            }
        }
        if let Some(path) = &self.options.save {
            match std::fs::File::create(path) {
                Ok(file) => {
                    if let Err(e) = total.write_save_lines(file) {
                        tracing::warn!(error = %e, path, "failed to write save file");
                    }
                }
                Err(e) => tracing::warn!(error = %e, path, "failed to create save file"),
            }
        }
        let mut grand_total = total.to_agent_stats();

        // Step 6: collect every agent's final stats.
        for conn in &mut agent_conns {
            write_message(conn, &WireMessage::StatsReq).await?;
            let WireMessage::Stats(stats) = read_message(conn).await? else {
                return Err(MutenantError::AgentProtocol("expected Stats".into()));
            };
            grand_total.merge(&stats);
        }

        Ok(grand_total)
    }
}
