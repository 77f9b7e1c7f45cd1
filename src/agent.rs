//! The agent side of the master/agent protocol (spec §4.6): listens for a
//! single master connection, runs the handshake, drives this process's own
//! `ThreadWorker`s in lockstep with the master's phase messages, and
//! reports its `AgentStats` back at the end.
//!
//! Grounded on the same `JoinSet`-of-workers-behind-a-`Barrier` shape as
//! `worker.rs`; the network messages here simply stand in for the extra
//! barrier participant a purely local run doesn't need.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Barrier;
use tokio::task::JoinSet;

use crate::error::{MutenantError, Result};
use crate::item_lock::ItemLockTable;
use crate::options::Options;
use crate::random_bytes::RandomBytePool;
use crate::stats::ConnectionStats;
use crate::trace::{self, TraceItem};
use crate::wire::{expect, read_message, write_message, WireMessage};
use crate::worker::ThreadWorker;

pub struct AgentServer {
    bind_port: u16,
}

impl AgentServer {
    pub fn new(bind_port: u16) -> Self {
        Self { bind_port }
    }

    /// Accepts one master connection and runs it to completion. Mutilate's
    /// agent serves exactly one master per invocation; a fresh process is
    /// started for each run.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.bind_port)).await?;
        tracing::info!(port = self.bind_port, "agent listening for master");
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "master connected");
        self.serve(stream).await
    }

    async fn serve(&self, mut stream: TcpStream) -> Result<()> {
        // Step 1: receive the run's Options verbatim.
        let WireMessage::Options(options) = read_message(&mut stream).await? else {
            return Err(MutenantError::AgentProtocol("expected Options".into()));
        };
        let options = Arc::new(options);

        // Step 2: report this agent's connection count (threads * lambda_mul,
        // spec §4.6 step 2).
        let count = (options.threads as f64 * options.lambda_mul).round() as u32;
        write_message(&mut stream, &WireMessage::Count(count)).await?;

        // Step 3: per-server hostname handshake.
        for _ in 0..options.servers.len() {
            expect(&mut stream, "ServerName", |m| matches!(m, WireMessage::ServerName(_))).await?;
            write_message(&mut stream, &WireMessage::Ack).await?;
        }

        // Step 4: receive the shared lambda denominator.
        let WireMessage::LambdaDenom(_denom) = read_message(&mut stream).await? else {
            return Err(MutenantError::AgentProtocol("expected LambdaDenom".into()));
        };
        write_message(&mut stream, &WireMessage::Thanks).await?;

        let random_pool = Arc::new(RandomBytePool::new());
        let item_lock = if options.enable_item_lock {
            Some(Arc::new(ItemLockTable::new(options.item_lock_table_size)))
        } else {
            None
        };

        let connections_per_thread = options.connections as usize * options.servers.len();
        let trace_receivers_per_thread: Vec<Vec<Option<async_channel::Receiver<TraceItem>>>> = if let Some(path) = &options.read_file {
            let dialect = crate::trace::TraceDialect::from_option(options.twitter_trace)?;
            let total_consumers = options.threads as usize * connections_per_thread;
            let receivers = trace::spawn_producer(path, dialect, total_consumers, 4096)?;
            let mut chunks = Vec::with_capacity(options.threads as usize);
            let mut iter = receivers.into_iter().map(Some);
            for _ in 0..options.threads {
                chunks.push((0..connections_per_thread).map(|_| iter.next().flatten()).collect());
            }
            chunks
        } else {
            (0..options.threads).map(|_| vec![None; connections_per_thread]).collect()
        };

        // Local barrier: one slot per ThreadWorker plus this task, which
        // steps it forward each time the master sends Proceed.
        let barrier = Arc::new(Barrier::new(options.threads as usize + 1));

        let mut joinset = JoinSet::new();
        for trace_receivers in trace_receivers_per_thread {
            let options = options.clone();
            let random_pool = random_pool.clone();
            let item_lock = item_lock.clone();
            let barrier = barrier.clone();
            joinset.spawn(async move {
                let worker = ThreadWorker::new(options.clone(), random_pool, item_lock);
                worker.run(&options.servers, trace_receivers, barrier).await
            });
        }

        // Three phase transitions: ready/warmup-start, measurement-start,
        // measurement-stop (spec §4.6 "Phase barrier").
        for _ in 0..3 {
            expect(&mut stream, "SyncReq", |m| matches!(m, WireMessage::SyncReq)).await?;
            write_message(&mut stream, &WireMessage::Sync).await?;
            expect(&mut stream, "Proceed", |m| matches!(m, WireMessage::Proceed)).await?;
            barrier.wait().await;
            write_message(&mut stream, &WireMessage::AckPhase).await?;
        }

        let mut total = ConnectionStats::default();
        while let Some(joined) = joinset.join_next().await {
            match joined {
                Ok(Ok(stats)) => total.merge(&stats),
                Ok(Err(e)) => tracing::warn!(error = %e, "agent worker thread ended with an error"),
                Err(e) => tracing::warn!(error = %e, "agent worker thread panicked"),
            }
        }

        expect(&mut stream, "StatsReq", |m| matches!(m, WireMessage::StatsReq)).await?;
        write_message(&mut stream, &WireMessage::Stats(total.to_agent_stats())).await?;

        Ok(())
    }
}
