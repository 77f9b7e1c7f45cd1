//! Selects what to issue next: synthetic mix, getset, getsetorset-trace, or
//! read_file-trace (spec §4.3). Embedded in `Connection` as its workload
//! driver.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::distributions::{Dist, SizeGenerator};
use crate::error::Result;
use crate::keygen::KeyGenerator;
use crate::operation::OpType;
use crate::options::{Options, WorkloadMode};
use crate::trace::{TraceItem, TraceRecord};

pub struct PlannedOp {
    pub op_type: OpType,
    pub key: String,
    pub valuelen: usize,
}

pub struct WorkloadDriver {
    mode: WorkloadMode,
    update: f64,
    records: u64,
    keygen: KeyGenerator,
    valuesize: SizeGenerator,
    rng: StdRng,
    trace_rx: Option<async_channel::Receiver<TraceItem>>,
    trace_eof: bool,
}

impl WorkloadDriver {
    pub fn new(options: &Options, trace_rx: Option<async_channel::Receiver<TraceItem>>) -> Result<Self> {
        let valuesize = SizeGenerator::new(Dist::parse(&options.valuesize)?, 1, crate::protocol::MAX_VALUELEN);
        Ok(Self {
            mode: options.workload_mode,
            update: options.update,
            records: options.records,
            keygen: KeyGenerator::new(options.prefix.clone()),
            valuesize,
            rng: StdRng::from_entropy(),
            trace_rx,
            trace_eof: false,
        })
    }

    pub fn is_trace_driven(&self) -> bool {
        matches!(self.mode, WorkloadMode::GetSetOrSet | WorkloadMode::ReadFile)
    }

    pub fn trace_eof(&self) -> bool {
        self.trace_eof
    }

    /// Produces up to `max_ops` operations for one ISSUING iteration.
    /// Synthetic and getset modes always return exactly one (or zero, if
    /// `max_ops == 0`); trace modes drain up to `max_ops` records.
    pub async fn next_ops(&mut self, max_ops: usize) -> Vec<PlannedOp> {
        if max_ops == 0 {
            return Vec::new();
        }
        match self.mode {
            WorkloadMode::Synthetic => vec![self.next_synthetic()],
            WorkloadMode::GetSet => vec![self.next_getset()],
            WorkloadMode::GetSetOrSet => self.next_trace_batch(max_ops).await,
            WorkloadMode::ReadFile => self.next_trace_batch(1).await,
        }
    }

    fn next_synthetic(&mut self) -> PlannedOp {
        let is_set = self.rng.gen_bool(self.update.clamp(0.0, 1.0));
        let index = self.rng.gen_range(0..self.records);
        let key = self.keygen.key_for(index);
        let valuelen = self.valuesize.sample(&mut self.rng);
        PlannedOp { op_type: if is_set { OpType::Set } else { OpType::Get }, key, valuelen }
    }

    fn next_getset(&mut self) -> PlannedOp {
        let index = self.rng.gen_range(0..self.records);
        let key = self.keygen.key_for(index);
        let valuelen = self.valuesize.sample(&mut self.rng);
        PlannedOp { op_type: OpType::Get, key, valuelen }
    }

    async fn next_trace_batch(&mut self, max_ops: usize) -> Vec<PlannedOp> {
        let mut out = Vec::with_capacity(max_ops);
        if self.trace_eof {
            return out;
        }
        let Some(rx) = self.trace_rx.as_ref() else { return out };
        for _ in 0..max_ops {
            match rx.recv().await {
                Ok(TraceItem::Record(TraceRecord { op, key, valuelen })) => {
                    out.push(PlannedOp { op_type: op, key, valuelen });
                }
                Ok(TraceItem::Eof) | Err(_) => {
                    self.trace_eof = true;
                    break;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Cli;
    use clap::Parser;

    fn base_options(extra: &[&str]) -> Options {
        let mut args = vec!["mutenant", "--server", "localhost"];
        args.extend_from_slice(extra);
        let cli = Cli::parse_from(args);
        Options::from_cli(cli).unwrap()
    }

    #[tokio::test]
    async fn synthetic_mode_issues_one_op_per_call() {
        let opts = base_options(&[]);
        let mut driver = WorkloadDriver::new(&opts, None).unwrap();
        let ops = driver.next_ops(4).await;
        assert_eq!(ops.len(), 1);
    }

    #[tokio::test]
    async fn update_zero_always_issues_gets() {
        let opts = base_options(&["--update", "0"]);
        let mut driver = WorkloadDriver::new(&opts, None).unwrap();
        for _ in 0..20 {
            let ops = driver.next_ops(1).await;
            assert_eq!(ops[0].op_type, OpType::Get);
        }
    }

    #[tokio::test]
    async fn trace_batch_stops_at_eof() {
        let (tx, rx) = async_channel::bounded(8);
        tx.send(TraceItem::Record(TraceRecord { op: OpType::Get, key: "k".into(), valuelen: 10 }))
            .await
            .unwrap();
        tx.send(TraceItem::Eof).await.unwrap();

        let opts = base_options(&["--getsetorset", "--read_file", "trace.csv"]);
        let mut driver = WorkloadDriver::new(&opts, Some(rx)).unwrap();
        let ops = driver.next_ops(4).await;
        assert_eq!(ops.len(), 1);
        assert!(driver.trace_eof());
        let more = driver.next_ops(4).await;
        assert!(more.is_empty());
    }
}
