//! The CLI surface (spec §6) and the immutable `Options` it produces.
//!
//! `Options` is consumed by every component and, per SPEC_FULL.md §3, is
//! `Clone + Serialize/Deserialize` so the master can ship it verbatim to
//! agents (spec §4.6 step 1).

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::distributions::Dist;
use crate::error::{MutenantError, Result};
use crate::protocol::ProtocolKind;
use crate::trace::TraceDialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadMode {
    Synthetic,
    GetSet,
    GetSetOrSet,
    ReadFile,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mutenant", about = "A federated key-value cache load generator")]
pub struct Cli {
    /// `host[:port]`, repeatable.
    #[arg(long = "server")]
    pub server: Vec<String>,

    #[arg(long)]
    pub binary: bool,
    #[arg(long)]
    pub redis: bool,

    #[arg(long, default_value_t = 0)]
    pub qps: u64,
    #[arg(long, default_value_t = 0)]
    pub time: u64,
    #[arg(long, default_value_t = 1)]
    pub threads: u32,
    #[arg(long, default_value_t = 1)]
    pub connections: u32,
    #[arg(long, default_value_t = 1)]
    pub depth: usize,
    #[arg(long, default_value_t = 10_000)]
    pub records: u64,
    #[arg(long, default_value_t = 0.0)]
    pub update: f64,

    #[arg(long, default_value = "fixed:30")]
    pub keysize: String,
    #[arg(long, default_value = "fixed:100")]
    pub valuesize: String,
    #[arg(long, default_value = "fixed:0")]
    pub iadist: String,

    #[arg(long, default_value_t = 0)]
    pub warmup: u64,
    #[arg(long, default_value_t = 0)]
    pub wait: u64,

    #[arg(long)]
    pub noload: bool,
    #[arg(long)]
    pub loadonly: bool,
    #[arg(long)]
    pub blocking: bool,
    #[arg(long)]
    pub no_nodelay: bool,
    #[arg(long)]
    pub roundrobin: bool,
    #[arg(long)]
    pub moderate: bool,
    #[arg(long)]
    pub skip: bool,

    #[arg(long)]
    pub save: Option<String>,

    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub scan: Option<String>,
    #[arg(long)]
    pub affinity: bool,

    #[arg(long)]
    pub agentmode: bool,
    #[arg(long = "agent")]
    pub agents: Vec<String>,
    #[arg(long, default_value_t = 5556)]
    pub agent_port: u16,
    #[arg(long, default_value_t = 1.0)]
    pub lambda_mul: f64,
    #[arg(long)]
    pub measure_connections: Option<u32>,
    #[arg(long)]
    pub measure_qps: Option<u64>,
    #[arg(long)]
    pub measure_depth: Option<usize>,

    #[arg(long)]
    pub unix_socket: bool,
    #[arg(long)]
    pub sasl: bool,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub read_file: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub twitter_trace: u8,
    #[arg(long)]
    pub getset: bool,
    #[arg(long)]
    pub getsetorset: bool,

    #[arg(long)]
    pub delete90: bool,

    #[arg(long, default_value_t = 0)]
    pub misswindow: u64,
    #[arg(long, default_value = "")]
    pub prefix: String,

    #[arg(long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[arg(long)]
    pub quiet: bool,

    #[arg(long, default_value_t = 1)]
    pub item_lock_table_size: usize,
    #[arg(long)]
    pub enable_item_lock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    pub servers: Vec<String>,
    pub protocol: SerializableProtocolKind,

    pub qps: u64,
    pub time: u64,
    pub threads: u32,
    pub connections: u32,
    pub depth: usize,
    pub records: u64,
    pub update: f64,

    pub keysize: String,
    pub valuesize: String,
    pub iadist: String,

    pub warmup: u64,
    pub wait: u64,

    pub noload: bool,
    pub loadonly: bool,
    pub blocking: bool,
    pub no_nodelay: bool,
    pub roundrobin: bool,
    pub moderate: bool,
    pub skip: bool,

    pub save: Option<String>,

    pub agentmode: bool,
    pub agents: Vec<String>,
    pub agent_port: u16,
    pub lambda_mul: f64,
    pub measure_connections: Option<u32>,
    pub measure_qps: Option<u64>,
    pub measure_depth: Option<usize>,

    pub unix_socket: bool,
    pub sasl: bool,
    pub username: Option<String>,
    pub password: Option<String>,

    pub read_file: Option<String>,
    pub twitter_trace: u8,
    pub workload_mode: WorkloadMode,

    pub delete90: bool,

    pub misswindow: u64,
    pub prefix: String,

    pub verbose: u8,
    pub quiet: bool,

    /// See SPEC_FULL.md §8 item 2: the original's `queries == 1` is a
    /// "bounded-time" guard in trace mode, not a literal query count.
    pub bounded_time: bool,

    pub item_lock_table_size: usize,
    pub enable_item_lock: bool,
}

/// A serializable mirror of [`ProtocolKind`] (which intentionally wraps
/// codec state elsewhere and isn't itself `Serialize`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializableProtocolKind {
    Ascii,
    Binary,
    Resp,
}

impl From<SerializableProtocolKind> for ProtocolKind {
    fn from(k: SerializableProtocolKind) -> Self {
        match k {
            SerializableProtocolKind::Ascii => ProtocolKind::Ascii,
            SerializableProtocolKind::Binary => ProtocolKind::Binary,
            SerializableProtocolKind::Resp => ProtocolKind::Resp,
        }
    }
}

impl Options {
    pub fn from_cli(cli: Cli) -> Result<Options> {
        if cli.agentmode && !cli.agents.is_empty() {
            return Err(MutenantError::Config(
                "--agentmode and --agent are mutually exclusive".into(),
            ));
        }
        if !cli.agentmode && cli.server.is_empty() {
            return Err(MutenantError::Config("at least one --server is required".into()));
        }
        if cli.binary && cli.redis {
            return Err(MutenantError::Config("--binary and --redis are mutually exclusive".into()));
        }

        let protocol = if cli.redis {
            SerializableProtocolKind::Resp
        } else if cli.binary {
            SerializableProtocolKind::Binary
        } else {
            SerializableProtocolKind::Ascii
        };

        // Validate distribution strings eagerly so a typo is a Config
        // error, not a panic mid-run.
        Dist::parse(&cli.keysize)?;
        Dist::parse(&cli.valuesize)?;
        Dist::parse(&cli.iadist)?;

        if cli.getset && cli.getsetorset {
            return Err(MutenantError::Config("--getset and --getsetorset are mutually exclusive".into()));
        }

        let workload_mode = if cli.read_file.is_some() {
            if cli.getsetorset {
                WorkloadMode::GetSetOrSet
            } else {
                WorkloadMode::ReadFile
            }
        } else if cli.getset {
            WorkloadMode::GetSet
        } else {
            WorkloadMode::Synthetic
        };

        if workload_mode == WorkloadMode::GetSetOrSet || workload_mode == WorkloadMode::ReadFile {
            TraceDialect::from_option(cli.twitter_trace)?;
            if cli.read_file.is_none() {
                return Err(MutenantError::Config("trace mode requires --read_file".into()));
            }
        }

        Ok(Options {
            servers: cli.server,
            protocol,
            qps: cli.qps,
            time: cli.time,
            threads: cli.threads.max(1),
            connections: cli.connections.max(1),
            depth: cli.depth.max(1),
            records: cli.records.max(1),
            update: cli.update.clamp(0.0, 1.0),
            keysize: cli.keysize,
            valuesize: cli.valuesize,
            iadist: cli.iadist,
            warmup: cli.warmup,
            wait: cli.wait,
            noload: cli.noload,
            loadonly: cli.loadonly,
            blocking: cli.blocking,
            no_nodelay: cli.no_nodelay,
            roundrobin: cli.roundrobin,
            moderate: cli.moderate,
            skip: cli.skip,
            save: cli.save,
            agentmode: cli.agentmode,
            agents: cli.agents,
            agent_port: cli.agent_port,
            lambda_mul: cli.lambda_mul,
            measure_connections: cli.measure_connections,
            measure_qps: cli.measure_qps,
            measure_depth: cli.measure_depth,
            unix_socket: cli.unix_socket,
            sasl: cli.sasl,
            username: cli.username,
            password: cli.password,
            read_file: cli.read_file,
            twitter_trace: cli.twitter_trace,
            workload_mode,
            delete90: cli.delete90,
            misswindow: cli.misswindow,
            prefix: cli.prefix,
            verbose: cli.verbose,
            quiet: cli.quiet,
            bounded_time: cli.time > 0,
            item_lock_table_size: cli.item_lock_table_size,
            enable_item_lock: cli.enable_item_lock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_server() -> Cli {
        Cli::parse_from(["mutenant", "--server", "localhost:11211"])
    }

    #[test]
    fn requires_a_server_outside_agent_mode() {
        let cli = Cli::parse_from(["mutenant"]);
        assert!(Options::from_cli(cli).is_err());
    }

    #[test]
    fn agentmode_and_agent_are_mutually_exclusive() {
        let cli = Cli::parse_from(["mutenant", "--agentmode", "--agent", "host1"]);
        assert!(Options::from_cli(cli).is_err());
    }

    #[test]
    fn defaults_to_ascii_protocol() {
        let opts = Options::from_cli(cli_with_server()).unwrap();
        assert_eq!(opts.protocol, SerializableProtocolKind::Ascii);
    }

    #[test]
    fn redis_flag_selects_resp() {
        let cli = Cli::parse_from(["mutenant", "--server", "localhost", "--redis"]);
        let opts = Options::from_cli(cli).unwrap();
        assert_eq!(opts.protocol, SerializableProtocolKind::Resp);
    }

    #[test]
    fn trace_mode_requires_read_file() {
        let cli = Cli::parse_from(["mutenant", "--server", "localhost", "--getsetorset"]);
        assert!(Options::from_cli(cli).is_err());
    }
}
