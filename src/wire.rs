//! The master/agent wire message set and its framing (spec §4.6, redesigned
//! per spec §9 "Agent protocol framing" into an explicit, versioned,
//! length-prefixed encoding instead of a raw struct `memcpy`).
//!
//! Every message is a 4-byte big-endian length prefix followed by a
//! `bincode` payload.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{MutenantError, Result};
use crate::options::Options;
use crate::stats::AgentStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    Options(Options),
    Count(u32),
    Ack,
    ServerName(String),
    LambdaDenom(u32),
    Thanks,
    SyncReq,
    Sync,
    Proceed,
    AckPhase,
    StatsReq,
    Stats(AgentStats),
}

pub async fn write_message(stream: &mut (impl AsyncWrite + Unpin), msg: &WireMessage) -> Result<()> {
    let payload = bincode::serialize(msg).map_err(|e| MutenantError::AgentProtocol(e.to_string()))?;
    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_message(stream: &mut (impl tokio::io::AsyncRead + Unpin)) -> Result<WireMessage> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(|_| MutenantError::RemoteEof)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(|_| MutenantError::RemoteEof)?;
    bincode::deserialize(&payload).map_err(|e| MutenantError::AgentProtocol(e.to_string()))
}

/// Asserts the next message matches an expected shape, turning any
/// deviation into a fatal `AgentProtocol` error (spec §4.6 "deviations are
/// fatal").
pub async fn expect(stream: &mut (impl tokio::io::AsyncRead + Unpin), what: &str, pred: impl FnOnce(&WireMessage) -> bool) -> Result<WireMessage> {
    let msg = read_message(stream).await?;
    if !pred(&msg) {
        return Err(MutenantError::AgentProtocol(format!("expected {what}, got {msg:?}")));
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_message_over_a_duplex_stream() {
        let (mut a, mut b) = duplex(4096);
        write_message(&mut a, &WireMessage::LambdaDenom(28)).await.unwrap();
        let msg = read_message(&mut b).await.unwrap();
        matches!(msg, WireMessage::LambdaDenom(28));
    }

    #[tokio::test]
    async fn expect_rejects_a_mismatched_message() {
        let (mut a, mut b) = duplex(4096);
        write_message(&mut a, &WireMessage::Ack).await.unwrap();
        let result = expect(&mut b, "Thanks", |m| matches!(m, WireMessage::Thanks)).await;
        assert!(result.is_err());
    }
}
