//! Command serialization for the compositor's input stream.
//!
//! Commands travel caller → worker over stdin, one JSON object per line:
//! `{"type": <kind>, "params": {...params, "nonce": "<token>"}}`. The
//! nonce is echoed back in the response header so concurrent commands can
//! be multiplexed over the single output stream.

use std::sync::atomic::{AtomicU64, Ordering};

use renderweld_common::WeldResult;
use serde::Serialize;
use serde_json::{Map, Value};

/// Literal line telling the worker that no further commands will be sent.
pub const SHUTDOWN_SENTINEL: &str = "EOF";

/// Reserved nonce for out-of-band log messages from the worker. Payloads on
/// this channel are diagnostic text, never responses to a command.
pub const LOG_CHANNEL_NONCE: u64 = 0;

/// Allocates correlation nonces, unique for one worker's lifetime.
///
/// Starts at 1; [`LOG_CHANNEL_NONCE`] is never handed out.
#[derive(Debug)]
pub struct NonceCounter(AtomicU64);

impl NonceCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(LOG_CHANNEL_NONCE + 1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for NonceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// One serialized command envelope.
#[derive(Debug, Serialize)]
pub struct CommandEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    params: Map<String, Value>,
}

impl<'a> CommandEnvelope<'a> {
    /// Build an envelope for `kind`, folding the nonce into the params
    /// object the way the worker expects it.
    pub fn new(kind: &'a str, mut params: Map<String, Value>, nonce: u64) -> Self {
        params.insert("nonce".to_string(), Value::String(nonce.to_string()));
        Self { kind, params }
    }

    /// Render the envelope as one newline-terminated wire line.
    pub fn to_line(&self) -> WeldResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
