//! Renderweld Compositor Bridge
//!
//! Drives the native out-of-process compositor worker over its standard
//! streams. Commands go in as JSON lines on stdin; responses come back on
//! stdout as length-prefixed binary messages multiplexed by correlation
//! nonce, so any number of commands can be in flight at once.
//!
//! - [`frame`] — incremental decoder for the framed output stream
//! - [`command`] — command envelopes and nonce allocation
//! - [`worker`] — one process: spawn, execute, finish, wait for exit
//! - [`registry`] — at most one worker per render job

pub mod command;
pub mod frame;
pub mod registry;
pub mod worker;

pub use command::{LOG_CHANNEL_NONCE, SHUTDOWN_SENTINEL};
pub use frame::{Frame, FrameDecoder, FRAME_PREAMBLE};
pub use registry::CompositorRegistry;
pub use worker::{CompositorWorker, WorkerConfig};
