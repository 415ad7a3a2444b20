//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown
//!
//! Shutdown (shutdown.rs):
//!     trigger → admin server drains → watcher loop exits
//!     → pool flushes batches and waits for in-flight calls → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accepting, drain, close
//! - One broadcast signal shared by every long-running task

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
