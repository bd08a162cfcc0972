//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Supervisor process (supervisor.rs):
//!     Spawn N workers → wait → restart crashed workers after a delay
//!
//! Worker / single process:
//!     Bind listener → serve → shutdown.rs broadcast → drain → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Workers share nothing; the supervisor only multiplies the pipeline
//! - On shutdown the supervisor stops restarting before it kills workers

pub mod shutdown;
pub mod signals;
pub mod supervisor;

pub use shutdown::Shutdown;
pub use supervisor::Supervisor;
