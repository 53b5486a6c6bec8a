//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Accept loop failure (not a per-peer error):
//!     → backoff.rs (exponential delay with jitter)
//!     → retry accept, unless shutdown begins first
//! ```

pub mod backoff;
