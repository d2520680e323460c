#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # Provena Telemetry
//!
//! Observability glue shared by the L1 and L2 node binaries: a single
//! initialization routine for global structured logging.

/// The initialization routine for global structured logging.
pub mod init;
