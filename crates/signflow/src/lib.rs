//! Signature lifecycle orchestration for external e-signature providers.
//!
//! The [`signing`] module holds the reconciliation core: provider strategies and
//! their factory, the retry policy wrapping outbound calls, the orchestrator that
//! owns the document status state machine, and the webhook reconciler that feeds
//! the same state machine from provider pushes.

pub mod config;
pub mod error;
pub mod signing;
pub mod telemetry;
