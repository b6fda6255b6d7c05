//! Core types and error definitions for the Ensemble coordination engine.
//!
//! This crate provides the vocabulary shared by the orchestrator and its
//! transport wrappers: the error taxonomy, the complexity tiers that size an
//! execution plan, and the capability tags used to pick specialist workers.
//!
//! # Main types
//!
//! - [`EnsembleError`]: Unified error enum for all coordination failures.
//! - [`EnsembleResult`]: Convenience alias for `Result<T, EnsembleError>`.
//! - [`Tier`]: Request complexity (simple, moderate, complex, enterprise).
//! - [`TierParams`]: Plan-size bounds attached to a tier.
//! - [`CapabilityTag`]: Topic a specialist worker covers.

/// Capability tags and request tokenization.
pub mod capability;
/// Error taxonomy.
pub mod error;
/// Complexity tiers and their parameter table.
pub mod tier;

pub use capability::CapabilityTag;
pub use error::{EnsembleError, EnsembleResult};
pub use tier::{Tier, TierParams};
