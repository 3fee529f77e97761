//! Common identifiers and naming rules for certpilot
//!
//! # Module Organization
//!
//! - [`ids`]: Type-safe identifiers (`Domain`, `ObjectKey`)
//! - [`labels`]: Well-known label, annotation and data keys
//! - [`names`]: Domain syntax checks and record name construction

pub mod ids;
pub mod labels;
pub mod names;

pub use ids::{Domain, ObjectKey};
