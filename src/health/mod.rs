//! Breaker health maintenance.
//!
//! # Data Flow
//! ```text
//! Periodic timer (reconciler.rs)
//!     → For each configured host
//!     → OPEN past cooldown? CAS to HALF_OPEN (probe slot free)
//!     → Publish breaker state gauge
//! ```
//!
//! # Design Decisions
//! - Uses the same CAS transition as the request path; a lost race is harmless
//! - Correctness never depends on the sweep running

pub mod reconciler;

pub use reconciler::{ReconcileReport, Reconciler};
