//! Terminal front end for the reconciliation engine
//!
//! The `reconcile` crate plans and converges; this module shows plans,
//! asks for confirmation and reports progress and results.

pub mod differ;
pub mod executor;

pub use differ::display_plan;
pub use executor::{BarProgress, confirm_proceed, print_failures, print_summary};
