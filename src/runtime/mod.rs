//! # Runtime
//!
//! The reload loop and its failure policy.

pub mod error_policy;
pub mod reload_loop;
