//! Core types shared across the RAVA Protocol client crates.
//!
//! This crate provides the `Result` alias used for error propagation and
//! the strongly-typed identifiers for backend records.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{InstitutionId, ParseIdError, UserId};
