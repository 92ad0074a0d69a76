//! Result alias shared by the RAVA client crates.
//!
//! `rava-session` returns its `SessionError`, `TransportError` and
//! `StoreError` inside a rootcause `Report`; writing
//! `Result<T, StoreError>` here keeps trait signatures such as the
//! credential store's short.

use rootcause::Report;

/// `Result` whose error is a `Report` carrying context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
