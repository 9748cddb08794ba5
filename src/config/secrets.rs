//! Secret handling utilities.
//!
//! The database URL may carry credentials for networked stores, so it is
//! held as a `SecretString` and only exposed at connect time.

pub use secrecy::{ExposeSecret, SecretString};
