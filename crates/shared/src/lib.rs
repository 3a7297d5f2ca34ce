//! TNS Shared Types and Utilities
//!
//! Data model rows, availability enums and database plumbing shared by the
//! presence service and its tooling.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
