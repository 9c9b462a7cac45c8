// Application layer: ledger operations expressed as atomic store updates.
// Presentation (message wording, command parsing) lives in the CLI.

pub mod config;
pub mod error;
pub mod service;

pub use config::*;
pub use error::*;
pub use service::*;
