mod backend;
mod locks;
mod memory;
mod retry;
mod sqlite;
mod store;

pub use backend::*;
pub use locks::*;
pub use memory::*;
pub use retry::*;
pub use sqlite::*;
pub use store::*;

/// SQL migration for the key-value table and its revision counter
pub const MIGRATION_001_KV_RECORDS: &str = include_str!("migrations/001_kv_records.sql");
