//! Database module for PostgreSQL persistence.

mod pool;
mod sync_records;

pub use pool::*;
pub use sync_records::*;
