//! Request identity and authentication.

mod middleware;

pub use middleware::SyncIdentity;
