//! Request handlers for the sync protocol.

mod download;
mod upload;

pub use download::*;
pub use upload::*;
