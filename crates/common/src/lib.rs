//! Wire types and errors shared by `music-svc` crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
