//! Production queue transports.
//!
//! The trait and the in-memory transport live in `taskpipe-queue`; this module
//! adds the adapters that need a running backend.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueue;
