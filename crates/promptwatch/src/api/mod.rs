//! HTTP plumbing for [`ChatClient`](crate::ChatClient).
//!
//! - [`streaming`]: SSE decoding into a pull-based fragment stream
//! - [`retry`]: exponential backoff for transient failures

pub mod retry;
pub mod streaming;
