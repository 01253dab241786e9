#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

//! Log output for the workspace's tests.
//!
//! The proxy that embeds the baggage middleware owns the process-wide
//! subscriber; these crates only emit events through `tracing`.

pub mod test;
