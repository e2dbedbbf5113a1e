//! relion-jobmail collector daemon
//!
//! This crate provides the collector-side pipeline:
//! - `queue` - Durable, actor-owned event queue (newline-delimited JSON file)
//! - `server` - TCP ingress listener, one notice per connection
//! - `scheduler` - Fixed-interval drain, digest and dispatch cycle
//! - `dispatch` - Hands rendered digests to a mail transport
//! - `config` - TOML configuration passed into every component
//! - `client` - Sending side of the notice protocol
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      jobmaild daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  IngressServer  │────▶│        QueueActor           │   │
//! │  │     (TCP)       │     │   (sole owner of the file)  │   │
//! │  └────────┬────────┘     └──────────────▲──────────────┘   │
//! │           │ connections                 │ DrainAll          │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌──────────────┴──────────────┐   │
//! │  │ConnectionHandler│     │      DigestScheduler        │   │
//! │  │   (per peer)    │     │ build digest ─▶ DispatchSink│   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod client;
pub mod config;
pub mod dispatch;
pub mod queue;
pub mod scheduler;
pub mod server;
