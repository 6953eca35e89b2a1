//! Codecast relay - Room registry and WebSocket relay
//!
//! This crate provides the server side of codecast:
//! - `config` - Relay configuration (TOML file + environment overrides)
//! - `registry` - Room registry actor owning all membership state
//! - `server` - WebSocket server and per-connection handlers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      codecastd                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   RelayServer   │────▶│       RegistryActor         │   │
//! │  │   (WebSocket)   │     │  (rooms + member outboxes)  │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           ▼                             ▼ try_send          │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│◀────│   Outbox (bounded mpsc)     │   │
//! │  │ (per socket)    │     │   one per connection        │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]` outside
//! of tests.

pub mod config;
pub mod registry;
pub mod server;

pub use config::{ConfigError, RelayConfig};
pub use registry::{spawn_registry, RegistryHandle};
pub use server::{RelayServer, ServerError};
