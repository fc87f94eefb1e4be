//! # cove-smb: SMB session layer
//!
//! This crate turns a callback-free, strictly single-threaded SMB
//! client library into an asynchronous, shareable session primitive.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   acquire(endpoint)   ┌──────────────┐
//! │  ContextPool  │ ────────────────────▶ │  SmbContext  │
//! │  (refcounts,  │                       │  (broker:    │
//! │   idle TTL)   │                       │   futures)   │
//! └───────────────┘                       └──────┬───────┘
//!                                                │ FIFO queue
//!                                         ┌──────▼───────┐
//!                                         │ driver thread│
//!                                         │ ShareClient  │
//!                                         │ (libsmb2 or  │
//!                                         │  mock)       │
//!                                         └──────────────┘
//! ```
//!
//! Every endpoint (`smb://…` URL identity) maps to at most one live
//! context; every context is owned by exactly one driver thread, which
//! is the only code allowed to touch the underlying client.

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod context;
mod driver;
pub mod endpoint;
pub mod error;
pub mod libsmb;
pub mod mock;
pub mod pool;

pub use client::{
    default_factory, ClientFactory, EntryKind, OpenFlags, RawDir, RawDirEntry, RawFd, RawStat,
    ShareClient,
};
pub use config::SmbConfig;
pub use context::SmbContext;
pub use endpoint::{AuthMode, Credentials, SmbEndpoint, DEFAULT_PORT};
pub use error::{ClientError, Result};
pub use mock::{MockClient, MockShare};
pub use pool::{ContextGuard, ContextPool};
