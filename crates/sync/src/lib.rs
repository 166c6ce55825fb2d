#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`SyncError`)
//! - [`config`]: Module configuration (`SyncConfig`, builder)
//! - [`lxd`]: Container metadata source (`MetadataClient` trait, `LxdClient`)
//! - [`extract`]: Desired address extraction (`DesiredAddresses`)
//! - [`neigh`]: Kernel gateway (`NeighbourTable` trait, `RtnetlinkTable`,
//!   `ProxyNeighbour`)
//! - [`reconcile`]: Three-step diff/apply (`Reconciler`, `ReconcileReport`)
//! - [`watch`]: Link state watcher (`LinkWatcher`)
//! - [`sync`]: Main orchestrator (`NeighSync`, `NeighSyncBuilder`)
//!
//! # Architecture
//!
//! ```text
//! RTNLGRP_LINK ──> LinkWatcher ──mpsc──> NeighSync
//!                                           |
//!                                     Reconciler.run()
//!                                      /           \
//!                              MetadataClient   NeighbourTable
//!                                 (LXD)           (rtnetlink)
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod lxd;
pub mod neigh;
pub mod reconcile;
pub mod sync;
pub mod watch;

// --- Public API Re-exports ---

// Orchestrator
pub use sync::{NeighSync, NeighSyncBuilder};

// Configuration
pub use config::{SyncConfig, SyncConfigBuilder};

// Error
pub use error::SyncError;

// Metadata source
pub use lxd::{EXTENSION_CONTAINER_FULL, LxdClient, MetadataClient};

// Extraction
pub use extract::DesiredAddresses;

// Kernel gateway
pub use neigh::{NeighbourTable, ProxyNeighbour, RtnetlinkTable};

// Reconciliation
pub use reconcile::{ReconcileReport, Reconciler};

// Link watching
pub use watch::LinkWatcher;
