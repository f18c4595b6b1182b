//! # Bag Catalog
//!
//! Catalogs recorded sensor-log bag files into a metadata store.
//!
//! A scan walks a set of roots, fingerprints every candidate bag by content,
//! and reconciles each file against the catalog: new content is inserted,
//! moved content is relocated, already-cataloged content is skipped, and a
//! second copy of known content is rejected as a duplicate. Entries whose
//! file disappeared are flagged missing rather than deleted.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────┐
//! │  Discovery  │──▶│ Fingerprint  │──▶│ Reconciler │──▶│  SQLite  │
//! │ walk + glob │   │ sha256+parse │   │ (one lock) │   │ catalog  │
//! └─────────────┘   └──────────────┘   └────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! bagcat init                   # create database
//! bagcat scan                   # scan configured roots
//! bagcat scan ./new-drive       # add one directory, no missing-marking
//! bagcat list --missing         # what went away
//! bagcat purge-missing          # drop it for good
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`bag`] | Bag file reader and writer |
//! | [`fingerprint`] | Content id and metadata extraction |
//! | [`catalog`] | The catalog service and its write lock |
//! | [`reconcile`] | Per-file reconciliation |
//! | [`scan`] | Snapshot, dispatch and missing-marking |
//! | [`maintenance`] | Purge, prune, edit, remove, track refresh |
//! | [`geocode`] | Reverse geocoding of a bag's first fix |
//! | [`status`] | Status events for operators |
//! | [`sqlite_store`] | SQLite catalog backend |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod bag;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod geocode;
pub mod ingest;
pub mod maintenance;
pub mod migrate;
pub mod reconcile;
pub mod scan;
pub mod sqlite_store;
pub mod stats;
pub mod status;
