//! # bag-catalog core
//!
//! Shared logic for bag-catalog: catalog data models, the store
//! abstraction with an in-memory implementation, and GPS track merging.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! runtime-specific dependencies.

pub mod models;
pub mod store;
pub mod track;
