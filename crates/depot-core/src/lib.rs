//! Core data types for the Depot artifact engine.
//!
//! This crate defines the model shared by the repository and resolver layers:
//! coordinate-addressed artifacts, dependencies with exclusions, repository
//! metadata, remote/local repository descriptions, the session carrying
//! configuration and pluggable selectors, the event surface, the
//! prioritized-component registry, and the sync-context locking contract.
//!
//! This crate performs no network or repository I/O.

pub mod artifact;
pub mod config;
pub mod dependency;
pub mod events;
pub mod metadata;
pub mod registry;
pub mod repository;
pub mod session;
pub mod sync;
pub mod version;
