//! Repository layer of the Depot artifact engine.
//!
//! Everything between the resolution algorithms and the bytes on disk or on
//! the wire: layout path arithmetic, the origin-tracked local repository,
//! remote repository aggregation and mirror handling, update-check and
//! checksum policies, the connector abstraction with a file-system
//! implementation, and the installer/deployer pair.

pub mod checksum;
pub mod connector;
pub mod deploy;
pub mod generator;
pub mod install;
pub mod layout;
pub mod local;
pub mod offline;
pub mod remote;
pub mod tracking;
pub mod update;
pub mod versions;
