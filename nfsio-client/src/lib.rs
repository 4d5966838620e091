//! nfsio Client Library
//!
//! The primitive call surface a mount context is built on: one `NfsClient`
//! per session, created through a `Connector`. Calls report signed statuses
//! and hand results back through out-parameters, the way NFS client
//! libraries do. `MemoryServer` provides an in-process implementation;
//! with the `libnfs` feature, `LibnfsConnector` talks to real servers
//! through the system libnfs.

mod client;
#[cfg(feature = "libnfs")]
pub mod libnfs;
pub mod memory;
pub mod protocol;

pub use client::*;
pub use memory::{MemoryClient, MemoryDir, MemoryFile, MemoryServer, ServerStats};
pub use protocol::{NfsDirent, NfsStat64, Primitive};

#[cfg(feature = "libnfs")]
pub use libnfs::{LibnfsClient, LibnfsConnector, LibnfsDir, LibnfsFile};

// Re-export common types for convenience
pub use nfsio_common::{NfsError, NfsUrl};
