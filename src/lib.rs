//! # syncr - version-controlled project-tree synchronizer
//!
//! syncr keeps large project trees (art assets, game content, build outputs)
//! in sync between peer workstations that share a passive network mount. It
//! has no server component: all coordination happens through files on the
//! shared mount itself.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use syncr::config::Config;
//! use syncr::engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(&Config::default_path()?)?;
//!     let result = engine::push(&config, "my-project", "nightly build", None, None, None).await?;
//!     println!("pushed {} files", result.files_added + result.files_modified);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod catalog;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod hash;
pub mod ignore;
pub mod lock;
pub mod logging;
pub mod scanner;
pub mod store;
pub mod validation;

// Re-export commonly used types and functions
pub use catalog::{Branch, Catalog, FileEntry, FileLock, Project, Snapshot};
pub use diff::{Conflict, Diff, ManifestEntry, Resolution};
pub use error::SyncError;
pub use store::ObjectStore;

// vim: ts=4
