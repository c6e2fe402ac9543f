//! edge-state: persistent profile store for edgecli.
//!
//! Backed by [redb](https://docs.rs/redb). Server and client profiles live
//! in separate tables keyed by profile name, values JSON-encoded.
//!
//! The `ProfileStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared between the CLI and supervisor tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use store::ProfileStore;
