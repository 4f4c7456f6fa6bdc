//! Durable session records.
//!
//! Every session the gateway should bring back after a restart is stored as
//! one entry of a single JSON array document. All mutations go through one
//! [`StoreWriter`] task so concurrent lifecycle events cannot overwrite each
//! other's changes.

pub mod error;
pub mod record;
pub mod store;
pub mod writer;

pub use {
    error::StoreError,
    record::{RecordSet, SessionRecord},
    store::SessionStore,
    writer::{StoreHandle, StoreWriter},
};
