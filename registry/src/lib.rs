//! # modelx registry
//!
//! The server side of modelx: a content-addressed [`RegistryStore`] layered
//! over a storage provider, blob garbage collection, and the HTTP service
//! dispatching the registry protocol to the store.

mod api;
mod config;
mod gc;
mod handlers;
mod store;

pub use api::{router, RegistryBuilder, MAX_MANIFEST_BYTES};
pub use config::Options;
pub use gc::{gc_all, gc_repository};
pub use store::{blob_key, index_key, manifest_key, RegistryStore};
