//! # modelx data model
//!
//! The shared vocabulary of the modelx registry: content [`Digest`]s,
//! [`Descriptor`]s, the [`Manifest`] and [`Index`] documents exchanged over
//! the wire, pre-signed [`BlobLocation`]s, and the JSON error envelope every
//! non-2xx response carries.
//!
//! Everything here is plain data. The registry server, the storage backends
//! and the client all build on this crate and nothing in it performs I/O
//! beyond digesting a reader.

mod descriptor;
mod digest;
mod error;
mod location;

pub use descriptor::{
    annotations_query, Annotations, Descriptor, Index, Manifest, DEFAULT_SCHEMA_VERSION,
    MEDIA_TYPE_MODEL_CONFIG, MEDIA_TYPE_MODEL_DIRECTORY, MEDIA_TYPE_MODEL_FILE,
    MEDIA_TYPE_MODEL_INDEX, MEDIA_TYPE_MODEL_MANIFEST,
};
pub use digest::{Digest, DigestError, Digester};
pub use error::{ErrorCode, ErrorInfo};
pub use location::{BlobLocation, PresignedPart, Purpose};
