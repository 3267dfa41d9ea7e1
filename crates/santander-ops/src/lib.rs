//! Operation descriptors and the wire contract shared by the file manager and
//! its privileged helper.
//!
//! The application never mutates protected paths itself. It builds an
//! [`OperationDescriptor`], ships it over a local channel wrapped in a
//! [`RequestEnvelope`], and receives exactly one [`ExecutionResult`] back in a
//! [`ResponseEnvelope`]. Everything in this crate is plain data: no live
//! handles cross the process boundary.
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, unused)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

mod base64_bytes;
pub mod codec;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod rendition;
pub mod result;

pub use codec::{
    KNOWN_OPERATION_TAGS, MAX_FRAME_LENGTH, MIN_SUPPORTED_SCHEMA_VERSION, SCHEMA_VERSION, decode,
    decode_request, decode_response, encode, encode_request, encode_response, frame_codec,
    peek_correlation_id,
};
pub use descriptor::{OperationDescriptor, OperationKind};
pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use error::{DecodeError, EncodeError};
pub use rendition::{RenditionContent, RenditionRef, RenditionType};
pub use result::{ErrorKind, ExecutionResult};
