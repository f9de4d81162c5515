//! bks-remote
//!
//! Remote Gateway: every network call to the external booking service goes
//! through [`RemoteGateway`]. Callers never see a transport error on the fetch
//! path and never see a panic on the create path.
//!
//! This crate does not touch the local store; the reconciler and push worker
//! hand gateway results to `bks-db`.

pub mod envelope;
pub mod gateway;
pub mod http;

pub use envelope::{normalize_body, normalize_collection, Envelope, MAX_TEXT_DEPTH};
pub use gateway::{GatewayError, PushResult, RemoteGateway};
pub use http::HttpGateway;
