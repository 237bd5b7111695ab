//! batchwire-http — HTTP delivery for the batchwire engine.
//!
//! Implements [`batchwire_core::BatchTransport`] over `reqwest`: the raw
//! multipart POST to the `$batch` endpoint, and the single-resource GET used
//! for post-update refreshes.

pub mod client;

pub use client::{HttpBatchTransport, HttpTransportConfig};
