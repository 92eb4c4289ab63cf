//! Google Compute Engine backend.
//!
//! [`GceClient`] implements [`ComputeApi`](warmpool_core::ComputeApi) over the
//! Compute Engine v1 REST API, plus the IAM v1 calls used to mint and remove
//! per-VM service accounts. Requests are authorized by a [`TokenSource`].

mod auth;
mod client;
mod wire;

pub use auth::{METADATA_TOKEN_URL, MetadataServerToken, StaticToken, TokenSource};
pub use client::{COMPUTE_API_BASE, GceClient, IAM_API_BASE};
