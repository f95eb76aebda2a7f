//! Manifest exchange with the update server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   GET <url><device>?packages=..&group=..   ┌────────┐
//! │ ManifestRequest │ ─────────────────────────────────────────▶ │ server │
//! └─────────────────┘                                            └───┬────┘
//!                        managed=<0|1>,[{package,..},..]             │
//! ┌──────────────────┐ ◀────────────────────────────────────────────┘
//! │ ManifestResponse │   parse_manifest: shape errors abort,
//! └──────────────────┘   bad elements are skipped
//! ```
//!
//! The [`ManifestSource`] trait is the seam between the agent and the
//! transport; [`HttpManifestClient`] is the production implementation.

mod client;
mod parse;
mod request;

pub use client::{HostAllowList, HttpManifestClient, ManifestClientConfig, ManifestSource};
pub use parse::{parse_manifest, ManifestResponse};
pub use request::ManifestRequest;
