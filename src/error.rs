//! Crate-wide error taxonomy.
//!
//! Mirrors the six error kinds from the design: `ManifestError` and
//! `ProxyError` are fatal to the collaborator that raised them,
//! `TransportError`/`DecodeError` are per-segment and recoverable by the
//! scheduler, `StateError` is recovered by resetting ABR state, and
//! `BufferOverflow` is a logic-bug class handled at its call site rather
//! than threaded through `Result`.

use thiserror::Error;

use crate::abr::StateError;
use crate::catalog::ManifestError;
use crate::downloader::TransportError;
use crate::pep::ProxyError;

pub type Result<T> = std::result::Result<T, AbrError>;

#[derive(Debug, Error)]
pub enum AbrError {
    #[error("manifest error")]
    Manifest(#[from] ManifestError),

    #[error("transport error")]
    Transport(#[from] TransportError),

    #[error("ABR state error")]
    State(#[from] StateError),

    #[error("PEP proxy error")]
    Proxy(#[from] ProxyError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("error writing report")]
    Report(#[from] serde_json::Error),
}
