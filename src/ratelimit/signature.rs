//! Caller signature resolution.

use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// The request fields that identify a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    /// Destination host the request was addressed to
    pub host: Option<String>,
    /// Address of the connected peer
    pub remote_ip: Option<IpAddr>,
}

impl RequestMetadata {
    /// Create metadata from a host and peer address.
    pub fn new(host: impl Into<String>, remote_ip: IpAddr) -> Self {
        Self {
            host: Some(host.into()),
            remote_ip: Some(remote_ip),
        }
    }
}

/// Derives the opaque key rate-limit state is scoped by.
pub trait SignatureResolver: Send + Sync {
    /// Resolve the signature for a request. Must be deterministic.
    fn resolve(&self, metadata: &RequestMetadata) -> String;
}

/// Hashes the destination host and the caller address with SHA-256.
///
/// Missing fields hash as empty strings, so callers without a known address
/// share one bucket per host. Distinct callers landing on the same digest is
/// not detected; at 256 bits this is treated as a residual risk.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostAddrResolver;

impl SignatureResolver for HostAddrResolver {
    fn resolve(&self, metadata: &RequestMetadata) -> String {
        let host = metadata.host.as_deref().unwrap_or_default();
        let ip = metadata
            .remote_ip
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(host.to_ascii_lowercase());
        hasher.update("|");
        hasher.update(ip);
        format!("{:x}", hasher.finalize())
    }
}
