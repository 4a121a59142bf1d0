// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook payload signatures.
//!
//! Signatures arrive as `<alg>=<hex digest>` where the digest is the HMAC of
//! the raw request body keyed by the repository secret. `sha1` and `sha256`
//! are accepted. Comparison is constant time.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Signature verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Header is not `<alg>=<hex>`.
    #[error("malformed signature header")]
    Malformed,

    /// Algorithm other than sha1 or sha256.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Digest is not valid hex.
    #[error("signature digest is not valid hex")]
    InvalidHex,

    /// The secret cannot key the MAC.
    #[error("invalid signing key")]
    InvalidKey,

    /// Digest does not match the payload.
    #[error("signature mismatch")]
    Mismatch,
}

/// Supported HMAC digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// HMAC-SHA1 (`X-Hub-Signature`).
    Sha1,
    /// HMAC-SHA256 (`X-Hub-Signature-256`).
    Sha256,
}

impl SignatureAlgorithm {
    /// Prefix used in signature headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1",
            SignatureAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(SignatureAlgorithm::Sha1),
            "sha256" => Ok(SignatureAlgorithm::Sha256),
            other => Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Verify `header` (`<alg>=<hex>`) against `payload` signed with `secret`.
pub fn verify_signature(payload: &[u8], secret: &[u8], header: &str) -> Result<(), SignatureError> {
    let (alg, digest) = header
        .trim()
        .split_once('=')
        .ok_or(SignatureError::Malformed)?;
    let alg: SignatureAlgorithm = alg.parse()?;
    let expected = hex::decode(digest).map_err(|_| SignatureError::InvalidHex)?;

    let verified = match alg {
        SignatureAlgorithm::Sha1 => {
            let mut mac = HmacSha1::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
            mac.update(payload);
            mac.verify_slice(&expected)
        }
        SignatureAlgorithm::Sha256 => {
            let mut mac =
                HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
            mac.update(payload);
            mac.verify_slice(&expected)
        }
    };
    verified.map_err(|_| SignatureError::Mismatch)
}

/// Sign `payload`, producing a header value in the `<alg>=<hex>` form.
pub fn sign(
    payload: &[u8],
    secret: &[u8],
    alg: SignatureAlgorithm,
) -> Result<String, SignatureError> {
    let digest = match alg {
        SignatureAlgorithm::Sha1 => {
            let mut mac = HmacSha1::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        SignatureAlgorithm::Sha256 => {
            let mut mac =
                HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(format!("{}={}", alg, hex::encode(digest)))
}
