//! Key Derivation Functions
//!
//! Implements the EPS key derivations of 3GPP TS 33.401 Annex A on top of
//! the generic KDF of TS 33.220 clause B.2.0.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const OGS_KEY_LEN: usize = 16;
pub const OGS_SHA256_DIGEST_SIZE: usize = 32;

const FC_FOR_EPS_ALGORITHM_KEY_DERIVATION: u8 = 0x15;

// Algorithm Type Distinguishers
pub const OGS_KDF_NAS_ENC_ALG: u8 = 0x01;
pub const OGS_KDF_NAS_INT_ALG: u8 = 0x02;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KdfError {
    #[error("Invalid KDF key length: {0}")]
    InvalidKeyLength(usize),
}

/// Generic KDF (TS 33.220 B.2.0): HMAC-SHA-256 over FC || P0 || L0 || ...
fn ogs_kdf_common(
    key: &[u8],
    fc: u8,
    params: &[&[u8]],
) -> Result<[u8; OGS_SHA256_DIGEST_SIZE], KdfError> {
    let mut s = Vec::with_capacity(1 + params.iter().map(|p| p.len() + 2).sum::<usize>());
    s.push(fc);
    for param in params.iter().filter(|p| !p.is_empty()) {
        s.extend_from_slice(param);
        s.extend_from_slice(&(param.len() as u16).to_be_bytes());
    }

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| KdfError::InvalidKeyLength(key.len()))?;
    mac.update(&s);

    let mut output = [0u8; OGS_SHA256_DIGEST_SIZE];
    output.copy_from_slice(&mac.finalize().into_bytes());
    Ok(output)
}

/// TS33.401 Annex A.7: Algorithm key derivation functions (EPS)
///
/// Derives KNASint or KNASenc from KASME. Returns the lower 16 bytes of the
/// 32-byte output.
pub fn ogs_kdf_nas_eps(
    algorithm_type_distinguisher: u8,
    algorithm_identity: u8,
    kasme: &[u8; OGS_SHA256_DIGEST_SIZE],
) -> Result<[u8; OGS_KEY_LEN], KdfError> {
    let output = ogs_kdf_common(
        kasme,
        FC_FOR_EPS_ALGORITHM_KEY_DERIVATION,
        &[&[algorithm_type_distinguisher], &[algorithm_identity]],
    )?;

    let mut knas = [0u8; OGS_KEY_LEN];
    knas.copy_from_slice(&output[OGS_KEY_LEN..]);
    Ok(knas)
}
