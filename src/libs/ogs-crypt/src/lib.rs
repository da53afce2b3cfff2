//! NextGCore Cryptographic Library
//!
//! Key derivation functions used by the EPS core.

pub mod kdf; // Key Derivation Functions

pub use kdf::{ogs_kdf_nas_eps, KdfError, OGS_KDF_NAS_ENC_ALG, OGS_KDF_NAS_INT_ALG};
