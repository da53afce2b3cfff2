//! NAS error types

use thiserror::Error;

/// NAS error type
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NasError {
    /// Buffer too short for decoding
    #[error("Buffer too short: expected {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    /// Invalid IE length
    #[error("Invalid IE length: expected {expected}, got {actual}")]
    InvalidIeLength { expected: usize, actual: usize },

    /// Invalid mobile identity type
    #[error("Invalid mobile identity type: {0}")]
    InvalidMobileIdentityType(u8),

    /// Malformed decimal identity (IMSI, IMEI, MCC/MNC)
    #[error("Invalid digits: {0}")]
    InvalidDigits(String),

    /// Decoding error
    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// NAS result type
pub type NasResult<T> = Result<T, NasError>;
