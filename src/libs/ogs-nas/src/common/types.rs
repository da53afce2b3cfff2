//! Common NAS types shared between 5GS and EPS
//!
//! Based on 3GPP TS 24.501 and TS 24.301

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{NasError, NasResult};

/// PLMN ID (MCC + MNC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlmnId {
    /// Mobile Country Code (3 digits)
    pub mcc: [u8; 3],
    /// Mobile Network Code (2 or 3 digits)
    pub mnc: [u8; 3],
    /// MNC length (2 or 3)
    pub mnc_len: u8,
}

impl PlmnId {
    pub fn new(mcc: [u8; 3], mnc: [u8; 3], mnc_len: u8) -> Self {
        Self { mcc, mnc, mnc_len }
    }

    /// Build a PLMN ID from decimal strings, e.g. `("001", "01")`.
    pub fn parse(mcc: &str, mnc: &str) -> NasResult<Self> {
        let mcc_digits = parse_digits(mcc)?;
        let mnc_digits = parse_digits(mnc)?;
        if mcc_digits.len() != 3 {
            return Err(NasError::InvalidDigits(format!("MCC must have 3 digits: {mcc}")));
        }
        if mnc_digits.len() != 2 && mnc_digits.len() != 3 {
            return Err(NasError::InvalidDigits(format!("MNC must have 2 or 3 digits: {mnc}")));
        }
        let mut plmn = Self {
            mcc: [mcc_digits[0], mcc_digits[1], mcc_digits[2]],
            mnc: [0; 3],
            mnc_len: mnc_digits.len() as u8,
        };
        plmn.mnc[..mnc_digits.len()].copy_from_slice(&mnc_digits);
        Ok(plmn)
    }

    /// Encode PLMN ID to bytes (3 bytes)
    pub fn encode(&self, buf: &mut BytesMut) {
        // Byte 0: MCC digit 2 | MCC digit 1
        buf.put_u8((self.mcc[1] << 4) | self.mcc[0]);
        // Byte 1: MNC digit 3 | MCC digit 3 (MNC digit 3 = 0xF if 2-digit MNC)
        let mnc3 = if self.mnc_len == 2 { 0x0F } else { self.mnc[2] };
        buf.put_u8((mnc3 << 4) | self.mcc[2]);
        // Byte 2: MNC digit 2 | MNC digit 1
        buf.put_u8((self.mnc[1] << 4) | self.mnc[0]);
    }

    /// Decode PLMN ID from bytes
    pub fn decode(buf: &mut Bytes) -> NasResult<Self> {
        if buf.remaining() < 3 {
            return Err(NasError::BufferTooShort { expected: 3, actual: buf.remaining() });
        }

        let b0 = buf.get_u8();
        let b1 = buf.get_u8();
        let b2 = buf.get_u8();

        let mcc = [b0 & 0x0F, (b0 >> 4) & 0x0F, b1 & 0x0F];
        let mnc3 = (b1 >> 4) & 0x0F;
        let mnc_len = if mnc3 == 0x0F { 2 } else { 3 };
        let mnc = [b2 & 0x0F, (b2 >> 4) & 0x0F, if mnc_len == 3 { mnc3 } else { 0 }];

        Ok(Self { mcc, mnc, mnc_len })
    }
}

impl fmt::Display for PlmnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in self.mcc {
            write!(f, "{d}")?;
        }
        write!(f, "-")?;
        for d in &self.mnc[..self.mnc_len as usize] {
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

/// Parse a decimal string into one digit per byte.
pub fn parse_digits(s: &str) -> NasResult<Vec<u8>> {
    s.chars()
        .map(|c| {
            c.to_digit(10)
                .map(|d| d as u8)
                .ok_or_else(|| NasError::InvalidDigits(s.to_string()))
        })
        .collect()
}

/// NAS security algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityAlgorithms {
    /// Ciphering algorithm (EEA)
    pub ciphering: u8,
    /// Integrity algorithm (EIA)
    pub integrity: u8,
}

impl SecurityAlgorithms {
    /// No ciphering (EEA0)
    pub const CIPHERING_NONE: u8 = 0;
    /// 128-EEA1 (SNOW 3G)
    pub const CIPHERING_128_EEA1: u8 = 1;
    /// 128-EEA2 (AES)
    pub const CIPHERING_128_EEA2: u8 = 2;
    /// 128-EEA3 (ZUC)
    pub const CIPHERING_128_EEA3: u8 = 3;

    /// No integrity (EIA0)
    pub const INTEGRITY_NONE: u8 = 0;
    /// 128-EIA1 (SNOW 3G)
    pub const INTEGRITY_128_EIA1: u8 = 1;
    /// 128-EIA2 (AES)
    pub const INTEGRITY_128_EIA2: u8 = 2;
    /// 128-EIA3 (ZUC)
    pub const INTEGRITY_128_EIA3: u8 = 3;

    pub fn new(ciphering: u8, integrity: u8) -> Self {
        Self {
            ciphering: ciphering & 0x0F,
            integrity: integrity & 0x0F,
        }
    }

    /// Encode to a single byte
    pub fn encode(&self) -> u8 {
        ((self.ciphering & 0x0F) << 4) | (self.integrity & 0x0F)
    }

    /// Decode from a single byte
    pub fn decode(byte: u8) -> Self {
        Self {
            ciphering: (byte >> 4) & 0x0F,
            integrity: byte & 0x0F,
        }
    }
}
