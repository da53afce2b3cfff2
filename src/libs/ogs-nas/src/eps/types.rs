//! EPS-specific NAS types
//!
//! Based on 3GPP TS 24.301 and TS 24.008

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::common::types::{parse_digits, PlmnId};
use crate::error::{NasError, NasResult};

/// EMM cause values (TS 24.301 Section 9.9.3.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EmmCause {
    ImsiUnknownInHss = 2,
    IllegalUe = 3,
    ImeiNotAccepted = 5,
    IllegalMe = 6,
    EpsServicesNotAllowed = 7,
    EpsAndNonEpsServicesNotAllowed = 8,
    UeIdentityCannotBeDerived = 9,
    ImplicitlyDetached = 10,
    PlmnNotAllowed = 11,
    TrackingAreaNotAllowed = 12,
    RoamingNotAllowedInTa = 13,
    EpsServicesNotAllowedInPlmn = 14,
    NoSuitableCells = 15,
    MscTemporarilyNotReachable = 16,
    NetworkFailure = 17,
    CsDomainNotAvailable = 18,
    EsmFailure = 19,
    MacFailure = 20,
    SynchFailure = 21,
    Congestion = 22,
    UeSecurityCapabilitiesMismatch = 23,
    SecurityModeRejected = 24,
    NotAuthorizedForCsg = 25,
    NonEpsAuthenticationUnacceptable = 26,
    RequestedServiceOptionNotAuthorized = 35,
    CsServiceTemporarilyNotAvailable = 39,
    NoEpsBearerContextActivated = 40,
    SevereNetworkFailure = 42,
    SemanticallyIncorrectMessage = 95,
    InvalidMandatoryInformation = 96,
    MessageTypeNonExistent = 97,
    MessageTypeNotCompatible = 98,
    InformationElementNonExistent = 99,
    ConditionalIeError = 100,
    MessageNotCompatible = 101,
    ProtocolErrorUnspecified = 111,
}

impl TryFrom<u8> for EmmCause {
    type Error = NasError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::ImsiUnknownInHss),
            3 => Ok(Self::IllegalUe),
            5 => Ok(Self::ImeiNotAccepted),
            6 => Ok(Self::IllegalMe),
            7 => Ok(Self::EpsServicesNotAllowed),
            8 => Ok(Self::EpsAndNonEpsServicesNotAllowed),
            9 => Ok(Self::UeIdentityCannotBeDerived),
            10 => Ok(Self::ImplicitlyDetached),
            11 => Ok(Self::PlmnNotAllowed),
            12 => Ok(Self::TrackingAreaNotAllowed),
            13 => Ok(Self::RoamingNotAllowedInTa),
            14 => Ok(Self::EpsServicesNotAllowedInPlmn),
            15 => Ok(Self::NoSuitableCells),
            16 => Ok(Self::MscTemporarilyNotReachable),
            17 => Ok(Self::NetworkFailure),
            18 => Ok(Self::CsDomainNotAvailable),
            19 => Ok(Self::EsmFailure),
            20 => Ok(Self::MacFailure),
            21 => Ok(Self::SynchFailure),
            22 => Ok(Self::Congestion),
            23 => Ok(Self::UeSecurityCapabilitiesMismatch),
            24 => Ok(Self::SecurityModeRejected),
            25 => Ok(Self::NotAuthorizedForCsg),
            26 => Ok(Self::NonEpsAuthenticationUnacceptable),
            35 => Ok(Self::RequestedServiceOptionNotAuthorized),
            39 => Ok(Self::CsServiceTemporarilyNotAvailable),
            40 => Ok(Self::NoEpsBearerContextActivated),
            42 => Ok(Self::SevereNetworkFailure),
            95 => Ok(Self::SemanticallyIncorrectMessage),
            96 => Ok(Self::InvalidMandatoryInformation),
            97 => Ok(Self::MessageTypeNonExistent),
            98 => Ok(Self::MessageTypeNotCompatible),
            99 => Ok(Self::InformationElementNonExistent),
            100 => Ok(Self::ConditionalIeError),
            101 => Ok(Self::MessageNotCompatible),
            111 => Ok(Self::ProtocolErrorUnspecified),
            _ => Err(NasError::DecodingError(format!("Unknown EMM cause: {value}"))),
        }
    }
}

/// Identity type 2 (TS 24.301 Section 9.9.3.20)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdentityType2 {
    Imsi = 1,
    Imei = 2,
    Imeisv = 3,
    Tmsi = 4,
}

impl TryFrom<u8> for IdentityType2 {
    type Error = NasError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & 0x07 {
            1 => Ok(Self::Imsi),
            2 => Ok(Self::Imei),
            3 => Ok(Self::Imeisv),
            4 => Ok(Self::Tmsi),
            v => Err(NasError::InvalidMobileIdentityType(v)),
        }
    }
}

fn fmt_digits(digits: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for d in digits {
        write!(f, "{d}")?;
    }
    Ok(())
}

/// IMSI (up to 15 digits)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Imsi {
    pub digits: Vec<u8>,
}

impl Imsi {
    pub fn parse(s: &str) -> NasResult<Self> {
        let digits = parse_digits(s)?;
        if !(6..=15).contains(&digits.len()) {
            return Err(NasError::InvalidDigits(format!("IMSI length {}", digits.len())));
        }
        Ok(Self { digits })
    }

    /// Home PLMN of the subscriber given the MNC length in use.
    pub fn plmn_id(&self, mnc_len: u8) -> PlmnId {
        let mut mnc = [0u8; 3];
        let n = mnc_len as usize;
        mnc[..n].copy_from_slice(&self.digits[3..3 + n]);
        PlmnId::new([self.digits[0], self.digits[1], self.digits[2]], mnc, mnc_len)
    }
}

impl fmt::Display for Imsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_digits(&self.digits, f)
    }
}

/// Length of the Type Allocation Code prefix
pub const TAC_LEN: usize = 8;
/// Length of TAC + serial number
pub const TAC_SNR_LEN: usize = 14;

/// IMEI (14 digits, or 15 with the check digit)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Imei {
    pub digits: Vec<u8>,
}

impl Imei {
    pub fn parse(s: &str) -> NasResult<Self> {
        let digits = parse_digits(s)?;
        if digits.len() != 14 && digits.len() != 15 {
            return Err(NasError::InvalidDigits(format!("IMEI length {}", digits.len())));
        }
        Ok(Self { digits })
    }

    pub fn tac(&self) -> &[u8] {
        &self.digits[..TAC_LEN]
    }

    pub fn tac_snr(&self) -> &[u8] {
        &self.digits[..TAC_SNR_LEN]
    }
}

impl fmt::Display for Imei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_digits(&self.digits, f)
    }
}

/// IMEISV (TAC + SNR + 2-digit software version)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Imeisv {
    pub digits: Vec<u8>,
}

impl Imeisv {
    pub fn parse(s: &str) -> NasResult<Self> {
        let digits = parse_digits(s)?;
        if digits.len() != 16 {
            return Err(NasError::InvalidDigits(format!("IMEISV length {}", digits.len())));
        }
        Ok(Self { digits })
    }

    pub fn tac(&self) -> &[u8] {
        &self.digits[..TAC_LEN]
    }

    pub fn tac_snr(&self) -> &[u8] {
        &self.digits[..TAC_SNR_LEN]
    }

    pub fn svn(&self) -> &[u8] {
        &self.digits[TAC_SNR_LEN..]
    }
}

impl fmt::Display for Imeisv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_digits(&self.digits, f)
    }
}

/// UE network capability (TS 24.301 Section 9.9.3.34)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UeNetworkCapability {
    /// EPS encryption algorithms, EEA0 in bit 8
    pub eea: u8,
    /// EPS integrity algorithms, EIA0 in bit 8
    pub eia: u8,
    /// UMTS encryption algorithms
    pub uea: u8,
    pub ucs2: bool,
    /// UMTS integrity algorithms
    pub uia: u8,
    /// Octets 5-6 were present
    pub umts_present: bool,
    pub additional: Vec<u8>,
}

impl UeNetworkCapability {
    pub fn new(eea: u8, eia: u8) -> Self {
        Self { eea, eia, ..Default::default() }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut length = 2;
        if self.umts_present {
            length += 2;
        }
        length += self.additional.len();
        buf.put_u8(length as u8);
        buf.put_u8(self.eea);
        buf.put_u8(self.eia);
        if self.umts_present {
            buf.put_u8(self.uea);
            buf.put_u8(((self.ucs2 as u8) << 7) | (self.uia & 0x7F));
        }
        buf.put_slice(&self.additional);
    }

    pub fn decode(buf: &mut Bytes) -> NasResult<Self> {
        if buf.remaining() < 3 {
            return Err(NasError::BufferTooShort { expected: 3, actual: buf.remaining() });
        }

        let length = buf.get_u8() as usize;
        if length < 2 || buf.remaining() < length {
            return Err(NasError::InvalidIeLength { expected: length.max(2), actual: buf.remaining() });
        }

        let mut cap = Self::new(buf.get_u8(), buf.get_u8());
        if length >= 4 {
            cap.uea = buf.get_u8();
            let octet = buf.get_u8();
            cap.ucs2 = octet & 0x80 != 0;
            cap.uia = octet & 0x7F;
            cap.umts_present = true;
            cap.additional = buf.copy_to_bytes(length - 4).to_vec();
        } else {
            cap.additional = buf.copy_to_bytes(length - 2).to_vec();
        }
        Ok(cap)
    }
}

/// MS network capability, GPRS ciphering subset (TS 24.008 Section 10.5.5.12)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsNetworkCapability {
    /// GEA/1 support
    pub gea1: u8,
    /// GEA/2 .. GEA/7 support bits
    pub egea: u8,
}

impl MsNetworkCapability {
    pub fn decode(buf: &mut Bytes) -> NasResult<Self> {
        if buf.remaining() < 2 {
            return Err(NasError::BufferTooShort { expected: 2, actual: buf.remaining() });
        }
        let length = buf.get_u8() as usize;
        if length < 1 || buf.remaining() < length {
            return Err(NasError::InvalidIeLength { expected: length.max(1), actual: buf.remaining() });
        }
        let octet3 = buf.get_u8();
        let egea = if length >= 2 { (buf.get_u8() >> 1) & 0x3F } else { 0 };
        if length > 2 {
            buf.advance(length - 2);
        }
        Ok(Self { gea1: (octet3 >> 7) & 0x01, egea })
    }

    /// GEA bits replayed in SECURITY MODE COMMAND
    pub fn replayed_gea(&self) -> u8 {
        if self.gea1 | self.egea != 0 {
            (self.gea1 << 6) | self.egea
        } else {
            0
        }
    }
}

/// UE additional security capability (TS 24.301 Section 9.9.3.53)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UeAdditionalSecurityCapability {
    /// 5GS encryption algorithms
    pub ea: u16,
    /// 5GS integrity algorithms
    pub ia: u16,
}

impl UeAdditionalSecurityCapability {
    pub fn decode(buf: &mut Bytes) -> NasResult<Self> {
        if buf.remaining() < 5 {
            return Err(NasError::BufferTooShort { expected: 5, actual: buf.remaining() });
        }
        let length = buf.get_u8() as usize;
        if length != 4 {
            return Err(NasError::InvalidIeLength { expected: 4, actual: length });
        }
        Ok(Self { ea: buf.get_u16(), ia: buf.get_u16() })
    }
}
