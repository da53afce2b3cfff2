//! MME NAS Configuration
//!
//! Timer durations, retransmission limits, algorithm preference lists and
//! subscriber admission policy, read from the `mme:` section of the YAML
//! configuration file.

use std::fmt;
use std::path::Path;

use ogs_nas::common::types::{parse_digits, PlmnId};
use ogs_nas::eps::{Imsi, TAC_LEN, TAC_SNR_LEN};
use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::context::{MAX_EPS_AUTH_VECTORS, OGS_MAX_NUM_OF_ALGORITHM};
use crate::emm_proc::ProcedureKind;
use crate::timer::TimerConfig;

/// Highest EEA/EIA algorithm identifier
const MAX_ALGORITHM_ID: u8 = 7;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid blocked IMEI entry '{0}'")]
    InvalidImei(String),

    #[error("Invalid PLMN {mcc}-{mnc}")]
    InvalidPlmn { mcc: String, mnc: String },

    #[error("{field}: {len} entries exceed the maximum of {OGS_MAX_NUM_OF_ALGORITHM}")]
    TooManyAlgorithms { field: &'static str, len: usize },

    #[error("{field}: unknown algorithm {value}")]
    InvalidAlgorithm { field: &'static str, value: u8 },

    #[error("{field} must be at least 1")]
    InvalidMaxCount { field: &'static str },

    #[error("auth_vectors_per_request must be in 1..={MAX_EPS_AUTH_VECTORS}, got {0}")]
    InvalidVectorCount(u8),
}

// ============================================================================
// Admission policy entries
// ============================================================================

/// Blocked equipment: a TAC (8 digits) or a full IMEI (14/15 digits)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct BlockedImei {
    digits: Vec<u8>,
}

impl BlockedImei {
    /// Whether `imei` (IMEI or IMEISV digits) falls under this entry.
    pub fn matches(&self, imei: &[u8]) -> bool {
        let prefix = if self.digits.len() == TAC_LEN {
            TAC_LEN
        } else {
            TAC_SNR_LEN
        };
        imei.len() >= prefix && imei[..prefix] == self.digits[..prefix]
    }

    pub fn is_tac(&self) -> bool {
        self.digits.len() == TAC_LEN
    }
}

impl TryFrom<String> for BlockedImei {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let digits = parse_digits(&value).map_err(|_| ConfigError::InvalidImei(value.clone()))?;
        match digits.len() {
            TAC_LEN | TAC_SNR_LEN | 15 => Ok(Self { digits }),
            _ => Err(ConfigError::InvalidImei(value)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlmnEntry {
    mcc: String,
    mnc: String,
}

/// PLMN whose subscribers are refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PlmnEntry")]
pub struct RestrictedPlmn(pub PlmnId);

impl TryFrom<PlmnEntry> for RestrictedPlmn {
    type Error = ConfigError;

    fn try_from(entry: PlmnEntry) -> Result<Self, Self::Error> {
        PlmnId::parse(&entry.mcc, &entry.mnc)
            .map(RestrictedPlmn)
            .map_err(|_| ConfigError::InvalidPlmn {
                mcc: entry.mcc,
                mnc: entry.mnc,
            })
    }
}

impl fmt::Display for RestrictedPlmn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Congestion control
// ============================================================================

/// Latency thresholds above which a late UE response is dropped; the UE
/// retransmits it when the network timer fires again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CongestionControlConfig {
    pub enabled: bool,
    /// AUTHENTICATION RESPONSE threshold (ms)
    pub auth_ms: u64,
    /// IDENTITY RESPONSE threshold (ms)
    pub ident_ms: u64,
    /// SECURITY MODE COMPLETE threshold (ms)
    pub smc_ms: u64,
}

impl Default for CongestionControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auth_ms: 1000,
            ident_ms: 1000,
            smc_ms: 1000,
        }
    }
}

impl CongestionControlConfig {
    /// Whether a response of `kind` that took `latency_ms` must be dropped.
    pub fn should_drop(&self, kind: ProcedureKind, latency_ms: u64) -> bool {
        if !self.enabled {
            return false;
        }
        let threshold = match kind {
            ProcedureKind::Authentication => self.auth_ms,
            ProcedureKind::Identification => self.ident_ms,
            ProcedureKind::SecurityModeControl => self.smc_ms,
            ProcedureKind::AuthInfo => return false,
        };
        latency_ms > threshold
    }
}

// ============================================================================
// MME NAS configuration
// ============================================================================

/// EMM common procedure configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MmeNasConfig {
    /// T3460, `max_count` bounds Authentication retransmissions
    pub t3460: TimerConfig,
    /// Security Mode Command retransmissions (also timed by T3460)
    pub smc_max_count: u32,
    /// T3470, `max_count` bounds Identification retransmissions
    pub t3470: TimerConfig,
    /// Authentication Information Answer guard
    pub ts6a_auth_info: TimerConfig,
    /// SYNCH FAILURE count that rejects Authentication
    pub sync_failure_max: u32,
    /// Integrity algorithms, most preferred first
    pub integrity_order: Vec<u8>,
    /// Ciphering algorithms, most preferred first
    pub ciphering_order: Vec<u8>,
    pub congestion_control: CongestionControlConfig,
    pub blocked_imei: Vec<BlockedImei>,
    pub restricted_plmn: Vec<RestrictedPlmn>,
    /// Vectors asked from the HSS per Authentication Information Request
    pub auth_vectors_per_request: u8,
}

impl Default for MmeNasConfig {
    fn default() -> Self {
        Self {
            // T3460 - 6 seconds, 5 transmissions
            t3460: TimerConfig::new(5, 6),
            smc_max_count: 5,
            // T3470 - 6 seconds, 5 transmissions
            t3470: TimerConfig::new(5, 6),
            // S6a AIA guard - 5 seconds, no retransmission
            ts6a_auth_info: TimerConfig::new(1, 5),
            sync_failure_max: 3,
            integrity_order: vec![2, 1, 0],
            ciphering_order: vec![0, 2, 1],
            congestion_control: CongestionControlConfig::default(),
            blocked_imei: Vec::new(),
            restricted_plmn: Vec::new(),
            auth_vectors_per_request: MAX_EPS_AUTH_VECTORS as u8,
        }
    }
}

impl MmeNasConfig {
    /// Load the `mme:` section of a YAML file.
    ///
    /// An unreadable file or a missing section leaves the defaults in place.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!("Loading configuration from: {}", path.display());

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!(
                    "Could not read config file '{}': {}. Using defaults.",
                    path.display(),
                    e
                );
                return Ok(Self::default());
            }
        };
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let yaml: Value = serde_yaml::from_str(content)?;
        let Some(section) = yaml.get("mme") else {
            log::warn!("No 'mme' section in config file");
            return Ok(Self::default());
        };

        let config: Self = serde_yaml::from_value(section.clone())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, order) in [
            ("integrity_order", &self.integrity_order),
            ("ciphering_order", &self.ciphering_order),
        ] {
            if order.len() > OGS_MAX_NUM_OF_ALGORITHM {
                return Err(ConfigError::TooManyAlgorithms {
                    field,
                    len: order.len(),
                });
            }
            if let Some(&value) = order.iter().find(|&&a| a > MAX_ALGORITHM_ID) {
                return Err(ConfigError::InvalidAlgorithm { field, value });
            }
        }

        for (field, count) in [
            ("t3460.max_count", self.t3460.max_count),
            ("smc_max_count", self.smc_max_count),
            ("t3470.max_count", self.t3470.max_count),
            ("sync_failure_max", self.sync_failure_max),
        ] {
            if count == 0 {
                return Err(ConfigError::InvalidMaxCount { field });
            }
        }

        let n = self.auth_vectors_per_request;
        if n == 0 || n as usize > MAX_EPS_AUTH_VECTORS {
            return Err(ConfigError::InvalidVectorCount(n));
        }
        Ok(())
    }

    /// Retransmission ceiling of a NAS procedure
    pub fn max_count(&self, kind: ProcedureKind) -> u32 {
        match kind {
            ProcedureKind::Authentication => self.t3460.max_count,
            ProcedureKind::SecurityModeControl => self.smc_max_count,
            ProcedureKind::Identification => self.t3470.max_count,
            ProcedureKind::AuthInfo => self.ts6a_auth_info.max_count,
        }
    }

    pub fn timer(&self, kind: ProcedureKind) -> &TimerConfig {
        match kind {
            ProcedureKind::Authentication | ProcedureKind::SecurityModeControl => &self.t3460,
            ProcedureKind::Identification => &self.t3470,
            ProcedureKind::AuthInfo => &self.ts6a_auth_info,
        }
    }

    /// Whether equipment with these IMEI/IMEISV digits is blocked.
    ///
    /// TAC entries are checked before full IMEI entries.
    pub fn is_imei_blocked(&self, imei: &[u8]) -> bool {
        self.blocked_imei
            .iter()
            .filter(|e| e.is_tac())
            .chain(self.blocked_imei.iter().filter(|e| !e.is_tac()))
            .any(|e| e.matches(imei))
    }

    /// Whether the home PLMN of `imsi` is refused.
    pub fn is_plmn_restricted(&self, imsi: &Imsi) -> bool {
        self.restricted_plmn
            .iter()
            .any(|RestrictedPlmn(plmn)| imsi.plmn_id(plmn.mnc_len) == *plmn)
    }
}
