//! NextGCore NAS Protocol Library
//!
//! EPS NAS information elements consumed by the MME EMM procedures
//! (3GPP TS 24.301, TS 24.008).
//!
//! # Example
//!
//! ```rust
//! use ogs_nas::eps::{Imsi, IdentityType2};
//! use ogs_nas::common::types::PlmnId;
//!
//! let imsi = Imsi::parse("001010000000001").unwrap();
//! assert_eq!(imsi.plmn_id(2), PlmnId::parse("001", "01").unwrap());
//! assert_eq!(IdentityType2::try_from(1).unwrap(), IdentityType2::Imsi);
//! ```

pub mod error;
pub mod common;
pub mod eps;

pub use error::{NasError, NasResult};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{NasError, NasResult};
    pub use crate::common::types::{PlmnId, SecurityAlgorithms};
    pub use crate::eps::{
        EmmCause,
        IdentityType2,
        Imei,
        Imeisv,
        Imsi,
        MsNetworkCapability,
        UeAdditionalSecurityCapability,
        UeNetworkCapability,
    };
}
