//! Service identifiers and authorization-proof material.

use crate::error::TypeError;
use crate::E164;
use secrecy::{ExposeSecret, Secret};
use std::fmt;

/// Length of a PNI/ACI identifier in bytes.
pub const SERVICE_ID_LEN: usize = 16;

/// Length of an unidentified-access key in bytes.
pub const ACCESS_KEY_LEN: usize = 16;

fn fmt_uuid(bytes: &[u8; SERVICE_ID_LEN], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let hex = hex::encode(bytes);
    write!(
        f,
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// The stable, non-account-identifying private identifier for a phone
/// number. The service vends a PNI even for unproven lookups.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pni([u8; SERVICE_ID_LEN]);

impl Pni {
    pub fn from_bytes(bytes: [u8; SERVICE_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SERVICE_ID_LEN] {
        &self.0
    }

    /// An all-zero PNI marks a padding/skip entry on the wire.
    pub fn is_nil(&self) -> bool {
        self.0 == [0; SERVICE_ID_LEN]
    }
}

impl fmt::Debug for Pni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PNI:")?;
        fmt_uuid(&self.0, f)
    }
}

/// The account identifier, returned only when the caller supplied a valid
/// ACI/access-key pair for that number.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Aci([u8; SERVICE_ID_LEN]);

impl Aci {
    pub fn from_bytes(bytes: [u8; SERVICE_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SERVICE_ID_LEN] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0; SERVICE_ID_LEN]
    }
}

impl fmt::Debug for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ACI:")?;
        fmt_uuid(&self.0, f)
    }
}

/// An unidentified-access key proving authorized knowledge of an account.
///
/// The key material is redacted from Debug output and zeroized on drop.
pub struct AccessKey(Secret<Vec<u8>>);

impl AccessKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, TypeError> {
        if bytes.len() != ACCESS_KEY_LEN {
            return Err(TypeError::InvalidAccessKeyLength {
                expected: ACCESS_KEY_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self(Secret::new(bytes)))
    }

    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey([REDACTED])")
    }
}

/// An ACI paired with the access key that proves knowledge of it.
#[derive(Debug)]
pub struct AciUakPair {
    pub aci: Aci,
    pub access_key: AccessKey,
}

/// One resolved phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub e164: E164,
    pub pni: Pni,
    /// Present only when the lookup included a valid proof for this account.
    pub aci: Option<Aci>,
}
