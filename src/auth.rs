//! Packet authentication: a lightweight integrity / replay mitigation, not
//! encryption.
//!
//! The digest binds the 12-bit packet id and the 64-bit timestamp to a
//! shared passphrase: `H(packet_id_le[2] ‖ timestamp_le[8] ‖ passphrase)`.
//! The digest travels in the Extended Field under the auth_hash key and is
//! compared in constant time.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

/// Digest algorithms the protocol negotiates. SHA-512 is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha512
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        };
        write!(f, "{name}")
    }
}

impl FromStr for HashAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(AuthError::UnknownAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    UnknownAlgorithm(String),
    MissingPassphrase,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {name}"),
            AuthError::MissingPassphrase => {
                write!(f, "authentication enabled but no passphrase configured")
            }
        }
    }
}

impl Error for AuthError {}

fn preimage(packet_id: u16, timestamp: u64, passphrase: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(10 + passphrase.len());
    data.extend_from_slice(&packet_id.to_le_bytes());
    data.extend_from_slice(&timestamp.to_le_bytes());
    data.extend_from_slice(passphrase.as_bytes());
    data
}

/// Compute the auth digest for a packet.
pub fn calculate_auth_hash(
    algorithm: HashAlgorithm,
    packet_id: u16,
    timestamp: u64,
    passphrase: &str,
) -> Vec<u8> {
    let data = preimage(packet_id & 0x0FFF, timestamp, passphrase);
    match algorithm {
        HashAlgorithm::Md5 => Md5::digest(&data).to_vec(),
        HashAlgorithm::Sha1 => Sha1::digest(&data).to_vec(),
        HashAlgorithm::Sha256 => Sha256::digest(&data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(&data).to_vec(),
    }
}

/// Constant-time verification of a received digest.
pub fn verify_auth_hash(
    algorithm: HashAlgorithm,
    packet_id: u16,
    timestamp: u64,
    passphrase: &str,
    received: &[u8],
) -> bool {
    if received.is_empty() {
        return false;
    }
    let expected = calculate_auth_hash(algorithm, packet_id, timestamp, passphrase);
    expected.ct_eq(received).into()
}

/// Per-server authentication settings: which packet types must carry a
/// verifiable digest, and under which passphrase/algorithm.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub passphrase: Option<String>,
    pub target_packet_types: HashSet<u8>,
    pub algorithm: HashAlgorithm,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            passphrase: None,
            // Sensor reports and their ACKs are the default protected set.
            target_packet_types: HashSet::from([4u8, 5u8]),
            algorithm: HashAlgorithm::default(),
        }
    }
}

impl AuthConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(passphrase: &str) -> Self {
        Self {
            enabled: true,
            passphrase: Some(passphrase.to_string()),
            ..Self::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_target_types(mut self, types: impl IntoIterator<Item = u8>) -> Self {
        self.target_packet_types = types.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.enabled && self.passphrase.as_deref().map_or(true, str::is_empty) {
            return Err(AuthError::MissingPassphrase);
        }
        Ok(())
    }

    pub fn is_required_for(&self, packet_type: u8) -> bool {
        self.enabled && self.target_packet_types.contains(&packet_type)
    }

    pub fn calculate(&self, packet_id: u16, timestamp: u64) -> Result<Vec<u8>, AuthError> {
        let passphrase = self
            .passphrase
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(AuthError::MissingPassphrase)?;
        Ok(calculate_auth_hash(
            self.algorithm,
            packet_id,
            timestamp,
            passphrase,
        ))
    }

    pub fn verify(&self, packet_id: u16, timestamp: u64, received: &[u8]) -> bool {
        match self.passphrase.as_deref() {
            Some(passphrase) if !passphrase.is_empty() => {
                verify_auth_hash(self.algorithm, packet_id, timestamp, passphrase, received)
            }
            _ => false,
        }
    }
}
