//! WARC related hashing functions.

use std::{fmt::Display, str::FromStr};

use data_encoding::{BASE32, BASE32_NOPAD, HEXLOWER_PERMISSIVE};
use sha1::Digest as _;

use crate::error::{ProtocolError, ProtocolErrorKind};

/// Name of a hashing algorithm recognised in digest fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AlgorithmName {
    Sha1,
}

impl AlgorithmName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sha1 => "sha1",
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
        }
    }
}

impl Display for AlgorithmName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("sha1") || s.eq_ignore_ascii_case("sha-1") {
            Ok(Self::Sha1)
        } else {
            Err(ProtocolError::new(ProtocolErrorKind::UnsupportedDigest))
        }
    }
}

/// Data structure for a hash digest value and the algorithm that produced it.
///
/// Corresponds to the `algo:digest` format in the WARC-Block-Digest and
/// WARC-Payload-Digest fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: AlgorithmName,
    value: Vec<u8>,
}

impl Digest {
    pub fn new(algorithm: AlgorithmName, value: Vec<u8>) -> Self {
        Self { algorithm, value }
    }

    pub fn algorithm(&self) -> AlgorithmName {
        self.algorithm
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl FromStr for Digest {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, encoded) = s.split_once(":").unwrap_or((s, ""));
        let algorithm: AlgorithmName = label.parse()?;
        let value = decode_value(algorithm.output_len(), encoded)?;

        Ok(Self { algorithm, value })
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            self.algorithm.as_str(),
            BASE32.encode(&self.value)
        )
    }
}

/// Decodes a base32 or hex digest value.
///
/// Base32 input is accepted in either case and with or without padding.
fn decode_value(expected_len: usize, value: &str) -> Result<Vec<u8>, ProtocolError> {
    let nopad_value = value.trim_end_matches('=');

    let b32_len = BASE32_NOPAD
        .decode_len(nopad_value.len())
        .unwrap_or_default();

    let result = if expected_len == b32_len {
        BASE32_NOPAD.decode(nopad_value.to_ascii_uppercase().as_bytes())
    } else {
        HEXLOWER_PERMISSIVE.decode(value.as_bytes())
    };

    result.map_err(|error| {
        ProtocolError::new(ProtocolErrorKind::InvalidBaseEncodedValue).with_source(error)
    })
}

/// Streaming hashing function abstraction.
pub struct Hasher {
    algorithm: AlgorithmName,
    inner: sha1::Sha1,
}

impl Hasher {
    pub fn new(algorithm: AlgorithmName) -> Self {
        Self {
            algorithm,
            inner: sha1::Sha1::new(),
        }
    }

    pub fn algorithm(&self) -> AlgorithmName {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(&mut self) -> Vec<u8> {
        let inner = std::mem::replace(&mut self.inner, sha1::Sha1::new());

        inner.finalize().to_vec()
    }

    /// Finishes the hash and wraps it together with the algorithm name.
    pub fn finish_digest(&mut self) -> Digest {
        let algorithm = self.algorithm;
        let value = self.finish();

        Digest::new(algorithm, value)
    }
}
