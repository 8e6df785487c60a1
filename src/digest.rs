//! Multi-algorithm content digests.
//!
//! Serialized as `algo:hex` entries joined by `;`. SHA-1 entries carry no
//! prefix, so `da39a3ee...;sha256:e3b0c442...` holds one of each.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha512};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("invalid digest '{0}'")]
    Parse(String),

    #[error("{algorithm} mismatch: expected {expected}, computed {actual}")]
    Mismatch {
        algorithm: Algorithm,
        expected: String,
        actual: String,
    },
}

/// Digest algorithms, ordered weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Hex digest of `bytes`.
    fn compute(self, bytes: &[u8]) -> String {
        match self {
            Self::Sha1 => format!("{:x}", Sha1::digest(bytes)),
            Self::Sha256 => format!("{:x}", Sha256::digest(bytes)),
            Self::Sha512 => format!("{:x}", Sha512::digest(bytes)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One digest value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Digest of `bytes` under `algorithm`.
    pub fn compute(algorithm: Algorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            hex: algorithm.compute(bytes),
        }
    }

    pub fn sha256(bytes: &[u8]) -> Self {
        Self::compute(Algorithm::Sha256, bytes)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = match s.split_once(':') {
            None => (Algorithm::Sha1, s),
            Some(("sha1", hex)) => (Algorithm::Sha1, hex),
            Some(("sha256", hex)) => (Algorithm::Sha256, hex),
            Some(("sha512", hex)) => (Algorithm::Sha512, hex),
            Some(_) => return Err(DigestError::Parse(s.to_string())),
        };

        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::Parse(s.to_string()));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.algorithm {
            Algorithm::Sha1 => f.write_str(&self.hex),
            algorithm => write!(f, "{algorithm}:{}", self.hex),
        }
    }
}

/// A non-empty set of digests of the same content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MultipleDigest(Vec<Digest>);

impl MultipleDigest {
    pub fn digests(&self) -> &[Digest] {
        &self.0
    }

    /// The entry with the strongest algorithm.
    pub fn strongest(&self) -> &Digest {
        // Non-empty by construction.
        self.0
            .iter()
            .max_by_key(|d| d.algorithm)
            .unwrap_or(&self.0[0])
    }

    /// Check `bytes` against the strongest digest.
    pub fn verify(&self, bytes: &[u8]) -> Result<(), DigestError> {
        let digest = self.strongest();
        let actual = digest.algorithm.compute(bytes);

        if digest.hex == actual {
            Ok(())
        } else {
            Err(DigestError::Mismatch {
                algorithm: digest.algorithm,
                expected: digest.hex.clone(),
                actual,
            })
        }
    }
}

impl From<Digest> for MultipleDigest {
    fn from(digest: Digest) -> Self {
        Self(vec![digest])
    }
}

impl FromStr for MultipleDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digests = s
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Digest>, _>>()?;

        if digests.is_empty() {
            return Err(DigestError::Parse(s.to_string()));
        }
        Ok(Self(digests))
    }
}

impl TryFrom<String> for MultipleDigest {
    type Error = DigestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MultipleDigest> for String {
    fn from(digest: MultipleDigest) -> Self {
        digest.to_string()
    }
}

impl fmt::Display for MultipleDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, digest) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{digest}")?;
        }
        Ok(())
    }
}
