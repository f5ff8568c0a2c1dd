//! Per-unit content hashing
//!
//! The hash covers the unit's source bytes, never its XML form, so two
//! archives of the same tree agree on hashes regardless of markup options.
//! The function is fixed per archive.

use sha2::{Digest, Sha256};

/// Hash function applied to unit source bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Md5,
}

impl HashAlgorithm {
    /// Lowercase hex digest of `bytes`
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                let out = hasher.finalize();
                let mut hex = String::with_capacity(out.len() * 2);
                for b in out {
                    hex.push_str(&format!("{:02x}", b));
                }
                hex
            }
            HashAlgorithm::Md5 => format!("{:x}", md5::compute(bytes)),
        }
    }
}
