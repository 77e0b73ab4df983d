// src/header.rs

//! Compact package header records
//!
//! The header is the metadata record a package carries and the database
//! stores: the NEVRA identity tuple plus the dependency and content fields
//! this core needs. Headers are sealed with a digest over their identity
//! fields; the header check run during database reads and rebuilds
//! recomputes that digest.

use crate::flags::VerifyLevel;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A package header record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub epoch: Option<u32>,
    pub version: String,
    pub release: String,
    pub arch: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Capabilities this package provides, in `name` or `name = version` form
    #[serde(default)]
    pub provides: Vec<String>,
    /// Architecture colour bits (0 = colourless)
    #[serde(default)]
    pub color: u32,
    /// Hex digest sealed over the identity fields, if the header has one
    #[serde(default)]
    pub digest: Option<String>,
}

impl Header {
    pub fn new(name: &str, version: &str, release: &str) -> Self {
        Self {
            name: name.to_string(),
            epoch: None,
            version: version.to_string(),
            release: release.to_string(),
            arch: None,
            summary: None,
            provides: Vec::new(),
            color: 0,
            digest: None,
        }
    }

    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn with_arch(mut self, arch: &str) -> Self {
        self.arch = Some(arch.to_string());
        self
    }

    /// The label stored in the database label index: `name-version-release`,
    /// with no epoch.
    pub fn label(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }

    /// Full NEVRA identity, epoch and architecture included when present.
    pub fn nevra(&self) -> String {
        let mut s = String::new();
        s.push_str(&self.name);
        s.push('-');
        if let Some(e) = self.epoch {
            s.push_str(&format!("{}:", e));
        }
        s.push_str(&format!("{}-{}", self.version, self.release));
        if let Some(arch) = &self.arch {
            s.push_str(&format!(".{}", arch));
        }
        s
    }

    fn compute_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"\0");
        if let Some(e) = self.epoch {
            hasher.update(e.to_string().as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(self.version.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.release.as_bytes());
        hasher.update(b"\0");
        if let Some(arch) = &self.arch {
            hasher.update(arch.as_bytes());
        }
        hasher.update(b"\0");
        for p in &self.provides {
            hasher.update(p.as_bytes());
            hasher.update(b"\0");
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Seal the header by recording the digest of its current contents.
    pub fn seal(mut self) -> Self {
        self.digest = Some(self.compute_digest());
        self
    }

    /// Verify this header against a policy level. A level that requires a
    /// digest fails headers that carry none or whose digest no longer
    /// matches; empty identity fields always fail.
    pub fn check(&self, level: VerifyLevel) -> Result<()> {
        if self.name.is_empty() || self.version.is_empty() || self.release.is_empty() {
            return Err(Error::HeaderCheck(format!(
                "incomplete identity in header {}",
                self.nevra()
            )));
        }
        if level.contains(VerifyLevel::DIGEST) {
            match &self.digest {
                None => {
                    return Err(Error::HeaderCheck(format!(
                        "header {} has no digest",
                        self.nevra()
                    )));
                }
                Some(d) if *d != self.compute_digest() => {
                    return Err(Error::HeaderCheck(format!(
                        "digest mismatch in header {}",
                        self.nevra()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nevra())
    }
}
