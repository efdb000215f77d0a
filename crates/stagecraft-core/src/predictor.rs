//! Deterministic placement prediction.
//!
//! Placement identifiers are computed before anything is created, so
//! dependents can reference not-yet-created components. The construction is
//! a two-step hash:
//!
//! 1. `salt_for(name, context)` derives a stable salt from a human-readable
//!    component name plus optional deployer identity and version tag. A
//!    version tag makes post-upgrade salts distinct from initial-deployment
//!    salts, guaranteeing each upgrade lands at a fresh location.
//! 2. `predict(deployer, salt, payload_hash)` computes the placement
//!    identifier from `deployer ‖ salt ‖ payload_hash` under a fixed domain
//!    tag.
//!
//! Both functions are pure and total: same inputs, same identifier, across
//! independent runs and targets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{ContentHasher, Digest, Hash, HexError, hex_decode, hex_encode};

/// Domain tag for salt derivation.
const SALT_DOMAIN: &[u8] = b"stagecraft.salt.v1";

/// Domain tag for placement identifier derivation.
const PLACEMENT_DOMAIN: &[u8] = b"stagecraft.placement.v1";

/// The identity of a deployer or role grantee.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates an identity from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identity bytes used in hash constructions.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns true for the empty (zero) identity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A placement salt mixed into the identifier hash to distinguish
/// otherwise-identical creations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Salt(pub Hash);

impl Salt {
    /// Returns the raw salt bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

impl fmt::Display for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_encode(&self.0))
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({self})")
    }
}

impl FromStr for Salt {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex_decode(s).map(Self)
    }
}

impl Serialize for Salt {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex_encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Salt {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A deterministic component placement identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub Hash);

impl ComponentId {
    /// Returns the raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Returns a shortened hex prefix for log output.
    #[must_use]
    pub fn short(&self) -> String {
        hex_encode(&self.0[..6])
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_encode(&self.0))
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.short())
    }
}

impl FromStr for ComponentId {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex_decode(s).map(Self)
    }
}

impl Serialize for ComponentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex_encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ComponentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Optional context mixed into salt derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaltContext {
    /// Deployer identity, when salts should be deployer-scoped.
    pub deployer: Option<Identity>,

    /// Free-form version tag. Upgrades pass a tag here so the new
    /// implementation's salt differs from the initial deployment's.
    pub version_tag: Option<String>,
}

impl SaltContext {
    /// Context scoped to a deployer, with no version tag.
    #[must_use]
    pub const fn deployer_scoped(deployer: Identity) -> Self {
        Self {
            deployer: Some(deployer),
            version_tag: None,
        }
    }

    /// Context scoped to a deployer and a version tag.
    #[must_use]
    pub fn versioned(deployer: Identity, version_tag: impl Into<String>) -> Self {
        Self {
            deployer: Some(deployer),
            version_tag: Some(version_tag.into()),
        }
    }
}

/// Derives the placement salt for a named component.
///
/// Pure and deterministic: identical `(name, context)` inputs always produce
/// the same salt; any difference in name, deployer, or version tag produces
/// a different salt.
#[must_use]
pub fn salt_for(name: &str, context: &SaltContext) -> Salt {
    let deployer = context.deployer.as_ref().map_or(&[] as &[u8], Identity::as_bytes);
    let version = context.version_tag.as_deref().unwrap_or("").as_bytes();
    Salt(ContentHasher::hash_parts(
        SALT_DOMAIN,
        &[name.as_bytes(), deployer, version],
    ))
}

/// Computes the deterministic placement identifier for a component.
///
/// The identifier is a hash of `deployer ‖ salt ‖ payload_hash` under a
/// fixed domain tag. Total for all well-formed inputs; no side effects.
#[must_use]
pub fn predict(deployer: &Identity, salt: &Salt, payload_hash: &Digest) -> ComponentId {
    ComponentId(ContentHasher::hash_parts(
        PLACEMENT_DOMAIN,
        &[deployer.as_bytes(), salt.as_bytes(), payload_hash.as_bytes()],
    ))
}
