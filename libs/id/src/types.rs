//! Identifier definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::IdError;

// =============================================================================
// Image Digest
// =============================================================================

/// Content digest of a container image (SHA-256, 64 lowercase hex characters).
///
/// Parsing accepts an optional `sha256:` prefix and upper-case hex; both are
/// normalized away so that every spelling of the same digest compares equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageSha(String);

impl ImageSha {
    /// Number of hex characters in a SHA-256 digest.
    pub const HEX_LEN: usize = 64;

    /// Algorithm prefix accepted (and stripped) by [`ImageSha::parse`].
    pub const ALGORITHM_PREFIX: &'static str = "sha256:";

    /// Parses a digest, normalizing prefix and case.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let hex_part = match s.split_once(':') {
            Some((algo, rest)) if algo.eq_ignore_ascii_case("sha256") => rest,
            Some((algo, _)) => return Err(IdError::UnsupportedAlgorithm(algo.to_string())),
            None => s,
        };

        if hex_part.len() != Self::HEX_LEN {
            return Err(IdError::InvalidDigestLength {
                expected: Self::HEX_LEN,
                actual: hex_part.len(),
            });
        }

        hex::decode(hex_part).map_err(|e| IdError::InvalidDigest(e.to_string()))?;

        Ok(Self(hex_part.to_ascii_lowercase()))
    }

    /// The bare lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated digest for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ImageSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ImageSha {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ImageSha {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ImageSha {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Pod Key
// =============================================================================

/// Identity of a pod: `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PodKey {
    namespace: String,
    name: String,
}

impl PodKey {
    /// Builds a key from its parts. Neither part may be empty or contain `/`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, IdError> {
        let namespace = namespace.into();
        let name = name.into();

        if namespace.is_empty() && name.is_empty() {
            return Err(IdError::Empty);
        }
        if namespace.is_empty() || name.is_empty() || namespace.contains('/') || name.contains('/')
        {
            return Err(IdError::InvalidPodKey(format!("{namespace}/{name}")));
        }

        Ok(Self { namespace, name })
    }

    /// Parses `namespace/name`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let Some((namespace, name)) = s.split_once('/') else {
            return Err(IdError::InvalidPodKey(s.to_string()));
        };
        Self::new(namespace, name)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for PodKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PodKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PodKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Request ID
// =============================================================================

/// ULID-backed request identifier, formatted as `req_{ulid}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(crate::Ulid);

impl RequestId {
    pub const PREFIX: &'static str = "req";

    /// Creates a new ID with a fresh ULID.
    #[must_use]
    pub fn new() -> Self {
        Self(crate::Ulid::new())
    }

    /// Parses `req_{ulid}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let (prefix, ulid_str) = s.split_once('_').unwrap_or(("", s));
        if prefix != Self::PREFIX {
            return Err(IdError::InvalidPrefix {
                expected: Self::PREFIX,
                actual: prefix.to_string(),
            });
        }
        let ulid = ulid_str
            .parse::<crate::Ulid>()
            .map_err(|e| IdError::InvalidUlid(e.to_string()))?;
        Ok(Self(ulid))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl FromStr for RequestId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    const SHA: &str = "3f1c0a4a6e0b7f2d9c8e5b4a3d2c1b0a9f8e7d6c5b4a39281706f5e4d3c2b1a0";

    #[test]
    fn test_sha_prefix_and_case_normalized() {
        let bare = ImageSha::parse(SHA).unwrap();
        let prefixed = ImageSha::parse(&format!("sha256:{SHA}")).unwrap();
        let upper = ImageSha::parse(&SHA.to_ascii_uppercase()).unwrap();

        assert_eq!(bare, prefixed);
        assert_eq!(bare, upper);
        assert_eq!(bare.as_str(), SHA);
        assert_eq!(bare.short(), &SHA[..12]);
    }

    #[rstest]
    #[case("", IdError::Empty)]
    #[case("abc", IdError::InvalidDigestLength { expected: 64, actual: 3 })]
    #[case("md5:abc", IdError::UnsupportedAlgorithm("md5".to_string()))]
    fn test_sha_rejects(#[case] input: &str, #[case] expected: IdError) {
        assert_eq!(ImageSha::parse(input).unwrap_err(), expected);
    }

    #[test]
    fn test_sha_rejects_non_hex() {
        let bad = format!("{}zz", &SHA[..62]);
        assert!(ImageSha::parse(&bad).unwrap_err().is_digest_error());
    }

    #[test]
    fn test_sha_json_is_bare_string() {
        let sha = ImageSha::parse(&format!("sha256:{SHA}")).unwrap();
        let json = serde_json::to_string(&sha).unwrap();
        assert_eq!(json, format!("\"{SHA}\""));
        let parsed: ImageSha = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sha);
    }

    #[test]
    fn test_pod_key_display_and_parse() {
        let key = PodKey::new("default", "web-0").unwrap();
        assert_eq!(key.to_string(), "default/web-0");
        assert_eq!(PodKey::parse("default/web-0").unwrap(), key);
        assert_eq!(key.namespace(), "default");
        assert_eq!(key.name(), "web-0");
    }

    #[rstest]
    #[case("")]
    #[case("no-slash")]
    #[case("/name")]
    #[case("ns/")]
    #[case("a/b/c")]
    fn test_pod_key_rejects(#[case] input: &str) {
        assert!(PodKey::parse(input).is_err());
    }

    #[test]
    fn test_pod_keys_order_by_namespace_then_name() {
        let a = PodKey::new("a", "z").unwrap();
        let b = PodKey::new("b", "a").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_request_id_roundtrip() {
        let id = RequestId::new();
        let s = id.to_string();
        assert!(s.starts_with("req_"));
        assert_eq!(RequestId::parse(&s).unwrap(), id);
        assert!(matches!(
            RequestId::parse("org_01HV4Z2WQXKJNM8GPQY6VBKC3D"),
            Err(IdError::InvalidPrefix { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_every_spelling_of_a_digest_is_one_sha(bytes in proptest::array::uniform32(any::<u8>())) {
            let hex = hex::encode(bytes);
            let a = ImageSha::parse(&hex).unwrap();
            let b = ImageSha::parse(&format!("sha256:{}", hex.to_ascii_uppercase())).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
