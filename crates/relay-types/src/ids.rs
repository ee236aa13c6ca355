//! Identifiers and fingerprints for commands
//!
//! Command IDs correlate an agent's ack back to the originating command, so
//! they travel over the wire verbatim and carry no display prefix.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of hex characters kept from an idempotency digest (64 bits)
pub const IDEMPOTENCY_KEY_LEN: usize = 16;

/// Separator placed between fingerprint parts so `("ab", "c")` and
/// `("a", "bc")` hash differently.
const PART_DELIMITER: &str = "|";

/// Number of hex characters kept from a command ID digest
const COMMAND_ID_LEN: usize = 32;

static COMMAND_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier of a managed cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    /// Create a cluster ID from any string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClusterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique identifier for a command
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// Wrap an existing ID, such as one read back from an ack
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier.
    ///
    /// The ID is a SHA-256 digest of the current wall clock in nanoseconds.
    /// A process-local sequence number is mixed in so two calls landing on
    /// the same clock tick still produce distinct IDs.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let sequence = COMMAND_SEQUENCE.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(nanos.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        let digest = hex::encode(hasher.finalize());

        Self(digest[..COMMAND_ID_LEN].to_string())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Compute a deterministic fingerprint over the ordered `parts`.
///
/// Each part contributes its `Display` rendering; parts are joined with a
/// delimiter, hashed with SHA-256 and truncated to
/// [`IDEMPOTENCY_KEY_LEN`] hex characters. Good enough to spot re-delivery,
/// not meant to resist a deliberate collision.
pub fn idempotency_key(parts: &[&dyn fmt::Display]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(PART_DELIMITER.as_bytes());
        }
        hasher.update(part.to_string().as_bytes());
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(IDEMPOTENCY_KEY_LEN);
    digest
}

/// Variadic form of [`idempotency_key`] accepting any `Display` values.
///
/// ```
/// use relay_types::idem_key;
///
/// let a = idem_key!("scale", "c1", "ns1", "deploy", "a", 3);
/// assert_eq!(a, idem_key!("scale", "c1", "ns1", "deploy", "a", 3));
/// ```
#[macro_export]
macro_rules! idem_key {
    ($($part:expr),* $(,)?) => {
        $crate::idempotency_key(&[$(&$part as &dyn ::std::fmt::Display),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_command_id_generation() {
        let id1 = CommandId::generate();
        let id2 = CommandId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), COMMAND_ID_LEN);
    }

    #[test]
    fn test_command_ids_unique_in_tight_loop() {
        let ids: HashSet<CommandId> = (0..10_000).map(|_| CommandId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_idempotency_is_stable() {
        let a = idem_key!("scale", "c1", "ns1", "deploy", "a", 3);
        let b = idem_key!("scale", "c1", "ns1", "deploy", "a", 3);
        let c = idem_key!("scale", "c1", "ns1", "deploy", "a", 4);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), IDEMPOTENCY_KEY_LEN);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_idempotency_respects_part_boundaries() {
        assert_ne!(idem_key!("ab", "c"), idem_key!("a", "bc"));
    }

    #[test]
    fn test_cluster_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&ClusterId::new("east")).unwrap();
        assert_eq!(json, "\"east\"");
    }

    proptest! {
        #[test]
        fn property_idempotency_deterministic(parts in proptest::collection::vec(".*", 0..6)) {
            let refs: Vec<&dyn fmt::Display> = parts.iter().map(|p| p as &dyn fmt::Display).collect();
            prop_assert_eq!(idempotency_key(&refs), idempotency_key(&refs));
        }

        #[test]
        fn property_idempotency_order_sensitive(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            prop_assume!(a != b);
            prop_assert_ne!(idem_key!(a, b), idem_key!(b, a));
        }
    }
}
