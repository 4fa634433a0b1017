//! Identifier helpers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a random record id (UUID v4).
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a time-ordered serial (UUID v7).
///
/// Serials sort lexicographically in creation order, which keeps the
/// statement history of a user ordered without a separate sequence.
#[must_use]
pub fn generate_serial() -> String {
    Uuid::now_v7().to_string()
}

/// Derives a stable dedupe key from a namespace and a set of parts.
#[must_use]
pub fn dedupe_key(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    for part in parts {
        hasher.update(b"|");
        hasher.update(part.as_bytes());
    }
    let result = hasher.finalize();
    format!("{namespace}:{}", hex::encode(&result[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serials_are_ordered() {
        let first = generate_serial();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generate_serial();
        assert!(first < second);
    }

    #[test]
    fn test_dedupe_key_is_stable() {
        let a = dedupe_key("consumption", &["entry-1"]);
        let b = dedupe_key("consumption", &["entry-1"]);
        let c = dedupe_key("consumption", &["entry-2"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("consumption:"));
        assert_eq!(a.len(), "consumption:".len() + 32);
    }

    #[test]
    fn test_dedupe_key_separates_parts() {
        assert_ne!(dedupe_key("k", &["ab", "c"]), dedupe_key("k", &["a", "bc"]));
    }
}
