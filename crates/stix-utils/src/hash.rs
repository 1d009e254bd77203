//! Stage digests
//!
//! A setup stage is a list of declarative units (usually shell commands).
//! Each unit is hashed on its own, then the per-unit digests are fed in
//! order into a second SHA-256. Reordering units changes the digest.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over the ordered per-unit SHA-256 digests.
pub fn stage_digest<I, S>(units: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for unit in units {
        hasher.update(Sha256::digest(unit.as_ref()));
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let a = stage_digest(["sudo apt-get update", "pip install ray"]);
        let b = stage_digest(vec!["sudo apt-get update".to_string(), "pip install ray".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let a = stage_digest(["a", "b"]);
        let b = stage_digest(["b", "a"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_is_not_plain_concatenation() {
        // "ab" as one unit differs from "a" + "b" as two units.
        assert_ne!(stage_digest(["ab"]), stage_digest(["a", "b"]));
    }

    #[test]
    fn test_empty_stage() {
        // SHA-256 of the empty input.
        let empty: [&str; 0] = [];
        assert_eq!(
            stage_digest(empty),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
