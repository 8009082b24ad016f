//! Content hashing and fingerprinting.
//!
//! `hash_string` implements the external `hashString` contract (§6): a
//! 16-character lowercase hex rendering of a 64-bit hash, taken from the
//! first 8 bytes of a blake3 digest. `hash_u64` is the same primitive
//! returned as an integer, used for symbol fingerprints.

pub fn hash_u64(s: &str) -> u64 {
    let digest = blake3::hash(s.as_bytes());
    let bytes = digest.as_bytes();
    u64::from_be_bytes(bytes[0..8].try_into().expect("blake3 digest is 32 bytes"))
}

pub fn hash_string(s: &str) -> String {
    hex::encode(hash_u64(s).to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_string_is_16_hex_chars() {
        let h = hash_string("fn foo() {}");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn hash_string_is_deterministic() {
        assert_eq!(hash_string("same input"), hash_string("same input"));
    }

    #[test]
    fn hash_string_differs_on_different_input() {
        assert_ne!(hash_string("a"), hash_string("b"));
    }
}
