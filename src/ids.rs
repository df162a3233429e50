//! Pronounceable identifier generation for sessions.

use rand::Rng;

const CONSONANTS: &[u8] = b"bcdfghjklmnpqrstvwxz";
const VOWELS: &[u8] = b"aeiou";

/// Generate a random pronounceable identifier.
///
/// Eight consonant-vowel pairs give `(20 * 5)^8` combinations, a little over
/// 53 bits of entropy, enough to keep concurrent sessions collision free.
pub fn pronounceable() -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(16);
    for _ in 0..8 {
        out.push(CONSONANTS[rng.gen_range(0..CONSONANTS.len())] as char);
        out.push(VOWELS[rng.gen_range(0..VOWELS.len())] as char);
    }
    out
}

/// Stable non-cryptographic hash, used to derive short ids from correlation keys.
pub fn stable_hash(input: &str) -> String {
    // FNV-1a 64.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pronounceable_shape() {
        let id = pronounceable();
        assert_eq!(id.len(), 16);
        for (i, c) in id.chars().enumerate() {
            if i % 2 == 0 {
                assert!(!"aeiou".contains(c), "expected consonant at {i} in {id}");
            } else {
                assert!("aeiou".contains(c), "expected vowel at {i} in {id}");
            }
        }
    }

    #[test]
    fn test_pronounceable_unique() {
        let a = pronounceable();
        let b = pronounceable();
        assert_ne!(a, b);
    }

    #[test]
    fn test_stable_hash_is_stable() {
        assert_eq!(stable_hash("/tmp/app.js"), stable_hash("/tmp/app.js"));
        assert_ne!(stable_hash("/tmp/app.js"), stable_hash("/tmp/app2.js"));
    }
}
