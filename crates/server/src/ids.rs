//! URL-safe identifier and secret generation.
//!
//! Session, thread, and message ids travel inside share links, so they use
//! a URL-safe alphabet instead of UUID hex. Ids and owner tokens are drawn
//! independently from the thread-local CSPRNG; knowing one never helps
//! guessing the other.

use rand::Rng;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Length of session, thread, and message ids (~126 bits).
pub const ENTITY_ID_LEN: usize = 21;

/// Length of owner tokens (~192 bits).
pub const OWNER_TOKEN_LEN: usize = 32;

/// Generate a random string of `len` symbols from the URL-safe alphabet.
pub fn generate(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Mint an id for a session, thread, or message.
pub fn entity_id() -> String {
    generate(ENTITY_ID_LEN)
}

/// Mint an owner token.
pub fn owner_token() -> String {
    generate(OWNER_TOKEN_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_requested_length() {
        assert_eq!(entity_id().len(), ENTITY_ID_LEN);
        assert_eq!(owner_token().len(), OWNER_TOKEN_LEN);
    }

    #[test]
    fn uses_url_safe_alphabet() {
        let id = generate(256);
        assert!(
            id.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        );
    }

    #[test]
    fn ids_do_not_repeat() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(entity_id()));
        }
    }
}
