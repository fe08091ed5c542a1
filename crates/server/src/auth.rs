//! Owner-token verification.
//!
//! A session's owner token is the only proof of write authority. The
//! comparison must not leak where a presented token diverges from the
//! stored one, and a missing session must be indistinguishable from a
//! wrong token, so both cases collapse into a plain `false` here and into
//! a single Forbidden response at the HTTP layer.

/// Compare two byte strings in constant time.
///
/// Unequal lengths return `false` immediately; the length of a token is
/// not a secret. Equal-length inputs always run the full XOR accumulation
/// regardless of where the first mismatch sits.
pub fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (lhs, rhs) in left.iter().zip(right.iter()) {
        diff |= lhs ^ rhs;
    }
    diff == 0
}

/// Check a presented token against the stored one, treating a missing
/// stored token (unknown session) the same as a mismatch.
pub fn token_matches(stored: Option<&str>, presented: &str) -> bool {
    match stored {
        Some(stored) => constant_time_eq(stored.as_bytes(), presented.as_bytes()),
        None => false,
    }
}
