use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::{Digest, Sha256};

pub const BOOKING_TOKEN_LENGTH: usize = 48;

pub fn generate_access_token(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.trim().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_alphanumeric_and_distinct() {
        let a = generate_access_token(BOOKING_TOKEN_LENGTH);
        let b = generate_access_token(BOOKING_TOKEN_LENGTH);
        assert_eq!(a.len(), BOOKING_TOKEN_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_hex_and_ignores_surrounding_whitespace() {
        let h = hash_token("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token(" abc\n"));
        assert_ne!(h, hash_token("abd"));
    }
}
