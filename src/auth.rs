//! Password hashing helper backing the `hash-password` CLI utility (§6
//! "CLI ... a second helper utility hashes a password given on argv").
//! The donor carries no password hashing of its own; `bcrypt` is the crate
//! the broader example pack's account-management services reach for.

use bcrypt::{DEFAULT_COST, hash, verify};

use crate::error::{Error, Result};

pub fn hash_password(plain: &str) -> Result<String> {
    hash(plain, DEFAULT_COST).map_err(|e| Error::Internal(format!("bcrypt hash failed: {e}")))
}

pub fn verify_password(plain: &str, hashed: &str) -> Result<bool> {
    verify(plain, hashed).map_err(|e| Error::Internal(format!("bcrypt verify failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify_roundtrips() {
        let hashed = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hashed).unwrap());
        assert!(!verify_password("wrong password", &hashed).unwrap());
    }

    #[test]
    fn test_distinct_hashes_for_same_password() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }
}
