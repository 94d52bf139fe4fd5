//! Password hash verification

use tracing::debug;

/// Checks a plaintext password against a stored hash
pub trait PasswordVerifier: Send + Sync {
    /// Never fails: malformed hashes simply do not match
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// bcrypt, as written by the normal registration path
#[derive(Debug, Default, Clone, Copy)]
pub struct BcryptVerifier;

impl PasswordVerifier for BcryptVerifier {
    fn verify(&self, password: &str, hash: &str) -> bool {
        match bcrypt::verify(password, hash) {
            Ok(matched) => matched,
            Err(e) => {
                debug!(error = %e, "stored password hash is not a valid bcrypt hash");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcrypt_verify() {
        let hash = bcrypt::hash("hunter2", 4).unwrap();
        assert!(BcryptVerifier.verify("hunter2", &hash));
        assert!(!BcryptVerifier.verify("hunter3", &hash));
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        assert!(!BcryptVerifier.verify("hunter2", "hunter2"));
        assert!(!BcryptVerifier.verify("", ""));
    }
}
