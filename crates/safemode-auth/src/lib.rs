//! Safe-mode authentication
//!
//! This crate provides:
//! - Password verification against stored bcrypt hashes
//! - Session token issuance and verification (HS256 JWT)
//! - Session records in the fast key-value cache
//! - Failover login: normal login while the primary store is healthy,
//!   backup-profile login with a safe-mode session while it is not

pub mod login;
pub mod password;
pub mod session;
pub mod token;

pub use login::{FailoverLogin, LoginResponse};
pub use password::{BcryptVerifier, PasswordVerifier};
pub use session::{SessionManager, SessionRecord};
pub use token::{JwtTokenIssuer, SessionClaims, Subject, TokenIssuer};
