//! Bearer credentials for admin endpoints and password hashing.

use std::fmt;
use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::{Admin, Role};
use crate::observability::AUTH_FAILURES_TOTAL;

/// JWT payload. `exp` and `iat` are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Ulid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// The caller, decoded once at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Ulid,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingCredential,
    /// Bad structure, bad signature or wrong algorithm.
    InvalidCredential,
    Expired,
    Forbidden,
    Signing(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingCredential => write!(f, "missing bearer credential"),
            AuthError::InvalidCredential => write!(f, "invalid credential"),
            AuthError::Expired => write!(f, "credential expired"),
            AuthError::Forbidden => write!(f, "admin role required"),
            AuthError::Signing(e) => write!(f, "could not sign credential: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing",
            AuthError::InvalidCredential => "invalid",
            AuthError::Expired => "expired",
            AuthError::Forbidden => "forbidden",
            AuthError::Signing(_) => "signing",
        }
    }
}

/// Issues and checks HS256 tokens. Expiry is judged against the injected
/// clock rather than the system clock.
pub struct AccessGate {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl_secs: i64,
    clock: Arc<dyn Clock>,
}

impl AccessGate {
    pub fn new(secret: &[u8], token_ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            token_ttl_secs,
            clock,
        }
    }

    pub fn token_ttl_secs(&self) -> i64 {
        self.token_ttl_secs
    }

    fn now_secs(&self) -> i64 {
        self.clock.now_ms().div_euclid(1000)
    }

    pub fn issue(&self, admin: &Admin) -> Result<String, AuthError> {
        let iat = self.now_secs();
        let claims = Claims {
            sub: admin.id,
            role: admin.role,
            iat,
            exp: iat + self.token_ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let result = self.decode(token);
        if let Err(e) = &result {
            metrics::counter!(AUTH_FAILURES_TOTAL, "reason" => e.reason()).increment(1);
        }
        result
    }

    fn decode(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidCredential)?
            .claims;
        if self.now_secs() >= claims.exp {
            return Err(AuthError::Expired);
        }
        Ok(Principal {
            id: claims.sub,
            role: claims.role,
        })
    }

    /// Parse an `Authorization` header value (`Bearer <token>`) and verify it.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let value = header.ok_or(AuthError::MissingCredential)?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidCredential)?;
        self.verify(token)
    }
}

pub fn require_admin(principal: &Principal) -> Result<(), AuthError> {
    match principal.role {
        Role::Admin => Ok(()),
        Role::Other => {
            metrics::counter!(AUTH_FAILURES_TOTAL, "reason" => "forbidden").increment(1);
            Err(AuthError::Forbidden)
        }
    }
}

// ── Passwords ────────────────────────────────────────────────────

/// Argon2id PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)?;
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// False on mismatch and on an unparseable hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
