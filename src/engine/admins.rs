use rand::Rng;
use rand::rngs::OsRng;
use tracing::{debug, info};

use crate::auth::{hash_password, verify_password};
use crate::limits::*;
use crate::model::*;
use crate::observability::AUTH_FAILURES_TOTAL;

use super::mutations::validate_email;
use super::{Engine, EngineError};

fn validate_password(password: &str) -> Result<(), EngineError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(EngineError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(EngineError::LimitExceeded("password too long"));
    }
    Ok(())
}

/// Argon2 is deliberately slow; keep it off the async workers.
async fn hash_off_thread(password: String) -> Result<String, EngineError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?
        .map_err(|e| EngineError::Internal(e.to_string()))
}

async fn verify_off_thread(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false)
}

fn mint_otp() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

impl Engine {
    pub async fn register_admin(
        &self,
        username: String,
        email: String,
        password: String,
    ) -> Result<Admin, EngineError> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(EngineError::Validation("username is required".into()));
        }
        if username.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("username too long"));
        }
        validate_email(&email)?;
        validate_password(&password)?;
        let password_hash = hash_off_thread(password).await?;

        let _commit = self.begin_commit().await;
        let _catalog = self.catalog.lock().await;
        if self.store.admin_count() >= MAX_ADMINS {
            return Err(EngineError::LimitExceeded("too many admins"));
        }
        if self.store.admin_by_username(&username).is_some() {
            return Err(EngineError::AlreadyExists(format!("username {username}")));
        }
        if self.store.admin_by_email(&email).is_some() {
            return Err(EngineError::AlreadyExists(format!("email {email}")));
        }
        let admin = Admin {
            id: self.next_id(),
            username,
            email,
            password_hash,
            role: Role::Admin,
            reset: None,
        };
        self.persist_and_apply(
            &Event::AdminRegistered {
                admin: admin.clone(),
            },
            &mut [],
        )
        .await?;
        info!(admin = %admin.id, username = %admin.username, "admin registered");
        Ok(admin)
    }

    /// Unknown user and wrong password are indistinguishable to the caller.
    pub async fn login(&self, username: &str, password: &str) -> Result<Admin, EngineError> {
        let Some(admin) = self.store.admin_by_username(username.trim()) else {
            metrics::counter!(AUTH_FAILURES_TOTAL, "reason" => "credentials").increment(1);
            return Err(EngineError::InvalidCredentials);
        };
        if !verify_off_thread(password.to_string(), admin.password_hash.clone()).await {
            metrics::counter!(AUTH_FAILURES_TOTAL, "reason" => "credentials").increment(1);
            return Err(EngineError::InvalidCredentials);
        }
        Ok(admin)
    }

    /// Issue a reset code when the address belongs to an admin. Succeeds
    /// either way so callers learn nothing about which accounts exist.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), EngineError> {
        let _commit = self.begin_commit().await;
        let _catalog = self.catalog.lock().await;
        let Some(admin) = self.store.admin_by_email(email.trim()) else {
            debug!("password reset requested for unknown address");
            return Ok(());
        };
        let otp = ResetOtp {
            code: mint_otp(),
            expires_at: self.now() + RESET_OTP_TTL_MS,
        };
        self.persist_and_apply(
            &Event::ResetOtpIssued {
                admin_id: admin.id,
                otp: otp.clone(),
            },
            &mut [],
        )
        .await?;
        self.notify
            .password_reset(&admin.email, &otp.code, otp.expires_at);
        info!(admin = %admin.id, "password reset code issued");
        Ok(())
    }

    /// Unknown address, wrong code and expired code all yield `InvalidOtp`.
    pub async fn reset_password(
        &self,
        email: &str,
        otp: &str,
        new_password: String,
    ) -> Result<(), EngineError> {
        validate_password(&new_password)?;
        let password_hash = hash_off_thread(new_password).await?;

        let _commit = self.begin_commit().await;
        let _catalog = self.catalog.lock().await;
        let admin = self
            .store
            .admin_by_email(email.trim())
            .ok_or(EngineError::InvalidOtp)?;
        let valid = admin
            .reset
            .as_ref()
            .is_some_and(|r| r.code == otp.trim() && self.now() <= r.expires_at);
        if !valid {
            metrics::counter!(AUTH_FAILURES_TOTAL, "reason" => "otp").increment(1);
            return Err(EngineError::InvalidOtp);
        }
        self.persist_and_apply(
            &Event::PasswordReset {
                admin_id: admin.id,
                password_hash,
            },
            &mut [],
        )
        .await?;
        info!(admin = %admin.id, "password reset");
        Ok(())
    }

    /// Register the first admin when none exists yet.
    pub async fn bootstrap_admin(
        &self,
        username: String,
        email: String,
        password: String,
    ) -> Result<Option<Admin>, EngineError> {
        if self.store.admin_count() > 0 {
            return Ok(None);
        }
        self.register_admin(username, email, password).await.map(Some)
    }
}
