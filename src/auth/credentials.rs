/// Credential Verifier
///
/// Checks an email/password pair against the stored bcrypt hash. An unknown
/// email and a wrong password produce the same `InvalidCredentials` error.

use std::sync::Arc;

use crate::auth::password::verify_password_blocking;
use crate::error::{AppError, AuthError};
use crate::store::{UserRecord, UserStore};
use crate::validators::normalize_email;

#[derive(Clone)]
pub struct CredentialVerifier {
    users: Arc<dyn UserStore>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    pub async fn verify(&self, email: &str, password: &str) -> Result<UserRecord, AppError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials.into());
        }

        let user = match self.users.find_by_email(&email).await? {
            Some(user) => user,
            None => return Err(AuthError::InvalidCredentials.into()),
        };

        match verify_password_blocking(password.to_string(), user.password_hash.clone()).await {
            Ok(true) => Ok(user),
            Ok(false) => Err(AuthError::InvalidCredentials.into()),
            Err(e) => {
                // a corrupt hash must not reveal that the account exists
                tracing::error!(user_id = %user.id, error = %e, "Stored password hash is unreadable");
                Err(AuthError::InvalidCredentials.into())
            }
        }
    }
}
