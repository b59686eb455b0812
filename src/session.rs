use std::rc::Rc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::{Repository, CREDENTIALS_KEY, SESSION_KEY};
use crate::error::{AppError, Result, ValidationError};
use crate::models::{normalize_email, Role, User};
use crate::notify::Topic;

const DEFAULT_BIO: &str = "New author on the platform";

/// The authentication contract views depend on. A deployment picks one
/// implementation; the local one keeps credentials next to the records.
pub trait SessionBackend {
    fn sign_up(&self, form: Registration) -> Result<User>;

    fn sign_in(&self, email: &str, password: &str) -> Result<User>;

    fn sign_out(&self) -> Result<()>;

    /// The signed-in user's current profile, if any.
    fn current_user(&self) -> Result<Option<User>>;
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

impl Registration {
    pub fn validate(&self, min_password_length: usize) -> std::result::Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.email.trim().is_empty() {
            return Err(ValidationError::MissingField("email"));
        }
        if self.password.is_empty() {
            return Err(ValidationError::MissingField("password"));
        }
        if self.password != self.confirm_password {
            return Err(ValidationError::PasswordMismatch);
        }
        if self.password.chars().count() < min_password_length {
            return Err(ValidationError::PasswordTooShort {
                min: min_password_length,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Credential {
    email: String,
    salt: String,
    digest: String,
}

impl Credential {
    fn new(email: &str, password: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = digest(&salt, password);
        Self {
            email: normalize_email(email),
            salt,
            digest,
        }
    }

    fn matches(&self, password: &str) -> bool {
        digest(&self.salt, password) == self.digest
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Credential checks against the local store. The signed-in user is kept
/// under the `currentUser` key.
pub struct LocalSession {
    repository: Rc<Repository>,
    min_password_length: usize,
}

impl LocalSession {
    pub fn new(repository: Rc<Repository>, min_password_length: usize) -> Self {
        Self {
            repository,
            min_password_length,
        }
    }

    fn credentials(&self) -> Result<Vec<Credential>> {
        Ok(self
            .repository
            .read_slot(CREDENTIALS_KEY)?
            .unwrap_or_default())
    }

    fn store_credential(&self, credential: Credential) -> Result<()> {
        let mut credentials = self.credentials()?;
        credentials.retain(|c| c.email != credential.email);
        credentials.push(credential);
        self.repository.write_slot(CREDENTIALS_KEY, &credentials)
    }

    /// Sets or resets the password of an existing account.
    pub fn set_password(&self, email: &str, password: &str) -> Result<()> {
        if password.chars().count() < self.min_password_length {
            return Err(ValidationError::PasswordTooShort {
                min: self.min_password_length,
            }
            .into());
        }
        let users: Vec<User> = self.repository.list()?;
        let Some(user) = users.iter().find(|u| u.has_email(email)) else {
            return Err(AppError::NotFound {
                collection: "users",
                id: email.to_string(),
            });
        };

        self.store_credential(Credential::new(&user.email, password))?;
        tracing::info!("password set for {}", user.email);
        Ok(())
    }

    /// Whether a password was ever set for `email`.
    pub fn has_credential(&self, email: &str) -> Result<bool> {
        let email = normalize_email(email);
        Ok(self.credentials()?.iter().any(|c| c.email == email))
    }

    pub fn forget_credentials(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        let mut credentials = self.credentials()?;
        let before = credentials.len();
        credentials.retain(|c| c.email != email);
        if credentials.len() != before {
            self.repository.write_slot(CREDENTIALS_KEY, &credentials)?;
        }
        Ok(())
    }
}

impl SessionBackend for LocalSession {
    fn sign_up(&self, form: Registration) -> Result<User> {
        form.validate(self.min_password_length)?;

        let user = User {
            id: String::new(),
            email: form.email.trim().to_string(),
            name: form.name.trim().to_string(),
            role: Role::Author,
            avatar: form
                .avatar
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            bio: Some(
                form.bio
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .unwrap_or_else(|| DEFAULT_BIO.to_string()),
            ),
            joined_at: Utc::now(),
            is_active: true,
        };

        let id = self.repository.create(user.clone())?;
        self.store_credential(Credential::new(&user.email, &form.password))?;
        tracing::info!("registered {} as {}", user.email, id);

        Ok(User { id, ..user })
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        let users: Vec<User> = self.repository.list()?;
        let credentials = self.credentials()?;

        let user = users.into_iter().find(|u| u.has_email(email));
        let normalized = normalize_email(email);
        let credential = credentials.iter().find(|c| c.email == normalized);

        match (user, credential) {
            (Some(user), Some(credential)) if credential.matches(password) && user.is_active => {
                self.repository.write_slot(SESSION_KEY, &user)?;
                tracing::info!("{} signed in", user.email);
                self.repository.notifier().publish(Topic::SessionChanged);
                Ok(user)
            }
            _ => {
                tracing::debug!("rejected sign-in for {}", email);
                Err(AppError::AuthFailed)
            }
        }
    }

    fn sign_out(&self) -> Result<()> {
        self.repository.clear_slot(SESSION_KEY)?;
        tracing::info!("signed out");
        self.repository.notifier().publish(Topic::SessionChanged);
        Ok(())
    }

    fn current_user(&self) -> Result<Option<User>> {
        let Some(marker) = self.repository.read_slot::<User>(SESSION_KEY)? else {
            return Ok(None);
        };

        // Role and active flag may have changed since sign-in.
        match self.repository.get::<User>(&marker.id)? {
            Some(user) if user.is_active => Ok(Some(user)),
            _ => {
                tracing::info!("session for {} is no longer valid", marker.email);
                self.repository.clear_slot(SESSION_KEY)?;
                Ok(None)
            }
        }
    }
}
