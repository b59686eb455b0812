use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Editor,
    #[default]
    Author,
    Reader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Editor => "editor",
            Role::Author => "author",
            Role::Reader => "reader",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "super_admin" | "admin" => Ok(Role::SuperAdmin),
            "editor" => Ok(Role::Editor),
            "author" => Ok(Role::Author),
            "reader" => Ok(Role::Reader),
            other => Err(ValidationError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub is_active: bool,
}

/// The form emails are compared in, for records and credentials alike.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl User {
    /// Email comparison used for login and uniqueness checks.
    pub fn has_email(&self, email: &str) -> bool {
        normalize_email(&self.email) == normalize_email(email)
    }
}

/// Profile fields a user may change about themselves.
#[derive(Debug, Clone, Default)]
pub struct ProfileEdit {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileEdit {
    pub fn apply_to(self, user: &mut User) {
        if let Some(name) = self.name.filter(|n| !n.trim().is_empty()) {
            user.name = name.trim().to_string();
        }
        if let Some(bio) = self.bio {
            user.bio = Some(bio.trim().to_string()).filter(|b| !b.is_empty());
        }
        if let Some(avatar) = self.avatar {
            user.avatar = Some(avatar.trim().to_string()).filter(|a| !a.is_empty());
        }
    }
}
