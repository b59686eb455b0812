use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("{collection} record not found: {id}")]
    NotFound { collection: &'static str, id: String },

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid email or password")]
    AuthFailed,

    #[error("Not permitted: {0}")]
    Forbidden(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// User-correctable input problems. The message is shown as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("Email is already registered: {0}")]
    EmailTaken(String),

    #[error("A record with id {0} already exists")]
    DuplicateId(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
