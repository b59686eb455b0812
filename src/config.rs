use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::Category;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Seed empty collections with the bundled demo users and posts.
    #[serde(default = "default_true")]
    pub seed_defaults: bool,

    #[serde(default = "default_excerpt_length")]
    pub excerpt_length: usize,

    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    #[serde(default = "default_category")]
    pub default_category: String,

    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("folio.db").to_string_lossy().to_string()
}

fn default_true() -> bool {
    true
}

fn default_excerpt_length() -> usize {
    150
}

fn default_min_password_length() -> usize {
    6
}

fn default_category() -> String {
    "General".to_string()
}

fn default_categories() -> Vec<Category> {
    vec![
        Category::new("1", "Literature", "Articles about literature, books and writers"),
        Category::new("2", "Culture", "Cultural content and events"),
        Category::new("3", "Technology", "Technological innovations and trends"),
        Category::new("4", "Society", "Social commentary and analysis"),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            seed_defaults: default_true(),
            excerpt_length: default_excerpt_length(),
            min_password_length: default_min_password_length(),
            default_category: default_category(),
            categories: default_categories(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Reads `path`, or writes the defaults there when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.excerpt_length == 0 {
            return Err(AppError::Config("excerpt_length must be positive".to_string()));
        }
        if self.db_path.trim().is_empty() {
            return Err(AppError::Config("db_path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("folio")
            .join("config.toml")
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            seed_defaults: true,
            excerpt_length: default_excerpt_length(),
            min_password_length: default_min_password_length(),
            default_category: default_category(),
            categories: default_categories(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.excerpt_length, 150);
        assert_eq!(config.categories.len(), 4);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.db_path, config.db_path);
        assert_eq!(reloaded.categories, config.categories);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
db_path = "/tmp/blog.db"
seed_defaults = false

[[categories]]
id = "7"
name = "Local History"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.db_path, "/tmp/blog.db");
        assert!(!config.seed_defaults);
        assert_eq!(config.min_password_length, 6);
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].name, "Local History");
        assert_eq!(config.categories[0].slug, "");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "excerpt_length = 0\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(AppError::Config(_))));

        std::fs::write(&path, "excerpt_length = \"long\"\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(AppError::ConfigParse(_))));
    }
}
