//! Command-line tool configuration.
//!
//! # Environment Variables
//!
//! - `BLINKTREE_DIRECTORY`: Directory holding the tree files (default: `./data`)
//! - `BLINKTREE_NAME`: Tree name used to derive the file names (default: `index`)
//!
//! # Invariants
//!
//! - `name` is non-empty and only contains ASCII letters, digits, `_` and `-`,
//!   so the derived file names stay inside `directory`

use std::path::PathBuf;

use crate::btree::FileSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Directory where the three tree files live.
    pub directory: PathBuf,
    /// Tree name. Files are `{name}_map_index.dat`, `{name}_map_key.dat`
    /// and `{name}_map_val.dat`.
    pub name: String,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl TreeConfig {
    pub const DEFAULT_DIRECTORY: &'static str = "./data";
    pub const DEFAULT_NAME: &'static str = "index";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BLINKTREE_NAME` is set to an empty or unsafe name.
    pub fn from_env() -> Result<Self, ConfigError> {
        let directory = std::env::var("BLINKTREE_DIRECTORY")
            .map_or_else(|_| PathBuf::from(Self::DEFAULT_DIRECTORY), PathBuf::from);
        let name = std::env::var("BLINKTREE_NAME")
            .unwrap_or_else(|_| Self::DEFAULT_NAME.to_string());
        Self::new(directory, name)
    }

    /// Build a validated configuration.
    pub fn new(directory: PathBuf, name: String) -> Result<Self, ConfigError> {
        Self::validate_name(&name)?;
        Ok(Self { directory, name })
    }

    fn validate_name(name: &str) -> Result<(), ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "BLINKTREE_NAME".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(ConfigError::InvalidValue {
                name: "BLINKTREE_NAME".to_string(),
                message: format!("'{name}' contains '{bad}'; use letters, digits, '_' or '-'"),
            });
        }
        Ok(())
    }

    /// The tree's file set.
    #[must_use]
    pub fn files(&self) -> FileSet {
        FileSet::named(&self.directory, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(TreeConfig::DEFAULT_DIRECTORY, "./data");
        assert_eq!(TreeConfig::DEFAULT_NAME, "index");
    }

    #[test]
    fn test_files_follow_naming_rule() {
        let config = TreeConfig::new(PathBuf::from("/srv"), "orders".to_string()).expect("valid");
        assert_eq!(
            config.files().map,
            PathBuf::from("/srv/orders_map_index.dat")
        );
    }

    #[test]
    fn test_rejects_empty_and_path_like_names() {
        assert!(TreeConfig::new(PathBuf::from("."), String::new()).is_err());

        let error = TreeConfig::new(PathBuf::from("."), "../etc".to_string())
            .expect_err("path separators are rejected");
        assert!(error.to_string().contains("BLINKTREE_NAME"));
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
