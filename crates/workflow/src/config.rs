//! Engine configuration.
//!
//! Every key is optional; unknown keys are rejected.
//!
//! # Example
//!
//! ```toml
//! activity_failure = "fail"
//! clone_suffix = "_COPY"
//! max_name_length = 255
//! cascade_single_review_delete = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How many numbered clone names are tried before giving up.
pub(crate) const MAX_CLONE_ATTEMPTS: u32 = 1000;

// ── Types ─────────────────────────────────────────────────────────────────────

/// What happens when the activity sink rejects an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityFailurePolicy {
    /// Record after commit; a sink failure is logged and the change stands.
    #[default]
    Log,
    /// Record before commit; a sink failure aborts the change.
    Fail,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    pub activity_failure: ActivityFailurePolicy,
    /// Appended to a review's name when it is cloned.
    pub clone_suffix: String,
    /// Upper bound, in characters, for review and baseline names.
    pub max_name_length: usize,
    /// Whether deleting a single review also removes its review-cases and
    /// their audit records.
    pub cascade_single_review_delete: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            activity_failure: ActivityFailurePolicy::Log,
            clone_suffix: "_COPY".to_string(),
            max_name_length: 255,
            cascade_single_review_delete: false,
        }
    }
}

/// Errors raised while loading a [`WorkflowConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Functions ─────────────────────────────────────────────────────────────────

impl WorkflowConfig {
    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WorkflowConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_name_length == 0 {
            return Err(ConfigError::Invalid(
                "max_name_length must be at least 1".to_string(),
            ));
        }
        if self.clone_suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "clone_suffix must not be empty".to_string(),
            ));
        }
        // The longest clone tail is `<suffix>_<MAX_CLONE_ATTEMPTS>`.
        let tail = self.clone_suffix.chars().count() + MAX_CLONE_ATTEMPTS.to_string().len() + 1;
        if tail > self.max_name_length {
            return Err(ConfigError::Invalid(format!(
                "clone_suffix '{}' leaves no room for a clone counter within max_name_length {}",
                self.clone_suffix, self.max_name_length
            )));
        }
        Ok(())
    }
}

/// Read, parse and validate a configuration file from `path`.
pub fn read_config(path: &Path) -> Result<WorkflowConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: WorkflowConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_gives_defaults() {
        let config = WorkflowConfig::from_toml_str("").unwrap();
        assert_eq!(config, WorkflowConfig::default());
        assert_eq!(config.activity_failure, ActivityFailurePolicy::Log);
        assert_eq!(config.clone_suffix, "_COPY");
        assert_eq!(config.max_name_length, 255);
        assert!(!config.cascade_single_review_delete);
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = WorkflowConfig::from_toml_str(
            "activity_failure = \"fail\"\ncascade_single_review_delete = true\n",
        )
        .unwrap();
        assert_eq!(config.activity_failure, ActivityFailurePolicy::Fail);
        assert!(config.cascade_single_review_delete);
        assert_eq!(config.clone_suffix, "_COPY");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = WorkflowConfig::from_toml_str("retry_count = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("retry_count"));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = WorkflowConfig::from_toml_str("activity_failure = \"ignore\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn zero_name_length_is_invalid() {
        let err = WorkflowConfig::from_toml_str("max_name_length = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn suffix_without_room_for_a_counter_is_invalid() {
        let err = WorkflowConfig::from_toml_str("clone_suffix = \"_COPY\"\nmax_name_length = 5\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("_COPY"));

        let err = WorkflowConfig::from_toml_str("clone_suffix = \"_COPY\"\nmax_name_length = 9\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config =
            WorkflowConfig::from_toml_str("clone_suffix = \"_COPY\"\nmax_name_length = 10\n")
                .unwrap();
        assert_eq!(config.max_name_length, 10);
    }

    #[test]
    fn reads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clone_suffix = \"-copy\"").unwrap();
        writeln!(file, "max_name_length = 40").unwrap();

        let config = read_config(file.path()).unwrap();
        assert_eq!(config.clone_suffix, "-copy");
        assert_eq!(config.max_name_length, 40);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = read_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }
}
