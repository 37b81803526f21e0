//! Error types for spamsub-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.spamsub/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}; run `spamsub init` first")]
    ConfigNotFound { path: PathBuf },

    /// A field holds a value the engine cannot work with.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A submitted address failed the shape check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("You have to enter an address.")]
    Empty,

    /// The submission still carries a mailbox name before the `@`.
    #[error("'{input}' includes a local part; enter everything after the \"@\" sign, with no spaces (e.g. enterprise-weasels.co.uk)")]
    LocalPart { input: String },

    #[error("'{input}' is not a domain; enter everything after the \"@\" sign, with no spaces (e.g. enterprise-weasels.co.uk)")]
    Malformed { input: String },

    /// The built-in pattern failed to compile.
    #[error("address pattern error: {0}")]
    Pattern(String),
}
