//! Errors for the config crate.

/// Errors that can occur while loading or validating the static scheduler configuration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to read the configuration file from disk.
    #[error("failed to read configuration file {path}: {source}")]
    FileReadError {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as YAML.
    #[error("failed to parse configuration file {path}: {source}")]
    DeserializationError {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A collection of validation errors found in an otherwise well-formed configuration.
    #[error("invalid configuration ({} issue(s)): {}", issues.len(), issues.join("; "))]
    InvalidConfiguration {
        /// Human-readable description of each issue found.
        issues: Vec<String>,
    },
}
