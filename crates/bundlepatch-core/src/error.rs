//! Error types for bundle export and patching.

use std::path::PathBuf;

/// Serializer failure.
///
/// The document serializer is a pure function of its input tree; the only
/// way it can fail is a managed reference registry it does not understand.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
    /// Registry version outside {1, 2}.
    #[error("registry version {version} not supported")]
    UnsupportedRegistryVersion { version: u32 },
}

/// Errors raised while exporting, importing or patching containers.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Serializer met a registry version it cannot read.
    #[error("registry version {version} not supported")]
    UnsupportedRegistryVersion { version: u32 },

    /// Target file or declared input path does not exist.
    #[error("input does not exist: {}", path.display())]
    MissingInput { path: PathBuf },

    /// All 10000 backup slots are taken.
    #[error("too many backups for {}, refusing to touch it", path.display())]
    BackupExhausted { path: PathBuf },

    /// A single container entry failed to load or parse.
    #[error("failed to load entry {entry}: {message}")]
    PerEntryLoad { entry: String, message: String },

    /// The original was moved to its backup slot but the rewritten image
    /// could not be moved into place.
    #[error(
        "failed to move {} into place ({message}); original is recoverable at {}",
        original.display(),
        backup.display()
    )]
    PartialSwap {
        original: PathBuf,
        backup: PathBuf,
        message: String,
    },

    /// Container codec rejected the input or failed to encode.
    #[error("container error: {message}")]
    Container { message: String },

    /// Filesystem error with context.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Installer package could not be read or applied.
    #[error("package error: {message}")]
    Package { message: String },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Type resolver could not interpret an entry.
    #[error("type resolution failed: {message}")]
    Resolve { message: String },
}

impl PatchError {
    /// Wrap an IO error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Shorthand for a codec error.
    pub fn container(message: impl Into<String>) -> Self {
        Self::Container {
            message: message.into(),
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Input / config issues
            Self::MissingInput { .. } => 1,
            Self::Config { .. } => 1,
            Self::Package { .. } => 1,

            // Refused before any destructive action
            Self::BackupExhausted { .. } => 3,

            // Operator must recover by hand
            Self::PartialSwap { .. } => 4,

            // Content problems
            Self::UnsupportedRegistryVersion { .. } => 5,
            Self::PerEntryLoad { .. } => 5,
            Self::Container { .. } => 5,
            Self::Resolve { .. } => 5,

            Self::Io { .. } => 6,
        }
    }

    /// Whether a batch driver may continue with the next file.
    ///
    /// Backup exhaustion and a half-finished swap stop the whole batch.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::BackupExhausted { .. } | Self::PartialSwap { .. })
    }
}

impl From<SerializeError> for PatchError {
    fn from(err: SerializeError) -> Self {
        match err {
            SerializeError::UnsupportedRegistryVersion { version } => {
                Self::UnsupportedRegistryVersion { version }
            }
        }
    }
}

/// Result type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_error_converts() {
        let err: PatchError = SerializeError::UnsupportedRegistryVersion { version: 3 }.into();
        assert!(matches!(
            err,
            PatchError::UnsupportedRegistryVersion { version: 3 }
        ));
        assert_eq!(err.to_string(), "registry version 3 not supported");
    }

    #[test]
    fn test_destructive_errors_stop_batch() {
        let exhausted = PatchError::BackupExhausted {
            path: PathBuf::from("a.bundle"),
        };
        let partial = PatchError::PartialSwap {
            original: PathBuf::from("a.bundle"),
            backup: PathBuf::from("a.bundle.bak0000"),
            message: "denied".into(),
        };
        let missing = PatchError::MissingInput {
            path: PathBuf::from("gone"),
        };

        assert!(!exhausted.is_recoverable());
        assert!(!partial.is_recoverable());
        assert!(missing.is_recoverable());
        assert!(partial.to_string().contains("a.bundle.bak0000"));
    }
}
