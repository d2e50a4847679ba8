use std::{fmt::Display, path::PathBuf};

/// Failure to read or write the state file.
#[derive(Debug)]
pub enum PersistenceError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is there but does not hold a link map.
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    Encode(serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "could not access {}: {}", path.display(), source)
            }
            Self::Corrupt { path, source } => {
                write!(f, "state file {} is not valid: {}", path.display(), source)
            }
            Self::Encode(source) => write!(f, "could not encode links: {}", source),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Corrupt { source, .. } => Some(source),
            Self::Encode(source) => Some(source),
        }
    }
}

/// Something a user asked for that can't be done.
/// The `Display` output is sent back to them as is.
#[derive(Debug)]
pub enum CommandError {
    NotFound(String),
    NoLinksQueued,
    NotText,
    Persistence(PersistenceError),
}

impl From<PersistenceError> for CommandError {
    fn from(value: PersistenceError) -> Self {
        Self::Persistence(value)
    }
}

impl Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) if id.is_empty() => write!(f, "No link ID was given"),
            Self::NotFound(id) => write!(f, "Link {} was not found", id),
            Self::NoLinksQueued => write!(f, "No links in the queue"),
            Self::NotText => write!(f, "Only text messages are supported"),
            Self::Persistence(e) => write!(f, "Could not save the state: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Persistence(e) => Some(e),
            _ => None,
        }
    }
}
