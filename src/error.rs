use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error categories surfaced by the engine. `Config` and `Range` come out
/// of the build/run surface, `Io`/`Format` out of file loading, and
/// `Logic` marks a broken internal invariant (a bug, not a user error).
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("out of range: {0}")]
    Range(String),

    #[error("i/o error on {}: {}", path.display(), source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("format error at line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("internal invariant broken: {0}")]
    Logic(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn format(line: usize, message: impl Into<String>) -> Self {
        Error::Format {
            line,
            message: message.into(),
        }
    }

    /// Fold a csv-crate error into the taxonomy, keeping the file path.
    pub(crate) fn from_csv(path: &Path, err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(source) => Error::io(path, source),
            other => Error::Format {
                line: 0,
                message: format!("{:?}", other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = Error::io("/tmp/missing.txt", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.to_string().contains("/tmp/missing.txt"));

        let err = Error::format(12, "bad token");
        assert!(err.to_string().contains("line 12"));
    }
}
