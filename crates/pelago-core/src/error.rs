use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while publishing
/// dataset archives. It uses the `thiserror` crate for ergonomic error
/// handling and automatic conversion from underlying library errors.
///
/// # Error Conversion
///
/// Carrier variants convert from their source types using `#[from]`:
/// - `std::io::Error` → `PublishError::Io`
/// - `zip::result::ZipError` → `PublishError::Zip`
/// - `toml::de::Error` → `PublishError::ConfigParse`
#[derive(Error, Debug)]
pub enum PublishError {
    /// A required directory or endpoint is missing before any archive is
    /// touched. Fatal: aborts the whole run immediately.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A registered archive path does not exist. Detected at registration,
    /// before any pipeline work begins.
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),

    /// The remote status endpoint never reported ready within the caller's
    /// deadline. Recoverable: the caller decides retry vs. abort.
    #[error("Import not available after waiting {waited_secs} seconds")]
    ImportNotAvailable { waited_secs: u64 },

    /// A transform or validator step failed. Isolated to the current
    /// archive; the batch continues.
    #[error("Pipeline error in '{archive}': {message}")]
    Pipeline { archive: String, message: String },

    /// The unpacked archive is malformed (missing delivery note, missing
    /// data file, bad layout).
    #[error("Invalid archive '{archive}': {message}")]
    Archive { archive: String, message: String },

    /// HTTP request against the trigger or status endpoint failed at the
    /// transport level. Never swallowed.
    #[error("Remote API error: {0}")]
    Client(String),

    /// Trigger or status URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Filesystem failure against a sync destination. Fatal to the
    /// remaining run: a half-applied upsert must not be followed by more
    /// writes.
    #[error("Sync error against '{destination}': {source}")]
    Sync {
        destination: String,
        #[source]
        source: std::io::Error,
    },

    /// Archive-local filesystem operation failed. Isolated to the current
    /// archive like any other pipeline failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip container could not be read or written.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Environments file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl PublishError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            PublishError::Configuration(msg) => {
                format!("Configuration problem: {msg}\n   Check your environments file.")
            }
            PublishError::NotFound(path) => {
                format!(
                    "Archive does not exist: {}\n   Check the path and try again.",
                    path.display()
                )
            }
            PublishError::ImportNotAvailable { waited_secs } => {
                format!(
                    "The import API never reported AVAILABLE within {waited_secs} seconds.\n   The remote importer may be busy. Try again later."
                )
            }
            PublishError::Client(msg) => {
                if msg.contains("timeout") || msg.contains("timed out") {
                    "Request timed out. The import API may be slow or unreachable.".to_string()
                } else if msg.contains("connect") {
                    format!("Cannot reach the import API: {msg}\n   Check the trigger/status URLs.")
                } else {
                    format!("API error: {msg}")
                }
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error aborts the whole run rather than just the
    /// current archive.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PublishError::Configuration(_)
                | PublishError::Sync { .. }
                | PublishError::ConfigParse(_)
        )
    }
}
