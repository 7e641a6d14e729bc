// Crate-wide error type. Torn seqlock reads and "no new frame" are NOT
// errors — the vision reader returns Option for those; this enum covers
// the conditions that need a policy decision (retry, skip, or abort).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SoulError {
    /// The vision shared-memory segment could not be attached within the
    /// connect timeout. Fatal for the coordinator.
    #[error("vision shared memory '{0}' not available")]
    IpcUnavailable(String),

    /// A metadata document failed to parse. The package is skipped.
    #[error("invalid metadata in {path}: {reason}")]
    MetadataInvalid { path: PathBuf, reason: String },

    /// A media path resolved outside its package directory.
    #[error("media path escapes package directory: {0}")]
    PathEscape(PathBuf),

    /// An audio asset could not be decoded. The triggering command is dropped.
    #[error("cannot load audio file {path}: {reason}")]
    AudioLoadFailed { path: PathBuf, reason: String },

    /// The audio output device could not be opened. The audio engine exits.
    #[error("audio device failed to open: {0}")]
    DeviceOpenFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
