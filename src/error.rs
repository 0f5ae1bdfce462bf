//! Library error type shared by the session lifecycle and persistence paths.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// `start()` was called while a session is already running.
    #[error("capture session already running")]
    AlreadyRunning,

    /// `stop()` was called with no session running.
    #[error("no capture session running")]
    NotRunning,

    /// The radio driver refused to enter or leave promiscuous mode.
    #[error("radio error: {0}")]
    Radio(String),

    /// File or thread creation failed (capture file open, worker spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The capture worker panicked; the session is torn down regardless.
    #[error("capture worker terminated abnormally")]
    WorkerPanic,

    /// Settings document could not be read or parsed.
    #[error("settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, Error>;
