use std::ffi::NulError;

/// Setup failures. None of these reach the user: every caller turns them
/// into a fallback to direct execution or a debug trace.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("receiver has no stdin pipe")]
    NoPipe,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("argument contains a NUL byte: {0}")]
    Nul(#[from] NulError),
    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),
    #[error("cannot install handler for {signal}: {source}")]
    Signal {
        signal: nix::sys::signal::Signal,
        #[source]
        source: nix::Error,
    },
}

pub type Result<T> = std::result::Result<T, LayerError>;
