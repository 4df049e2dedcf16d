use thiserror::Error;

use vindkanal_core::LinkError;

#[derive(Debug, Error)]
pub enum MgmtError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid argument: {0}")]
    BadArgument(String),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MgmtError {
    /// Numeric reply code for the line protocol; `1000` is success.
    pub fn code(&self) -> u16 {
        match self {
            MgmtError::UnknownCommand(_) => 1038,
            MgmtError::BadArgument(_) => 1022,
            MgmtError::Link(_) => 1022,
            MgmtError::Io(_) => 1005,
        }
    }
}
