use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link is closed")]
    Closed,

    #[error("State index {0} out of range")]
    InvalidState(usize),

    #[error("Edge ({0}, {1}) out of range")]
    InvalidEdge(usize, usize),

    #[error("Condition graph must keep at least one state")]
    EmptyGraph,

    #[error("Control channel error: {0}")]
    Control(String),

    #[error("Transport I/O error: {0}")]
    Transport(#[from] std::io::Error),
}
