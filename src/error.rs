use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtackError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A program image was rejected while loading
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Verifier rejected {program}: {reason}")]
    VerifierRejection {
        program: String,
        reason: String,
        verifier_log: String,
    },

    #[error("Failed to load {program}: {reason}")]
    Generic { program: String, reason: String },
}

impl LoadError {
    pub fn program(&self) -> &str {
        match self {
            LoadError::VerifierRejection { program, .. } | LoadError::Generic { program, .. } => {
                program
            }
        }
    }

    /// Full verifier trace, only present for verifier rejections
    pub fn verifier_log(&self) -> Option<&str> {
        match self {
            LoadError::VerifierRejection { verifier_log, .. } => Some(verifier_log),
            LoadError::Generic { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
#[error("Failed to attach {target}: {reason}")]
pub struct AttachError {
    pub target: String,
    pub reason: String,
}

impl AttachError {
    pub fn new(target: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Failed to read kernel symbols: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("No kernel function found behind tracepoint {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ChannelError {
    /// The reader was closed, the normal way out of the read loop
    #[error("event channel closed")]
    Closed,

    #[error("Reading event channel: {0}")]
    Read(String),
}

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("netlink socket: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "kernel rejected request ({}): {}",
        errno_name(.errno),
        .message.as_deref().unwrap_or("no extended ack")
    )]
    Rejected { errno: i32, message: Option<String> },

    #[error("truncated netlink reply: {0}")]
    Truncated(String),
}

fn errno_name(errno: &i32) -> String {
    std::io::Error::from_raw_os_error(*errno).to_string()
}

pub type Result<T> = std::result::Result<T, ExtackError>;
