use thiserror::Error;

/// Reasons an engine backend refuses to construct an instance.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("canvas target `{0}` is not known to the host")]
    UnknownCanvas(String),
    #[error("canvas target `{0}` is already bound to a live instance")]
    CanvasInUse(String),
    #[error("invalid canvas size {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("invalid background color `{0}`")]
    InvalidBackground(String),
    #[error("frame rate must be positive")]
    InvalidFrameRate,
    #[error("failed to spawn scene loop")]
    Spawn(#[from] std::io::Error),
    #[error("scene failed to boot: {0}")]
    Boot(String),
}

/// Errors crossing the session manager boundary.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to construct game engine for canvas `{canvas}`")]
    EngineConstruction {
        canvas: String,
        #[source]
        source: EngineError,
    },
}

impl SessionError {
    /// The engine failure behind this error.
    pub fn engine_error(&self) -> &EngineError {
        match self {
            SessionError::EngineConstruction { source, .. } => source,
        }
    }
}
