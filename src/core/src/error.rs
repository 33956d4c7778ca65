use thiserror::Error;

/// Errors produced while evaluating a build script.
#[derive(Error, Debug)]
pub enum BoxError {
    /// Script could not be parsed or names an unknown verb or function
    #[error("script error at line {line}: {message}")]
    Script { line: usize, message: String },

    /// A verb or function was invoked with bad arguments
    #[error("{name}: {message}")]
    Argument { name: String, message: String },

    /// A copy source or destination escapes its root
    #[error("path {path:?} escapes the working directory")]
    PathSafety { path: String },

    /// The engine rejected a call
    #[error("engine error: {0}")]
    Engine(String),

    /// Engine client transport error
    #[error("engine error: {0}")]
    EngineApi(#[from] bollard::errors::Error),

    /// A run command exited non-zero
    #[error("command exited with status {code}: {stderr}")]
    ExecFailure { code: i64, stderr: String },

    /// A reader function could not produce a value
    #[error("{0}")]
    Reader(String),

    /// Archive assembly failed
    #[error("archive error: {0}")]
    Archive(String),

    /// Builder state error
    #[error("{0}")]
    Build(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoxError {
    /// Shorthand for an argument error on `name`.
    pub fn argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        BoxError::Argument {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a script error at `line`.
    pub fn script(line: usize, message: impl Into<String>) -> Self {
        BoxError::Script {
            line,
            message: message.into(),
        }
    }
}

/// Result type alias for builder operations
pub type Result<T> = std::result::Result<T, BoxError>;
