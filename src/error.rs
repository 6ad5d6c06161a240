use std::fmt;

pub type DiagResult<T> = Result<T, DiagError>;

pub const EXIT_OK: i32 = 0;
pub const EXIT_NO_GO: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_STOP: i32 = 3;

#[macro_export]
macro_rules! diag_eprintln {
    ($($arg:tt)*) => {
        eprintln!("diagrs: {}", format_args!($($arg)*))
    };
}

#[derive(Debug)]
pub enum DiagError {
    Io {
        context: String,
        source: std::io::Error,
    },
    JsonParse {
        context: String,
        source: serde_json::Error,
    },
    /// Operational fault: the run cannot produce trustworthy observations.
    Stop {
        context: String,
    },
    InvalidData {
        context: String,
    },
}

impl DiagError {
    pub fn invalid(context: impl Into<String>) -> Self {
        DiagError::InvalidData {
            context: context.into(),
        }
    }

    pub fn stop(context: impl Into<String>) -> Self {
        DiagError::Stop {
            context: context.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DiagError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        DiagError::JsonParse {
            context: context.into(),
            source,
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, DiagError::Stop { .. })
    }
}

impl fmt::Display for DiagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagError::Io { context, source } => write!(f, "{context}: {source}"),
            DiagError::JsonParse { context, source } => write!(f, "{context}: {source}"),
            DiagError::Stop { context } => write!(f, "STOP: {context}"),
            DiagError::InvalidData { context } => write!(f, "{context}"),
        }
    }
}

impl std::error::Error for DiagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiagError::Io { source, .. } => Some(source),
            DiagError::JsonParse { source, .. } => Some(source),
            DiagError::Stop { .. } | DiagError::InvalidData { .. } => None,
        }
    }
}

pub fn print_usage_error(command: &str, usage: &str) -> i32 {
    diag_eprintln!("{command}: invalid arguments");
    eprintln!("Usage: {usage}");
    EXIT_USAGE
}

/// Exit code for a stage error surfaced by a standalone command.
pub fn exit_code_for(err: &DiagError) -> i32 {
    if err.is_stop() { EXIT_STOP } else { EXIT_NO_GO }
}
