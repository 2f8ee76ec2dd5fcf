use tt_core::TermError;
use tt_interpreters::InterpretError;

#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    Term(TermError),
    Interpret(InterpretError),
    Config { detail: String },
    UnknownBackend { name: String },
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Term(err) => write!(f, "{err}"),
            Self::Interpret(err) => write!(f, "{err}"),
            Self::Config { detail } => write!(f, "invalid engine configuration: {detail}"),
            Self::UnknownBackend { name } => write!(f, "unknown backend `{name}`"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<TermError> for ApiError {
    fn from(value: TermError) -> Self {
        Self::Term(value)
    }
}

impl From<InterpretError> for ApiError {
    fn from(value: InterpretError) -> Self {
        match value {
            InterpretError::Term(err) => Self::Term(err),
            other => Self::Interpret(other),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        Self::Config {
            detail: value.to_string(),
        }
    }
}
