use std::fmt;

use sigil::parser::ParseError;

/// An expression evaluation failure.
///
/// `Message` failures are wrapped with `(file:line)` provenance at the
/// per-instruction boundary; `Engine` failures come out of a macro expansion
/// or inline inclusion already carrying their own provenance and propagate
/// unchanged.
#[derive(Debug)]
pub enum EvalError {
    Message(String),
    Engine(Box<EngineError>),
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        EvalError::Message(message.into())
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Message(message) => write!(f, "{}", message),
            EvalError::Engine(inner) => inner.fmt(f),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<EngineError> for EvalError {
    fn from(error: EngineError) -> Self {
        EvalError::Engine(Box::new(error))
    }
}

/// Source reader failures.
#[derive(Debug)]
pub enum ReadError {
    /// The reference matched no registered reader.
    Unsupported { reference: String },
    NotFound { reference: String, detail: String },
    Io { reference: String, detail: String },
    /// Remote returned a non-success HTTP status.
    Status { reference: String, status: u16 },
    Timeout { reference: String, seconds: u64 },
    RateLimited { reference: String },
    TooLarge { reference: String, limit: u64 },
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Unsupported { reference } => {
                write!(f, "Source \"{}\" is not supported", reference)
            }
            ReadError::NotFound { reference, detail } => {
                write!(f, "Cannot read \"{}\": {}", reference, detail)
            }
            ReadError::Io { reference, detail } => {
                write!(f, "Cannot read \"{}\": {}", reference, detail)
            }
            ReadError::Status { reference, status } => {
                write!(f, "Remote returned status {} for \"{}\"", status, reference)
            }
            ReadError::Timeout { reference, seconds } => {
                write!(f, "Timed out after {}s reading \"{}\"", seconds, reference)
            }
            ReadError::RateLimited { reference } => {
                write!(f, "Rate limit exceeded reading \"{}\"", reference)
            }
            ReadError::TooLarge { reference, limit } => {
                write!(f, "Response for \"{}\" exceeds {} bytes", reference, limit)
            }
        }
    }
}

impl std::error::Error for ReadError {}

/// Fatal errors surfaced from `Machine::execute`. No error is recovered by
/// the engine.
#[derive(Debug)]
pub enum EngineError {
    /// Malformed directive or expression syntax.
    Parse(ParseError),
    /// Expression failure enriched with file:line at the machine boundary.
    ExpressionEvaluation {
        message: String,
        file: String,
        line: usize,
    },
    /// Reader failure enriched with file:line at the machine boundary.
    SourceInclusion {
        message: String,
        file: String,
        line: usize,
    },
    /// Macro redeclaration, citing both the original and the duplicate site.
    MacroAlreadyDeclared {
        name: String,
        original_file: String,
        original_line: usize,
        file: String,
        line: usize,
    },
    /// `@error` directive; the message is the evaluated operand verbatim.
    UserDefined { message: String },
    /// Execution nesting exceeded the limit, citing the deepest file:line.
    MaxExecutionDepthReached { file: String, line: usize },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Parse(e) => e.fmt(f),
            EngineError::ExpressionEvaluation {
                message,
                file,
                line,
            }
            | EngineError::SourceInclusion {
                message,
                file,
                line,
            } => {
                write!(f, "{} ({}:{})", message, file, line)
            }
            EngineError::MacroAlreadyDeclared {
                name,
                original_file,
                original_line,
                file,
                line,
            } => {
                write!(
                    f,
                    "Macro \"{}\" is already declared in {}:{} ({}:{})",
                    name, original_file, original_line, file, line
                )
            }
            EngineError::UserDefined { message } => write!(f, "{}", message),
            EngineError::MaxExecutionDepthReached { file, line } => {
                write!(
                    f,
                    "Maximum execution depth reached, possible cyclic reference ({}:{})",
                    file, line
                )
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ParseError> for EngineError {
    fn from(error: ParseError) -> Self {
        EngineError::Parse(error)
    }
}

/// A non-fatal diagnostic produced by `@warning`, collected out-of-band.
#[derive(Debug, Clone)]
pub struct EngineWarning {
    pub message: String,
    pub file: String,
    pub line: usize,
}

impl fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.file, self.line)
    }
}
