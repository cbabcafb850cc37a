use std::fmt;

/// Machine-readable error codes for structural failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    UnknownBot,
    DuplicateBot,
    InvalidChangeScript,
    InternalUnexpected,
}

impl ErrorCode {
    /// The `E####` identifier.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::UnknownBot => "E2001",
            Self::DuplicateBot => "E2002",
            Self::InvalidChangeScript => "E3001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// One-line description of the failure.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Could not parse the config file",
            Self::UnknownBot => "Bot not found",
            Self::DuplicateBot => "Bot already exists",
            Self::InvalidChangeScript => "Invalid change script entry",
            Self::InternalUnexpected => "Unexpected internal failure",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .botcalc/config.toml and retry."),
            Self::UnknownBot => Some("Add the bot before updating or removing it."),
            Self::DuplicateBot => Some("Remove the existing bot first, or send an update instead."),
            Self::InvalidChangeScript => {
                Some("Each line must be an object with an \"op\" of add, remove, or update.")
            }
            Self::InternalUnexpected => Some("Rerun with --verbose and report the log output."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Structural errors
// ---------------------------------------------------------------------------

/// A broken invariant in a batch request. Batches that fail with this error
/// leave the manager untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrecalcError {
    #[error("bot not found: {0}")]
    UnknownBot(String),
    #[error("bot already exists: {0}")]
    DuplicateBot(String),
    #[error("invalid change on line {line}: {reason}")]
    InvalidChange { line: usize, reason: String },
}

impl PrecalcError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownBot(_) => ErrorCode::UnknownBot,
            Self::DuplicateBot(_) => ErrorCode::DuplicateBot,
            Self::InvalidChange { .. } => ErrorCode::InvalidChangeScript,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation errors
// ---------------------------------------------------------------------------

/// Category of a formula evaluation failure; rendered as the error name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The formula text does not parse.
    Syntax,
    /// An operation was applied to a value of the wrong type.
    Type,
    /// An unknown identifier was referenced.
    Reference,
    /// Depth or step limits were exceeded.
    Range,
    /// A formula read its own value, directly or through other tags.
    Cycle,
    /// Any other failure raised by a library call.
    Generic,
}

impl ErrorKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Syntax => "SyntaxError",
            Self::Type => "TypeError",
            Self::Reference => "ReferenceError",
            Self::Range => "RangeError",
            Self::Cycle => "CycleError",
            Self::Generic => "Error",
        }
    }
}

/// A failure raised while evaluating user-authored formula text.
///
/// Never propagated out of a batch: it becomes data in the computed
/// values as `"<ErrorName>: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {message}", .kind.name())]
pub struct EvalError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EvalError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    #[must_use]
    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reference, message)
    }

    #[must_use]
    pub fn range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Range, message)
    }

    #[must_use]
    pub fn cycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cycle, message)
    }

    /// Returns `true` when the formula never got as far as running.
    #[must_use]
    pub const fn is_syntax(&self) -> bool {
        matches!(self.kind, ErrorKind::Syntax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::UnknownBot,
            ErrorCode::DuplicateBot,
            ErrorCode::InvalidChangeScript,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn eval_errors_render_with_name_prefix() {
        assert_eq!(
            EvalError::type_error("x is not a function").to_string(),
            "TypeError: x is not a function"
        );
        assert_eq!(EvalError::new(ErrorKind::Generic, "boom").to_string(), "Error: boom");
    }

    #[test]
    fn precalc_errors_map_to_codes() {
        assert_eq!(PrecalcError::UnknownBot("a".into()).code().code(), "E2001");
        assert_eq!(
            PrecalcError::DuplicateBot("a".into()).to_string(),
            "bot already exists: a"
        );
    }
}
