//! Shared primitives used across xtile crates.

use core::fmt;

/// Result alias used across the workspace.
pub type TileResult<T> = Result<T, TileError>;

/// Failure families surfaced by the fetch/import pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The fetch itself failed (network, status, decoding).
    Transport,
    /// Response content was neither valid XHTML nor accepted as HTML.
    MalformedContent,
    /// A configured container id had no match in the document.
    ContainerNotFound,
    /// One evaluated request parameter could not be computed.
    ExpressionEvaluation,
    /// Invalid configuration or collaborator setup.
    Configuration,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::MalformedContent => "malformed-content",
            Self::ContainerNotFound => "container-not-found",
            Self::ExpressionEvaluation => "expression-evaluation",
            Self::Configuration => "configuration",
        }
    }
}

/// Top-level error type carrying a stable dotted code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl TileError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn transport(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, code, message)
    }

    pub fn malformed(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedContent, code, message)
    }

    pub fn configuration(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, code, message)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for TileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.kind.as_str(), self.message)
    }
}

impl std::error::Error for TileError {}

#[cfg(test)]
mod tests {
    use super::ErrorKind;
    use super::TileError;

    #[test]
    fn display_includes_code_and_kind() {
        let error = TileError::transport("net.http.status", "server answered 503");
        assert_eq!(
            error.to_string(),
            "net.http.status (transport): server answered 503"
        );
        assert!(error.is(ErrorKind::Transport));
        assert!(!error.is(ErrorKind::MalformedContent));
    }

    #[test]
    fn kinds_have_stable_names() {
        let names = [
            ErrorKind::Transport,
            ErrorKind::MalformedContent,
            ErrorKind::ContainerNotFound,
            ErrorKind::ExpressionEvaluation,
            ErrorKind::Configuration,
        ]
        .map(ErrorKind::as_str);
        assert_eq!(
            names,
            [
                "transport",
                "malformed-content",
                "container-not-found",
                "expression-evaluation",
                "configuration",
            ]
        );
    }
}
