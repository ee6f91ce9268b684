//! Error types shared across the compilation pipeline.
//!
//! Warnings are reported through the log facade and never surface here;
//! these variants cover the fatal conditions that abort a compilation.

use std::io;

use thiserror::Error;

/// Fatal compilation failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// The input is not in an ASCII-compatible encoding.
    #[error("{file}: unsupported file encoding")]
    Encoding { file: String },

    /// Syntax error; the parse of the file was abandoned.
    #[error("{file}:{line}:{column}: syntax error: {message}")]
    Syntax {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    /// A file referenced from an include statement was not found on the
    /// include path.
    #[error("cannot find file \"{name}\" for {kind} include")]
    IncludeNotFound { name: String, kind: &'static str },

    /// An include statement could not be parsed.
    #[error("invalid include statement \"{stmt}\"")]
    InvalidIncludeStatement { stmt: String },

    /// The include chain revisits a file already being processed.
    #[error("include cycle: \"{file}\" is already being processed ({})", chain.join(" -> "))]
    RecursiveInclude { file: String, chain: Vec<String> },

    /// The include chain is deeper than the hard cap.
    #[error("maximum include depth ({depth}) exceeded")]
    IncludeDepthExceeded { depth: usize },

    /// A named section was requested but the file does not contain it.
    #[error("no {kind} section named \"{map}\" in file \"{file}\"")]
    NoMatchingSection {
        kind: &'static str,
        file: String,
        map: String,
    },

    /// A keymap file lacks one of the four required component sections.
    #[error("required section {section} missing from keymap")]
    MissingSection { section: &'static str },

    /// The rules file did not produce all four component names.
    #[error("cannot resolve a keymap from rules \"{rules}\"")]
    CannotResolveRmlvo { rules: String },

    /// The per-file error budget was exhausted.
    #[error("abandoning {kind} file \"{name}\" after {count} errors")]
    TooManyErrors {
        kind: &'static str,
        name: String,
        count: usize,
    },

    /// A section compiler failed.
    #[error("failed to compile {kind}")]
    SectionFailed { kind: &'static str },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_location() {
        let err = CompileError::Syntax {
            file: "keymap.xkb".into(),
            line: 3,
            column: 7,
            message: "expected ';'".into(),
        };
        assert_eq!(err.to_string(), "keymap.xkb:3:7: syntax error: expected ';'");
    }

    #[test]
    fn test_recursive_include_lists_chain() {
        let err = CompileError::RecursiveInclude {
            file: "a".into(),
            chain: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().contains("a -> b"));
    }
}
