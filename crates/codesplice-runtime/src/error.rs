//! Rewrite errors
//!
//! Every failure a codec operation, the offset tracker or a pass can raise.
//! None of them is recoverable inside a pass: the pipeline runner abandons the
//! routine and reports which pass failed.

use thiserror::Error;

/// Role a name plays in a resolution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bound to a statically-known value
    Constant,
    /// Body spliced into zero-argument call sites
    Inline,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Constant => f.write_str("constant"),
            Role::Inline => f.write_str("inline"),
        }
    }
}

/// Errors raised while decoding, editing or verifying a routine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RewriteError {
    #[error("invalid position {position} in a {len}-byte instruction stream")]
    InvalidPosition { position: usize, len: usize },

    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },

    #[error("chained EXTENDED_ARG at offset {offset} (only one extension level is supported)")]
    UnsupportedExtension { offset: usize },

    #[error("operand {0} is out of range (0 <= operand < 65536)")]
    OperandOutOfRange(i64),

    #[error("jump at offset {offset} would need operand {operand}, which cannot be encoded")]
    UnencodableOffset { offset: usize, operand: i64 },

    #[error("jump fixup did not settle after {0} iterations")]
    FixupDiverged(usize),

    #[error("invalid {mnemonic} argument at offset {offset} ('{name}' is not defined)")]
    UnresolvedName {
        mnemonic: &'static str,
        name: String,
        offset: usize,
    },

    #[error("invalid {mnemonic} argument at offset {offset} (index {index} out of bounds for {len} entries)")]
    IndexOutOfBounds {
        mnemonic: &'static str,
        index: usize,
        len: usize,
        offset: usize,
    },

    #[error("malformed routine: {0}")]
    MalformedCode(String),

    #[error("'{name}' cannot be inlined: {reason}")]
    Uninlinable { name: String, reason: String },

    #[error("'{name}' is already registered as {existing}, cannot register it as {requested}")]
    ConflictingRole {
        name: String,
        existing: Role,
        requested: Role,
    },

    #[error("inline routine '{0}' reaches itself through the inline table")]
    InlineCycle(String),

    #[error("unknown pass '{0}'")]
    UnknownPass(String),

    #[error("label {0} was never bound")]
    UnboundLabel(usize),

    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },
}

/// Result type for rewrite operations
pub type RewriteResult<T> = Result<T, RewriteError>;

/// A pass failure, tagged with the pass that raised it
#[derive(Error, Debug, Clone, PartialEq)]
#[error("pass '{pass}' failed: {source}")]
pub struct PipelineError {
    /// Name of the failing pass
    pub pass: String,
    /// Underlying failure
    #[source]
    pub source: RewriteError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_messages_name_the_mnemonic() {
        let err = RewriteError::UnresolvedName {
            mnemonic: "LOAD_GLOBAL",
            name: "missing".to_string(),
            offset: 4,
        };
        assert_eq!(
            err.to_string(),
            "invalid LOAD_GLOBAL argument at offset 4 ('missing' is not defined)"
        );
    }

    #[test]
    fn test_pipeline_error_names_the_pass() {
        let err = PipelineError {
            pass: "verify".to_string(),
            source: RewriteError::OperandOutOfRange(70000),
        };
        assert_eq!(
            err.to_string(),
            "pass 'verify' failed: operand 70000 is out of range (0 <= operand < 65536)"
        );
    }
}
