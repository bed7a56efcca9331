//! Error chain for schema, dictionary and command validation failures
//!
//! Errors nest: the outermost error describes the operation that failed and
//! `inner` holds the cause. `first_error()` walks down to the root cause.

use std::fmt;

use thiserror::Error;

/// Domain reported alongside every error code
pub const ERROR_DOMAIN: &str = "command_schema";

/// Machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    TypeMismatch,
    OutOfRange,
    PropTypeChanged,
    PropertyMissing,
    UnknownProperty,
    InvalidObjectSchema,
    InvalidCommandName,
    InvalidCommandVisibility,
    InvalidMinimalRole,
    CommandFailed,
    InvalidPropValue,
    InvalidPropDef,
    NoTypeInfo,
    UnknownType,
    DuplicateCommandDefinition,
    DuplicateCommandId,
    InvalidState,
    AccessDenied,
    JsonObjectExpected,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::TypeMismatch => "type_mismatch",
            ErrorCode::OutOfRange => "out_of_range",
            ErrorCode::PropTypeChanged => "param_type_changed",
            ErrorCode::PropertyMissing => "parameter_missing",
            ErrorCode::UnknownProperty => "unexpected_parameter",
            ErrorCode::InvalidObjectSchema => "invalid_object_schema",
            ErrorCode::InvalidCommandName => "invalid_command_name",
            ErrorCode::InvalidCommandVisibility => "invalid_command_visibility",
            ErrorCode::InvalidMinimalRole => "invalid_minimal_role",
            ErrorCode::CommandFailed => "command_failed",
            ErrorCode::InvalidPropValue => "invalid_parameter_value",
            ErrorCode::InvalidPropDef => "invalid_parameter_definition",
            ErrorCode::NoTypeInfo => "no_type_info",
            ErrorCode::UnknownType => "unknown_type",
            ErrorCode::DuplicateCommandDefinition => "duplicate_command_definition",
            ErrorCode::DuplicateCommandId => "duplicate_command_id",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::JsonObjectExpected => "json_object_expected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validation error with an optional nested cause
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct CommandError {
    code: ErrorCode,
    message: String,
    #[source]
    inner: Option<Box<CommandError>>,
}

pub type Result<T> = std::result::Result<T, CommandError>;

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            inner: None,
        }
    }

    /// Wrap this error as the cause of a new outer error
    pub fn wrap(self, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            inner: Some(Box::new(self)),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn domain(&self) -> &'static str {
        ERROR_DOMAIN
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn inner(&self) -> Option<&CommandError> {
        self.inner.as_deref()
    }

    /// The innermost error of the chain (the root cause)
    pub fn first_error(&self) -> &CommandError {
        let mut err = self;
        while let Some(inner) = err.inner() {
            err = inner;
        }
        err
    }

    /// Iterate from the outermost error down to the root cause
    pub fn chain(&self) -> impl Iterator<Item = &CommandError> {
        std::iter::successors(Some(self), |err| err.inner())
    }

    /// Whether any error in the chain carries `code`
    pub fn has_error(&self, code: ErrorCode) -> bool {
        self.chain().any(|err| err.code == code)
    }

    /// `domain:code` of the outermost error, as reported to the cloud
    pub fn qualified_code(&self) -> String {
        format!("{}:{}", ERROR_DOMAIN, self.code)
    }

    /// All messages of the chain joined with `;`
    pub fn chain_message(&self) -> String {
        self.chain()
            .map(|err| err.message.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }
}
