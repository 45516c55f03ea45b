//! Error types for code loading and execution.
//!
//! Every failure the engine can report maps to a stable numeric code so hosts
//! built against the C-era code values keep working. `RunError` latches: once
//! the engine observes one, every subsequent `step()` returns the same error
//! until `reset()`.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Outcome of a successful [`crate::Engine::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StepResult {
    /// More instructions remain; call `step` again.
    Running,
    /// The end instruction was reached; only `reset` re-enables execution.
    Complete,
}

impl StepResult {
    /// True once the program has run to completion.
    #[must_use]
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Errors reported while loading code into the engine.
///
/// The numeric values mirror the engine's add-code result codes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
pub enum AddCodeError {
    /// The header magic did not read `AspE`.
    InvalidFormat,
    /// The code was built for an incompatible engine version.
    InvalidVersion,
    /// The code's check value does not match the application specification.
    InvalidCheckValue,
    /// The configured code buffer is too small for the program.
    OutOfCodeMemory,
    /// The operation is not valid in the engine's current state.
    InvalidState,
}

impl AddCodeError {
    /// Stable numeric code for this error.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::InvalidFormat => 0x01,
            Self::InvalidVersion => 0x02,
            Self::InvalidCheckValue => 0x03,
            Self::OutOfCodeMemory => 0x04,
            Self::InvalidState => 0x08,
        }
    }
}

impl std::error::Error for AddCodeError {}

/// Errors reported during initialization and execution.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and
/// `Into<&'static str>` implementations. The string representation matches
/// the variant name exactly (e.g. `DivideByZero` -> "DivideByZero").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
pub enum RunError {
    /// The engine could not be initialized (bad parameters, tiny heap).
    InitializationError,
    /// The requested operation is not valid in the current engine state.
    InvalidState,
    /// An unrecognized opcode was fetched.
    InvalidInstruction,
    /// The end instruction appeared with frames still on the call stack.
    InvalidEnd,
    /// The program counter moved past the end of the loaded code.
    BeyondEndOfCode,
    /// An instruction required more operands than the working stack held.
    StackUnderflow,
    /// A container traversal exceeded the cycle detection limit.
    CycleDetected,
    /// An operation was attempted outside its valid context, such as a
    /// return with no active frame.
    InvalidContext,
    /// A redundant operation was requested, such as sealing twice.
    Redundant,
    /// A value of the wrong type was supplied to an operation.
    UnexpectedType,
    /// Destructuring assignment found a sequence of mismatched length.
    SequenceMismatch,
    /// A string formatting operation failed.
    StringFormattingError,
    /// A format string was malformed.
    InvalidFormatString,
    /// A variable name (symbol) was not found in any active namespace.
    NameNotFound,
    /// A key was not found in a set or dictionary.
    KeyNotFound,
    /// A numeric value fell outside the representable range.
    ValueOutOfRange,
    /// An iterator was dereferenced or advanced past its end.
    IteratorAtEnd,
    /// Argument binding failed: missing, duplicate, or unknown arguments.
    MalformedFunctionCall,
    /// A script called an app function the specification does not define.
    UndefinedAppFunction,
    /// An app function misbehaved, such as returning without a value.
    InvalidAppFunction,
    /// Integer division or modulo by zero.
    DivideByZero,
    /// Integer arithmetic overflowed the 32-bit range.
    ArithmeticOverflow,
    /// The data heap has no free entries left.
    OutOfDataMemory,
    /// An app function requested termination.
    Abort,
    /// An internal invariant failed; see [`crate::Engine::assert_engine`].
    InternalError,
    /// The operation is recognized but not implemented.
    NotImplemented,
    /// A host-defined error. Codes at or above [`RunError::APPLICATION_BASE`]
    /// are reserved for the application and latch like engine errors.
    Application(u32),
}

impl RunError {
    /// First error code reserved for host-defined errors.
    pub const APPLICATION_BASE: u32 = 0x100;

    /// Stable numeric code for this error, matching the C ABI values.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::InitializationError => 0x02,
            Self::InvalidState => 0x03,
            Self::InvalidInstruction => 0x04,
            Self::InvalidEnd => 0x05,
            Self::BeyondEndOfCode => 0x06,
            Self::StackUnderflow => 0x07,
            Self::CycleDetected => 0x08,
            Self::InvalidContext => 0x0A,
            Self::Redundant => 0x0B,
            Self::UnexpectedType => 0x0C,
            Self::SequenceMismatch => 0x0D,
            Self::StringFormattingError => 0x0E,
            Self::InvalidFormatString => 0x0F,
            Self::NameNotFound => 0x10,
            Self::KeyNotFound => 0x11,
            Self::ValueOutOfRange => 0x12,
            Self::IteratorAtEnd => 0x13,
            Self::MalformedFunctionCall => 0x14,
            Self::UndefinedAppFunction => 0x15,
            Self::InvalidAppFunction => 0x16,
            Self::DivideByZero => 0x18,
            Self::ArithmeticOverflow => 0x19,
            Self::OutOfDataMemory => 0x20,
            Self::Abort => 0xFB,
            Self::InternalError => 0xFE,
            Self::NotImplemented => 0xFF,
            Self::Application(code) => code,
        }
    }

    /// Builds a host-defined error from a raw code.
    ///
    /// Codes below [`RunError::APPLICATION_BASE`] are clamped up to it; the
    /// engine treats every application code as opaque.
    #[must_use]
    pub fn application(code: u32) -> Self {
        Self::Application(code.max(Self::APPLICATION_BASE))
    }
}

impl std::error::Error for RunError {}

/// Human-oriented report combining an error with the program counter at
/// which it latched. Produced by [`crate::Engine::error_report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorReport {
    /// The latched error.
    pub error: RunError,
    /// Program counter at the time the error latched.
    pub pc: u32,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X}) at pc 0x{:08X}", self.error, self.error.code(), self.pc)
    }
}
