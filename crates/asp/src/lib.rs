//! Asp: an embeddable, bounded-memory, Python-flavored scripting engine.
//!
//! A host application loads an application specification (declaring the
//! symbols, variables, and functions it exposes), loads precompiled
//! bytecode whose check value matches that specification, and then drives
//! execution one instruction at a time:
//!
//! ```
//! use asp::{AppSpec, CodeBuilder, Engine, EngineParams, RunError};
//!
//! fn dispatch(_: &mut Engine<()>, _: i32, _: asp::EntryId) -> Result<asp::AppReturn, RunError> {
//!     Err(RunError::UndefinedAppFunction)
//! }
//!
//! let spec = AppSpec::empty(dispatch);
//! let check = spec.check_value();
//! let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();
//!
//! let mut code = CodeBuilder::new();
//! code.end();
//! engine.seal_code(&code.finish(check)).unwrap();
//!
//! let result = engine.step().unwrap();
//! assert!(result.is_complete());
//! ```
//!
//! Memory is a fixed-capacity heap of uniform, reference-counted entries;
//! every value a script touches lives there, so a host chooses its memory
//! ceiling up front and the engine never allocates past it. Each engine is
//! single-threaded and fully isolated; run several in parallel if you need
//! concurrency.

#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wire words wrap by design")]
#![expect(clippy::must_use_candidate, reason = "accessor results may be ignored")]

mod api;
mod appspec;
mod args;
mod arith;
mod builder;
mod code;
mod compare;
pub mod crc;
mod engine;
mod error;
mod heap;
mod instructions;
mod iter;
mod range;
mod sequence;
mod source_info;
#[cfg(feature = "trace")]
mod tracer;
mod tree;
mod value;
mod vm;

pub use crate::{
    api::RangeValues,
    appspec::{
        APP_SPEC_MAGIC, APP_SPEC_VERSION, AppDispatch, AppReturn, AppSpec, FloatConverter, MAX_FUNCTION_PARAMETERS,
        PARAMETER_SYMBOL_BITS, SpecEntry, SpecLiteral, SpecParameter, ieee_float_converter,
    },
    builder::{CodeBuilder, JumpLabel},
    code::{CODE_HEADER_SIZE, CODE_MAGIC, CodeReader, ENGINE_VERSION, code_header},
    engine::{Engine, EngineParams, EngineState, SYSTEM_ARGUMENTS_SYMBOL},
    error::{AddCodeError, ErrorReport, RunError, RunResult, StepResult},
    heap::{
        AppIntegerDestructor, AppPointerDestructor, DEFAULT_CYCLE_DETECTION_LIMIT, DataType, EntryId, HeapStats,
        ParameterKind, STRING_FRAGMENT_CAPACITY,
    },
    instructions::{Opcode, parameter_kind, range_mask},
    source_info::{SOURCE_INFO_MAGIC, SOURCE_INFO_VERSION, SourceInfo, SourceInfoBuilder, SourceLocation},
};
