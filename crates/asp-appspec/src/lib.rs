//! Application specification generator for the Asp scripting engine.
//!
//! The generator reads definition sources (`.asps`): reserved symbol names,
//! variables with literal initial values, and function signatures with
//! plain, defaulted, `*group`, and `**group` parameters. From them it
//! produces the three artifacts a host build needs:
//!
//! - the **engine spec** binary the engine parses at initialization,
//! - the **compiler spec** the offline script compiler uses to map names to
//!   symbol ids,
//! - a **C header** of symbol macros for C hosts.
//!
//! All three share a CRC-32/ISO-HDLC check value over the canonical
//! serialization of the definitions; the same value is stamped into
//! compiled scripts, and the engine refuses code whose check value does not
//! match its specification.
//!
//! ```
//! use asp_appspec::Generator;
//!
//! let mut generator = Generator::new();
//! generator
//!     .add_source("greeting = 'hello'\nprint(*values)\n", "app.asps")
//!     .unwrap();
//! let spec = generator.engine_spec().unwrap();
//! assert_eq!(&spec[..4], b"AspS");
//! ```

mod error;
mod generator;
mod lexer;
mod parser;

pub use crate::{
    error::GeneratorError,
    generator::{Generator, Include, SymbolTable},
    lexer::SourceLocation,
    parser::{Definition, FunctionDefinition, Parameter, Statement},
};
