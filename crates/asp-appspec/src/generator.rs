//! The generator: definition collection, declaration-ordered symbol
//! assignment, check value computation, and emission of the three outputs
//! (engine spec binary, compiler spec, C header).

use ahash::AHashMap;
use asp::{
    APP_SPEC_MAGIC, APP_SPEC_VERSION, MAX_FUNCTION_PARAMETERS, PARAMETER_SYMBOL_BITS, ParameterKind, SpecLiteral, crc,
};
use indexmap::IndexMap;

use crate::{
    error::GeneratorError,
    lexer::SourceLocation,
    parser::{Definition, Parser, Statement},
};

const ENTRY_SYMBOL: u8 = 0;
const ENTRY_VARIABLE: u8 = 1;
const ENTRY_FUNCTION: u8 = 2;

const LITERAL_BOOLEAN: u8 = 0;
const LITERAL_INTEGER: u8 = 1;
const LITERAL_FLOAT: u8 = 2;
const LITERAL_STRING: u8 = 3;

/// Check value canonicalization prefixes.
const CHECK_VARIABLE_PREFIX: u8 = 0x0B;
const CHECK_FUNCTION_PREFIX: u8 = 0x0C;
const CHECK_PARAMETER_PREFIX: u8 = b'(';

/// Names mapped to symbol ids in assignment order.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
    ids: AHashMap<String, i32>,
}

impl SymbolTable {
    /// The symbol for `name`, assigning the next id on first sight.
    pub fn symbol(&mut self, name: &str) -> i32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.names.len() as i32;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// The symbol for `name`, if assigned.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<i32> {
        self.ids.get(name).copied()
    }

    /// Names in symbol order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Collects definitions and emits the specification outputs.
///
/// The generator owns all of its state; nothing lives in process globals.
#[derive(Debug, Default)]
pub struct Generator {
    definitions: IndexMap<String, Definition>,
}

/// An include directive discovered while adding a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub name: String,
    pub line: u32,
}

impl Generator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a source and absorbs its definitions, returning any include
    /// directives for the caller to resolve.
    pub fn add_source(&mut self, source: &str, file_name: &str) -> Result<Vec<Include>, GeneratorError> {
        let statements = Parser::new(source, file_name).parse()?;
        let mut includes = Vec::new();
        for statement in statements {
            match statement {
                Statement::Include { name, location } => includes.push(Include {
                    name,
                    line: location.line,
                }),
                Statement::Definition {
                    name,
                    definition,
                    location,
                } => self.define(name, definition, file_name, location)?,
            }
        }
        Ok(includes)
    }

    /// Adds one definition directly, for hosts that build specs in code.
    pub fn add_definition(&mut self, name: &str, definition: Definition) -> Result<(), GeneratorError> {
        self.define(
            name.to_string(),
            definition,
            "<builder>",
            SourceLocation { line: 0, column: 0 },
        )
    }

    fn define(
        &mut self,
        name: String,
        definition: Definition,
        file_name: &str,
        location: SourceLocation,
    ) -> Result<(), GeneratorError> {
        if self.definitions.contains_key(&name) {
            return Err(GeneratorError::new(
                file_name,
                location,
                format!("'{name}' is already defined"),
            ));
        }
        self.definitions.insert(name, definition);
        Ok(())
    }

    /// The collected definitions in declaration order.
    pub fn definitions(&self) -> impl Iterator<Item = (&str, &Definition)> {
        self.definitions.iter().map(|(name, definition)| (name.as_str(), definition))
    }

    /// Assigns symbols: definition names first in declaration order, then
    /// parameter names, each name once.
    #[must_use]
    pub fn symbol_table(&self) -> SymbolTable {
        let mut symbols = SymbolTable::default();
        for name in self.definitions.keys() {
            symbols.symbol(name);
        }
        for definition in self.definitions.values() {
            if let Definition::Function(function) = definition {
                for parameter in &function.parameters {
                    symbols.symbol(&parameter.name);
                }
            }
        }
        symbols
    }

    /// CRC-32/ISO-HDLC over the canonical serialization: `\v` + name +
    /// literal per variable, `\f` + name then `(` + name + default literal
    /// per parameter, literal bytes exactly as on the wire.
    #[must_use]
    pub fn check_value(&self) -> u32 {
        let mut session = crc::Crc32::new();
        for (name, definition) in &self.definitions {
            match definition {
                Definition::Symbol => {
                    session.add(&[CHECK_VARIABLE_PREFIX]);
                    session.add(name.as_bytes());
                }
                Definition::Variable(literal) => {
                    session.add(&[CHECK_VARIABLE_PREFIX]);
                    session.add(name.as_bytes());
                    session.add(&literal_bytes(literal));
                }
                Definition::Function(function) => {
                    session.add(&[CHECK_FUNCTION_PREFIX]);
                    session.add(name.as_bytes());
                    for parameter in &function.parameters {
                        session.add(&[CHECK_PARAMETER_PREFIX]);
                        session.add(parameter.name.as_bytes());
                        if let Some(default) = &parameter.default {
                            session.add(&literal_bytes(default));
                        }
                    }
                }
            }
        }
        session.finish()
    }

    /// Emits the engine specification binary.
    pub fn engine_spec(&self) -> Result<Vec<u8>, GeneratorError> {
        let mut symbols = self.symbol_table();
        let mut entries = Vec::new();
        for definition in self.definitions.values() {
            match definition {
                Definition::Symbol => entries.push(ENTRY_SYMBOL),
                Definition::Variable(literal) => {
                    entries.push(ENTRY_VARIABLE);
                    entries.extend_from_slice(&literal_bytes(literal));
                }
                Definition::Function(function) => {
                    debug_assert!(function.parameters.len() <= MAX_FUNCTION_PARAMETERS);
                    entries.push(ENTRY_FUNCTION);
                    entries.push(function.parameters.len() as u8);
                    for parameter in &function.parameters {
                        let symbol = symbols.symbol(&parameter.name);
                        if symbol as u32 >= 1 << PARAMETER_SYMBOL_BITS {
                            return Err(GeneratorError::global(
                                "<spec>",
                                format!("symbol id for '{}' exceeds the parameter word", parameter.name),
                            ));
                        }
                        let kind: u32 = match parameter.kind {
                            ParameterKind::Plain => 0,
                            ParameterKind::Defaulted => 1,
                            ParameterKind::TupleGroup => 2,
                            ParameterKind::DictionaryGroup => 3,
                        };
                        let word = symbol as u32 | (kind << PARAMETER_SYMBOL_BITS);
                        entries.extend_from_slice(&word.to_le_bytes());
                        if let Some(default) = &parameter.default {
                            entries.extend_from_slice(&literal_bytes(default));
                        }
                    }
                }
            }
        }

        if entries.len() > usize::from(u16::MAX) {
            return Err(GeneratorError::global("<spec>", "specification exceeds 65535 bytes"));
        }

        let mut spec = Vec::with_capacity(entries.len() + 11);
        spec.extend_from_slice(&APP_SPEC_MAGIC);
        spec.push(APP_SPEC_VERSION);
        spec.extend_from_slice(&(entries.len() as u16).to_be_bytes());
        spec.extend_from_slice(&self.check_value().to_be_bytes());
        spec.extend_from_slice(&entries);
        Ok(spec)
    }

    /// Emits the compiler specification: the header followed by names in
    /// symbol order, one per line.
    #[must_use]
    pub fn compiler_spec(&self) -> Vec<u8> {
        let symbols = self.symbol_table();
        let mut spec = Vec::new();
        spec.extend_from_slice(&APP_SPEC_MAGIC);
        spec.push(APP_SPEC_VERSION);
        spec.extend_from_slice(&self.check_value().to_be_bytes());
        for name in symbols.names() {
            spec.extend_from_slice(name.as_bytes());
            spec.push(b'\n');
        }
        spec
    }

    /// Emits the C header of symbol macros for the host application.
    #[must_use]
    pub fn c_header(&self, base_name: &str) -> String {
        use std::fmt::Write;

        let symbols = self.symbol_table();
        let mut header = String::new();
        let _ = writeln!(header, "/*** AUTO-GENERATED; DO NOT EDIT ***/");
        let _ = writeln!(header);
        let _ = writeln!(header, "#ifndef ASP_APP_{base_name}_DEF_H");
        let _ = writeln!(header, "#define ASP_APP_{base_name}_DEF_H");
        let _ = writeln!(header);
        let _ = writeln!(header, "#define ASP_APP_{base_name}_CHECK_VALUE 0x{:08X}", self.check_value());
        let _ = writeln!(header);
        for name in symbols.names() {
            let symbol = symbols.lookup(name).expect("name listed in table");
            let _ = writeln!(header, "#define ASP_APP_{base_name}_SYM_{name} {symbol}");
        }
        let _ = writeln!(header);
        let _ = writeln!(header, "#endif");
        header
    }
}

/// Wire encoding of one literal: a type tag followed by a little-endian
/// payload (strings carry a u32 length prefix).
fn literal_bytes(literal: &SpecLiteral) -> Vec<u8> {
    match literal {
        SpecLiteral::Boolean(value) => vec![LITERAL_BOOLEAN, u8::from(*value)],
        SpecLiteral::Integer(value) => {
            let mut bytes = vec![LITERAL_INTEGER];
            bytes.extend_from_slice(&value.to_le_bytes());
            bytes
        }
        SpecLiteral::Float(value) => {
            let mut bytes = vec![LITERAL_FLOAT];
            bytes.extend_from_slice(&value.to_le_bytes());
            bytes
        }
        SpecLiteral::String(contents) => {
            let mut bytes = vec![LITERAL_STRING];
            bytes.extend_from_slice(&(contents.len() as u32).to_le_bytes());
            bytes.extend_from_slice(contents);
            bytes
        }
    }
}
