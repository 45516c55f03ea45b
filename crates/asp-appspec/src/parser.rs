//! Parsing of specification statements.
//!
//! ```text
//! statement := "include" NAME
//!            | NAME                      (reserved symbol)
//!            | NAME "=" literal          (variable; None declares a symbol)
//!            | ["lib"] NAME "(" [param {"," param}] ")"
//! param     := NAME ["=" literal] | "*" NAME | "**" NAME
//! literal   := "True" | "False" | "None" | INTEGER | FLOAT | STRING
//! ```

use asp::{ParameterKind, SpecLiteral};

use crate::{
    error::GeneratorError,
    lexer::{Lexer, SourceLocation, Token, TokenKind},
};

/// A function parameter as declared in the source.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub default: Option<SpecLiteral>,
}

/// A function declaration.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FunctionDefinition {
    pub parameters: Vec<Parameter>,
    /// Marked with `lib`: part of a reusable library interface.
    pub library: bool,
}

/// One definition, replacing the source's polymorphic class hierarchy with
/// a tagged variant.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum Definition {
    /// A reserved symbol with no bound value.
    Symbol,
    /// A variable with an initial literal value.
    Variable(SpecLiteral),
    /// An app function.
    Function(FunctionDefinition),
}

/// One parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Include {
        name: String,
        location: SourceLocation,
    },
    Definition {
        name: String,
        definition: Definition,
        location: SourceLocation,
    },
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    file_name: &'a str,
    lookahead: Option<Token>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, file_name: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source, file_name),
            file_name,
            lookahead: None,
        }
    }

    fn error(&self, location: SourceLocation, message: impl Into<String>) -> GeneratorError {
        GeneratorError::new(self.file_name, location, message)
    }

    fn next(&mut self) -> Result<Token, GeneratorError> {
        match self.lookahead.take() {
            Some(token) => Ok(token),
            None => self.lexer.next_token(),
        }
    }

    fn peek(&mut self) -> Result<&Token, GeneratorError> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        Ok(self.lookahead.as_ref().expect("lookahead filled above"))
    }

    fn expect_statement_end(&mut self) -> Result<(), GeneratorError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::StatementEnd | TokenKind::EndOfFile => Ok(()),
            _ => Err(self.error(token.location, "expected end of statement")),
        }
    }

    /// Parses all statements in the source.
    pub fn parse(mut self) -> Result<Vec<Statement>, GeneratorError> {
        let mut statements = Vec::new();
        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::EndOfFile => return Ok(statements),
                TokenKind::StatementEnd => {}
                TokenKind::Include => {
                    let name_token = self.next()?;
                    let TokenKind::Name(name) = name_token.kind else {
                        return Err(self.error(name_token.location, "expected a file name after include"));
                    };
                    self.expect_statement_end()?;
                    statements.push(Statement::Include {
                        name,
                        location: token.location,
                    });
                }
                TokenKind::Lib => {
                    let name_token = self.next()?;
                    let TokenKind::Name(name) = name_token.kind else {
                        return Err(self.error(name_token.location, "expected a function name after lib"));
                    };
                    let open = self.next()?;
                    if open.kind != TokenKind::LeftParen {
                        return Err(self.error(open.location, "lib declarations must be functions"));
                    }
                    let definition = self.function(true, token.location)?;
                    statements.push(Statement::Definition {
                        name,
                        definition,
                        location: token.location,
                    });
                }
                TokenKind::Name(name) => {
                    let location = token.location;
                    let definition = match self.peek()?.kind.clone() {
                        TokenKind::Assign => {
                            self.next()?;
                            match self.literal()? {
                                Some(literal) => Definition::Variable(literal),
                                // `name = None` reserves the symbol without
                                // binding a value.
                                None => Definition::Symbol,
                            }
                        }
                        TokenKind::LeftParen => {
                            self.next()?;
                            self.function(false, location)?
                        }
                        _ => Definition::Symbol,
                    };
                    self.expect_statement_end()?;
                    statements.push(Statement::Definition {
                        name,
                        definition,
                        location,
                    });
                }
                _ => return Err(self.error(token.location, "expected a definition")),
            }
        }
    }

    /// Parses a literal; `None` (the name) yields `Ok(None)`.
    fn literal(&mut self) -> Result<Option<SpecLiteral>, GeneratorError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Name(name) => match name.as_str() {
                "True" => Ok(Some(SpecLiteral::Boolean(true))),
                "False" => Ok(Some(SpecLiteral::Boolean(false))),
                "None" => Ok(None),
                _ => Err(self.error(token.location, format!("'{name}' is not a literal"))),
            },
            TokenKind::Integer { value, negated_min } => {
                if negated_min {
                    return Err(self.error(token.location, "integer literal out of range"));
                }
                Ok(Some(SpecLiteral::Integer(value)))
            }
            TokenKind::Float(value) => Ok(Some(SpecLiteral::Float(value))),
            TokenKind::String(bytes) => Ok(Some(SpecLiteral::String(bytes))),
            _ => Err(self.error(token.location, "expected a literal value")),
        }
    }

    /// Parses the parameter list after the opening parenthesis.
    fn function(&mut self, library: bool, location: SourceLocation) -> Result<Definition, GeneratorError> {
        let mut parameters = Vec::new();
        if self.peek()?.kind == TokenKind::RightParen {
            self.next()?;
            return Ok(Definition::Function(FunctionDefinition { parameters, library }));
        }

        loop {
            parameters.push(self.parameter()?);
            let token = self.next()?;
            match token.kind {
                TokenKind::Comma => {}
                TokenKind::RightParen => break,
                _ => return Err(self.error(token.location, "expected ',' or ')' in parameter list")),
            }
        }

        validate_parameters(&parameters, self.file_name, location)?;
        Ok(Definition::Function(FunctionDefinition { parameters, library }))
    }

    fn parameter(&mut self) -> Result<Parameter, GeneratorError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Asterisk => {
                let name_token = self.next()?;
                let TokenKind::Name(name) = name_token.kind else {
                    return Err(self.error(name_token.location, "expected a name after *"));
                };
                Ok(Parameter {
                    name,
                    kind: ParameterKind::TupleGroup,
                    default: None,
                })
            }
            TokenKind::DoubleAsterisk => {
                let name_token = self.next()?;
                let TokenKind::Name(name) = name_token.kind else {
                    return Err(self.error(name_token.location, "expected a name after **"));
                };
                Ok(Parameter {
                    name,
                    kind: ParameterKind::DictionaryGroup,
                    default: None,
                })
            }
            TokenKind::Name(name) => {
                if self.peek()?.kind == TokenKind::Assign {
                    self.next()?;
                    let literal = self.literal()?;
                    let Some(literal) = literal else {
                        return Err(self.error(token.location, "None is not a parameter default"));
                    };
                    Ok(Parameter {
                        name,
                        kind: ParameterKind::Defaulted,
                        default: Some(literal),
                    })
                } else {
                    Ok(Parameter {
                        name,
                        kind: ParameterKind::Plain,
                        default: None,
                    })
                }
            }
            _ => Err(self.error(token.location, "expected a parameter")),
        }
    }
}

/// Enforces the structural rules: at most one group of each kind, the
/// dictionary group last, the tuple group before any defaulted-only tail,
/// no plain parameter after a defaulted one, and at most 127 parameters.
fn validate_parameters(
    parameters: &[Parameter],
    file_name: &str,
    location: SourceLocation,
) -> Result<(), GeneratorError> {
    if parameters.len() > asp::MAX_FUNCTION_PARAMETERS {
        return Err(GeneratorError::new(
            file_name,
            location,
            format!(
                "too many parameters ({} vs. max {})",
                parameters.len(),
                asp::MAX_FUNCTION_PARAMETERS
            ),
        ));
    }

    let mut seen_tuple_group = false;
    let mut seen_dictionary_group = false;
    let mut seen_defaulted = false;
    for parameter in parameters {
        if seen_dictionary_group {
            return Err(GeneratorError::new(
                file_name,
                location,
                "the dictionary group parameter must come last",
            ));
        }
        match parameter.kind {
            ParameterKind::TupleGroup => {
                if seen_tuple_group {
                    return Err(GeneratorError::new(
                        file_name,
                        location,
                        "at most one tuple group parameter is allowed",
                    ));
                }
                seen_tuple_group = true;
                seen_defaulted = false;
            }
            ParameterKind::DictionaryGroup => seen_dictionary_group = true,
            ParameterKind::Defaulted => seen_defaulted = true,
            ParameterKind::Plain => {
                if seen_defaulted {
                    return Err(GeneratorError::new(
                        file_name,
                        location,
                        format!("required parameter '{}' follows a defaulted parameter", parameter.name),
                    ));
                }
            }
        }
    }
    Ok(())
}
