//! Generator tests: parsing, symbol assignment, emission, and the check
//! value contract with the engine.

use asp::{AppReturn, AppSpec, Engine, EntryId, ParameterKind, RunError, SpecEntry, SpecLiteral, crc};
use asp_appspec::{Definition, Generator};
use pretty_assertions::assert_eq;

fn no_functions(_: &mut Engine<()>, _: i32, _: EntryId) -> Result<AppReturn, RunError> {
    Err(RunError::UndefinedAppFunction)
}

const SOURCE: &str = "\
# A small application interface.
version = 3
greeting = 'hi'
ratio = 0.5
enabled = True
handle
f(a, b=2, *rest, **kw)
";

#[test]
fn symbols_assign_in_declaration_order() {
    let mut generator = Generator::new();
    generator.add_source(SOURCE, "app.asps").unwrap();
    let symbols = generator.symbol_table();
    assert_eq!(
        symbols.names(),
        ["version", "greeting", "ratio", "enabled", "handle", "f", "a", "b", "rest", "kw"]
    );
    assert_eq!(symbols.lookup("f"), Some(5));
    assert_eq!(symbols.lookup("kw"), Some(9));
    assert_eq!(symbols.lookup("missing"), None);
}

#[test]
fn engine_spec_round_trips_through_the_engine_parser() {
    let mut generator = Generator::new();
    generator.add_source(SOURCE, "app.asps").unwrap();
    let image = generator.engine_spec().unwrap();
    let spec = AppSpec::<()>::parse(&image, no_functions).unwrap();

    assert_eq!(spec.check_value(), generator.check_value());
    assert_eq!(spec.definition_count(), 6);
    assert_eq!(spec.entry(0), Some(&SpecEntry::Variable(SpecLiteral::Integer(3))));
    assert_eq!(
        spec.entry(1),
        Some(&SpecEntry::Variable(SpecLiteral::String(b"hi".to_vec())))
    );
    assert_eq!(spec.entry(2), Some(&SpecEntry::Variable(SpecLiteral::Float(0.5))));
    assert_eq!(spec.entry(3), Some(&SpecEntry::Variable(SpecLiteral::Boolean(true))));
    assert_eq!(spec.entry(4), Some(&SpecEntry::Symbol));

    let Some(SpecEntry::Function(parameters)) = spec.entry(5) else {
        panic!("expected a function at symbol 5");
    };
    assert_eq!(parameters.len(), 4);
    assert_eq!((parameters[0].symbol, parameters[0].kind), (6, ParameterKind::Plain));
    assert_eq!((parameters[1].symbol, parameters[1].kind), (7, ParameterKind::Defaulted));
    assert_eq!(parameters[1].default, Some(SpecLiteral::Integer(2)));
    assert_eq!((parameters[2].symbol, parameters[2].kind), (8, ParameterKind::TupleGroup));
    assert_eq!(
        (parameters[3].symbol, parameters[3].kind),
        (9, ParameterKind::DictionaryGroup)
    );
}

#[test]
fn check_value_matches_manual_canonicalization() {
    let mut generator = Generator::new();
    generator.add_source("x = 7\nf(a=1)\n", "app.asps").unwrap();

    // Rebuild the canonical serialization by hand: \v name literal for the
    // variable, \f name then ( name default for the function parameter.
    let mut canonical = Vec::new();
    canonical.push(0x0B);
    canonical.extend_from_slice(b"x");
    canonical.push(1);
    canonical.extend_from_slice(&7i32.to_le_bytes());
    canonical.push(0x0C);
    canonical.extend_from_slice(b"f");
    canonical.push(b'(');
    canonical.extend_from_slice(b"a");
    canonical.push(1);
    canonical.extend_from_slice(&1i32.to_le_bytes());

    assert_eq!(generator.check_value(), crc::checksum(&canonical));
}

#[test]
fn check_value_is_sensitive_to_names_and_defaults() {
    let mut first = Generator::new();
    first.add_source("f(a)\n", "a.asps").unwrap();
    let mut second = Generator::new();
    second.add_source("f(b)\n", "b.asps").unwrap();
    assert_ne!(first.check_value(), second.check_value());

    let mut third = Generator::new();
    third.add_source("f(a=1)\n", "c.asps").unwrap();
    assert_ne!(first.check_value(), third.check_value());
}

#[test]
fn duplicate_definitions_are_rejected() {
    let mut generator = Generator::new();
    let error = generator.add_source("x = 1\nx = 2\n", "app.asps").unwrap_err();
    assert_eq!(error.line, 2);
    assert!(error.message.contains("already defined"));
}

#[test]
fn parameter_rules_are_enforced() {
    let mut generator = Generator::new();
    let error = generator.add_source("f(**kw, a)\n", "app.asps").unwrap_err();
    assert!(error.message.contains("dictionary group"));

    let mut generator = Generator::new();
    let error = generator.add_source("f(*a, *b)\n", "app.asps").unwrap_err();
    assert!(error.message.contains("tuple group"));

    let mut generator = Generator::new();
    let error = generator.add_source("f(a=1, b)\n", "app.asps").unwrap_err();
    assert!(error.message.contains("follows a defaulted"));
}

#[test]
fn none_reserves_a_symbol() {
    let mut generator = Generator::new();
    generator.add_source("handle = None\n", "app.asps").unwrap();
    let definitions: Vec<_> = generator.definitions().collect();
    assert_eq!(definitions, vec![("handle", &Definition::Symbol)]);
}

#[test]
fn includes_are_surfaced_to_the_caller() {
    let mut generator = Generator::new();
    let includes = generator.add_source("include common\nx = 1\n", "app.asps").unwrap();
    assert_eq!(includes.len(), 1);
    assert_eq!(includes[0].name, "common");
}

#[test]
fn c_header_carries_symbols_and_check_value() {
    let mut generator = Generator::new();
    generator.add_source("launch(countdown=10)\n", "app.asps").unwrap();
    let header = generator.c_header("demo");

    assert!(header.contains("#ifndef ASP_APP_demo_DEF_H"));
    assert!(header.contains("#define ASP_APP_demo_SYM_launch 0"));
    assert!(header.contains("#define ASP_APP_demo_SYM_countdown 1"));
    assert!(header.contains(&format!("0x{:08X}", generator.check_value())));
}

#[test]
fn compiler_spec_lists_names_in_symbol_order() {
    let mut generator = Generator::new();
    generator.add_source("beta\nalpha(gamma)\n", "app.asps").unwrap();
    let spec = generator.compiler_spec();

    assert_eq!(&spec[..4], b"AspS");
    assert_eq!(spec[5..9], generator.check_value().to_be_bytes());
    let names = String::from_utf8(spec[9..].to_vec()).unwrap();
    assert_eq!(names, "beta\nalpha\ngamma\n");
}

#[test]
fn negated_minimum_literal_is_representable() {
    let mut generator = Generator::new();
    generator.add_source("low = -2147483648\n", "app.asps").unwrap();
    let image = generator.engine_spec().unwrap();
    let spec = AppSpec::<()>::parse(&image, no_functions).unwrap();
    assert_eq!(spec.entry(0), Some(&SpecEntry::Variable(SpecLiteral::Integer(i32::MIN))));

    let mut generator = Generator::new();
    let error = generator.add_source("high = 2147483648\n", "app.asps").unwrap_err();
    assert!(error.message.contains("out of range"));
}
