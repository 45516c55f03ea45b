//! End-to-end engine tests: spec loading, stepping, the host call
//! protocol, error latching, and reset behavior.

use asp::{
    AppReturn, AppSpec, CodeBuilder, Engine, EngineParams, EngineState, EntryId, ParameterKind, RunError, StepResult,
};
use pretty_assertions::assert_eq;

/// Check value shared by the hand-built specs and executables below. The
/// engine compares the two headers; the value itself is arbitrary here.
const CHECK: u32 = 0x5EED_C0DE;

fn spec_image(entries: &[u8]) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(b"AspS");
    image.push(1);
    image.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    image.extend_from_slice(&CHECK.to_be_bytes());
    image.extend_from_slice(entries);
    image
}

fn parameter_word(symbol: i32, kind: u32) -> [u8; 4] {
    ((symbol as u32) | (kind << asp::PARAMETER_SYMBOL_BITS)).to_le_bytes()
}

fn run_to_completion<C>(engine: &mut Engine<C>) {
    for _ in 0..10_000 {
        match engine.step() {
            Ok(StepResult::Running) => {}
            Ok(StepResult::Complete) => return,
            Err(error) => panic!("unexpected engine error: {error}"),
        }
    }
    panic!("program did not complete");
}

fn no_functions(_: &mut Engine<()>, _: i32, _: EntryId) -> Result<AppReturn, RunError> {
    Err(RunError::UndefinedAppFunction)
}

// --- Scenario: empty spec, empty program --------------------------------

#[test]
fn empty_spec_empty_program() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();
    assert_eq!(engine.state(), EngineState::Ready);

    let before = engine.free_count();
    assert_eq!(engine.step().unwrap(), StepResult::Complete);
    assert_eq!(engine.state(), EngineState::Complete);
    assert_eq!(engine.free_count(), before);
    // Nothing was ever allocated during the run.
    assert_eq!(engine.low_free_count(), engine.free_count());
}

// --- Scenario: hello world through a host print -------------------------

#[derive(Default)]
struct PrintHost {
    printed: Vec<(usize, Vec<u8>)>,
}

fn print_dispatch(engine: &mut Engine<PrintHost>, symbol: i32, namespace: EntryId) -> Result<AppReturn, RunError> {
    assert_eq!(symbol, 0);
    let message = engine.parameter_value(namespace, 1)?;
    assert!(engine.is_string(message));
    let mut buffer = [0u8; 32];
    let size = engine.string_value(message, 0, &mut buffer)?;
    engine.context_mut().printed.push((size, buffer[..size].to_vec()));
    Ok(AppReturn::Value(engine.new_none()))
}

#[test]
fn hello_world_print() {
    // print declared with symbol 0 and one positional parameter (symbol 1).
    let mut entries = vec![2u8, 1];
    entries.extend_from_slice(&parameter_word(1, 0));
    let spec = AppSpec::parse(&spec_image(&entries), print_dispatch).unwrap();
    let mut engine = Engine::new(spec, PrintHost::default(), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.push_string(b"Hello");
    code.push_positional_argument();
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    run_to_completion(&mut engine);
    assert_eq!(
        engine.context().printed,
        vec![(5, vec![0x48, 0x65, 0x6C, 0x6C, 0x6F])]
    );
}

// --- Scenario: default argument binding ---------------------------------

#[derive(Default)]
struct BindHost {
    observed: Vec<(i32, i32)>,
}

fn bind_dispatch(engine: &mut Engine<BindHost>, symbol: i32, namespace: EntryId) -> Result<AppReturn, RunError> {
    assert_eq!(symbol, 0);
    let a = engine.parameter_value(namespace, 1)?;
    let b = engine.parameter_value(namespace, 2)?;
    let pair = (engine.integer_value(a)?, engine.integer_value(b)?);
    engine.context_mut().observed.push(pair);
    Ok(AppReturn::Value(engine.new_none()))
}

#[test]
fn default_argument_binding() {
    // f(a, b=2) with f=0, a=1, b=2.
    let mut entries = vec![2u8, 2];
    entries.extend_from_slice(&parameter_word(1, 0));
    entries.extend_from_slice(&parameter_word(2, 1));
    entries.extend_from_slice(&[1, 2, 0, 0, 0]); // integer literal 2
    let spec = AppSpec::parse(&spec_image(&entries), bind_dispatch).unwrap();
    let mut engine = Engine::new(spec, BindHost::default(), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.push_integer(10);
    code.push_positional_argument();
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    run_to_completion(&mut engine);
    assert_eq!(engine.context().observed, vec![(10, 2)]);
}

#[test]
fn missing_required_argument_is_malformed() {
    let mut entries = vec![2u8, 2];
    entries.extend_from_slice(&parameter_word(1, 0));
    entries.extend_from_slice(&parameter_word(2, 1));
    entries.extend_from_slice(&[1, 2, 0, 0, 0]);
    let spec = AppSpec::parse(&spec_image(&entries), bind_dispatch).unwrap();
    let mut engine = Engine::new(spec, BindHost::default(), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    let error = loop {
        match engine.step() {
            Ok(StepResult::Running) => {}
            Ok(StepResult::Complete) => panic!("call should not bind"),
            Err(error) => break error,
        }
    };
    assert_eq!(error, RunError::MalformedFunctionCall);
    // The error is latched until reset.
    assert_eq!(engine.step(), Err(RunError::MalformedFunctionCall));
    engine.reset().unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
}

// --- Scenario: dictionary group -----------------------------------------

#[derive(Default)]
struct GroupHost {
    pairs: Vec<(i32, i32)>,
}

fn group_dispatch(engine: &mut Engine<GroupHost>, symbol: i32, namespace: EntryId) -> Result<AppReturn, RunError> {
    assert_eq!(symbol, 0);
    let keywords = engine.parameter_value(namespace, 1)?;
    assert!(engine.is_dictionary(keywords));
    assert_eq!(engine.count(keywords)?, 2);

    // Iteration yields keys in symbol order.
    let iterator = engine.new_iterator(keywords, false)?;
    let mut pairs = Vec::new();
    while let Some(key) = engine.at(iterator)? {
        let value = engine.at_value(iterator)?.expect("dictionary entries carry values");
        pairs.push((engine.symbol_value(key)?, engine.integer_value(value)?));
        engine.unref_entry(key)?;
        engine.unref_entry(value)?;
        engine.next(iterator)?;
    }
    engine.unref_entry(iterator)?;
    engine.context_mut().pairs = pairs;
    Ok(AppReturn::Value(engine.new_none()))
}

#[test]
fn dictionary_group_collects_named_arguments() {
    // g(**kw) with g=0, kw=1; x and y are script-side symbols 11 and 10.
    let mut entries = vec![2u8, 1];
    entries.extend_from_slice(&parameter_word(1, 3));
    let spec = AppSpec::parse(&spec_image(&entries), group_dispatch).unwrap();
    let mut engine = Engine::new(spec, GroupHost::default(), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.push_integer(1);
    code.push_named_argument(11);
    code.push_integer(2);
    code.push_named_argument(10);
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    run_to_completion(&mut engine);
    // Symbol order, not argument order.
    assert_eq!(engine.context().pairs, vec![(10, 2), (11, 1)]);
}

// --- Scenario: cycle detection ------------------------------------------

fn repr_dispatch(engine: &mut Engine<()>, symbol: i32, namespace: EntryId) -> Result<AppReturn, RunError> {
    assert_eq!(symbol, 0);
    let object = engine.parameter_value(namespace, 1)?;
    let rendered = engine.to_repr(object)?;
    Ok(AppReturn::Value(rendered))
}

#[test]
fn self_referencing_list_repr_detects_cycle() {
    let mut entries = vec![2u8, 1];
    entries.extend_from_slice(&parameter_word(1, 0));
    let spec = AppSpec::parse(&spec_image(&entries), repr_dispatch).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.new_list();
    code.dup();
    code.append_element();
    code.push_positional_argument();
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    let baseline = engine.free_count();
    let error = loop {
        match engine.step() {
            Ok(StepResult::Running) => {}
            Ok(StepResult::Complete) => panic!("repr of a cycle must not complete"),
            Err(error) => break error,
        }
    };
    assert_eq!(error, RunError::CycleDetected);
    assert_eq!(engine.state(), EngineState::Error);
    assert_eq!(engine.error(), Some(RunError::CycleDetected));

    // Reset reclaims everything, the script-made cycle included.
    engine.reset().unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.free_count(), baseline);
}

// --- Scenario: arithmetic overflow --------------------------------------

#[test]
fn multiply_overflow_is_not_committed() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.push_integer(i32::MIN);
    code.push_integer(-1);
    let multiply_address = code.address();
    code.binary(asp::Opcode::Multiply);
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    assert_eq!(engine.step().unwrap(), StepResult::Running);
    assert_eq!(engine.step().unwrap(), StepResult::Running);
    assert_eq!(engine.step(), Err(RunError::ArithmeticOverflow));
    // The failed instruction was not committed.
    assert_eq!(engine.program_counter(), multiply_address);
}

// --- App function retry (again) -----------------------------------------

#[derive(Default)]
struct PollHost {
    invocations: u32,
    saw_again: bool,
}

fn poll_dispatch(engine: &mut Engine<PollHost>, symbol: i32, _: EntryId) -> Result<AppReturn, RunError> {
    assert_eq!(symbol, 0);
    if engine.again() {
        engine.context_mut().saw_again = true;
    }
    engine.context_mut().invocations += 1;
    if engine.context().invocations < 3 {
        return Ok(AppReturn::Again);
    }
    let result = engine.new_integer(99)?;
    Ok(AppReturn::Value(result))
}

#[test]
fn app_function_again_retries_without_rebinding() {
    let entries = vec![2u8, 0];
    let spec = AppSpec::parse(&spec_image(&entries), poll_dispatch).unwrap();
    let mut engine = Engine::new(spec, PollHost::default(), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    run_to_completion(&mut engine);
    assert_eq!(engine.context().invocations, 3);
    assert!(engine.context().saw_again);
    assert!(!engine.again());
}

// --- Script functions and host-initiated calls --------------------------

#[derive(Default)]
struct RegisterHost {
    function: Option<EntryId>,
}

fn register_dispatch(engine: &mut Engine<RegisterHost>, symbol: i32, namespace: EntryId) -> Result<AppReturn, RunError> {
    assert_eq!(symbol, 0);
    let function = engine.parameter_value(namespace, 1)?;
    assert!(engine.is_function(function));
    engine.ref_entry(function);
    engine.context_mut().function = Some(function);
    Ok(AppReturn::Value(engine.new_none()))
}

#[test]
fn script_function_call_and_host_call() {
    // register(f) with register=0, f=1; the script parameter x is symbol 5.
    let mut entries = vec![2u8, 1];
    entries.extend_from_slice(&parameter_word(1, 0));
    let spec = AppSpec::parse(&spec_image(&entries), register_dispatch).unwrap();
    let mut engine = Engine::new(spec, RegisterHost::default(), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    let skip_body = code.jump();
    // double(x): return x * 2
    let body = code.address();
    code.load_variable(5);
    code.push_integer(2);
    code.binary(asp::Opcode::Multiply);
    code.return_();
    code.patch(skip_body);
    // Build the function, call it from script, then hand it to the host.
    code.push_parameter(5, ParameterKind::Plain);
    code.make_function(body);
    code.store_variable(9);
    code.push_integer(21);
    code.push_positional_argument();
    code.load_variable(9);
    code.call();
    code.pop();
    code.load_variable(9);
    code.push_positional_argument();
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    run_to_completion(&mut engine);

    // register() received double(21) == 42... indirectly: now call the
    // registered function from the host with a fresh argument.
    let function = engine.context().function.expect("function registered");
    let argument = engine.new_integer(8).unwrap();
    engine.add_positional_argument(argument, true).unwrap();
    engine.call(function).unwrap();
    while !engine.is_call_returning() {
        engine.step().unwrap();
    }
    let result = engine.return_value().unwrap();
    assert_eq!(engine.integer_value(result).unwrap(), 16);
    engine.unref_entry(result).unwrap();
}

// --- Spec literals are visible to the script ----------------------------

fn echo_dispatch(engine: &mut Engine<PrintHost>, symbol: i32, namespace: EntryId) -> Result<AppReturn, RunError> {
    assert_eq!(symbol, 3);
    let object = engine.parameter_value(namespace, 4)?;
    let rendered = engine.to_string(object)?;
    let bytes = engine.string_bytes(rendered)?;
    engine.unref_entry(rendered)?;
    engine.context_mut().printed.push((bytes.len(), bytes));
    Ok(AppReturn::Value(engine.new_none()))
}

#[test]
fn spec_variables_initialize_the_system_namespace() {
    // flag = True (0), answer = 42 (1), scale = 1.5 (2), echo(value) (3).
    let mut entries = Vec::new();
    entries.extend_from_slice(&[1, 0, 1]); // flag: boolean true
    entries.extend_from_slice(&[1, 1]); // answer: integer...
    entries.extend_from_slice(&42i32.to_le_bytes());
    entries.extend_from_slice(&[1, 2]); // scale: float...
    entries.extend_from_slice(&1.5f64.to_le_bytes());
    entries.extend_from_slice(&[2, 1]); // echo(value)
    entries.extend_from_slice(&parameter_word(4, 0));
    let spec = AppSpec::parse(&spec_image(&entries), echo_dispatch).unwrap();
    let mut engine = Engine::new(spec, PrintHost::default(), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    for symbol in [0, 1, 2] {
        code.load_variable(symbol);
        code.push_positional_argument();
        code.load_variable(3);
        code.call();
        code.pop();
    }
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    run_to_completion(&mut engine);
    let printed: Vec<&[u8]> = engine.context().printed.iter().map(|(_, bytes)| bytes.as_slice()).collect();
    assert_eq!(printed, vec![b"True".as_slice(), b"42".as_slice(), b"1.5".as_slice()]);
}

// --- Iteration and control flow -----------------------------------------

#[test]
fn loop_over_range_accumulates() {
    let mut entries = vec![2u8, 1];
    entries.extend_from_slice(&parameter_word(1, 0));
    let spec = AppSpec::parse(&spec_image(&entries), bind_sum_dispatch).unwrap();
    let mut engine = Engine::new(spec, SumHost::default(), EngineParams::default()).unwrap();

    // total = 0; for value in 1..6: total = total + value; report(total)
    let mut code = CodeBuilder::new();
    code.push_integer(0);
    code.store_variable(20);
    code.push_integer(1);
    code.push_integer(6);
    code.build_range(asp::range_mask::START | asp::range_mask::END);
    code.make_iterator(false);
    let loop_top = code.address();
    let exit = code.iterator_test();
    code.iterator_dereference();
    code.load_variable(20);
    code.binary(asp::Opcode::Add);
    code.store_variable(20);
    code.iterator_advance();
    code.jump_to(loop_top);
    code.patch(exit);
    code.pop();
    code.load_variable(20);
    code.push_positional_argument();
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    run_to_completion(&mut engine);
    assert_eq!(engine.context().total, Some(15));
}

#[derive(Default)]
struct SumHost {
    total: Option<i32>,
}

fn bind_sum_dispatch(engine: &mut Engine<SumHost>, _: i32, namespace: EntryId) -> Result<AppReturn, RunError> {
    let value = engine.parameter_value(namespace, 1)?;
    let total = engine.integer_value(value)?;
    engine.context_mut().total = Some(total);
    Ok(AppReturn::Value(engine.new_none()))
}

// --- Reset clears program state between runs ----------------------------

#[test]
fn reset_allows_rerunning() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.push_string(b"state");
    code.store_variable(7);
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    let baseline = engine.free_count();
    run_to_completion(&mut engine);
    assert!(engine.free_count() < baseline);

    engine.reset().unwrap();
    assert_eq!(engine.free_count(), baseline);
    run_to_completion(&mut engine);
    assert_eq!(engine.state(), EngineState::Complete);
}

// --- Destructuring assignment -------------------------------------------

#[test]
fn unpack_sequence_distributes_elements() {
    let mut entries = vec![2u8, 1];
    entries.extend_from_slice(&parameter_word(1, 0));
    let spec = AppSpec::parse(&spec_image(&entries), bind_sum_dispatch).unwrap();
    let mut engine = Engine::new(spec, SumHost::default(), EngineParams::default()).unwrap();

    // a, b = (40, 2); report(a + b)
    let mut code = CodeBuilder::new();
    code.new_tuple();
    code.push_integer(40);
    code.append_element();
    code.push_integer(2);
    code.append_element();
    code.unpack_sequence(2);
    code.store_variable(30);
    code.store_variable(31);
    code.load_variable(30);
    code.load_variable(31);
    code.binary(asp::Opcode::Add);
    code.push_positional_argument();
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    run_to_completion(&mut engine);
    assert_eq!(engine.context().total, Some(42));
}

#[test]
fn unpack_length_mismatch_is_reported() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.new_tuple();
    code.push_integer(1);
    code.append_element();
    code.unpack_sequence(2);
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    let error = loop {
        match engine.step() {
            Ok(StepResult::Running) => {}
            Ok(StepResult::Complete) => panic!("mismatched unpack must not complete"),
            Err(error) => break error,
        }
    };
    assert_eq!(error, RunError::SequenceMismatch);
}

// --- String formatting ---------------------------------------------------

#[test]
fn string_formatting_through_modulo() {
    let mut entries = vec![2u8, 1];
    entries.extend_from_slice(&parameter_word(1, 0));
    let spec = AppSpec::parse(&spec_image(&entries), echo_format_dispatch).unwrap();
    let mut engine = Engine::new(spec, PrintHost::default(), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.push_string(b"%s scored %d%% (%r)");
    code.new_tuple();
    code.push_string(b"asp");
    code.append_element();
    code.push_integer(97);
    code.append_element();
    code.push_boolean(true);
    code.append_element();
    code.binary(asp::Opcode::Modulo);
    code.push_positional_argument();
    code.load_variable(0);
    code.call();
    code.pop();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    run_to_completion(&mut engine);
    let printed = &engine.context().printed;
    assert_eq!(printed.len(), 1);
    assert_eq!(printed[0].1, b"asp scored 97% (True)".to_vec());
}

fn echo_format_dispatch(engine: &mut Engine<PrintHost>, _: i32, namespace: EntryId) -> Result<AppReturn, RunError> {
    let value = engine.parameter_value(namespace, 1)?;
    let bytes = engine.string_bytes(value)?;
    engine.context_mut().printed.push((bytes.len(), bytes));
    Ok(AppReturn::Value(engine.new_none()))
}

#[test]
fn bad_format_directive_is_reported() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.push_string(b"%q");
    code.push_integer(1);
    code.binary(asp::Opcode::Modulo);
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    let error = loop {
        match engine.step() {
            Ok(StepResult::Running) => {}
            Ok(StepResult::Complete) => panic!("bad directive must not complete"),
            Err(error) => break error,
        }
    };
    assert_eq!(error, RunError::InvalidFormatString);
}

// --- Loading errors ------------------------------------------------------

#[test]
fn check_value_mismatch_is_rejected() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.end();
    let result = engine.seal_code(&code.finish(CHECK ^ 1));
    assert_eq!(result, Err(asp::AddCodeError::InvalidCheckValue));
}

#[test]
fn bad_magic_is_rejected() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut image = CodeBuilder::new().finish(CHECK);
    image[0] = b'X';
    assert_eq!(engine.seal_code(&image), Err(asp::AddCodeError::InvalidFormat));
}

#[test]
fn streamed_loading_accepts_chunks() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.push_integer(5);
    code.pop();
    code.end();
    let image = code.finish(CHECK);

    // Feed the image a few bytes at a time, then seal.
    for chunk in image.chunks(3) {
        engine.add_code(chunk).unwrap();
    }
    engine.seal().unwrap();
    run_to_completion(&mut engine);
}

#[test]
fn code_buffer_capacity_is_enforced() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let params = EngineParams {
        code_capacity: Some(8),
        ..EngineParams::default()
    };
    let mut engine = Engine::new(spec, (), params).unwrap();
    let result = engine.add_code(&[0u8; 16]);
    assert_eq!(result, Err(asp::AddCodeError::OutOfCodeMemory));
}

#[test]
fn unknown_opcode_is_invalid_instruction() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut image = asp::code_header(CHECK).to_vec();
    image.push(0x7F);
    engine.seal_code(&image).unwrap();
    assert_eq!(engine.step(), Err(RunError::InvalidInstruction));
}

#[test]
fn running_off_the_end_is_reported() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    // No end instruction: one push, then nothing.
    let mut code = CodeBuilder::new();
    code.push_none();
    engine.seal_code(&code.finish(CHECK)).unwrap();

    assert_eq!(engine.step().unwrap(), StepResult::Running);
    assert_eq!(engine.step(), Err(RunError::BeyondEndOfCode));
}

#[test]
fn stepping_before_sealing_is_invalid() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();
    assert_eq!(engine.step(), Err(RunError::InvalidState));
}

// --- Script arguments ----------------------------------------------------

#[test]
fn script_arguments_are_bound_to_the_reserved_symbol() {
    let spec = AppSpec::<()>::parse(&spec_image(&[]), no_functions).unwrap();
    let mut engine = Engine::new(spec, (), EngineParams::default()).unwrap();

    let mut code = CodeBuilder::new();
    code.end();
    engine.seal_code(&code.finish(CHECK)).unwrap();
    engine.set_arguments(&["alpha", "beta"]).unwrap();

    let arguments = engine.arguments().expect("arguments bound");
    assert!(engine.is_tuple(arguments));
    assert_eq!(engine.count(arguments).unwrap(), 2);
    let first = engine.element(arguments, 0).unwrap();
    assert_eq!(engine.string_bytes(first).unwrap(), b"alpha");
    let last = engine.element(arguments, -1).unwrap();
    assert_eq!(engine.string_bytes(last).unwrap(), b"beta");
}

// --- Demand paging -------------------------------------------------------

struct PagedHost {
    image: Vec<u8>,
}

fn paged_reader(context: &mut PagedHost, offset: u32, buffer: &mut [u8]) -> Result<usize, RunError> {
    let offset = offset as usize;
    if offset >= context.image.len() {
        return Ok(0);
    }
    let available = &context.image[offset..];
    let count = available.len().min(buffer.len());
    buffer[..count].copy_from_slice(&available[..count]);
    Ok(count)
}

fn paged_no_functions(_: &mut Engine<PagedHost>, _: i32, _: EntryId) -> Result<AppReturn, RunError> {
    Err(RunError::UndefinedAppFunction)
}

#[test]
fn paged_code_executes() {
    let spec = AppSpec::parse(&spec_image(&[]), paged_no_functions).unwrap();

    let mut code = CodeBuilder::new();
    for value in 0..8 {
        code.push_integer(value);
        code.pop();
    }
    code.end();
    let image = code.finish(CHECK);

    let mut engine = Engine::new(spec, PagedHost { image }, EngineParams::default()).unwrap();
    engine.set_code_paging(2, 16, paged_reader).unwrap();
    engine.page_code().unwrap();

    run_to_completion(&mut engine);
    assert!(engine.code_page_read_count(false) > 0);
}
