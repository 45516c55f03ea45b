//! The standalone application's spec and app function dispatch.

use std::fs::File;

use asp::{AppReturn, Engine, EntryId, RunError};

/// Definition source for the standalone application. Regenerated at
/// startup; compiled scripts must carry the matching check value.
pub const SPEC_SOURCE: &str = "\
# Standalone application functions.
print(*values)
len(object)
repr(object)
exit()
";

const SYM_PRINT: i32 = 0;
const SYM_LEN: i32 = 1;
const SYM_REPR: i32 = 2;
const SYM_EXIT: i32 = 3;
const SYM_VALUES: i32 = 4;
const SYM_OBJECT: i32 = 5;

/// Host context for the standalone driver.
#[derive(Default)]
pub struct CliContext {
    /// The script file, held open in paging mode.
    pub script: Option<File>,
}

/// App function dispatch for the standalone spec.
pub fn dispatch(engine: &mut Engine<CliContext>, symbol: i32, namespace: EntryId) -> Result<AppReturn, RunError> {
    match symbol {
        SYM_PRINT => print(engine, namespace),
        SYM_LEN => {
            let object = engine.parameter_value(namespace, SYM_OBJECT)?;
            let count = engine.count(object)?;
            let result = engine.new_integer(count)?;
            Ok(AppReturn::Value(result))
        }
        SYM_REPR => {
            let object = engine.parameter_value(namespace, SYM_OBJECT)?;
            let result = engine.to_repr(object)?;
            Ok(AppReturn::Value(result))
        }
        SYM_EXIT => Err(RunError::Abort),
        _ => Err(RunError::UndefinedAppFunction),
    }
}

fn print(engine: &mut Engine<CliContext>, namespace: EntryId) -> Result<AppReturn, RunError> {
    let values = engine.parameter_value(namespace, SYM_VALUES)?;
    let count = engine.count(values)?;
    let mut line = String::new();
    for index in 0..count {
        let element = engine.element(values, index)?;
        let rendered = engine.to_string(element)?;
        let bytes = engine.string_bytes(rendered)?;
        engine.unref_entry(rendered)?;
        if index > 0 {
            line.push(' ');
        }
        line.push_str(&String::from_utf8_lossy(&bytes));
    }
    println!("{line}");
    Ok(AppReturn::Value(engine.new_none()))
}
