//! Object model: typed constructors, conversions, truthiness, and canonical
//! string representations.
//!
//! Representation follows the engine's canonical forms: floats render via
//! `ryu` (shortest round-trip) with Python-style exponents, strings quote
//! with single quotes and escape non-printable bytes, ranges elide
//! components equal to their defaults. Container rendering is iterative and
//! runs under the cycle detection limit, so a self-referencing container
//! reports `CycleDetected` instead of diverging.

use crate::{
    error::{RunError, RunResult},
    heap::{DataType, EntryData, EntryId, Heap},
    iter, range,
    sequence::{self, Sequence},
    tree::{self, Tree},
};

/// Allocates a string entry holding `bytes`.
pub(crate) fn new_string(heap: &mut Heap, bytes: &[u8]) -> RunResult<EntryId> {
    let id = heap.alloc(EntryData::String(Sequence::default()))?;
    if let Err(error) = sequence::append_bytes(heap, id, bytes) {
        let _ = heap.unref(id);
        return Err(error);
    }
    Ok(id)
}

pub(crate) fn new_tuple(heap: &mut Heap) -> RunResult<EntryId> {
    heap.alloc(EntryData::Tuple(Sequence::default()))
}

pub(crate) fn new_list(heap: &mut Heap) -> RunResult<EntryId> {
    heap.alloc(EntryData::List(Sequence::default()))
}

pub(crate) fn new_set(heap: &mut Heap) -> RunResult<EntryId> {
    heap.alloc(EntryData::Set(Tree::default()))
}

pub(crate) fn new_dictionary(heap: &mut Heap) -> RunResult<EntryId> {
    heap.alloc(EntryData::Dictionary(Tree::default()))
}

pub(crate) fn new_namespace(heap: &mut Heap) -> RunResult<EntryId> {
    heap.alloc(EntryData::Namespace(Tree::default()))
}

/// True when the value may key a set or dictionary: it and everything it
/// contains is immutable.
pub(crate) fn is_key(heap: &Heap, id: EntryId) -> RunResult<bool> {
    let mut budget = heap.cycle_detection_limit();
    let mut pending = vec![id];
    while let Some(id) = pending.pop() {
        if budget == 0 {
            return Err(RunError::CycleDetected);
        }
        budget -= 1;
        match heap.get(id) {
            EntryData::None
            | EntryData::Ellipsis
            | EntryData::Boolean(_)
            | EntryData::Integer(_)
            | EntryData::Float(_)
            | EntryData::Symbol(_)
            | EntryData::Range { .. }
            | EntryData::String(_)
            | EntryData::ScriptFunction { .. }
            | EntryData::AppFunction { .. }
            | EntryData::Type(_) => {}
            EntryData::Tuple(seq) => {
                let mut current = seq.head;
                while let Some(element) = current {
                    if budget == 0 {
                        return Err(RunError::CycleDetected);
                    }
                    budget -= 1;
                    pending.push(sequence::element_value(heap, element));
                    current = sequence::next_in_chain(heap, element);
                }
            }
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Truthiness: none, false, zero, and empty containers are false.
pub(crate) fn is_true(heap: &Heap, id: EntryId) -> RunResult<bool> {
    Ok(match heap.get(id) {
        EntryData::None => false,
        EntryData::Boolean(value) => *value,
        EntryData::Integer(value) => *value != 0,
        EntryData::Float(value) => *value != 0.0,
        EntryData::Range { .. } => match range::resolve(heap, id)?.length() {
            Ok(length) => length > 0,
            // Unbounded ranges always yield values.
            Err(_) => true,
        },
        EntryData::String(seq) | EntryData::Tuple(seq) | EntryData::List(seq) => seq.count > 0,
        EntryData::Set(tree) | EntryData::Dictionary(tree) => tree.count > 0,
        _ => true,
    })
}

/// Converts a float to an integer: round to nearest, NaN to zero, saturate
/// out-of-range values. With `check`, imprecise conversions become
/// `ValueOutOfRange` instead.
pub(crate) fn float_to_integer(value: f64, check: bool) -> RunResult<i32> {
    if value.is_nan() {
        return if check { Err(RunError::ValueOutOfRange) } else { Ok(0) };
    }
    let rounded = value.round();
    if rounded < f64::from(i32::MIN) {
        return if check { Err(RunError::ValueOutOfRange) } else { Ok(i32::MIN) };
    }
    if rounded > f64::from(i32::MAX) {
        return if check { Err(RunError::ValueOutOfRange) } else { Ok(i32::MAX) };
    }
    Ok(rounded as i32)
}

/// Numeric conversion to integer.
pub(crate) fn to_integer(heap: &Heap, id: EntryId, check: bool) -> RunResult<i32> {
    match heap.get(id) {
        EntryData::Boolean(value) => Ok(i32::from(*value)),
        EntryData::Integer(value) => Ok(*value),
        EntryData::Float(value) => float_to_integer(*value, check),
        _ => Err(RunError::UnexpectedType),
    }
}

/// Numeric conversion to float.
pub(crate) fn to_float(heap: &Heap, id: EntryId) -> RunResult<f64> {
    match heap.get(id) {
        EntryData::Boolean(value) => Ok(f64::from(i32::from(*value))),
        EntryData::Integer(value) => Ok(f64::from(*value)),
        EntryData::Float(value) => Ok(*value),
        _ => Err(RunError::UnexpectedType),
    }
}

/// Canonical float representation: `ryu` shortest form with Python-style
/// exponents; `nan`, `inf`, and `-inf` for non-finite values.
pub(crate) fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value.is_sign_negative() { "-inf" } else { "inf" }.to_string();
    }
    let mut buffer = ryu::Buffer::new();
    fix_exponent(buffer.format(value))
}

/// ryu produces "1e20" where the canonical form is "1e+20"; integral values
/// keep a ".0" suffix.
fn fix_exponent(s: &str) -> String {
    if let Some(e_pos) = s.find('e') {
        let (mantissa, exp_part) = s.split_at(e_pos);
        let exp = &exp_part[1..];
        if !exp.starts_with('-') {
            return format!("{mantissa}e+{exp}");
        }
        return s.to_string();
    }
    if !s.contains('.') {
        return format!("{s}.0");
    }
    s.to_string()
}

/// Type name used in rendered forms, e.g. `<type:int>`.
fn type_string(data_type: DataType) -> &'static str {
    match data_type {
        DataType::None => "None",
        DataType::Ellipsis => "...",
        DataType::Boolean => "bool",
        DataType::Integer => "int",
        DataType::Float => "float",
        DataType::Symbol => "symbol",
        DataType::Range => "range",
        DataType::String => "str",
        DataType::Tuple => "tuple",
        DataType::List => "list",
        DataType::Set => "set",
        DataType::Dictionary => "dict",
        DataType::ForwardIterator => "iter",
        DataType::ReverseIterator => "iter-rev",
        DataType::Function => "func",
        DataType::Module => "mod",
        DataType::AppIntegerObject => "app-int",
        DataType::AppPointerObject => "app-ptr",
        DataType::Type => "type",
        _ => "?",
    }
}

fn escape_into(out: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        match byte {
            0x00 => out.extend_from_slice(b"\\0"),
            0x07 => out.extend_from_slice(b"\\a"),
            0x08 => out.extend_from_slice(b"\\b"),
            0x0C => out.extend_from_slice(b"\\f"),
            0x0A => out.extend_from_slice(b"\\n"),
            0x0D => out.extend_from_slice(b"\\r"),
            0x09 => out.extend_from_slice(b"\\t"),
            0x0B => out.extend_from_slice(b"\\v"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\'' => out.extend_from_slice(b"\\'"),
            0x20..=0x7E => out.push(byte),
            _ => out.extend_from_slice(format!("\\x{byte:02x}").as_bytes()),
        }
    }
}

enum Task {
    Value(EntryId),
    Text(&'static str),
}

/// Renders the canonical representation of a value.
pub(crate) fn to_repr_bytes(heap: &Heap, id: EntryId) -> RunResult<Vec<u8>> {
    render(heap, id, true)
}

/// Renders the display form: like repr, except a top-level string renders
/// unquoted.
pub(crate) fn to_display_bytes(heap: &Heap, id: EntryId) -> RunResult<Vec<u8>> {
    render(heap, id, false)
}

/// Renders a value into a freshly allocated string entry.
pub(crate) fn to_string_entry(heap: &mut Heap, id: EntryId, repr: bool) -> RunResult<EntryId> {
    let bytes = if repr {
        to_repr_bytes(heap, id)?
    } else {
        to_display_bytes(heap, id)?
    };
    new_string(heap, &bytes)
}

fn render(heap: &Heap, id: EntryId, repr: bool) -> RunResult<Vec<u8>> {
    let mut budget = heap.cycle_detection_limit();
    let mut out = Vec::new();

    // A top-level non-repr string renders as its raw bytes.
    if !repr && matches!(heap.get(id), EntryData::String(_)) {
        return sequence::string_bytes(heap, id);
    }

    let mut stack = vec![Task::Value(id)];
    while let Some(task) = stack.pop() {
        if budget == 0 {
            return Err(RunError::CycleDetected);
        }
        budget -= 1;
        match task {
            Task::Text(text) => out.extend_from_slice(text.as_bytes()),
            Task::Value(id) => render_value(heap, id, &mut out, &mut stack, &mut budget)?,
        }
    }
    Ok(out)
}

fn collect_elements(heap: &Heap, head: Option<EntryId>, budget: &mut u32) -> RunResult<Vec<EntryId>> {
    let mut values = Vec::new();
    let mut current = head;
    while let Some(element) = current {
        if *budget == 0 {
            return Err(RunError::CycleDetected);
        }
        *budget -= 1;
        values.push(sequence::element_value(heap, element));
        current = sequence::next_in_chain(heap, element);
    }
    Ok(values)
}

fn collect_nodes(
    heap: &Heap,
    container: EntryId,
    budget: &mut u32,
) -> RunResult<Vec<(tree::NodeKey, Option<EntryId>)>> {
    let mut pairs = Vec::new();
    let mut current = tree::first(heap, container, false)?;
    while let Some(node_id) = current {
        if *budget == 0 {
            return Err(RunError::CycleDetected);
        }
        *budget -= 1;
        let node = tree::node(heap, node_id);
        pairs.push((node.key, node.value));
        current = tree::next_node(heap, node_id, false)?;
    }
    Ok(pairs)
}

fn render_value(
    heap: &Heap,
    id: EntryId,
    out: &mut Vec<u8>,
    stack: &mut Vec<Task>,
    budget: &mut u32,
) -> RunResult<()> {
    match heap.get(id) {
        EntryData::None => out.extend_from_slice(b"None"),
        EntryData::Ellipsis => out.extend_from_slice(b"..."),
        EntryData::Boolean(value) => out.extend_from_slice(if *value { b"True" } else { b"False" }),
        EntryData::Integer(value) => out.extend_from_slice(value.to_string().as_bytes()),
        EntryData::Float(value) => out.extend_from_slice(format_float(*value).as_bytes()),
        EntryData::Symbol(symbol) => out.extend_from_slice(format!("`{symbol}").as_bytes()),
        EntryData::Range { .. } => {
            let resolved = range::resolve(heap, id)?;
            let default_start = if resolved.step < 0 { -1 } else { 0 };
            if resolved.start != default_start {
                out.extend_from_slice(resolved.start.to_string().as_bytes());
            }
            out.extend_from_slice(b"..");
            if let Some(end) = resolved.end {
                out.extend_from_slice(end.to_string().as_bytes());
            }
            if resolved.step != 1 {
                out.extend_from_slice(format!(":{}", resolved.step).as_bytes());
            }
        }
        EntryData::String(_) => {
            let bytes = sequence::string_bytes(heap, id)?;
            out.push(b'\'');
            escape_into(out, &bytes);
            out.push(b'\'');
        }
        EntryData::Tuple(seq) => {
            let values = collect_elements(heap, seq.head, budget)?;
            out.push(b'(');
            let single = values.len() == 1;
            stack.push(Task::Text(if single { ",)" } else { ")" }));
            for (index, value) in values.iter().enumerate().rev() {
                stack.push(Task::Value(*value));
                if index > 0 {
                    stack.push(Task::Text(", "));
                }
            }
        }
        EntryData::List(seq) => {
            let values = collect_elements(heap, seq.head, budget)?;
            out.push(b'[');
            stack.push(Task::Text("]"));
            for (index, value) in values.iter().enumerate().rev() {
                stack.push(Task::Value(*value));
                if index > 0 {
                    stack.push(Task::Text(", "));
                }
            }
        }
        EntryData::Set(_) => {
            let pairs = collect_nodes(heap, id, budget)?;
            out.push(b'{');
            stack.push(Task::Text("}"));
            for (index, (key, _)) in pairs.iter().enumerate().rev() {
                match key {
                    tree::NodeKey::Entry(key) => stack.push(Task::Value(*key)),
                    tree::NodeKey::Symbol(_) => return Err(RunError::InternalError),
                }
                if index > 0 {
                    stack.push(Task::Text(", "));
                }
            }
        }
        EntryData::Dictionary(_) => {
            let pairs = collect_nodes(heap, id, budget)?;
            out.push(b'{');
            if pairs.is_empty() {
                // An empty dictionary renders as {:} to distinguish it from
                // an empty set.
                stack.push(Task::Text(":}"));
            } else {
                stack.push(Task::Text("}"));
                for (index, (key, value)) in pairs.iter().enumerate().rev() {
                    if let Some(value) = value {
                        stack.push(Task::Value(*value));
                    }
                    stack.push(Task::Text(": "));
                    match key {
                        tree::NodeKey::Entry(key) => stack.push(Task::Value(*key)),
                        tree::NodeKey::Symbol(_) => return Err(RunError::InternalError),
                    }
                    if index > 0 {
                        stack.push(Task::Text(", "));
                    }
                }
            }
        }
        EntryData::Iterator(data) => {
            let iterator_type = type_string(heap.data_type(id));
            let iterable_type = type_string(heap.data_type(data.iterable));
            let at_end = if iter::at_end(heap, id)? { " @end" } else { "" };
            out.extend_from_slice(format!("<{iterator_type}:{iterable_type}{at_end}>").as_bytes());
        }
        EntryData::ScriptFunction { address, .. } => {
            out.extend_from_slice(format!("<func:@{address:07X}>").as_bytes());
        }
        EntryData::AppFunction { symbol } => {
            out.extend_from_slice(format!("<func:app:{symbol}>").as_bytes());
        }
        EntryData::Module { address, .. } => {
            out.extend_from_slice(format!("<mod:@{address:07X}>").as_bytes());
        }
        EntryData::AppIntegerObject { app_type, value, .. } => {
            out.extend_from_slice(format!("<app-int:{app_type}:{value}>").as_bytes());
        }
        EntryData::AppPointerObject { app_type, value, .. } => {
            out.extend_from_slice(format!("<app-ptr:{app_type}:{value:p}>").as_bytes());
        }
        EntryData::Type(data_type) => {
            out.extend_from_slice(format!("<type:{}>", type_string(*data_type)).as_bytes());
        }
        _ => return Err(RunError::UnexpectedType),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::DEFAULT_CYCLE_DETECTION_LIMIT;

    fn test_heap() -> Heap {
        Heap::new(512, 16, DEFAULT_CYCLE_DETECTION_LIMIT).unwrap()
    }

    fn repr(heap: &Heap, id: EntryId) -> String {
        String::from_utf8(to_repr_bytes(heap, id).unwrap()).unwrap()
    }

    #[test]
    fn scalar_repr() {
        let mut heap = test_heap();
        let none = heap.new_none();
        assert_eq!(repr(&heap, none), "None");
        let yes = heap.new_boolean(true);
        assert_eq!(repr(&heap, yes), "True");
        let int = heap.alloc(EntryData::Integer(-42)).unwrap();
        assert_eq!(repr(&heap, int), "-42");
        let float = heap.alloc(EntryData::Float(2.5)).unwrap();
        assert_eq!(repr(&heap, float), "2.5");
        let whole = heap.alloc(EntryData::Float(3.0)).unwrap();
        assert_eq!(repr(&heap, whole), "3.0");
        let symbol = heap.alloc(EntryData::Symbol(7)).unwrap();
        assert_eq!(repr(&heap, symbol), "`7");
    }

    #[test]
    fn string_repr_escapes() {
        let mut heap = test_heap();
        let s = new_string(&mut heap, b"a'b\\c\n\x01").unwrap();
        assert_eq!(repr(&heap, s), "'a\\'b\\\\c\\n\\x01'");
        assert_eq!(to_display_bytes(&heap, s).unwrap(), b"a'b\\c\n\x01".to_vec());
    }

    #[test]
    fn range_repr_elides_defaults() {
        let mut heap = test_heap();
        let full = range::new(&mut heap, Some(1), Some(10), Some(2)).unwrap();
        assert_eq!(repr(&heap, full), "1..10:2");
        let plain = range::new(&mut heap, Some(0), Some(10), None).unwrap();
        assert_eq!(repr(&heap, plain), "..10");
        let unbounded = range::new(&mut heap, None, None, None).unwrap();
        assert_eq!(repr(&heap, unbounded), "..");
        let backward = range::new(&mut heap, Some(-1), None, Some(-1)).unwrap();
        assert_eq!(repr(&heap, backward), "..:-1");
    }

    #[test]
    fn container_repr() {
        let mut heap = test_heap();
        let tuple = new_tuple(&mut heap).unwrap();
        let one = heap.alloc(EntryData::Integer(1)).unwrap();
        sequence::append(&mut heap, tuple, one).unwrap();
        assert_eq!(repr(&heap, tuple), "(1,)");

        let list = new_list(&mut heap).unwrap();
        for value in [1, 2, 3] {
            let entry = heap.alloc(EntryData::Integer(value)).unwrap();
            sequence::append(&mut heap, list, entry).unwrap();
        }
        assert_eq!(repr(&heap, list), "[1, 2, 3]");

        let dict = new_dictionary(&mut heap).unwrap();
        assert_eq!(repr(&heap, dict), "{:}");
    }

    #[test]
    fn float_to_integer_policies() {
        assert_eq!(float_to_integer(2.5, false).unwrap(), 3);
        assert_eq!(float_to_integer(-2.5, false).unwrap(), -3);
        assert_eq!(float_to_integer(f64::NAN, false).unwrap(), 0);
        assert_eq!(float_to_integer(f64::INFINITY, false).unwrap(), i32::MAX);
        assert_eq!(float_to_integer(f64::NEG_INFINITY, false).unwrap(), i32::MIN);
        assert_eq!(float_to_integer(f64::NAN, true), Err(RunError::ValueOutOfRange));
        assert_eq!(float_to_integer(1e12, true), Err(RunError::ValueOutOfRange));
        assert_eq!(float_to_integer(1e12, false).unwrap(), i32::MAX);
    }

    #[test]
    fn truthiness() {
        let mut heap = test_heap();
        let none = heap.new_none();
        assert!(!is_true(&heap, none).unwrap());
        let zero = heap.alloc(EntryData::Integer(0)).unwrap();
        assert!(!is_true(&heap, zero).unwrap());
        let empty = new_list(&mut heap).unwrap();
        assert!(!is_true(&heap, empty).unwrap());
        let unbounded = range::new(&mut heap, None, None, None).unwrap();
        assert!(is_true(&heap, unbounded).unwrap());
        let hollow = range::new(&mut heap, Some(5), Some(5), None).unwrap();
        assert!(!is_true(&heap, hollow).unwrap());
    }
}
