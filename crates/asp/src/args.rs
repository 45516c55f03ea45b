//! The call protocol: pending argument lists and parameter binding.
//!
//! A caller accumulates arguments of four kinds: positional, named,
//! iterable-group (each element becomes a positional), and dictionary-group
//! (each symbol/value pair becomes a named). Group arguments expand at
//! append time. Binding walks positionals into plain slots, resolves named
//! arguments by symbol, collects overflow into tuple-group and
//! dictionary-group parameters, and fills what remains from defaults.
//! Missing, duplicate, and unknown arguments all report
//! `MalformedFunctionCall`.

use smallvec::SmallVec;

use crate::{
    appspec::{SpecLiteral, SpecParameter},
    error::{RunError, RunResult},
    heap::{EntryData, EntryId, Heap, ParameterKind},
    iter,
    sequence::{self, Sequence},
    tree::{self, NodeKey},
    value,
};

/// Allocates an empty argument list.
pub(crate) fn new_argument_list(heap: &mut Heap) -> RunResult<EntryId> {
    heap.alloc(EntryData::ArgumentList(Sequence::default()))
}

/// Allocates an empty parameter list.
pub(crate) fn new_parameter_list(heap: &mut Heap) -> RunResult<EntryId> {
    heap.alloc(EntryData::ParameterList(Sequence::default()))
}

/// Appends a positional argument. Ownership of the caller's reference to
/// `value` transfers to the list, even on failure.
pub(crate) fn add_positional(heap: &mut Heap, list: EntryId, value: EntryId) -> RunResult<()> {
    let argument = match heap.alloc(EntryData::Argument { symbol: None, value }) {
        Ok(argument) => argument,
        Err(error) => {
            let _ = heap.unref(value);
            return Err(error);
        }
    };
    sequence::append(heap, list, argument)?;
    Ok(())
}

/// Appends a named argument. Ownership of the caller's reference to `value`
/// transfers to the list, even on failure.
pub(crate) fn add_named(heap: &mut Heap, list: EntryId, symbol: i32, value: EntryId) -> RunResult<()> {
    let argument = match heap.alloc(EntryData::Argument {
        symbol: Some(symbol),
        value,
    }) {
        Ok(argument) => argument,
        Err(error) => {
            let _ = heap.unref(value);
            return Err(error);
        }
    };
    sequence::append(heap, list, argument)?;
    Ok(())
}

/// Expands an iterable into positional arguments. The caller keeps its
/// reference to `iterable`.
pub(crate) fn add_iterable_group(heap: &mut Heap, list: EntryId, iterable: EntryId) -> RunResult<()> {
    let iterator = iter::new(heap, iterable, false)?;
    let result = expand_iterable(heap, list, iterator);
    let unref_result = heap.unref(iterator);
    result?;
    unref_result
}

fn expand_iterable(heap: &mut Heap, list: EntryId, iterator: EntryId) -> RunResult<()> {
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;
    while let Some(element) = iter::dereference(heap, iterator)? {
        iterations += 1;
        if iterations > limit {
            let _ = heap.unref(element);
            return Err(RunError::CycleDetected);
        }
        if let Err(error) = add_positional(heap, list, element) {
            return Err(error);
        }
        iter::advance(heap, iterator)?;
    }
    Ok(())
}

/// Expands a dictionary keyed by symbols into named arguments. The caller
/// keeps its reference to `dictionary`.
pub(crate) fn add_dictionary_group(heap: &mut Heap, list: EntryId, dictionary: EntryId) -> RunResult<()> {
    if !matches!(heap.get(dictionary), EntryData::Dictionary(_)) {
        return Err(RunError::UnexpectedType);
    }
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;
    let mut current = tree::first(heap, dictionary, false)?;
    while let Some(node_id) = current {
        iterations += 1;
        if iterations > limit {
            return Err(RunError::CycleDetected);
        }
        let node = tree::node(heap, node_id);
        let value = node.value.ok_or(RunError::InternalError)?;
        let symbol = match node.key {
            NodeKey::Entry(key) => match heap.get(key) {
                EntryData::Symbol(symbol) => *symbol,
                _ => return Err(RunError::UnexpectedType),
            },
            NodeKey::Symbol(symbol) => symbol,
        };
        heap.ref_(value);
        add_named(heap, list, symbol, value)?;
        current = tree::next_node(heap, node_id, false)?;
    }
    Ok(())
}

/// Where a callee's parameters are declared.
pub(crate) enum ParameterSource<'a> {
    /// A script function's captured parameter list entry.
    List(EntryId),
    /// An app function's appspec declaration.
    Spec(&'a [SpecParameter]),
}

enum DefaultSource<'a> {
    Entry(EntryId),
    Literal(&'a SpecLiteral),
}

struct ParamInfo<'a> {
    symbol: i32,
    kind: ParameterKind,
    default: Option<DefaultSource<'a>>,
}

/// Binds an argument list against a parameter declaration, producing the
/// callee's local namespace. The argument list reference is consumed in all
/// outcomes.
pub(crate) fn bind(
    heap: &mut Heap,
    source: &ParameterSource<'_>,
    argument_list: EntryId,
) -> RunResult<EntryId> {
    let namespace = value::new_namespace(heap)?;
    match bind_into(heap, namespace, source, argument_list) {
        Ok(()) => {
            heap.unref(argument_list)?;
            Ok(namespace)
        }
        Err(error) => {
            let _ = heap.unref(namespace);
            let _ = heap.unref(argument_list);
            Err(error)
        }
    }
}

fn collect_parameters<'a>(
    heap: &Heap,
    source: &ParameterSource<'a>,
) -> RunResult<SmallVec<[ParamInfo<'a>; 8]>> {
    let mut parameters = SmallVec::new();
    match source {
        ParameterSource::Spec(declared) => {
            for parameter in *declared {
                parameters.push(ParamInfo {
                    symbol: parameter.symbol,
                    kind: parameter.kind,
                    default: parameter.default.as_ref().map(DefaultSource::Literal),
                });
            }
        }
        ParameterSource::List(list) => {
            let limit = heap.cycle_detection_limit();
            let mut iterations: u32 = 0;
            let mut current = sequence::header(heap, *list)?.head;
            while let Some(element) = current {
                iterations += 1;
                if iterations > limit {
                    return Err(RunError::CycleDetected);
                }
                let parameter = sequence::element_value(heap, element);
                match heap.get(parameter) {
                    EntryData::Parameter { symbol, kind, default } => parameters.push(ParamInfo {
                        symbol: *symbol,
                        kind: *kind,
                        default: (*default).map(DefaultSource::Entry),
                    }),
                    _ => return Err(RunError::InternalError),
                }
                current = sequence::next_in_chain(heap, element);
            }
        }
    }
    Ok(parameters)
}

/// Inserts a newly owned value reference under `symbol`, failing on
/// duplicates.
fn bind_value(heap: &mut Heap, namespace: EntryId, symbol: i32, value: EntryId) -> RunResult<()> {
    let outcome = tree::try_insert(heap, namespace, NodeKey::Symbol(symbol), Some(value))?;
    if !outcome.inserted {
        heap.unref(value)?;
        return Err(RunError::MalformedFunctionCall);
    }
    Ok(())
}

fn bind_into(
    heap: &mut Heap,
    namespace: EntryId,
    source: &ParameterSource<'_>,
    argument_list: EntryId,
) -> RunResult<()> {
    let parameters = collect_parameters(heap, source)?;
    let mut bound: SmallVec<[bool; 8]> = SmallVec::from_elem(false, parameters.len());

    // Group containers bind even when they collect nothing; creating them up
    // front lets overflow append directly.
    let mut group_tuple = None;
    let mut group_dictionary = None;
    for parameter in &parameters {
        match parameter.kind {
            ParameterKind::TupleGroup if group_tuple.is_none() => {
                let tuple = value::new_tuple(heap)?;
                bind_value(heap, namespace, parameter.symbol, tuple)?;
                group_tuple = Some(tuple);
            }
            ParameterKind::DictionaryGroup if group_dictionary.is_none() => {
                let dictionary = value::new_dictionary(heap)?;
                bind_value(heap, namespace, parameter.symbol, dictionary)?;
                group_dictionary = Some(dictionary);
            }
            _ => {}
        }
    }

    // Snapshot the argument entries; binding mutates the heap as it walks.
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;
    let mut arguments: Vec<(Option<i32>, EntryId)> = Vec::new();
    let mut current = sequence::header(heap, argument_list)?.head;
    while let Some(element) = current {
        iterations += 1;
        if iterations > limit {
            return Err(RunError::CycleDetected);
        }
        let argument = sequence::element_value(heap, element);
        match heap.get(argument) {
            EntryData::Argument { symbol, value } => arguments.push((*symbol, *value)),
            _ => return Err(RunError::InternalError),
        }
        current = sequence::next_in_chain(heap, element);
    }

    let mut next_positional = 0usize;
    for (symbol, argument_value) in arguments {
        match symbol {
            None => {
                while next_positional < parameters.len()
                    && (bound[next_positional]
                        || !matches!(
                            parameters[next_positional].kind,
                            ParameterKind::Plain | ParameterKind::Defaulted
                        ))
                {
                    next_positional += 1;
                }
                if next_positional < parameters.len() {
                    heap.ref_(argument_value);
                    bind_value(heap, namespace, parameters[next_positional].symbol, argument_value)?;
                    bound[next_positional] = true;
                } else if let Some(tuple) = group_tuple {
                    heap.ref_(argument_value);
                    sequence::append(heap, tuple, argument_value)?;
                } else {
                    return Err(RunError::MalformedFunctionCall);
                }
            }
            Some(symbol) => {
                let position = parameters.iter().position(|parameter| {
                    parameter.symbol == symbol
                        && matches!(parameter.kind, ParameterKind::Plain | ParameterKind::Defaulted)
                });
                match position {
                    Some(position) => {
                        if bound[position] {
                            return Err(RunError::MalformedFunctionCall);
                        }
                        heap.ref_(argument_value);
                        bind_value(heap, namespace, symbol, argument_value)?;
                        bound[position] = true;
                    }
                    None => match group_dictionary {
                        Some(dictionary) => {
                            let key = heap.alloc(EntryData::Symbol(symbol))?;
                            heap.ref_(argument_value);
                            let outcome =
                                tree::try_insert(heap, dictionary, NodeKey::Entry(key), Some(argument_value))?;
                            if !outcome.inserted {
                                heap.unref(key)?;
                                heap.unref(argument_value)?;
                                return Err(RunError::MalformedFunctionCall);
                            }
                        }
                        None => return Err(RunError::MalformedFunctionCall),
                    },
                }
            }
        }
    }

    // Fill what remains from defaults.
    for (position, parameter) in parameters.iter().enumerate() {
        if bound[position] || !matches!(parameter.kind, ParameterKind::Plain | ParameterKind::Defaulted) {
            continue;
        }
        match &parameter.default {
            Some(DefaultSource::Entry(default)) => {
                let default = *default;
                heap.ref_(default);
                bind_value(heap, namespace, parameter.symbol, default)?;
            }
            Some(DefaultSource::Literal(literal)) => {
                let default = literal.instantiate(heap)?;
                bind_value(heap, namespace, parameter.symbol, default)?;
            }
            None => return Err(RunError::MalformedFunctionCall),
        }
    }

    Ok(())
}
