//! Embedding API tests: constructors, predicates, containers, iterators,
//! and reference counting, all through the public surface.

use asp::{AppReturn, AppSpec, DataType, Engine, EngineParams, EntryId, RunError};
use pretty_assertions::assert_eq;

fn no_functions(_: &mut Engine<()>, _: i32, _: EntryId) -> Result<AppReturn, RunError> {
    Err(RunError::UndefinedAppFunction)
}

fn engine() -> Engine<()> {
    Engine::new(AppSpec::empty(no_functions), (), EngineParams::default()).unwrap()
}

fn engine_with_entries(data_entry_count: usize) -> Engine<()> {
    let params = EngineParams {
        data_entry_count,
        ..EngineParams::default()
    };
    Engine::new(AppSpec::empty(no_functions), (), params).unwrap()
}

#[test]
fn singletons_are_shared() {
    let mut engine = engine();
    let first = engine.new_none();
    let second = engine.new_none();
    assert_eq!(first, second);
    let count = engine.use_count(first);
    engine.unref_entry(second).unwrap();
    assert_eq!(engine.use_count(first), count - 1);

    assert_eq!(engine.new_boolean(true), engine.new_boolean(true));
    assert_ne!(engine.new_boolean(true), engine.new_boolean(false));
}

#[test]
fn predicates_and_extractors() {
    let mut engine = engine();
    let value = engine.new_integer(42).unwrap();
    assert!(engine.is_integer(value));
    assert!(engine.is_integral(value));
    assert!(engine.is_numeric(value));
    assert!(!engine.is_float(value));
    assert_eq!(engine.integer_value(value).unwrap(), 42);
    assert_eq!(engine.float_value(value).unwrap(), 42.0);

    let symbol = engine.new_symbol(-5).unwrap();
    assert!(engine.is_symbol(symbol));
    assert_eq!(engine.symbol_value(symbol).unwrap(), -5);

    let range = engine.new_unbounded_range(3, 2).unwrap();
    assert!(engine.is_range(range));
    let values = engine.range_values(range).unwrap();
    assert_eq!((values.start, values.end, values.step), (3, None, 2));

    let kind = engine.new_type(value).unwrap();
    assert!(engine.is_type(kind));
    assert_eq!(engine.data_type(value), DataType::Integer);
}

#[test]
fn out_of_data_memory_is_reported() {
    let mut engine = engine_with_entries(32);
    let mut held = Vec::new();
    let error = loop {
        match engine.new_integer(7) {
            Ok(entry) => held.push(entry),
            Err(error) => break error,
        }
    };
    assert_eq!(error, RunError::OutOfDataMemory);
    assert_eq!(engine.free_count(), 0);
    assert_eq!(engine.low_free_count(), 0);

    // Releasing everything restores the free list.
    let freed = held.len();
    for entry in held {
        engine.unref_entry(entry).unwrap();
    }
    assert_eq!(engine.free_count(), freed);
}

#[test]
fn list_mutation_and_indexing() {
    let mut engine = engine();
    let list = engine.new_list().unwrap();
    for value in [10, 20, 30] {
        let entry = engine.new_integer(value).unwrap();
        engine.list_append(list, entry, true).unwrap();
    }
    assert_eq!(engine.count(list).unwrap(), 3);

    let head = engine.element(list, 0).unwrap();
    assert_eq!(engine.integer_value(head).unwrap(), 10);
    let tail = engine.element(list, -1).unwrap();
    assert_eq!(engine.integer_value(tail).unwrap(), 30);
    assert_eq!(engine.element(list, 3), Err(RunError::ValueOutOfRange));

    let inserted = engine.new_integer(15).unwrap();
    engine.list_insert(list, 1, inserted, true).unwrap();
    let second = engine.element(list, 1).unwrap();
    assert_eq!(engine.integer_value(second).unwrap(), 15);

    engine.list_erase(list, 0).unwrap();
    let head = engine.element(list, 0).unwrap();
    assert_eq!(engine.integer_value(head).unwrap(), 15);
    assert_eq!(engine.count(list).unwrap(), 3);
}

#[test]
fn take_flag_controls_ownership() {
    let mut engine = engine();
    let list = engine.new_list().unwrap();
    let shared = engine.new_integer(1).unwrap();
    assert_eq!(engine.use_count(shared), 1);

    engine.list_append(list, shared, false).unwrap();
    // The caller keeps its reference alongside the list's.
    assert_eq!(engine.use_count(shared), 2);
    engine.unref_entry(shared).unwrap();
    assert_eq!(engine.use_count(shared), 1);
}

#[test]
fn strings_span_fragments() {
    let mut engine = engine();
    let text = engine.new_string(b"The quick brown fox ").unwrap();
    engine.string_append(text, b"jumps over the lazy dog").unwrap();
    let expected = b"The quick brown fox jumps over the lazy dog";
    assert_eq!(engine.count(text).unwrap() as usize, expected.len());
    assert_eq!(engine.string_bytes(text).unwrap(), expected);

    // Buffer fills honor the starting index and report the full size.
    let mut buffer = [0u8; 5];
    let size = engine.string_value(text, 4, &mut buffer).unwrap();
    assert_eq!(size, expected.len());
    assert_eq!(&buffer, b"quick");

    assert_eq!(engine.string_element(text, 4).unwrap(), b'q');
    assert_eq!(engine.string_element(text, -3).unwrap(), b'd');
}

#[test]
fn set_and_dictionary_enforce_key_types() {
    let mut engine = engine();
    let set = engine.new_set().unwrap();
    let key = engine.new_integer(5).unwrap();
    engine.set_insert(set, key, true).unwrap();
    assert_eq!(engine.count(set).unwrap(), 1);

    // Numerically equal keys collide across types.
    let same = engine.new_float(5.0).unwrap();
    engine.set_insert(set, same, true).unwrap();
    assert_eq!(engine.count(set).unwrap(), 1);

    let list_key = engine.new_list().unwrap();
    assert_eq!(engine.set_insert(set, list_key, false), Err(RunError::UnexpectedType));
    engine.unref_entry(list_key).unwrap();

    // Tuples of keys are keys.
    let tuple_key = engine.new_tuple().unwrap();
    let inner = engine.new_string(b"k").unwrap();
    engine.tuple_append(tuple_key, inner, true).unwrap();
    engine.set_insert(set, tuple_key, true).unwrap();
    assert_eq!(engine.count(set).unwrap(), 2);
}

#[test]
fn dictionary_find_insert_erase() {
    let mut engine = engine();
    let dictionary = engine.new_dictionary().unwrap();
    let key = engine.new_string(b"answer").unwrap();
    let value = engine.new_integer(42).unwrap();
    engine.dictionary_insert(dictionary, key, value, false).unwrap();

    let found = engine.find(dictionary, key).unwrap().expect("key present");
    assert_eq!(engine.integer_value(found).unwrap(), 42);

    // Reinsertion replaces the value.
    let replacement = engine.new_integer(43).unwrap();
    engine.dictionary_insert(dictionary, key, replacement, true).unwrap();
    assert_eq!(engine.count(dictionary).unwrap(), 1);
    let found = engine.find(dictionary, key).unwrap().expect("key present");
    assert_eq!(engine.integer_value(found).unwrap(), 43);

    engine.dictionary_erase(dictionary, key).unwrap();
    assert_eq!(engine.count(dictionary).unwrap(), 0);
    assert_eq!(engine.find(dictionary, key).unwrap(), None);
    assert_eq!(engine.dictionary_erase(dictionary, key), Err(RunError::KeyNotFound));

    engine.unref_entry(key).unwrap();
    engine.unref_entry(value).unwrap();
}

#[test]
fn iterators_walk_both_directions() {
    let mut engine = engine();
    let list = engine.new_list().unwrap();
    for value in [1, 2, 3] {
        let entry = engine.new_integer(value).unwrap();
        engine.list_append(list, entry, true).unwrap();
    }

    let mut forward = Vec::new();
    let iterator = engine.new_iterator(list, false).unwrap();
    while let Some(value) = engine.at(iterator).unwrap() {
        forward.push(engine.integer_value(value).unwrap());
        engine.unref_entry(value).unwrap();
        engine.next(iterator).unwrap();
    }
    assert_eq!(forward, vec![1, 2, 3]);
    assert_eq!(engine.next(iterator), Err(RunError::IteratorAtEnd));
    engine.unref_entry(iterator).unwrap();

    let mut backward = Vec::new();
    let iterator = engine.new_iterator(list, true).unwrap();
    assert!(engine.is_reverse_iterator(iterator));
    while let Some(value) = engine.at(iterator).unwrap() {
        backward.push(engine.integer_value(value).unwrap());
        engine.unref_entry(value).unwrap();
        engine.next(iterator).unwrap();
    }
    assert_eq!(backward, vec![3, 2, 1]);
    engine.unref_entry(iterator).unwrap();
}

#[test]
fn iterator_equality_matches_position() {
    let mut engine = engine();
    let list = engine.new_list().unwrap();
    for value in [1, 2, 3, 4] {
        let entry = engine.new_integer(value).unwrap();
        engine.list_append(list, entry, true).unwrap();
    }

    let first = engine.new_iterator(list, false).unwrap();
    let second = engine.new_iterator(list, false).unwrap();
    assert!(engine.at_same(first, second).unwrap());

    engine.next(first).unwrap();
    assert!(!engine.at_same(first, second).unwrap());
    engine.next(second).unwrap();
    assert!(engine.at_same(first, second).unwrap());

    // Dereferencing does not move the cursor.
    let value = engine.at(first).unwrap().expect("not at end");
    engine.unref_entry(value).unwrap();
    assert!(engine.at_same(first, second).unwrap());
}

#[test]
fn iterator_insert_and_erase() {
    let mut engine = engine();
    let list = engine.new_list().unwrap();
    for value in [1, 3] {
        let entry = engine.new_integer(value).unwrap();
        engine.list_append(list, entry, true).unwrap();
    }

    // Position on 3, insert 2 before it.
    let iterator = engine.new_iterator(list, false).unwrap();
    engine.next(iterator).unwrap();
    let two = engine.new_integer(2).unwrap();
    engine.insert_at(iterator, two, true).unwrap();
    assert_eq!(engine.count(list).unwrap(), 3);
    let middle = engine.element(list, 1).unwrap();
    assert_eq!(engine.integer_value(middle).unwrap(), 2);

    // Erase the element under the cursor; the iterator advances first.
    engine.erase_at(iterator).unwrap();
    assert_eq!(engine.count(list).unwrap(), 2);
    assert_eq!(engine.at(iterator).unwrap(), None);
    engine.unref_entry(iterator).unwrap();
}

#[test]
fn range_iteration_never_materializes() {
    let mut engine = engine();
    let range = engine.new_range(10, 0, -3).unwrap();
    assert_eq!(engine.count(range).unwrap(), 4);
    assert_eq!(engine.range_element(range, 1).unwrap(), 7);

    let before = engine.free_count();
    let iterator = engine.new_iterator(range, false).unwrap();
    let mut values = Vec::new();
    while let Some(value) = engine.at(iterator).unwrap() {
        values.push(engine.integer_value(value).unwrap());
        engine.unref_entry(value).unwrap();
        engine.next(iterator).unwrap();
    }
    assert_eq!(values, vec![10, 7, 4, 1]);
    engine.unref_entry(iterator).unwrap();
    assert_eq!(engine.free_count(), before);
}

#[test]
fn repr_round_trips_through_the_api() {
    let mut engine = engine();
    let tuple = engine.new_tuple().unwrap();
    let number = engine.new_integer(1).unwrap();
    engine.tuple_append(tuple, number, true).unwrap();
    let text = engine.new_string(b"it's").unwrap();
    engine.tuple_append(tuple, text, true).unwrap();

    let rendered = engine.to_repr(tuple).unwrap();
    assert_eq!(engine.string_bytes(rendered).unwrap(), b"(1, 'it\\'s')");
    engine.unref_entry(rendered).unwrap();

    // Display form of a string is the raw bytes; to_string of a string
    // returns the same entry.
    let direct = engine.to_string(text).unwrap();
    assert_eq!(direct, text);
    engine.unref_entry(direct).unwrap();
}

#[test]
fn next_symbol_counts_downward() {
    let mut engine = engine();
    let first = engine.next_symbol();
    let second = engine.next_symbol();
    assert_eq!(first, -2);
    assert_eq!(second, -3);
}

#[test]
fn unref_returns_children_to_the_free_list() {
    let mut engine = engine();
    let before = engine.free_count();

    let list = engine.new_list().unwrap();
    for value in 0..10 {
        let entry = engine.new_integer(value).unwrap();
        engine.list_append(list, entry, true).unwrap();
    }
    let nested = engine.new_string(b"a longer nested string value").unwrap();
    engine.list_append(list, nested, true).unwrap();
    assert!(engine.free_count() < before);

    engine.unref_entry(list).unwrap();
    assert_eq!(engine.free_count(), before);
}

#[test]
fn shared_child_survives_container_release() {
    let mut engine = engine();
    let shared = engine.new_string(b"shared").unwrap();
    let list = engine.new_list().unwrap();
    engine.list_append(list, shared, false).unwrap();
    assert_eq!(engine.use_count(shared), 2);

    engine.unref_entry(list).unwrap();
    assert_eq!(engine.use_count(shared), 1);
    assert_eq!(engine.string_bytes(shared).unwrap(), b"shared");
    engine.unref_entry(shared).unwrap();
}
