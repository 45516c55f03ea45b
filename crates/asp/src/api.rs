//! The embedding API: everything a host and its app functions use to
//! inspect, build, and mutate values, manage arguments, and call into the
//! script.
//!
//! Ownership is explicit throughout. Methods returning a *borrowed* entry
//! hand out an id without touching its use count; keep it alive with
//! [`Engine::ref_entry`] if it must outlive the container it came from.
//! Methods documented as returning a *new reference* transfer one use count
//! to the caller, who releases it with [`Engine::unref_entry`] or hands it
//! to a `take` mutator. Mutators with a `take` flag consume the caller's
//! reference when `take` is true, avoiding a redundant ref/unref pair.

use std::ffi::c_void;

use crate::{
    engine::Engine,
    error::{RunError, RunResult},
    heap::{AppIntegerDestructor, AppPointerDestructor, DataType, EntryData, EntryId},
    iter, range, sequence, tree, value,
};

/// Resolved components of a range entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValues {
    pub start: i32,
    /// `None` when the range is unbounded.
    pub end: Option<i32>,
    pub step: i32,
}

impl<C> Engine<C> {
    // --- Predicates -----------------------------------------------------

    #[must_use]
    pub fn data_type(&self, entry: EntryId) -> DataType {
        self.heap.data_type(entry)
    }

    #[must_use]
    pub fn is_none(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::None
    }

    #[must_use]
    pub fn is_ellipsis(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Ellipsis
    }

    #[must_use]
    pub fn is_boolean(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Boolean
    }

    #[must_use]
    pub fn is_integer(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Integer
    }

    #[must_use]
    pub fn is_float(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Float
    }

    /// Boolean or integer.
    #[must_use]
    pub fn is_integral(&self, entry: EntryId) -> bool {
        matches!(self.data_type(entry), DataType::Boolean | DataType::Integer)
    }

    /// Integer or float.
    #[must_use]
    pub fn is_number(&self, entry: EntryId) -> bool {
        matches!(self.data_type(entry), DataType::Integer | DataType::Float)
    }

    /// Boolean, integer, or float.
    #[must_use]
    pub fn is_numeric(&self, entry: EntryId) -> bool {
        matches!(
            self.data_type(entry),
            DataType::Boolean | DataType::Integer | DataType::Float
        )
    }

    #[must_use]
    pub fn is_symbol(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Symbol
    }

    #[must_use]
    pub fn is_range(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Range
    }

    #[must_use]
    pub fn is_string(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::String
    }

    #[must_use]
    pub fn is_tuple(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Tuple
    }

    #[must_use]
    pub fn is_list(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::List
    }

    /// String, tuple, or list.
    #[must_use]
    pub fn is_sequence(&self, entry: EntryId) -> bool {
        matches!(
            self.data_type(entry),
            DataType::String | DataType::Tuple | DataType::List
        )
    }

    #[must_use]
    pub fn is_set(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Set
    }

    #[must_use]
    pub fn is_dictionary(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Dictionary
    }

    #[must_use]
    pub fn is_forward_iterator(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::ForwardIterator
    }

    #[must_use]
    pub fn is_reverse_iterator(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::ReverseIterator
    }

    #[must_use]
    pub fn is_iterator(&self, entry: EntryId) -> bool {
        matches!(
            self.data_type(entry),
            DataType::ForwardIterator | DataType::ReverseIterator
        )
    }

    /// Anything an iterator can walk.
    #[must_use]
    pub fn is_iterable(&self, entry: EntryId) -> bool {
        matches!(
            self.data_type(entry),
            DataType::Range
                | DataType::String
                | DataType::Tuple
                | DataType::List
                | DataType::Set
                | DataType::Dictionary
        )
    }

    #[must_use]
    pub fn is_function(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Function
    }

    #[must_use]
    pub fn is_module(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Module
    }

    #[must_use]
    pub fn is_app_integer_object(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::AppIntegerObject
    }

    #[must_use]
    pub fn is_app_pointer_object(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::AppPointerObject
    }

    #[must_use]
    pub fn is_app_object(&self, entry: EntryId) -> bool {
        matches!(
            self.data_type(entry),
            DataType::AppIntegerObject | DataType::AppPointerObject
        )
    }

    #[must_use]
    pub fn is_type(&self, entry: EntryId) -> bool {
        self.data_type(entry) == DataType::Type
    }

    /// Truthiness of any value.
    pub fn is_value_true(&self, entry: EntryId) -> RunResult<bool> {
        value::is_true(&self.heap, entry)
    }

    // --- Extractors -----------------------------------------------------

    /// Numeric value as an integer; imprecise float conversions report
    /// `ValueOutOfRange`.
    pub fn integer_value(&self, entry: EntryId) -> RunResult<i32> {
        value::to_integer(&self.heap, entry, true)
    }

    /// Numeric value as a float.
    pub fn float_value(&self, entry: EntryId) -> RunResult<f64> {
        value::to_float(&self.heap, entry)
    }

    pub fn symbol_value(&self, entry: EntryId) -> RunResult<i32> {
        match self.heap.get(entry) {
            EntryData::Symbol(symbol) => Ok(*symbol),
            _ => Err(RunError::UnexpectedType),
        }
    }

    /// Resolved range components.
    pub fn range_values(&self, entry: EntryId) -> RunResult<RangeValues> {
        let resolved = range::resolve(&self.heap, entry)?;
        Ok(RangeValues {
            start: resolved.start,
            end: resolved.end,
            step: resolved.step,
        })
    }

    /// Copies string bytes starting at `index` into `buffer`, returning the
    /// string's total byte size.
    pub fn string_value(&self, entry: EntryId, index: usize, buffer: &mut [u8]) -> RunResult<usize> {
        let bytes = sequence::string_bytes(&self.heap, entry)?;
        let available = bytes.len().saturating_sub(index);
        let copy = available.min(buffer.len());
        if copy > 0 {
            buffer[..copy].copy_from_slice(&bytes[index..index + copy]);
        }
        Ok(bytes.len())
    }

    /// The string's bytes as an owned vector.
    pub fn string_bytes(&self, entry: EntryId) -> RunResult<Vec<u8>> {
        sequence::string_bytes(&self.heap, entry)
    }

    /// Display form of a value as a new string entry reference. A string
    /// input is returned as itself with its use count incremented.
    pub fn to_string(&mut self, entry: EntryId) -> RunResult<EntryId> {
        if self.is_string(entry) {
            self.heap.ref_(entry);
            return Ok(entry);
        }
        value::to_string_entry(&mut self.heap, entry, false)
    }

    /// Canonical representation of a value as a new string entry reference.
    pub fn to_repr(&mut self, entry: EntryId) -> RunResult<EntryId> {
        value::to_string_entry(&mut self.heap, entry, true)
    }

    /// Element count of a container; 1 for non-containers.
    pub fn count(&self, entry: EntryId) -> RunResult<i32> {
        match self.heap.get(entry) {
            EntryData::String(seq) | EntryData::Tuple(seq) | EntryData::List(seq) => Ok(seq.count as i32),
            EntryData::Set(tree) | EntryData::Dictionary(tree) => Ok(tree.count as i32),
            EntryData::Range { .. } => range::resolve(&self.heap, entry)?.length(),
            _ => Ok(1),
        }
    }

    /// The value at `index` of a tuple or list, borrowed.
    pub fn element(&self, sequence_entry: EntryId, index: i32) -> RunResult<EntryId> {
        match self.heap.get(sequence_entry) {
            EntryData::Tuple(_) | EntryData::List(_) => sequence::value_at(&self.heap, sequence_entry, index),
            _ => Err(RunError::UnexpectedType),
        }
    }

    /// The integer at `index` of a range.
    pub fn range_element(&self, entry: EntryId, index: i32) -> RunResult<i32> {
        range::resolve(&self.heap, entry)?.element(index)
    }

    /// The byte at `index` of a string.
    pub fn string_element(&self, entry: EntryId, index: i32) -> RunResult<u8> {
        sequence::string_byte_at(&self.heap, entry, index)
    }

    /// Finds `key` in a set or dictionary. For dictionaries the bound value
    /// is returned, for sets the stored key; borrowed either way.
    pub fn find(&self, container: EntryId, key: EntryId) -> RunResult<Option<EntryId>> {
        if !matches!(self.heap.get(container), EntryData::Set(_) | EntryData::Dictionary(_)) {
            return Err(RunError::UnexpectedType);
        }
        let Some(node) = tree::find(&self.heap, container, tree::NodeKey::Entry(key))? else {
            return Ok(None);
        };
        let node = tree::node(&self.heap, node);
        Ok(Some(match node.value {
            Some(value) => value,
            None => match node.key {
                tree::NodeKey::Entry(key) => key,
                tree::NodeKey::Symbol(_) => return Err(RunError::InternalError),
            },
        }))
    }

    /// The iterator's current value as a new reference; `None` at end.
    pub fn at(&mut self, iterator: EntryId) -> RunResult<Option<EntryId>> {
        iter::dereference(&mut self.heap, iterator)
    }

    /// The value under a dictionary iterator as a new reference.
    pub fn at_value(&mut self, iterator: EntryId) -> RunResult<Option<EntryId>> {
        iter::dereference_value(&mut self.heap, iterator)
    }

    /// True when both iterators walk the same iterable and rest on the same
    /// position.
    pub fn at_same(&self, first: EntryId, second: EntryId) -> RunResult<bool> {
        iter::same(&self.heap, first, second)
    }

    /// Advances the iterator one position.
    pub fn next(&mut self, iterator: EntryId) -> RunResult<()> {
        iter::advance(&mut self.heap, iterator)
    }

    /// The iterable an iterator walks, borrowed.
    pub fn iterable(&self, iterator: EntryId) -> RunResult<EntryId> {
        iter::iterable(&self.heap, iterator)
    }

    /// App type tag of an app object.
    pub fn app_object_type(&self, entry: EntryId) -> RunResult<i16> {
        match self.heap.get(entry) {
            EntryData::AppIntegerObject { app_type, .. } | EntryData::AppPointerObject { app_type, .. } => {
                Ok(*app_type)
            }
            _ => Err(RunError::UnexpectedType),
        }
    }

    pub fn app_integer_object_values(&self, entry: EntryId) -> RunResult<(i16, i32)> {
        match self.heap.get(entry) {
            EntryData::AppIntegerObject { app_type, value, .. } => Ok((*app_type, *value)),
            _ => Err(RunError::UnexpectedType),
        }
    }

    pub fn app_pointer_object_values(&self, entry: EntryId) -> RunResult<(i16, *mut c_void)> {
        match self.heap.get(entry) {
            EntryData::AppPointerObject { app_type, value, .. } => Ok((*app_type, *value)),
            _ => Err(RunError::UnexpectedType),
        }
    }

    // --- Constructors ---------------------------------------------------

    /// All `new_*` constructors return a new reference the caller owns.
    pub fn new_none(&mut self) -> EntryId {
        self.heap.new_none()
    }

    pub fn new_ellipsis(&mut self) -> EntryId {
        self.heap.new_ellipsis()
    }

    pub fn new_boolean(&mut self, value: bool) -> EntryId {
        self.heap.new_boolean(value)
    }

    pub fn new_integer(&mut self, value: i32) -> RunResult<EntryId> {
        self.heap.alloc(EntryData::Integer(value))
    }

    pub fn new_float(&mut self, value: f64) -> RunResult<EntryId> {
        self.heap.alloc(EntryData::Float(value))
    }

    pub fn new_symbol(&mut self, symbol: i32) -> RunResult<EntryId> {
        self.heap.alloc(EntryData::Symbol(symbol))
    }

    pub fn new_range(&mut self, start: i32, end: i32, step: i32) -> RunResult<EntryId> {
        range::new(&mut self.heap, Some(start), Some(end), Some(step))
    }

    pub fn new_unbounded_range(&mut self, start: i32, step: i32) -> RunResult<EntryId> {
        range::new(&mut self.heap, Some(start), None, Some(step))
    }

    pub fn new_string(&mut self, bytes: &[u8]) -> RunResult<EntryId> {
        value::new_string(&mut self.heap, bytes)
    }

    pub fn new_string_str(&mut self, text: &str) -> RunResult<EntryId> {
        value::new_string(&mut self.heap, text.as_bytes())
    }

    pub fn new_tuple(&mut self) -> RunResult<EntryId> {
        value::new_tuple(&mut self.heap)
    }

    pub fn new_list(&mut self) -> RunResult<EntryId> {
        value::new_list(&mut self.heap)
    }

    pub fn new_set(&mut self) -> RunResult<EntryId> {
        value::new_set(&mut self.heap)
    }

    pub fn new_dictionary(&mut self) -> RunResult<EntryId> {
        value::new_dictionary(&mut self.heap)
    }

    pub fn new_iterator(&mut self, iterable: EntryId, reversed: bool) -> RunResult<EntryId> {
        iter::new(&mut self.heap, iterable, reversed)
    }

    pub fn new_app_integer_object(
        &mut self,
        app_type: i16,
        value: i32,
        destructor: Option<AppIntegerDestructor>,
    ) -> RunResult<EntryId> {
        self.heap.alloc(EntryData::AppIntegerObject {
            app_type,
            value,
            destructor,
        })
    }

    pub fn new_app_pointer_object(
        &mut self,
        app_type: i16,
        value: *mut c_void,
        destructor: Option<AppPointerDestructor>,
    ) -> RunResult<EntryId> {
        self.heap.alloc(EntryData::AppPointerObject {
            app_type,
            value,
            destructor,
        })
    }

    /// First-class type object for the type of `entry`.
    pub fn new_type(&mut self, entry: EntryId) -> RunResult<EntryId> {
        let data_type = self.data_type(entry);
        self.heap.alloc(EntryData::Type(data_type))
    }

    // --- Container mutators ---------------------------------------------

    fn keep_unless_taken(&mut self, value: EntryId, take: bool) {
        if !take {
            self.heap.ref_(value);
        }
    }

    /// Appends to a tuple under construction.
    pub fn tuple_append(&mut self, tuple: EntryId, value: EntryId, take: bool) -> RunResult<()> {
        if !self.is_tuple(tuple) {
            return Err(RunError::UnexpectedType);
        }
        self.keep_unless_taken(value, take);
        sequence::append(&mut self.heap, tuple, value).map(|_| ())
    }

    pub fn list_append(&mut self, list: EntryId, value: EntryId, take: bool) -> RunResult<()> {
        if !self.is_list(list) {
            return Err(RunError::UnexpectedType);
        }
        self.keep_unless_taken(value, take);
        sequence::append(&mut self.heap, list, value).map(|_| ())
    }

    pub fn list_insert(&mut self, list: EntryId, index: i32, value: EntryId, take: bool) -> RunResult<()> {
        if !self.is_list(list) {
            return Err(RunError::UnexpectedType);
        }
        self.keep_unless_taken(value, take);
        sequence::insert(&mut self.heap, list, index, value).map(|_| ())
    }

    pub fn list_erase(&mut self, list: EntryId, index: i32) -> RunResult<()> {
        if !self.is_list(list) {
            return Err(RunError::UnexpectedType);
        }
        sequence::erase(&mut self.heap, list, index)
    }

    /// Inserts before a list iterator's position.
    pub fn insert_at(&mut self, iterator: EntryId, value: EntryId, take: bool) -> RunResult<()> {
        self.keep_unless_taken(value, take);
        iter::insert_before(&mut self.heap, iterator, value)
    }

    /// Erases the element or member under an iterator.
    pub fn erase_at(&mut self, iterator: EntryId) -> RunResult<()> {
        iter::erase_at(&mut self.heap, iterator)
    }

    pub fn string_append(&mut self, string: EntryId, bytes: &[u8]) -> RunResult<()> {
        if !self.is_string(string) {
            return Err(RunError::UnexpectedType);
        }
        sequence::append_bytes(&mut self.heap, string, bytes)
    }

    /// Inserts a key into a set; keys must be immutable values.
    pub fn set_insert(&mut self, set: EntryId, key: EntryId, take: bool) -> RunResult<()> {
        if !self.is_set(set) {
            return Err(RunError::UnexpectedType);
        }
        if !value::is_key(&self.heap, key)? {
            return Err(RunError::UnexpectedType);
        }
        self.keep_unless_taken(key, take);
        let outcome = tree::try_insert(&mut self.heap, set, tree::NodeKey::Entry(key), None)?;
        if !outcome.inserted {
            self.heap.unref(key)?;
        }
        Ok(())
    }

    pub fn set_erase(&mut self, set: EntryId, key: EntryId) -> RunResult<()> {
        if !self.is_set(set) {
            return Err(RunError::UnexpectedType);
        }
        match tree::find(&self.heap, set, tree::NodeKey::Entry(key))? {
            Some(node) => tree::erase_node(&mut self.heap, set, node, true, true),
            None => Err(RunError::KeyNotFound),
        }
    }

    /// Inserts or reassigns a dictionary entry; keys must be immutable
    /// values. `take` covers both the key and the value.
    pub fn dictionary_insert(&mut self, dictionary: EntryId, key: EntryId, value: EntryId, take: bool) -> RunResult<()> {
        if !self.is_dictionary(dictionary) {
            return Err(RunError::UnexpectedType);
        }
        if !value::is_key(&self.heap, key)? {
            return Err(RunError::UnexpectedType);
        }
        self.keep_unless_taken(key, take);
        self.keep_unless_taken(value, take);
        let outcome = tree::try_insert(&mut self.heap, dictionary, tree::NodeKey::Entry(key), Some(value))?;
        if !outcome.inserted {
            tree::assign_value(&mut self.heap, outcome.node, Some(value))?;
            self.heap.unref(key)?;
        }
        Ok(())
    }

    pub fn dictionary_erase(&mut self, dictionary: EntryId, key: EntryId) -> RunResult<()> {
        if !self.is_dictionary(dictionary) {
            return Err(RunError::UnexpectedType);
        }
        match tree::find(&self.heap, dictionary, tree::NodeKey::Entry(key))? {
            Some(node) => tree::erase_node(&mut self.heap, dictionary, node, true, true),
            None => Err(RunError::KeyNotFound),
        }
    }

    // --- Argument building and calls ------------------------------------

    /// Appends a positional argument to the pending argument list.
    pub fn add_positional_argument(&mut self, value: EntryId, take: bool) -> RunResult<()> {
        self.keep_unless_taken(value, take);
        let list = self.ensure_argument_list()?;
        crate::args::add_positional(&mut self.heap, list, value)
    }

    pub fn add_named_argument(&mut self, symbol: i32, value: EntryId, take: bool) -> RunResult<()> {
        self.keep_unless_taken(value, take);
        let list = self.ensure_argument_list()?;
        crate::args::add_named(&mut self.heap, list, symbol, value)
    }

    /// Expands an iterable into positional arguments.
    pub fn add_iterable_group_argument(&mut self, iterable: EntryId, take: bool) -> RunResult<()> {
        let list = self.ensure_argument_list()?;
        crate::args::add_iterable_group(&mut self.heap, list, iterable)?;
        if take {
            self.heap.unref(iterable)?;
        }
        Ok(())
    }

    /// Expands a symbol-keyed dictionary into named arguments.
    pub fn add_dictionary_group_argument(&mut self, dictionary: EntryId, take: bool) -> RunResult<()> {
        let list = self.ensure_argument_list()?;
        crate::args::add_dictionary_group(&mut self.heap, list, dictionary)?;
        if take {
            self.heap.unref(dictionary)?;
        }
        Ok(())
    }

    /// Discards the pending argument list.
    pub fn clear_function_arguments(&mut self) -> RunResult<()> {
        if let Some(list) = self.argument_list.take() {
            self.heap.unref(list)?;
        }
        Ok(())
    }

    /// Calls a function entry with the pending argument list. Valid between
    /// steps, not from inside an app function dispatch. Step the engine
    /// until [`Engine::is_call_returning`], then collect the result with
    /// [`Engine::return_value`].
    pub fn call(&mut self, function: EntryId) -> RunResult<()> {
        if self.in_step() {
            return Err(RunError::InvalidContext);
        }
        match self.state {
            crate::engine::State::Ready | crate::engine::State::Running => {}
            // Calling into a completed program is allowed; stepping resumes
            // for the duration of the call.
            crate::engine::State::Complete => self.state = crate::engine::State::Running,
            _ => return Err(RunError::InvalidState),
        }
        self.heap.ref_(function);
        self.call_function(function, true).map(|_| ())
    }

    /// Collects the return value of a completed host-initiated call, as a
    /// new reference.
    pub fn return_value(&mut self) -> RunResult<EntryId> {
        if !self.is_call_returning() {
            return Err(RunError::InvalidAppFunction);
        }
        let value = self.pop()?;
        self.call_returning = false;
        Ok(value)
    }

    // --- App function locals --------------------------------------------

    /// The bound value of `symbol` in a namespace (a parameter namespace
    /// passed to an app dispatch), borrowed.
    pub fn parameter_value(&self, namespace: EntryId, symbol: i32) -> RunResult<EntryId> {
        match tree::find_symbol(&self.heap, namespace, symbol)? {
            Some(node) => tree::node(&self.heap, node).value.ok_or(RunError::NameNotFound),
            None => Err(RunError::NameNotFound),
        }
    }

    /// Loads a local from the executing app function's namespace, borrowed.
    /// Locals persist across `Again` re-invocations.
    pub fn load_local(&self, symbol: i32) -> RunResult<Option<EntryId>> {
        let namespace = self.app_function_namespace.ok_or(RunError::InvalidContext)?;
        match tree::find_symbol(&self.heap, namespace, symbol)? {
            Some(node) => Ok(tree::node(&self.heap, node).value),
            None => Ok(None),
        }
    }

    /// Stores a local in the executing app function's namespace.
    pub fn store_local(&mut self, symbol: i32, value: EntryId, take: bool) -> RunResult<()> {
        let namespace = self.app_function_namespace.ok_or(RunError::InvalidContext)?;
        self.keep_unless_taken(value, take);
        self.store_in_namespace(namespace, symbol, value)
    }

    /// Erases a local from the executing app function's namespace.
    pub fn erase_local(&mut self, symbol: i32) -> RunResult<()> {
        let namespace = self.app_function_namespace.ok_or(RunError::InvalidContext)?;
        match tree::find_symbol(&self.heap, namespace, symbol)? {
            Some(node) => tree::erase_node(&mut self.heap, namespace, node, false, true),
            None => Err(RunError::NameNotFound),
        }
    }

    // --- Reference management -------------------------------------------

    /// Adds a reference to an entry.
    pub fn ref_entry(&mut self, entry: EntryId) {
        self.heap.ref_(entry);
    }

    /// Releases a reference; the entry and transitively unreachable
    /// children return to the free list at zero.
    pub fn unref_entry(&mut self, entry: EntryId) -> RunResult<()> {
        self.heap.unref(entry)
    }

    /// Use count of an entry, for diagnostics and tests.
    #[must_use]
    pub fn use_count(&self, entry: EntryId) -> u32 {
        self.heap.use_count(entry)
    }

    /// Centralized fatal-precondition check for app functions: a false
    /// condition latches `InternalError`; an already latched error is
    /// returned unchanged.
    pub fn assert_engine(&mut self, condition: bool) -> RunResult<()> {
        if let Some(error) = self.error() {
            return Err(error);
        }
        if condition {
            Ok(())
        } else {
            let error = RunError::InternalError;
            self.state = crate::engine::State::Error(error);
            Err(error)
        }
    }
}
