//! Container instructions: construction, element access, slicing,
//! membership, and member access on modules.

use crate::{
    compare,
    engine::Engine,
    error::{RunError, RunResult},
    heap::{DataType, EntryData, EntryId},
    range::{self, ResolvedRange},
    sequence, tree, value,
};

impl<C> Engine<C> {
    /// The integer payload of an entry, if it is an integer.
    fn integer_payload(&self, entry: EntryId) -> Option<i32> {
        match self.heap.get(entry) {
            EntryData::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// `container value -> container`
    pub(crate) fn append_element(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let container = match self.peek(0) {
            Ok(container) => container,
            Err(error) => {
                let _ = self.heap.unref(value);
                return Err(error);
            }
        };
        let result = match self.heap.data_type(container) {
            DataType::Tuple | DataType::List => sequence::append(&mut self.heap, container, value).map(|_| ()),
            DataType::String if self.heap.data_type(value) == DataType::String => {
                let bytes = sequence::string_bytes(&self.heap, value)?;
                sequence::append_bytes(&mut self.heap, container, &bytes)?;
                self.heap.unref(value)
            }
            DataType::Set => self.insert_set_member(container, value),
            _ => Err(RunError::UnexpectedType),
        };
        if result.is_err() {
            let _ = self.heap.unref(value);
        }
        result
    }

    fn insert_set_member(&mut self, set: EntryId, key: EntryId) -> RunResult<()> {
        if !value::is_key(&self.heap, key)? {
            return Err(RunError::UnexpectedType);
        }
        let outcome = tree::try_insert(&mut self.heap, set, tree::NodeKey::Entry(key), None)?;
        if !outcome.inserted {
            // Already a member; drop the redundant reference.
            self.heap.unref(key)?;
        }
        Ok(())
    }

    /// `container key value -> container`
    pub(crate) fn insert_key_value(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let key = match self.pop() {
            Ok(key) => key,
            Err(error) => {
                let _ = self.heap.unref(value);
                return Err(error);
            }
        };
        let container = match self.peek(0) {
            Ok(container) => container,
            Err(error) => {
                let _ = self.heap.unref(value);
                let _ = self.heap.unref(key);
                return Err(error);
            }
        };
        let result = self.insert_pair(container, key, value);
        if result.is_err() {
            let _ = self.heap.unref(value);
            let _ = self.heap.unref(key);
        }
        result
    }

    fn insert_pair(&mut self, container: EntryId, key: EntryId, value: EntryId) -> RunResult<()> {
        if self.heap.data_type(container) != DataType::Dictionary {
            return Err(RunError::UnexpectedType);
        }
        if !value::is_key(&self.heap, key)? {
            return Err(RunError::UnexpectedType);
        }
        let outcome = tree::try_insert(&mut self.heap, container, tree::NodeKey::Entry(key), Some(value))?;
        if !outcome.inserted {
            tree::assign_value(&mut self.heap, outcome.node, Some(value))?;
            self.heap.unref(key)?;
        }
        Ok(())
    }

    /// `container index -> value`
    pub(crate) fn load_index(&mut self) -> RunResult<()> {
        let index = self.peek(0)?;
        let container = self.peek(1)?;
        let result = self.index_lookup(container, index)?;
        self.pop_unref()?;
        self.pop_unref()?;
        self.push(result);
        Ok(())
    }

    /// Produces a newly owned reference to the indexed value or slice.
    fn index_lookup(&mut self, container: EntryId, index: EntryId) -> RunResult<EntryId> {
        let container_type = self.heap.data_type(container);
        let index_type = self.heap.data_type(index);
        match (container_type, index_type) {
            (DataType::Tuple | DataType::List, DataType::Integer) => {
                let position = self.integer_payload(index).expect("index type checked");
                let found = sequence::value_at(&self.heap, container, position)?;
                self.heap.ref_(found);
                Ok(found)
            }
            (DataType::Tuple | DataType::List, DataType::Range) => self.slice_sequence(container, index),
            (DataType::String, DataType::Integer) => {
                let position = self.integer_payload(index).expect("index type checked");
                let byte = sequence::string_byte_at(&self.heap, container, position)?;
                value::new_string(&mut self.heap, &[byte])
            }
            (DataType::String, DataType::Range) => {
                let resolved = range::resolve(&self.heap, index)?;
                let bytes = sequence::string_bytes(&self.heap, container)?;
                let selected: Vec<u8> = slice_positions(resolved, bytes.len() as i64)
                    .into_iter()
                    .map(|position| bytes[position as usize])
                    .collect();
                value::new_string(&mut self.heap, &selected)
            }
            (DataType::Dictionary, _) => {
                let node = tree::find(&self.heap, container, tree::NodeKey::Entry(index))?
                    .ok_or(RunError::KeyNotFound)?;
                let found = tree::node(&self.heap, node).value.ok_or(RunError::InternalError)?;
                self.heap.ref_(found);
                Ok(found)
            }
            (DataType::Range, DataType::Integer) => {
                let position = self.integer_payload(index).expect("index type checked");
                let resolved = range::resolve(&self.heap, container)?;
                let element = resolved.element(position)?;
                self.heap.alloc(EntryData::Integer(element))
            }
            _ => Err(RunError::UnexpectedType),
        }
    }

    fn slice_sequence(&mut self, container: EntryId, index: EntryId) -> RunResult<EntryId> {
        let resolved = range::resolve(&self.heap, index)?;
        let count = sequence::count(&self.heap, container)?;
        let result = if self.heap.data_type(container) == DataType::Tuple {
            value::new_tuple(&mut self.heap)?
        } else {
            value::new_list(&mut self.heap)?
        };
        for position in slice_positions(resolved, i64::from(count)) {
            let found = match sequence::value_at(&self.heap, container, position as i32) {
                Ok(found) => found,
                Err(error) => {
                    let _ = self.heap.unref(result);
                    return Err(error);
                }
            };
            self.heap.ref_(found);
            if let Err(error) = sequence::append(&mut self.heap, result, found) {
                let _ = self.heap.unref(result);
                return Err(error);
            }
        }
        Ok(result)
    }

    /// `container index value ->`
    pub(crate) fn store_index(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let index = match self.pop() {
            Ok(index) => index,
            Err(error) => {
                let _ = self.heap.unref(value);
                return Err(error);
            }
        };
        let container = match self.pop() {
            Ok(container) => container,
            Err(error) => {
                let _ = self.heap.unref(value);
                let _ = self.heap.unref(index);
                return Err(error);
            }
        };
        let result = self.store_into(container, index, value);
        if result.is_err() {
            let _ = self.heap.unref(value);
        }
        let _ = self.heap.unref(index);
        let _ = self.heap.unref(container);
        result
    }

    fn store_into(&mut self, container: EntryId, index: EntryId, value: EntryId) -> RunResult<()> {
        match self.heap.data_type(container) {
            DataType::List => {
                let position = self.integer_payload(index).ok_or(RunError::UnexpectedType)?;
                let element = sequence::element_at(&self.heap, container, position)?;
                let old = match self.heap.get_mut(element) {
                    EntryData::Element { value: slot, .. } => std::mem::replace(slot, value),
                    _ => return Err(RunError::InternalError),
                };
                self.heap.unref(old)
            }
            DataType::Dictionary => {
                self.heap.ref_(index);
                self.insert_pair(container, index, value).inspect_err(|_| {
                    let _ = self.heap.unref(index);
                })
            }
            _ => Err(RunError::UnexpectedType),
        }
    }

    /// `container index ->`
    pub(crate) fn erase_index(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let container = match self.pop() {
            Ok(container) => container,
            Err(error) => {
                let _ = self.heap.unref(index);
                return Err(error);
            }
        };
        let result = match self.heap.data_type(container) {
            DataType::List => match self.integer_payload(index) {
                Some(position) => sequence::erase(&mut self.heap, container, position),
                None => Err(RunError::UnexpectedType),
            },
            DataType::Set | DataType::Dictionary => {
                match tree::find(&self.heap, container, tree::NodeKey::Entry(index))? {
                    Some(node) => tree::erase_node(&mut self.heap, container, node, true, true),
                    None => Err(RunError::KeyNotFound),
                }
            }
            _ => Err(RunError::UnexpectedType),
        };
        let _ = self.heap.unref(index);
        let _ = self.heap.unref(container);
        result
    }

    /// `sequence -> e(n-1) ... e0`: destructuring assignment support.
    pub(crate) fn unpack_sequence(&mut self) -> RunResult<()> {
        let expected = self.fetch_u8()?;
        let container = self.peek(0)?;
        if !matches!(self.heap.data_type(container), DataType::Tuple | DataType::List) {
            return Err(RunError::UnexpectedType);
        }
        if sequence::count(&self.heap, container)? != u32::from(expected) {
            return Err(RunError::SequenceMismatch);
        }

        // Collect before mutating the stack so a traversal failure commits
        // nothing.
        let limit = self.heap.cycle_detection_limit();
        let mut iterations: u32 = 0;
        let mut values = Vec::with_capacity(expected as usize);
        let mut current = sequence::header(&self.heap, container)?.head;
        while let Some(element) = current {
            iterations += 1;
            if iterations > limit {
                return Err(RunError::CycleDetected);
            }
            values.push(sequence::element_value(&self.heap, element));
            current = sequence::next_in_chain(&self.heap, element);
        }

        for value in &values {
            self.heap.ref_(*value);
        }
        self.pop_unref()?;
        // First element lands on top, ready for the first store.
        for value in values.into_iter().rev() {
            self.push(value);
        }
        Ok(())
    }

    /// `value container -> boolean`
    pub(crate) fn membership(&mut self, negated: bool) -> RunResult<()> {
        let container = self.peek(0)?;
        let probe = self.peek(1)?;
        let contains = self.contains(container, probe)?;
        let result = self.heap.new_boolean(contains != negated);
        self.pop_unref()?;
        self.pop_unref()?;
        self.push(result);
        Ok(())
    }

    fn contains(&self, container: EntryId, probe: EntryId) -> RunResult<bool> {
        match self.heap.get(container) {
            EntryData::Set(_) | EntryData::Dictionary(_) => {
                Ok(tree::find(&self.heap, container, tree::NodeKey::Entry(probe))?.is_some())
            }
            EntryData::Tuple(_) | EntryData::List(_) => {
                let limit = self.heap.cycle_detection_limit();
                let mut iterations: u32 = 0;
                let mut current = sequence::header(&self.heap, container)?.head;
                while let Some(element) = current {
                    iterations += 1;
                    if iterations > limit {
                        return Err(RunError::CycleDetected);
                    }
                    if compare::equal(&self.heap, sequence::element_value(&self.heap, element), probe)? {
                        return Ok(true);
                    }
                    current = sequence::next_in_chain(&self.heap, element);
                }
                Ok(false)
            }
            EntryData::String(_) => match self.heap.get(probe) {
                EntryData::String(_) => {
                    let haystack = sequence::string_bytes(&self.heap, container)?;
                    let needle = sequence::string_bytes(&self.heap, probe)?;
                    Ok(needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle))
                }
                _ => Err(RunError::UnexpectedType),
            },
            EntryData::Range { .. } => match self.heap.get(probe) {
                EntryData::Integer(value) => {
                    let resolved = range::resolve(&self.heap, container)?;
                    Ok(range_contains(resolved, *value))
                }
                _ => Ok(false),
            },
            _ => Err(RunError::UnexpectedType),
        }
    }

    /// `module -> value`
    pub(crate) fn load_member(&mut self) -> RunResult<()> {
        let symbol = self.fetch_i32()?;
        let module = self.peek(0)?;
        let namespace = self.module_namespace_of(module)?;
        let found = match tree::find_symbol(&self.heap, namespace, symbol)? {
            Some(node) => tree::node(&self.heap, node).value.ok_or(RunError::NameNotFound)?,
            None => return Err(RunError::NameNotFound),
        };
        self.heap.ref_(found);
        self.pop_unref()?;
        self.push(found);
        Ok(())
    }

    /// `module value ->`
    pub(crate) fn store_member(&mut self) -> RunResult<()> {
        let symbol = self.fetch_i32()?;
        let value = self.pop()?;
        let module = match self.pop() {
            Ok(module) => module,
            Err(error) => {
                let _ = self.heap.unref(value);
                return Err(error);
            }
        };
        let result = match self.module_namespace_of(module) {
            Ok(namespace) => self.store_in_namespace(namespace, symbol, value),
            Err(error) => {
                let _ = self.heap.unref(value);
                Err(error)
            }
        };
        let _ = self.heap.unref(module);
        result
    }
}

/// Positions a slice selects from a sequence of the given length, following
/// clamped slice semantics in both directions.
fn slice_positions(range: ResolvedRange, length: i64) -> Vec<i64> {
    let step = i64::from(range.step);
    let mut positions = Vec::new();
    let mut start = i64::from(range.start);
    if start < 0 {
        start += length;
    }
    if step > 0 {
        let mut end = match range.end {
            Some(end) => {
                let mut end = i64::from(end);
                if end < 0 {
                    end += length;
                }
                end
            }
            None => length,
        };
        start = start.clamp(0, length);
        end = end.clamp(0, length);
        let mut position = start;
        while position < end {
            positions.push(position);
            position += step;
        }
    } else {
        let mut end = match range.end {
            Some(end) => {
                let mut end = i64::from(end);
                if end < 0 {
                    end += length;
                }
                end.max(-1)
            }
            None => -1,
        };
        start = start.min(length - 1);
        if start < 0 {
            start = -1;
        }
        end = end.min(length - 1);
        let mut position = start;
        while position > end {
            positions.push(position);
            position += step;
        }
    }
    positions
}

fn range_contains(range: ResolvedRange, value: i32) -> bool {
    let value = i64::from(value);
    let start = i64::from(range.start);
    let step = i64::from(range.step);
    let offset = value - start;
    if offset % step != 0 || offset / step < 0 {
        return false;
    }
    match range.end {
        None => true,
        Some(end) => {
            if step > 0 {
                value < i64::from(end)
            } else {
                value > i64::from(end)
            }
        }
    }
}
