//! Iterator entries: cursors over iterables with forward and reverse
//! directions.
//!
//! An iterator holds a strong reference to its iterable and to the element
//! or node its cursor rests on, so erasing elsewhere in the container cannot
//! free the position out from under it. Dereference at end yields nothing;
//! dereference otherwise returns a new reference the caller owns.

use crate::{
    error::{RunError, RunResult},
    heap::{EntryData, EntryId, Heap},
    range, sequence, tree, value,
};

/// Cursor state of one iterator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Cursor {
    /// Tuple and list iteration: the current element entry.
    Element(Option<EntryId>),
    /// String iteration: the current fragment and the byte offset within it.
    String { fragment: Option<EntryId>, offset: u8 },
    /// Set, dictionary, and namespace iteration: the current node entry.
    Node(Option<EntryId>),
    /// Range iteration: the next value and an at-end flag.
    Range { next: i32, at_end: bool },
}

impl Cursor {
    /// Strong references held by the cursor.
    pub fn collect_children(&self, out: &mut Vec<EntryId>) {
        match self {
            Self::Element(Some(id)) | Self::Node(Some(id)) | Self::String { fragment: Some(id), .. } => {
                out.push(*id);
            }
            _ => {}
        }
    }

    fn position(&self) -> Option<EntryId> {
        match self {
            Self::Element(id) | Self::Node(id) | Self::String { fragment: id, .. } => *id,
            Self::Range { .. } => None,
        }
    }
}

/// Payload of an iterator entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Iter {
    pub iterable: EntryId,
    pub reversed: bool,
    pub cursor: Cursor,
}

fn read(heap: &Heap, iterator: EntryId) -> RunResult<Iter> {
    match heap.get(iterator) {
        EntryData::Iterator(iter) => Ok(*iter),
        _ => Err(RunError::UnexpectedType),
    }
}

/// Builds the initial cursor for an iterable.
fn initial_cursor(heap: &Heap, iterable: EntryId, reversed: bool) -> RunResult<Cursor> {
    match heap.get(iterable) {
        EntryData::Tuple(seq) | EntryData::List(seq) => {
            Ok(Cursor::Element(if reversed { seq.tail } else { seq.head }))
        }
        EntryData::String(seq) => {
            let fragment = if reversed { seq.tail } else { seq.head };
            let offset = match fragment {
                Some(id) if reversed => match heap.get(id) {
                    EntryData::Fragment(fragment) => fragment.as_slice().len() as u8 - 1,
                    _ => return Err(RunError::UnexpectedType),
                },
                _ => 0,
            };
            Ok(Cursor::String { fragment, offset })
        }
        EntryData::Set(_) | EntryData::Dictionary(_) => {
            Ok(Cursor::Node(tree::first(heap, iterable, reversed)?))
        }
        EntryData::Range { .. } => {
            let resolved = range::resolve(heap, iterable)?;
            if reversed {
                // A reversed unbounded range has no first value.
                match resolved.length() {
                    Ok(0) => Ok(Cursor::Range { next: 0, at_end: true }),
                    Ok(_) => Ok(Cursor::Range {
                        next: resolved.last()?,
                        at_end: false,
                    }),
                    Err(_) => Err(RunError::UnexpectedType),
                }
            } else {
                let next = resolved.start;
                Ok(Cursor::Range {
                    next,
                    at_end: resolved.at_end(next),
                })
            }
        }
        _ => Err(RunError::UnexpectedType),
    }
}

/// Allocates an iterator over `iterable`. The iterable and the initial
/// cursor position gain references owned by the iterator.
pub(crate) fn new(heap: &mut Heap, iterable: EntryId, reversed: bool) -> RunResult<EntryId> {
    let cursor = initial_cursor(heap, iterable, reversed)?;
    let id = heap.alloc(EntryData::Iterator(Iter {
        iterable,
        reversed,
        cursor,
    }))?;
    heap.ref_(iterable);
    if let Some(position) = cursor.position() {
        heap.ref_(position);
    }
    Ok(id)
}

/// Replaces the iterator's cursor, adjusting position references.
fn replace_cursor(heap: &mut Heap, iterator: EntryId, cursor: Cursor) -> RunResult<()> {
    let old = read(heap, iterator)?.cursor;
    if let Some(position) = cursor.position() {
        heap.ref_(position);
    }
    match heap.get_mut(iterator) {
        EntryData::Iterator(iter) => iter.cursor = cursor,
        _ => return Err(RunError::UnexpectedType),
    }
    if let Some(position) = old.position() {
        heap.unref(position)?;
    }
    Ok(())
}

/// True when the iterator has passed its last value.
pub(crate) fn at_end(heap: &Heap, iterator: EntryId) -> RunResult<bool> {
    let iter = read(heap, iterator)?;
    Ok(match iter.cursor {
        Cursor::Element(id) | Cursor::Node(id) | Cursor::String { fragment: id, .. } => id.is_none(),
        Cursor::Range { at_end, .. } => at_end,
    })
}

/// The current value, as a new reference the caller owns: the element value,
/// the dictionary key, a one-byte string, or a range integer. `None` at end.
pub(crate) fn dereference(heap: &mut Heap, iterator: EntryId) -> RunResult<Option<EntryId>> {
    let iter = read(heap, iterator)?;
    match iter.cursor {
        Cursor::Element(None) | Cursor::Node(None) | Cursor::String { fragment: None, .. } => Ok(None),
        Cursor::Range { at_end: true, .. } => Ok(None),
        Cursor::Element(Some(element)) => {
            let value = sequence::element_value(heap, element);
            heap.ref_(value);
            Ok(Some(value))
        }
        Cursor::Node(Some(node)) => {
            let key = tree::node(heap, node).key;
            match key {
                tree::NodeKey::Entry(key) => {
                    heap.ref_(key);
                    Ok(Some(key))
                }
                tree::NodeKey::Symbol(symbol) => Ok(Some(heap.alloc(EntryData::Symbol(symbol))?)),
            }
        }
        Cursor::String { fragment: Some(fragment), offset } => {
            let byte = match heap.get(fragment) {
                EntryData::Fragment(fragment) => fragment.as_slice()[offset as usize],
                _ => return Err(RunError::UnexpectedType),
            };
            value::new_string(heap, &[byte]).map(Some)
        }
        Cursor::Range { next, at_end: false } => heap.alloc(EntryData::Integer(next)).map(Some),
    }
}

/// The value under the current dictionary node, as a new reference.
pub(crate) fn dereference_value(heap: &mut Heap, iterator: EntryId) -> RunResult<Option<EntryId>> {
    let iter = read(heap, iterator)?;
    match iter.cursor {
        Cursor::Node(None) => Ok(None),
        Cursor::Node(Some(node)) => {
            let value = tree::node(heap, node).value;
            match value {
                Some(value) => {
                    heap.ref_(value);
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }
        _ => Err(RunError::UnexpectedType),
    }
}

/// Moves the cursor one position; advancing an iterator already at its end
/// reports `IteratorAtEnd`.
pub(crate) fn advance(heap: &mut Heap, iterator: EntryId) -> RunResult<()> {
    let iter = read(heap, iterator)?;
    let next = match iter.cursor {
        Cursor::Element(None) | Cursor::Node(None) | Cursor::String { fragment: None, .. } => {
            return Err(RunError::IteratorAtEnd);
        }
        Cursor::Range { at_end: true, .. } => return Err(RunError::IteratorAtEnd),
        Cursor::Element(Some(element)) => Cursor::Element(if iter.reversed {
            sequence::prev_in_chain(heap, element)
        } else {
            sequence::next_in_chain(heap, element)
        }),
        Cursor::Node(Some(node)) => Cursor::Node(tree::next_node(heap, node, iter.reversed)?),
        Cursor::String { fragment: Some(fragment), offset } => {
            advance_string(heap, fragment, offset, iter.reversed)?
        }
        Cursor::Range { next, at_end: false } => {
            let resolved = range::resolve(heap, iter.iterable)?;
            let step = if iter.reversed { -resolved.step } else { resolved.step };
            match next.checked_add(step) {
                None => return Err(RunError::ArithmeticOverflow),
                Some(value) => {
                    let at_end = if iter.reversed {
                        // Reverse iteration stops once it passes the start.
                        if resolved.step < 0 { value > resolved.start } else { value < resolved.start }
                    } else {
                        resolved.at_end(value)
                    };
                    Cursor::Range { next: value, at_end }
                }
            }
        }
    };
    replace_cursor(heap, iterator, next)
}

fn advance_string(heap: &Heap, fragment: EntryId, offset: u8, reversed: bool) -> RunResult<Cursor> {
    let length = match heap.get(fragment) {
        EntryData::Fragment(fragment) => fragment.as_slice().len(),
        _ => return Err(RunError::UnexpectedType),
    };
    if reversed {
        if offset > 0 {
            return Ok(Cursor::String {
                fragment: Some(fragment),
                offset: offset - 1,
            });
        }
        let prev = sequence::prev_in_chain(heap, fragment);
        let offset = match prev {
            Some(prev) => match heap.get(prev) {
                EntryData::Fragment(fragment) => fragment.as_slice().len() as u8 - 1,
                _ => return Err(RunError::UnexpectedType),
            },
            None => 0,
        };
        Ok(Cursor::String { fragment: prev, offset })
    } else {
        let next_offset = offset as usize + 1;
        if next_offset < length {
            return Ok(Cursor::String {
                fragment: Some(fragment),
                offset: next_offset as u8,
            });
        }
        Ok(Cursor::String {
            fragment: sequence::next_in_chain(heap, fragment),
            offset: 0,
        })
    }
}

/// Iterator equality: same iterable and same cursor position.
pub(crate) fn same(heap: &Heap, a: EntryId, b: EntryId) -> RunResult<bool> {
    let (a, b) = (read(heap, a)?, read(heap, b)?);
    Ok(a.iterable == b.iterable && a.reversed == b.reversed && a.cursor == b.cursor)
}

/// The iterable an iterator walks, as a borrowed id.
pub(crate) fn iterable(heap: &Heap, iterator: EntryId) -> RunResult<EntryId> {
    Ok(read(heap, iterator)?.iterable)
}

/// Inserts `value` before a list iterator's current position (append when at
/// end). Ownership of the caller's reference transfers to the list.
pub(crate) fn insert_before(heap: &mut Heap, iterator: EntryId, value: EntryId) -> RunResult<()> {
    let iter = read(heap, iterator)?;
    if !matches!(heap.get(iter.iterable), EntryData::List(_)) {
        return Err(RunError::UnexpectedType);
    }
    match iter.cursor {
        Cursor::Element(Some(element)) => {
            sequence::insert_before(heap, iter.iterable, element, value)?;
        }
        Cursor::Element(None) => {
            sequence::append(heap, iter.iterable, value)?;
        }
        _ => return Err(RunError::UnexpectedType),
    }
    Ok(())
}

/// Erases the element or node under the iterator, advancing it first so the
/// cursor stays valid.
pub(crate) fn erase_at(heap: &mut Heap, iterator: EntryId) -> RunResult<()> {
    let iter = read(heap, iterator)?;
    match iter.cursor {
        Cursor::Element(Some(element)) => {
            advance(heap, iterator)?;
            // The cursor's reference was released by the advance; the chain
            // still owns the element until it is erased here.
            sequence::erase_element(heap, iter.iterable, element)
        }
        Cursor::Node(Some(node)) => {
            advance(heap, iterator)?;
            tree::erase_node(heap, iter.iterable, node, true, true)
        }
        _ => Err(RunError::IteratorAtEnd),
    }
}
