//! The engine's comparison rules: a total order across all types for the
//! tree stores, the relational order scripts observe, and equality.
//!
//! The total order ranks types first, then compares within a type. Numbers
//! compare numerically across boolean, integer, and float. Equality never
//! signals a type error; relational comparison on unordered pairs signals
//! `UnexpectedType`. Every traversal runs under the cycle detection limit.

use std::cmp::Ordering;

use crate::{
    error::{RunError, RunResult},
    heap::{DataType, EntryData, EntryId, Heap},
    iter, range, sequence,
};

/// Rank of a type in the total order.
fn type_rank(data_type: DataType) -> u8 {
    match data_type {
        DataType::None => 0,
        DataType::Ellipsis => 1,
        DataType::Boolean | DataType::Integer | DataType::Float => 2,
        DataType::Symbol => 3,
        DataType::Range => 4,
        DataType::String => 5,
        DataType::Tuple => 6,
        DataType::List => 7,
        DataType::Set => 8,
        DataType::Dictionary => 9,
        DataType::ForwardIterator | DataType::ReverseIterator => 10,
        DataType::Function => 11,
        DataType::Module => 12,
        DataType::AppIntegerObject | DataType::AppPointerObject => 13,
        DataType::Type => 14,
        _ => u8::MAX,
    }
}

enum Numeric {
    Integer(i64),
    Float(f64),
}

fn as_numeric(data: &EntryData) -> Option<Numeric> {
    match data {
        EntryData::Boolean(value) => Some(Numeric::Integer(i64::from(*value))),
        EntryData::Integer(value) => Some(Numeric::Integer(i64::from(*value))),
        EntryData::Float(value) => Some(Numeric::Float(*value)),
        _ => None,
    }
}

fn numeric_order(a: &Numeric, b: &Numeric) -> Ordering {
    match (a, b) {
        (Numeric::Integer(a), Numeric::Integer(b)) => a.cmp(b),
        (Numeric::Integer(a), Numeric::Float(b)) => float_order(*a as f64, *b),
        (Numeric::Float(a), Numeric::Integer(b)) => float_order(*a, *b as f64),
        (Numeric::Float(a), Numeric::Float(b)) => float_order(*a, *b),
    }
}

/// Float ordering that stays total: NaN sorts via the IEEE total order so
/// tree keys never lose transitivity.
fn float_order(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

/// Total order over any two entries. Used as the tree comparator and as the
/// basis of equality; it never reports `UnexpectedType`.
pub(crate) fn total_order(heap: &Heap, a: EntryId, b: EntryId) -> RunResult<Ordering> {
    let mut budget = heap.cycle_detection_limit();
    order_within_budget(heap, a, b, &mut budget)
}

fn spend(budget: &mut u32) -> RunResult<()> {
    if *budget == 0 {
        return Err(RunError::CycleDetected);
    }
    *budget -= 1;
    Ok(())
}

fn order_within_budget(heap: &Heap, a: EntryId, b: EntryId, budget: &mut u32) -> RunResult<Ordering> {
    spend(budget)?;
    if a == b {
        return Ok(Ordering::Equal);
    }
    let (da, db) = (heap.get(a), heap.get(b));

    if let (Some(na), Some(nb)) = (as_numeric(da), as_numeric(db)) {
        return Ok(numeric_order(&na, &nb));
    }

    let (ra, rb) = (type_rank(da.data_type()), type_rank(db.data_type()));
    if ra != rb {
        return Ok(ra.cmp(&rb));
    }

    match (da, db) {
        (EntryData::None, EntryData::None) | (EntryData::Ellipsis, EntryData::Ellipsis) => Ok(Ordering::Equal),
        (EntryData::Symbol(a), EntryData::Symbol(b)) => Ok(a.cmp(b)),
        (EntryData::Range { .. }, EntryData::Range { .. }) => {
            let (first, second) = (range::resolve(heap, a)?, range::resolve(heap, b)?);
            Ok(first
                .start
                .cmp(&second.start)
                .then(bound_order(first.end, second.end))
                .then(first.step.cmp(&second.step)))
        }
        (EntryData::String(_), EntryData::String(_)) => {
            let (first, second) = (sequence::string_bytes(heap, a)?, sequence::string_bytes(heap, b)?);
            Ok(first.cmp(&second))
        }
        (EntryData::Tuple(sa), EntryData::Tuple(sb)) | (EntryData::List(sa), EntryData::List(sb)) => {
            let (mut ca, mut cb) = (sa.head, sb.head);
            loop {
                spend(budget)?;
                match (ca, cb) {
                    (None, None) => return Ok(Ordering::Equal),
                    (None, Some(_)) => return Ok(Ordering::Less),
                    (Some(_), None) => return Ok(Ordering::Greater),
                    (Some(ea), Some(eb)) => {
                        let order = order_within_budget(
                            heap,
                            sequence::element_value(heap, ea),
                            sequence::element_value(heap, eb),
                            budget,
                        )?;
                        if order != Ordering::Equal {
                            return Ok(order);
                        }
                        ca = sequence::next_in_chain(heap, ea);
                        cb = sequence::next_in_chain(heap, eb);
                    }
                }
            }
        }
        (EntryData::Iterator(_), EntryData::Iterator(_)) => {
            if iter::same(heap, a, b)? {
                Ok(Ordering::Equal)
            } else {
                Ok(a.cmp(&b))
            }
        }
        (EntryData::AppFunction { symbol: sa }, EntryData::AppFunction { symbol: sb }) => Ok(sa.cmp(sb)),
        (
            EntryData::ScriptFunction { address: aa, .. },
            EntryData::ScriptFunction { address: ab, .. },
        ) => Ok(aa.cmp(ab).then(a.cmp(&b))),
        (EntryData::Type(ta), EntryData::Type(tb)) => Ok(ta.cmp(tb)),
        (
            EntryData::AppIntegerObject { app_type: ta, value: va, .. },
            EntryData::AppIntegerObject { app_type: tb, value: vb, .. },
        ) => Ok(ta.cmp(tb).then(va.cmp(vb)).then(a.cmp(&b))),
        // Remaining reference types order by identity, which keeps the order
        // total without imposing a structural meaning.
        _ => Ok(a.cmp(&b)),
    }
}

/// Ordering of range ends where `None` is unbounded and sorts last.
fn bound_order(a: Option<i32>, b: Option<i32>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}

/// Equality. Never a type error; cross-rank values are simply unequal.
pub(crate) fn equal(heap: &Heap, a: EntryId, b: EntryId) -> RunResult<bool> {
    Ok(total_order(heap, a, b)? == Ordering::Equal)
}

/// The order scripts observe from relational operators. Reports
/// `UnexpectedType` for pairs with no defined order: mixed non-numeric
/// ranks, and types that only compare by identity.
pub(crate) fn relational_order(heap: &Heap, a: EntryId, b: EntryId) -> RunResult<Ordering> {
    let (da, db) = (heap.get(a), heap.get(b));
    if as_numeric(da).is_some() && as_numeric(db).is_some() {
        return total_order(heap, a, b);
    }
    let (ta, tb) = (da.data_type(), db.data_type());
    if type_rank(ta) != type_rank(tb) {
        return Err(RunError::UnexpectedType);
    }
    match ta {
        DataType::None | DataType::Ellipsis | DataType::Symbol | DataType::String | DataType::Tuple | DataType::List => {
            total_order(heap, a, b)
        }
        _ => Err(RunError::UnexpectedType),
    }
}
