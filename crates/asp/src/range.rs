//! Range semantics: component defaults, end tests, length, and element
//! lookup.
//!
//! Each of start, end, and step may be absent. Absent components take their
//! canonical defaults: step 1, start 0 (or −1 when the step is negative),
//! end unbounded. Unbounded ranges iterate forever and are never
//! materialized as concrete sequences.

use crate::{
    error::{RunError, RunResult},
    heap::{EntryData, EntryId, Heap},
};

/// A range with its defaults applied. `end` of `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedRange {
    pub start: i32,
    pub end: Option<i32>,
    pub step: i32,
}

fn component(heap: &Heap, id: Option<EntryId>) -> RunResult<Option<i32>> {
    match id {
        None => Ok(None),
        Some(id) => match heap.get(id) {
            EntryData::Integer(value) => Ok(Some(*value)),
            _ => Err(RunError::UnexpectedType),
        },
    }
}

/// Reads the raw (possibly absent) components of a range entry.
pub(crate) fn raw(heap: &Heap, range: EntryId) -> RunResult<(Option<i32>, Option<i32>, Option<i32>)> {
    match heap.get(range) {
        EntryData::Range { start, end, step } => {
            Ok((component(heap, *start)?, component(heap, *end)?, component(heap, *step)?))
        }
        _ => Err(RunError::UnexpectedType),
    }
}

/// Reads a range entry and applies the component defaults.
pub(crate) fn resolve(heap: &Heap, range: EntryId) -> RunResult<ResolvedRange> {
    let (start, end, step) = raw(heap, range)?;
    let step = step.unwrap_or(1);
    let start = start.unwrap_or(if step < 0 { -1 } else { 0 });
    Ok(ResolvedRange { start, end, step })
}

/// Allocates a range entry with the given components. A step of zero is
/// rejected.
pub(crate) fn new(
    heap: &mut Heap,
    start: Option<i32>,
    end: Option<i32>,
    step: Option<i32>,
) -> RunResult<EntryId> {
    if step == Some(0) {
        return Err(RunError::ValueOutOfRange);
    }
    let start_id = match start {
        Some(value) => Some(heap.alloc(EntryData::Integer(value))?),
        None => None,
    };
    let end_id = match end {
        Some(value) => Some(heap.alloc(EntryData::Integer(value))?),
        None => None,
    };
    let step_id = match step {
        Some(value) => Some(heap.alloc(EntryData::Integer(value))?),
        None => None,
    };
    heap.alloc(EntryData::Range {
        start: start_id,
        end: end_id,
        step: step_id,
    })
}

impl ResolvedRange {
    /// True once `current` has passed the end, respecting step direction.
    #[must_use]
    pub fn at_end(&self, current: i32) -> bool {
        match self.end {
            None => false,
            Some(end) => {
                if self.step < 0 {
                    current <= end
                } else {
                    current >= end
                }
            }
        }
    }

    /// Number of values the range yields. Unbounded ranges have no length.
    pub fn length(&self) -> RunResult<i32> {
        let Some(end) = self.end else {
            return Err(RunError::ValueOutOfRange);
        };
        let span = i64::from(end) - i64::from(self.start);
        let step = i64::from(self.step);
        let length = (span + step - step.signum()) / step;
        Ok(length.max(0) as i32)
    }

    /// The value at `index`; negative indices count from the end of a
    /// bounded range.
    pub fn element(&self, index: i32) -> RunResult<i32> {
        let mut index = i64::from(index);
        if index < 0 {
            index += i64::from(self.length()?);
        }
        if index < 0 {
            return Err(RunError::ValueOutOfRange);
        }
        if let Ok(length) = self.length()
            && index >= i64::from(length)
        {
            return Err(RunError::ValueOutOfRange);
        }
        let value = i64::from(self.start) + index * i64::from(self.step);
        i32::try_from(value).map_err(|_| RunError::ValueOutOfRange)
    }

    /// The last value a bounded range yields.
    pub fn last(&self) -> RunResult<i32> {
        let length = self.length()?;
        if length == 0 {
            return Err(RunError::ValueOutOfRange);
        }
        self.element(length - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(start: i32, end: Option<i32>, step: i32) -> ResolvedRange {
        ResolvedRange { start, end, step }
    }

    #[test]
    fn length_forward_and_backward() {
        assert_eq!(resolved(0, Some(10), 1).length().unwrap(), 10);
        assert_eq!(resolved(0, Some(10), 3).length().unwrap(), 4);
        assert_eq!(resolved(10, Some(0), -1).length().unwrap(), 10);
        assert_eq!(resolved(10, Some(0), -3).length().unwrap(), 4);
        assert_eq!(resolved(5, Some(5), 1).length().unwrap(), 0);
        assert_eq!(resolved(5, Some(0), 1).length().unwrap(), 0);
    }

    #[test]
    fn unbounded_has_no_length() {
        assert_eq!(resolved(0, None, 1).length(), Err(RunError::ValueOutOfRange));
        assert!(!resolved(0, None, 1).at_end(i32::MAX));
    }

    #[test]
    fn element_lookup() {
        let range = resolved(2, Some(12), 2);
        assert_eq!(range.element(0).unwrap(), 2);
        assert_eq!(range.element(4).unwrap(), 10);
        assert_eq!(range.element(-1).unwrap(), 10);
        assert_eq!(range.element(5), Err(RunError::ValueOutOfRange));
    }

    #[test]
    fn end_test_respects_direction() {
        let forward = resolved(0, Some(3), 1);
        assert!(!forward.at_end(2));
        assert!(forward.at_end(3));
        let backward = resolved(3, Some(0), -1);
        assert!(!backward.at_end(1));
        assert!(backward.at_end(0));
    }
}
