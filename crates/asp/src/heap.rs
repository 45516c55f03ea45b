//! The data heap: a fixed-capacity arena of uniform, reference-counted
//! entries.
//!
//! Every live value is one or more entries. Entries reference each other by
//! [`EntryId`] index, never by pointer, which keeps cross-references
//! observable and makes the heap relocatable. Free entries form a
//! singly-linked list threaded through their payloads; the list head, the
//! free count, and its low-water mark are heap state.
//!
//! Index 0 of the arena is permanently reserved: `EntryId` wraps a
//! `NonZeroU32`, so `Option<EntryId>` costs nothing and the null sentinel is
//! unrepresentable by construction.

use std::{collections::BTreeMap, ffi::c_void, num::NonZeroU32};

use strum::{Display, IntoStaticStr};

use crate::{
    error::{RunError, RunResult},
    iter::Iter,
    sequence::{Fragment, Sequence},
    tree::{NodeKey, Tree, TreeNode},
};

/// Compile-time upper bound on bytes stored inline in one string fragment.
///
/// The effective capacity is a heap parameter (`fragment_capacity`), bounded
/// by this constant so cells stay fixed-size.
pub const STRING_FRAGMENT_CAPACITY: usize = 16;

/// Default number of iterations any container traversal may perform before
/// the engine reports `CycleDetected`.
pub const DEFAULT_CYCLE_DETECTION_LIMIT: u32 = 100_000;

/// Destructor callback for app integer objects, invoked when the entry is
/// freed.
pub type AppIntegerDestructor = fn(app_type: i16, value: i32);

/// Destructor callback for app pointer objects, invoked when the entry is
/// freed.
pub type AppPointerDestructor = fn(app_type: i16, value: *mut c_void);

/// Index of one entry in the data heap.
///
/// Opaque to hosts; obtained from constructors and accessors on
/// [`crate::Engine`]. Ownership is explicit: holding an `EntryId` does not
/// keep the entry alive, the reference count does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(NonZeroU32);

impl EntryId {
    pub(crate) fn from_index(index: usize) -> Self {
        let raw = u32::try_from(index).expect("EntryId::from_index: index exceeds u32");
        Self(NonZeroU32::new(raw).expect("EntryId::from_index: index 0 is reserved"))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0.get() as usize
    }
}

/// Type tag of a data entry.
///
/// The leading variants are script-visible types in comparison-rank order;
/// the trailing variants are internal carriers that never appear as values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    IntoStaticStr,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum DataType {
    None,
    Ellipsis,
    Boolean,
    Integer,
    Float,
    Symbol,
    Range,
    String,
    Tuple,
    List,
    Set,
    Dictionary,
    ForwardIterator,
    ReverseIterator,
    Function,
    Module,
    AppIntegerObject,
    AppPointerObject,
    Type,
    // Internal carriers.
    Element,
    StringFragment,
    TreeNode,
    Namespace,
    Argument,
    ArgumentList,
    Parameter,
    ParameterList,
    Free,
}

/// Kind of one declared function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ParameterKind {
    /// A required positional-or-named parameter.
    Plain,
    /// A parameter with a declared default value.
    Defaulted,
    /// Collects remaining positional arguments as a tuple.
    TupleGroup,
    /// Collects remaining named arguments as a dictionary.
    DictionaryGroup,
}

/// Payload of one heap entry. The tagged union every value is built from.
#[derive(Debug)]
pub(crate) enum EntryData {
    /// A free entry, linked into the free list.
    Free { next: Option<EntryId> },
    None,
    Ellipsis,
    Boolean(bool),
    Integer(i32),
    Float(f64),
    Symbol(i32),
    /// Components are child integer entries; an absent component takes its
    /// step-direction default.
    Range {
        start: Option<EntryId>,
        end: Option<EntryId>,
        step: Option<EntryId>,
    },
    String(Sequence),
    Tuple(Sequence),
    List(Sequence),
    Set(Tree),
    Dictionary(Tree),
    Namespace(Tree),
    Iterator(Iter),
    /// A function defined in script code.
    ScriptFunction {
        address: u32,
        parameters: EntryId,
        module: Option<EntryId>,
    },
    /// A host function; the symbol selects the appspec definition.
    AppFunction { symbol: i32 },
    Module {
        address: u32,
        namespace: EntryId,
    },
    AppIntegerObject {
        app_type: i16,
        value: i32,
        destructor: Option<AppIntegerDestructor>,
    },
    AppPointerObject {
        app_type: i16,
        value: *mut c_void,
        destructor: Option<AppPointerDestructor>,
    },
    /// A first-class type object.
    Type(DataType),
    /// One link of a sequence chain, referencing a value entry.
    Element {
        value: EntryId,
        next: Option<EntryId>,
        prev: Option<EntryId>,
    },
    /// One link of a string chain, carrying bytes inline.
    Fragment(Fragment),
    TreeNode(TreeNode),
    /// A pending call argument.
    Argument {
        symbol: Option<i32>,
        value: EntryId,
    },
    ArgumentList(Sequence),
    /// A declared script-function parameter.
    Parameter {
        symbol: i32,
        kind: ParameterKind,
        default: Option<EntryId>,
    },
    ParameterList(Sequence),
}

impl EntryData {
    /// The entry's type tag.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Free { .. } => DataType::Free,
            Self::None => DataType::None,
            Self::Ellipsis => DataType::Ellipsis,
            Self::Boolean(_) => DataType::Boolean,
            Self::Integer(_) => DataType::Integer,
            Self::Float(_) => DataType::Float,
            Self::Symbol(_) => DataType::Symbol,
            Self::Range { .. } => DataType::Range,
            Self::String(_) => DataType::String,
            Self::Tuple(_) => DataType::Tuple,
            Self::List(_) => DataType::List,
            Self::Set(_) => DataType::Set,
            Self::Dictionary(_) => DataType::Dictionary,
            Self::Namespace(_) => DataType::Namespace,
            Self::Iterator(iter) => {
                if iter.reversed {
                    DataType::ReverseIterator
                } else {
                    DataType::ForwardIterator
                }
            }
            Self::ScriptFunction { .. } | Self::AppFunction { .. } => DataType::Function,
            Self::Module { .. } => DataType::Module,
            Self::AppIntegerObject { .. } => DataType::AppIntegerObject,
            Self::AppPointerObject { .. } => DataType::AppPointerObject,
            Self::Type(_) => DataType::Type,
            Self::Element { .. } => DataType::Element,
            Self::Fragment(_) => DataType::StringFragment,
            Self::TreeNode(_) => DataType::TreeNode,
            Self::Argument { .. } => DataType::Argument,
            Self::ArgumentList(_) => DataType::ArgumentList,
            Self::Parameter { .. } => DataType::Parameter,
            Self::ParameterList(_) => DataType::ParameterList,
        }
    }

    /// Collects the entry ids this entry holds strong references to.
    ///
    /// Back-links (`prev`, tree parents) and iterator cursors into tree nodes
    /// or elements are strong as well: the cursor owns its position. Weak
    /// links are exactly the `prev` and `parent` fields, which mirror strong
    /// links held elsewhere in the same structure.
    pub fn collect_children(&self, out: &mut Vec<EntryId>) {
        match self {
            Self::Range { start, end, step } => {
                out.extend(*start);
                out.extend(*end);
                out.extend(*step);
            }
            Self::String(seq)
            | Self::Tuple(seq)
            | Self::List(seq)
            | Self::ArgumentList(seq)
            | Self::ParameterList(seq) => {
                out.extend(seq.head);
            }
            Self::Set(tree) | Self::Dictionary(tree) | Self::Namespace(tree) => {
                out.extend(tree.root);
            }
            Self::Iterator(iter) => {
                out.push(iter.iterable);
                iter.cursor.collect_children(out);
            }
            Self::ScriptFunction { parameters, module, .. } => {
                out.push(*parameters);
                out.extend(*module);
            }
            Self::Module { namespace, .. } => out.push(*namespace),
            Self::Element { value, next, .. } => {
                out.push(*value);
                out.extend(*next);
            }
            Self::Fragment(fragment) => out.extend(fragment.next),
            Self::TreeNode(node) => {
                if let NodeKey::Entry(key) = node.key {
                    out.push(key);
                }
                out.extend(node.value);
                out.extend(node.left);
                out.extend(node.right);
            }
            Self::Argument { value, .. } => out.push(*value),
            Self::Parameter { default, .. } => out.extend(*default),
            _ => {}
        }
    }
}

/// One arena cell: a use count plus the tagged payload.
#[derive(Debug)]
struct Cell {
    use_count: u32,
    data: EntryData,
}

/// Ids of the singleton entries the heap keeps alive for its whole lifetime.
#[derive(Debug, Clone, Copy)]
struct Singletons {
    none: EntryId,
    ellipsis: EntryId,
    true_value: EntryId,
    false_value: EntryId,
}

/// Snapshot of heap state for host diagnostics.
///
/// The `entries_by_type` map uses `BTreeMap` for deterministic iteration
/// order, making snapshots suitable for display without sort overhead.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HeapStats {
    /// Number of live (allocated) entries, singletons included.
    pub live_entries: usize,
    /// Number of free entries available for allocation.
    pub free_entries: usize,
    /// Total usable entry count (live + free).
    pub capacity: usize,
    /// Lowest free-entry count observed since initialization.
    pub low_free_count: usize,
    /// Breakdown of live entries by type tag name.
    pub entries_by_type: BTreeMap<&'static str, usize>,
}

/// The fixed-capacity data heap.
#[derive(Debug)]
pub(crate) struct Heap {
    entries: Vec<Cell>,
    free_head: Option<EntryId>,
    free_count: u32,
    low_free_count: u32,
    cycle_detection_limit: u32,
    fragment_capacity: usize,
    singletons: Singletons,
}

/// Minimum entry count: the reserved slot, the four singletons, and room for
/// the engine's own namespaces.
const MIN_ENTRY_COUNT: usize = 16;

impl Heap {
    /// Builds the arena, threads the free list, and allocates the four
    /// singletons.
    pub fn new(entry_count: usize, fragment_capacity: usize, cycle_detection_limit: u32) -> RunResult<Self> {
        if entry_count < MIN_ENTRY_COUNT
            || entry_count > u32::MAX as usize
            || fragment_capacity == 0
            || fragment_capacity > STRING_FRAGMENT_CAPACITY
        {
            return Err(RunError::InitializationError);
        }

        let mut entries = Vec::with_capacity(entry_count);
        // Slot 0 is the reserved null sentinel and never joins the free list.
        entries.push(Cell {
            use_count: 1,
            data: EntryData::None,
        });
        for index in 1..entry_count {
            let next = if index + 1 < entry_count {
                Some(EntryId::from_index(index + 1))
            } else {
                None
            };
            entries.push(Cell {
                use_count: 0,
                data: EntryData::Free { next },
            });
        }

        let capacity = entry_count as u32 - 1;
        let mut heap = Self {
            entries,
            free_head: Some(EntryId::from_index(1)),
            free_count: capacity,
            low_free_count: capacity,
            cycle_detection_limit,
            fragment_capacity,
            // Placeholder until the singletons are allocated below.
            singletons: Singletons {
                none: EntryId::from_index(1),
                ellipsis: EntryId::from_index(1),
                true_value: EntryId::from_index(1),
                false_value: EntryId::from_index(1),
            },
        };

        let none = heap.alloc(EntryData::None)?;
        let ellipsis = heap.alloc(EntryData::Ellipsis)?;
        let true_value = heap.alloc(EntryData::Boolean(true))?;
        let false_value = heap.alloc(EntryData::Boolean(false))?;
        heap.singletons = Singletons {
            none,
            ellipsis,
            true_value,
            false_value,
        };
        // The watermark tracks script behavior; the singletons are overhead.
        heap.low_free_count = heap.free_count;
        Ok(heap)
    }

    /// Detaches the free-list head and initializes it with the given payload
    /// and a use count of one.
    pub fn alloc(&mut self, data: EntryData) -> RunResult<EntryId> {
        let id = self.free_head.ok_or(RunError::OutOfDataMemory)?;
        let cell = &mut self.entries[id.index()];
        let EntryData::Free { next } = cell.data else {
            panic!("Heap::alloc: free list head is not free");
        };
        cell.use_count = 1;
        cell.data = data;
        self.free_head = next;
        self.free_count -= 1;
        if self.free_count < self.low_free_count {
            self.low_free_count = self.free_count;
        }
        Ok(id)
    }

    /// Increments the use count of an existing entry.
    ///
    /// # Panics
    /// Panics if the entry is free.
    pub fn ref_(&mut self, id: EntryId) {
        let cell = &mut self.entries[id.index()];
        assert!(
            !matches!(cell.data, EntryData::Free { .. }),
            "Heap::ref_: entry already freed"
        );
        cell.use_count += 1;
    }

    /// Decrements the use count, freeing the entry and transitively
    /// unreferenced children when it reaches zero.
    ///
    /// Teardown is iterative and bounded by the cycle detection limit; on
    /// budget exhaustion the remaining entries stay allocated and
    /// `CycleDetected` is reported without corrupting heap structure.
    pub fn unref(&mut self, id: EntryId) -> RunResult<()> {
        let mut pending = vec![id];
        let mut children = Vec::new();
        let mut iterations: u32 = 0;
        while let Some(id) = pending.pop() {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunError::CycleDetected);
            }

            let cell = &mut self.entries[id.index()];
            assert!(cell.use_count > 0, "Heap::unref: entry already freed");
            if cell.use_count > 1 {
                cell.use_count -= 1;
                continue;
            }

            cell.use_count = 0;
            let data = std::mem::replace(&mut cell.data, EntryData::Free { next: self.free_head });
            self.free_head = Some(id);
            self.free_count += 1;

            match &data {
                EntryData::AppIntegerObject {
                    app_type,
                    value,
                    destructor: Some(destructor),
                } => destructor(*app_type, *value),
                EntryData::AppPointerObject {
                    app_type,
                    value,
                    destructor: Some(destructor),
                } => destructor(*app_type, *value),
                _ => {}
            }

            children.clear();
            data.collect_children(&mut children);
            pending.extend_from_slice(&children);
        }
        Ok(())
    }

    /// Returns the payload stored at the given id.
    ///
    /// # Panics
    /// Panics if the entry is free.
    #[must_use]
    pub fn get(&self, id: EntryId) -> &EntryData {
        let cell = &self.entries[id.index()];
        assert!(
            !matches!(cell.data, EntryData::Free { .. }),
            "Heap::get: entry already freed"
        );
        &cell.data
    }

    /// Returns the payload mutably.
    ///
    /// # Panics
    /// Panics if the entry is free.
    #[must_use]
    pub fn get_mut(&mut self, id: EntryId) -> &mut EntryData {
        let cell = &mut self.entries[id.index()];
        assert!(
            !matches!(cell.data, EntryData::Free { .. }),
            "Heap::get_mut: entry already freed"
        );
        &mut cell.data
    }

    /// The entry's type tag.
    #[must_use]
    pub fn data_type(&self, id: EntryId) -> DataType {
        self.get(id).data_type()
    }

    /// Current use count, exposed for diagnostics and tests.
    #[must_use]
    pub fn use_count(&self, id: EntryId) -> u32 {
        self.entries[id.index()].use_count
    }

    /// The singleton `None` entry with its use count incremented.
    pub fn new_none(&mut self) -> EntryId {
        let id = self.singletons.none;
        self.ref_(id);
        id
    }

    /// The singleton `...` entry with its use count incremented.
    pub fn new_ellipsis(&mut self) -> EntryId {
        let id = self.singletons.ellipsis;
        self.ref_(id);
        id
    }

    /// The boolean singleton for `value` with its use count incremented.
    pub fn new_boolean(&mut self, value: bool) -> EntryId {
        let id = if value {
            self.singletons.true_value
        } else {
            self.singletons.false_value
        };
        self.ref_(id);
        id
    }

    /// Number of usable entries (the reserved slot excluded).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len() - 1
    }

    /// Number of free entries.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_count as usize
    }

    /// Lowest free count observed since initialization.
    #[must_use]
    pub fn low_free_count(&self) -> usize {
        self.low_free_count as usize
    }

    /// Upper bound on iterations per container traversal.
    #[must_use]
    pub fn cycle_detection_limit(&self) -> u32 {
        self.cycle_detection_limit
    }

    pub fn set_cycle_detection_limit(&mut self, limit: u32) {
        self.cycle_detection_limit = limit;
    }

    /// Effective byte capacity of one string fragment.
    #[must_use]
    pub fn fragment_capacity(&self) -> usize {
        self.fragment_capacity
    }

    /// Invokes the destructor of every live app object. Used when the heap
    /// is about to be discarded wholesale, so destructors are not skipped.
    pub fn run_remaining_destructors(&mut self) {
        for cell in &mut self.entries[1..] {
            match &mut cell.data {
                EntryData::AppIntegerObject {
                    app_type,
                    value,
                    destructor,
                } => {
                    if let Some(destructor) = destructor.take() {
                        destructor(*app_type, *value);
                    }
                }
                EntryData::AppPointerObject {
                    app_type,
                    value,
                    destructor,
                } => {
                    if let Some(destructor) = destructor.take() {
                        destructor(*app_type, *value);
                    }
                }
                _ => {}
            }
        }
    }

    /// Takes a diagnostic snapshot of the heap.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut entries_by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut live = 0usize;
        for cell in self.entries.iter().skip(1) {
            if matches!(cell.data, EntryData::Free { .. }) {
                continue;
            }
            live += 1;
            let name: &'static str = cell.data.data_type().into();
            *entries_by_type.entry(name).or_insert(0) += 1;
        }
        HeapStats {
            live_entries: live,
            free_entries: self.free_count(),
            capacity: self.capacity(),
            low_free_count: self.low_free_count(),
            entries_by_type,
        }
    }
}
