//! The tree store: self-balancing ordered binary trees whose nodes are heap
//! entries.
//!
//! Sets and dictionaries key their trees by value entry, ordered by the
//! engine's total order; namespaces key by inline symbol id. Nodes carry
//! parent links so iterators can walk in order without auxiliary state.
//! Balancing is red-black, performed iteratively.

use crate::{
    compare,
    error::{RunError, RunResult},
    heap::{EntryData, EntryId, Heap},
};

/// Key of one tree node: a value entry for sets and dictionaries, an inline
/// symbol id for namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKey {
    Entry(EntryId),
    Symbol(i32),
}

/// Root payload of a set, dictionary, or namespace entry.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Tree {
    pub root: Option<EntryId>,
    pub count: u32,
}

/// Payload of one tree node entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeNode {
    pub key: NodeKey,
    pub value: Option<EntryId>,
    pub left: Option<EntryId>,
    pub right: Option<EntryId>,
    pub parent: Option<EntryId>,
    pub red: bool,
}

/// Result of [`try_insert`]: the node holding the key, and whether this call
/// created it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InsertOutcome {
    pub node: EntryId,
    pub inserted: bool,
}

fn tree_of(heap: &Heap, container: EntryId) -> RunResult<Tree> {
    match heap.get(container) {
        EntryData::Set(tree) | EntryData::Dictionary(tree) | EntryData::Namespace(tree) => Ok(*tree),
        _ => Err(RunError::UnexpectedType),
    }
}

fn set_tree(heap: &mut Heap, container: EntryId, updated: Tree) {
    match heap.get_mut(container) {
        EntryData::Set(tree) | EntryData::Dictionary(tree) | EntryData::Namespace(tree) => *tree = updated,
        _ => panic!("tree::set_tree: not a tree container"),
    }
}

pub(crate) fn node(heap: &Heap, id: EntryId) -> &TreeNode {
    match heap.get(id) {
        EntryData::TreeNode(node) => node,
        _ => panic!("tree::node: not a tree node"),
    }
}

fn node_mut(heap: &mut Heap, id: EntryId) -> &mut TreeNode {
    match heap.get_mut(id) {
        EntryData::TreeNode(node) => node,
        _ => panic!("tree::node_mut: not a tree node"),
    }
}

/// Number of keys in the container.
pub(crate) fn count(heap: &Heap, container: EntryId) -> RunResult<u32> {
    Ok(tree_of(heap, container)?.count)
}

/// Orders two node keys. Symbol keys order by id; entry keys by the engine
/// total order.
fn key_order(heap: &Heap, a: NodeKey, b: NodeKey) -> RunResult<std::cmp::Ordering> {
    match (a, b) {
        (NodeKey::Symbol(a), NodeKey::Symbol(b)) => Ok(a.cmp(&b)),
        (NodeKey::Entry(a), NodeKey::Entry(b)) => compare::total_order(heap, a, b),
        _ => Err(RunError::InternalError),
    }
}

/// Finds the node holding `key`, if any.
pub(crate) fn find(heap: &Heap, container: EntryId, key: NodeKey) -> RunResult<Option<EntryId>> {
    let tree = tree_of(heap, container)?;
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;
    let mut current = tree.root;
    while let Some(id) = current {
        iterations += 1;
        if iterations > limit {
            return Err(RunError::CycleDetected);
        }
        let entry = node(heap, id);
        current = match key_order(heap, key, entry.key)? {
            std::cmp::Ordering::Less => entry.left,
            std::cmp::Ordering::Greater => entry.right,
            std::cmp::Ordering::Equal => return Ok(Some(id)),
        };
    }
    Ok(None)
}

/// Finds a namespace binding by symbol id.
pub(crate) fn find_symbol(heap: &Heap, namespace: EntryId, symbol: i32) -> RunResult<Option<EntryId>> {
    find(heap, namespace, NodeKey::Symbol(symbol))
}

fn left(heap: &Heap, id: EntryId) -> Option<EntryId> {
    node(heap, id).left
}

fn right(heap: &Heap, id: EntryId) -> Option<EntryId> {
    node(heap, id).right
}

fn parent(heap: &Heap, id: EntryId) -> Option<EntryId> {
    node(heap, id).parent
}

fn is_red(heap: &Heap, id: Option<EntryId>) -> bool {
    id.is_some_and(|id| node(heap, id).red)
}

fn set_color(heap: &mut Heap, id: EntryId, red: bool) {
    node_mut(heap, id).red = red;
}

fn set_parent(heap: &mut Heap, id: EntryId, new_parent: Option<EntryId>) {
    node_mut(heap, id).parent = new_parent;
}

/// Replaces `old` with `new` in `old`'s parent (or at the root).
fn replace_child(heap: &mut Heap, container: EntryId, old: EntryId, new: Option<EntryId>) -> RunResult<()> {
    let old_parent = parent(heap, old);
    match old_parent {
        None => {
            let mut tree = tree_of(heap, container)?;
            tree.root = new;
            set_tree(heap, container, tree);
        }
        Some(p) => {
            let p_node = node_mut(heap, p);
            if p_node.left == Some(old) {
                p_node.left = new;
            } else {
                p_node.right = new;
            }
        }
    }
    if let Some(new) = new {
        set_parent(heap, new, old_parent);
    }
    Ok(())
}

fn rotate_left(heap: &mut Heap, container: EntryId, x: EntryId) -> RunResult<()> {
    let y = right(heap, x).expect("tree::rotate_left: no right child");
    let y_left = left(heap, y);
    node_mut(heap, x).right = y_left;
    if let Some(y_left) = y_left {
        set_parent(heap, y_left, Some(x));
    }
    replace_child(heap, container, x, Some(y))?;
    node_mut(heap, y).left = Some(x);
    set_parent(heap, x, Some(y));
    Ok(())
}

fn rotate_right(heap: &mut Heap, container: EntryId, x: EntryId) -> RunResult<()> {
    let y = left(heap, x).expect("tree::rotate_right: no left child");
    let y_right = right(heap, y);
    node_mut(heap, x).left = y_right;
    if let Some(y_right) = y_right {
        set_parent(heap, y_right, Some(x));
    }
    replace_child(heap, container, x, Some(y))?;
    node_mut(heap, y).right = Some(x);
    set_parent(heap, x, Some(y));
    Ok(())
}

/// Inserts `key` if absent. On insertion the caller's references to the key
/// entry and value transfer to the tree; when the key already exists the
/// caller keeps ownership of both and decides what to do with them.
pub(crate) fn try_insert(
    heap: &mut Heap,
    container: EntryId,
    key: NodeKey,
    value: Option<EntryId>,
) -> RunResult<InsertOutcome> {
    let mut tree = tree_of(heap, container)?;
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;

    // Standard binary search descent, remembering the attachment point.
    let mut attach: Option<(EntryId, std::cmp::Ordering)> = None;
    let mut current = tree.root;
    while let Some(id) = current {
        iterations += 1;
        if iterations > limit {
            return Err(RunError::CycleDetected);
        }
        let entry = node(heap, id);
        let order = key_order(heap, key, entry.key)?;
        current = match order {
            std::cmp::Ordering::Less => entry.left,
            std::cmp::Ordering::Greater => entry.right,
            std::cmp::Ordering::Equal => {
                return Ok(InsertOutcome {
                    node: id,
                    inserted: false,
                });
            }
        };
        attach = Some((id, order));
    }

    let new_node = heap.alloc(EntryData::TreeNode(TreeNode {
        key,
        value,
        left: None,
        right: None,
        parent: attach.map(|(id, _)| id),
        red: true,
    }))?;

    match attach {
        None => tree.root = Some(new_node),
        Some((p, std::cmp::Ordering::Less)) => node_mut(heap, p).left = Some(new_node),
        Some((p, _)) => node_mut(heap, p).right = Some(new_node),
    }
    tree.count += 1;
    set_tree(heap, container, tree);

    insert_fixup(heap, container, new_node)?;
    Ok(InsertOutcome {
        node: new_node,
        inserted: true,
    })
}

fn insert_fixup(heap: &mut Heap, container: EntryId, mut z: EntryId) -> RunResult<()> {
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;
    while let Some(p) = parent(heap, z) {
        iterations += 1;
        if iterations > limit {
            return Err(RunError::CycleDetected);
        }
        if !node(heap, p).red {
            break;
        }
        // A red parent is never the root, so the grandparent exists.
        let g = parent(heap, p).expect("tree::insert_fixup: red root");
        if Some(p) == left(heap, g) {
            let uncle = right(heap, g);
            if is_red(heap, uncle) {
                set_color(heap, p, false);
                set_color(heap, uncle.expect("red uncle"), false);
                set_color(heap, g, true);
                z = g;
            } else {
                if Some(z) == right(heap, p) {
                    z = p;
                    rotate_left(heap, container, z)?;
                }
                let p = parent(heap, z).expect("tree::insert_fixup: lost parent");
                let g = parent(heap, p).expect("tree::insert_fixup: lost grandparent");
                set_color(heap, p, false);
                set_color(heap, g, true);
                rotate_right(heap, container, g)?;
            }
        } else {
            let uncle = left(heap, g);
            if is_red(heap, uncle) {
                set_color(heap, p, false);
                set_color(heap, uncle.expect("red uncle"), false);
                set_color(heap, g, true);
                z = g;
            } else {
                if Some(z) == left(heap, p) {
                    z = p;
                    rotate_right(heap, container, z)?;
                }
                let p = parent(heap, z).expect("tree::insert_fixup: lost parent");
                let g = parent(heap, p).expect("tree::insert_fixup: lost grandparent");
                set_color(heap, p, false);
                set_color(heap, g, true);
                rotate_left(heap, container, g)?;
            }
        }
    }
    let tree = tree_of(heap, container)?;
    if let Some(root) = tree.root {
        set_color(heap, root, false);
    }
    Ok(())
}

/// Replaces a node's value, unreferencing the previous one. Ownership of the
/// caller's reference to `value` transfers to the tree.
pub(crate) fn assign_value(heap: &mut Heap, node_id: EntryId, value: Option<EntryId>) -> RunResult<()> {
    let old = std::mem::replace(&mut node_mut(heap, node_id).value, value);
    if let Some(old) = old {
        heap.unref(old)?;
    }
    Ok(())
}

/// Smallest (or largest, when `reversed`) node of the container.
pub(crate) fn first(heap: &Heap, container: EntryId, reversed: bool) -> RunResult<Option<EntryId>> {
    let tree = tree_of(heap, container)?;
    let Some(mut current) = tree.root else {
        return Ok(None);
    };
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;
    loop {
        iterations += 1;
        if iterations > limit {
            return Err(RunError::CycleDetected);
        }
        let next = if reversed { right(heap, current) } else { left(heap, current) };
        match next {
            Some(next) => current = next,
            None => return Ok(Some(current)),
        }
    }
}

fn subtree_edge(heap: &Heap, mut current: EntryId, reversed: bool) -> RunResult<EntryId> {
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;
    loop {
        iterations += 1;
        if iterations > limit {
            return Err(RunError::CycleDetected);
        }
        let next = if reversed { right(heap, current) } else { left(heap, current) };
        match next {
            Some(next) => current = next,
            None => return Ok(current),
        }
    }
}

/// In-order successor (or predecessor, when `reversed`).
pub(crate) fn next_node(heap: &Heap, node_id: EntryId, reversed: bool) -> RunResult<Option<EntryId>> {
    let down = if reversed { left(heap, node_id) } else { right(heap, node_id) };
    if let Some(child) = down {
        return subtree_edge(heap, child, reversed).map(Some);
    }
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;
    let mut current = node_id;
    while let Some(p) = parent(heap, current) {
        iterations += 1;
        if iterations > limit {
            return Err(RunError::CycleDetected);
        }
        let from_side = if reversed { right(heap, p) } else { left(heap, p) };
        if from_side == Some(current) {
            return Ok(Some(p));
        }
        current = p;
    }
    Ok(None)
}

/// Unlinks `target` from the container, rebalances, and frees the node.
///
/// The node's key entry is unreferenced when `unref_key` is set (symbol keys
/// have no entry), its value when `unref_value` is set; otherwise ownership
/// returns to the caller.
pub(crate) fn erase_node(
    heap: &mut Heap,
    container: EntryId,
    target: EntryId,
    unref_key: bool,
    unref_value: bool,
) -> RunResult<()> {
    let mut tree = tree_of(heap, container)?;

    let target_node = *node(heap, target);
    let mut removed_red = target_node.red;
    // `fix` is the child that replaced the removed node; `fix_parent` its
    // parent after the splice. Both drive the rebalancing pass.
    let fix: Option<EntryId>;
    let fix_parent: Option<EntryId>;

    match (target_node.left, target_node.right) {
        (None, replacement) | (replacement, None) => {
            fix = replacement;
            fix_parent = target_node.parent;
            replace_child(heap, container, target, replacement)?;
        }
        (Some(_), Some(right_child)) => {
            // Two children: splice in the in-order successor.
            let successor = subtree_edge(heap, right_child, false)?;
            let successor_node = *node(heap, successor);
            removed_red = successor_node.red;
            fix = successor_node.right;
            if successor_node.parent == Some(target) {
                fix_parent = Some(successor);
            } else {
                fix_parent = successor_node.parent;
                replace_child(heap, container, successor, successor_node.right)?;
                node_mut(heap, successor).right = Some(right_child);
                set_parent(heap, right_child, Some(successor));
            }
            replace_child(heap, container, target, Some(successor))?;
            let target_left = node(heap, target).left.expect("tree::erase_node: left child vanished");
            node_mut(heap, successor).left = Some(target_left);
            set_parent(heap, target_left, Some(successor));
            let target_red = node(heap, target).red;
            set_color(heap, successor, target_red);
        }
    }

    if !removed_red {
        erase_fixup(heap, container, fix, fix_parent)?;
    }

    tree = tree_of(heap, container)?;
    tree.count -= 1;
    set_tree(heap, container, tree);

    // Detach and consume the node so freeing it cannot cascade.
    let detached = node_mut(heap, target);
    detached.left = None;
    detached.right = None;
    detached.parent = None;
    let key = std::mem::replace(&mut detached.key, NodeKey::Symbol(0));
    let value = detached.value.take();
    heap.unref(target)?;
    if unref_key && let NodeKey::Entry(key) = key {
        heap.unref(key)?;
    }
    match value {
        Some(value) if unref_value => heap.unref(value)?,
        _ => {}
    }
    Ok(())
}

fn erase_fixup(
    heap: &mut Heap,
    container: EntryId,
    mut x: Option<EntryId>,
    mut x_parent: Option<EntryId>,
) -> RunResult<()> {
    let limit = heap.cycle_detection_limit();
    let mut iterations: u32 = 0;
    while x != tree_of(heap, container)?.root && !is_red(heap, x) {
        iterations += 1;
        if iterations > limit {
            return Err(RunError::CycleDetected);
        }
        let Some(p) = x_parent else { break };
        if x == left(heap, p) {
            // The sibling exists: the removed node was black, so this side
            // is short one black node and the other side cannot be empty.
            let mut w = right(heap, p).expect("tree::erase_fixup: missing sibling");
            if node(heap, w).red {
                set_color(heap, w, false);
                set_color(heap, p, true);
                rotate_left(heap, container, p)?;
                w = right(heap, p).expect("tree::erase_fixup: missing sibling");
            }
            if !is_red(heap, left(heap, w)) && !is_red(heap, right(heap, w)) {
                set_color(heap, w, true);
                x = Some(p);
                x_parent = parent(heap, p);
            } else {
                if !is_red(heap, right(heap, w)) {
                    if let Some(wl) = left(heap, w) {
                        set_color(heap, wl, false);
                    }
                    set_color(heap, w, true);
                    rotate_right(heap, container, w)?;
                    w = right(heap, p).expect("tree::erase_fixup: missing sibling");
                }
                let p_red = node(heap, p).red;
                set_color(heap, w, p_red);
                set_color(heap, p, false);
                if let Some(wr) = right(heap, w) {
                    set_color(heap, wr, false);
                }
                rotate_left(heap, container, p)?;
                break;
            }
        } else {
            let mut w = left(heap, p).expect("tree::erase_fixup: missing sibling");
            if node(heap, w).red {
                set_color(heap, w, false);
                set_color(heap, p, true);
                rotate_right(heap, container, p)?;
                w = left(heap, p).expect("tree::erase_fixup: missing sibling");
            }
            if !is_red(heap, left(heap, w)) && !is_red(heap, right(heap, w)) {
                set_color(heap, w, true);
                x = Some(p);
                x_parent = parent(heap, p);
            } else {
                if !is_red(heap, left(heap, w)) {
                    if let Some(wr) = right(heap, w) {
                        set_color(heap, wr, false);
                    }
                    set_color(heap, w, true);
                    rotate_left(heap, container, w)?;
                    w = left(heap, p).expect("tree::erase_fixup: missing sibling");
                }
                let p_red = node(heap, p).red;
                set_color(heap, w, p_red);
                set_color(heap, p, false);
                if let Some(wl) = left(heap, w) {
                    set_color(heap, wl, false);
                }
                rotate_right(heap, container, p)?;
                break;
            }
        }
    }
    if let Some(x) = x {
        set_color(heap, x, false);
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

    fn in_order_symbols(heap: &Heap, container: EntryId) -> Vec<i32> {
        let mut symbols = Vec::new();
        let mut current = first(heap, container, false).unwrap();
        while let Some(id) = current {
            match node(heap, id).key {
                NodeKey::Symbol(symbol) => symbols.push(symbol),
                NodeKey::Entry(_) => panic!("expected symbol keys"),
            }
            current = next_node(heap, id, false).unwrap();
        }
        symbols
    }

    #[test]
    fn symbol_inserts_stay_ordered() {
        let mut heap = test_heap();
        let ns = heap.alloc(EntryData::Namespace(Tree::default())).unwrap();
        for symbol in [5, 1, 9, 3, 7, 2, 8, 0, 6, 4] {
            let value = heap.alloc(EntryData::Integer(symbol * 10)).unwrap();
            let outcome = try_insert(&mut heap, ns, NodeKey::Symbol(symbol), Some(value)).unwrap();
            assert!(outcome.inserted);
        }
        assert_eq!(count(&heap, ns).unwrap(), 10);
        assert_eq!(in_order_symbols(&heap, ns), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn duplicate_insert_reports_existing() {
        let mut heap = test_heap();
        let ns = heap.alloc(EntryData::Namespace(Tree::default())).unwrap();
        let value = heap.alloc(EntryData::Integer(1)).unwrap();
        let outcome = try_insert(&mut heap, ns, NodeKey::Symbol(7), Some(value)).unwrap();
        assert!(outcome.inserted);

        let replacement = heap.alloc(EntryData::Integer(2)).unwrap();
        let again = try_insert(&mut heap, ns, NodeKey::Symbol(7), Some(replacement)).unwrap();
        assert!(!again.inserted);
        assert_eq!(again.node, outcome.node);
        assign_value(&mut heap, again.node, Some(replacement)).unwrap();
        assert_eq!(count(&heap, ns).unwrap(), 1);
    }

    #[test]
    fn erase_restores_free_entries() {
        let mut heap = test_heap();
        let ns = heap.alloc(EntryData::Namespace(Tree::default())).unwrap();
        let baseline = heap.free_count();
        for symbol in 0..50 {
            let value = heap.alloc(EntryData::Integer(symbol)).unwrap();
            try_insert(&mut heap, ns, NodeKey::Symbol(symbol), Some(value)).unwrap();
        }
        for symbol in (0..50).rev() {
            let found = find_symbol(&heap, ns, symbol).unwrap().unwrap();
            erase_node(&mut heap, ns, found, false, true).unwrap();
        }
        assert_eq!(count(&heap, ns).unwrap(), 0);
        assert_eq!(heap.free_count(), baseline);
    }

    #[test]
    fn interleaved_insert_erase_keeps_order() {
        let mut heap = test_heap();
        let ns = heap.alloc(EntryData::Namespace(Tree::default())).unwrap();
        for symbol in 0..40 {
            let value = heap.alloc(EntryData::Integer(symbol)).unwrap();
            try_insert(&mut heap, ns, NodeKey::Symbol(symbol), Some(value)).unwrap();
        }
        for symbol in (0..40).step_by(2) {
            let found = find_symbol(&heap, ns, symbol).unwrap().unwrap();
            erase_node(&mut heap, ns, found, false, true).unwrap();
        }
        assert_eq!(in_order_symbols(&heap, ns), (1..40).step_by(2).collect::<Vec<_>>());
        for symbol in (0..40).step_by(2) {
            assert!(find_symbol(&heap, ns, symbol).unwrap().is_none());
        }
    }
}
