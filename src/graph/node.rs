//! Graph node core: label, flags, properties, parent link, registered
//! children, memoized ancestor lookup and depth-bounded traversal.

use super::dedup::{Deduplicator, DEFAULT_DEDUP_TTL};
use crate::context::AccountNode;
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Upcast helper so `Arc<dyn GraphNode>` can be downcast to its concrete type.
pub trait AsAnyArc: Any + Send + Sync {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A node in the context graph.
pub trait GraphNode: AsAnyArc {
    fn core(&self) -> &NodeCore;

    /// Human readable description; implementors extend `properties`.
    fn describe(&self) -> NodeDescription {
        self.core().base_description()
    }

    /// Account-resolution capability, if this node has one.
    fn as_account_node(&self) -> Option<&dyn AccountNode> {
        None
    }
}

/// Snapshot used for rendering and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescription {
    pub label: String,
    pub mutable: bool,
    pub unresolved: bool,
    pub unused: bool,
    pub properties: BTreeMap<String, String>,
}

impl NodeDescription {
    pub fn with_property(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(key.into(), value.to_string());
        self
    }
}

/// Direction of a traversal edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Child,
    Parent,
}

/// Edge not followed because the traversal depth ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEdge {
    pub from: String,
    pub to: String,
    pub direction: EdgeDirection,
}

/// Visitor verdict for the current node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitControl {
    Continue,
    /// Do not descend into this node's children.
    SkipChildren,
}

/// State shared by every graph node.
pub struct NodeCore {
    label: String,
    mutable: bool,
    unused: bool,
    properties: RwLock<BTreeMap<String, String>>,
    parent: Option<Weak<dyn GraphNode>>,
    children: RwLock<Vec<Arc<dyn GraphNode>>>,
    dedup: Deduplicator,
    ancestors: Mutex<HashMap<TypeId, Option<Weak<dyn GraphNode>>>>,
}

impl std::fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCore")
            .field("label", &self.label)
            .field("mutable", &self.mutable)
            .field("unused", &self.unused)
            .field("has_parent", &self.parent.is_some())
            .field("children", &self.children.read().len())
            .finish_non_exhaustive()
    }
}

impl NodeCore {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_dedup_ttl(label, DEFAULT_DEDUP_TTL)
    }

    pub fn with_dedup_ttl(label: impl Into<String>, dedup_ttl: Duration) -> Self {
        Self {
            label: label.into(),
            mutable: false,
            unused: false,
            properties: RwLock::new(BTreeMap::new()),
            parent: None,
            children: RwLock::new(Vec::new()),
            dedup: Deduplicator::new(dedup_ttl),
            ancestors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_parent(mut self, parent: Weak<dyn GraphNode>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn unused(mut self, unused: bool) -> Self {
        self.unused = unused;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn parent(&self) -> Option<Arc<dyn GraphNode>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<dyn GraphNode>> {
        self.children.read().clone()
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl ToString) {
        self.properties.write().insert(key.into(), value.to_string());
    }

    pub fn base_description(&self) -> NodeDescription {
        NodeDescription {
            label: self.label.clone(),
            mutable: self.mutable,
            unresolved: false,
            unused: self.unused,
            properties: self.properties.read().clone(),
        }
    }

    /// Register a child. Refused when the child is this node's own parent,
    /// which would close a trivial cycle.
    pub fn add_child(&self, child: Arc<dyn GraphNode>) -> bool {
        if let Some(parent) = self.parent() {
            if same_node(&parent, &child) {
                return false;
            }
        }
        let mut children = self.children.write();
        if children.iter().any(|existing| same_node(existing, &child)) {
            return false;
        }
        children.push(child);
        true
    }

    /// Replace the registered children wholesale.
    pub fn replace_children(&self, children: Vec<Arc<dyn GraphNode>>) {
        let parent = self.parent();
        let filtered = children
            .into_iter()
            .filter(|child| parent.as_ref().map_or(true, |p| !same_node(p, child)))
            .collect();
        *self.children.write() = filtered;
    }

    /// Walk parent links until a node of type `T` is found.
    ///
    /// The parent chain never changes after construction, so the answer is
    /// memoized per node and per `T`.
    pub fn find_ancestor<T: GraphNode>(&self) -> Option<Arc<T>> {
        let type_id = TypeId::of::<T>();
        if let Some(memo) = self.ancestors.lock().get(&type_id) {
            return memo
                .as_ref()
                .and_then(Weak::upgrade)
                .and_then(|node| node.into_any_arc().downcast::<T>().ok());
        }

        let mut cursor = self.parent();
        let mut found: Option<Arc<dyn GraphNode>> = None;
        while let Some(node) = cursor {
            let concrete: &dyn GraphNode = &*node;
            if Any::type_id(concrete.as_any()) == type_id {
                found = Some(node);
                break;
            }
            cursor = node.core().parent();
        }

        self.ancestors
            .lock()
            .insert(type_id, found.as_ref().map(Arc::downgrade));
        found.and_then(|node| node.into_any_arc().downcast::<T>().ok())
    }
}

/// Identity comparison on the allocation, ignoring vtables.
pub fn same_node(a: &Arc<dyn GraphNode>, b: &Arc<dyn GraphNode>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn node_key(node: &Arc<dyn GraphNode>) -> *const () {
    Arc::as_ptr(node) as *const ()
}

/// Recover the concrete type behind a graph node.
pub fn downcast_node<T: GraphNode>(node: Arc<dyn GraphNode>) -> Option<Arc<T>> {
    node.into_any_arc().downcast::<T>().ok()
}

/// Weak parent reference for a concrete node.
pub fn parent_ref<T: GraphNode>(parent: &Arc<T>) -> Weak<dyn GraphNode> {
    let parent: Arc<dyn GraphNode> = parent.clone();
    Arc::downgrade(&parent)
}

/// Depth-first traversal from `start`.
///
/// Children are followed while `max_out` remains positive (decremented per
/// hop), the parent while `max_in` remains positive. A visited set guards
/// against shared subgraphs; edges cut by depth exhaustion are returned.
pub fn visit_graph<F>(
    start: &Arc<dyn GraphNode>,
    mut visitor: F,
    max_out: usize,
    max_in: usize,
) -> Vec<SkippedEdge>
where
    F: FnMut(&Arc<dyn GraphNode>, i32) -> VisitControl,
{
    let mut visited = HashSet::new();
    let mut skipped = Vec::new();
    visit_inner(
        start,
        &mut visitor,
        max_out,
        max_in,
        0,
        &mut visited,
        &mut skipped,
    );
    skipped
}

fn visit_inner<F>(
    node: &Arc<dyn GraphNode>,
    visitor: &mut F,
    max_out: usize,
    max_in: usize,
    depth: i32,
    visited: &mut HashSet<*const ()>,
    skipped: &mut Vec<SkippedEdge>,
) where
    F: FnMut(&Arc<dyn GraphNode>, i32) -> VisitControl,
{
    if !visited.insert(node_key(node)) {
        return;
    }

    let control = visitor(node, depth);

    if control == VisitControl::Continue {
        for child in node.core().children() {
            if max_out > 0 {
                visit_inner(&child, visitor, max_out - 1, 0, depth + 1, visited, skipped);
            } else if !visited.contains(&node_key(&child)) {
                skipped.push(SkippedEdge {
                    from: node.core().label().to_string(),
                    to: child.core().label().to_string(),
                    direction: EdgeDirection::Child,
                });
            }
        }
    }

    if let Some(parent) = node.core().parent() {
        if max_in > 0 {
            visit_inner(&parent, visitor, 0, max_in - 1, depth - 1, visited, skipped);
        } else if !visited.contains(&node_key(&parent)) {
            skipped.push(SkippedEdge {
                from: node.core().label().to_string(),
                to: parent.core().label().to_string(),
                direction: EdgeDirection::Parent,
            });
        }
    }
}
