//! Context graph
//!
//! Every context (account, collection, metadata) is a node with one weak
//! parent link and an explicit list of registered children. Transaction
//! builders hold an owning node but are not nodes themselves. Nodes provide:
//! - request deduplication (`NodeCore::dedup`)
//! - memoized ancestor lookup (`NodeCore::find_ancestor`)
//! - depth-bounded traversal (`visit_graph`) and text rendering

pub mod dedup;
pub mod node;
pub mod render;

pub use dedup::{Deduplicator, SharedResult, DEFAULT_DEDUP_TTL};
pub use node::{
    downcast_node, parent_ref, same_node, visit_graph, AsAnyArc, EdgeDirection, GraphNode, NodeCore,
    NodeDescription, SkippedEdge, VisitControl,
};
pub use render::{render_tree, RenderOptions};
