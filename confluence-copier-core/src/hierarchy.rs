//! Rebuilds a space's page tree from the flat listing returned by the remote.
//!
//! Each listed document carries its ancestor chain (root-most first). The tree
//! is an arena of nodes keyed by id with parent back-references only; every
//! insertion is a get-or-create lookup, so an ancestor shared by many documents
//! becomes exactly one node.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::contract::DocumentRecord;
use crate::error::HierarchyError;

/// One node of the space tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: String,
    pub title: String,
    /// `None` only for the synthetic space root.
    pub parent_id: Option<String>,
    pub ordering_key: Option<i64>,
    /// `None` for the root and for ancestors never listed themselves.
    pub record: Option<DocumentRecord>,
}

/// Page tree of one space, rooted at a synthetic node keyed by the space key.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    index: HashMap<String, usize>,
}

impl Tree {
    pub fn new(space_key: &str) -> Self {
        let root = TreeNode {
            id: space_key.to_string(),
            title: space_key.to_string(),
            parent_id: None,
            ordering_key: None,
            record: None,
        };
        let mut index = HashMap::new();
        index.insert(space_key.to_string(), 0);
        Self {
            nodes: vec![root],
            index,
        }
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    pub fn root_id(&self) -> &str {
        &self.nodes[0].id
    }

    pub fn get(&self, id: &str) -> Option<&TreeNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Every node in insertion order, root first.
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter()
    }

    /// Inserts a node unless one with the same id exists. Returns whether it was inserted.
    ///
    /// An existing node keeps its parent edge; only a missing record or ordering
    /// key is filled in from a later, fuller sighting.
    fn ensure_node(
        &mut self,
        id: &str,
        title: &str,
        parent_id: &str,
        record: Option<&DocumentRecord>,
    ) -> bool {
        if let Some(&i) = self.index.get(id) {
            let node = &mut self.nodes[i];
            if node.record.is_none() {
                if let Some(record) = record {
                    node.ordering_key = record.ordering_key;
                    node.record = Some(record.clone());
                }
            }
            return false;
        }

        debug_assert!(self.index.contains_key(parent_id));
        self.index.insert(id.to_string(), self.nodes.len());
        self.nodes.push(TreeNode {
            id: id.to_string(),
            title: title.to_string(),
            parent_id: Some(parent_id.to_string()),
            ordering_key: record.and_then(|r| r.ordering_key),
            record: record.cloned(),
        });
        true
    }

    /// Children of `id`, sorted by ordering key ascending. Nodes without a key
    /// come last, in insertion order.
    pub fn children(&self, id: &str) -> Vec<&TreeNode> {
        let mut children: Vec<&TreeNode> = self
            .nodes
            .iter()
            .filter(|n| n.parent_id.as_deref() == Some(id))
            .collect();
        children.sort_by_key(|n| (n.ordering_key.is_none(), n.ordering_key));
        children
    }

    /// Non-root nodes in parent-before-child (pre-order) sequence, siblings in
    /// ordering-key order.
    pub fn walk(&self) -> Vec<&TreeNode> {
        let mut order = Vec::with_capacity(self.nodes.len().saturating_sub(1));
        let mut stack: Vec<&TreeNode> = self.children(self.root_id());
        stack.reverse();
        while let Some(node) = stack.pop() {
            order.push(node);
            let mut children = self.children(&node.id);
            children.reverse();
            stack.extend(children);
        }
        order
    }

    /// Depth of the deepest node; the root alone has depth 0.
    pub fn depth(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| {
                let mut depth = 0;
                let mut current = n.parent_id.as_deref();
                while let Some(parent) = current {
                    depth += 1;
                    current = self.get(parent).and_then(|p| p.parent_id.as_deref());
                }
                depth
            })
            .max()
            .unwrap_or(0)
    }

    /// Parent edges as `(child, parent)` pairs, sorted. Two trees with equal
    /// edge lists have the same shape.
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .nodes
            .iter()
            .filter_map(|n| n.parent_id.as_ref().map(|p| (n.id.clone(), p.clone())))
            .collect();
        edges.sort();
        edges
    }

    /// Box-drawing rendering of the tree, siblings sorted by ordering key.
    ///
    /// Fails if any document lacks an ordering key, since its position among
    /// siblings is then undefined.
    pub fn render(&self) -> Result<String, HierarchyError> {
        if let Some(node) = self.nodes.iter().skip(1).find(|n| n.ordering_key.is_none()) {
            return Err(HierarchyError::MissingOrderingKey {
                id: node.id.clone(),
                title: node.title.clone(),
            });
        }

        let mut out = String::new();
        out.push_str(&self.root().title);
        out.push('\n');
        self.render_children(self.root_id(), "", &mut out);
        Ok(out)
    }

    fn render_children(&self, id: &str, prefix: &str, out: &mut String) {
        let children = self.children(id);
        let last = children.len().saturating_sub(1);
        for (i, child) in children.into_iter().enumerate() {
            let (branch, extension) = if i == last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            out.push_str(prefix);
            out.push_str(branch);
            out.push_str(&child.title);
            out.push('\n');
            self.render_children(&child.id, &format!("{prefix}{extension}"), out);
        }
    }
}

/// Builds the tree implied by a flat document listing.
///
/// Documents may arrive in any order. Each ancestor chain is walked root-most
/// first, so a node's parent is always present before the node itself.
pub fn build_tree(documents: &[DocumentRecord], space_key: &str) -> Tree {
    info!(space_key, documents = documents.len(), "[TREE] Building space hierarchy");
    let mut tree = Tree::new(space_key);

    for doc in documents {
        let parent_id = match doc.ancestors.last() {
            None => space_key.to_string(),
            Some(nearest) => {
                for (i, ancestor) in doc.ancestors.iter().enumerate() {
                    let parent = if i == 0 {
                        space_key
                    } else {
                        doc.ancestors[i - 1].id.as_str()
                    };
                    if tree.ensure_node(&ancestor.id, &ancestor.title, parent, None) {
                        debug!(id = %ancestor.id, parent, "[TREE] Inserted ancestor node");
                    }
                }
                nearest.id.clone()
            }
        };

        if tree.ensure_node(&doc.id, &doc.title, &parent_id, Some(doc)) {
            debug!(id = %doc.id, parent = %parent_id, "[TREE] Inserted document node");
        }
    }

    info!(
        space_key,
        nodes = tree.len(),
        depth = tree.depth(),
        "[TREE] Space hierarchy built"
    );
    tree
}
