//! Parse tree and listener-style walker.

use crate::lexer::{Keyword, Span};

/// Index of a node in its [`ParseTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Whole input; exactly one child.
    Program,
    /// `( expr )`, optionally prefixed with `Not`.
    Parens { negated: bool },
    /// `a And b`, `a Or b`
    Logical(Keyword),
    /// `a Eq b`, `a In b`, ...
    Compare(Keyword),
    /// `[a, b]`
    Array,
    /// `Name(args)`
    Function(String),
    /// `$a.$b`
    Attribute(Vec<String>),
    /// Comma-separated arguments of a function or array.
    Args,
    Str(String),
    Int(String),
    Float(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Arena of nodes produced by the parser.
#[derive(Debug, Clone, Default)]
pub struct ParseTree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl ParseTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node under `parent`.
    pub fn add(&mut self, kind: NodeKind, span: Span, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            span,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.root = Some(id),
        }
        id
    }

    /// Move `child` (and its subtree) under `parent`, appending it last.
    pub fn reparent(&mut self, child: NodeId, parent: NodeId) {
        if let Some(old) = self.nodes[child.0].parent {
            self.nodes[old.0].children.retain(|c| *c != child);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Callbacks fired while walking a [`ParseTree`] depth-first.
pub trait Listener {
    type Error;

    fn enter(&mut self, tree: &ParseTree, id: NodeId) -> Result<(), Self::Error>;

    fn exit(&mut self, tree: &ParseTree, id: NodeId) -> Result<(), Self::Error>;
}

/// Depth-first walker calling `enter` before and `exit` after each
/// node's children.
pub struct TreeWalker;

impl TreeWalker {
    pub fn walk<L: Listener>(listener: &mut L, tree: &ParseTree) -> Result<(), L::Error> {
        let Some(root) = tree.root() else {
            return Ok(());
        };

        // (node, next child index)
        let mut stack = vec![(root, 0usize)];
        listener.enter(tree, root)?;

        while let Some((id, next)) = stack.pop() {
            let children = &tree.node(id).children;
            match children.get(next) {
                Some(&child) => {
                    stack.push((id, next + 1));
                    listener.enter(tree, child)?;
                    stack.push((child, 0));
                }
                None => listener.exit(tree, id)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<String>);

    impl Listener for Recorder {
        type Error = ();

        fn enter(&mut self, _: &ParseTree, id: NodeId) -> Result<(), ()> {
            self.0.push(format!("+{}", id.0));
            Ok(())
        }

        fn exit(&mut self, _: &ParseTree, id: NodeId) -> Result<(), ()> {
            self.0.push(format!("-{}", id.0));
            Ok(())
        }
    }

    #[test]
    fn test_walk_order() {
        let mut tree = ParseTree::new();
        let span = Span::default();
        let program = tree.add(NodeKind::Program, span, None);
        let compare = tree.add(NodeKind::Compare(Keyword::Eq), span, Some(program));
        tree.add(NodeKind::Int("1".into()), span, Some(compare));
        tree.add(NodeKind::Int("2".into()), span, Some(compare));

        let mut recorder = Recorder(Vec::new());
        TreeWalker::walk(&mut recorder, &tree).unwrap();
        assert_eq!(recorder.0, ["+0", "+1", "+2", "-2", "+3", "-3", "-1", "-0"]);
    }

    #[test]
    fn test_reparent() {
        let mut tree = ParseTree::new();
        let span = Span::default();
        let program = tree.add(NodeKind::Program, span, None);
        let left = tree.add(NodeKind::Int("1".into()), span, Some(program));
        let compare = tree.add(NodeKind::Compare(Keyword::Lt), span, Some(program));
        tree.reparent(left, compare);

        assert_eq!(tree.node(program).children, vec![compare]);
        assert_eq!(tree.node(compare).children, vec![left]);
        assert_eq!(tree.node(left).parent, Some(compare));
    }
}
