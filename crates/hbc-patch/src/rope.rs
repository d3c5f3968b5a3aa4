//! Persistent byte rope
//!
//! A binary tree of [`Bytes`] leaves. Nodes are never mutated: every edit
//! builds new nodes on top of shared subtrees, so a rope taken before an edit
//! keeps its contents. Cutting inside a leaf is a zero-copy [`Bytes::slice`].
//!
//! No rebalancing is done; per-function edit counts are small.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

/// An immutable byte sequence with cheap slice, concat and replace
#[derive(Clone)]
pub struct Rope(Arc<Node>);

enum Node {
    Leaf(Bytes),
    Concat {
        left: Rope,
        right: Rope,
        len: usize,
        depth: u32,
    },
}

impl Rope {
    /// The empty rope
    pub fn new() -> Self {
        Self::leaf(Bytes::new())
    }

    fn leaf(bytes: Bytes) -> Self {
        Self(Arc::new(Node::Leaf(bytes)))
    }

    /// Total length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        match &*self.0 {
            Node::Leaf(bytes) => bytes.len(),
            Node::Concat { len, .. } => *len,
        }
    }

    /// Whether the rope holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Height of the tree; a leaf has depth 0
    #[inline]
    pub fn depth(&self) -> u32 {
        match &*self.0 {
            Node::Leaf(_) => 0,
            Node::Concat { depth, .. } => *depth,
        }
    }

    /// `self` followed by `right`
    pub fn concat(&self, right: &Rope) -> Rope {
        if right.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return right.clone();
        }
        Self(Arc::new(Node::Concat {
            left: self.clone(),
            right: right.clone(),
            len: self.len() + right.len(),
            depth: 1 + self.depth().max(right.depth()),
        }))
    }

    /// Bytes `start..end`. Bounds are clamped to the rope.
    pub fn slice(&self, start: usize, end: usize) -> Rope {
        let end = end.min(self.len());
        let start = start.min(end);
        if start == 0 && end == self.len() {
            return self.clone();
        }

        match &*self.0 {
            Node::Leaf(bytes) => Self::leaf(bytes.slice(start..end)),
            Node::Concat { left, right, .. } => {
                let split = left.len();
                let head = if start < split {
                    left.slice(start, end.min(split))
                } else {
                    Rope::new()
                };
                let tail = if end > split {
                    right.slice(start.saturating_sub(split), end - split)
                } else {
                    Rope::new()
                };
                head.concat(&tail)
            }
        }
    }

    /// Replace `start..end` with `value`. An `end` before `start` is treated as `start`.
    pub fn replace(&self, start: usize, end: usize, value: &Rope) -> Rope {
        self.slice(0, start)
            .concat(value)
            .concat(&self.slice(end.max(start), self.len()))
    }

    /// Insert `value` at `index`
    pub fn insert(&self, index: usize, value: &Rope) -> Rope {
        self.replace(index, index, value)
    }

    /// Remove `start..end`
    pub fn remove(&self, start: usize, end: usize) -> Rope {
        self.replace(start, end, &Rope::new())
    }

    /// Non-empty leaves in order. Each call walks the tree from the root.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves { stack: vec![self] }
    }

    /// Contents as one buffer. A single-leaf rope is returned without copying.
    pub fn to_bytes(&self) -> Bytes {
        let mut leaves = self.leaves();
        match (leaves.next(), leaves.next()) {
            (None, _) => Bytes::new(),
            (Some(only), None) => only.clone(),
            (Some(first), Some(second)) => {
                let mut out = BytesMut::with_capacity(self.len());
                out.extend_from_slice(first);
                out.extend_from_slice(second);
                for leaf in leaves {
                    out.extend_from_slice(leaf);
                }
                out.freeze()
            }
        }
    }
}

impl Default for Rope {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Bytes> for Rope {
    fn from(bytes: Bytes) -> Self {
        Self::leaf(bytes)
    }
}

impl From<Vec<u8>> for Rope {
    fn from(bytes: Vec<u8>) -> Self {
        Self::leaf(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Rope {
    fn from(bytes: &'static [u8]) -> Self {
        Self::leaf(Bytes::from_static(bytes))
    }
}

impl PartialEq for Rope {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.to_bytes() == other.to_bytes()
    }
}

impl Eq for Rope {}

impl fmt::Debug for Rope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rope")
            .field("len", &self.len())
            .field("depth", &self.depth())
            .field("leaves", &self.leaves().count())
            .finish()
    }
}

/// Iterator over the leaves of a [`Rope`]
pub struct Leaves<'a> {
    stack: Vec<&'a Rope>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(rope) = self.stack.pop() {
            match &*rope.0 {
                Node::Leaf(bytes) if bytes.is_empty() => {}
                Node::Leaf(bytes) => return Some(bytes),
                Node::Concat { left, right, .. } => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
        None
    }
}
