//! Content-addressable AST storage
//!
//! A [`Pool`] assigns dense numeric ids to structurally identical subtrees:
//! interning the same shape twice yields the same [`NodeId`], and
//! [`Pool::node`] rebuilds an independent tree from an id. Keys are built
//! from the operator, arity, child ids (leaf payloads verbatim), and the
//! bracket pair when it is not invisible grouping; identical keys reuse the
//! first record, so the first interning's attributes win.
//!
//! Records are append-only and indexed from 1; the pool lives as long as the
//! owning [`crate::Model`].

use crate::ast::{Delim, Node, NodeFlags, NumberFormat, Op};
use fnv::FnvHashMap;

/// A dense id for an interned subtree; never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The raw index
    pub fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
enum RecordArgs {
    Leaf(String),
    Children(Vec<NodeId>),
}

#[derive(Debug, Clone)]
struct Record {
    op: Op,
    args: RecordArgs,
    lbrk: Option<Delim>,
    rbrk: Option<Delim>,
    number_format: Option<NumberFormat>,
    separator_count: u16,
    last_separator_index: Option<u16>,
    flags: NodeFlags,
}

/// The intern pool
#[derive(Debug)]
pub struct Pool {
    // index 0 is reserved so ids are always non-zero
    records: Vec<Option<Record>>,
    ids: FnvHashMap<String, NodeId>,
}

impl Default for Pool {
    fn default() -> Self {
        Pool::new()
    }
}

impl Pool {
    /// An empty pool
    pub fn new() -> Self {
        Pool {
            records: vec![None],
            ids: FnvHashMap::default(),
        }
    }

    /// Number of interned records
    pub fn len(&self) -> usize {
        self.records.len().saturating_sub(1)
    }

    /// True when nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Intern a subtree, returning its stable id
    pub fn intern(&mut self, node: &Node) -> NodeId {
        let (key, args) = match node.lexeme {
            Some(ref payload) => {
                let key = format!("{} 0 {}", node.op.name(), payload);
                (key, RecordArgs::Leaf(payload.clone()))
            }
            None => {
                let children: Vec<NodeId> =
                    node.args.iter().map(|child| self.intern(child)).collect();
                let mut key = format!("{} {}", node.op.name(), children.len());
                for child in &children {
                    key.push(' ');
                    key.push_str(&child.get().to_string());
                }
                (key, RecordArgs::Children(children))
            }
        };
        let key = match (node.lbrk, node.rbrk) {
            (Some(l), Some(r)) if !l.is_default() || !r.is_default() => {
                format!("{} {}{}", key, l.latex(), r.latex())
            }
            _ => key,
        };
        if let Some(&id) = self.ids.get(&key) {
            return id;
        }
        let id = NodeId(self.records.len() as u32);
        self.records.push(Some(Record {
            op: node.op,
            args,
            lbrk: node.lbrk,
            rbrk: node.rbrk,
            number_format: node.number_format,
            separator_count: node.separator_count,
            last_separator_index: node.last_separator_index,
            flags: node.flags,
        }));
        self.ids.insert(key, id);
        id
    }

    /// Rebuild a fresh independent tree for an id
    pub fn node(&self, id: NodeId) -> Option<Node> {
        let record = self.records.get(id.get() as usize)?.as_ref()?;
        let mut node = Node::new(record.op);
        match record.args {
            RecordArgs::Leaf(ref payload) => node.lexeme = Some(payload.clone()),
            RecordArgs::Children(ref children) => {
                let mut args = Vec::with_capacity(children.len());
                for &child in children {
                    args.push(self.node(child)?);
                }
                node.args = args;
            }
        }
        node.lbrk = record.lbrk;
        node.rbrk = record.rbrk;
        node.number_format = record.number_format;
        node.separator_count = record.separator_count;
        node.last_separator_index = record.last_separator_index;
        node.flags = record.flags;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::Pool;
    use crate::ast::{Delim, Node, Op};

    #[test]
    fn identical_subtrees_share_ids() {
        let mut pool = Pool::new();
        let a = Node::nary(Op::Add, vec![Node::num("1"), Node::num("2")]);
        let b = Node::nary(Op::Add, vec![Node::num("1"), Node::num("2")]);
        assert_eq!(pool.intern(&a), pool.intern(&b));
        // one add, two distinct leaves
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn round_trip() {
        let mut pool = Pool::new();
        let tree = Node::binary(
            Op::Frac,
            Node::num("1"),
            Node::nary(Op::Mul, vec![Node::var("x"), Node::var("y")]),
        );
        let id = pool.intern(&tree);
        assert_eq!(pool.node(id), Some(tree));
    }

    #[test]
    fn brackets_separate_keys() {
        let mut pool = Pool::new();
        let plain = Node::unary(Op::Paren, Node::var("a"));
        let paren =
            Node::unary(Op::Paren, Node::var("a")).with_brackets(Delim::LParen, Delim::RParen);
        let bracket =
            Node::unary(Op::Paren, Node::var("a")).with_brackets(Delim::LBracket, Delim::RBracket);
        let p1 = pool.intern(&plain);
        let p2 = pool.intern(&paren);
        let p3 = pool.intern(&bracket);
        assert_ne!(p2, p3);
        assert_ne!(p1, p2);
    }

    #[test]
    fn brace_brackets_are_invisible() {
        let mut pool = Pool::new();
        let bare = Node::var("a");
        let braced = Node::var("a").with_brackets(Delim::LBrace, Delim::RBrace);
        assert_eq!(pool.intern(&bare), pool.intern(&braced));
    }

    #[test]
    fn leaf_payloads_key_verbatim() {
        let mut pool = Pool::new();
        let x = pool.intern(&Node::var("x"));
        let y = pool.intern(&Node::var("y"));
        assert_ne!(x, y);
        assert_eq!(pool.node(x).unwrap(), Node::var("x"));
    }

    #[test]
    fn ids_start_at_one() {
        let mut pool = Pool::new();
        let id = pool.intern(&Node::var("x"));
        assert_eq!(id.get(), 1);
    }
}
