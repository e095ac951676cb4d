//! The AST cell and operator lexicon
//!
//! Every parsed construct is a [`Node`]: an operator tag, ordered children,
//! and the attributes the parser recorded while choosing the grammatical
//! shape (bracket pair, numeric metadata, shape flags). Leaves — numbers,
//! variables, and text — carry their payload in [`Node::lexeme`] and have no
//! children.
//!
//! Nodes compare structurally, so tests can build expected trees with the
//! constructors here and assert equality against parse results.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Operator tags
///
/// A closed enumeration: the parser only ever produces these. Relational
/// negations (`Nless`, `NotIn`, …) exist as first-class tags because `\not`
/// folds into the following operator during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[allow(missing_docs)]
pub enum Op {
    None,
    // leaves
    Num,
    Var,
    Text,
    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Frac,
    Pow,
    Subscript,
    Pm,
    Percent,
    Fact,
    // structure
    Comma,
    Colon,
    Paren,
    Bracket,
    Interval,
    IntervalOpen,
    IntervalLeftOpen,
    IntervalRightOpen,
    Set,
    EvalAt,
    AngleBracket,
    Pipe,
    Abs,
    Matrix,
    Row,
    // relations
    Eql,
    Ne,
    Approx,
    Lt,
    Le,
    Gt,
    Ge,
    Ngtr,
    Nless,
    In,
    NotIn,
    Ni,
    RightArrow,
    Perp,
    Propto,
    Subset,
    NSubset,
    Subseteq,
    NSubseteq,
    Supset,
    NSupset,
    Supseteq,
    NSupseteq,
    NApprox,
    Parallel,
    Nparallel,
    Sim,
    NSim,
    Cong,
    NCong,
    // logic
    Implies,
    Iff,
    Not,
    Exists,
    Forall,
    // sets
    Cup,
    Cap,
    Setminus,
    Backslash,
    BigCup,
    BigCap,
    // elementary functions
    Sin,
    Cos,
    Tan,
    Sec,
    Csc,
    Cot,
    Sinh,
    Cosh,
    Tanh,
    Coth,
    Arcsin,
    Arccos,
    Arctan,
    Log,
    Sqrt,
    Nthroot,
    // calculus and big operators
    Integral,
    Deriv,
    Lim,
    Sum,
    Prod,
    // decoration
    Vec,
    Overline,
    Mathbf,
    // chemistry
    MolarMass,
}

impl Op {
    /// Stable lowercase name, used in intern keys and diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Op::None => "none",
            Op::Num => "num",
            Op::Var => "var",
            Op::Text => "text",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Frac => "frac",
            Op::Pow => "pow",
            Op::Subscript => "subscript",
            Op::Pm => "pm",
            Op::Percent => "percent",
            Op::Fact => "fact",
            Op::Comma => "comma",
            Op::Colon => "colon",
            Op::Paren => "paren",
            Op::Bracket => "bracket",
            Op::Interval => "interval",
            Op::IntervalOpen => "intervalopen",
            Op::IntervalLeftOpen => "intervalleftopen",
            Op::IntervalRightOpen => "intervalrightopen",
            Op::Set => "set",
            Op::EvalAt => "evalat",
            Op::AngleBracket => "anglebracket",
            Op::Pipe => "pipe",
            Op::Abs => "abs",
            Op::Matrix => "matrix",
            Op::Row => "row",
            Op::Eql => "eql",
            Op::Ne => "ne",
            Op::Approx => "approx",
            Op::Lt => "lt",
            Op::Le => "le",
            Op::Gt => "gt",
            Op::Ge => "ge",
            Op::Ngtr => "ngtr",
            Op::Nless => "nless",
            Op::In => "in",
            Op::NotIn => "notin",
            Op::Ni => "ni",
            Op::RightArrow => "rightarrow",
            Op::Perp => "perp",
            Op::Propto => "propto",
            Op::Subset => "subset",
            Op::NSubset => "nsubset",
            Op::Subseteq => "subseteq",
            Op::NSubseteq => "nsubseteq",
            Op::Supset => "supset",
            Op::NSupset => "nsupset",
            Op::Supseteq => "supseteq",
            Op::NSupseteq => "nsupseteq",
            Op::NApprox => "napprox",
            Op::Parallel => "parallel",
            Op::Nparallel => "nparallel",
            Op::Sim => "sim",
            Op::NSim => "nsim",
            Op::Cong => "cong",
            Op::NCong => "ncong",
            Op::Implies => "implies",
            Op::Iff => "iff",
            Op::Not => "not",
            Op::Exists => "exists",
            Op::Forall => "forall",
            Op::Cup => "cup",
            Op::Cap => "cap",
            Op::Setminus => "setminus",
            Op::Backslash => "backslash",
            Op::BigCup => "bigcup",
            Op::BigCap => "bigcap",
            Op::Sin => "sin",
            Op::Cos => "cos",
            Op::Tan => "tan",
            Op::Sec => "sec",
            Op::Csc => "csc",
            Op::Cot => "cot",
            Op::Sinh => "sinh",
            Op::Cosh => "cosh",
            Op::Tanh => "tanh",
            Op::Coth => "coth",
            Op::Arcsin => "arcsin",
            Op::Arccos => "arccos",
            Op::Arctan => "arctan",
            Op::Log => "log",
            Op::Sqrt => "sqrt",
            Op::Nthroot => "nthroot",
            Op::Integral => "integral",
            Op::Deriv => "deriv",
            Op::Lim => "lim",
            Op::Sum => "sum",
            Op::Prod => "prod",
            Op::Vec => "vec",
            Op::Overline => "overline",
            Op::Mathbf => "mathbf",
            Op::MolarMass => "molarmass",
        }
    }
}

/// Bracket delimiter codes recorded in `lbrk`/`rbrk`
///
/// French interval notation is normalized before these are recorded, so an
/// opener is always one of the `L*` codes (or `Pipe`/`Dot`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[allow(missing_docs)]
pub enum Delim {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LSetBrace,
    RSetBrace,
    Pipe,
    LAngle,
    RAngle,
    /// The `.` of `\left.`/`\right.`
    Dot,
}

impl Delim {
    /// The LaTeX spelling of the delimiter
    pub fn latex(self) -> &'static str {
        match self {
            Delim::LParen => "(",
            Delim::RParen => ")",
            Delim::LBracket => "[",
            Delim::RBracket => "]",
            Delim::LBrace => "{",
            Delim::RBrace => "}",
            Delim::LSetBrace => "\\{",
            Delim::RSetBrace => "\\}",
            Delim::Pipe => "|",
            Delim::LAngle => "\\langle",
            Delim::RAngle => "\\rangle",
            Delim::Dot => ".",
        }
    }

    /// Brace-style delimiters are invisible grouping and stay out of intern
    /// keys
    pub fn is_default(self) -> bool {
        matches!(
            self,
            Delim::LBrace | Delim::RBrace | Delim::LSetBrace | Delim::RSetBrace
        )
    }
}

/// Whether a numeric literal contained a decimal separator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NumberFormat {
    /// No decimal separator
    Integer,
    /// At least one decimal separator
    Decimal,
}

/// Shape flags recorded while parsing
///
/// These describe the grammatical form the parser chose, for consumption by
/// downstream plugins and the renderer. They never change the tree shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[allow(missing_docs)]
pub struct NodeFlags {
    pub is_fraction: bool,
    pub is_mixed_number: bool,
    pub is_scientific: bool,
    pub is_repeating: bool,
    pub is_implicit: bool,
    pub is_polynomial: bool,
    pub is_slash: bool,
    pub is_polynomial_term: bool,
}

/// A caller-attached source position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Location {
    /// Byte offset of the first character
    pub start: usize,
    /// One past the last byte
    pub end: usize,
}

/// The universal AST cell
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Node {
    /// Operator tag
    pub op: Op,
    /// Ordered children; empty for leaves
    pub args: Vec<Node>,
    /// Leaf payload: the canonical numeric string, identifier, or text
    pub lexeme: Option<String>,
    /// Opening bracket when the node came from a bracketed group
    pub lbrk: Option<Delim>,
    /// Closing bracket when the node came from a bracketed group
    pub rbrk: Option<Delim>,
    /// Integer or decimal (NUM only)
    pub number_format: Option<NumberFormat>,
    /// How many separator characters the literal contained (NUM only)
    pub separator_count: u16,
    /// Offset of the last separator in the scanned literal (NUM only)
    pub last_separator_index: Option<u16>,
    /// Grammatical-shape flags
    pub flags: NodeFlags,
    /// Optional source span, attached by callers
    pub location: Option<Location>,
}

impl Node {
    /// A bare node with no children and no payload
    pub fn new(op: Op) -> Self {
        Node {
            op,
            args: Vec::new(),
            lexeme: None,
            lbrk: None,
            rbrk: None,
            number_format: None,
            separator_count: 0,
            last_separator_index: None,
            flags: NodeFlags::default(),
            location: None,
        }
    }

    /// The canonical empty result
    pub fn none() -> Self {
        Node::new(Op::None)
    }

    /// A leaf with a payload string
    pub fn leaf(op: Op, lexeme: impl Into<String>) -> Self {
        let mut node = Node::new(op);
        node.lexeme = Some(lexeme.into());
        node
    }

    /// A VAR leaf
    pub fn var(name: impl Into<String>) -> Self {
        Node::leaf(Op::Var, name)
    }

    /// A NUM leaf with its format derived from the lexeme
    pub fn num(lexeme: impl Into<String>) -> Self {
        let lexeme = lexeme.into();
        let format = if lexeme.contains('.') {
            NumberFormat::Decimal
        } else {
            NumberFormat::Integer
        };
        let mut node = Node::leaf(Op::Num, lexeme);
        node.number_format = Some(format);
        node
    }

    /// A TEXT leaf
    pub fn text(content: impl Into<String>) -> Self {
        Node::leaf(Op::Text, content)
    }

    /// A node with exactly one argument
    pub fn unary(op: Op, arg: Node) -> Self {
        let mut node = Node::new(op);
        node.args.push(arg);
        node
    }

    /// A node with exactly two arguments
    pub fn binary(op: Op, lhs: Node, rhs: Node) -> Self {
        let mut node = Node::new(op);
        node.args.push(lhs);
        node.args.push(rhs);
        node
    }

    /// An n-ary node, splicing in children of the same operator
    ///
    /// Flattening skips children that carry a mixed-number flag or an
    /// explicit (non-brace) bracket pair, so `3\frac{1}{2} + x` keeps its
    /// inner ADD and `(a+b)+c` keeps its PAREN.
    pub fn nary(op: Op, parts: Vec<Node>) -> Self {
        let mut node = Node::new(op);
        for part in parts {
            if part.op == op && !part.flags.is_mixed_number && part.bracketed_visibly().is_none() {
                node.args.extend(part.args);
            } else {
                node.args.push(part);
            }
        }
        node
    }

    /// An n-ary node that keeps every part as given
    pub fn nary_grouped(op: Op, parts: Vec<Node>) -> Self {
        let mut node = Node::new(op);
        node.args = parts;
        node
    }

    /// True for NUM/VAR/TEXT payload carriers
    pub fn is_leaf(&self) -> bool {
        self.lexeme.is_some()
    }

    /// True for an integer NUM literal
    pub fn is_integer_literal(&self) -> bool {
        self.op == Op::Num && self.number_format != Some(NumberFormat::Decimal)
    }

    /// True for a decimal NUM literal
    pub fn is_decimal_literal(&self) -> bool {
        self.op == Op::Num && self.number_format == Some(NumberFormat::Decimal)
    }

    /// A fraction of two integer literals
    ///
    /// This is the shape test behind mixed-number recognition; the numeric
    /// bookkeeping fields play no part in it.
    pub fn is_simple_fraction(&self) -> bool {
        self.op == Op::Frac
            && self.args.len() == 2
            && self.args[0].is_integer_literal()
            && self.args[1].is_integer_literal()
    }

    /// The non-brace bracket pair, when one was recorded
    fn bracketed_visibly(&self) -> Option<(Delim, Delim)> {
        match (self.lbrk, self.rbrk) {
            (Some(l), Some(r)) if !l.is_default() || !r.is_default() => Some((l, r)),
            _ => None,
        }
    }

    /// Record the originating bracket pair
    pub fn with_brackets(mut self, lbrk: Delim, rbrk: Delim) -> Self {
        self.lbrk = Some(lbrk);
        self.rbrk = Some(rbrk);
        self
    }
}
