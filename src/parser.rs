//! The recursive-descent parser
//!
//! One function per precedence level, lowest binding first:
//! `comma_expr` → `implies_expr` → `equal_expr` → `relational_expr` →
//! `ratio_expr` → `additive_expr` → `multiplicative_expr` →
//! `fraction_expr` → `subscript_expr` → `unary_expr` → `postfix_expr` →
//! `exponential_expr` → `primary_expr`.
//!
//! The parser owns one token of lookahead plus a single pushback slot for
//! the two-token patterns (`+` before `}` ion suffixes, `|` before `_`
//! evaluation bars). Parser-wide state covers the bracket and pipe nesting
//! counters and the integral-context flag; the latter is restored on every
//! exit path from an integral.

use crate::ast::{Delim, Node, Op};
use crate::env::Environment;
use crate::error::{ErrorCode, ParseResult, SyntaxError};
use crate::options::Options;
use crate::scanner::{Scanner, Tok, TokenKind};

/// The parser over one source string
pub struct Parser<'e> {
    scan: Scanner<'e>,
    opts: Options,
    env: &'e Environment,
    ahead: Tok,
    pushback: Option<Tok>,
    bracket_tokens: u32,
    pipe_tokens: u32,
    in_integral: bool,
}

impl<'e> Parser<'e> {
    /// Build a parser; validates the option set up front
    pub fn new(opts: Options, src: &str, env: &'e Environment) -> ParseResult<Self> {
        opts.validate(src)?;
        let mut scan = Scanner::new(src, opts.clone(), env);
        let ahead = scan.start(false)?;
        Ok(Parser {
            scan,
            opts,
            env,
            ahead,
            pushback: None,
            bracket_tokens: 0,
            pipe_tokens: 0,
            in_integral: false,
        })
    }

    /// Parse the whole source
    ///
    /// An empty input yields a NONE node; leftover tokens after a complete
    /// expression are an error.
    pub fn expr(&mut self) -> ParseResult<Node> {
        if self.hd() == TokenKind::None {
            return Ok(Node::none());
        }
        let node = self.comma_expr(true)?;
        if self.hd() != TokenKind::None {
            let shown = self.lexeme().to_string();
            return Err(self.err(ErrorCode::ExtraInput, &[&shown]));
        }
        Ok(node)
    }

    fn hd(&self) -> TokenKind {
        self.ahead.kind
    }

    fn lexeme(&self) -> &str {
        &self.ahead.lexeme
    }

    fn next(&mut self) -> ParseResult<()> {
        self.next_with(false)
    }

    fn next_with(&mut self, one_char: bool) -> ParseResult<()> {
        self.ahead = match self.pushback.take() {
            Some(tok) => tok,
            None => self.scan.start(one_char)?,
        };
        Ok(())
    }

    /// Advance where a `\left`/`\right` delimiter is legal
    fn next_delim(&mut self) -> ParseResult<()> {
        self.ahead = match self.pushback.take() {
            Some(tok) => tok,
            None => self.scan.start_delimiter()?,
        };
        Ok(())
    }

    /// Undo one `next`: restore `prev` as the lookahead
    fn unread(&mut self, prev: Tok) {
        debug_assert!(self.pushback.is_none());
        self.pushback = Some(std::mem::replace(&mut self.ahead, prev));
    }

    fn err(&self, code: ErrorCode, args: &[&str]) -> SyntaxError {
        SyntaxError::new(code, args, self.scan.src())
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<()> {
        if self.hd() == kind {
            self.next()
        } else {
            let found = if self.hd() == TokenKind::None {
                "end of input".to_string()
            } else {
                format!("'{}'", self.lexeme())
            };
            Err(self.err(ErrorCode::ExpectedFound, &[kind.describe(), &found]))
        }
    }

    fn chemistry(&self) -> bool {
        self.env.is_chemistry()
    }

    // ---- level 1: comma sequences ----

    fn is_list_break(&self) -> bool {
        matches!(
            self.hd(),
            TokenKind::None
                | TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::RightBrace
                | TokenKind::RightBraceSet
                | TokenKind::Gt
                | TokenKind::Rangle
                | TokenKind::NewRow
                | TokenKind::NewCol
                | TokenKind::Right
                | TokenKind::End
        )
    }

    fn comma_expr(&mut self, allow_semicolon: bool) -> ParseResult<Node> {
        let mut parts = vec![self.implies_expr()?];
        let mut saw_separator = false;
        loop {
            match self.hd() {
                TokenKind::Comma => {}
                TokenKind::Semicolon if allow_semicolon => {}
                _ => break,
            }
            self.next()?;
            saw_separator = true;
            if self.is_list_break() {
                break;
            }
            parts.push(self.implies_expr()?);
        }
        if parts.len() == 1 && !saw_separator {
            Ok(parts.pop().unwrap_or_else(Node::none))
        } else {
            Ok(Node::nary(Op::Comma, parts))
        }
    }

    // ---- level 2: implication ----

    fn implies_expr(&mut self) -> ParseResult<Node> {
        let mut node = self.equal_expr()?;
        loop {
            let op = match self.hd() {
                TokenKind::Implies => Op::Implies,
                TokenKind::Iff => Op::Iff,
                _ => break,
            };
            self.next()?;
            let rhs = self.equal_expr()?;
            node = Node::binary(op, node, rhs);
        }
        Ok(node)
    }

    // ---- levels 3–4: chained equality and relations ----

    fn equality_op(&self) -> Option<Op> {
        match self.hd() {
            TokenKind::Equal => Some(Op::Eql),
            TokenKind::Ne => Some(Op::Ne),
            TokenKind::Approx => Some(Op::Approx),
            TokenKind::RightArrow => Some(Op::RightArrow),
            _ => None,
        }
    }

    fn equal_expr(&mut self) -> ParseResult<Node> {
        let first = self.relational_expr()?;
        self.chain(first, Parser::equality_op, Parser::relational_expr)
    }

    fn relational_op(&self) -> Option<Op> {
        match self.hd() {
            TokenKind::Lt => Some(Op::Lt),
            TokenKind::Le => Some(Op::Le),
            TokenKind::Gt => Some(Op::Gt),
            TokenKind::Ge => Some(Op::Ge),
            TokenKind::Ngtr => Some(Op::Ngtr),
            TokenKind::Nless => Some(Op::Nless),
            TokenKind::In => Some(Op::In),
            TokenKind::NotIn => Some(Op::NotIn),
            TokenKind::Ni => Some(Op::Ni),
            TokenKind::Perp => Some(Op::Perp),
            TokenKind::Propto => Some(Op::Propto),
            TokenKind::Subset => Some(Op::Subset),
            TokenKind::Subseteq => Some(Op::Subseteq),
            TokenKind::Supset => Some(Op::Supset),
            TokenKind::Supseteq => Some(Op::Supseteq),
            TokenKind::Parallel => Some(Op::Parallel),
            TokenKind::Nparallel => Some(Op::Nparallel),
            TokenKind::Sim => Some(Op::Sim),
            TokenKind::Cong => Some(Op::Cong),
            _ => None,
        }
    }

    /// `\not` folds the following operator into its negated variant
    fn negated(&self, op: Op) -> Op {
        match op {
            Op::Eql => Op::Ne,
            Op::Lt | Op::Le => Op::Nless,
            Op::Gt | Op::Ge => Op::Ngtr,
            Op::In | Op::Ni => Op::NotIn,
            Op::Subset => Op::NSubset,
            Op::Subseteq => Op::NSubseteq,
            Op::Supset => Op::NSupset,
            Op::Supseteq => Op::NSupseteq,
            Op::Parallel => Op::Nparallel,
            Op::Sim => Op::NSim,
            Op::Cong => Op::NCong,
            Op::Approx => Op::NApprox,
            other => other,
        }
    }

    fn relational_expr(&mut self) -> ParseResult<Node> {
        let first = self.ratio_expr()?;
        self.chain(
            first,
            |p| {
                if p.hd() == TokenKind::Not {
                    return Some(Op::Not); // resolved to the negated op below
                }
                p.relational_op()
            },
            Parser::ratio_expr,
        )
    }

    /// Shared chain builder for the equality and relational levels
    ///
    /// A chain of length one is a plain binary node; longer chains reify as
    /// a COMMA of binary pairs, with the repeated middle operand deep
    /// copied so the pairs never share structure.
    fn chain(
        &mut self,
        first: Node,
        op_of: impl Fn(&Parser<'e>) -> Option<Op>,
        mut operand: impl FnMut(&mut Parser<'e>) -> ParseResult<Node>,
    ) -> ParseResult<Node> {
        let mut pairs: Vec<Node> = Vec::new();
        let mut prev = first;
        while let Some(op) = op_of(self) {
            let op = if op == Op::Not {
                self.next()?;
                let Some(inner) = self.relational_op().or_else(|| self.equality_op()) else {
                    let shown = self.lexeme().to_string();
                    return Err(self.err(ErrorCode::ExpectedFound, &["a relation", &shown]));
                };
                self.negated(inner)
            } else {
                op
            };
            self.next()?;
            let rhs = operand(self)?;
            let link = rhs.clone();
            pairs.push(Node::binary(op, prev, link));
            prev = rhs;
        }
        match pairs.len() {
            0 => Ok(prev),
            1 => Ok(pairs.pop().unwrap_or_else(Node::none)),
            _ => Ok(Node::nary_grouped(Op::Comma, pairs)),
        }
    }

    // ---- level 5: ratios ----

    fn ratio_expr(&mut self) -> ParseResult<Node> {
        let mut parts = vec![self.additive_expr()?];
        while self.hd() == TokenKind::Colon {
            self.next()?;
            parts.push(self.additive_expr()?);
        }
        if parts.len() == 1 {
            Ok(parts.pop().unwrap_or_else(Node::none))
        } else {
            Ok(Node::nary(Op::Colon, parts))
        }
    }

    // ---- level 6: additive ----

    /// Wrap a `\{…\}`-bracketed operand of a set operator
    fn wrap_set(node: Node) -> Node {
        if node.op != Op::Set && node.lbrk == Some(Delim::LSetBrace) {
            let (l, r) = (node.lbrk, node.rbrk);
            let mut inner = node;
            inner.lbrk = None;
            inner.rbrk = None;
            let mut set = Node::unary(Op::Set, inner);
            set.lbrk = l;
            set.rbrk = r;
            set
        } else {
            node
        }
    }

    fn additive_expr(&mut self) -> ParseResult<Node> {
        let mut node = self.multiplicative_expr(false)?;
        loop {
            let op = match self.hd() {
                TokenKind::Add => Op::Add,
                TokenKind::Sub => Op::Sub,
                TokenKind::Pm => Op::Pm,
                TokenKind::Setminus => Op::Setminus,
                TokenKind::Backslash => Op::Backslash,
                TokenKind::Cup => Op::Cup,
                TokenKind::Cap => Op::Cap,
                _ => break,
            };
            self.next()?;
            let rhs = self.multiplicative_expr(false)?;
            node = match op {
                Op::Add => {
                    let polynomial = is_polynomial_operand(&node)
                        && is_polynomial_operand(&rhs)
                        && (has_variable_shape(&node) || has_variable_shape(&rhs));
                    let mut add = if self.opts.compare_grouping {
                        Node::nary_grouped(Op::Add, vec![node, rhs])
                    } else {
                        Node::nary(Op::Add, vec![node, rhs])
                    };
                    add.flags.is_polynomial = polynomial;
                    add
                }
                Op::Cup | Op::Cap | Op::Setminus | Op::Backslash => Node::binary(
                    op,
                    Parser::wrap_set(node),
                    Parser::wrap_set(rhs),
                ),
                _ => Node::binary(op, node, rhs),
            };
        }
        Ok(node)
    }

    // ---- level 7: multiplicative, the disambiguation engine ----

    /// Can `kind` begin a juxtaposed factor?
    fn starts_factor(&self, kind: TokenKind, implicit_only: bool) -> bool {
        match kind {
            TokenKind::Num
            | TokenKind::Var
            | TokenKind::Text
            | TokenKind::LeftParen
            | TokenKind::LeftBracket
            | TokenKind::LeftBrace
            | TokenKind::LeftBraceSet
            | TokenKind::Langle
            | TokenKind::Left
            | TokenKind::Frac
            | TokenKind::Overline
            | TokenKind::DotAccent
            | TokenKind::VecCmd
            | TokenKind::Mathbf
            | TokenKind::Overset
            | TokenKind::Underset
            | TokenKind::Delta
            | TokenKind::Begin => true,
            TokenKind::VerticalBar | TokenKind::DoubleVerticalBar => self.pipe_tokens == 0,
            TokenKind::Sin
            | TokenKind::Cos
            | TokenKind::Tan
            | TokenKind::Sec
            | TokenKind::Csc
            | TokenKind::Cot
            | TokenKind::Sinh
            | TokenKind::Cosh
            | TokenKind::Tanh
            | TokenKind::Coth
            | TokenKind::Arcsin
            | TokenKind::Arccos
            | TokenKind::Arctan
            | TokenKind::Log
            | TokenKind::Ln
            | TokenKind::Lg
            | TokenKind::Sqrt
            | TokenKind::Int
            | TokenKind::IInt
            | TokenKind::IIInt
            | TokenKind::Sum
            | TokenKind::Prod
            | TokenKind::Lim
            | TokenKind::BigCup
            | TokenKind::BigCap => !implicit_only,
            _ => false,
        }
    }

    fn multiplicative_expr(&mut self, implicit_only: bool) -> ParseResult<Node> {
        let mut node = self.fraction_expr()?;
        loop {
            match self.hd() {
                TokenKind::Star | TokenKind::Cdot => {
                    if implicit_only {
                        break;
                    }
                    self.next()?;
                    let rhs = self.fraction_expr()?;
                    node = Node::nary(Op::Mul, vec![node, rhs]);
                }
                TokenKind::Times => {
                    if implicit_only {
                        break;
                    }
                    self.next()?;
                    let rhs = self.fraction_expr()?;
                    node = self.times_combine(node, rhs);
                }
                TokenKind::Div => {
                    if implicit_only {
                        break;
                    }
                    self.next()?;
                    let rhs = self.fraction_expr()?;
                    node = Node::binary(Op::Div, node, rhs);
                }
                TokenKind::Text
                    if is_e_notation_marker(self.lexeme()) && rightmost(&node).op == Op::Num =>
                {
                    node = self.e_notation(node)?;
                }
                kind if self.starts_factor(kind, implicit_only) => {
                    let rhs = self.fraction_expr()?;
                    node = self.implicit_combine(node, rhs)?;
                }
                _ => break,
            }
        }
        Ok(node)
    }

    /// `a \times b`, recognizing the scientific form `a \times 10^k`
    fn times_combine(&self, node: Node, rhs: Node) -> Node {
        let scientific = rightmost(&node).op == Op::Num
            && rhs.op == Op::Pow
            && rhs.args.first().map(is_ten).unwrap_or(false);
        let mut mul = Node::nary(Op::Mul, vec![node, rhs]);
        mul.flags.is_scientific = scientific;
        mul
    }

    /// `1.2\text{e}5` and friends
    fn e_notation(&mut self, node: Node) -> ParseResult<Node> {
        self.next()?; // the marker text
        let negative = match self.hd() {
            TokenKind::Sub => {
                self.next()?;
                true
            }
            TokenKind::Add => {
                self.next()?;
                false
            }
            _ => false,
        };
        if self.hd() != TokenKind::Num {
            let shown = self.lexeme().to_string();
            return Err(self.err(ErrorCode::ExpectedFound, &["an exponent", &shown]));
        }
        let mut exp = self.leaf_from_ahead(Op::Num);
        self.next()?;
        if negative {
            exp = Node::unary(Op::Sub, exp);
        }
        let power = Node::binary(Op::Pow, Node::num("10"), exp);
        Ok(replace_rightmost(node, |mantissa| {
            let mut mul = Node::nary_grouped(Op::Mul, vec![mantissa, power]);
            mul.flags.is_scientific = true;
            mul
        }))
    }

    /// Combine two juxtaposed factors
    fn implicit_combine(&mut self, node: Node, rhs: Node) -> ParseResult<Node> {
        let right = rightmost(&node);
        // mixed number: integer then a simple proper fraction
        if right.op == Op::Num
            && right.is_integer_literal()
            && rhs.is_simple_fraction()
            && is_proper_fraction(&rhs)
        {
            return Ok(replace_rightmost(node, |n| {
                let mut add = Node::binary(Op::Add, n, rhs);
                add.flags.is_mixed_number = true;
                add
            }));
        }
        // repeating decimal: decimal then \overline{digits}
        if right.is_decimal_literal()
            && rhs.op == Op::Overline
            && rhs.args.len() == 1
            && rhs.args[0].op == Op::Num
        {
            let mut tail = rhs.args.into_iter().next().unwrap_or_else(Node::none);
            tail.flags.is_repeating = true;
            return Ok(replace_rightmost(node, |mut n| {
                n.flags.is_repeating = true;
                let mut add = Node::binary(Op::Add, n, tail);
                add.flags.is_repeating = true;
                add
            }));
        }
        // molar mass in chemistry mode: M(…)
        if self.chemistry()
            && right.op == Op::Var
            && right.lexeme.as_deref() == Some("M")
            && rhs.op == Op::Paren
        {
            return Ok(replace_rightmost(node, |_| Node::unary(Op::MolarMass, rhs)));
        }
        // prime attachment: f'
        if right.op == Op::Var
            && rhs.op == Op::Var
            && rhs.lexeme.as_deref().map(|l| l.starts_with('\'')).unwrap_or(false)
        {
            return Ok(replace_rightmost(node, |base| Node::binary(Op::Pow, base, rhs)));
        }
        // degree attachment: a negative scalar re-enters as -(n·°)
        if node.op == Op::Sub
            && node.args.len() == 1
            && node.args[0].op == Op::Num
            && rhs.op == Op::Var
            && rhs.lexeme.as_deref() == Some("\\degree")
        {
            let inner = node.args.into_iter().next().unwrap_or_else(Node::none);
            let mut mul = Node::nary_grouped(Op::Mul, vec![inner, rhs]);
            mul.flags.is_implicit = true;
            return Ok(Node::unary(Op::Sub, mul));
        }
        // adjacent numbers need an operator
        if right.op == Op::Num && rhs.op == Op::Num {
            return Err(self.err(ErrorCode::NumbersWithoutOperator, &[]));
        }
        let mut mul = Node::nary(Op::Mul, vec![node, rhs]);
        mul.flags.is_implicit = true;
        mul.flags.is_polynomial_term = is_polynomial_term(&mul);
        Ok(mul)
    }

    // ---- level 8: fractions ----

    fn fraction_expr(&mut self) -> ParseResult<Node> {
        let mut node = if self.hd() == TokenKind::Frac {
            self.frac_node()?
        } else {
            self.subscript_expr()?
        };
        // mixed number written without space: 3\frac{1}{2}
        if node.is_integer_literal() && self.hd() == TokenKind::Frac {
            let frac = self.frac_node()?;
            node = if frac.is_simple_fraction() && is_proper_fraction(&frac) {
                let mut add = Node::binary(Op::Add, node, frac);
                add.flags.is_mixed_number = true;
                add
            } else {
                let mut mul = Node::nary(Op::Mul, vec![node, frac]);
                mul.flags.is_implicit = true;
                mul
            };
        }
        while self.hd() == TokenKind::Slash {
            self.next()?;
            let rhs = self.subscript_expr()?;
            let mut frac = Node::binary(Op::Frac, node, rhs);
            frac.flags.is_slash = true;
            node = frac;
        }
        Ok(node)
    }

    /// A `\frac{…}{…}` form, including derivative recognition
    fn frac_node(&mut self) -> ParseResult<Node> {
        self.next_with(true)?; // consume \frac, single-char scope follows
        let numer = self.frac_operand()?;
        let denom = self.frac_operand()?;
        if let Some(deriv) = self.derivative(&numer, &denom)? {
            return Ok(deriv);
        }
        let mut frac = Node::binary(Op::Frac, numer, denom);
        frac.flags.is_fraction = true;
        Ok(frac)
    }

    fn frac_operand(&mut self) -> ParseResult<Node> {
        if self.hd() == TokenKind::LeftBrace {
            self.brace_expr()
        } else {
            match self.hd() {
                TokenKind::Num => {
                    let leaf = self.leaf_from_ahead(Op::Num);
                    self.next_with(true)?;
                    Ok(leaf)
                }
                TokenKind::Var => {
                    let leaf = self.leaf_from_ahead(Op::Var);
                    self.next_with(true)?;
                    Ok(leaf)
                }
                _ => self.primary_expr(),
            }
        }
    }

    /// Recognize `\frac{d…}{d…}` as a derivative
    ///
    /// Returns `DERIV(target, var)` (order appended for `d^n`) or `None`
    /// when the fraction is not derivative shaped. A bare `\frac{d}{dx}`
    /// takes the following fraction-level operand as its target.
    fn derivative(&mut self, numer: &Node, denom: &Node) -> ParseResult<Option<Node>> {
        let Some((var, denom_order)) = denominator_var(denom) else {
            return Ok(None);
        };
        let Some((target, order)) = numerator_target(numer) else {
            return Ok(None);
        };
        if order != denom_order {
            return Ok(None);
        }
        let target = match target {
            Some(t) => t,
            None => {
                if self.starts_factor(self.hd(), false) {
                    self.fraction_expr()?
                } else {
                    Node::none()
                }
            }
        };
        let mut args = vec![target, var];
        if order > 1 {
            args.push(Node::num(order.to_string()));
        }
        Ok(Some(Node::nary_grouped(Op::Deriv, args)))
    }

    // ---- level 9: subscripts ----

    fn subscript_expr(&mut self) -> ParseResult<Node> {
        let mut node = self.unary_expr()?;
        loop {
            match self.hd() {
                TokenKind::Underscore => {
                    self.next_with(true)?;
                    let sub = self.script_operand()?;
                    node = self.attach_subscript(node, sub)?;
                }
                TokenKind::Caret => {
                    // a superscript following a subscript: x_1^2
                    self.next_with(true)?;
                    let exp = self.script_operand()?;
                    node = Node::binary(Op::Pow, node, exp);
                }
                _ => break,
            }
        }
        Ok(node)
    }

    /// Fold a subscript under any existing POW so `x^2_1` ≡ `x_1^2`
    fn attach_subscript(&mut self, node: Node, sub: Node) -> ParseResult<Node> {
        if node.op == Op::Num {
            let shown = node.lexeme.clone().unwrap_or_default();
            return Err(self.err(ErrorCode::MisplacedSubscript, &[&shown]));
        }
        if node.op == Op::Pow && node.args.len() == 2 {
            let mut parts = node.args.into_iter();
            let base = parts.next().unwrap_or_else(Node::none);
            let exp = parts.next().unwrap_or_else(Node::none);
            let scripted = Node::binary(Op::Subscript, base, sub);
            return Ok(Node::binary(Op::Pow, scripted, exp));
        }
        Ok(Node::binary(Op::Subscript, node, sub))
    }

    /// The operand of `^` or `_`: a braced group or a tightly bound prefix
    fn script_operand(&mut self) -> ParseResult<Node> {
        match self.hd() {
            TokenKind::Sub => {
                self.next_with(true)?;
                Ok(Node::unary(Op::Sub, self.script_operand()?))
            }
            TokenKind::Add => {
                self.next_with(true)?;
                Ok(Node::unary(Op::Add, self.script_operand()?))
            }
            _ => self.primary_expr(),
        }
    }

    // ---- level 10: unary ----

    fn unary_expr(&mut self) -> ParseResult<Node> {
        match self.hd() {
            TokenKind::Add => {
                self.next()?;
                Ok(Node::unary(Op::Add, self.unary_expr()?))
            }
            TokenKind::Sub => {
                self.next()?;
                Ok(Node::unary(Op::Sub, self.unary_expr()?))
            }
            TokenKind::Not => {
                self.next()?;
                Ok(Node::unary(Op::Not, self.unary_expr()?))
            }
            TokenKind::Exists => {
                self.next()?;
                Ok(Node::unary(Op::Exists, self.unary_expr()?))
            }
            TokenKind::Forall => {
                self.next()?;
                Ok(Node::unary(Op::Forall, self.unary_expr()?))
            }
            TokenKind::Pm => {
                // \pm re-enters the multiplicative level
                self.next()?;
                Ok(Node::unary(Op::Pm, self.multiplicative_expr(false)?))
            }
            TokenKind::Underscore | TokenKind::Caret => {
                // standalone introducers: _+^-
                let mut node = Node::none();
                loop {
                    match self.hd() {
                        TokenKind::Underscore => {
                            self.next_with(true)?;
                            let sub = self.script_operand()?;
                            node = Node::binary(Op::Subscript, node, sub);
                        }
                        TokenKind::Caret => {
                            self.next_with(true)?;
                            let exp = self.script_operand()?;
                            node = Node::binary(Op::Pow, node, exp);
                        }
                        _ => break,
                    }
                }
                Ok(node)
            }
            _ => self.postfix_expr(),
        }
    }

    // ---- level 11: postfix ----

    fn postfix_expr(&mut self) -> ParseResult<Node> {
        let mut node = self.exponential_expr()?;
        loop {
            match self.hd() {
                TokenKind::Percent => {
                    self.next()?;
                    node = Node::unary(Op::Percent, node);
                }
                TokenKind::Bang => {
                    self.next()?;
                    node = Node::unary(Op::Fact, node);
                }
                TokenKind::VerticalBar if self.pipe_tokens == 0 => {
                    // evaluation bar: x|_{a}
                    let bar = self.ahead.clone();
                    self.next()?;
                    if self.hd() == TokenKind::Underscore {
                        self.next_with(true)?;
                        let at = self.script_operand()?;
                        node = Node::binary(Op::Pipe, node, at);
                    } else {
                        self.unread(bar);
                        break;
                    }
                }
                TokenKind::Add | TokenKind::Sub if self.chemistry() => {
                    // ion suffix, only immediately before a closing brace
                    let sign = self.ahead.clone();
                    self.next()?;
                    if self.hd() == TokenKind::RightBrace {
                        let charge = Node::var(sign.lexeme.clone());
                        node = Node::binary(Op::Pow, node, charge);
                    } else {
                        self.unread(sign);
                        break;
                    }
                }
                _ => break,
            }
        }
        Ok(node)
    }

    // ---- level 12: exponents ----

    fn exponential_expr(&mut self) -> ParseResult<Node> {
        let node = self.primary_expr()?;
        if self.hd() != TokenKind::Caret {
            return Ok(node);
        }
        let mut scripts: Vec<Node> = Vec::new();
        while self.hd() == TokenKind::Caret {
            self.next_with(true)?;
            match self.hd() {
                TokenKind::Circ => {
                    // degree units: 25^\circ, optionally 25^\circ C
                    self.next()?;
                    return self.degree_unit(node);
                }
                TokenKind::Add | TokenKind::Sub
                    if self.chemistry() || is_math_symbol(&node) =>
                {
                    let charge = Node::var(self.lexeme().to_string());
                    self.next()?;
                    scripts.push(charge);
                }
                _ => scripts.push(self.script_operand()?),
            }
        }
        // right associative: a^b^c is a^(b^c)
        let mut exp = scripts.pop().unwrap_or_else(Node::none);
        while let Some(lower) = scripts.pop() {
            exp = Node::binary(Op::Pow, lower, exp);
        }
        Ok(Node::binary(Op::Pow, node, exp))
    }

    fn degree_unit(&mut self, node: Node) -> ParseResult<Node> {
        let mut parts = vec![node, Node::var("\\degree")];
        let scale = match self.hd() {
            TokenKind::Var | TokenKind::Text
                if matches!(self.lexeme(), "K" | "C" | "F") =>
            {
                Some(Node::var(self.lexeme().to_string()))
            }
            _ => None,
        };
        if let Some(scale) = scale {
            self.next()?;
            parts.push(scale);
        }
        let mut mul = Node::nary_grouped(Op::Mul, parts);
        mul.flags.is_implicit = true;
        Ok(mul)
    }

    // ---- level 13: primaries ----

    fn leaf_from_ahead(&self, op: Op) -> Node {
        let mut leaf = Node::leaf(op, self.ahead.lexeme.clone());
        if op == Op::Num {
            leaf.number_format = self.ahead.number_format;
            leaf.separator_count = self.ahead.separator_count;
            leaf.last_separator_index = self.ahead.last_separator_index;
        }
        leaf
    }

    fn primary_expr(&mut self) -> ParseResult<Node> {
        match self.hd() {
            TokenKind::Num => {
                let leaf = self.leaf_from_ahead(Op::Num);
                self.next()?;
                Ok(leaf)
            }
            TokenKind::Var => {
                let leaf = self.leaf_from_ahead(Op::Var);
                self.next()?;
                Ok(leaf)
            }
            TokenKind::Text => {
                let leaf = self.leaf_from_ahead(Op::Text);
                self.next()?;
                Ok(leaf)
            }
            TokenKind::LeftBrace | TokenKind::LeftBraceSet => self.brace_expr(),
            TokenKind::LeftParen | TokenKind::LeftBracket => self.paren_expr(),
            // a `]` only opens a French interval outside square brackets
            TokenKind::RightBracket if self.bracket_tokens == 0 => self.paren_expr(),
            TokenKind::Left => self.left_right_expr(),
            TokenKind::VerticalBar | TokenKind::DoubleVerticalBar => self.abs_expr(),
            TokenKind::Langle => self.angle_expr(),
            TokenKind::Frac => self.frac_node(),
            TokenKind::Sqrt => self.sqrt_expr(),
            TokenKind::Sin
            | TokenKind::Cos
            | TokenKind::Tan
            | TokenKind::Sec
            | TokenKind::Csc
            | TokenKind::Cot
            | TokenKind::Sinh
            | TokenKind::Cosh
            | TokenKind::Tanh
            | TokenKind::Coth
            | TokenKind::Arcsin
            | TokenKind::Arccos
            | TokenKind::Arctan => self.trig_expr(),
            TokenKind::Log | TokenKind::Ln | TokenKind::Lg => self.log_expr(),
            TokenKind::Int | TokenKind::IInt | TokenKind::IIInt => self.integral_expr(),
            TokenKind::Sum | TokenKind::Prod | TokenKind::BigCup | TokenKind::BigCap => {
                self.big_op_expr()
            }
            TokenKind::Lim => self.lim_expr(),
            TokenKind::Overline => self.overline_expr(),
            TokenKind::DotAccent => self.dot_expr(),
            TokenKind::VecCmd => self.decorated(Op::Vec),
            TokenKind::Mathbf => self.decorated(Op::Mathbf),
            TokenKind::Overset | TokenKind::Underset => self.overset_expr(),
            TokenKind::Delta => self.delta_expr(),
            TokenKind::Begin => self.matrix_expr(),
            TokenKind::None => Ok(Node::none()),
            _ => {
                if self.opts.strict {
                    let shown = self.lexeme().to_string();
                    Err(self.err(ErrorCode::ExpressionExpected, &[&shown]))
                } else {
                    Ok(Node::none())
                }
            }
        }
    }

    /// `{…}` and `\{…\}`
    ///
    /// Plain braces are transparent grouping and leave no trace on the
    /// node; set braces record their pair so the additive level can wrap
    /// SET operands.
    fn brace_expr(&mut self) -> ParseResult<Node> {
        let set = self.hd() == TokenKind::LeftBraceSet;
        let close = if set {
            TokenKind::RightBraceSet
        } else {
            TokenKind::RightBrace
        };
        self.next()?;
        if self.hd() == close {
            self.next()?;
            // empty braces are an empty COMMA
            let empty = Node::new(Op::Comma);
            return Ok(if set {
                empty.with_brackets(Delim::LSetBrace, Delim::RSetBrace)
            } else {
                empty
            });
        }
        let body = self.comma_expr(true)?;
        self.expect(close)?;
        Ok(if set {
            body.with_brackets(Delim::LSetBrace, Delim::RSetBrace)
        } else {
            body
        })
    }

    /// `(…)`, `[…]` and the French forms `]…[`, `]…]`, `[…[`
    fn paren_expr(&mut self) -> ParseResult<Node> {
        let open = self.hd();
        let open_shown = self.lexeme().to_string();
        if open == TokenKind::LeftBracket {
            self.bracket_tokens += 1;
        }
        self.next()?;
        let body = if matches!(
            self.hd(),
            TokenKind::RightParen | TokenKind::RightBracket | TokenKind::LeftBracket
        ) {
            Node::new(Op::Comma)
        } else {
            self.comma_expr(true)?
        };
        let close = self.hd();
        let close_shown = self.lexeme().to_string();
        match close {
            TokenKind::RightParen | TokenKind::RightBracket | TokenKind::LeftBracket => {
                self.next()?;
            }
            _ => {
                let found = if close == TokenKind::None {
                    "end of input".to_string()
                } else {
                    format!("'{close_shown}'")
                };
                return Err(self.err(
                    ErrorCode::ExpectedFound,
                    &["a closing bracket", &found],
                ));
            }
        }
        if open == TokenKind::LeftBracket {
            self.bracket_tokens = self.bracket_tokens.saturating_sub(1);
        }
        // French normalization: `]` opening is `(`, `[` closing is `)`
        let lbrk = match open {
            TokenKind::LeftParen => Delim::LParen,
            TokenKind::LeftBracket => Delim::LBracket,
            _ => Delim::LParen,
        };
        let rbrk = match close {
            TokenKind::RightParen => Delim::RParen,
            TokenKind::RightBracket => Delim::RBracket,
            _ => Delim::RParen,
        };
        self.classify_group(lbrk, rbrk, body, &open_shown, &close_shown)
    }

    /// Interval versus grouping classification for paren/bracket pairs
    fn classify_group(
        &self,
        lbrk: Delim,
        rbrk: Delim,
        body: Node,
        open_shown: &str,
        close_shown: &str,
    ) -> ParseResult<Node> {
        if body.op == Op::Comma && body.args.len() == 2 {
            let op = match (lbrk, rbrk) {
                (Delim::LParen, Delim::RParen) => Op::IntervalOpen,
                (Delim::LBracket, Delim::RBracket) => Op::Interval,
                (Delim::LParen, Delim::RBracket) => Op::IntervalLeftOpen,
                (Delim::LBracket, Delim::RParen) => Op::IntervalRightOpen,
                _ => Op::Paren,
            };
            return Ok(Node::unary(op, body).with_brackets(lbrk, rbrk));
        }
        match (lbrk, rbrk) {
            (Delim::LParen, Delim::RParen) | (Delim::LParen, Delim::Dot) | (Delim::Dot, Delim::RParen) => {
                Ok(Node::unary(Op::Paren, body).with_brackets(lbrk, rbrk))
            }
            (Delim::LBracket, Delim::RBracket) | (Delim::LBracket, Delim::Dot) | (Delim::Dot, Delim::RBracket) => {
                Ok(Node::unary(Op::Bracket, body).with_brackets(lbrk, rbrk))
            }
            _ => Err(self.err(
                ErrorCode::GroupingBracket,
                &[open_shown, close_shown],
            )),
        }
    }

    /// `\left … \right` with any delimiter pair
    fn left_right_expr(&mut self) -> ParseResult<Node> {
        self.next_delim()?; // consume \left, scan the delimiter
        let open = self.hd();
        let open_shown = self.lexeme().to_string();
        let open_delim = match open {
            TokenKind::LeftParen => Delim::LParen,
            TokenKind::LeftBracket => Delim::LBracket,
            TokenKind::RightBracket => Delim::LParen, // French opener
            TokenKind::LeftBraceSet => Delim::LSetBrace,
            TokenKind::VerticalBar | TokenKind::DoubleVerticalBar => Delim::Pipe,
            TokenKind::Langle => Delim::LAngle,
            TokenKind::Period => Delim::Dot,
            _ => {
                return Err(self.err(
                    ErrorCode::GroupingBracket,
                    &[&open_shown, "\\left"],
                ))
            }
        };
        if open_delim == Delim::Pipe {
            self.pipe_tokens += 1;
        }
        self.next()?;
        let body = if self.hd() == TokenKind::Right {
            Node::new(Op::Comma)
        } else {
            self.comma_expr(true)?
        };
        if self.hd() != TokenKind::Right {
            let shown = self.lexeme().to_string();
            return Err(self.err(ErrorCode::ExpectedFound, &["'\\right'", &shown]));
        }
        self.next_delim()?; // consume \right, scan the delimiter
        let close = self.hd();
        let close_shown = self.lexeme().to_string();
        let close_delim = match close {
            TokenKind::RightParen => Delim::RParen,
            TokenKind::RightBracket => Delim::RBracket,
            TokenKind::LeftBracket => Delim::RParen, // French closer
            TokenKind::RightBraceSet => Delim::RSetBrace,
            TokenKind::VerticalBar | TokenKind::DoubleVerticalBar => Delim::Pipe,
            TokenKind::Rangle => Delim::RAngle,
            TokenKind::Period => Delim::Dot,
            _ => {
                return Err(self.err(
                    ErrorCode::GroupingBracket,
                    &[&open_shown, &close_shown],
                ))
            }
        };
        if open_delim == Delim::Pipe {
            self.pipe_tokens = self.pipe_tokens.saturating_sub(1);
        }
        self.next()?;
        match (open_delim, close_delim) {
            (Delim::Pipe, Delim::Pipe) => {
                Ok(Node::unary(Op::Abs, body).with_brackets(Delim::Pipe, Delim::Pipe))
            }
            (Delim::Dot, Delim::Pipe) => {
                // \left. … \right| is evaluation-at; the point attaches as a
                // subscript at the level above
                Ok(Node::unary(Op::EvalAt, body).with_brackets(Delim::Dot, Delim::Pipe))
            }
            (Delim::LAngle, Delim::RAngle) => {
                Ok(Node::unary(Op::AngleBracket, body).with_brackets(Delim::LAngle, Delim::RAngle))
            }
            (Delim::LSetBrace, _) => Ok(body.with_brackets(open_delim, close_delim)),
            (Delim::Dot, Delim::Dot) => Ok(body.with_brackets(open_delim, close_delim)),
            _ => self.classify_group(open_delim, close_delim, body, &open_shown, &close_shown),
        }
    }

    /// `|…|` and `\|…\|`
    fn abs_expr(&mut self) -> ParseResult<Node> {
        let open = self.hd();
        self.pipe_tokens += 1;
        self.next()?;
        let body = self.comma_expr(true)?;
        let close_ok = self.hd() == open;
        if !close_ok {
            let shown = if self.hd() == TokenKind::None {
                "end of input".to_string()
            } else {
                format!("'{}'", self.lexeme())
            };
            return Err(self.err(ErrorCode::ExpectedFound, &["'|'", &shown]));
        }
        self.next()?;
        self.pipe_tokens = self.pipe_tokens.saturating_sub(1);
        Ok(Node::unary(Op::Abs, body).with_brackets(Delim::Pipe, Delim::Pipe))
    }

    /// `\langle … \rangle`
    fn angle_expr(&mut self) -> ParseResult<Node> {
        self.next()?;
        let body = self.comma_expr(true)?;
        self.expect(TokenKind::Rangle)?;
        Ok(Node::unary(Op::AngleBracket, body).with_brackets(Delim::LAngle, Delim::RAngle))
    }

    /// The trig and hyperbolic family
    fn trig_expr(&mut self) -> ParseResult<Node> {
        let base_op = match self.hd() {
            TokenKind::Sin => Op::Sin,
            TokenKind::Cos => Op::Cos,
            TokenKind::Tan => Op::Tan,
            TokenKind::Sec => Op::Sec,
            TokenKind::Csc => Op::Csc,
            TokenKind::Cot => Op::Cot,
            TokenKind::Sinh => Op::Sinh,
            TokenKind::Cosh => Op::Cosh,
            TokenKind::Tanh => Op::Tanh,
            TokenKind::Coth => Op::Coth,
            TokenKind::Arcsin => Op::Arcsin,
            TokenKind::Arccos => Op::Arccos,
            TokenKind::Arctan => Op::Arctan,
            _ => return Err(self.err(ErrorCode::Internal, &["trig"])),
        };
        self.next()?;
        let mut scripts: Vec<Node> = Vec::new();
        while self.hd() == TokenKind::Caret {
            self.next_with(true)?;
            scripts.push(self.script_operand()?);
        }
        // a single ^{-1} means the inverse function
        let op = if scripts.len() == 1 && is_negative_one(&scripts[0]) {
            scripts.clear();
            inverse_trig(base_op)
        } else {
            base_op
        };
        let arg = self.function_arg()?;
        let (arg, trailing) = self.split_integral_tail(arg);
        let mut node = Node::unary(op, arg);
        let mut exp = scripts.pop();
        while let Some(lower) = scripts.pop() {
            exp = Some(Node::binary(Op::Pow, lower, exp.unwrap_or_else(Node::none)));
        }
        if let Some(exp) = exp {
            node = Node::binary(Op::Pow, node, exp);
        }
        Ok(reattach_tail(node, trailing))
    }

    /// `\log`, `\ln`, `\lg` with an optional `\log_b` base
    fn log_expr(&mut self) -> ParseResult<Node> {
        let kind = self.hd();
        self.next()?;
        let base = match kind {
            TokenKind::Log if self.hd() == TokenKind::Underscore => {
                self.next_with(true)?;
                self.script_operand()?
            }
            TokenKind::Ln => Node::var("e"),
            _ => Node::num("10"),
        };
        let arg = self.function_arg()?;
        let (arg, trailing) = self.split_integral_tail(arg);
        let node = Node::binary(Op::Log, base, arg);
        Ok(reattach_tail(node, trailing))
    }

    /// A function argument: a bracketed group binds it, otherwise an
    /// implicit-only multiplicative expression does
    fn function_arg(&mut self) -> ParseResult<Node> {
        if matches!(self.hd(), TokenKind::LeftParen | TokenKind::LeftBrace) {
            self.primary_expr()
        } else {
            self.multiplicative_expr(true)
        }
    }

    /// Inside an integral, pull a trailing `d<var>` off a function argument
    fn split_integral_tail(&self, arg: Node) -> (Node, Option<Node>) {
        if self.in_integral && has_dx(&arg) {
            if let Some((stripped, var)) = strip_dx(arg.clone()) {
                return (stripped, Some(var));
            }
        }
        (arg, None)
    }

    /// `\sqrt{x}` and `\sqrt[n]{x}`
    fn sqrt_expr(&mut self) -> ParseResult<Node> {
        self.next()?;
        if self.hd() == TokenKind::LeftBracket {
            self.next()?;
            let index = self.comma_expr(true)?;
            self.expect(TokenKind::RightBracket)?;
            let arg = self.primary_expr()?;
            return Ok(Node::binary(Op::Nthroot, index, arg));
        }
        let arg = self.primary_expr()?;
        Ok(Node::unary(Op::Sqrt, arg))
    }

    /// `\int`, `\iint`, `\iiint`
    fn integral_expr(&mut self) -> ParseResult<Node> {
        let depth = match self.hd() {
            TokenKind::IInt => 2,
            TokenKind::IIInt => 3,
            _ => 1,
        };
        self.next()?;
        let (lo, hi) = self.script_bounds()?;
        let saved = self.in_integral;
        self.in_integral = true;
        let body = self.additive_expr();
        self.in_integral = saved;
        let body = body?;
        let mut expr = body;
        let mut vars = Vec::with_capacity(depth);
        for _ in 0..depth {
            match strip_dx(expr) {
                Some((stripped, var)) => {
                    vars.push(var);
                    expr = stripped;
                }
                None => return Err(self.err(ErrorCode::MissingIntegrationVariable, &[])),
            }
        }
        // vars were stripped right to left; innermost integral binds the
        // leftmost d-variable, bounds go to the outermost
        let mut node = expr;
        let last = vars.len() - 1;
        for (i, var) in vars.into_iter().rev().enumerate() {
            let mut args = Vec::new();
            if i == last {
                if let Some(lo) = lo.clone() {
                    args.push(lo);
                }
                if let Some(hi) = hi.clone() {
                    args.push(hi);
                }
            }
            args.push(node);
            args.push(var);
            node = Node::nary_grouped(Op::Integral, args);
        }
        Ok(node)
    }

    /// Optional `_lo` and `^hi` bounds in either order
    fn script_bounds(&mut self) -> ParseResult<(Option<Node>, Option<Node>)> {
        let mut lo = None;
        let mut hi = None;
        loop {
            match self.hd() {
                TokenKind::Underscore if lo.is_none() => {
                    self.next_with(true)?;
                    lo = Some(self.script_operand()?);
                }
                TokenKind::Caret if hi.is_none() => {
                    self.next_with(true)?;
                    hi = Some(self.script_operand()?);
                }
                _ => break,
            }
        }
        Ok((lo, hi))
    }

    /// `\sum`, `\prod`, `\bigcup`, `\bigcap`
    fn big_op_expr(&mut self) -> ParseResult<Node> {
        let op = match self.hd() {
            TokenKind::Sum => Op::Sum,
            TokenKind::Prod => Op::Prod,
            TokenKind::BigCup => Op::BigCup,
            _ => Op::BigCap,
        };
        self.next()?;
        let (lo, hi) = self.script_bounds()?;
        let body = self.multiplicative_expr(false)?;
        let mut args = Vec::new();
        if let Some(lo) = lo {
            args.push(lo);
        }
        if let Some(hi) = hi {
            args.push(hi);
        }
        args.push(body);
        Ok(Node::nary_grouped(op, args))
    }

    /// `\lim` with an optional subscript
    fn lim_expr(&mut self) -> ParseResult<Node> {
        self.next()?;
        let mut args = Vec::new();
        if self.hd() == TokenKind::Underscore {
            self.next_with(true)?;
            args.push(self.script_operand()?);
        }
        args.push(self.multiplicative_expr(false)?);
        Ok(Node::nary_grouped(Op::Lim, args))
    }

    /// `\overline{…}`
    fn overline_expr(&mut self) -> ParseResult<Node> {
        self.next()?;
        let arg = self.primary_expr()?;
        Ok(Node::unary(Op::Overline, arg))
    }

    /// `\dot{3}` and the spanning form `\dot{3}45\dot{6}`
    ///
    /// Concatenates every digit between the two dots into one OVERLINE'd
    /// numeric lexeme.
    fn dot_expr(&mut self) -> ParseResult<Node> {
        self.next()?;
        let first = self.primary_expr()?;
        let mut digits = leaf_digits(&first).ok_or_else(|| {
            self.err(ErrorCode::ExpectedFound, &["a digit", "'\\dot'"])
        })?;
        if self.hd() == TokenKind::Num {
            digits.push_str(self.lexeme());
            self.next()?;
            if self.hd() == TokenKind::DotAccent {
                self.next()?;
                let last = self.primary_expr()?;
                let tail = leaf_digits(&last).ok_or_else(|| {
                    self.err(ErrorCode::ExpectedFound, &["a digit", "'\\dot'"])
                })?;
                digits.push_str(&tail);
            }
        }
        Ok(Node::unary(Op::Overline, Node::num(digits)))
    }

    /// `\vec{…}`, `\mathbf{…}`
    fn decorated(&mut self, op: Op) -> ParseResult<Node> {
        self.next()?;
        let arg = self.primary_expr()?;
        Ok(Node::unary(op, arg))
    }

    /// `\overset{anno}{base}`: the annotation joins the base's args
    fn overset_expr(&mut self) -> ParseResult<Node> {
        self.next()?;
        let anno = self.brace_operand()?;
        self.expect(TokenKind::LeftBrace)?;
        let mut base = if self.is_bare_operator() {
            let leaf = Node::var(self.lexeme().to_string());
            self.next()?;
            leaf
        } else {
            self.comma_expr(true)?
        };
        self.expect(TokenKind::RightBrace)?;
        base.args.push(anno);
        Ok(base)
    }

    fn brace_operand(&mut self) -> ParseResult<Node> {
        if self.hd() != TokenKind::LeftBrace {
            let shown = self.lexeme().to_string();
            return Err(self.err(ErrorCode::MissingArgument, &[&shown]));
        }
        self.brace_expr()
    }

    fn is_bare_operator(&self) -> bool {
        matches!(
            self.hd(),
            TokenKind::Equal
                | TokenKind::Ne
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::Le
                | TokenKind::Ge
                | TokenKind::Approx
                | TokenKind::Sim
                | TokenKind::Cong
                | TokenKind::RightArrow
                | TokenKind::Add
                | TokenKind::Sub
                | TokenKind::Star
                | TokenKind::Cdot
                | TokenKind::Times
        )
    }

    /// `\Delta x` names the change in `x`
    fn delta_expr(&mut self) -> ParseResult<Node> {
        self.next()?;
        if self.hd() == TokenKind::Var {
            let name = format!("Delta_{}", self.lexeme());
            self.next()?;
            Ok(Node::var(name))
        } else {
            Ok(Node::var("\\Delta"))
        }
    }

    /// `\begin{matrix} … \end{matrix}` and the array/pmatrix family
    fn matrix_expr(&mut self) -> ParseResult<Node> {
        let name = self.lexeme().to_string();
        self.next()?;
        if name == "array" && self.hd() == TokenKind::LeftBrace {
            // column alignment string, structurally irrelevant here
            self.next()?;
            while !matches!(self.hd(), TokenKind::RightBrace | TokenKind::None) {
                self.next()?;
            }
            self.expect(TokenKind::RightBrace)?;
        }
        let mut rows = Vec::new();
        loop {
            let mut cells = vec![self.comma_expr(true)?];
            while self.hd() == TokenKind::NewCol {
                self.next()?;
                cells.push(self.comma_expr(true)?);
            }
            rows.push(Node::nary_grouped(Op::Row, cells));
            if self.hd() == TokenKind::NewRow {
                self.next()?;
            } else {
                break;
            }
        }
        if self.hd() != TokenKind::End {
            let shown = self.lexeme().to_string();
            return Err(self.err(ErrorCode::ExpectedFound, &["'\\end'", &shown]));
        }
        if self.lexeme() != name {
            let shown = self.lexeme().to_string();
            return Err(self.err(ErrorCode::ExpectedFound, &[&name, &shown]));
        }
        self.next()?;
        let node = Node::nary_grouped(Op::Matrix, rows);
        Ok(match name.as_str() {
            "pmatrix" => node.with_brackets(Delim::LParen, Delim::RParen),
            "bmatrix" => node.with_brackets(Delim::LBracket, Delim::RBracket),
            "vmatrix" => node.with_brackets(Delim::Pipe, Delim::Pipe),
            _ => node,
        })
    }
}

// ---- free helpers ----

fn is_e_notation_marker(lexeme: &str) -> bool {
    lexeme == "e" || lexeme == "E"
}

fn is_ten(node: &Node) -> bool {
    node.op == Op::Num && node.lexeme.as_deref() == Some("10")
}

fn is_math_symbol(node: &Node) -> bool {
    node.op == Op::Var
        && node
            .lexeme
            .as_deref()
            .map(|l| l.starts_with('\\'))
            .unwrap_or(false)
}

fn is_negative_one(node: &Node) -> bool {
    node.op == Op::Sub
        && node.args.len() == 1
        && node.args[0].op == Op::Num
        && node.args[0].lexeme.as_deref() == Some("1")
}

fn inverse_trig(op: Op) -> Op {
    match op {
        Op::Sin => Op::Arcsin,
        Op::Cos => Op::Arccos,
        Op::Tan => Op::Arctan,
        other => other,
    }
}

/// Compare two non-negative integer lexemes numerically
fn int_lexeme_lt(a: &str, b: &str) -> bool {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    (a.len(), a) < (b.len(), b)
}

fn is_proper_fraction(frac: &Node) -> bool {
    match (
        frac.args.first().and_then(|n| n.lexeme.as_deref()),
        frac.args.get(1).and_then(|n| n.lexeme.as_deref()),
    ) {
        (Some(p), Some(q)) => int_lexeme_lt(p, q),
        _ => false,
    }
}

/// The rightmost factor of a product (or the node itself)
fn rightmost(node: &Node) -> &Node {
    if node.op == Op::Mul {
        node.args.last().unwrap_or(node)
    } else {
        node
    }
}

/// Rebuild a product with its rightmost factor transformed
fn replace_rightmost(node: Node, f: impl FnOnce(Node) -> Node) -> Node {
    if node.op == Op::Mul && !node.args.is_empty() {
        let mut node = node;
        let last = node.args.pop().unwrap_or_else(Node::none);
        node.args.push(f(last));
        node
    } else {
        f(node)
    }
}

fn is_var_named(node: &Node, name: &str) -> bool {
    node.op == Op::Var && node.lexeme.as_deref() == Some(name)
}

/// Does the right spine end in an implicit `d<var>` pair?
///
/// Walks through MUL tails, FRAC numerators, ADD/SUB tails, and unary
/// function arguments.
fn has_dx(node: &Node) -> bool {
    match node.op {
        Op::Mul => {
            let n = node.args.len();
            if n >= 2 && is_var_named(&node.args[n - 2], "d") && node.args[n - 1].op == Op::Var {
                return true;
            }
            node.args.last().map(has_dx).unwrap_or(false)
        }
        Op::Frac | Op::Div => node.args.first().map(has_dx).unwrap_or(false),
        Op::Add | Op::Sub | Op::Pm => node.args.last().map(has_dx).unwrap_or(false),
        Op::Sin | Op::Cos | Op::Tan | Op::Sec | Op::Csc | Op::Cot | Op::Sinh | Op::Cosh
        | Op::Tanh | Op::Coth | Op::Arcsin | Op::Arccos | Op::Arctan | Op::Sqrt => {
            node.args.first().map(has_dx).unwrap_or(false)
        }
        Op::Log => node.args.get(1).map(has_dx).unwrap_or(false),
        _ => false,
    }
}

/// Remove exactly the trailing `d<var>` pair, returning the remainder and
/// the integration variable
fn strip_dx(node: Node) -> Option<(Node, Node)> {
    match node.op {
        Op::Mul => {
            let n = node.args.len();
            if n >= 2 && is_var_named(&node.args[n - 2], "d") && node.args[n - 1].op == Op::Var {
                let mut node = node;
                let var = node.args.pop()?;
                node.args.pop(); // the `d`
                let rest = match node.args.len() {
                    0 => Node::num("1"),
                    1 => node.args.pop()?,
                    _ => node,
                };
                return Some((rest, var));
            }
            let mut node = node;
            let last = node.args.pop()?;
            let (rest, var) = strip_dx(last)?;
            node.args.push(rest);
            Some((node, var))
        }
        Op::Frac | Op::Div => {
            let mut node = node;
            let denom = node.args.pop()?;
            let numer = node.args.pop()?;
            let (rest, var) = strip_dx(numer)?;
            node.args.push(rest);
            node.args.push(denom);
            Some((node, var))
        }
        Op::Add | Op::Sub | Op::Pm => {
            let mut node = node;
            let last = node.args.pop()?;
            let (rest, var) = strip_dx(last)?;
            node.args.push(rest);
            Some((node, var))
        }
        Op::Sin | Op::Cos | Op::Tan | Op::Sec | Op::Csc | Op::Cot | Op::Sinh | Op::Cosh
        | Op::Tanh | Op::Coth | Op::Arcsin | Op::Arccos | Op::Arctan | Op::Sqrt => {
            let mut node = node;
            let arg = node.args.pop()?;
            let (rest, var) = strip_dx(arg)?;
            node.args.push(rest);
            Some((node, var))
        }
        _ => None,
    }
}

fn reattach_tail(node: Node, trailing: Option<Node>) -> Node {
    match trailing {
        Some(var) => {
            let mut mul = Node::nary_grouped(Op::Mul, vec![node, Node::var("d"), var]);
            mul.flags.is_implicit = true;
            mul
        }
        None => node,
    }
}

fn leaf_digits(node: &Node) -> Option<String> {
    if node.op == Op::Num {
        node.lexeme.clone()
    } else {
        None
    }
}

/// A NUM-coefficient product of variable powers
fn is_polynomial_term(node: &Node) -> bool {
    if node.op != Op::Mul || node.args.len() < 2 {
        return false;
    }
    let mut args = node.args.iter();
    let first = match args.next() {
        Some(f) => f,
        None => return false,
    };
    if first.op != Op::Num {
        return false;
    }
    args.all(is_variable_power)
}

fn is_variable_power(node: &Node) -> bool {
    match node.op {
        Op::Var => true,
        Op::Pow => {
            node.args.len() == 2 && node.args[0].op == Op::Var && node.args[1].op == Op::Num
        }
        _ => false,
    }
}

fn is_polynomial_operand(node: &Node) -> bool {
    node.flags.is_polynomial_term
        || node.flags.is_polynomial
        || matches!(node.op, Op::Num | Op::Var)
        || is_variable_power(node)
}

/// At least one variable factor, so constant sums stay unflagged
fn has_variable_shape(node: &Node) -> bool {
    node.flags.is_polynomial_term || node.flags.is_polynomial || is_variable_power(node)
}

/// The shape checks behind derivative recognition

fn numerator_target(numer: &Node) -> Option<(Option<Node>, u32)> {
    // \frac{d}{dx}
    if is_var_named(numer, "d") {
        return Some((None, 1));
    }
    // \frac{d^n}{dx^n}
    if let Some(order) = d_power_order(numer) {
        return Some((None, order));
    }
    if numer.op == Op::Mul && numer.args.len() >= 2 {
        let head = &numer.args[0];
        let order = if is_var_named(head, "d") {
            Some(1)
        } else {
            d_power_order(head)
        }?;
        let rest: Vec<Node> = numer.args[1..].to_vec();
        let target = if rest.len() == 1 {
            rest.into_iter().next()
        } else {
            Some(Node::nary_grouped(Op::Mul, rest))
        };
        return Some((target, order));
    }
    None
}

fn d_power_order(node: &Node) -> Option<u32> {
    if node.op == Op::Pow
        && node.args.len() == 2
        && is_var_named(&node.args[0], "d")
        && node.args[1].op == Op::Num
    {
        node.args[1].lexeme.as_deref()?.parse().ok()
    } else {
        None
    }
}

fn denominator_var(denom: &Node) -> Option<(Node, u32)> {
    if denom.op != Op::Mul || denom.args.len() != 2 || !is_var_named(&denom.args[0], "d") {
        return None;
    }
    let tail = &denom.args[1];
    if tail.op == Op::Var {
        return Some((tail.clone(), 1));
    }
    if tail.op == Op::Pow
        && tail.args.len() == 2
        && tail.args[0].op == Op::Var
        && tail.args[1].op == Op::Num
    {
        let order: u32 = tail.args[1].lexeme.as_deref()?.parse().ok()?;
        return Some((tail.args[0].clone(), order));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::Parser;
    use crate::ast::{Node, Op};
    use crate::env::Environment;
    use crate::error::ErrorCode;
    use crate::options::Options;

    fn parse(src: &str) -> Node {
        let env = Environment::new();
        let mut parser = Parser::new(Options::default(), src, &env).unwrap();
        parser.expr().unwrap()
    }

    #[test]
    fn empty_input_is_none() {
        assert_eq!(parse(""), Node::none());
        assert_eq!(parse("   "), Node::none());
    }

    #[test]
    fn addition_flattens() {
        let node = parse("1 + 2 + 3");
        assert_eq!(node.op, Op::Add);
        assert_eq!(node.args.len(), 3);
    }

    #[test]
    fn compare_grouping_keeps_pairs() {
        let env = Environment::new();
        let opts = Options {
            compare_grouping: true,
            ..Options::default()
        };
        let mut parser = Parser::new(opts, "1 + 2 + 3", &env).unwrap();
        let node = parser.expr().unwrap();
        assert_eq!(node.args.len(), 2);
        assert_eq!(node.args[0].op, Op::Add);
    }

    #[test]
    fn subtraction_stays_binary() {
        let node = parse("1 - 2 - 3");
        assert_eq!(node.op, Op::Sub);
        assert_eq!(node.args.len(), 2);
        assert_eq!(node.args[0].op, Op::Sub);
    }

    #[test]
    fn two_numbers_need_an_operator() {
        let env = Environment::new();
        let mut parser = Parser::new(Options::default(), "2 3", &env).unwrap();
        assert_eq!(
            parser.expr().unwrap_err().code,
            ErrorCode::NumbersWithoutOperator
        );
    }

    #[test]
    fn extra_input_is_fatal() {
        let env = Environment::new();
        let mut parser = Parser::new(Options::default(), "1 )", &env).unwrap();
        assert_eq!(parser.expr().unwrap_err().code, ErrorCode::ExtraInput);
    }

    #[test]
    fn exponents_are_right_associative() {
        let node = parse("a^b^c");
        assert_eq!(node.op, Op::Pow);
        assert_eq!(node.args[0].op, Op::Var);
        assert_eq!(node.args[1].op, Op::Pow);
    }

    #[test]
    fn subscript_commutes_with_power() {
        let lhs = parse("x^2_1");
        let rhs = parse("x_1^2");
        assert_eq!(lhs, rhs);
        assert_eq!(lhs.op, Op::Pow);
        assert_eq!(lhs.args[0].op, Op::Subscript);
    }

    #[test]
    fn subscript_on_number_is_misplaced() {
        let env = Environment::new();
        let mut parser = Parser::new(Options::default(), "1_2", &env).unwrap();
        assert_eq!(
            parser.expr().unwrap_err().code,
            ErrorCode::MisplacedSubscript
        );
    }

    #[test]
    fn not_folds_into_relation() {
        let node = parse(r"a \not< b");
        assert_eq!(node.op, Op::Nless);
    }

    #[test]
    fn ratio_chain_flattens() {
        let node = parse("a : b : c");
        assert_eq!(node.op, Op::Colon);
        assert_eq!(node.args.len(), 3);
    }

    #[test]
    fn chained_relations_share_no_structure() {
        let mut node = parse("a < b < c");
        assert_eq!(node.op, Op::Comma);
        assert_eq!(node.args.len(), 2);
        // mutate the copy; the original must be unaffected
        let first_rhs = &mut node.args[0].args[1];
        first_rhs.lexeme = Some("mutated".to_string());
        assert_eq!(node.args[1].args[0].lexeme.as_deref(), Some("b"));
    }

    #[test]
    fn integral_flag_restores_after_error() {
        let env = Environment::new();
        let mut parser = Parser::new(Options::default(), r"\int x", &env).unwrap();
        assert_eq!(
            parser.expr().unwrap_err().code,
            ErrorCode::MissingIntegrationVariable
        );
        assert!(!parser.in_integral);
    }

    #[test]
    fn set_operands_wrap() {
        let node = parse(r"\{1\} \cup \{2\}");
        assert_eq!(node.op, Op::Cup);
        assert_eq!(node.args[0].op, Op::Set);
        assert_eq!(node.args[1].op, Op::Set);
    }

    #[test]
    fn evaluation_bar() {
        let node = parse("x|_2");
        assert_eq!(node.op, Op::Pipe);
        assert_eq!(node.args[1].lexeme.as_deref(), Some("2"));
    }

    #[test]
    fn pipe_is_not_always_a_bar() {
        let node = parse("|x|");
        assert_eq!(node.op, Op::Abs);
    }
}
