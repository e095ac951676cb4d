//! The lexer
//!
//! A single-pass character cursor producing one token per call. The scanner
//! owns Unicode→LaTeX normalization, control-sequence lookup, separator-aware
//! number scanning, and environment-driven greedy identifier matching; the
//! parser layers one-token lookahead (and a pushback slot) on top.

use crate::ast::NumberFormat;
use crate::env::Environment;
use crate::error::{ErrorCode, ParseResult, SyntaxError};
use crate::options::Options;
use fnv::FnvHashMap;
use lazy_static::lazy_static;

/// Token labels produced by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TokenKind {
    /// End of source
    None,
    Num,
    Var,
    Text,
    // ASCII operators and fusions
    Add,
    Sub,
    Star,
    Slash,
    Caret,
    Underscore,
    Bang,
    Percent,
    Comma,
    Semicolon,
    Colon,
    Equal,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
    RightArrow,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    VerticalBar,
    NewCol,
    /// `\\`
    NewRow,
    /// `\{`
    LeftBraceSet,
    /// `\}`
    RightBraceSet,
    /// `\|`
    DoubleVerticalBar,
    /// The `.` delimiter of `\left.`/`\right.`
    Period,
    // control words
    Frac,
    Sqrt,
    Cdot,
    Times,
    Div,
    Pm,
    Approx,
    Implies,
    Iff,
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
    Ln,
    Lg,
    Int,
    IInt,
    IIInt,
    Sum,
    Prod,
    Lim,
    Cup,
    Cap,
    BigCup,
    BigCap,
    Setminus,
    Backslash,
    Left,
    Right,
    Begin,
    End,
    Overline,
    DotAccent,
    VecCmd,
    Mathbf,
    Overset,
    Underset,
    Not,
    In,
    NotIn,
    Ni,
    Perp,
    Propto,
    Subset,
    Subseteq,
    Supset,
    Supseteq,
    Parallel,
    Nparallel,
    Sim,
    Cong,
    Ngtr,
    Nless,
    Exists,
    Forall,
    Circ,
    Langle,
    Rangle,
    Delta,
}

impl TokenKind {
    /// Short description for diagnostics
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::None => "end of input",
            TokenKind::Num => "a number",
            TokenKind::Var => "an identifier",
            TokenKind::Text => "text",
            TokenKind::RightParen => "')'",
            TokenKind::RightBracket => "']'",
            TokenKind::RightBrace => "'}'",
            TokenKind::Rangle => "'\\rangle'",
            TokenKind::VerticalBar => "'|'",
            TokenKind::Right => "'\\right'",
            TokenKind::End => "'\\end'",
            TokenKind::LeftBrace => "'{'",
            TokenKind::Underscore => "'_'",
            _ => "a token",
        }
    }
}

macro_rules! lexemes {
    ($($kind:ident => $($lex:expr),+;)+) => {
        [
            $(
                $(
                    ($lex, TokenKind::$kind),
                )+
            )+
        ]
    };
}

/// The LaTeX control-word lexicon
///
/// Exported as data so alternate front ends can verify which spellings map
/// to which tokens. Control words that alias (`\le`/`\leq`) share a kind;
/// words absent from this table scan as VAR.
pub const LATEX_LEXEMES: &[(&str, TokenKind)] = &lexemes!(
    Frac => "\\frac", "\\dfrac", "\\tfrac";
    Sqrt => "\\sqrt";
    Cdot => "\\cdot", "\\ast";
    Times => "\\times";
    Div => "\\div";
    Pm => "\\pm", "\\mp";
    Ne => "\\ne", "\\neq";
    Le => "\\le", "\\leq";
    Ge => "\\ge", "\\geq";
    Approx => "\\approx", "\\thickapprox";
    RightArrow => "\\rightarrow", "\\to", "\\longrightarrow";
    Implies => "\\Rightarrow", "\\implies", "\\Longrightarrow";
    Iff => "\\Leftrightarrow", "\\iff";
    Sin => "\\sin"; Cos => "\\cos"; Tan => "\\tan";
    Sec => "\\sec"; Csc => "\\csc", "\\cosec"; Cot => "\\cot";
    Sinh => "\\sinh"; Cosh => "\\cosh"; Tanh => "\\tanh"; Coth => "\\coth";
    Arcsin => "\\arcsin"; Arccos => "\\arccos"; Arctan => "\\arctan";
    Log => "\\log"; Ln => "\\ln"; Lg => "\\lg";
    Int => "\\int"; IInt => "\\iint"; IIInt => "\\iiint";
    Sum => "\\sum"; Prod => "\\prod"; Lim => "\\lim";
    Cup => "\\cup"; Cap => "\\cap";
    BigCup => "\\bigcup"; BigCap => "\\bigcap";
    Setminus => "\\setminus";
    Backslash => "\\backslash";
    Left => "\\left"; Right => "\\right";
    Begin => "\\begin"; End => "\\end";
    Overline => "\\overline";
    DotAccent => "\\dot";
    VecCmd => "\\vec";
    Mathbf => "\\mathbf", "\\boldsymbol";
    Overset => "\\overset"; Underset => "\\underset";
    Not => "\\not", "\\neg";
    In => "\\in"; NotIn => "\\notin"; Ni => "\\ni";
    Perp => "\\perp"; Propto => "\\propto";
    Subset => "\\subset"; Subseteq => "\\subseteq";
    Supset => "\\supset"; Supseteq => "\\supseteq";
    Parallel => "\\parallel"; Nparallel => "\\nparallel";
    Sim => "\\sim"; Cong => "\\cong";
    Ngtr => "\\ngtr"; Nless => "\\nless";
    Exists => "\\exists"; Forall => "\\forall";
    Circ => "\\circ";
    Langle => "\\langle"; Rangle => "\\rangle";
    Delta => "\\Delta";
);

lazy_static! {
    static ref LEXEME_TABLE: FnvHashMap<&'static str, TokenKind> =
        LATEX_LEXEMES.iter().copied().collect();
}

/// Control words that scan as whitespace
const SPACING_WORDS: &[&str] = &["big", "Big", "bigg", "Bigg", "quad", "qquad"];

/// Control words whose braced argument becomes a TEXT lexeme
const TEXT_WORDS: &[&str] = &["text", "textrm", "textit", "textbf", "operatorname", "mbox"];

/// One scanned token
#[derive(Debug, Clone, PartialEq)]
pub struct Tok {
    /// Token label
    pub kind: TokenKind,
    /// The token's lexeme
    pub lexeme: String,
    /// Integer or decimal (NUM only)
    pub number_format: Option<NumberFormat>,
    /// Separator characters consumed while scanning (NUM only)
    pub separator_count: u16,
    /// Offset just past the last separator in the canonical lexeme (NUM only)
    pub last_separator_index: Option<u16>,
}

impl Tok {
    fn new(kind: TokenKind, lexeme: impl Into<String>) -> Self {
        Tok {
            kind,
            lexeme: lexeme.into(),
            number_format: None,
            separator_count: 0,
            last_separator_index: None,
        }
    }

    fn eos() -> Self {
        Tok::new(TokenKind::None, "")
    }
}

/// Collapse control-character runs to a tab
///
/// The character immediately following a backslash survives untouched so
/// control sequences are not corrupted.
pub fn strip_invisible(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut after_backslash = false;
    let mut in_run = false;
    for c in src.chars() {
        if c.is_control() && c != '\t' && !after_backslash {
            if !in_run {
                out.push('\t');
                in_run = true;
            }
            continue;
        }
        in_run = false;
        after_backslash = c == '\\' && !after_backslash;
        out.push(c);
    }
    out
}

fn unicode_lexeme(c: char) -> Option<&'static str> {
    Some(match c {
        '\u{2212}' => "-",
        '\u{2215}' => "/",
        '\u{2217}' => "*",
        '\u{2236}' => ":",
        '\u{2260}' => "\\ne",
        '\u{2264}' => "\\le",
        '\u{2265}' => "\\ge",
        '\u{00B1}' => "\\pm",
        '\u{2213}' => "\\mp",
        '\u{00D7}' => "\\times",
        '\u{00F7}' => "\\div",
        '\u{22C5}' => "\\cdot",
        '\u{2248}' => "\\approx",
        '\u{2192}' => "\\rightarrow",
        '\u{21D2}' => "\\Rightarrow",
        '\u{21D4}' => "\\Leftrightarrow",
        '\u{27F7}' => "\\leftrightarrow",
        '\u{2208}' => "\\in",
        '\u{2209}' => "\\notin",
        '\u{220B}' => "\\ni",
        '\u{2282}' => "\\subset",
        '\u{2286}' => "\\subseteq",
        '\u{2283}' => "\\supset",
        '\u{2287}' => "\\supseteq",
        '\u{222A}' => "\\cup",
        '\u{2229}' => "\\cap",
        '\u{2216}' => "\\setminus",
        '\u{223C}' => "\\sim",
        '\u{2245}' => "\\cong",
        '\u{221D}' => "\\propto",
        '\u{22A5}' => "\\perp",
        '\u{2225}' => "\\parallel",
        '\u{2226}' => "\\nparallel",
        '\u{221E}' => "\\infty",
        '\u{2211}' => "\\sum",
        '\u{220F}' => "\\prod",
        '\u{222B}' => "\\int",
        '\u{221A}' => "\\sqrt",
        '\u{2205}' => "\\varnothing",
        '\u{2200}' => "\\forall",
        '\u{2203}' => "\\exists",
        '\u{00AC}' => "\\not",
        '\u{00B0}' => "\\degree",
        '\u{00A2}' => "\\cent",
        '\u{27E8}' => "\\langle",
        '\u{27E9}' => "\\rangle",
        // greek
        '\u{0391}' => "\\Alpha",
        '\u{0392}' => "\\Beta",
        '\u{0393}' => "\\Gamma",
        '\u{0394}' => "\\Delta",
        '\u{0395}' => "\\Epsilon",
        '\u{0396}' => "\\Zeta",
        '\u{0397}' => "\\Eta",
        '\u{0398}' => "\\Theta",
        '\u{0399}' => "\\Iota",
        '\u{039A}' => "\\Kappa",
        '\u{039B}' => "\\Lambda",
        '\u{039C}' => "\\Mu",
        '\u{039D}' => "\\Nu",
        '\u{039E}' => "\\Xi",
        '\u{03A0}' => "\\Pi",
        '\u{03A1}' => "\\Rho",
        '\u{03A3}' => "\\Sigma",
        '\u{03A4}' => "\\Tau",
        '\u{03A5}' => "\\Upsilon",
        '\u{03A6}' => "\\Phi",
        '\u{03A7}' => "\\Chi",
        '\u{03A8}' => "\\Psi",
        '\u{03A9}' => "\\Omega",
        '\u{03B1}' => "\\alpha",
        '\u{03B2}' => "\\beta",
        '\u{03B3}' => "\\gamma",
        '\u{03B4}' => "\\delta",
        '\u{03B5}' => "\\epsilon",
        '\u{03B6}' => "\\zeta",
        '\u{03B7}' => "\\eta",
        '\u{03B8}' => "\\theta",
        '\u{03B9}' => "\\iota",
        '\u{03BA}' => "\\kappa",
        '\u{03BB}' => "\\lambda",
        '\u{03BC}' => "\\mu",
        '\u{03BD}' => "\\nu",
        '\u{03BE}' => "\\xi",
        '\u{03C0}' => "\\pi",
        '\u{03C1}' => "\\rho",
        '\u{03C3}' => "\\sigma",
        '\u{03C4}' => "\\tau",
        '\u{03C5}' => "\\upsilon",
        '\u{03C6}' => "\\varphi",
        '\u{03C7}' => "\\chi",
        '\u{03C8}' => "\\psi",
        '\u{03C9}' => "\\omega",
        '\u{03D5}' => "\\phi",
        '\u{03F5}' => "\\epsilon",
        // U+D835 U+DEC6 in the source encoding
        '\u{1D6C6}' => "\\epsilon",
        _ => return None,
    })
}

fn is_space(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t' | '\n' | '\r' | '\u{00A0}' | '\u{200B}'
    )
}

/// The character cursor
pub struct Scanner<'e> {
    chars: Vec<char>,
    src: String,
    pos: usize,
    opts: Options,
    env: &'e Environment,
    // one thousands-separator character per input
    last_thousands_sep: Option<char>,
}

impl<'e> Scanner<'e> {
    /// Create a scanner over a source string
    pub fn new(src: &str, opts: Options, env: &'e Environment) -> Self {
        let normalized = strip_invisible(src);
        Scanner {
            chars: normalized.chars().collect(),
            src: normalized,
            pos: 0,
            opts,
            env,
            last_thousands_sep: None,
        }
    }

    /// The normalized source, for error reporting
    pub fn src(&self) -> &str {
        &self.src
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<char> {
        self.chars.get(self.pos + off).copied()
    }

    fn err(&self, code: ErrorCode, args: &[&str]) -> SyntaxError {
        SyntaxError::new(code, args, &self.src)
    }

    fn matches_literal(&self, lit: &str) -> bool {
        lit.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    /// Produce the next token
    ///
    /// `one_char` restricts digit scanning to a single character, which the
    /// parser sets after `^` and `_` to honor the single-character-scope
    /// convention.
    pub fn start(&mut self, one_char: bool) -> ParseResult<Tok> {
        loop {
            // whitespace and &nbsp;
            while let Some(c) = self.peek() {
                if is_space(c) {
                    self.pos += 1;
                } else if c == '&' && self.matches_literal("&nbsp;") {
                    self.pos += 6;
                } else {
                    break;
                }
            }
            let Some(c) = self.peek() else {
                return Ok(Tok::eos());
            };
            match c {
                '\\' => {
                    self.pos += 1;
                    if let Some(tok) = self.control_sequence()? {
                        return Ok(self.maybe_extend_identifier(tok));
                    }
                    // spacing command, go around again
                }
                '0'..='9' | '.' => return self.scan_number(one_char),
                '\'' => {
                    let mut primes = String::new();
                    while self.peek() == Some('\'') {
                        primes.push('\'');
                        self.pos += 1;
                    }
                    return Ok(Tok::new(TokenKind::Var, primes));
                }
                'a'..='z' | 'A'..='Z' => {
                    self.pos += 1;
                    let tok = Tok::new(TokenKind::Var, c.to_string());
                    return Ok(self.maybe_extend_identifier(tok));
                }
                '+' => return Ok(self.single(TokenKind::Add, c)),
                '-' => {
                    self.pos += 1;
                    if self.peek() == Some('>') {
                        self.pos += 1;
                        return Ok(Tok::new(TokenKind::RightArrow, "->"));
                    }
                    return Ok(Tok::new(TokenKind::Sub, "-"));
                }
                '*' => {
                    self.pos += 1;
                    if self.peek() == Some('*') {
                        self.pos += 1;
                        return Ok(Tok::new(TokenKind::Caret, "**"));
                    }
                    return Ok(Tok::new(TokenKind::Star, "*"));
                }
                '!' => {
                    self.pos += 1;
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        return Ok(Tok::new(TokenKind::Ne, "!="));
                    }
                    return Ok(Tok::new(TokenKind::Bang, "!"));
                }
                '<' => {
                    self.pos += 1;
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        return Ok(Tok::new(TokenKind::Le, "<="));
                    }
                    return Ok(Tok::new(TokenKind::Lt, "<"));
                }
                '>' => {
                    self.pos += 1;
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        return Ok(Tok::new(TokenKind::Ge, ">="));
                    }
                    return Ok(Tok::new(TokenKind::Gt, ">"));
                }
                '/' => return Ok(self.single(TokenKind::Slash, c)),
                '^' => return Ok(self.single(TokenKind::Caret, c)),
                '_' => return Ok(self.single(TokenKind::Underscore, c)),
                '%' => return Ok(self.single(TokenKind::Percent, c)),
                ',' => return Ok(self.single(TokenKind::Comma, c)),
                ';' => return Ok(self.single(TokenKind::Semicolon, c)),
                ':' => return Ok(self.single(TokenKind::Colon, c)),
                '=' => return Ok(self.single(TokenKind::Equal, c)),
                '(' => return Ok(self.single(TokenKind::LeftParen, c)),
                ')' => return Ok(self.single(TokenKind::RightParen, c)),
                '[' => return Ok(self.single(TokenKind::LeftBracket, c)),
                ']' => return Ok(self.single(TokenKind::RightBracket, c)),
                '{' => return Ok(self.single(TokenKind::LeftBrace, c)),
                '}' => return Ok(self.single(TokenKind::RightBrace, c)),
                '|' => return Ok(self.single(TokenKind::VerticalBar, c)),
                '&' => return Ok(self.single(TokenKind::NewCol, c)),
                _ => {
                    if let Some(lexeme) = unicode_lexeme(c) {
                        self.pos += 1;
                        let tok = self.translated(lexeme)?;
                        match tok {
                            Some(tok) => return Ok(self.maybe_extend_identifier(tok)),
                            // `¬` alone is whitespace-like only if spacing;
                            // translated() never yields None today, but the
                            // loop keeps the contract uniform
                            None => continue,
                        }
                    }
                    return Err(self.err(ErrorCode::InvalidCharacter, &[&c.to_string()]));
                }
            }
        }
    }

    /// The next token when a `\left`/`\right` delimiter is legal
    ///
    /// Identical to [`Scanner::start`] except that a bare `.` is the null
    /// delimiter rather than the start of a number.
    pub fn start_delimiter(&mut self) -> ParseResult<Tok> {
        while let Some(c) = self.peek() {
            if is_space(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            return Ok(Tok::new(TokenKind::Period, "."));
        }
        self.start(false)
    }

    fn single(&mut self, kind: TokenKind, c: char) -> Tok {
        self.pos += 1;
        Tok::new(kind, c.to_string())
    }

    /// Map a Unicode translation onto the regular token paths
    fn translated(&mut self, lexeme: &'static str) -> ParseResult<Option<Tok>> {
        if let Some(word) = lexeme.strip_prefix('\\') {
            self.control_word(word)
        } else {
            Ok(Some(match lexeme {
                "-" => Tok::new(TokenKind::Sub, "-"),
                "/" => Tok::new(TokenKind::Slash, "/"),
                "*" => Tok::new(TokenKind::Star, "*"),
                ":" => Tok::new(TokenKind::Colon, ":"),
                _ => return Err(self.err(ErrorCode::Internal, &[lexeme])),
            }))
        }
    }

    /// Handle the character(s) after a consumed `\`
    ///
    /// Returns `None` when the sequence is whitespace and scanning should
    /// continue.
    fn control_sequence(&mut self) -> ParseResult<Option<Tok>> {
        let Some(c) = self.peek() else {
            return Err(self.err(ErrorCode::InvalidCharacter, &["\\"]));
        };
        if c.is_ascii_alphabetic() {
            let mut word = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_alphabetic() {
                    word.push(c);
                    self.pos += 1;
                } else {
                    break;
                }
            }
            self.control_word(&word)
        } else {
            self.pos += 1;
            match c {
                '\\' => Ok(Some(Tok::new(TokenKind::NewRow, "\\\\"))),
                '{' => Ok(Some(Tok::new(TokenKind::LeftBraceSet, "\\{"))),
                '}' => Ok(Some(Tok::new(TokenKind::RightBraceSet, "\\}"))),
                '|' => Ok(Some(Tok::new(TokenKind::DoubleVerticalBar, "\\|"))),
                ' ' | ',' | ';' | ':' | '!' => Ok(None),
                _ => Err(self.err(
                    ErrorCode::InvalidCharacter,
                    &[&format!("\\{c}")],
                )),
            }
        }
    }

    fn control_word(&mut self, word: &str) -> ParseResult<Option<Tok>> {
        if SPACING_WORDS.contains(&word) {
            return Ok(None);
        }
        if TEXT_WORDS.contains(&word) {
            let content = self.braced_group(word)?;
            if self.opts.ignore_text {
                return Ok(None);
            }
            let content = if self.opts.keep_text_whitespace {
                content
            } else {
                content.split_whitespace().collect::<Vec<_>>().join(" ")
            };
            return Ok(Some(Tok::new(TokenKind::Text, content)));
        }
        match word {
            "begin" => {
                let name = self.braced_group(word)?;
                return Ok(Some(Tok::new(TokenKind::Begin, name.trim())));
            }
            "end" => {
                let name = self.braced_group(word)?;
                return Ok(Some(Tok::new(TokenKind::End, name.trim())));
            }
            "varepsilon" => return Ok(Some(Tok::new(TokenKind::Var, "\\epsilon"))),
            "emptyset" => return Ok(Some(Tok::new(TokenKind::Var, "\\varnothing"))),
            "infty" => {
                let mut tok = Tok::new(TokenKind::Num, "\\infty");
                tok.number_format = Some(NumberFormat::Integer);
                return Ok(Some(tok));
            }
            _ => {}
        }
        let spelled = format!("\\{word}");
        match LEXEME_TABLE.get(spelled.as_str()) {
            Some(&kind) => Ok(Some(Tok::new(kind, spelled))),
            // unknown control sequences are identifiers
            None => Ok(Some(Tok::new(TokenKind::Var, spelled))),
        }
    }

    /// Read a `{…}`-delimited group, consuming the braces
    fn braced_group(&mut self, command: &str) -> ParseResult<String> {
        while let Some(c) = self.peek() {
            if is_space(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.peek() != Some('{') {
            return Err(self.err(ErrorCode::MissingArgument, &[&format!("\\{command}")]));
        }
        self.pos += 1;
        let mut depth = 1usize;
        let mut content = String::new();
        for c in self.chars[self.pos..].iter().copied() {
            self.pos += 1;
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(content);
                    }
                }
                _ => {}
            }
            content.push(c);
        }
        Err(self.err(ErrorCode::MissingArgument, &[&format!("\\{command}")]))
    }

    /// Grow a VAR lexeme while it remains a prefix of an environment key
    ///
    /// Backtracks to the longest exact match, or to the original token when
    /// no declared identifier is completed.
    fn maybe_extend_identifier(&mut self, tok: Tok) -> Tok {
        if tok.kind != TokenKind::Var || self.env.is_empty() {
            return tok;
        }
        if !self.env.has_prefix(&tok.lexeme) {
            return tok;
        }
        let origin = self.pos;
        let mut candidate = tok.lexeme.clone();
        let mut best: Option<(String, usize)> = if self.env.contains(&candidate) {
            Some((candidate.clone(), self.pos))
        } else {
            None
        };
        while let Some(c) = self.peek() {
            let mut grown = candidate.clone();
            grown.push(c);
            if !self.env.has_prefix(&grown) {
                break;
            }
            self.pos += 1;
            candidate = grown;
            if self.env.contains(&candidate) {
                best = Some((candidate.clone(), self.pos));
            }
        }
        match best {
            Some((lexeme, end)) => {
                self.pos = end;
                Tok::new(TokenKind::Var, lexeme)
            }
            None => {
                self.pos = origin;
                tok
            }
        }
    }

    /// True when exactly three digits follow offset `off`, ending a group
    fn three_digit_group_at(&self, off: usize) -> bool {
        (0..3).all(|i| matches!(self.peek_at(off + i), Some('0'..='9')))
            && !matches!(self.peek_at(off + 3), Some('0'..='9'))
    }

    fn note_thousands_sep(&mut self, sep: char) -> ParseResult<()> {
        match self.last_thousands_sep {
            Some(prev) if prev != sep => Err(self.err(
                ErrorCode::MismatchedThousandsSeparators,
                &[&prev.to_string(), &sep.to_string()],
            )),
            _ => {
                self.last_thousands_sep = Some(sep);
                Ok(())
            }
        }
    }

    fn scan_number(&mut self, one_char: bool) -> ParseResult<Tok> {
        if one_char {
            if let Some(c @ '0'..='9') = self.peek() {
                self.pos += 1;
                let mut tok = Tok::new(TokenKind::Num, c.to_string());
                tok.number_format = Some(NumberFormat::Integer);
                return Ok(tok);
            }
        }
        let thousands: Vec<char> = self.opts.thousands_separators().to_vec();
        let decimals: Vec<char> = self.opts.decimal_separators().to_vec();
        let mut canonical = String::new();
        let mut raw = String::new();
        let mut seen_decimal = false;
        let mut sep_count: u16 = 0;
        let mut last_sep: Option<u16> = None;
        let mut group_digits: u32 = 0;
        let mut had_thousands = false;
        let mut explicit_thousands = false;

        // leading decimal point: `.5`, `.\overline{3}`, `.\dot{3}`
        if self.peek() == Some('.') && decimals.contains(&'.') {
            self.pos += 1;
            raw.push('.');
            canonical.push_str("0.");
            seen_decimal = true;
            sep_count += 1;
            last_sep = Some(canonical.len() as u16);
            match self.peek() {
                Some('0'..='9') => {}
                _ if self.matches_literal("\\overline") || self.matches_literal("\\dot") => {
                    let mut tok = Tok::new(TokenKind::Num, canonical);
                    tok.number_format = Some(NumberFormat::Decimal);
                    tok.separator_count = sep_count;
                    tok.last_separator_index = last_sep;
                    return Ok(tok);
                }
                other => {
                    let shown = other.map(|c| c.to_string()).unwrap_or_default();
                    return Err(self.err(ErrorCode::NumberCharacter, &[&shown]));
                }
            }
        }

        loop {
            let Some(c) = self.peek() else { break };
            match c {
                '0'..='9' => {
                    self.pos += 1;
                    canonical.push(c);
                    raw.push(c);
                    if !seen_decimal {
                        group_digits += 1;
                    }
                }
                // braced separator: 1{,}234
                '{' if !seen_decimal
                    && self
                        .peek_at(1)
                        .map(|t| thousands.contains(&t))
                        .unwrap_or(false)
                    && self.peek_at(2) == Some('}') =>
                {
                    let sep = self.peek_at(1).unwrap_or_default();
                    if had_thousands && group_digits != 3 {
                        return Err(self.err(ErrorCode::MisplacedThousandsSeparator, &[]));
                    }
                    if !had_thousands && !(1..=3).contains(&group_digits) {
                        return Err(self.err(ErrorCode::MisplacedThousandsSeparator, &[]));
                    }
                    self.note_thousands_sep(sep)?;
                    self.pos += 3;
                    raw.push(sep);
                    sep_count += 1;
                    last_sep = Some(canonical.len() as u16);
                    group_digits = 0;
                    had_thousands = true;
                    explicit_thousands = true;
                }
                // explicit space separator: 1\ 234
                '\\' if !seen_decimal
                    && thousands.contains(&' ')
                    && self.peek_at(1) == Some(' ')
                    && self.three_digit_group_at(2) =>
                {
                    if had_thousands && group_digits != 3 {
                        return Err(self.err(ErrorCode::MisplacedThousandsSeparator, &[]));
                    }
                    if !had_thousands && !(1..=3).contains(&group_digits) {
                        return Err(self.err(ErrorCode::MisplacedThousandsSeparator, &[]));
                    }
                    self.note_thousands_sep(' ')?;
                    self.pos += 2;
                    raw.push(' ');
                    sep_count += 1;
                    last_sep = Some(canonical.len() as u16);
                    group_digits = 0;
                    had_thousands = true;
                    explicit_thousands = true;
                }
                _ if thousands.contains(&c) && !seen_decimal && !canonical.is_empty() => {
                    // bare separator, only when an unambiguous group follows
                    if !self.three_digit_group_at(1) {
                        break;
                    }
                    if had_thousands && group_digits != 3 {
                        return Err(self.err(ErrorCode::MisplacedThousandsSeparator, &[]));
                    }
                    if !had_thousands && !(1..=3).contains(&group_digits) {
                        return Err(self.err(ErrorCode::MisplacedThousandsSeparator, &[]));
                    }
                    self.note_thousands_sep(c)?;
                    self.pos += 1;
                    raw.push(c);
                    sep_count += 1;
                    last_sep = Some(canonical.len() as u16);
                    group_digits = 0;
                    had_thousands = true;
                }
                _ if decimals.contains(&c) => {
                    if seen_decimal {
                        if canonical.ends_with('.') {
                            return Err(self.err(
                                ErrorCode::DecimalSeparator,
                                &[&c.to_string()],
                            ));
                        }
                        break;
                    }
                    if canonical.is_empty() {
                        // non-'.' decimal separator leading a number
                        canonical.push('0');
                    }
                    if had_thousands && group_digits != 3 {
                        return Err(self.err(ErrorCode::MisplacedThousandsSeparator, &[]));
                    }
                    self.pos += 1;
                    canonical.push('.');
                    raw.push(c);
                    seen_decimal = true;
                    sep_count += 1;
                    last_sep = Some(canonical.len() as u16);
                }
                _ => break,
            }
        }
        if explicit_thousands && !seen_decimal && group_digits != 3 {
            return Err(self.err(ErrorCode::MisplacedThousandsSeparator, &[]));
        }
        if !seen_decimal && canonical.is_empty() {
            return Err(self.err(ErrorCode::NumberCharacter, &[""]));
        }
        if let (Some(places), true, false) = (self.opts.decimal_places, seen_decimal, self.opts.strict)
        {
            canonical = round_decimal(&canonical, places);
        }
        let mut tok = Tok::new(
            TokenKind::Num,
            if self.opts.strict { raw } else { canonical },
        );
        tok.number_format = Some(if seen_decimal {
            NumberFormat::Decimal
        } else {
            NumberFormat::Integer
        });
        tok.separator_count = sep_count;
        tok.last_separator_index = last_sep;
        Ok(tok)
    }
}

/// Round a canonical decimal string half-up to `places` fractional digits
fn round_decimal(canonical: &str, places: u8) -> String {
    let places = places as usize;
    let Some(dot) = canonical.find('.') else {
        return canonical.to_string();
    };
    let frac = &canonical[dot + 1..];
    if frac.len() <= places {
        return canonical.to_string();
    }
    let mut digits: Vec<u8> = canonical[..dot]
        .bytes()
        .chain(frac.bytes())
        .map(|b| b - b'0')
        .collect();
    let int_len = dot;
    let keep = int_len + places;
    let round_up = digits[keep] >= 5;
    digits.truncate(keep);
    if round_up {
        let mut i = keep;
        loop {
            if i == 0 {
                digits.insert(0, 1);
                break;
            }
            i -= 1;
            if digits[i] == 9 {
                digits[i] = 0;
            } else {
                digits[i] += 1;
                break;
            }
        }
    }
    let int_len = digits.len() - places;
    let mut out = String::with_capacity(digits.len() + 1);
    for (i, d) in digits.iter().enumerate() {
        if i == int_len {
            out.push('.');
        }
        out.push((b'0' + d) as char);
    }
    if out.contains('.') {
        while out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
    }
    if out.is_empty() || out.starts_with('.') {
        out.insert(0, '0');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{strip_invisible, Scanner, Tok, TokenKind};
    use crate::ast::NumberFormat;
    use crate::env::{Environment, Symbol, SymbolKind};
    use crate::error::ErrorCode;
    use crate::options::Options;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        let env = Environment::new();
        let mut scan = Scanner::new(src, Options::default(), &env);
        let mut out = Vec::new();
        loop {
            let tok = scan.start(false).unwrap();
            if tok.kind == TokenKind::None {
                return out;
            }
            out.push((tok.kind, tok.lexeme));
        }
    }

    fn one(src: &str, opts: Options) -> Tok {
        let env = Environment::new();
        let mut scan = Scanner::new(src, opts, &env);
        scan.start(false).unwrap()
    }

    #[test]
    fn basic_stream() {
        let toks = kinds(r"1 + \frac{2}{3}");
        assert_eq!(
            toks,
            [
                (TokenKind::Num, "1".to_string()),
                (TokenKind::Add, "+".to_string()),
                (TokenKind::Frac, "\\frac".to_string()),
                (TokenKind::LeftBrace, "{".to_string()),
                (TokenKind::Num, "2".to_string()),
                (TokenKind::RightBrace, "}".to_string()),
                (TokenKind::LeftBrace, "{".to_string()),
                (TokenKind::Num, "3".to_string()),
                (TokenKind::RightBrace, "}".to_string()),
            ]
        );
    }

    #[test]
    fn fusions() {
        let toks = kinds("a != b <= c ** 2 -> d");
        let just_kinds: Vec<_> = toks.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            just_kinds,
            [
                TokenKind::Var,
                TokenKind::Ne,
                TokenKind::Var,
                TokenKind::Le,
                TokenKind::Var,
                TokenKind::Caret,
                TokenKind::Num,
                TokenKind::RightArrow,
                TokenKind::Var,
            ]
        );
    }

    #[test]
    fn whitespace_control_words() {
        let toks = kinds(r"x \quad \, \; y");
        assert_eq!(toks.len(), 2);
    }

    #[test]
    fn unknown_control_word_is_var() {
        let toks = kinds(r"\zeta");
        assert_eq!(toks, [(TokenKind::Var, "\\zeta".to_string())]);
    }

    #[test]
    fn epsilon_aliases() {
        assert_eq!(kinds(r"\varepsilon"), [(TokenKind::Var, "\\epsilon".to_string())]);
        assert_eq!(kinds("\u{03F5}"), [(TokenKind::Var, "\\epsilon".to_string())]);
        assert_eq!(kinds("\u{1D6C6}"), [(TokenKind::Var, "\\epsilon".to_string())]);
    }

    #[test]
    fn infinity_is_a_number() {
        let tok = one(r"\infty", Options::default());
        assert_eq!(tok.kind, TokenKind::Num);
        assert_eq!(tok.lexeme, "\\infty");
    }

    #[test]
    fn primes_collapse() {
        assert_eq!(kinds("f''"), [
            (TokenKind::Var, "f".to_string()),
            (TokenKind::Var, "''".to_string()),
        ]);
    }

    #[test]
    fn text_groups() {
        assert_eq!(
            kinds(r"\text{meters per second}"),
            [(TokenKind::Text, "meters per second".to_string())]
        );
        let opts = Options {
            keep_text_whitespace: true,
            ..Options::default()
        };
        let env = Environment::new();
        let mut scan = Scanner::new(r"\text{ a  b }", opts, &env);
        assert_eq!(scan.start(false).unwrap().lexeme, " a  b ");
    }

    #[test]
    fn ignore_text_skips() {
        let opts = Options {
            ignore_text: true,
            ..Options::default()
        };
        let env = Environment::new();
        let mut scan = Scanner::new(r"\text{hi} 4", opts, &env);
        let tok = scan.start(false).unwrap();
        assert_eq!(tok.kind, TokenKind::Num);
    }

    #[test]
    fn operatorname_consumes_braces() {
        assert_eq!(
            kinds(r"\operatorname{lcm}"),
            [(TokenKind::Text, "lcm".to_string())]
        );
    }

    #[test]
    fn nbsp_entity_is_whitespace() {
        assert_eq!(kinds("1&nbsp;+&nbsp;2").len(), 3);
        // a bare ampersand is still a column break
        assert_eq!(kinds("a & b")[1].0, TokenKind::NewCol);
    }

    #[test]
    fn unicode_operators() {
        let toks = kinds("x \u{2264} y \u{00D7} z");
        let just_kinds: Vec<_> = toks.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            just_kinds,
            [
                TokenKind::Var,
                TokenKind::Le,
                TokenKind::Var,
                TokenKind::Times,
                TokenKind::Var,
            ]
        );
        assert_eq!(kinds("\u{2212}5")[0].0, TokenKind::Sub);
    }

    #[test]
    fn greedy_environment_identifiers() {
        let env: Environment = [
            ("kg", Symbol::new(SymbolKind::Unit)),
            ("km", Symbol::new(SymbolKind::Unit)),
            ("mol", Symbol::new(SymbolKind::Unit)),
        ]
        .into_iter()
        .collect();
        let mut scan = Scanner::new("5kg + 2mol x", Options::default(), &env);
        let stream: Vec<_> = std::iter::from_fn(|| {
            let tok = scan.start(false).unwrap();
            (tok.kind != TokenKind::None).then_some(tok.lexeme)
        })
        .collect();
        assert_eq!(stream, ["5", "kg", "+", "2", "mol", "x"]);
    }

    #[test]
    fn identifier_backtracks_without_exact_match() {
        let env: Environment = [("mol", Symbol::new(SymbolKind::Unit))].into_iter().collect();
        let mut scan = Scanner::new("mox", Options::default(), &env);
        // "mo" is a viable prefix but never completes, so fall back to "m"
        assert_eq!(scan.start(false).unwrap().lexeme, "m");
        assert_eq!(scan.start(false).unwrap().lexeme, "o");
    }

    #[test]
    fn control_word_units() {
        let env: Environment = [("\\mu g", Symbol::new(SymbolKind::Unit))]
            .into_iter()
            .collect();
        let mut scan = Scanner::new(r"\mu g", Options::default(), &env);
        assert_eq!(scan.start(false).unwrap().lexeme, "\\mu g");
    }

    #[test]
    fn plain_decimal() {
        let tok = one("12.5", Options::default());
        assert_eq!(tok.lexeme, "12.5");
        assert_eq!(tok.number_format, Some(NumberFormat::Decimal));
        assert_eq!(tok.separator_count, 1);
    }

    #[test]
    fn leading_dot() {
        let tok = one(".5", Options::default());
        assert_eq!(tok.lexeme, "0.5");
    }

    #[test]
    fn trailing_dot_before_overline() {
        let env = Environment::new();
        let mut scan = Scanner::new(r"0.\overline{3}", Options::default(), &env);
        let tok = scan.start(false).unwrap();
        assert_eq!(tok.lexeme, "0.");
        assert_eq!(tok.number_format, Some(NumberFormat::Decimal));
        assert_eq!(scan.start(false).unwrap().kind, TokenKind::Overline);
    }

    #[test]
    fn braced_thousands_separator() {
        let opts = Options {
            set_thousands_separator: vec![','],
            ..Options::default()
        };
        let tok = one("1{,}234.5", opts);
        assert_eq!(tok.lexeme, "1234.5");
        assert_eq!(tok.separator_count, 2);
        assert_eq!(tok.number_format, Some(NumberFormat::Decimal));
    }

    #[test]
    fn bare_thousands_separator() {
        let opts = Options {
            allow_thousands_separator: true,
            ..Options::default()
        };
        let tok = one("1,234,567", opts);
        assert_eq!(tok.lexeme, "1234567");
        assert_eq!(tok.separator_count, 2);
    }

    #[test]
    fn ambiguous_comma_ends_number() {
        let opts = Options {
            allow_thousands_separator: true,
            ..Options::default()
        };
        let env = Environment::new();
        let mut scan = Scanner::new("1,2", opts, &env);
        assert_eq!(scan.start(false).unwrap().lexeme, "1");
        assert_eq!(scan.start(false).unwrap().kind, TokenKind::Comma);
    }

    #[test]
    fn misplaced_braced_separator() {
        let opts = Options {
            set_thousands_separator: vec![','],
            ..Options::default()
        };
        let env = Environment::new();
        let mut scan = Scanner::new("1{,}23", opts, &env);
        let err = scan.start(false).unwrap_err();
        assert_eq!(err.code, ErrorCode::MisplacedThousandsSeparator);
    }

    #[test]
    fn mismatched_separator_characters() {
        let opts = Options {
            set_thousands_separator: vec![',', ' '],
            ..Options::default()
        };
        let env = Environment::new();
        let mut scan = Scanner::new(r"1{,}234{ }567", opts, &env);
        let err = scan.start(false).unwrap_err();
        assert_eq!(err.code, ErrorCode::MismatchedThousandsSeparators);
    }

    #[test]
    fn european_decimal_comma() {
        let opts = Options {
            set_decimal_separator: vec![','],
            set_thousands_separator: vec!['.'],
            ..Options::default()
        };
        let tok = one("1.234,5", opts);
        assert_eq!(tok.lexeme, "1234.5");
    }

    #[test]
    fn strict_preserves_raw_literal() {
        let opts = Options {
            set_thousands_separator: vec![','],
            strict: true,
            ..Options::default()
        };
        let tok = one("1{,}234", opts);
        assert_eq!(tok.lexeme, "1,234");
    }

    #[test]
    fn decimal_places_round() {
        let opts = Options {
            decimal_places: Some(2),
            ..Options::default()
        };
        assert_eq!(one("1.005", opts.clone()).lexeme, "1.01");
        assert_eq!(one("2.999", opts.clone()).lexeme, "3");
        assert_eq!(one("1.2", opts).lexeme, "1.2");
    }

    #[test]
    fn one_char_numbers() {
        let env = Environment::new();
        let mut scan = Scanner::new("23", Options::default(), &env);
        assert_eq!(scan.start(true).unwrap().lexeme, "2");
        assert_eq!(scan.start(true).unwrap().lexeme, "3");
    }

    #[test]
    fn double_decimal_is_an_error() {
        let env = Environment::new();
        let mut scan = Scanner::new("1..", Options::default(), &env);
        let err = scan.start(false).unwrap_err();
        assert_eq!(err.code, ErrorCode::DecimalSeparator);
    }

    #[test]
    fn delimiter_period() {
        let env = Environment::new();
        let mut scan = Scanner::new(r"\left. x \right.", Options::default(), &env);
        assert_eq!(scan.start(false).unwrap().kind, TokenKind::Left);
        assert_eq!(scan.start_delimiter().unwrap().kind, TokenKind::Period);
    }

    #[test]
    fn strip_invisible_collapses_runs() {
        assert_eq!(strip_invisible("a\u{1}\u{2}b"), "a\tb");
        // the char after a backslash survives
        assert_eq!(strip_invisible("\\\u{1}x"), "\\\u{1}x");
    }

    #[test]
    fn invalid_character() {
        let env = Environment::new();
        let mut scan = Scanner::new("#", Options::default(), &env);
        assert_eq!(
            scan.start(false).unwrap_err().code,
            ErrorCode::InvalidCharacter
        );
    }

    #[test]
    fn set_braces_and_newrow() {
        let toks = kinds(r"\{ 1 \} \\ \| x");
        let just_kinds: Vec<_> = toks.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            just_kinds,
            [
                TokenKind::LeftBraceSet,
                TokenKind::Num,
                TokenKind::RightBraceSet,
                TokenKind::NewRow,
                TokenKind::DoubleVerticalBar,
                TokenKind::Var,
            ]
        );
    }

    #[test]
    fn begin_carries_environment_name() {
        let toks = kinds(r"\begin{matrix} a \end{matrix}");
        assert_eq!(toks[0], (TokenKind::Begin, "matrix".to_string()));
        assert_eq!(toks[2], (TokenKind::End, "matrix".to_string()));
    }
}
