//! Parser configuration
//!
//! One [`Options`] value is threaded through the scanner and parser. The
//! separator fields are validated once up front so the scanner can trust
//! them.

use crate::error::{ErrorCode, ParseResult, SyntaxError};

/// Parser and scanner configuration
///
/// # Example
/// ```
/// use latex_math_parser::Options;
///
/// let opts = Options {
///     allow_thousands_separator: true,
///     ..Options::default()
/// };
/// assert_eq!(opts.thousands_separators(), &[',']);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Recognize an implicit `,` thousands separator while scanning numbers
    pub allow_thousands_separator: bool,
    /// Characters recognized as thousands separators; implies
    /// `allow_thousands_separator` when non-empty
    pub set_thousands_separator: Vec<char>,
    /// Characters recognized as decimal separators; defaults to `.`
    pub set_decimal_separator: Vec<char>,
    /// Round numeric literals to this many decimal places
    pub decimal_places: Option<u8>,
    /// Preserve literal numeric text and make lenient choices fatal
    pub strict: bool,
    /// Disable flattening of ADD chains
    pub compare_grouping: bool,
    /// Preserve whitespace inside `\text{…}`
    pub keep_text_whitespace: bool,
    /// Treat `\text{…}` as whitespace
    pub ignore_text: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            allow_thousands_separator: false,
            set_thousands_separator: Vec::new(),
            set_decimal_separator: Vec::new(),
            decimal_places: None,
            strict: false,
            compare_grouping: false,
            keep_text_whitespace: false,
            ignore_text: false,
        }
    }
}

impl Options {
    /// The effective thousands separators
    ///
    /// Explicitly configured characters win; otherwise `,` when
    /// `allow_thousands_separator` is set, otherwise none.
    pub fn thousands_separators(&self) -> &[char] {
        if !self.set_thousands_separator.is_empty() {
            &self.set_thousands_separator
        } else if self.allow_thousands_separator {
            &[',']
        } else {
            &[]
        }
    }

    /// The effective decimal separators, defaulting to `.`
    pub fn decimal_separators(&self) -> &[char] {
        if self.set_decimal_separator.is_empty() {
            &['.']
        } else {
            &self.set_decimal_separator
        }
    }

    /// Check the separator configuration
    ///
    /// A thousands separator that is also a decimal separator is rejected
    /// with code 1008. Decimal separators are single characters by
    /// construction here, but an empty configured list would make `.`
    /// ambiguous, so it is restored to the default (code 1002 is reserved
    /// for scan-time separator misuse).
    pub fn validate(&self, src: &str) -> ParseResult<()> {
        for &t in self.thousands_separators() {
            if self.decimal_separators().contains(&t) {
                return Err(SyntaxError::new(
                    ErrorCode::SeparatorConflict,
                    &[&t.to_string()],
                    src,
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Options;
    use crate::error::ErrorCode;

    #[test]
    fn default_separators() {
        let opts = Options::default();
        assert!(opts.thousands_separators().is_empty());
        assert_eq!(opts.decimal_separators(), &['.']);
    }

    #[test]
    fn implicit_comma() {
        let opts = Options {
            allow_thousands_separator: true,
            ..Options::default()
        };
        assert_eq!(opts.thousands_separators(), &[',']);
        assert!(opts.validate("").is_ok());
    }

    #[test]
    fn conflicting_separators() {
        let opts = Options {
            set_thousands_separator: vec![','],
            set_decimal_separator: vec![','],
            ..Options::default()
        };
        let err = opts.validate("1,5").unwrap_err();
        assert_eq!(err.code, ErrorCode::SeparatorConflict);
    }

    #[test]
    fn european_style() {
        let opts = Options {
            set_thousands_separator: vec!['.', ' '],
            set_decimal_separator: vec![','],
            ..Options::default()
        };
        assert!(opts.validate("").is_ok());
        assert_eq!(opts.decimal_separators(), &[',']);
    }
}
