//! Parse diagnostics
//!
//! Every failure carries a numeric code in the reserved 1000–1999 range and a
//! message produced from a positional template (`%1`, `%2`, …). There is no
//! partial recovery: parsing either yields a complete tree or a
//! [`SyntaxError`].

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the parser
pub type ParseResult<T> = Result<T, SyntaxError>;

/// Numeric diagnostic codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Internal invariant violated
    Internal = 1000,
    /// Expected one token, found another
    ExpectedFound = 1001,
    /// Invalid or repeated decimal separator
    DecimalSeparator = 1002,
    /// Input remains after a complete expression
    ExtraInput = 1003,
    /// Character outside the accepted alphabet
    InvalidCharacter = 1004,
    /// Thousands separator in an impossible position
    MisplacedThousandsSeparator = 1005,
    /// An expression was required
    ExpressionExpected = 1006,
    /// Unexpected character while scanning a number
    NumberCharacter = 1007,
    /// Thousands and decimal separators overlap
    SeparatorConflict = 1008,
    /// A command is missing its braced argument
    MissingArgument = 1009,
    /// Two adjacent numeric literals with no operator
    NumbersWithoutOperator = 1010,
    /// Mismatched or invalid grouping bracket
    GroupingBracket = 1011,
    /// Subscript attached to something that cannot take one
    MisplacedSubscript = 1012,
    /// Two different thousands separators in one input
    MismatchedThousandsSeparators = 1013,
    /// Integral body does not end in `d<var>`
    MissingIntegrationVariable = 1014,
}

impl ErrorCode {
    /// The numeric code
    pub fn code(self) -> u16 {
        self as u16
    }

    fn template(self) -> &'static str {
        match self {
            ErrorCode::Internal => "internal error: %1",
            ErrorCode::ExpectedFound => "expected %1, found %2",
            ErrorCode::DecimalSeparator => "invalid decimal separator: %1",
            ErrorCode::ExtraInput => "extra input after expression: %1",
            ErrorCode::InvalidCharacter => "invalid character: %1",
            ErrorCode::MisplacedThousandsSeparator => "misplaced thousands separator",
            ErrorCode::ExpressionExpected => "expecting an expression, found %1",
            ErrorCode::NumberCharacter => "unexpected character in number: %1",
            ErrorCode::SeparatorConflict => {
                "thousands separator %1 conflicts with decimal separator"
            }
            ErrorCode::MissingArgument => "missing argument for %1",
            ErrorCode::NumbersWithoutOperator => "expecting an operator between numbers",
            ErrorCode::GroupingBracket => "mismatched grouping brackets %1 and %2",
            ErrorCode::MisplacedSubscript => "misplaced subscript on %1",
            ErrorCode::MismatchedThousandsSeparators => {
                "mismatched thousands separators %1 and %2"
            }
            ErrorCode::MissingIntegrationVariable => "integral is missing its d-variable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Substitute `%1`, `%2`, … in a template with the given arguments
///
/// Unmatched placeholders are left verbatim so a malformed call site is
/// visible rather than silent.
fn format_args(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.peek() {
                Some(d @ '1'..='9') => {
                    let idx = *d as usize - '1' as usize;
                    if let Some(arg) = args.get(idx) {
                        out.push_str(arg);
                        chars.next();
                        continue;
                    }
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

/// A fatal parse error
///
/// Carries the numeric code, the fully formatted message, and the source
/// text the parser was working on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("error {code}: {message} in \"{src}\"")]
pub struct SyntaxError {
    /// Diagnostic code
    pub code: ErrorCode,
    /// Formatted human-readable message
    pub message: String,
    /// The source text being parsed
    pub src: String,
}

impl SyntaxError {
    /// Build an error from a code and its template arguments
    pub fn new(code: ErrorCode, args: &[&str], src: impl Into<String>) -> Self {
        SyntaxError {
            code,
            message: format_args(code.template(), args),
            src: src.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{format_args, ErrorCode, SyntaxError};

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Internal.code(), 1000);
        assert_eq!(ErrorCode::NumbersWithoutOperator.code(), 1010);
        assert_eq!(ErrorCode::MissingIntegrationVariable.code(), 1014);
    }

    #[test]
    fn positional_substitution() {
        assert_eq!(format_args("expected %1, found %2", &["')'", "EOS"]), "expected ')', found EOS");
        assert_eq!(format_args("no args here", &[]), "no args here");
        // missing argument leaves the placeholder
        assert_eq!(format_args("lonely %2", &["a"]), "lonely %2");
        assert_eq!(format_args("100%", &[]), "100%");
    }

    #[test]
    fn display_carries_code_and_source() {
        let err = SyntaxError::new(ErrorCode::ExtraInput, &["x"], "1 2 x");
        let shown = err.to_string();
        assert!(shown.contains("1003"));
        assert!(shown.contains("1 2 x"));
    }
}
