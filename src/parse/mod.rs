mod error;
mod grammar;
pub mod limits;

pub use error::ParseError;

use crate::types::Expr;

/// Parse a rule definition into an unchecked [`Expr`].
///
/// The whole input must be a single expression; trailing text is an error.
/// Definitions beyond the bounds in [`limits`] are rejected before parsing.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not a well-formed expression or
/// exceeds a size bound.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    use winnow::Parser;
    limits::check(input).map_err(ParseError::new)?;
    grammar::definition
        .parse(input)
        .map_err(|e| ParseError::new(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_parentheses_are_rejected() {
        let deep = format!("{}true{}", "(".repeat(1_000), ")".repeat(1_000));
        let err = parse(&deep).unwrap_err();
        assert!(err.message().contains("nesting"), "{err}");
    }

    #[test]
    fn long_and_chain_is_rejected() {
        let chain = vec!["txn.RiskScore > 1"; 5_000].join(" && ");
        let err = parse(&chain).unwrap_err();
        assert!(err.message().contains("operators"), "{err}");
    }

    #[test]
    fn nesting_within_bounds_parses() {
        let depth = limits::MAX_NESTING;
        let nested = format!("{}true{}", "(".repeat(depth), ")".repeat(depth));
        assert!(parse(&nested).is_ok());
    }
}
