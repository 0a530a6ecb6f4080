//! Kubernetes resource quantity parsing
//!
//! Accepts the API server's quantity syntax:
//!
//! ```text
//! <quantity>       ::= <signedNumber><suffix>
//! <signedNumber>   ::= [+-] <digits> [ . [<digits>] ] | [+-] . <digits>
//! <suffix>         ::= "" | n | u | m | k | M | G | T | P | E
//!                    | Ki | Mi | Gi | Ti | Pi | Ei
//!                    | (e | E) [+-] <digits>
//! ```
//!
//! Parsed values are passed through unchanged; normalisation is left to the
//! API server.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

const DECIMAL_SUFFIXES: &[&str] = &["n", "u", "m", "k", "M", "G", "T", "P", "E"];
const BINARY_SUFFIXES: &[&str] = &["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Why a quantity string was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    /// Empty input
    #[error("quantity must not be empty")]
    Empty,

    /// No digits where a number was expected
    #[error("quantity '{0}' must start with a number")]
    MissingNumber(String),

    /// Trailing characters are not a recognised suffix
    #[error("quantity '{quantity}' has unknown suffix '{suffix}'")]
    UnknownSuffix {
        /// The full input
        quantity: String,
        /// The unparsed tail
        suffix: String,
    },
}

/// Parse a quantity string such as `"500m"`, `"128Mi"` or `"1e3"`
pub fn parse_quantity(input: &str) -> Result<Quantity, QuantityError> {
    if input.is_empty() {
        return Err(QuantityError::Empty);
    }

    let rest = input.strip_prefix(is_sign).unwrap_or(input);
    let (whole, rest) = split_digits(rest);

    let (fraction, rest) = match rest.strip_prefix('.') {
        Some(after_dot) => split_digits(after_dot),
        None => ("", rest),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(QuantityError::MissingNumber(input.to_string()));
    }

    if !is_valid_suffix(rest) {
        return Err(QuantityError::UnknownSuffix {
            quantity: input.to_string(),
            suffix: rest.to_string(),
        });
    }

    Ok(Quantity(input.to_string()))
}

fn is_sign(c: char) -> bool {
    c == '+' || c == '-'
}

/// Split a leading run of ASCII digits
fn split_digits(s: &str) -> (&str, &str) {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.split_at(end)
}

fn is_valid_suffix(suffix: &str) -> bool {
    if suffix.is_empty()
        || DECIMAL_SUFFIXES.contains(&suffix)
        || BINARY_SUFFIXES.contains(&suffix)
    {
        return true;
    }

    // Decimal exponent: e3, E-2, e+10
    match suffix.strip_prefix(|c| c == 'e' || c == 'E') {
        Some(exp) => {
            let digits = exp.strip_prefix(is_sign).unwrap_or(exp);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
