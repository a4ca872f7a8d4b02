//! Errors from the backend client and from user input checks.

use thiserror::Error;

/// Failures talking to the portfolio backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status, .. } if *status == reqwest::StatusCode::NOT_FOUND)
    }
}

/// Validation errors for user input in the CLI and the TUI.
///
/// These errors are shown directly to users and should be clear and actionable.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Quantity is required")]
    QuantityRequired,

    #[error("Invalid quantity format: {0}")]
    InvalidQuantity(String),

    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(f64),

    #[error("Price is required")]
    PriceRequired,

    #[error("Invalid price format: {0}")]
    InvalidPrice(String),

    #[error("Price cannot be negative, got {0}")]
    NegativePrice(f64),

    #[error("Unknown transaction type: {0} (expected BUY or SELL)")]
    InvalidTransactionType(String),

    #[error("You can not sell more than you have ({held})")]
    ExceedsHolding { requested: f64, held: f64 },

    #[error("No holding with id {0} in this portfolio")]
    UnknownHolding(i64),
}

pub fn parse_quantity(input: &str) -> Result<f64, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::QuantityRequired);
    }
    let quantity = trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::InvalidQuantity(trimmed.to_string()))?;
    if quantity <= 0.0 {
        return Err(ValidationError::NonPositiveQuantity(quantity));
    }
    Ok(quantity)
}

pub fn parse_price(input: &str) -> Result<f64, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::PriceRequired);
    }
    let price = trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::InvalidPrice(trimmed.to_string()))?;
    if price < 0.0 {
        return Err(ValidationError::NegativePrice(price));
    }
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(" 1.5 "), Ok(1.5));
        assert_eq!(parse_quantity(""), Err(ValidationError::QuantityRequired));
        assert_eq!(
            parse_quantity("1,5"),
            Err(ValidationError::InvalidQuantity("1,5".to_string()))
        );
        assert_eq!(parse_quantity("0"), Err(ValidationError::NonPositiveQuantity(0.0)));
        assert!(parse_quantity("NaN").is_err());
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("0"), Ok(0.0));
        assert_eq!(parse_price("42.10"), Ok(42.1));
        assert_eq!(parse_price("-1"), Err(ValidationError::NegativePrice(-1.0)));
        assert_eq!(
            parse_price("abc"),
            Err(ValidationError::InvalidPrice("abc".to_string()))
        );
    }

    #[test]
    fn test_messages() {
        let err = ValidationError::ExceedsHolding {
            requested: 3.0,
            held: 2.0,
        };
        assert_eq!(err.to_string(), "You can not sell more than you have (2)");
    }
}
