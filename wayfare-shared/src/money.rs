use serde::{Deserialize, Serialize};
use std::fmt;

const ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "UYI", "VND",
    "VUV", "XAF", "XOF", "XPF",
];

const THREE_DECIMAL: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Currency mismatch: {expected} vs {actual}")]
    CurrencyMismatch { expected: String, actual: String },
}

/// ISO-4217 currency code, always upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(code: &str) -> Result<Self, MoneyError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of digits after the decimal point in the currency's minor unit.
    pub fn minor_digits(&self) -> u32 {
        if ZERO_DECIMAL.contains(&self.0.as_str()) {
            0
        } else if THREE_DECIMAL.contains(&self.0.as_str()) {
            3
        } else {
            2
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An amount in the currency's minor unit (cents for EUR). Never a float.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount_minor: i64, currency: Currency) -> Self {
        Self { amount_minor, currency }
    }

    /// Parse a provider decimal string such as `"123.45"` into minor units.
    pub fn from_decimal_str(amount: &str, currency: Currency) -> Result<Self, MoneyError> {
        let raw = amount.trim();
        let invalid = || MoneyError::InvalidAmount(raw.to_string());

        let (whole, fraction) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };

        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let digits = currency.minor_digits() as usize;
        let significant = fraction.trim_end_matches('0');
        if significant.len() > digits {
            return Err(invalid());
        }

        let scale = 10_i64.pow(digits as u32);
        let whole_value: i64 = whole.parse().map_err(|_| invalid())?;

        let mut padded = significant.to_string();
        while padded.len() < digits {
            padded.push('0');
        }
        let fraction_value: i64 = if padded.is_empty() {
            0
        } else {
            padded.parse().map_err(|_| invalid())?
        };

        let amount_minor = whole_value
            .checked_mul(scale)
            .and_then(|v| v.checked_add(fraction_value))
            .ok_or_else(invalid)?;

        Ok(Self { amount_minor, currency })
    }

    /// Render as a provider decimal string (`12345` EUR -> `"123.45"`).
    pub fn to_decimal_string(&self) -> String {
        let digits = self.currency.minor_digits();
        if digits == 0 {
            return self.amount_minor.to_string();
        }
        let scale = 10_i64.pow(digits);
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        let scale = scale as u64;
        format!(
            "{}{}.{:0width$}",
            sign,
            abs / scale,
            abs % scale,
            width = digits as usize
        )
    }

    pub fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                expected: self.currency.to_string(),
                actual: other.currency.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur() -> Currency {
        Currency::parse("eur").unwrap()
    }

    #[test]
    fn test_currency_is_uppercased_and_validated() {
        assert_eq!(eur().as_str(), "EUR");
        assert!(Currency::parse("EU").is_err());
        assert!(Currency::parse("E1R").is_err());
    }

    #[test]
    fn test_parse_decimal_amounts() {
        assert_eq!(Money::from_decimal_str("123.45", eur()).unwrap().amount_minor, 12345);
        assert_eq!(Money::from_decimal_str("123.4", eur()).unwrap().amount_minor, 12340);
        assert_eq!(Money::from_decimal_str("123", eur()).unwrap().amount_minor, 12300);
        assert_eq!(Money::from_decimal_str("0.05", eur()).unwrap().amount_minor, 5);
        assert_eq!(Money::from_decimal_str("10.500", eur()).unwrap().amount_minor, 1050);
    }

    #[test]
    fn test_parse_respects_currency_exponent() {
        let jpy = Currency::parse("JPY").unwrap();
        assert_eq!(Money::from_decimal_str("5000", jpy.clone()).unwrap().amount_minor, 5000);
        assert!(Money::from_decimal_str("5000.5", jpy).is_err());

        let kwd = Currency::parse("KWD").unwrap();
        assert_eq!(Money::from_decimal_str("1.234", kwd).unwrap().amount_minor, 1234);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Money::from_decimal_str("", eur()).is_err());
        assert!(Money::from_decimal_str("-1.00", eur()).is_err());
        assert!(Money::from_decimal_str("1.2.3", eur()).is_err());
        assert!(Money::from_decimal_str("1.999", eur()).is_err());
        assert!(Money::from_decimal_str("abc", eur()).is_err());
        assert!(Money::from_decimal_str("99999999999999999999", eur()).is_err());
    }

    #[test]
    fn test_decimal_rendering() {
        assert_eq!(Money::new(12345, eur()).to_decimal_string(), "123.45");
        assert_eq!(Money::new(5, eur()).to_decimal_string(), "0.05");
        assert_eq!(Money::new(700, Currency::parse("JPY").unwrap()).to_decimal_string(), "700");
        assert_eq!(Money::new(12345, eur()).to_string(), "123.45 EUR");
    }

    #[test]
    fn test_currency_mismatch() {
        let gbp = Money::new(100, Currency::parse("GBP").unwrap());
        let eur = Money::new(100, eur());
        assert!(gbp.ensure_same_currency(&eur).is_err());
        assert!(eur.ensure_same_currency(&eur.clone()).is_ok());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(Money::new(2500, eur())).unwrap();
        assert_eq!(json, serde_json::json!({"amount_minor": 2500, "currency": "EUR"}));
        let bad: Result<Money, _> =
            serde_json::from_value(serde_json::json!({"amount_minor": 1, "currency": "EURO"}));
        assert!(bad.is_err());
    }
}
