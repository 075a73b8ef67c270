//! Event attributes.

use serde::{Deserialize, Serialize};

/// Attribute value. The tag decides whether the encoded JSON value is quoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Text form of a number, emitted unquoted.
    Numeric(String),
    /// Arbitrary text, emitted as an escaped JSON string.
    Text(String),
}

impl AttributeValue {
    /// Numeric value from its text form. The text is kept as given; the
    /// encoder falls back to quoting it if it is not a valid JSON number.
    pub fn numeric(text: impl Into<String>) -> Self {
        Self::Numeric(text.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Numeric(_))
    }

    /// Raw text of the value, without quoting.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Numeric(text) | Self::Text(text) => text,
        }
    }
}

/// Returns true when `text` is exactly one JSON number literal.
pub fn is_json_number(text: &str) -> bool {
    !text.is_empty()
        && text.trim() == text
        && serde_json::from_str::<serde_json::Number>(text).is_ok()
}

macro_rules! numeric_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(value: $ty) -> Self {
                    Self::Numeric(value.to_string())
                }
            }
        )*
    };
}

numeric_from_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

macro_rules! numeric_from_float {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(value: $ty) -> Self {
                    if value.is_finite() {
                        Self::Numeric(value.to_string())
                    } else {
                        Self::Text(value.to_string())
                    }
                }
            }
        )*
    };
}

numeric_from_float!(f32, f64);

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Text(value.to_string())
    }
}

/// A name/value pair attached to an event. Names are not deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_and_floats_are_numeric() {
        assert_eq!(AttributeValue::from(42_i32), AttributeValue::numeric("42"));
        assert_eq!(AttributeValue::from(2.5_f64), AttributeValue::numeric("2.5"));
        assert_eq!(AttributeValue::from(0.1_f32), AttributeValue::numeric("0.1"));
    }

    #[test]
    fn non_finite_floats_become_text() {
        assert_eq!(AttributeValue::from(f64::NAN), AttributeValue::text("NaN"));
        assert!(!AttributeValue::from(f64::INFINITY).is_numeric());
    }

    #[test]
    fn strings_are_text() {
        let attr = Attribute::new("method", "password");
        assert_eq!(attr.value, AttributeValue::Text("password".into()));
        assert_eq!(attr.value.as_str(), "password");
    }

    #[test]
    fn json_number_detection() {
        assert!(is_json_number("12"));
        assert!(is_json_number("-0.5e3"));
        assert!(!is_json_number(""));
        assert!(!is_json_number(" 1"));
        assert!(!is_json_number("0x10"));
        assert!(!is_json_number("1,5"));
        assert!(!is_json_number("NaN"));
    }
}
