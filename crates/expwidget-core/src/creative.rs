//! Creative payloads and identifier canonicalization.
//!
//! The experiment service and the widget disagree on whether a creative
//! identifier is a number or a numeric string. [`CreativeId`] settles that
//! once, at ingestion, so every comparison, cache key and telemetry payload
//! sees the same value.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Largest integer a JSON number can carry without losing precision.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Canonical creative identifier.
#[derive(Debug, Clone)]
pub enum CreativeId {
    /// Numeric identifier (also produced from strings that parse to a finite number)
    Number(f64),
    /// Opaque identifier kept verbatim
    Text(String),
}

impl CreativeId {
    /// Canonicalize a string identifier.
    ///
    /// The string becomes numeric iff it parses to a finite number, with
    /// `0x`, `0b` and `0o` integer literals accepted as well.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let parsed = Self::parse_radix(trimmed).or_else(|| trimmed.parse::<f64>().ok());
            if let Some(id) = parsed.and_then(Self::number) {
                return id;
            }
        }
        Self::Text(raw.to_string())
    }

    /// Unsigned `0x`/`0b`/`0o` literal.
    #[allow(clippy::cast_precision_loss)]
    fn parse_radix(literal: &str) -> Option<f64> {
        let radix = match literal.get(..2)? {
            "0x" | "0X" => 16,
            "0b" | "0B" => 2,
            "0o" | "0O" => 8,
            _ => return None,
        };
        let digits = &literal[2..];
        if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
            return None;
        }
        u64::from_str_radix(digits, radix).ok().map(|n| n as f64)
    }

    /// Numeric identifier, `None` for NaN and infinities.
    #[must_use]
    pub fn number(value: f64) -> Option<Self> {
        if value.is_finite() {
            // -0 and 0 are the same creative
            Some(Self::Number(if value == 0.0 { 0.0 } else { value }))
        } else {
            None
        }
    }

    /// Whether the identifier carries no information (empty string).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }

    /// Integral numeric identifiers in the JSON-safe range.
    fn as_integer(&self) -> Option<i64> {
        match *self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => Some(n as i64),
            _ => None,
        }
    }
}

impl PartialEq for CreativeId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

// NaN never gets in, see `CreativeId::number`.
impl Eq for CreativeId {}

impl Hash for CreativeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Number(n) => {
                0u8.hash(state);
                n.to_bits().hash(state);
            }
            Self::Text(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for CreativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.as_integer(), self) {
            (Some(n), _) => write!(f, "{n}"),
            (None, Self::Number(n)) => write!(f, "{n}"),
            (None, Self::Text(s)) => f.write_str(s),
        }
    }
}

impl From<&str> for CreativeId {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<i64> for CreativeId {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl Serialize for CreativeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (self.as_integer(), self) {
            (Some(n), _) => serializer.serialize_i64(n),
            (None, Self::Number(n)) => serializer.serialize_f64(*n),
            (None, Self::Text(s)) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for CreativeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = CreativeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a creative id (number or string)")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<CreativeId, E> {
                Ok(CreativeId::from(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<CreativeId, E> {
                Ok(CreativeId::Number(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<CreativeId, E> {
                CreativeId::number(v).ok_or_else(|| E::custom("creative id is not finite"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CreativeId, E> {
                Ok(CreativeId::parse(v))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// An assigned experiment creative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creative {
    /// Canonical identifier
    #[serde(rename = "creative_id")]
    pub id: CreativeId,
    /// Headline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Product name, used as a title/subtitle fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    /// Call-to-action text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_text: Option<String>,
    /// Artwork URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Ordered selling points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selling_points: Option<Vec<String>>,
}

impl Creative {
    /// Create a creative with only an identifier.
    #[must_use]
    pub fn new(id: impl Into<CreativeId>) -> Self {
        Self {
            id: id.into(),
            title: None,
            product_name: None,
            cta_text: None,
            image_url: None,
            selling_points: None,
        }
    }

    /// Set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the image URL.
    #[must_use]
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Identity comparison: canonical identifiers only, display fields ignored.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.id == other.id
    }

    /// Decode a creative, rejecting payloads without a usable identifier.
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok().filter(|c| !c.id.is_empty())
    }
}

/// Result of interpreting an assignment response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// A creative was assigned
    Creative(Creative),
    /// Nothing usable; carries the envelope message when the service sent one
    Empty {
        /// Service-provided explanation
        message: Option<String>,
    },
}

#[derive(Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Extract the creative from an assignment response.
///
/// Accepts the bare creative object or the `{code, message?, data?}`
/// envelope. The bare form wins when both readings are valid.
#[must_use]
pub fn extract_assignment(body: &Value) -> Assignment {
    if let Some(creative) = Creative::from_value(body) {
        return Assignment::Creative(creative);
    }

    match Envelope::deserialize(body) {
        Ok(envelope) => {
            if let Some(creative) = envelope.data.as_ref().and_then(Creative::from_value) {
                return Assignment::Creative(creative);
            }
            let message = if envelope.code == 0 {
                None
            } else {
                envelope.message.filter(|m| !m.trim().is_empty())
            };
            Assignment::Empty { message }
        }
        Err(_) => Assignment::Empty { message: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_numeric_string_becomes_number() {
        assert_eq!(CreativeId::parse("100"), CreativeId::Number(100.0));
        assert_eq!(CreativeId::parse(" 42 "), CreativeId::Number(42.0));
        assert_eq!(CreativeId::parse("1.5"), CreativeId::Number(1.5));
    }

    #[test]
    fn test_radix_literals_become_numbers() {
        assert_eq!(CreativeId::parse("0x10"), CreativeId::from(16i64));
        assert_eq!(CreativeId::parse("0XfF"), CreativeId::from(255i64));
        assert_eq!(CreativeId::parse("0b11"), CreativeId::from(3i64));
        assert_eq!(CreativeId::parse("0o7"), CreativeId::from(7i64));
        assert!(Creative::new("0x10").same_as(&Creative::new(16i64)));
    }

    #[test]
    fn test_malformed_radix_literals_stay_text() {
        for raw in ["0x", "0xg1", "-0x10", "0x+1", "0b2", "0o8"] {
            assert_eq!(CreativeId::parse(raw), CreativeId::Text(raw.into()), "{raw}");
        }
    }

    #[test]
    fn test_opaque_strings_stay_text() {
        assert_eq!(CreativeId::parse("a"), CreativeId::Text("a".into()));
        assert_eq!(CreativeId::parse(""), CreativeId::Text(String::new()));
        assert_eq!(CreativeId::parse("NaN"), CreativeId::Text("NaN".into()));
        assert_eq!(CreativeId::parse("inf"), CreativeId::Text("inf".into()));
    }

    #[test]
    fn test_number_and_numeric_string_are_equal() {
        let from_json: CreativeId = serde_json::from_value(json!(7)).unwrap();
        let from_str: CreativeId = serde_json::from_value(json!("7")).unwrap();
        assert_eq!(from_json, from_str);

        let mut set = HashSet::new();
        set.insert(from_json);
        assert!(set.contains(&from_str));
    }

    #[test]
    fn test_negative_zero_matches_zero() {
        assert_eq!(CreativeId::parse("-0"), CreativeId::parse("0"));
    }

    #[test]
    fn test_display() {
        assert_eq!(CreativeId::parse("12").to_string(), "12");
        assert_eq!(CreativeId::parse("2.5").to_string(), "2.5");
        assert_eq!(CreativeId::parse("abc").to_string(), "abc");
    }

    #[test]
    fn test_serialize_canonical_form() {
        assert_eq!(serde_json::to_value(CreativeId::parse("12")).unwrap(), json!(12));
        assert_eq!(serde_json::to_value(CreativeId::parse("x")).unwrap(), json!("x"));
    }

    #[test]
    fn test_same_as_ignores_display_fields() {
        let a = Creative::new("100").with_title("Cached");
        let b = Creative::new(100i64).with_title("Server Title");
        assert!(a.same_as(&b));
        assert!(!a.same_as(&Creative::new("101")));
    }

    #[test]
    fn test_extract_bare_creative() {
        let body = json!({"creative_id": 2, "title": "Network Title"});
        match extract_assignment(&body) {
            Assignment::Creative(c) => {
                assert_eq!(c.id, CreativeId::from(2i64));
                assert_eq!(c.title.as_deref(), Some("Network Title"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_extract_enveloped_creative() {
        let body = json!({"code": 0, "data": {"creative_id": "b", "title": "Fresh"}});
        match extract_assignment(&body) {
            Assignment::Creative(c) => assert_eq!(c.id, CreativeId::parse("b")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_extract_prefers_bare_form() {
        let body = json!({
            "code": 0,
            "creative_id": 1,
            "data": {"creative_id": 2}
        });
        match extract_assignment(&body) {
            Assignment::Creative(c) => assert_eq!(c.id, CreativeId::from(1i64)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_extract_empty_variants() {
        assert_eq!(
            extract_assignment(&json!({"code": 0})),
            Assignment::Empty { message: None }
        );
        assert_eq!(
            extract_assignment(&json!({"code": 40401, "message": "experiment paused"})),
            Assignment::Empty {
                message: Some("experiment paused".into())
            }
        );
        assert_eq!(
            extract_assignment(&json!({"creative_id": ""})),
            Assignment::Empty { message: None }
        );
        assert_eq!(
            extract_assignment(&json!({"creative_id": null})),
            Assignment::Empty { message: None }
        );
        assert_eq!(extract_assignment(&json!([1, 2])), Assignment::Empty { message: None });
    }

    #[test]
    fn test_null_optional_fields_accepted() {
        let body = json!({"creative_id": 3, "title": null, "selling_points": null});
        assert!(matches!(extract_assignment(&body), Assignment::Creative(_)));
    }

    proptest! {
        #[test]
        fn prop_integer_string_matches_number(n in -1_000_000i64..1_000_000) {
            prop_assert_eq!(CreativeId::parse(&n.to_string()), CreativeId::from(n));
        }

        #[test]
        fn prop_same_as_depends_on_id_only(
            id in "[a-z0-9]{1,8}",
            t1 in proptest::option::of("[A-Za-z ]{0,12}"),
            t2 in proptest::option::of("[A-Za-z ]{0,12}"),
        ) {
            let mut a = Creative::new(id.as_str());
            a.title = t1;
            let mut b = Creative::new(id.as_str());
            b.title = t2;
            prop_assert!(a.same_as(&b));
        }
    }
}
