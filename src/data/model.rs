use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MetadataValue – a single metadata field or extracted result
// ---------------------------------------------------------------------------

/// A dynamically-typed value used for metadata fields and for the results
/// collected into plate tables.
/// Must be `Ord` so it can sit in `BTreeSet`s used by value-set filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(#[serde(with = "float_text")] f64),
    Bool(bool),
    /// ISO-8601 date string kept as text for simplicity.
    Date(String),
    Null,
}

// -- Manual Eq/Ord so we can put MetadataValue in BTreeSet --

impl PartialEq for MetadataValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use MetadataValue::*;
        fn discriminant(v: &MetadataValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) | (Date(a), Date(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for MetadataValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            MetadataValue::String(s) | MetadataValue::Date(s) => s.hash(state),
            MetadataValue::Integer(i) => i.hash(state),
            MetadataValue::Float(f) => f.to_bits().hash(state),
            MetadataValue::Bool(b) => b.hash(state),
            MetadataValue::Null => {}
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Date(d) => write!(f, "{d}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    /// Try to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Text content of string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) | MetadataValue::Date(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetadataValue::Null)
    }

    /// Best-effort typing of a textual value (metadata keywords are stored as text).
    pub fn guess(s: &str) -> MetadataValue {
        if s.is_empty() {
            return MetadataValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return MetadataValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return MetadataValue::Float(f);
        }
        if s == "true" || s == "false" {
            return MetadataValue::Bool(s == "true");
        }
        MetadataValue::String(s.to_string())
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<usize> for MetadataValue {
    fn from(i: usize) -> Self {
        MetadataValue::Integer(i as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl<T: Into<MetadataValue>> From<Option<T>> for MetadataValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(MetadataValue::Null)
    }
}

/// Side table of a sample: keyword → value.
pub type Meta = BTreeMap<String, MetadataValue>;

// ---------------------------------------------------------------------------
// Non-finite floats in JSON
// ---------------------------------------------------------------------------

/// JSON has no NaN or infinity; those are written as the strings `"NaN"`,
/// `"inf"` and `"-inf"` and every other value as a plain number.
mod float_text {
    use serde::de::{self, Deserializer, Unexpected};
    use serde::{Deserialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::invalid_value(
                    Unexpected::Str(other),
                    &"a number, \"NaN\", \"inf\" or \"-inf\"",
                )),
            },
        }
    }
}

/// [`float_text`] applied to every cell of a column-major table.
mod float_columns {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Cell(#[serde(with = "super::float_text")] f64);

    pub fn serialize<S: Serializer>(
        columns: &[Vec<f64>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let cells: Vec<Vec<Cell>> = columns
            .iter()
            .map(|col| col.iter().copied().map(Cell).collect())
            .collect();
        cells.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<f64>>, D::Error> {
        let cells = Vec::<Vec<Cell>>::deserialize(deserializer)?;
        Ok(cells
            .into_iter()
            .map(|col| col.into_iter().map(|Cell(v)| v).collect())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// EventTable – the bulk payload of one sample
// ---------------------------------------------------------------------------

/// Column-oriented table of recorded events: one `f64` column per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTable {
    /// Ordered channel names.
    pub channels: Vec<String>,
    /// One column per channel, all of the same length.
    #[serde(with = "float_columns")]
    pub columns: Vec<Vec<f64>>,
}

impl EventTable {
    pub fn new(channels: Vec<String>, columns: Vec<Vec<f64>>) -> anyhow::Result<Self> {
        if channels.len() != columns.len() {
            anyhow::bail!(
                "{} channel names given for {} columns",
                channels.len(),
                columns.len()
            );
        }
        if let Some(first) = columns.first() {
            if let Some((i, col)) = columns
                .iter()
                .enumerate()
                .find(|(_, c)| c.len() != first.len())
            {
                anyhow::bail!(
                    "channel '{}' has {} events but '{}' has {}",
                    channels[i],
                    col.len(),
                    channels[0],
                    first.len()
                );
            }
        }
        Ok(Self { channels, columns })
    }

    /// Number of recorded events (rows).
    pub fn num_events(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// `(events, channels)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_events(), self.channels.len())
    }

    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.channels
            .iter()
            .position(|c| c == name)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c == name)
    }
}

/// Payloads whose dimensions can be reported without interpreting them.
pub trait Shaped {
    fn shape(&self) -> (usize, usize);
}

impl Shaped for EventTable {
    fn shape(&self) -> (usize, usize) {
        EventTable::shape(self)
    }
}
