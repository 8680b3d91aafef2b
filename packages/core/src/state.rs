//! Declarative reactive state.
//!
//! A state struct holds its reactive fields as `Signal<T>`s; the
//! `#[derive(State)]` macro (from `tether-core-macro`) generates the
//! drain/hydrate plumbing over them. Drained snapshots are plain JSON and
//! are what hot reload uses to carry state across a code swap.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Versioned snapshot of a state instance's reactive fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(rename = "__version__")]
    pub version: u32,
    pub values: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("field `{field}` failed to serialize: {source}")]
    Serialize {
        field: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("field `{field}` failed to deserialize: {source}")]
    Deserialize {
        field: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("snapshot version {found} is newer than supported version {supported}")]
    VersionTooNew { found: u32, supported: u32 },
    #[error("query param `{param}`: {source}")]
    QueryParam {
        param: String,
        #[source]
        source: CodecError,
    },
}

/// A reactive state object with drain/hydrate support.
///
/// Implemented by `#[derive(State)]`; manual implementations are fine for
/// states whose persistence needs custom handling.
pub trait State: 'static {
    /// Schema version of the drained snapshot.
    fn state_version() -> u32
    where
        Self: Sized,
    {
        1
    }

    /// Snapshot every persisted field. Reads are untracked.
    fn drain(&self) -> Result<StateSnapshot, StateError>;

    /// Write a snapshot back into the signals. Unknown fields are ignored;
    /// a version mismatch goes through [`State::migrate`] first.
    fn hydrate(&self, snapshot: StateSnapshot) -> Result<(), StateError>;

    /// Adapt `values` drained at schema version `from` to version `to`.
    /// The default keeps them unchanged.
    fn migrate(&self, from: u32, to: u32, values: Map<String, Value>) -> Map<String, Value> {
        let _ = (from, to);
        values
    }

    /// Runs after construction (and after every hydrate).
    fn post_init(&self) {}

    /// Tear down owned effects and computeds.
    fn dispose(&self) {}

    /// Fields participating in URL query-string sync.
    fn query_params(&self) -> Vec<QueryParamField> {
        Vec::new()
    }
}

/// One state field bound to a URL query parameter.
pub struct QueryParamField {
    /// Parameter name in the query string.
    pub name: String,
    /// Encode the current value; `None` omits the parameter.
    pub read: Box<dyn Fn() -> Option<String>>,
    /// Decode and write an incoming value.
    pub write: Box<dyn Fn(&str) -> Result<(), StateError>>,
    /// Clear the field when the parameter disappears from the URL.
    pub clear: Box<dyn Fn()>,
}

/// Receives the query-param bindings of freshly created state instances.
/// The router's route context implements this; the session provides it
/// through the render environment.
pub trait QueryParamSink {
    fn bind(&self, fields: Vec<QueryParamField>);
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("invalid integer: `{0}`")]
    Int(String),
    #[error("invalid float: `{0}`")]
    Float(String),
    #[error("invalid boolean: `{0}` (expected `true` or `false`)")]
    Bool(String),
    #[error("invalid date: `{0}` (expected YYYY-MM-DD)")]
    Date(String),
    #[error("invalid datetime: `{0}` (expected ISO 8601)")]
    DateTime(String),
    #[error("{0}")]
    Other(String),
}

/// Encoding between state field values and query-string text.
///
/// Lists are comma-separated with `\`-escaped commas and backslashes so
/// values containing commas round-trip.
pub trait QueryParamCodec: Sized {
    fn encode(&self) -> String;
    fn decode(text: &str) -> Result<Self, CodecError>;
}

impl QueryParamCodec for String {
    fn encode(&self) -> String {
        self.clone()
    }
    fn decode(text: &str) -> Result<Self, CodecError> {
        Ok(text.to_string())
    }
}

macro_rules! int_codec {
    ($($ty:ty),*) => {$(
        impl QueryParamCodec for $ty {
            fn encode(&self) -> String {
                self.to_string()
            }
            fn decode(text: &str) -> Result<Self, CodecError> {
                text.parse().map_err(|_| CodecError::Int(text.to_string()))
            }
        }
    )*};
}

int_codec!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl QueryParamCodec for f64 {
    fn encode(&self) -> String {
        self.to_string()
    }
    fn decode(text: &str) -> Result<Self, CodecError> {
        text.parse().map_err(|_| CodecError::Float(text.to_string()))
    }
}

impl QueryParamCodec for f32 {
    fn encode(&self) -> String {
        self.to_string()
    }
    fn decode(text: &str) -> Result<Self, CodecError> {
        text.parse().map_err(|_| CodecError::Float(text.to_string()))
    }
}

impl QueryParamCodec for bool {
    fn encode(&self) -> String {
        if *self { "true" } else { "false" }.to_string()
    }
    fn decode(text: &str) -> Result<Self, CodecError> {
        match text {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(CodecError::Bool(other.to_string())),
        }
    }
}

impl QueryParamCodec for chrono::NaiveDate {
    fn encode(&self) -> String {
        self.format("%Y-%m-%d").to_string()
    }
    fn decode(text: &str) -> Result<Self, CodecError> {
        text.parse().map_err(|_| CodecError::Date(text.to_string()))
    }
}

/// Datetimes travel as ISO 8601. Offsets are honored and the value is
/// normalized to UTC; a naive datetime is taken to already be UTC.
impl QueryParamCodec for chrono::DateTime<chrono::Utc> {
    fn encode(&self) -> String {
        self.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
    }
    fn decode(text: &str) -> Result<Self, CodecError> {
        if let Ok(aware) = chrono::DateTime::parse_from_rfc3339(text) {
            return Ok(aware.with_timezone(&chrono::Utc));
        }
        text.parse::<chrono::NaiveDateTime>()
            .map(|naive| naive.and_utc())
            .map_err(|_| CodecError::DateTime(text.to_string()))
    }
}

impl<T: QueryParamCodec> QueryParamCodec for Option<T> {
    fn encode(&self) -> String {
        match self {
            Some(value) => value.encode(),
            None => String::new(),
        }
    }
    fn decode(text: &str) -> Result<Self, CodecError> {
        if text.is_empty() {
            Ok(None)
        } else {
            T::decode(text).map(Some)
        }
    }
}

impl<T: QueryParamCodec> QueryParamCodec for Vec<T> {
    fn encode(&self) -> String {
        self.iter()
            .map(|item| escape_list_item(&item.encode()))
            .collect::<Vec<_>>()
            .join(",")
    }
    fn decode(text: &str) -> Result<Self, CodecError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        split_list(text)
            .into_iter()
            .map(|item| T::decode(&item))
            .collect()
    }
}

fn escape_list_item(item: &str) -> String {
    item.replace('\\', "\\\\").replace(',', "\\,")
}

fn split_list(text: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == ',' {
            items.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    items.push(current);
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_codec_escapes_commas() {
        let values = vec!["a,b".to_string(), "c\\d".to_string(), "plain".to_string()];
        let encoded = values.encode();
        assert_eq!(encoded, "a\\,b,c\\\\d,plain");
        let decoded = Vec::<String>::decode(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn scalar_codecs_round_trip() {
        assert_eq!(i64::decode(&42i64.encode()).unwrap(), 42);
        assert_eq!(bool::decode(&true.encode()).unwrap(), true);
        assert_eq!(Option::<i32>::decode("").unwrap(), None);
        assert_eq!(Option::<i32>::decode("7").unwrap(), Some(7));
    }

    #[test]
    fn bad_int_is_an_error() {
        assert!(matches!(i32::decode("seven"), Err(CodecError::Int(_))));
    }

    #[test]
    fn date_codec_uses_iso_days() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(date.encode(), "2024-03-09");
        assert_eq!(chrono::NaiveDate::decode("2024-03-09").unwrap(), date);
        assert!(matches!(
            chrono::NaiveDate::decode("03/09/2024"),
            Err(CodecError::Date(_))
        ));
    }

    #[test]
    fn datetime_codec_normalizes_to_utc() {
        use chrono::{DateTime, Utc};

        let utc = DateTime::<Utc>::decode("2024-03-09T12:30:00Z").unwrap();
        assert_eq!(utc.encode(), "2024-03-09T12:30:00Z");

        // An explicit offset converts to UTC.
        let offset = DateTime::<Utc>::decode("2024-03-09T12:30:00+02:00").unwrap();
        assert_eq!(offset.encode(), "2024-03-09T10:30:00Z");

        // A naive datetime is taken as already-UTC.
        let naive = DateTime::<Utc>::decode("2024-03-09T12:30:00").unwrap();
        assert_eq!(naive, utc);

        assert!(matches!(
            DateTime::<Utc>::decode("not-a-time"),
            Err(CodecError::DateTime(_))
        ));
    }
}
