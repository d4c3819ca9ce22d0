use thiserror::Error;

/// A dynamically-typed value cell.
///
/// The underlying engine has five fundamental storage classes: NULL,
/// INTEGER, REAL, TEXT, and BLOB. A cell is immutable once created; cursor
/// windows replace cells wholesale on mutation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit IEEE 754 floating-point number.
    Float(f64),
    /// A UTF-8 text string.
    Text(String),
    /// A binary large object.
    Blob(Vec<u8>),
}

/// The numeric type tag a cursor window reports for a cell.
///
/// Values match the field-type constants of the emulated cursor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ValueKind {
    Null = 0,
    Integer = 1,
    Float = 2,
    Text = 3,
    Blob = 4,
}

impl ValueKind {
    /// The raw tag value.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// A cell held a storage class the requested read cannot be applied to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not convert {actual} value to {requested}")]
pub struct InvalidConversion {
    /// `typeof()`-style name of the stored value.
    pub actual: &'static str,
    /// What the caller asked for.
    pub requested: &'static str,
}

impl Value {
    /// The type tag of this cell.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
            Self::Blob(_) => ValueKind::Blob,
        }
    }

    /// Returns true if this is a NULL cell.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the engine `typeof()` string for this value.
    pub const fn typeof_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Float(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }

    /// Convert to an integer following the engine's column coercion rules.
    ///
    /// - NULL -> 0
    /// - Integer -> itself
    /// - Float -> truncated to i64
    /// - Text -> numeric parse, 0 on failure
    /// - Blob -> 0
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_integer(&self) -> i64 {
        match self {
            Self::Null | Self::Blob(_) => 0,
            Self::Integer(i) => *i,
            Self::Float(f) => *f as i64,
            Self::Text(s) => s.trim().parse::<i64>().unwrap_or_else(|_| {
                // Fall back to a float parse, then truncate.
                s.trim().parse::<f64>().map_or(0, |f| f as i64)
            }),
        }
    }

    /// Convert to a float following the engine's column coercion rules.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_float(&self) -> f64 {
        match self {
            Self::Null | Self::Blob(_) => 0.0,
            Self::Integer(i) => *i as f64,
            Self::Float(f) => *f,
            Self::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        }
    }

    /// Convert to text following the engine's column coercion rules.
    ///
    /// NULL is absent (`None`); blobs are interpreted as UTF-8 with lossy
    /// replacement, matching the engine's `column_text` behavior.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(format_double(*f)),
            Self::Text(s) => Some(s.clone()),
            Self::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    /// Numeric read under cursor-window rules: like [`Self::to_float`], but
    /// a blob cell is an error rather than 0.
    fn cursor_number(&self, requested: &'static str) -> Result<f64, InvalidConversion> {
        match self {
            Self::Blob(_) => Err(InvalidConversion {
                actual: self.typeof_str(),
                requested,
            }),
            other => Ok(other.to_float()),
        }
    }

    /// Long read under cursor-window rules.
    #[allow(clippy::cast_possible_truncation)]
    pub fn cursor_long(&self) -> Result<i64, InvalidConversion> {
        self.cursor_number("long").map(|f| f as i64)
    }

    /// Double read under cursor-window rules.
    pub fn cursor_double(&self) -> Result<f64, InvalidConversion> {
        self.cursor_number("double")
    }

    /// String read under cursor-window rules: NULL is absent, numbers render
    /// as decimal text, and a blob cell is an error.
    pub fn cursor_text(&self) -> Result<Option<String>, InvalidConversion> {
        match self {
            Self::Blob(_) => Err(InvalidConversion {
                actual: self.typeof_str(),
                requested: "string",
            }),
            other => Ok(other.to_text()),
        }
    }

    /// Blob read under cursor-window rules.
    ///
    /// - Blob -> the stored bytes.
    /// - Text -> the UTF-8 bytes plus one trailing zero byte, reproducing
    ///   the engine's string storage convention.
    /// - NULL -> an empty byte vector (empty, not absent).
    /// - Integer/Float -> error.
    pub fn cursor_blob(&self) -> Result<Vec<u8>, InvalidConversion> {
        match self {
            Self::Null => Ok(Vec::new()),
            Self::Blob(b) => Ok(b.clone()),
            Self::Text(s) => {
                let mut bytes = Vec::with_capacity(s.len() + 1);
                bytes.extend_from_slice(s.as_bytes());
                bytes.push(0);
                Ok(bytes)
            }
            other => Err(InvalidConversion {
                actual: other.typeof_str(),
                requested: "blob",
            }),
        }
    }
}

/// Format a floating-point value as text, always keeping a decimal point so
/// REAL output is distinguishable from INTEGER (`120.0`, not `120`).
#[must_use]
pub fn format_double(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_owned();
    }
    if f.is_infinite() {
        return if f.is_sign_positive() {
            "Inf".to_owned()
        } else {
            "-Inf".to_owned()
        };
    }
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags() {
        assert_eq!(Value::Null.kind().code(), 0);
        assert_eq!(Value::Integer(1).kind().code(), 1);
        assert_eq!(Value::Float(1.0).kind().code(), 2);
        assert_eq!(Value::Text("x".into()).kind().code(), 3);
        assert_eq!(Value::Blob(vec![1]).kind().code(), 4);
    }

    #[test]
    fn to_integer_coercions() {
        assert_eq!(Value::Null.to_integer(), 0);
        assert_eq!(Value::Integer(42).to_integer(), 42);
        assert_eq!(Value::Float(3.7).to_integer(), 3);
        assert_eq!(Value::Text("12".into()).to_integer(), 12);
        assert_eq!(Value::Text("3.5".into()).to_integer(), 3);
        assert_eq!(Value::Text("twelve".into()).to_integer(), 0);
        assert_eq!(Value::Blob(vec![1, 2]).to_integer(), 0);
    }

    #[test]
    fn to_float_coercions() {
        assert_eq!(Value::Null.to_float(), 0.0);
        assert_eq!(Value::Integer(2).to_float(), 2.0);
        assert_eq!(Value::Text(" 2.5 ".into()).to_float(), 2.5);
        assert_eq!(Value::Text("junk".into()).to_float(), 0.0);
        assert_eq!(Value::Blob(vec![0x31]).to_float(), 0.0);
    }

    #[test]
    fn to_text_coercions() {
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::Integer(7).to_text().as_deref(), Some("7"));
        assert_eq!(Value::Float(5.0).to_text().as_deref(), Some("5.0"));
        assert_eq!(Value::Text("ab".into()).to_text().as_deref(), Some("ab"));
        assert_eq!(
            Value::Blob(b"hi".to_vec()).to_text().as_deref(),
            Some("hi")
        );
    }

    #[test]
    fn cursor_long_rejects_blob() {
        assert_eq!(Value::Text("9".into()).cursor_long(), Ok(9));
        assert_eq!(Value::Null.cursor_long(), Ok(0));
        assert!(Value::Blob(vec![9]).cursor_long().is_err());
        assert!(Value::Blob(vec![9]).cursor_double().is_err());
    }

    #[test]
    fn cursor_text_rejects_blob() {
        assert_eq!(Value::Null.cursor_text(), Ok(None));
        assert_eq!(
            Value::Float(1.5).cursor_text(),
            Ok(Some("1.5".to_owned()))
        );
        assert!(Value::Blob(vec![1]).cursor_text().is_err());
    }

    #[test]
    fn cursor_blob_from_text_appends_terminator() {
        let bytes = Value::Text("ab".into()).cursor_blob().unwrap();
        assert_eq!(bytes, vec![0x61, 0x62, 0x00]);
    }

    #[test]
    fn cursor_blob_from_null_is_empty_not_absent() {
        assert_eq!(Value::Null.cursor_blob().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn cursor_blob_identity_and_errors() {
        assert_eq!(
            Value::Blob(vec![1, 2, 3]).cursor_blob().unwrap(),
            vec![1, 2, 3]
        );
        assert!(Value::Integer(1).cursor_blob().is_err());
        assert!(Value::Float(1.0).cursor_blob().is_err());
    }

    #[test]
    fn format_double_keeps_decimal_point() {
        assert_eq!(format_double(120.0), "120.0");
        assert_eq!(format_double(0.0), "0.0");
        assert_eq!(format_double(3.25), "3.25");
        assert_eq!(format_double(-2.0), "-2.0");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(f64::INFINITY), "Inf");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn integer_text_round_trips(i in any::<i64>()) {
                prop_assert_eq!(Value::Text(i.to_string()).to_integer(), i);
            }

            #[test]
            fn blob_round_trips(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
                prop_assert_eq!(Value::Blob(bytes.clone()).cursor_blob().unwrap(), bytes);
            }

            #[test]
            fn text_blob_read_is_terminated(s in "[a-zA-Z0-9 ]{0,32}") {
                let bytes = Value::Text(s.clone()).cursor_blob().unwrap();
                prop_assert_eq!(bytes.len(), s.len() + 1);
                prop_assert_eq!(bytes.last().copied(), Some(0));
            }
        }
    }
}
