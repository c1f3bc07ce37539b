use std::fmt;

/// One positional parameter of a reduction, in canonical cache-key form.
///
/// Encodings never contain `_`, which is the element separator, so distinct
/// tuples always map to distinct keys:
///
/// | value          | encoding              |
/// |----------------|-----------------------|
/// | `Int(3)`       | `3`                   |
/// | `Float(30.0)`  | `3e1`                 |
/// | `Bool(true)`   | `true`                |
/// | `None`         | `none`                |
/// | `Str("a b")`   | `s.a%20b`             |
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            // shortest round-trip digits, always with an exponent
            ParamValue::Float(v) => write!(f, "{:e}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::None => f.write_str("none"),
            ParamValue::Str(s) => {
                f.write_str("s.")?;
                f.write_str(&percent_encode(s))
            }
        }
    }
}

/// Keeps `[A-Za-z0-9.-]`, writes every other byte as `%XX`. Never emits `_`.
fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        i64::try_from(v).map_or(ParamValue::Float(v as f64), ParamValue::Int)
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(ParamValue::Str(v.to_string()), ParamValue::Int)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ParamValue::None, Into::into)
    }
}

/// Percent-encoded `algorithm` followed by every parameter, each prefixed with `_`.
/// The name is escaped like string parameters, so the first `_` always ends it.
///
/// `cache_key("pca", &[3usize.into()]) == "pca_3"`.
pub fn cache_key(algorithm: &str, params: &[ParamValue]) -> String {
    let mut key = percent_encode(algorithm);
    for param in params {
        key.push('_');
        key.push_str(&param.to_string());
    }
    key
}
