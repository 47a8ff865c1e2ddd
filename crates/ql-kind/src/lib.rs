//! Named scalar/time kind descriptors and the coercion rules that turn a
//! matched string (or an already-typed JSON value) into a target type.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value as Json;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    UrlEncoded,
    DeepUrlEncoded,
    TimeIso8601,
    UnixMillisTime,
    /// Free-form `chrono` strftime layout, bound via the `"time:<layout>"` spec form.
    TimeLayout(String),
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::TimeLayout(layout) => write!(f, "time layout ({layout})"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KindError {
    #[error("unsupported kind ({0})")]
    UnsupportedKind(String),

    #[error("couldn't coerce value {value:?} to kind {kind}: {reason}")]
    Coercion {
        value: String,
        kind: String,
        reason: String,
    },
}

fn coercion_err(value: impl fmt::Debug, kind: &Kind, reason: impl Into<String>) -> KindError {
    KindError::Coercion {
        value: format!("{value:?}"),
        kind: kind.to_string(),
        reason: reason.into(),
    }
}

/// Parses a kind spec string into a `Kind`.
///
/// Recognizes the fixed names (`bool`, `int`, `int8`, ..., `string`,
/// `urlencoded`, `deepurlencoded`, `timeISO8601`, `timeUnixMilliseconds`) plus
/// the aliases `byte` (= `uint8`) and `rune` (= `int32`), plus the
/// `"time:<layout>"` prefix form which binds a `chrono` strftime layout.
pub fn kind_from_spec(spec: &str) -> Result<Kind, KindError> {
    let kind = match spec {
        "bool" => Kind::Bool,
        "int" => Kind::Int,
        "int8" => Kind::Int8,
        "int16" => Kind::Int16,
        "int32" => Kind::Int32,
        "int64" => Kind::Int64,
        "uint" => Kind::Uint,
        "uint8" => Kind::Uint8,
        "uint16" => Kind::Uint16,
        "uint32" => Kind::Uint32,
        "uint64" => Kind::Uint64,
        "float32" => Kind::Float32,
        "float64" => Kind::Float64,
        "string" => Kind::String,
        "urlencoded" => Kind::UrlEncoded,
        "deepurlencoded" => Kind::DeepUrlEncoded,
        "timeISO8601" => Kind::TimeIso8601,
        "timeUnixMilliseconds" => Kind::UnixMillisTime,
        "byte" => Kind::Uint8,
        "rune" => Kind::Int32,
        _ => {
            if let Some(layout) = spec.strip_prefix("time:") {
                Kind::TimeLayout(layout.to_string())
            } else {
                return Err(KindError::UnsupportedKind(spec.to_string()));
            }
        }
    };
    Ok(kind)
}

/// Value handed to `coerce`: a matched string, or an already-typed JSON
/// value (the JSON log parser's path, where numbers stay numbers).
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    Str(&'a str),
    Json(&'a Json),
}

/// Result of coercion. Time kinds produce `Time` directly since that's what
/// the caller needs for the event timestamp; everything else produces a
/// dynamically-typed JSON value for the event's field map.
#[derive(Debug, Clone)]
pub enum CoercedValue {
    Value(Json),
    Time(DateTime<Utc>),
}

impl CoercedValue {
    pub fn into_time(self) -> Option<DateTime<Utc>> {
        match self {
            CoercedValue::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_value(self) -> Json {
        match self {
            CoercedValue::Value(v) => v,
            CoercedValue::Time(t) => Json::String(t.to_rfc3339()),
        }
    }
}

pub fn coerce(kind: &Kind, input: Input) -> Result<CoercedValue, KindError> {
    match kind {
        Kind::Bool => coerce_str(kind, input, |s| {
            parse_go_bool(s).ok_or_else(|| "invalid bool".to_string())
        })
        .map(|b| CoercedValue::Value(Json::Bool(b))),
        Kind::Int8 => coerce_int(kind, input, i8::MIN as i64, i8::MAX as i64),
        Kind::Int16 => coerce_int(kind, input, i16::MIN as i64, i16::MAX as i64),
        Kind::Int | Kind::Int32 => coerce_int(kind, input, i32::MIN as i64, i32::MAX as i64),
        Kind::Int64 => coerce_int(kind, input, i64::MIN, i64::MAX),
        Kind::Uint8 => coerce_uint(kind, input, u8::MAX as u64),
        Kind::Uint16 => coerce_uint(kind, input, u16::MAX as u64),
        Kind::Uint | Kind::Uint32 => coerce_uint(kind, input, u32::MAX as u64),
        Kind::Uint64 => coerce_uint(kind, input, u64::MAX),
        Kind::Float32 | Kind::Float64 => coerce_float(kind, input),
        Kind::String => coerce_string(kind, input),
        Kind::UrlEncoded => {
            let s = expect_str(kind, input)?;
            let decoded = query_unescape(s)
                .map_err(|_| coercion_err(s, kind, "invalid percent-encoding"))?;
            Ok(CoercedValue::Value(Json::String(decoded)))
        }
        Kind::DeepUrlEncoded => {
            let s = expect_str(kind, input)?;
            Ok(CoercedValue::Value(Json::String(deep_url_decode(s))))
        }
        Kind::TimeIso8601 => {
            let s = expect_str(kind, input)?;
            let t = DateTime::parse_from_rfc3339(s)
                .map_err(|e| coercion_err(s, kind, e.to_string()))?;
            Ok(CoercedValue::Time(t.with_timezone(&Utc)))
        }
        Kind::UnixMillisTime => coerce_unix_millis(kind, input),
        Kind::TimeLayout(layout) => coerce_time_layout(kind, input, layout),
    }
}

fn expect_str<'a>(kind: &Kind, input: Input<'a>) -> Result<&'a str, KindError> {
    match input {
        Input::Str(s) => Ok(s),
        Input::Json(Json::String(s)) => Ok(s.as_str()),
        Input::Json(other) => Err(coercion_err(other, kind, "expected a string input")),
    }
}

fn coerce_str(kind: &Kind, input: Input, f: impl Fn(&str) -> Result<bool, String>) -> Result<bool, KindError> {
    let s = expect_str(kind, input)?;
    f(s).map_err(|reason| coercion_err(s, kind, reason))
}

fn coerce_string(kind: &Kind, input: Input) -> Result<CoercedValue, KindError> {
    match input {
        Input::Str(s) => Ok(CoercedValue::Value(Json::String(s.to_string()))),
        Input::Json(v) => {
            let _ = kind;
            Ok(CoercedValue::Value(v.clone()))
        }
    }
}

fn coerce_int(kind: &Kind, input: Input, min: i64, max: i64) -> Result<CoercedValue, KindError> {
    let n = match input {
        Input::Str(s) => s
            .parse::<i64>()
            .map_err(|e| coercion_err(s, kind, e.to_string()))?,
        Input::Json(v) => v
            .as_i64()
            .ok_or_else(|| coercion_err(v, kind, "not an integer"))?,
    };
    if n < min || n > max {
        return Err(coercion_err(n, kind, "out of range"));
    }
    Ok(CoercedValue::Value(Json::Number(n.into())))
}

fn coerce_uint(kind: &Kind, input: Input, max: u64) -> Result<CoercedValue, KindError> {
    let n = match input {
        Input::Str(s) => s
            .parse::<u64>()
            .map_err(|e| coercion_err(s, kind, e.to_string()))?,
        Input::Json(v) => v
            .as_u64()
            .ok_or_else(|| coercion_err(v, kind, "not an unsigned integer"))?,
    };
    if n > max {
        return Err(coercion_err(n, kind, "out of range"));
    }
    Ok(CoercedValue::Value(Json::Number(n.into())))
}

fn coerce_float(kind: &Kind, input: Input) -> Result<CoercedValue, KindError> {
    let n = match input {
        Input::Str(s) => s
            .parse::<f64>()
            .map_err(|e| coercion_err(s, kind, e.to_string()))?,
        Input::Json(v) => v
            .as_f64()
            .ok_or_else(|| coercion_err(v, kind, "not a number"))?,
    };
    let num = serde_json::Number::from_f64(n)
        .ok_or_else(|| coercion_err(n, kind, "not a finite number"))?;
    Ok(CoercedValue::Value(Json::Number(num)))
}

fn coerce_unix_millis(kind: &Kind, input: Input) -> Result<CoercedValue, KindError> {
    let millis = match input {
        Input::Str(s) => s
            .parse::<i64>()
            .map_err(|e| coercion_err(s, kind, e.to_string()))?,
        Input::Json(v) => v
            .as_i64()
            .ok_or_else(|| coercion_err(v, kind, "not an integer"))?,
    };
    let t = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| coercion_err(millis, kind, "out of range epoch millis"))?;
    Ok(CoercedValue::Time(t))
}

fn coerce_time_layout(kind: &Kind, input: Input, layout: &str) -> Result<CoercedValue, KindError> {
    let s = expect_str(kind, input)?;
    if let Ok(dt) = DateTime::parse_from_str(s, layout) {
        return Ok(CoercedValue::Time(dt.with_timezone(&Utc)));
    }
    let naive = NaiveDateTime::parse_from_str(s, layout)
        .map_err(|e| coercion_err(s, kind, e.to_string()))?;
    Ok(CoercedValue::Time(Utc.from_utc_datetime(&naive)))
}

/// Mirrors Go's `strconv.ParseBool`: accepts 1/t/T/TRUE/true/True and
/// 0/f/F/FALSE/false/False.
fn parse_go_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Mirrors Go's `url.QueryUnescape`: `+` decodes to space, `%XX` decodes to
/// the corresponding byte; malformed escapes are an error.
pub fn query_unescape(s: &str) -> Result<String, ()> {
    let replaced = s.replace('+', " ");
    percent_decode_strict(&replaced)
}

fn percent_decode_strict(s: &str) -> Result<String, ()> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(());
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).map_err(|_| ())?;
            let byte = u8::from_str_radix(hex, 16).map_err(|_| ())?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Repeatedly percent-decodes until a fixed point or a decode error, in
/// which case the last successfully-decoded intermediate is returned (this
/// is not itself an error condition, per the deep-url-encoded contract).
pub fn deep_url_decode(s: &str) -> String {
    let mut current = s.to_string();
    loop {
        match query_unescape(&current) {
            Ok(next) if next != current => current = next,
            _ => return current,
        }
    }
}
