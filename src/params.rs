//! Typed pipeline parameters.
//!
//! Each declared parameter validates and coerces one external input before a
//! run starts. Definitions are tagged by `type` in YAML:
//!
//! ```yaml
//! params:
//!   run-date: {type: datetime}
//!   source: {type: str, required: true}
//!   limit: {type: int, default: 100}
//!   mode: {type: choice, options: [full, incremental]}
//! ```

use std::fmt;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ParamError;

/// Rendering of naive datetime parameters; the fraction is omitted when zero.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Rendering of datetime parameters that carry a UTC offset.
pub const DATETIME_OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

/// A received datetime, keeping the UTC offset when the input had one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatetimeValue {
    Naive(NaiveDateTime),
    Offset(DateTime<FixedOffset>),
}

impl DatetimeValue {
    /// Wall-clock time as written in the input.
    pub fn naive_local(&self) -> NaiveDateTime {
        match self {
            DatetimeValue::Naive(dt) => *dt,
            DatetimeValue::Offset(dt) => dt.naive_local(),
        }
    }

    pub fn offset(&self) -> Option<FixedOffset> {
        match self {
            DatetimeValue::Naive(_) => None,
            DatetimeValue::Offset(dt) => Some(*dt.offset()),
        }
    }
}

impl fmt::Display for DatetimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatetimeValue::Naive(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            DatetimeValue::Offset(dt) => write!(f, "{}", dt.format(DATETIME_OFFSET_FORMAT)),
        }
    }
}

impl From<NaiveDateTime> for DatetimeValue {
    fn from(dt: NaiveDateTime) -> Self {
        DatetimeValue::Naive(dt)
    }
}

impl From<DateTime<FixedOffset>> for DatetimeValue {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        DatetimeValue::Offset(dt)
    }
}

/// A parameter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamSpec {
    Datetime(DatetimeParam),
    Str(StrParam),
    Int(IntParam),
    Choice(ChoiceParam),
}

/// Datetime parameter; an absent value becomes `default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatetimeParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Defaults to the local time at which the definition was decoded.
    #[serde(
        default = "now",
        deserialize_with = "deserialize_datetime",
        serialize_with = "serialize_datetime"
    )]
    pub default: DatetimeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<i64>,
}

/// Choice among an ordered, non-empty list of options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChoiceParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub options: Vec<String>,
}

impl ParamSpec {
    /// The `type` tag of this definition.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamSpec::Datetime(_) => "datetime",
            ParamSpec::Str(_) => "str",
            ParamSpec::Int(_) => "int",
            ParamSpec::Choice(_) => "choice",
        }
    }

    pub fn required(&self) -> bool {
        match self {
            ParamSpec::Datetime(p) => p.required,
            ParamSpec::Str(p) => p.required,
            ParamSpec::Int(p) => p.required,
            ParamSpec::Choice(p) => p.required,
        }
    }

    pub fn desc(&self) -> Option<&str> {
        match self {
            ParamSpec::Datetime(p) => p.desc.as_deref(),
            ParamSpec::Str(p) => p.desc.as_deref(),
            ParamSpec::Int(p) => p.desc.as_deref(),
            ParamSpec::Choice(p) => p.desc.as_deref(),
        }
    }

    /// Checks the definition invariants.
    ///
    /// Optional `str`/`int` parameters must carry a default and a choice must
    /// offer at least one option.
    pub fn validate(&self) -> Result<(), ParamError> {
        match self {
            ParamSpec::Datetime(_) => Ok(()),
            ParamSpec::Str(p) if !p.required && p.default.is_none() => {
                Err(ParamError::InvalidDefinition(
                    "optional str parameter needs a default".to_string(),
                ))
            }
            ParamSpec::Int(p) if !p.required && p.default.is_none() => {
                Err(ParamError::InvalidDefinition(
                    "optional int parameter needs a default".to_string(),
                ))
            }
            ParamSpec::Choice(p) if p.options.is_empty() => Err(ParamError::InvalidDefinition(
                "choice parameter needs at least one option".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Coerces an input into the canonical JSON value stored in `params`.
    ///
    /// `None` and JSON `null` both count as absent.
    pub fn receive(&self, value: Option<&Value>) -> Result<Value, ParamError> {
        match self {
            ParamSpec::Datetime(p) => p
                .receive_datetime(value)
                .map(|dt| Value::String(dt.to_string())),
            ParamSpec::Str(p) => Ok(p.receive(value).map(Value::String).unwrap_or(Value::Null)),
            ParamSpec::Int(p) => Ok(p.receive(value)?.map(Value::from).unwrap_or(Value::Null)),
            ParamSpec::Choice(p) => p.receive(value).map(Value::String),
        }
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

impl DatetimeParam {
    pub fn new() -> Self {
        Self {
            desc: None,
            required: false,
            default: now(),
        }
    }

    pub fn with_default(mut self, default: impl Into<DatetimeValue>) -> Self {
        self.default = default.into();
        self
    }

    /// Coerces an input into a datetime.
    ///
    /// Strings are parsed as ISO-8601; a date-only string is promoted to
    /// midnight. Fractional seconds and offsets are kept.
    pub fn receive_datetime(&self, value: Option<&Value>) -> Result<DatetimeValue, ParamError> {
        match present(value) {
            None => Ok(self.default),
            Some(Value::String(s)) => parse_datetime(s),
            Some(other) => Err(ParamError::Type {
                expected: "datetime string".to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Promotes a date to midnight of that day.
    pub fn receive_date(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(chrono::NaiveTime::MIN)
    }
}

impl Default for DatetimeParam {
    fn default() -> Self {
        Self::new()
    }
}

impl StrParam {
    /// Returns the default when absent, otherwise the string form of the value.
    pub fn receive(&self, value: Option<&Value>) -> Option<String> {
        match present(value) {
            None => self.default.clone(),
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

impl IntParam {
    pub fn receive(&self, value: Option<&Value>) -> Result<Option<i64>, ParamError> {
        match present(value) {
            None => Ok(self.default),
            Some(Value::Number(n)) if n.is_i64() => Ok(n.as_i64()),
            Some(other) => {
                let text = match other {
                    Value::String(s) => s.trim().to_string(),
                    v => v.to_string(),
                };
                text.parse::<i64>().map(Some).map_err(|_| ParamError::Type {
                    expected: "int".to_string(),
                    value: other.to_string(),
                })
            }
        }
    }
}

impl ChoiceParam {
    pub fn new(options: Vec<String>) -> Self {
        Self {
            desc: None,
            required: false,
            options,
        }
    }

    /// Returns the first option when absent, otherwise checks membership.
    pub fn receive(&self, value: Option<&Value>) -> Result<String, ParamError> {
        let value = match present(value) {
            None => {
                return self.options.first().cloned().ok_or_else(|| {
                    ParamError::InvalidDefinition(
                        "choice parameter needs at least one option".to_string(),
                    )
                })
            }
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        if !self.options.contains(&value) {
            return Err(ParamError::InvalidChoice {
                value,
                options: self.options.clone(),
            });
        }
        Ok(value)
    }
}

/// Parses ISO-8601 datetimes, RFC 3339 timestamps and plain dates.
pub fn parse_datetime(s: &str) -> Result<DatetimeValue, ParamError> {
    let s = s.trim();

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(DatetimeValue::Naive(dt));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(DatetimeValue::Offset(dt));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(DatetimeValue::Naive(date.and_time(chrono::NaiveTime::MIN)));
    }

    Err(ParamError::Parse {
        value: s.to_string(),
        expected: "ISO-8601 datetime".to_string(),
    })
}

fn now() -> DatetimeValue {
    let now = Local::now().naive_local();
    DatetimeValue::Naive(now.with_nanosecond(0).unwrap_or(now))
}

fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DatetimeValue, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_datetime(&raw).map_err(serde::de::Error::custom)
}

fn serialize_datetime<S>(value: &DatetimeValue, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}
