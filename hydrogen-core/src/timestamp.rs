//! ISO-8601 UTC millisecond-precision timestamps, per spec section 6.
//!
//! Parsers accept both the millisecond-fractional and whole-second forms;
//! this crate always emits the fractional form with a trailing `Z`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    // Accept both `...sssZ` and bare-second `...Z` forms; RFC3339 parsing
    // already tolerates a missing fractional part.
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    format(ts).serialize(s)
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse(&raw).map_err(|e| D::Error::custom(format!("invalid timestamp `{raw}`: {e}")))
}
