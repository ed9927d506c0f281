//! Argument extraction shared by every tool handler. The gateway has already
//! checked shape against the schema; these helpers re-read values with domain
//! rules attached (non-empty strings, parseable ids, exact decimals) and fail
//! with sentences a user can act on.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

pub fn required_str<'a>(arguments: &'a Value, field: &str) -> Result<&'a str> {
    match arguments.get(field) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim()),
        Some(Value::String(_)) => bail!("field `{field}` must not be empty"),
        Some(_) => bail!("field `{field}` must be a string"),
        None => bail!("missing required field `{field}`"),
    }
}

pub fn optional_str<'a>(arguments: &'a Value, field: &str) -> Result<Option<&'a str>> {
    match arguments.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => {
            let trimmed = value.trim();
            Ok((!trimmed.is_empty()).then_some(trimmed))
        }
        Some(_) => bail!("field `{field}` must be a string"),
    }
}

pub fn required_id(arguments: &Value, field: &str) -> Result<Uuid> {
    let raw = required_str(arguments, field)?;
    Uuid::parse_str(raw).with_context(|| format!("field `{field}` is not a valid id"))
}

pub fn optional_id(arguments: &Value, field: &str) -> Result<Option<Uuid>> {
    match optional_str(arguments, field)? {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .with_context(|| format!("field `{field}` is not a valid id")),
    }
}

/// Decimals go through their string form so float artifacts never leak into
/// stored amounts.
pub fn required_decimal(arguments: &Value, field: &str) -> Result<Decimal> {
    match arguments.get(field) {
        Some(Value::Number(number)) => Decimal::from_str(&number.to_string())
            .with_context(|| format!("field `{field}` is not a usable amount")),
        Some(Value::String(raw)) => Decimal::from_str(raw.trim())
            .with_context(|| format!("field `{field}` is not a usable amount")),
        Some(_) => bail!("field `{field}` must be a number"),
        None => bail!("missing required field `{field}`"),
    }
}

pub fn optional_decimal(arguments: &Value, field: &str) -> Result<Option<Decimal>> {
    match arguments.get(field) {
        None | Some(Value::Null) => Ok(None),
        _ => required_decimal(arguments, field).map(Some),
    }
}

pub fn required_bool(arguments: &Value, field: &str) -> Result<bool> {
    match arguments.get(field) {
        Some(Value::Bool(value)) => Ok(*value),
        Some(_) => bail!("field `{field}` must be true or false"),
        None => bail!("missing required field `{field}`"),
    }
}

pub fn optional_bool(arguments: &Value, field: &str) -> Result<Option<bool>> {
    match arguments.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => bail!("field `{field}` must be true or false"),
    }
}

pub fn optional_u32(arguments: &Value, field: &str) -> Result<Option<u32>> {
    match arguments.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => match number.as_u64() {
            Some(value) if value <= u64::from(u32::MAX) => Ok(Some(value as u32)),
            _ => bail!("field `{field}` must be a small whole number"),
        },
        Some(_) => bail!("field `{field}` must be a whole number"),
    }
}

pub fn required_datetime(arguments: &Value, field: &str) -> Result<DateTime<Utc>> {
    let raw = required_str(arguments, field)?;
    parse_datetime(raw).with_context(|| format!("field `{field}` must be an RFC 3339 timestamp"))
}

pub fn optional_datetime(arguments: &Value, field: &str) -> Result<Option<DateTime<Utc>>> {
    match optional_str(arguments, field)? {
        None => Ok(None),
        Some(raw) => parse_datetime(raw)
            .map(Some)
            .with_context(|| format!("field `{field}` must be an RFC 3339 timestamp")),
    }
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|parsed| parsed.with_timezone(&Utc))
}
