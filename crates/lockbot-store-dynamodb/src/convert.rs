//! Conversions between JSON items and DynamoDB attribute maps, and
//! condition expression building.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use lockbot_core::attr;
use lockbot_core::store::{Condition, Item};
use lockbot_core::BackendError;
use serde_json::{Number, Value};

pub(crate) type AttributeMap = HashMap<String, AttributeValue>;

pub(crate) fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

pub(crate) fn from_attribute(value: &AttributeValue) -> Result<Value, BackendError> {
    let value = match value {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => Value::Number(parse_number(n)?),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::L(values) => Value::Array(
            values
                .iter()
                .map(from_attribute)
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), from_attribute(v)?)))
                .collect::<Result<_, BackendError>>()?,
        ),
        AttributeValue::Ss(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Ns(values) => Value::Array(
            values
                .iter()
                .map(|n| parse_number(n).map(Value::Number))
                .collect::<Result<_, _>>()?,
        ),
        other => {
            return Err(BackendError::Other(format!(
                "unsupported attribute type: {other:?}"
            )))
        }
    };
    Ok(value)
}

fn parse_number(n: &str) -> Result<Number, BackendError> {
    if let Ok(i) = n.parse::<i64>() {
        return Ok(Number::from(i));
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| BackendError::Other(format!("invalid number attribute: {n}")))
}

/// JSON item to attribute map, with the hash key added under `key_attr`.
pub(crate) fn to_attribute_map(key_attr: &str, key: &str, item: &Item) -> AttributeMap {
    let mut map: AttributeMap = item
        .iter()
        .map(|(k, v)| (k.clone(), to_attribute(v)))
        .collect();
    map.insert(key_attr.to_string(), AttributeValue::S(key.to_string()));
    map
}

/// Attribute map to JSON item, dropping the hash key attribute.
pub(crate) fn from_attribute_map(key_attr: &str, map: &AttributeMap) -> Result<Item, BackendError> {
    map.iter()
        .filter(|(k, _)| k.as_str() != key_attr)
        .map(|(k, v)| Ok((k.clone(), from_attribute(v)?)))
        .collect()
}

/// A `ConditionExpression` with its placeholder maps.
#[derive(Debug, Default)]
pub(crate) struct ConditionExpr {
    pub expression: String,
    pub names: HashMap<String, String>,
    pub values: AttributeMap,
}

impl ConditionExpr {
    pub fn values(&self) -> Option<AttributeMap> {
        (!self.values.is_empty()).then(|| self.values.clone())
    }
}

/// Build the DynamoDB expression for `condition`. `None` means unconditional.
pub(crate) fn condition_expression(condition: &Condition, key_attr: &str) -> Option<ConditionExpr> {
    let mut expr = ConditionExpr::default();
    let now = match condition {
        Condition::Always => return None,
        Condition::AbsentOrExpired { now }
        | Condition::HeldBy { now, .. }
        | Condition::Live { now }
        | Condition::Expired { now } => now,
    };
    expr.names.insert("#exp".into(), attr::EXPIRES_AT.to_string());
    expr.values.insert(
        ":now".into(),
        AttributeValue::N(now.timestamp_millis().to_string()),
    );

    expr.expression = match condition {
        Condition::AbsentOrExpired { .. } => {
            expr.names.insert("#pk".into(), key_attr.to_string());
            "attribute_not_exists(#pk) OR #exp < :now".to_string()
        }
        Condition::HeldBy { holder, .. } => {
            expr.names.insert("#holder".into(), attr::HOLDER.to_string());
            expr.values.insert(":holder".into(), AttributeValue::S(holder.clone()));
            "#holder = :holder AND (attribute_not_exists(#exp) OR #exp >= :now)".to_string()
        }
        Condition::Live { .. } => {
            expr.names.insert("#pk".into(), key_attr.to_string());
            "attribute_exists(#pk) AND (attribute_not_exists(#exp) OR #exp >= :now)".to_string()
        }
        Condition::Expired { .. } => "#exp < :now".to_string(),
        Condition::Always => return None,
    };
    Some(expr)
}
