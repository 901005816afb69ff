//! Lenient parsing of remote-store JSON into typed raw records.
//!
//! Magento payloads are loosely typed: numeric fields arrive as numbers or
//! strings, ids may be missing, and dates come in more than one format. This
//! module converts each raw `serde_json::Value` into a [`RawOrder`] or
//! [`RawProduct`] without ever failing — absent or malformed fields become
//! `None` and are counted downstream by the reconciler. Keeping the parser
//! here isolates the rest of the pipeline from upstream schema drift.

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// An order as pulled from the remote API, before reconciliation.
///
/// All fields that the upstream can omit or garble are optional; the
/// reconciler decides what is fatal (missing id) and what is repaired
/// (bad date).
#[derive(Debug, Clone, PartialEq)]
pub struct RawOrder {
    /// Source system's order id (`increment_id`, falling back to `entity_id`).
    pub external_id: Option<String>,
    /// Raw date string exactly as received; parsed by the reconciler.
    pub created_at: Option<String>,
    pub grand_total: Option<Decimal>,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub items_count: i32,
    pub status: Option<String>,
    pub store_view: Option<String>,
    pub payment_method: Option<String>,
}

impl RawOrder {
    /// Extracts a [`RawOrder`] from a raw order object. Never fails; missing
    /// or malformed fields become `None`.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let external_id = string_field(value, "increment_id")
            .or_else(|| lenient_string(value.get("entity_id")));

        let customer_name = match (
            string_field(value, "customer_firstname"),
            string_field(value, "customer_lastname"),
        ) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(one), None) | (None, Some(one)) => Some(one),
            (None, None) => None,
        };

        let payment_method = value
            .get("payment")
            .and_then(|p| p.get("method"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        Self {
            external_id,
            created_at: string_field(value, "created_at"),
            grand_total: decimal_field(value, "grand_total"),
            customer_id: lenient_string(value.get("customer_email")),
            customer_name,
            items_count: int_field(value, "total_item_count").unwrap_or(0),
            status: string_field(value, "status"),
            store_view: string_field(value, "store_name"),
            payment_method,
        }
    }
}

/// A product as pulled from the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProduct {
    /// Source system's product identifier (`sku`, falling back to `id`).
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub status: Option<String>,
    pub updated_at: Option<String>,
}

impl RawProduct {
    /// Extracts a [`RawProduct`] from a raw product object. Never fails.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self {
            external_id: string_field(value, "sku").or_else(|| lenient_string(value.get("id"))),
            name: string_field(value, "name"),
            price: decimal_field(value, "price"),
            status: lenient_string(value.get("status")),
            updated_at: string_field(value, "updated_at"),
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Accepts strings and numbers; Magento emits ids both ways.
fn lenient_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts numeric or string-encoded amounts (`12.5` or `"12.50"`).
fn decimal_field(value: &Value, key: &str) -> Option<Decimal> {
    match value.get(key)? {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn int_field(value: &Value, key: &str) -> Option<i32> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}
