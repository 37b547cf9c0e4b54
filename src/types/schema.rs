use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Type, Value};

/// Version of the `txn` schema compiled programs are checked against.
///
/// Stored in every compiled payload header; payloads from another schema
/// version are rejected on decode.
pub const SCHEMA_VERSION: u16 = 1;

/// Name of the single variable in scope of a rule definition.
pub const VARIABLE: &str = "txn";

/// The transaction a rule is evaluated against.
///
/// Field names follow the expression schema (`txn.Amount`, `txn.RiskScore`, ...),
/// so a `Txn` deserialized from JSON uses the same keys a rule author writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Txn {
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub currency: String,
    pub amount: f64,
    pub risk_score: i64,
    /// Arbitrary nested data supplied by the caller.
    pub custom_data: serde_json::Map<String, serde_json::Value>,
    pub custom_bools: HashMap<String, bool>,
    pub custom_floats: HashMap<String, f64>,
    pub custom_strings: HashMap<String, String>,
    pub aggregates: HashMap<String, f64>,
}

/// A field of [`Txn`] addressable from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnField {
    Name,
    Type,
    Currency,
    Amount,
    RiskScore,
    CustomData,
    CustomBools,
    CustomFloats,
    CustomStrings,
    Aggregates,
}

impl TxnField {
    /// Every field, in slot order. The slot order is part of the payload format.
    pub const ALL: [TxnField; 10] = [
        TxnField::Name,
        TxnField::Type,
        TxnField::Currency,
        TxnField::Amount,
        TxnField::RiskScore,
        TxnField::CustomData,
        TxnField::CustomBools,
        TxnField::CustomFloats,
        TxnField::CustomStrings,
        TxnField::Aggregates,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TxnField::Name => "Name",
            TxnField::Type => "Type",
            TxnField::Currency => "Currency",
            TxnField::Amount => "Amount",
            TxnField::RiskScore => "RiskScore",
            TxnField::CustomData => "CustomData",
            TxnField::CustomBools => "CustomBools",
            TxnField::CustomFloats => "CustomFloats",
            TxnField::CustomStrings => "CustomStrings",
            TxnField::Aggregates => "Aggregates",
        }
    }

    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    #[must_use]
    pub fn ty(self) -> Type {
        match self {
            TxnField::Name | TxnField::Type | TxnField::Currency => Type::String,
            TxnField::Amount => Type::Double,
            TxnField::RiskScore => Type::Int,
            TxnField::CustomData => Type::map(Type::Dyn),
            TxnField::CustomBools => Type::map(Type::Bool),
            TxnField::CustomFloats | TxnField::Aggregates => Type::map(Type::Double),
            TxnField::CustomStrings => Type::map(Type::String),
        }
    }

    #[allow(clippy::cast_possible_truncation)] // ALL has 10 entries
    pub(crate) fn slot(self) -> u8 {
        Self::ALL
            .iter()
            .position(|f| *f == self)
            .map_or(u8::MAX, |i| i as u8)
    }

    pub(crate) fn from_slot(slot: u8) -> Option<Self> {
        Self::ALL.get(usize::from(slot)).copied()
    }

    /// Read the whole field as a value. Map fields are copied.
    pub(crate) fn read(self, txn: &Txn) -> Value {
        match self {
            TxnField::Name => Value::String(txn.name.clone()),
            TxnField::Type => Value::String(txn.kind.clone()),
            TxnField::Currency => Value::String(txn.currency.clone()),
            TxnField::Amount => Value::Double(txn.amount),
            TxnField::RiskScore => Value::Int(txn.risk_score),
            TxnField::CustomData => Value::Map(
                txn.custom_data
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
            TxnField::CustomBools => map_value(&txn.custom_bools, |v| Value::Bool(*v)),
            TxnField::CustomFloats => map_value(&txn.custom_floats, |v| Value::Double(*v)),
            TxnField::CustomStrings => map_value(&txn.custom_strings, |v| Value::String(v.clone())),
            TxnField::Aggregates => map_value(&txn.aggregates, |v| Value::Double(*v)),
        }
    }

    /// Look up a single key of a map field without copying the map.
    ///
    /// Returns `None` for a missing key or when the field is not a map.
    pub(crate) fn entry(self, txn: &Txn, key: &str) -> Option<Value> {
        match self {
            TxnField::CustomData => txn.custom_data.get(key).map(Value::from),
            TxnField::CustomBools => txn.custom_bools.get(key).map(|v| Value::Bool(*v)),
            TxnField::CustomFloats => txn.custom_floats.get(key).map(|v| Value::Double(*v)),
            TxnField::CustomStrings => txn.custom_strings.get(key).map(|v| Value::String(v.clone())),
            TxnField::Aggregates => txn.aggregates.get(key).map(|v| Value::Double(*v)),
            _ => None,
        }
    }

    pub(crate) fn is_map(self) -> bool {
        matches!(self.ty(), Type::Map(_))
    }
}

fn map_value<T>(map: &HashMap<String, T>, f: impl Fn(&T) -> Value) -> Value {
    Value::Map(map.iter().map(|(k, v)| (k.clone(), f(v))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_round_trip() {
        for field in TxnField::ALL {
            assert_eq!(TxnField::from_slot(field.slot()), Some(field));
        }
        assert_eq!(TxnField::from_slot(10), None);
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert_eq!(TxnField::lookup("Amount"), Some(TxnField::Amount));
        assert_eq!(TxnField::lookup("amount"), None);
    }

    #[test]
    fn txn_deserializes_from_schema_names() {
        let txn: Txn = serde_json::from_value(serde_json::json!({
            "Name": "wire",
            "Type": "debit",
            "Amount": 12.5,
            "RiskScore": 7,
            "CustomBools": {"vip": true},
            "CustomData": {"device": {"os": "ios"}}
        }))
        .unwrap();
        assert_eq!(txn.kind, "debit");
        assert_eq!(txn.risk_score, 7);
        assert!(txn.custom_bools["vip"]);
        assert!(txn.currency.is_empty());
    }

    #[test]
    fn entry_reads_single_key() {
        let mut txn = Txn::default();
        txn.aggregates.insert("sum_24h".into(), 300.0);
        assert_eq!(
            TxnField::Aggregates.entry(&txn, "sum_24h"),
            Some(Value::Double(300.0))
        );
        assert_eq!(TxnField::Aggregates.entry(&txn, "missing"), None);
        assert_eq!(TxnField::Amount.entry(&txn, "sum_24h"), None);
    }
}
