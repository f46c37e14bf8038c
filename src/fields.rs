//! The structured extraction record.
//!
//! Inside the crate a field the model could not locate is an explicit
//! [`FieldValue::NotFound`] (or [`FieldValue::Absent`] when the model left the
//! key out entirely). The literal `"Not Found"` sentinel only appears at the
//! serialisation boundary, so consumers reading the JSON see every mandatory
//! key, always.

use crate::error::ExtractionError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Sentinel written for mandatory fields without a value.
pub const NOT_FOUND: &str = "Not Found";

/// Keys every successful extraction record carries.
pub const MANDATORY_FIELDS: [&str; 7] = [
    "APR",
    "Finance_Charge",
    "Amount_Financed",
    "Total_Sale_Price",
    "VIN",
    "Monthly_Payment",
    "Graduation_Date",
];

/// Fairness-analysis keys. Their absence is a degraded response, not an error.
pub const ANALYSIS_FIELDS: [&str; 5] = [
    "Fair_Price",
    "fairness_score",
    "red_flags",
    "green_flags",
    "summary",
];

const VIN_DETAILS_KEY: &str = "vin_details";

/// Value of one extracted field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldValue {
    /// The model located a value.
    Found(String),
    /// The model explicitly reported the value as not found.
    NotFound,
    /// The key was missing from the model output.
    #[default]
    Absent,
}

impl FieldValue {
    /// Interpret one value of the model's JSON object.
    ///
    /// `"Not Found"` (any case), empty strings and `null` mean not found;
    /// numbers and booleans keep their textual form.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::NotFound,
            Value::String(s) => {
                let t = s.trim();
                if t.is_empty() || t.eq_ignore_ascii_case(NOT_FOUND) {
                    FieldValue::NotFound
                } else {
                    FieldValue::Found(t.to_string())
                }
            }
            Value::Number(n) => FieldValue::Found(n.to_string()),
            Value::Bool(b) => FieldValue::Found(b.to_string()),
            other => FieldValue::Found(other.to_string()),
        }
    }

    pub fn as_found(&self) -> Option<&str> {
        match self {
            FieldValue::Found(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, FieldValue::Found(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    /// The serialised form: the value, or the sentinel.
    pub fn as_str(&self) -> &str {
        self.as_found().unwrap_or(NOT_FOUND)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::from_json(&Value::String(s.to_string()))
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Decoded vehicle attributes attached after a successful VIN lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VinDetails {
    #[serde(rename = "Make")]
    pub make: Option<String>,
    #[serde(rename = "Model")]
    pub model: Option<String>,
    #[serde(rename = "Year")]
    pub year: Option<String>,
    #[serde(rename = "Vehicle Type")]
    pub vehicle_type: Option<String>,
    #[serde(rename = "Manufacturer")]
    pub manufacturer: Option<String>,
}

/// Fixed-schema record produced by the extraction adapter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedFields {
    pub apr: FieldValue,
    pub finance_charge: FieldValue,
    pub amount_financed: FieldValue,
    pub total_sale_price: FieldValue,
    pub vin: FieldValue,
    pub monthly_payment: FieldValue,
    pub graduation_date: FieldValue,
    pub fair_price: FieldValue,
    /// Raw score as the model sent it; see [`ExtractedFields::fairness_score`].
    pub fairness_score_raw: Option<Value>,
    pub red_flags: Option<Vec<String>>,
    pub green_flags: Option<Vec<String>>,
    pub summary: Option<String>,
    pub vin_details: Option<VinDetails>,
    /// Keys outside the schema, kept so nothing the model said is lost.
    pub extra: BTreeMap<String, Value>,
}

static RE_LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(-?\d+(?:\.\d+)?)").unwrap());

impl ExtractedFields {
    /// Build a record from the model's JSON object.
    pub fn from_json_map(mut map: Map<String, Value>) -> Self {
        let mut take = |key: &str| {
            map.remove(key)
                .map(|v| FieldValue::from_json(&v))
                .unwrap_or_default()
        };

        let apr = take("APR");
        let finance_charge = take("Finance_Charge");
        let amount_financed = take("Amount_Financed");
        let total_sale_price = take("Total_Sale_Price");
        let vin = take("VIN");
        let monthly_payment = take("Monthly_Payment");
        let graduation_date = take("Graduation_Date");
        let fair_price = take("Fair_Price");

        let fairness_score_raw = map.remove("fairness_score");
        let red_flags = map.remove("red_flags").and_then(coerce_flags);
        let green_flags = map.remove("green_flags").and_then(coerce_flags);
        let summary = map.remove("summary").and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

        let vin_details = match map.remove(VIN_DETAILS_KEY) {
            Some(v) => match serde_json::from_value::<VinDetails>(v.clone()) {
                Ok(details) => Some(details),
                Err(_) => {
                    map.insert(VIN_DETAILS_KEY.to_string(), v);
                    None
                }
            },
            None => None,
        };

        Self {
            apr,
            finance_charge,
            amount_financed,
            total_sale_price,
            vin,
            monthly_payment,
            graduation_date,
            fair_price,
            fairness_score_raw,
            red_flags,
            green_flags,
            summary,
            vin_details,
            extra: map.into_iter().collect(),
        }
    }

    /// The mandatory fields in schema order.
    pub fn mandatory(&self) -> [(&'static str, &FieldValue); 7] {
        [
            ("APR", &self.apr),
            ("Finance_Charge", &self.finance_charge),
            ("Amount_Financed", &self.amount_financed),
            ("Total_Sale_Price", &self.total_sale_price),
            ("VIN", &self.vin),
            ("Monthly_Payment", &self.monthly_payment),
            ("Graduation_Date", &self.graduation_date),
        ]
    }

    /// Fairness score coerced to a number in `[0, 100]`.
    ///
    /// Numbers pass through; strings contribute their leading number
    /// (`"85"`, `"85/100"`, `"85%"`); anything else counts as 0.
    pub fn fairness_score(&self) -> f64 {
        let score = match &self.fairness_score_raw {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => RE_LEADING_NUMBER
                .captures(s)
                .and_then(|c| c[1].parse::<f64>().ok()),
            _ => None,
        };
        score
            .filter(|n| n.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 100.0)
    }

    pub fn red_flags(&self) -> &[String] {
        self.red_flags.as_deref().unwrap_or(&[])
    }

    pub fn green_flags(&self) -> &[String] {
        self.green_flags.as_deref().unwrap_or(&[])
    }

    /// True when the response carried any of the fairness-analysis keys.
    pub fn has_analysis(&self) -> bool {
        !self.fair_price.is_absent()
            || self.fairness_score_raw.is_some()
            || self.red_flags.is_some()
            || self.green_flags.is_some()
            || self.summary.is_some()
    }
}

fn coerce_flags(value: Value) -> Option<Vec<String>> {
    match value {
        Value::Null => None,
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.trim().is_empty())
                .collect(),
        ),
        Value::String(s) if s.trim().is_empty() => Some(Vec::new()),
        Value::String(s) => Some(vec![s]),
        other => Some(vec![other.to_string()]),
    }
}

impl Serialize for ExtractedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in self.mandatory() {
            map.serialize_entry(key, value)?;
        }
        if !self.fair_price.is_absent() {
            map.serialize_entry("Fair_Price", &self.fair_price)?;
        }
        if let Some(score) = &self.fairness_score_raw {
            map.serialize_entry("fairness_score", score)?;
        }
        if let Some(flags) = &self.red_flags {
            map.serialize_entry("red_flags", flags)?;
        }
        if let Some(flags) = &self.green_flags {
            map.serialize_entry("green_flags", flags)?;
        }
        if let Some(summary) = &self.summary {
            map.serialize_entry("summary", summary)?;
        }
        if let Some(details) = &self.vin_details {
            map.serialize_entry(VIN_DETAILS_KEY, details)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ExtractedFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Ok(ExtractedFields::from_json_map(map))
    }
}

/// Per-document extraction result as recorded in batch output.
///
/// Serialises to the record itself, or to exactly `{"Error": "<message>"}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Extracted(ExtractedFields),
    Failed { error: String },
}

impl ExtractionOutcome {
    pub fn failed(error: impl ToString) -> Self {
        ExtractionOutcome::Failed {
            error: error.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ExtractionOutcome::Failed { .. })
    }
}

impl From<Result<ExtractedFields, ExtractionError>> for ExtractionOutcome {
    fn from(result: Result<ExtractedFields, ExtractionError>) -> Self {
        match result {
            Ok(fields) => ExtractionOutcome::Extracted(fields),
            Err(e) => ExtractionOutcome::failed(e),
        }
    }
}

impl Serialize for ExtractionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExtractionOutcome::Extracted(fields) => fields.serialize(serializer),
            ExtractionOutcome::Failed { error } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Error", error)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ExtractionOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        if map.len() == 1 {
            if let Some(error) = map.get("Error") {
                let error = error
                    .as_str()
                    .ok_or_else(|| D::Error::custom("\"Error\" must be a string"))?;
                return Ok(ExtractionOutcome::failed(error));
            }
        }
        Ok(ExtractionOutcome::Extracted(ExtractedFields::from_json_map(map)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> ExtractedFields {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn sentinel_absent_and_found_are_distinguished() {
        let f = parse(json!({"APR": "5.9%", "VIN": "Not Found", "Finance_Charge": null}));
        assert_eq!(f.apr, FieldValue::Found("5.9%".into()));
        assert_eq!(f.vin, FieldValue::NotFound);
        assert_eq!(f.finance_charge, FieldValue::NotFound);
        assert_eq!(f.graduation_date, FieldValue::Absent);
    }

    #[test]
    fn every_mandatory_key_is_serialised() {
        let f = parse(json!({"APR": "5.9%"}));
        let v = serde_json::to_value(&f).unwrap();
        for key in MANDATORY_FIELDS {
            assert!(v.get(key).is_some(), "missing {key}");
        }
        assert_eq!(v["APR"], "5.9%");
        assert_eq!(v["Total_Sale_Price"], NOT_FOUND);
        assert!(v.get("Fair_Price").is_none(), "optional keys stay absent");
    }

    #[test]
    fn numeric_values_keep_their_text() {
        let f = parse(json!({"Monthly_Payment": 412.5, "Amount_Financed": 20000}));
        assert_eq!(f.monthly_payment.as_found(), Some("412.5"));
        assert_eq!(f.amount_financed.as_found(), Some("20000"));
    }

    #[test]
    fn fairness_score_is_coerced_defensively() {
        let score = |v: Value| parse(json!({ "fairness_score": v })).fairness_score();
        assert_eq!(score(json!(72)), 72.0);
        assert_eq!(score(json!("85/100")), 85.0);
        assert_eq!(score(json!("high")), 0.0);
        assert_eq!(score(json!([1, 2])), 0.0);
        assert_eq!(score(json!(250)), 100.0);
        assert_eq!(parse(json!({})).fairness_score(), 0.0);
    }

    #[test]
    fn flags_accept_lists_and_single_strings() {
        let f = parse(json!({
            "red_flags": ["Late charge of 5%", 42, null],
            "green_flags": "No prepayment penalty"
        }));
        assert_eq!(f.red_flags(), ["Late charge of 5%", "42"]);
        assert_eq!(f.green_flags(), ["No prepayment penalty"]);
        assert!(f.has_analysis());
    }

    #[test]
    fn missing_analysis_is_not_an_error() {
        let f = parse(json!({"APR": "3%"}));
        assert!(!f.has_analysis());
        assert!(f.red_flags().is_empty());
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let f = parse(json!({"APR": "3%", "Dealer": "Acme Motors"}));
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["Dealer"], "Acme Motors");
    }

    #[test]
    fn vin_details_serialise_with_nulls() {
        let mut f = parse(json!({"VIN": "1HGCM82633A004352"}));
        f.vin_details = Some(VinDetails {
            make: Some("Honda".into()),
            ..Default::default()
        });
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["vin_details"]["Make"], "Honda");
        assert!(v["vin_details"]["Vehicle Type"].is_null());

        let back: ExtractedFields = serde_json::from_value(v).unwrap();
        assert_eq!(back.vin_details, f.vin_details);
    }

    #[test]
    fn error_outcome_is_error_only_object() {
        let outcome = ExtractionOutcome::from(Err::<ExtractedFields, _>(
            ExtractionError::EmptyResponse,
        ));
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v, json!({"Error": "model returned an empty response"}));

        let back: ExtractionOutcome = serde_json::from_value(v).unwrap();
        assert!(back.is_failed());
    }
}
