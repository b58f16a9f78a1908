//! Core data models used throughout the sync.
//!
//! Records are decoded leniently from the catalog's JSON: nested list fields
//! that are absent, `null` or not an array become empty vectors, and list
//! elements that cannot be decoded are dropped. Text fields accept numbers
//! and booleans as well as strings. A decoded [`ReportRecord`] is therefore
//! always safe to hand to the composer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::MalformedRecord;

/// A client of the branch, as listed by the catalog and cached locally.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientRecord {
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub name: Option<String>,
}

impl ClientRecord {
    /// Name used in paths and reports; falls back to `Client_{id}`.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Client_{}", self.id),
        }
    }
}

/// An employee of the session's branch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Technician {
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub fullname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contract {
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub id: Option<i64>,
}

/// Per-contract enrichment passed to the composer.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDetail {
    pub branch_name: String,
    pub client_address: String,
}

impl Default for ContractDetail {
    fn default() -> Self {
        Self {
            branch_name: "N/A".to_string(),
            client_address: "N/A".to_string(),
        }
    }
}

impl ContractDetail {
    /// Pull `contract.branches.name` and `contract.clients.address` out of a
    /// contract-check payload. Missing parts stay `"N/A"`.
    pub fn from_payload(payload: &Value) -> Self {
        let contract = payload.get("contract");
        let pick = |section: &str, field: &str| {
            contract
                .and_then(|c| c.get(section))
                .and_then(|s| s.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| "N/A".to_string())
        };
        Self {
            branch_name: pick("branches", "name"),
            client_address: pick("clients", "address"),
        }
    }
}

/// One file attached to a schedule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadedFile {
    #[serde(rename = "filename", default, deserialize_with = "lenient_opt_string")]
    pub remote_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub notes: Option<String>,
}

/// A checkbox-style entry (feedback, treatment, work type).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckEntry {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub type_work_name: Option<String>,
    #[serde(default)]
    pub selected: Option<Value>,
}

impl CheckEntry {
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.type_work_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or("N/A")
    }

    pub fn is_selected(&self) -> bool {
        match &self.selected {
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "1",
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChemicalEntry {
    #[serde(default)]
    pub active_ingredient: Option<Value>,
    #[serde(default)]
    pub dosis: Option<Value>,
    #[serde(default)]
    pub no_batch: Option<Value>,
    #[serde(default)]
    pub method_application_name: Option<Value>,
    #[serde(default)]
    pub total_usage: Option<Value>,
    #[serde(default)]
    pub uom_name: Option<Value>,
}

/// A field-service report (STS) as returned for one contract.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReportRecord {
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub schedule_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub employee_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub date_work: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub checkin_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub checkout_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub sequence_number: Option<i64>,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub visit_total_base_period_contract: Option<i64>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub product_service_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub client_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub note_type_service: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub note_type_work: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub note_action_taken: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub note_remark: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub url_signature_client: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub signature_client_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub url_signature_employee: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub report_detail_feedbacks: Vec<CheckEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub report_detail_treatments: Vec<CheckEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub report_detail_chemicals: Vec<ChemicalEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub report_detail_type_works: Vec<CheckEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub uploaded_files: Vec<UploadedFile>,
}

impl ReportRecord {
    pub fn technician_name(&self) -> &str {
        self.employee_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Unknown_Technician")
    }
}

/// Decode a report payload. Every list field comes out as a (possibly
/// empty) vector and scalar fields of the wrong type become `None`, so only
/// a non-object payload is rejected.
pub fn decode_report(value: Value) -> Result<ReportRecord, MalformedRecord> {
    if !value.is_object() {
        return Err(MalformedRecord::NotAnObject(json_kind(&value)));
    }
    serde_json::from_value(value).map_err(|e| MalformedRecord::Undecodable(e.to_string()))
}

/// Reports of one contract, plus the reasons for entries that could not be
/// decoded at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportListing {
    pub reports: Vec<ReportRecord>,
    pub rejected: Vec<String>,
}

impl From<Vec<ReportRecord>> for ReportListing {
    fn from(reports: Vec<ReportRecord>) -> Self {
        Self {
            reports,
            rejected: Vec::new(),
        }
    }
}

/// JSON type name, for log and error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single binary fetch handed to the download pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub source_url: String,
    pub filename: String,
    pub category: String,
}

/// A row of the history ledger.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub filename: String,
    pub category: String,
    pub source: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Render a loosely-typed JSON scalar for display.
pub fn display_value(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_opt_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_id(&value))
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_id(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {}", value)))
}
