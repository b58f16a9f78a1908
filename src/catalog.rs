//! Remote catalog client.
//!
//! Walks the field-service API: technicians and clients of a branch,
//! contracts of a client, reports of a contract, and the files uploaded for
//! a schedule. Every call is one request bounded by the configured timeout;
//! there are no retries. Responses arrive wrapped in an envelope whose
//! payload sits under `body` (or `data` when `body` is empty).
//!
//! # Endpoints
//!
//! | Call | Method | Path |
//! |------|--------|------|
//! | login | POST | `/web/api/auth/login` |
//! | technicians | GET | `/web/api/employee/no-paging?branch_id=` |
//! | clients | GET | `/web/api/client/no-paging?branch_id=` |
//! | contracts | GET | `/web/api/contract/{client}/client?is_void=yes` |
//! | contract detail | POST | `/web/api/report/check-report-service` |
//! | reports | POST | `/web/api/report/form-sts` |
//! | uploaded files | POST | `/web/api/schedule/file-uploaded` |
//!
//! Failures come back as [`CatalogError`]; the orchestrator treats them as
//! "no data" and moves on to the next contract or client.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::{AuthError, CatalogError};
use crate::models::{
    decode_report, json_kind, ClientRecord, Contract, ContractDetail, ReportListing, Technician,
    UploadedFile,
};

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub branch_id: i64,
}

/// The remote hierarchy, as seen by the orchestrator.
///
/// `Ok(vec![])` and `Err(_)` are both "nothing to do here"; the error form
/// only adds something worth logging.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn list_technicians(&self, branch_id: i64) -> Result<Vec<Technician>, CatalogError>;

    async fn list_clients(&self, branch_id: i64) -> Result<Vec<ClientRecord>, CatalogError>;

    async fn list_contracts(&self, client_id: i64) -> Result<Vec<Contract>, CatalogError>;

    async fn fetch_contract_detail(&self, contract_id: i64)
        -> Result<ContractDetail, CatalogError>;

    async fn list_reports(
        &self,
        contract_id: i64,
        technician_ids: &[i64],
    ) -> Result<ReportListing, CatalogError>;

    async fn list_uploaded_files(&self, schedule_id: i64)
        -> Result<Vec<UploadedFile>, CatalogError>;
}

/// [`Catalog`] over HTTP with a bearer token.
#[derive(Clone)]
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCatalog {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(api.user_agent.clone())
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// The underlying client without credentials, for fetching file URLs.
    pub fn http_client(&self) -> reqwest::Client {
        self.client.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// Bearer token of the current session, if logged in.
    pub fn token(&self) -> Option<String> {
        self.token.clone()
    }

    /// Exchange credentials for a bearer token. Subsequent calls on this
    /// catalog carry the token.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<Session, AuthError> {
        let url = format!("{}/web/api/auth/login", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::Rejected);
        }
        let payload: Value = response.json().await.map_err(|_| AuthError::Rejected)?;

        if payload.get("code").and_then(Value::as_i64) != Some(200) {
            return Err(AuthError::Rejected);
        }
        let body = payload.get("body").ok_or(AuthError::Rejected)?;
        let token = body
            .get("accessToken")
            .and_then(Value::as_str)
            .ok_or(AuthError::Rejected)?
            .to_string();
        let branch_id = body
            .get("account")
            .and_then(|a| a.get("employee_branch_id"))
            .and_then(|b| match b {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .ok_or(AuthError::MissingBranch)?;

        self.token = Some(token.clone());
        Ok(Session { token, branch_id })
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Option<Value>, CatalogError> {
        let request = self
            .client
            .get(format!("{}{}", self.base_url, endpoint))
            .query(query);
        self.send(endpoint, request).await
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Option<Value>, CatalogError> {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .json(body);
        self.send(endpoint, request).await
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<Value>, CatalogError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let transport = |source| CatalogError::Transport {
            endpoint: endpoint.to_string(),
            source,
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let text = response.text().await.map_err(transport)?;
        let json: Value = serde_json::from_str(&text).map_err(|e| CatalogError::Decode {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        Ok(unwrap_envelope(json))
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn list_technicians(&self, branch_id: i64) -> Result<Vec<Technician>, CatalogError> {
        let endpoint = "/web/api/employee/no-paging";
        let payload = self.get(endpoint, &[("branch_id", branch_id.to_string())]).await?;
        decode_list(endpoint, payload)
    }

    async fn list_clients(&self, branch_id: i64) -> Result<Vec<ClientRecord>, CatalogError> {
        let endpoint = "/web/api/client/no-paging";
        let payload = self.get(endpoint, &[("branch_id", branch_id.to_string())]).await?;
        decode_list(endpoint, payload)
    }

    async fn list_contracts(&self, client_id: i64) -> Result<Vec<Contract>, CatalogError> {
        let endpoint = format!("/web/api/contract/{}/client", client_id);
        let payload = self.get(&endpoint, &[("is_void", "yes".to_string())]).await?;
        decode_list(&endpoint, payload)
    }

    async fn fetch_contract_detail(
        &self,
        contract_id: i64,
    ) -> Result<ContractDetail, CatalogError> {
        let payload = self
            .post(
                "/web/api/report/check-report-service",
                &json!({ "contract_id": contract_id }),
            )
            .await?;
        Ok(payload
            .map(|p| ContractDetail::from_payload(&p))
            .unwrap_or_default())
    }

    async fn list_reports(
        &self,
        contract_id: i64,
        technician_ids: &[i64],
    ) -> Result<ReportListing, CatalogError> {
        let endpoint = "/web/api/report/form-sts";
        let payload = self
            .post(
                endpoint,
                &json!({ "contract_id": contract_id, "employee_ids": technician_ids }),
            )
            .await?;
        let items: Vec<Value> = decode_list(endpoint, payload)?;
        let mut listing = ReportListing::default();
        for item in items {
            match decode_report(item) {
                Ok(report) => listing.reports.push(report),
                Err(e) => listing.rejected.push(e.to_string()),
            }
        }
        Ok(listing)
    }

    async fn list_uploaded_files(
        &self,
        schedule_id: i64,
    ) -> Result<Vec<UploadedFile>, CatalogError> {
        let endpoint = "/web/api/schedule/file-uploaded";
        let payload = self
            .post(endpoint, &json!({ "schedule_id": schedule_id, "type": "sts" }))
            .await?;
        decode_list(endpoint, payload)
    }
}

/// Payload of an API envelope: `body` if it holds anything, else `data`.
pub fn unwrap_envelope(mut json: Value) -> Option<Value> {
    let body = json.get_mut("body").map(Value::take).filter(has_content);
    body.or_else(|| json.get_mut("data").map(Value::take).filter(has_content))
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Decode an array payload, dropping elements that do not fit `T`.
/// A missing payload is an empty list; a non-array payload is malformed.
fn decode_list<T: DeserializeOwned>(
    endpoint: &str,
    payload: Option<Value>,
) -> Result<Vec<T>, CatalogError> {
    match payload {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    tracing::warn!(endpoint, error = %e, "skipping undecodable entry");
                    None
                }
            })
            .collect()),
        Some(other) => Err(CatalogError::Decode {
            endpoint: endpoint.to_string(),
            reason: format!("expected array, got {}", json_kind(&other)),
        }),
    }
}
