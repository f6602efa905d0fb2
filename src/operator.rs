//! Operator console: hand-edited payloads for any gateway action, plus manual
//! episode store and search against the memory service.
//!
//! Unlike the dispatcher there is no demo mode, no receipt log and no
//! automatic archiving. Store and search report their own outcome and never
//! touch the state of the last run.

use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::{ArchiveTarget, DOMAIN, EpisodeDraft, OPERATOR_SOURCE, build_episode, store_episode};
use crate::builder::{
    Clock, EXPORT_KEY_PREFIX, INVOICE_KEY_PREFIX, PROVIDER, build_period_export, idempotency_key, iso_date,
    quarter_range,
};
use crate::downloads::Downloads;
use crate::error::{DownloadError, OperatorError};
use crate::model::{Action, EpisodeMeta};
use crate::storage::{RecordStore, keys};
use crate::transport::{HttpReply, Transport, endpoint};

pub const DEV_GATEWAY_URL: &str = "https://mova-tool-gateway-v0-dev.s-myasoedov81.workers.dev";
pub const RAW_TEXT_LIMIT: usize = 2000;
pub const SEARCH_LIMIT: u32 = 10;

const LIST_FIELDS: [&str; 4] = ["items", "episodes", "data", "results"];

// ==========================================
// Settings
// ==========================================

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSettings {
    pub base_url: String,
    pub token: String,
    pub memory_base_url: String,
    pub memory_token: String,
}

impl OperatorSettings {
    /// Memory fields fall back to the gateway ones when not stored.
    pub fn load(store: &RecordStore) -> Self {
        let stored_base = store.get_raw(keys::GATEWAY_BASE_URL).filter(|s| !s.is_empty());
        let stored_token = store.get_raw(keys::CONSOLE_TOKEN).filter(|s| !s.is_empty());
        let stored_memory_base = store.get_raw(keys::MEMORY_BASE_URL).filter(|s| !s.is_empty());
        let stored_memory_token = store.get_raw(keys::MEMORY_TOKEN).filter(|s| !s.is_empty());

        Self {
            base_url: stored_base.clone().unwrap_or_else(|| DEV_GATEWAY_URL.to_string()),
            token: stored_token.clone().unwrap_or_default(),
            memory_base_url: stored_memory_base
                .or(stored_base)
                .unwrap_or_else(|| DEV_GATEWAY_URL.to_string()),
            memory_token: stored_memory_token.or(stored_token).unwrap_or_default(),
        }
    }

    pub fn save(&self, store: &RecordStore) -> Result<(), OperatorError> {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            return Err(OperatorError::Validation(
                "Gateway base URL is required before saving.".to_string(),
            ));
        }
        store.set_raw(keys::GATEWAY_BASE_URL, base_url);
        store.set_or_remove(keys::CONSOLE_TOKEN, self.token.trim());
        let memory_base_url = self.memory_base_url.trim();
        if !memory_base_url.is_empty() {
            store.set_raw(keys::MEMORY_BASE_URL, memory_base_url);
        }
        store.set_or_remove(keys::MEMORY_TOKEN, self.memory_token.trim());
        Ok(())
    }

    pub fn clear_tokens(&mut self, store: &RecordStore) {
        store.remove(keys::CONSOLE_TOKEN);
        store.remove(keys::MEMORY_TOKEN);
        self.token.clear();
        self.memory_token.clear();
    }

    pub fn use_dev_defaults(&mut self, store: &RecordStore) {
        self.base_url = DEV_GATEWAY_URL.to_string();
        self.memory_base_url = DEV_GATEWAY_URL.to_string();
        store.set_raw(keys::GATEWAY_BASE_URL, DEV_GATEWAY_URL);
        store.set_raw(keys::MEMORY_BASE_URL, DEV_GATEWAY_URL);
    }

    fn effective_memory(&self) -> (&str, &str) {
        let base = match self.memory_base_url.trim() {
            "" => self.base_url.trim(),
            memory => memory,
        };
        let token = match self.memory_token.trim() {
            "" => self.token.trim(),
            memory => memory,
        };
        (base, token)
    }
}

// ==========================================
// Payload helpers
// ==========================================

/// Starter payload for each action, with a fresh idempotency key.
pub fn example_payload(action: Action, clock: &dyn Clock) -> Value {
    let now = clock.now();
    let today = iso_date(clock.today());
    match action {
        Action::CreateSend => json!({
            "provider": PROVIDER,
            "dry_run": true,
            "idempotency_key": idempotency_key(INVOICE_KEY_PREFIX, now),
            "customer_id": "client_1",
            "invoice_data": {
                "invoice_number": format!("INV-{}", today),
                "amount": 90,
                "currency": "EUR",
                "due_date": today,
                "items": [{ "description": "Therapie Sitzung", "quantity": 1, "unit_price": 90 }]
            }
        }),
        Action::ReminderSchedule => json!({
            "provider": PROVIDER,
            "dry_run": true,
            "idempotency_key": idempotency_key(INVOICE_KEY_PREFIX, now),
            "invoice_id": format!("INV-{}", today),
            "reminders": [{ "days_after_due": 7 }, { "days_after_due": 14 }]
        }),
        Action::MarkPaid => json!({
            "provider": PROVIDER,
            "dry_run": true,
            "idempotency_key": idempotency_key(INVOICE_KEY_PREFIX, now),
            "invoice_id": format!("INV-{}", today),
            "paid_at": today,
            "amount": 90
        }),
        Action::PeriodExport => match quarter_range(clock.today()) {
            Some(period) => json!(build_period_export(period, true, now)),
            None => json!({
                "provider": PROVIDER,
                "dry_run": true,
                "idempotency_key": idempotency_key(EXPORT_KEY_PREFIX, now),
                "export_format": "json"
            }),
        },
    }
}

pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Episode list from a bare array, or from the first present list field.
pub fn extract_episode_items(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(obj) => LIST_FIELDS
            .iter()
            .find_map(|field| obj.get(*field).filter(|v| !v.is_null()))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

// ==========================================
// Console
// ==========================================

/// What the last run sent and received.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCapture {
    pub action: Action,
    pub ok: bool,
    pub status_code: u16,
    pub request_id: Option<String>,
    pub request: Value,
    pub response: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub status_code: Option<u16>,
    pub ok: bool,
    pub request_id: Option<String>,
    pub request_text: String,
    pub response_text: Option<String>,
    pub response_is_json: bool,
    pub notice: Option<String>,
}

impl RunReport {
    /// Writes the request and response exactly as shown, so a non-JSON reply
    /// keeps its raw text.
    pub fn save_payloads(&self, downloads: &Downloads) -> Result<Vec<PathBuf>, DownloadError> {
        let mut saved = vec![downloads.save_text("request.json", &self.request_text)?];
        if let Some(text) = &self.response_text {
            saved.push(downloads.save_text("response.json", text)?);
        }
        Ok(saved)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryReport {
    pub status_code: Option<u16>,
    pub response_text: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchReport {
    pub report: MemoryReport,
    pub episodes: Vec<Value>,
}

pub struct OperatorConsole {
    pub settings: OperatorSettings,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    last_run: Option<RunCapture>,
}

impl OperatorConsole {
    pub fn new(settings: OperatorSettings, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            transport,
            clock,
            last_run: None,
        }
    }

    pub fn last_run(&self) -> Option<&RunCapture> {
        self.last_run.as_ref()
    }

    /// Sends `payload_text` to `/api/invoice/{action}`. Local problems are
    /// errors; anything that happened on the wire is in the report.
    pub fn run(&mut self, action: Action, payload_text: &str) -> Result<RunReport, OperatorError> {
        self.last_run = None;

        let base_url = self.settings.base_url.trim();
        if base_url.is_empty() {
            return Err(OperatorError::Validation("Gateway base URL is required.".to_string()));
        }
        let token = self.settings.token.trim();
        if token.is_empty() {
            return Err(OperatorError::Validation("Gateway token is required.".to_string()));
        }
        let payload: Value = serde_json::from_str(payload_text)
            .map_err(|e| OperatorError::Validation(format!("Invalid JSON payload: {}", e)))?;

        let mut report = RunReport {
            request_text: pretty(&payload),
            ..RunReport::default()
        };

        let url = endpoint(base_url, &format!("/api/invoice/{}", action));
        let reply = match self.transport.post_json(&url, token, &payload) {
            Ok(reply) => reply,
            Err(e) => {
                report.notice = Some(format!("Request failed: {}", e));
                return Ok(report);
            }
        };

        report.status_code = Some(reply.status);
        report.ok = reply.is_success();
        report.request_id = reply.request_id.clone();

        let response = if reply.is_json() {
            match serde_json::from_str::<Value>(&reply.body) {
                Ok(json) => {
                    report.response_text = Some(pretty(&json));
                    report.response_is_json = true;
                    json
                }
                Err(e) => {
                    report.response_text = Some(reply.body.clone());
                    report.notice = Some(format!("Response JSON parse failed: {}", e));
                    json!({ "raw_text": truncate_text(&reply.body, RAW_TEXT_LIMIT) })
                }
            }
        } else {
            report.response_text = Some(reply.body.clone());
            report.notice = Some("Response is not JSON. Displaying raw text.".to_string());
            json!({ "raw_text": truncate_text(&reply.body, RAW_TEXT_LIMIT) })
        };

        tracing::debug!(%action, status = reply.status, "operator run");
        self.last_run = Some(RunCapture {
            action,
            ok: report.ok,
            status_code: reply.status,
            request_id: reply.request_id,
            request: payload,
            response,
        });
        Ok(report)
    }

    /// Archives the last successful run.
    pub fn store_episode(&self) -> MemoryReport {
        let target = match self.memory_target() {
            Ok(target) => target,
            Err(error) => return MemoryReport { error: Some(error), ..MemoryReport::default() },
        };
        let Some(run) = self.last_run.as_ref().filter(|run| run.ok) else {
            return MemoryReport {
                error: Some("Run an action successfully before storing an episode.".to_string()),
                ..MemoryReport::default()
            };
        };

        let episode = build_episode(
            EpisodeDraft {
                action: run.action.to_string(),
                gw_request_id: run.request_id.clone(),
                request: run.request.clone(),
                response: run.response.clone(),
                http_status: Some(run.status_code),
                meta: EpisodeMeta {
                    source: OPERATOR_SOURCE.to_string(),
                    dry_run: run.request.get("dry_run").and_then(Value::as_bool),
                    provider: run.request.get("provider").and_then(Value::as_str).map(str::to_string),
                },
            },
            self.clock.now(),
        );

        let outcome = store_episode(self.transport.as_ref(), &target, &episode);
        read_memory_reply(outcome, "Store").0
    }

    /// Latest episodes in the invoice domain.
    pub fn search_episodes(&self) -> SearchReport {
        let target = match self.memory_target() {
            Ok(target) => target,
            Err(error) => {
                return SearchReport {
                    report: MemoryReport { error: Some(error), ..MemoryReport::default() },
                    episodes: Vec::new(),
                };
            }
        };

        let body = json!({ "domain": DOMAIN, "limit": SEARCH_LIMIT, "order": "desc" });
        let outcome = self
            .transport
            .post_json(&endpoint(&target.base_url, "/episode/search"), &target.token, &body);
        let (report, json) = read_memory_reply(outcome, "Search");
        SearchReport {
            report,
            episodes: json.as_ref().map(extract_episode_items).unwrap_or_default(),
        }
    }

    fn memory_target(&self) -> Result<ArchiveTarget, String> {
        let (base_url, token) = self.settings.effective_memory();
        if base_url.is_empty() {
            return Err("Memory base URL is required.".to_string());
        }
        if token.is_empty() {
            return Err("Memory token is required.".to_string());
        }
        Ok(ArchiveTarget {
            base_url: base_url.to_string(),
            token: token.to_string(),
        })
    }
}

fn read_memory_reply(
    outcome: Result<HttpReply, crate::error::TransportError>,
    label: &str,
) -> (MemoryReport, Option<Value>) {
    let reply = match outcome {
        Ok(reply) => reply,
        Err(e) => {
            let report = MemoryReport {
                error: Some(format!("{} request failed: {}", label, e)),
                ..MemoryReport::default()
            };
            return (report, None);
        }
    };

    let mut report = MemoryReport {
        status_code: Some(reply.status),
        ..MemoryReport::default()
    };
    if !reply.is_json() {
        report.response_text = Some(reply.body);
        report.error = Some(format!("{} response is not JSON. Displaying raw text.", label));
        return (report, None);
    }
    match serde_json::from_str::<Value>(&reply.body) {
        Ok(json) => {
            report.response_text = Some(pretty(&json));
            (report, Some(json))
        }
        Err(e) => {
            report.response_text = Some(reply.body);
            report.error = Some(format!("{} JSON parse failed: {}", label, e));
            (report, None)
        }
    }
}
