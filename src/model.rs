use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_amount: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Ok,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub ts: String,
    pub action: String,
    pub status: ReceiptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AppMode {
    #[default]
    Demo,
    Connected,
}

impl AppMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AppMode::Demo => "demo",
            AppMode::Connected => "connected",
        }
    }

    /// Anything other than "connected" is demo.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some("connected") => AppMode::Connected,
            _ => AppMode::Demo,
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppConfig {
    pub mode: AppMode,
    pub access_key: String,
    pub gateway_base_url: String,
    pub memory_base_url: String,
    pub memory_token: String,
}

/// Gateway actions, used as the last path segment of `/api/invoice/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Action {
    CreateSend,
    ReminderSchedule,
    MarkPaid,
    PeriodExport,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::CreateSend,
        Action::ReminderSchedule,
        Action::MarkPaid,
        Action::PeriodExport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::CreateSend => "create_send",
            Action::ReminderSchedule => "reminder_schedule",
            Action::MarkPaid => "mark_paid",
            Action::PeriodExport => "period_export",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InvoiceItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InvoiceData {
    pub invoice_number: String,
    pub amount: f64,
    pub currency: String,
    pub due_date: String,
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreateSendRequest {
    pub provider: String,
    pub dry_run: bool,
    pub idempotency_key: String,
    pub customer_id: String,
    pub invoice_data: InvoiceData,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PeriodExportRequest {
    pub provider: String,
    pub dry_run: bool,
    pub idempotency_key: String,
    pub period_start: String,
    pub period_end: String,
    pub export_format: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct EpisodeInputs {
    pub request: Value,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct EpisodeOutputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub response: Value,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct EpisodeMeta {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct EpisodePayload {
    pub episode_id: String,
    pub domain: String,
    pub action: String,
    pub ts_iso: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gw_request_id: Option<String>,
    pub inputs: EpisodeInputs,
    pub outputs: EpisodeOutputs,
    pub meta: EpisodeMeta,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receipt_uses_camel_case_and_skips_missing_fields() {
        let receipt = Receipt {
            ts: "2026-01-01T00:00:00.000Z".into(),
            action: "period_export".into(),
            status: ReceiptStatus::Ok,
            request_id: Some("demo_export_1".into()),
            client_name: None,
            amount: None,
        };
        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(
            value,
            json!({
                "ts": "2026-01-01T00:00:00.000Z",
                "action": "period_export",
                "status": "ok",
                "requestId": "demo_export_1"
            })
        );
    }

    #[test]
    fn client_without_default_amount_deserializes() {
        let client: Client =
            serde_json::from_value(json!({"id": "client_1", "name": "A", "email": "a@b"})).unwrap();
        assert_eq!(client.default_amount, None);
    }

    #[test]
    fn unknown_mode_coerces_to_demo() {
        assert_eq!(AppMode::from_stored(Some("connected")), AppMode::Connected);
        assert_eq!(AppMode::from_stored(Some("live")), AppMode::Demo);
        assert_eq!(AppMode::from_stored(None), AppMode::Demo);
    }
}
