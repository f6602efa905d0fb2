//! Dual-mode dispatch of gateway actions.
//!
//! A submission moves through `Validating`, then either `DemoSuccess` (no I/O,
//! fabricated reply) or `NetworkPending` followed by `Success` / `Error`.
//! Validation failures end in `Invalid` and leave no receipt behind; every
//! other outcome writes exactly one receipt.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::archive::{APP_SOURCE, EpisodeArchiver, EpisodeDraft, build_episode};
use crate::builder::{
    Clock, PeriodPreset, build_create_send, build_period_export, iso_date, iso_timestamp, resolve_period,
};
use crate::error::DispatchError;
use crate::model::{Action, AppMode, EpisodeMeta, Receipt, ReceiptStatus};
use crate::storage::RecordStore;
use crate::transport::{HttpReply, Transport, endpoint};

pub const MISSING_CLIENT: &str = "Please select a client first.";
pub const MISSING_AMOUNT: &str = "Please enter an amount.";
pub const MISSING_PERIOD: &str = "Please specify a period.";
pub const MISSING_ACCESS_KEY: &str = "Please set the access key in the settings.";
pub const MISSING_GATEWAY_URL: &str = "Please set the gateway base URL in the advanced settings.";

pub const EXPORT_SUMMARY_FILE: &str = "export_summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Validating,
    Invalid,
    DemoSuccess,
    NetworkPending,
    Success,
    Error,
}

/// Busy flag and phase of one form instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormStatus {
    pub busy: bool,
    pub phase: Phase,
}

impl FormStatus {
    fn begin(&mut self) -> Result<(), DispatchError> {
        if self.busy {
            return Err(DispatchError::Busy);
        }
        self.phase = Phase::Validating;
        Ok(())
    }

    fn reject(&mut self, message: &str) -> DispatchError {
        self.phase = Phase::Invalid;
        DispatchError::validation(message)
    }

    fn pending(&mut self) {
        self.busy = true;
        self.phase = Phase::NetworkPending;
    }

    fn settle(&mut self, result: &ActionResult) {
        self.busy = false;
        self.phase = if result.is_success() { Phase::Success } else { Phase::Error };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    Error,
}

/// A file the caller should offer for download.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub status: ResultStatus,
    pub message: String,
    pub status_code: Option<u16>,
    pub request_id: Option<String>,
    pub request_payload: Option<Value>,
    pub response_payload: Option<Value>,
    pub attachment: Option<Attachment>,
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

#[derive(Debug, Clone)]
pub struct InvoiceForm {
    pub client_id: Option<String>,
    pub amount: Option<f64>,
    pub due_date: NaiveDate,
    pub note: String,
    pub dry_run: bool,
    pub status: FormStatus,
}

impl InvoiceForm {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            client_id: None,
            amount: None,
            due_date: today,
            note: String::new(),
            dry_run: true,
            status: FormStatus::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportForm {
    pub preset: PeriodPreset,
    pub dry_run: bool,
    pub status: FormStatus,
}

impl ExportForm {
    pub fn new() -> Self {
        Self {
            preset: PeriodPreset::ThisQuarter,
            dry_run: true,
            status: FormStatus::default(),
        }
    }
}

impl Default for ExportForm {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses the body as JSON when the content type says so, otherwise wraps
/// the text as `{ "raw_text": ... }`.
pub fn normalize_body(reply: &HttpReply) -> Value {
    if reply.is_json() {
        match serde_json::from_str(&reply.body) {
            Ok(value) => return value,
            Err(e) => tracing::debug!(error = %e, "JSON content type with unparsable body"),
        }
    }
    json!({ "raw_text": reply.body })
}

// ==========================================
// Dispatcher
// ==========================================

struct Wording {
    demo_prefix: &'static str,
    demo_note: &'static str,
    demo_done: &'static str,
    done: &'static str,
    rejected: &'static str,
    failed: &'static str,
}

const INVOICE_WORDING: Wording = Wording {
    demo_prefix: "demo_",
    demo_note: "Invoice created in demo mode.",
    demo_done: "Invoice sent (demo).",
    done: "Invoice sent.",
    rejected: "Invoice could not be sent.",
    failed: "Sending failed",
};

const EXPORT_WORDING: Wording = Wording {
    demo_prefix: "demo_export_",
    demo_note: "Export ready (demo).",
    demo_done: "Export created (demo).",
    done: "Export created.",
    rejected: "Export could not be created.",
    failed: "Export failed",
};

struct Job {
    action: Action,
    request: Value,
    wording: &'static Wording,
    client_name: Option<String>,
    amount: Option<f64>,
    /// Extra fields echoed in the demo reply.
    demo_echo: Map<String, Value>,
    demo_attachment: Option<&'static str>,
}

pub struct Dispatcher<'a> {
    store: &'a RecordStore,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    archiver: &'a EpisodeArchiver,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        store: &'a RecordStore,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        archiver: &'a EpisodeArchiver,
    ) -> Self {
        Self { store, transport, clock, archiver }
    }

    /// `create_send` for the selected roster client.
    pub fn send_invoice(&self, form: &mut InvoiceForm) -> Result<ActionResult, DispatchError> {
        form.status.begin()?;

        let clients = self.store.load_clients();
        let Some(client) = form
            .client_id
            .as_deref()
            .and_then(|id| clients.iter().find(|c| c.id == id))
        else {
            return Err(form.status.reject(MISSING_CLIENT));
        };
        let amount = match form.amount {
            Some(amount) if amount.is_finite() && amount > 0.0 => amount,
            _ => return Err(form.status.reject(MISSING_AMOUNT)),
        };

        let request = build_create_send(client, amount, form.due_date, form.dry_run, &form.note, self.clock.now());
        let job = Job {
            action: Action::CreateSend,
            request: serde_json::to_value(&request)?,
            wording: &INVOICE_WORDING,
            client_name: Some(client.name.clone()),
            amount: Some(amount),
            demo_echo: Map::new(),
            demo_attachment: None,
        };
        self.execute(job, &mut form.status)
    }

    /// `period_export` for the resolved reporting period.
    pub fn export_period(&self, form: &mut ExportForm) -> Result<ActionResult, DispatchError> {
        form.status.begin()?;

        let Some(period) = resolve_period(form.preset, self.clock.today()) else {
            return Err(form.status.reject(MISSING_PERIOD));
        };

        let request = build_period_export(period, form.dry_run, self.clock.now());
        let mut demo_echo = Map::new();
        demo_echo.insert("period_start".into(), Value::String(iso_date(period.start)));
        demo_echo.insert("period_end".into(), Value::String(iso_date(period.end)));

        let job = Job {
            action: Action::PeriodExport,
            request: serde_json::to_value(&request)?,
            wording: &EXPORT_WORDING,
            client_name: None,
            amount: None,
            demo_echo,
            demo_attachment: Some(EXPORT_SUMMARY_FILE),
        };
        self.execute(job, &mut form.status)
    }

    fn execute(&self, job: Job, status: &mut FormStatus) -> Result<ActionResult, DispatchError> {
        let config = self.store.load_config();

        if config.mode == AppMode::Demo {
            status.phase = Phase::DemoSuccess;
            let now = self.clock.now();
            let result = demo_result(&job, now);
            tracing::debug!(action = %job.action, request_id = result.request_id.as_deref(), "demo dispatch");
            self.record(&job, &result, now);
            return Ok(result);
        }

        if config.access_key.is_empty() {
            return Err(status.reject(MISSING_ACCESS_KEY));
        }
        if config.gateway_base_url.is_empty() {
            return Err(status.reject(MISSING_GATEWAY_URL));
        }

        status.pending();
        let url = endpoint(&config.gateway_base_url, &format!("/api/invoice/{}", job.action));
        let result = match self.transport.post_json(&url, &config.access_key, &job.request) {
            Ok(reply) => {
                let response = normalize_body(&reply);
                let ok = reply.is_success();
                ActionResult {
                    status: if ok { ResultStatus::Success } else { ResultStatus::Error },
                    message: if ok { job.wording.done } else { job.wording.rejected }.to_string(),
                    status_code: Some(reply.status),
                    request_id: reply.request_id,
                    request_payload: Some(job.request.clone()),
                    response_payload: Some(response),
                    attachment: None,
                }
            }
            Err(e) => ActionResult {
                status: ResultStatus::Error,
                message: format!("{}: {}", job.wording.failed, e),
                status_code: None,
                request_id: None,
                request_payload: Some(job.request.clone()),
                response_payload: None,
                attachment: None,
            },
        };
        status.settle(&result);
        tracing::debug!(action = %job.action, status = ?result.status_code, phase = ?status.phase, "dispatch settled");

        let now = self.clock.now();
        self.record(&job, &result, now);

        if result.is_success() {
            let episode = build_episode(
                EpisodeDraft {
                    action: job.action.to_string(),
                    gw_request_id: result.request_id.clone(),
                    request: job.request,
                    response: result.response_payload.clone().unwrap_or(Value::Null),
                    http_status: result.status_code,
                    meta: EpisodeMeta {
                        source: APP_SOURCE.to_string(),
                        dry_run: None,
                        provider: None,
                    },
                },
                now,
            );
            self.archiver.spawn(&config, episode);
        }

        Ok(result)
    }

    fn record(&self, job: &Job, result: &ActionResult, now: DateTime<Utc>) {
        self.store.add_receipt(Receipt {
            ts: iso_timestamp(now),
            action: job.action.to_string(),
            status: if result.is_success() { ReceiptStatus::Ok } else { ReceiptStatus::Error },
            request_id: result.request_id.clone(),
            client_name: job.client_name.clone(),
            amount: job.amount,
        });
    }
}

fn demo_result(job: &Job, now: DateTime<Utc>) -> ActionResult {
    let request_id = format!("{}{}", job.wording.demo_prefix, now.timestamp_millis());

    let mut response = Map::new();
    response.insert("ok".into(), Value::Bool(true));
    response.insert("mode".into(), Value::String(AppMode::Demo.to_string()));
    response.insert("request_id".into(), Value::String(request_id.clone()));
    response.insert("message".into(), Value::String(job.wording.demo_note.to_string()));
    response.extend(job.demo_echo.clone());
    let response = Value::Object(response);

    ActionResult {
        status: ResultStatus::Success,
        message: job.wording.demo_done.to_string(),
        status_code: None,
        request_id: Some(request_id),
        request_payload: Some(job.request.clone()),
        attachment: job.demo_attachment.map(|filename| Attachment {
            filename: filename.to_string(),
            payload: response.clone(),
        }),
        response_payload: Some(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FixedClock;
    use crate::model::{AppConfig, Client};
    use crate::storage::MemoryStorage;
    use crate::transport::fake::{FakeTransport, json_reply, text_reply};

    const NOW: &str = "2026-10-19T08:00:00.500Z";

    struct Harness {
        store: RecordStore,
        transport: Arc<FakeTransport>,
        archiver: EpisodeArchiver,
        clock: Arc<FixedClock>,
    }

    impl Harness {
        fn new(config: AppConfig, transport: FakeTransport) -> Self {
            let store = RecordStore::attached(MemoryStorage::new());
            store.save_config(&config);
            store.save_clients(&[Client {
                id: "client_1".into(),
                name: "A. Muster".into(),
                email: "a@example.com".into(),
                default_amount: Some(90.0),
            }]);
            let transport = Arc::new(transport);
            Self {
                store,
                archiver: EpisodeArchiver::new(transport.clone()),
                transport,
                clock: Arc::new(FixedClock::at(NOW)),
            }
        }

        fn dispatcher(&self) -> Dispatcher<'_> {
            Dispatcher::new(&self.store, self.transport.clone(), self.clock.clone(), &self.archiver)
        }
    }

    fn connected() -> AppConfig {
        AppConfig {
            mode: AppMode::Connected,
            access_key: "key".into(),
            gateway_base_url: "https://gw.example/".into(),
            ..AppConfig::default()
        }
    }

    fn invoice_form() -> InvoiceForm {
        let mut form = InvoiceForm::new(FixedClock::at(NOW).today());
        form.client_id = Some("client_1".into());
        form.amount = Some(90.0);
        form
    }

    #[test]
    fn demo_invoice_writes_ok_receipt_without_network() {
        let h = Harness::new(AppConfig::default(), FakeTransport::new());
        let mut form = invoice_form();

        let result = h.dispatcher().send_invoice(&mut form).unwrap();

        assert!(result.is_success());
        assert_eq!(form.status.phase, Phase::DemoSuccess);
        let request_id = result.request_id.clone().unwrap();
        assert!(request_id.starts_with("demo_"));
        assert!(h.transport.calls().is_empty());

        let receipts = h.store.load_receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].action, "create_send");
        assert_eq!(receipts[0].status, ReceiptStatus::Ok);
        assert_eq!(receipts[0].client_name.as_deref(), Some("A. Muster"));
        assert_eq!(receipts[0].amount, Some(90.0));
        assert_eq!(receipts[0].request_id, Some(request_id));
    }

    #[test]
    fn demo_export_attaches_summary() {
        let h = Harness::new(AppConfig::default(), FakeTransport::new());
        let mut form = ExportForm::new();

        let result = h.dispatcher().export_period(&mut form).unwrap();

        assert!(result.request_id.as_deref().unwrap().starts_with("demo_export_"));
        let attachment = result.attachment.unwrap();
        assert_eq!(attachment.filename, EXPORT_SUMMARY_FILE);
        assert_eq!(attachment.payload["period_start"], "2026-10-01");
        assert_eq!(attachment.payload["period_end"], "2026-12-31");
        assert!(h.transport.calls().is_empty());

        let receipts = h.store.load_receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].action, "period_export");
        assert_eq!(receipts[0].client_name, None);
    }

    #[test]
    fn validation_failures_leave_no_trace() {
        let h = Harness::new(connected(), FakeTransport::new());

        let mut form = invoice_form();
        form.client_id = Some("client_404".into());
        assert_eq!(
            h.dispatcher().send_invoice(&mut form),
            Err(DispatchError::validation(MISSING_CLIENT))
        );
        assert_eq!(form.status.phase, Phase::Invalid);

        for amount in [None, Some(0.0), Some(-5.0), Some(f64::NAN)] {
            let mut form = invoice_form();
            form.amount = amount;
            assert_eq!(
                h.dispatcher().send_invoice(&mut form),
                Err(DispatchError::validation(MISSING_AMOUNT))
            );
        }

        let mut export = ExportForm::new();
        export.preset = PeriodPreset::Custom { start: None, end: None };
        assert_eq!(
            h.dispatcher().export_period(&mut export),
            Err(DispatchError::validation(MISSING_PERIOD))
        );

        assert!(h.store.load_receipts().is_empty());
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn connected_without_access_key_is_rejected_locally() {
        let config = AppConfig {
            access_key: String::new(),
            ..connected()
        };
        let h = Harness::new(config, FakeTransport::new());

        let err = h.dispatcher().send_invoice(&mut invoice_form()).unwrap_err();
        assert_eq!(err, DispatchError::validation(MISSING_ACCESS_KEY));
        assert!(h.store.load_receipts().is_empty());
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn connected_without_gateway_url_is_rejected_locally() {
        let config = AppConfig {
            gateway_base_url: String::new(),
            ..connected()
        };
        let h = Harness::new(config, FakeTransport::new());

        let err = h.dispatcher().export_period(&mut ExportForm::new()).unwrap_err();
        assert_eq!(err, DispatchError::validation(MISSING_GATEWAY_URL));
        assert!(h.store.load_receipts().is_empty());
    }

    #[test]
    fn connected_success_records_receipt_and_archives() {
        let mut reply = json_reply(200, json!({"ok": true, "invoice_id": "inv_9"}));
        reply.request_id = Some("gw_123".into());
        let h = Harness::new(connected(), FakeTransport::new().reply(reply));
        let mut form = invoice_form();

        let result = h.dispatcher().send_invoice(&mut form).unwrap();
        h.archiver.drain();

        assert!(result.is_success());
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.request_id.as_deref(), Some("gw_123"));
        assert_eq!(result.response_payload, Some(json!({"ok": true, "invoice_id": "inv_9"})));
        assert_eq!(form.status, FormStatus { busy: false, phase: Phase::Success });

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].url, "https://gw.example/api/invoice/create_send");
        assert_eq!(calls[0].token, "key");
        assert_eq!(calls[0].body["customer_id"], "client_1");
        assert_eq!(calls[1].url, "https://gw.example/episode/store");
        assert_eq!(calls[1].body["action"], "create_send");
        assert_eq!(calls[1].body["gw_request_id"], "gw_123");
        assert_eq!(calls[1].body["inputs"]["request"], calls[0].body);

        let receipts = h.store.load_receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].status, ReceiptStatus::Ok);
        assert_eq!(receipts[0].request_id.as_deref(), Some("gw_123"));
    }

    #[test]
    fn archive_failure_does_not_change_result() {
        let h = Harness::new(
            connected(),
            FakeTransport::new()
                .reply(json_reply(201, json!({"ok": true})))
                .fail("archive down"),
        );

        let result = h.dispatcher().send_invoice(&mut invoice_form()).unwrap();
        h.archiver.drain();

        assert!(result.is_success());
        assert_eq!(h.store.load_receipts()[0].status, ReceiptStatus::Ok);
    }

    #[test]
    fn remote_rejection_is_an_error_result_with_receipt() {
        let h = Harness::new(
            connected(),
            FakeTransport::new().reply(json_reply(422, json!({"error": "bad customer"}))),
        );
        let mut form = invoice_form();

        let result = h.dispatcher().send_invoice(&mut form).unwrap();
        h.archiver.drain();

        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.status_code, Some(422));
        assert_eq!(result.response_payload, Some(json!({"error": "bad customer"})));
        assert_eq!(form.status.phase, Phase::Error);
        assert_eq!(h.transport.calls().len(), 1);
        assert_eq!(h.store.load_receipts()[0].status, ReceiptStatus::Error);
    }

    #[test]
    fn transport_failure_is_an_error_result_with_receipt() {
        let h = Harness::new(connected(), FakeTransport::new().fail("dns error"));
        let mut form = ExportForm::new();

        let result = h.dispatcher().export_period(&mut form).unwrap();

        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.status_code, None);
        assert_eq!(result.request_id, None);
        assert!(result.message.contains("dns error"));
        assert!(!form.status.busy);

        let receipts = h.store.load_receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].status, ReceiptStatus::Error);
        assert_eq!(receipts[0].request_id, None);
    }

    #[test]
    fn non_json_body_is_wrapped_as_raw_text() {
        let h = Harness::new(connected(), FakeTransport::new().reply(text_reply(200, "queued")));
        let result = h.dispatcher().export_period(&mut ExportForm::new()).unwrap();
        h.archiver.drain();
        assert_eq!(result.response_payload, Some(json!({"raw_text": "queued"})));
    }

    #[test]
    fn json_content_type_with_bad_body_falls_back_to_raw_text() {
        let mut reply = json_reply(200, json!(null));
        reply.body = "<html>".into();
        assert_eq!(normalize_body(&reply), json!({"raw_text": "<html>"}));
    }

    #[test]
    fn busy_form_refuses_resubmission() {
        let h = Harness::new(AppConfig::default(), FakeTransport::new());
        let mut form = invoice_form();
        form.status.busy = true;

        assert_eq!(h.dispatcher().send_invoice(&mut form), Err(DispatchError::Busy));
        assert!(h.store.load_receipts().is_empty());
    }
}
