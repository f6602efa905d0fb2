use chrono::{DateTime, Utc};

use crate::error::RosterError;
use crate::model::{Action, Client, Receipt};
use crate::storage::RecordStore;

pub const PRESET_AMOUNTS: [f64; 3] = [60.0, 90.0, 120.0];

pub const MISSING_NAME_OR_EMAIL: &str = "Please enter name and email.";
pub const INVALID_DEFAULT_AMOUNT: &str = "Default amount must be a number.";

/// Create/edit form for a roster entry. `id` is set when editing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientForm {
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub default_amount: String,
}

impl ClientForm {
    pub fn edit(client: &Client) -> Self {
        Self {
            id: Some(client.id.clone()),
            name: client.name.clone(),
            email: client.email.clone(),
            default_amount: client.default_amount.map(|a| a.to_string()).unwrap_or_default(),
        }
    }
}

/// `client_<millis>`, suffixed `_2`, `_3`, ... if that id is already taken.
pub fn generate_client_id(clients: &[Client], now: DateTime<Utc>) -> String {
    let base = format!("client_{}", now.timestamp_millis());
    let taken = |id: &str| clients.iter().any(|c| c.id == id);
    if !taken(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn parse_default_amount(raw: &str) -> Result<Option<f64>, RosterError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<f64>() {
        Ok(amount) if amount.is_finite() => Ok(Some(amount)),
        _ => Err(RosterError::Validation(INVALID_DEFAULT_AMOUNT.to_string())),
    }
}

/// Validates the form and writes the roster back: new clients go first,
/// edits replace in place and keep their id.
pub fn save_client(store: &RecordStore, form: &ClientForm, now: DateTime<Utc>) -> Result<Client, RosterError> {
    let name = form.name.trim();
    let email = form.email.trim();
    if name.is_empty() || email.is_empty() {
        return Err(RosterError::Validation(MISSING_NAME_OR_EMAIL.to_string()));
    }
    let default_amount = parse_default_amount(&form.default_amount)?;

    let mut clients = store.load_clients();
    let saved = match &form.id {
        Some(id) => {
            let slot = clients
                .iter_mut()
                .find(|c| &c.id == id)
                .ok_or_else(|| RosterError::UnknownClient(id.clone()))?;
            slot.name = name.to_string();
            slot.email = email.to_string();
            slot.default_amount = default_amount;
            slot.clone()
        }
        None => {
            let created = Client {
                id: generate_client_id(&clients, now),
                name: name.to_string(),
                email: email.to_string(),
                default_amount,
            };
            clients.insert(0, created.clone());
            created
        }
    };

    store.save_clients(&clients);
    tracing::debug!(id = %saved.id, "client saved");
    Ok(saved)
}

/// Fixed presets plus the client's default amount, ascending.
pub fn amount_presets(client: Option<&Client>) -> Vec<f64> {
    let mut presets = PRESET_AMOUNTS.to_vec();
    if let Some(amount) = client.and_then(|c| c.default_amount) {
        if amount != 0.0 && amount.is_finite() {
            presets.push(amount);
        }
    }
    presets.sort_by(f64::total_cmp);
    presets.dedup();
    presets
}

pub fn format_currency(amount: Option<f64>) -> String {
    match amount {
        Some(a) if !a.is_nan() => format!("{:.2} EUR", a),
        _ => "-".to_string(),
    }
}

/// Most recent invoice receipt, for the "last activity" view.
pub fn last_invoice(receipts: &[Receipt]) -> Option<&Receipt> {
    receipts.iter().find(|r| r.action == Action::CreateSend.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Clock, FixedClock};
    use crate::model::ReceiptStatus;
    use crate::storage::MemoryStorage;
    use chrono::Duration;

    fn form(name: &str, email: &str, amount: &str) -> ClientForm {
        ClientForm {
            id: None,
            name: name.into(),
            email: email.into(),
            default_amount: amount.into(),
        }
    }

    #[test]
    fn new_clients_are_prepended() {
        let store = RecordStore::attached(MemoryStorage::new());
        let now = FixedClock::at("2026-10-19T08:00:00Z").now();

        let first = save_client(&store, &form(" A. Muster ", "a@example.com", "90"), now).unwrap();
        let second = save_client(&store, &form("B", "b@example.com", ""), now + Duration::seconds(1)).unwrap();

        assert_eq!(first.name, "A. Muster");
        assert_eq!(first.default_amount, Some(90.0));
        assert_eq!(second.default_amount, None);
        let ids: Vec<_> = store.load_clients().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn same_millisecond_ids_do_not_collide() {
        let store = RecordStore::attached(MemoryStorage::new());
        let now = FixedClock::at("2026-10-19T08:00:00Z").now();

        let a = save_client(&store, &form("A", "a@x", ""), now).unwrap();
        let b = save_client(&store, &form("B", "b@x", ""), now).unwrap();
        let c = save_client(&store, &form("C", "c@x", ""), now).unwrap();

        assert_eq!(a.id, format!("client_{}", now.timestamp_millis()));
        assert_eq!(b.id, format!("{}_2", a.id));
        assert_eq!(c.id, format!("{}_3", a.id));
    }

    #[test]
    fn edit_keeps_id_and_position() {
        let store = RecordStore::attached(MemoryStorage::new());
        let now = FixedClock::at("2026-10-19T08:00:00Z").now();
        let older = save_client(&store, &form("A", "a@x", "60"), now).unwrap();
        save_client(&store, &form("B", "b@x", ""), now + Duration::seconds(1)).unwrap();

        let mut edit = ClientForm::edit(&older);
        assert_eq!(edit.default_amount, "60");
        edit.email = "new@x".into();
        edit.default_amount.clear();
        let edited = save_client(&store, &edit, now + Duration::seconds(5)).unwrap();

        assert_eq!(edited.id, older.id);
        let clients = store.load_clients();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[1].id, older.id);
        assert_eq!(clients[1].email, "new@x");
        assert_eq!(clients[1].default_amount, None);
    }

    #[test]
    fn rejects_incomplete_or_unknown() {
        let store = RecordStore::attached(MemoryStorage::new());
        let now = FixedClock::at("2026-10-19T08:00:00Z").now();

        assert_eq!(
            save_client(&store, &form("  ", "a@x", ""), now),
            Err(RosterError::Validation(MISSING_NAME_OR_EMAIL.into()))
        );
        assert_eq!(
            save_client(&store, &form("A", "a@x", "ninety"), now),
            Err(RosterError::Validation(INVALID_DEFAULT_AMOUNT.into()))
        );
        let mut ghost = form("A", "a@x", "");
        ghost.id = Some("client_0".into());
        assert_eq!(
            save_client(&store, &ghost, now),
            Err(RosterError::UnknownClient("client_0".into()))
        );
        assert!(store.load_clients().is_empty());
    }

    #[test]
    fn presets_include_client_default_once() {
        let mut client = Client {
            id: "client_1".into(),
            name: "A".into(),
            email: "a@x".into(),
            default_amount: Some(75.0),
        };
        assert_eq!(amount_presets(Some(&client)), vec![60.0, 75.0, 90.0, 120.0]);
        client.default_amount = Some(90.0);
        assert_eq!(amount_presets(Some(&client)), vec![60.0, 90.0, 120.0]);
        assert_eq!(amount_presets(None), PRESET_AMOUNTS.to_vec());
    }

    #[test]
    fn currency_formatting() {
        assert_eq!(format_currency(Some(90.0)), "90.00 EUR");
        assert_eq!(format_currency(Some(f64::NAN)), "-");
        assert_eq!(format_currency(None), "-");
    }

    #[test]
    fn last_invoice_skips_exports() {
        let receipt = |action: &str, id: &str| Receipt {
            ts: "2026-10-19T08:00:00.000Z".into(),
            action: action.into(),
            status: ReceiptStatus::Ok,
            request_id: Some(id.into()),
            client_name: None,
            amount: None,
        };
        let receipts = vec![
            receipt("period_export", "e1"),
            receipt("create_send", "i2"),
            receipt("create_send", "i1"),
        ];
        assert_eq!(last_invoice(&receipts).and_then(|r| r.request_id.as_deref()), Some("i2"));
        assert!(last_invoice(&receipts[..1]).is_none());
    }
}
