mod archive;
mod builder;
mod dispatch;
mod downloads;
mod error;
mod model;
mod operator;
mod roster;
mod settings;
mod storage;
mod transport;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use comfy_table::{Attribute, Cell, Color, Table};
use inquire::{Confirm, DateSelect, Editor, Select, Text};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::archive::EpisodeArchiver;
use crate::builder::{Clock, PeriodPreset, SystemClock};
use crate::dispatch::{ActionResult, Dispatcher, ExportForm, InvoiceForm};
use crate::downloads::Downloads;
use crate::model::{Action, AppMode, Client, ReceiptStatus};
use crate::operator::{DEV_GATEWAY_URL, OperatorConsole, OperatorSettings, example_payload, pretty};
use crate::roster::{ClientForm, amount_presets, format_currency, last_invoice, save_client};
use crate::settings::Settings;
use crate::storage::RecordStore;
use crate::transport::{HttpTransport, Transport};

// ==========================================
// Constants
// ==========================================
const NEW_CLIENT_OPT: &str = "➕ Add New Client";
const OTHER_AMOUNT_OPT: &str = "✏️  Other amount";

// ==========================================
// Structs & Enums
// ==========================================

#[derive(Parser)]
#[command(name = "invoice-console")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and send an invoice
    New {
        /// Client id (prompted when omitted)
        #[arg(long)]
        client: Option<String>,
        /// Amount in EUR (prompted when omitted)
        #[arg(long)]
        amount: Option<f64>,
        /// Due date, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        due: Option<NaiveDate>,
        /// Line item description
        #[arg(long)]
        note: Option<String>,
        /// Execute for real instead of a dry run
        #[arg(long)]
        live: bool,
        /// Write request.json / response.json to the downloads folder
        #[arg(long)]
        save_payloads: bool,
    },
    /// Add a new client
    AddClient {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        default_amount: Option<String>,
    },
    /// Edit an existing client
    EditClient {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Pass an empty string to clear
        #[arg(long)]
        default_amount: Option<String>,
    },
    /// List all clients
    Clients,
    /// Export a period for the tax advisor
    Export {
        #[arg(long, value_enum, default_value_t = PeriodArg::ThisQuarter)]
        period: PeriodArg,
        /// Start date for a custom period
        #[arg(long)]
        start: Option<NaiveDate>,
        /// End date for a custom period
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Execute for real instead of a dry run
        #[arg(long)]
        live: bool,
        #[arg(long)]
        save_payloads: bool,
    },
    /// Show the receipt log
    Receipts,
    /// Show the latest invoice activity
    Today,
    /// Show or change connection settings
    Config {
        #[arg(long, value_enum)]
        mode: Option<AppMode>,
        #[arg(long)]
        access_key: Option<String>,
        #[arg(long)]
        gateway_url: Option<String>,
        #[arg(long)]
        memory_url: Option<String>,
        #[arg(long)]
        memory_token: Option<String>,
        /// Forget the access key and memory token
        #[arg(long)]
        clear_secrets: bool,
        /// Point gateway and memory at the development gateway
        #[arg(long)]
        dev_defaults: bool,
        /// Folder for the local store and downloads
        #[arg(long)]
        data_root: Option<String>,
    },
    /// Technical console for the gateway and memory services
    Operator {
        #[command(subcommand)]
        command: OperatorCommand,
    },
}

#[derive(Subcommand)]
enum OperatorCommand {
    /// Send a JSON payload to a gateway action
    Run {
        #[arg(value_enum)]
        action: Action,
        /// Payload file (opens an editor on the example when omitted)
        #[arg(long)]
        payload: Option<PathBuf>,
        /// Archive the run as an episode when it succeeded
        #[arg(long)]
        store_episode: bool,
        /// Write request.json / response.json to the downloads folder
        #[arg(long)]
        save_payloads: bool,
    },
    /// Print the example payload for an action (all actions when omitted)
    Example {
        #[arg(value_enum)]
        action: Option<Action>,
    },
    /// Show or change operator settings
    Settings {
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        memory_url: Option<String>,
        #[arg(long)]
        memory_token: Option<String>,
        #[arg(long)]
        clear_tokens: bool,
        #[arg(long)]
        dev_defaults: bool,
    },
    /// List the latest stored episodes
    Search,
}

#[derive(Clone, Copy, ValueEnum)]
enum PeriodArg {
    ThisQuarter,
    LastQuarter,
    Custom,
}

struct App {
    store: RecordStore,
    downloads: Downloads,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    archiver: EpisodeArchiver,
}

impl App {
    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(&self.store, self.transport.clone(), self.clock.clone(), &self.archiver)
    }
}

// ==========================================
// Main Function
// ==========================================

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    // 1. Initialize configuration
    let settings = Settings::load();
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new().context("Failed to build HTTP client")?);
    let app = App {
        store: settings.open_store(),
        downloads: Downloads::new(settings.downloads_dir()),
        archiver: EpisodeArchiver::new(transport.clone()),
        transport,
        clock: Arc::new(SystemClock),
    };

    let outcome = match command {
        Commands::New { client, amount, due, note, live, save_payloads } => {
            send_invoice(&app, client, amount, due, note, live, save_payloads)
        }
        Commands::AddClient { name, email, default_amount } => create_client_wizard(&app, name, email, default_amount).map(|_| ()),
        Commands::EditClient { id, name, email, default_amount } => edit_client(&app, &id, name, email, default_amount),
        Commands::Clients => {
            list_clients(&app);
            Ok(())
        }
        Commands::Export { period, start, end, live, save_payloads } => {
            export_period(&app, period, start, end, live, save_payloads)
        }
        Commands::Receipts => {
            list_receipts(&app);
            Ok(())
        }
        Commands::Today => {
            show_today(&app);
            Ok(())
        }
        Commands::Config {
            mode,
            access_key,
            gateway_url,
            memory_url,
            memory_token,
            clear_secrets,
            dev_defaults,
            data_root,
        } => configure(
            &app,
            ConfigChanges { mode, access_key, gateway_url, memory_url, memory_token, clear_secrets, dev_defaults },
            settings,
            data_root,
        ),
        Commands::Operator { command } => run_operator(&app, command),
    };

    // Let background episode stores finish before the process exits.
    app.archiver.drain();
    outcome
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "invoice_console=warn".into()))
        .with_writer(std::io::stderr)
        .init();
}

// ==========================================
// 1. Client Logic
// ==========================================

fn select_or_create_client(app: &App) -> Result<Client> {
    let clients = app.store.load_clients();
    let mut options = vec![NEW_CLIENT_OPT.to_string()];
    options.extend(clients.iter().map(|c| format!("{} ({}) | {}", c.name, c.email, c.id)));

    let choice = Select::new("Please Select Client (Type to Filter):", options).prompt()?;
    if choice == NEW_CLIENT_OPT {
        return create_client_wizard(app, None, None, None);
    }

    let id = choice.rsplit(" | ").next().unwrap_or_default();
    clients
        .into_iter()
        .find(|c| c.id == id)
        .context("Selected client disappeared from the roster")
}

fn create_client_wizard(
    app: &App,
    name: Option<String>,
    email: Option<String>,
    default_amount: Option<String>,
) -> Result<Client> {
    let prompted = name.is_none() || email.is_none();
    if prompted {
        println!("\n--- Creating New Client ---");
    }

    let name = match name {
        Some(name) => name,
        None => Text::new("Client Name:").prompt()?,
    };
    let email = match email {
        Some(email) => email,
        None => Text::new("Client Email:").prompt()?,
    };
    let default_amount = match default_amount {
        Some(amount) => amount,
        None if prompted => Text::new("Default Amount (Optional):").prompt()?,
        None => String::new(),
    };

    let form = ClientForm { id: None, name, email, default_amount };
    let client = save_client(&app.store, &form, app.clock.now())?;
    println!("✅ Client created successfully: {}", client.id);
    Ok(client)
}

fn edit_client(
    app: &App,
    id: &str,
    name: Option<String>,
    email: Option<String>,
    default_amount: Option<String>,
) -> Result<()> {
    let clients = app.store.load_clients();
    let Some(existing) = clients.iter().find(|c| c.id == id) else {
        bail!("No client with id {}", id);
    };

    let mut form = ClientForm::edit(existing);
    if name.is_none() && email.is_none() && default_amount.is_none() {
        form.name = Text::new("Client Name:").with_default(&form.name).prompt()?;
        form.email = Text::new("Client Email:").with_default(&form.email).prompt()?;
        form.default_amount = Text::new("Default Amount (Optional):")
            .with_default(&form.default_amount)
            .prompt()?;
    } else {
        if let Some(name) = name {
            form.name = name;
        }
        if let Some(email) = email {
            form.email = email;
        }
        if let Some(amount) = default_amount {
            form.default_amount = amount;
        }
    }

    let client = save_client(&app.store, &form, app.clock.now())?;
    println!("✅ Client updated: {}", client.id);
    Ok(())
}

fn list_clients(app: &App) {
    let clients = app.store.load_clients();
    if clients.is_empty() {
        println!("(No clients yet)");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![Cell::new("ID"), Cell::new("Name"), Cell::new("Email"), Cell::new("Default")]);
    for client in clients {
        table.add_row(vec![
            Cell::new(client.id),
            Cell::new(client.name),
            Cell::new(client.email),
            Cell::new(format_currency(client.default_amount)),
        ]);
    }
    println!("{table}");
}

// ==========================================
// 2. Invoice & Export
// ==========================================

fn ask_for_amount(client: &Client) -> Result<Option<f64>> {
    let mut options: Vec<String> = amount_presets(Some(client))
        .into_iter()
        .map(|a| format_currency(Some(a)))
        .collect();
    options.push(OTHER_AMOUNT_OPT.to_string());

    let choice = Select::new("Amount:", options).prompt()?;
    let raw = if choice == OTHER_AMOUNT_OPT {
        Text::new("Amount (EUR):").prompt()?
    } else {
        choice.trim_end_matches(" EUR").to_string()
    };
    Ok(raw.trim().parse().ok())
}

fn send_invoice(
    app: &App,
    client_id: Option<String>,
    amount: Option<f64>,
    due: Option<NaiveDate>,
    note: Option<String>,
    live: bool,
    save_payloads: bool,
) -> Result<()> {
    let interactive = client_id.is_none() || amount.is_none();
    let mut form = InvoiceForm::new(app.clock.today());

    let client = match client_id {
        Some(id) => app.store.load_clients().into_iter().find(|c| c.id == id),
        None => Some(select_or_create_client(app)?),
    };
    form.client_id = client.as_ref().map(|c| c.id.clone());
    form.amount = match (amount, &client) {
        (Some(amount), _) => Some(amount),
        (None, Some(client)) => ask_for_amount(client)?,
        (None, None) => None,
    };

    if interactive && client.is_some() {
        form.due_date = match due {
            Some(due) => due,
            None => DateSelect::new("Due Date:").with_default(form.due_date).prompt()?,
        };
        form.note = match note {
            Some(note) => note,
            None => Text::new("Note (Optional):").prompt()?,
        };
        form.dry_run = !live && Confirm::new("Dry run?").with_default(true).prompt()?;
    } else {
        form.due_date = due.unwrap_or(form.due_date);
        form.note = note.unwrap_or_default();
        form.dry_run = !live;
    }

    let result = app.dispatcher().send_invoice(&mut form)?;
    report_result(app, &result, save_payloads)
}

fn export_period(
    app: &App,
    period: PeriodArg,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    live: bool,
    save_payloads: bool,
) -> Result<()> {
    let mut form = ExportForm::new();
    form.preset = match period {
        PeriodArg::ThisQuarter => PeriodPreset::ThisQuarter,
        PeriodArg::LastQuarter => PeriodPreset::LastQuarter,
        PeriodArg::Custom => PeriodPreset::Custom { start, end },
    };
    form.dry_run = !live;

    let result = app.dispatcher().export_period(&mut form)?;
    report_result(app, &result, save_payloads)
}

fn report_result(app: &App, result: &ActionResult, save_payloads: bool) -> Result<()> {
    let icon = if result.is_success() { "✅" } else { "❌" };
    println!("\n{} {}", icon, result.message);
    println!("   Status:     {}", result.status_code.map(|s| s.to_string()).unwrap_or_else(|| "-".into()));
    println!("   Request ID: {}", result.request_id.as_deref().unwrap_or("-"));
    println!("   Receipt:    {}", receipt_note(&app.store));

    if let Some(attachment) = &result.attachment {
        let path = app.downloads.save_json(&attachment.filename, &attachment.payload)?;
        println!("📄 Saved: {}", path.display());
    }
    if save_payloads {
        if let Some(request) = &result.request_payload {
            let path = app.downloads.save_json("request.json", request)?;
            println!("📄 Saved: {}", path.display());
        }
        if let Some(response) = &result.response_payload {
            let path = app.downloads.save_json("response.json", response)?;
            println!("📄 Saved: {}", path.display());
        }
    }
    Ok(())
}

fn receipt_note(store: &RecordStore) -> &'static str {
    if store.is_available() { "saved" } else { "not saved (no storage)" }
}

// ==========================================
// 3. Receipts
// ==========================================

fn list_receipts(app: &App) {
    let receipts = app.store.load_receipts();
    if receipts.is_empty() {
        println!("(No receipts yet)");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Time"),
        Cell::new("Action"),
        Cell::new("Status"),
        Cell::new("Request ID"),
        Cell::new("Client"),
        Cell::new("Amount"),
    ]);
    for receipt in receipts {
        let status = match receipt.status {
            ReceiptStatus::Ok => Cell::new("ok").fg(Color::Rgb { r: 4, g: 120, b: 87 }),
            ReceiptStatus::Error => Cell::new("error").fg(Color::Rgb { r: 185, g: 28, b: 28 }),
        };
        table.add_row(vec![
            Cell::new(receipt.ts),
            Cell::new(receipt.action),
            status,
            Cell::new(receipt.request_id.unwrap_or_else(|| "-".into())),
            Cell::new(receipt.client_name.unwrap_or_else(|| "-".into())),
            Cell::new(format_currency(receipt.amount)),
        ]);
    }
    println!("{table}");
}

fn show_today(app: &App) {
    let config = app.store.load_config();
    println!("--- Today after the session (mode: {}) ---", config.mode);

    let receipts = app.store.load_receipts();
    match last_invoice(&receipts) {
        Some(receipt) => {
            let icon = if receipt.status == ReceiptStatus::Ok { "✅" } else { "⚠️" };
            println!("Last invoice: {} {}", receipt.ts, icon);
        }
        None => println!("No activity saved yet."),
    }
}

// ==========================================
// 4. Config
// ==========================================

struct ConfigChanges {
    mode: Option<AppMode>,
    access_key: Option<String>,
    gateway_url: Option<String>,
    memory_url: Option<String>,
    memory_token: Option<String>,
    clear_secrets: bool,
    dev_defaults: bool,
}

fn configure(app: &App, changes: ConfigChanges, mut settings: Settings, data_root: Option<String>) -> Result<()> {
    // A new root means a different store file; later changes must land there.
    let relocated = match data_root {
        Some(root) => {
            settings.data_root = root;
            let path = settings.save()?;
            println!("✅ Settings saved: {}", path.display());
            Some((settings.open_store(), Downloads::new(settings.downloads_dir())))
        }
        None => None,
    };
    let (store, downloads) = match &relocated {
        Some((store, downloads)) => (store, downloads),
        None => (&app.store, &app.downloads),
    };

    let mut config = store.load_config();
    let mut changed = false;
    if let Some(mode) = changes.mode {
        config.mode = mode;
        changed = true;
    }
    for (value, slot) in [
        (changes.access_key, &mut config.access_key),
        (changes.gateway_url, &mut config.gateway_base_url),
        (changes.memory_url, &mut config.memory_base_url),
        (changes.memory_token, &mut config.memory_token),
    ] {
        if let Some(value) = value {
            *slot = value.trim().to_string();
            changed = true;
        }
    }
    if changes.clear_secrets {
        config.access_key.clear();
        config.memory_token.clear();
        changed = true;
    }
    if changes.dev_defaults {
        config.gateway_base_url = DEV_GATEWAY_URL.to_string();
        config.memory_base_url = DEV_GATEWAY_URL.to_string();
        changed = true;
    }

    if changed {
        store.save_config(&config);
        println!("✅ Configuration saved.");
    }

    let mut table = Table::new();
    table.set_header(vec![Cell::new("Setting"), Cell::new("Value")]);
    table.add_row(vec![Cell::new("Mode"), Cell::new(config.mode).add_attribute(Attribute::Bold)]);
    table.add_row(vec![Cell::new("Access key"), Cell::new(mask(&config.access_key))]);
    table.add_row(vec![Cell::new("Gateway base URL"), Cell::new(or_dash(&config.gateway_base_url))]);
    table.add_row(vec![Cell::new("Memory base URL"), Cell::new(or_dash(&config.memory_base_url))]);
    table.add_row(vec![Cell::new("Memory token"), Cell::new(mask(&config.memory_token))]);
    table.add_row(vec![Cell::new("Data root"), Cell::new(settings.root().display())]);
    table.add_row(vec![Cell::new("Downloads"), Cell::new(downloads.dir().display())]);
    println!("{table}");
    Ok(())
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() { "-" } else { "(saved)" }
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

// ==========================================
// 5. Operator Console
// ==========================================

fn run_operator(app: &App, command: OperatorCommand) -> Result<()> {
    let settings = OperatorSettings::load(&app.store);
    let mut console = OperatorConsole::new(settings, app.transport.clone(), app.clock.clone());

    match command {
        OperatorCommand::Run { action, payload, store_episode, save_payloads } => {
            let payload_text = match payload {
                Some(path) => fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?,
                None => Editor::new("Payload:")
                    .with_predefined_text(&pretty(&example_payload(action, app.clock.as_ref())))
                    .with_file_extension(".json")
                    .prompt()?,
            };

            let report = console.run(action, &payload_text)?;
            println!("--- Request ---\n{}", report.request_text);
            let icon = if report.ok { "✅" } else { "❌" };
            println!("{} Status:  {}", icon, report.status_code.map(|s| s.to_string()).unwrap_or_else(|| "-".into()));
            println!("Request ID: {}", report.request_id.as_deref().unwrap_or("-"));
            if let Some(notice) = &report.notice {
                println!("⚠️  {}", notice);
            }
            if let Some(text) = &report.response_text {
                let label = if report.response_is_json { "Response" } else { "Response (raw)" };
                println!("--- {} ---\n{}", label, text);
            }

            if save_payloads {
                for path in report.save_payloads(&app.downloads)? {
                    println!("📄 Saved: {}", path.display());
                }
            }

            if store_episode {
                match console.last_run() {
                    Some(run) if run.ok => {
                        let stored = console.store_episode();
                        print_memory_report("Store", &stored);
                    }
                    _ => println!("⚠️  Only successful runs are archived."),
                }
            }
        }
        OperatorCommand::Example { action: Some(action) } => {
            println!("{}", pretty(&example_payload(action, app.clock.as_ref())));
        }
        OperatorCommand::Example { action: None } => {
            for action in Action::ALL {
                println!("--- {} ---", action);
                println!("{}", pretty(&example_payload(action, app.clock.as_ref())));
            }
        }
        OperatorCommand::Settings { base_url, token, memory_url, memory_token, clear_tokens, dev_defaults } => {
            let settings = &mut console.settings;
            let edited = base_url.is_some() || token.is_some() || memory_url.is_some() || memory_token.is_some();
            if let Some(value) = base_url {
                settings.base_url = value;
            }
            if let Some(value) = token {
                settings.token = value;
            }
            if let Some(value) = memory_url {
                settings.memory_base_url = value;
            }
            if let Some(value) = memory_token {
                settings.memory_token = value;
            }
            if edited {
                settings.save(&app.store)?;
                println!("✅ Operator settings saved.");
            }
            if dev_defaults {
                settings.use_dev_defaults(&app.store);
            }
            if clear_tokens {
                settings.clear_tokens(&app.store);
            }

            println!("Gateway base URL: {}", settings.base_url);
            println!("Gateway token:    {}", mask(&settings.token));
            println!("Memory base URL:  {}", settings.memory_base_url);
            println!("Memory token:     {}", mask(&settings.memory_token));
        }
        OperatorCommand::Search => {
            let search = console.search_episodes();
            print_memory_report("Search", &search.report);
            println!("--- {} episode(s) ---", search.episodes.len());
            for episode in &search.episodes {
                println!("{}", pretty(episode));
            }
        }
    }
    Ok(())
}

fn print_memory_report(label: &str, report: &operator::MemoryReport) {
    let status = report.status_code.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
    println!("{} status: {}", label, status);
    if let Some(error) = &report.error {
        println!("⚠️  {}", error);
    }
    if let Some(text) = &report.response_text {
        println!("{}", text);
    }
}
