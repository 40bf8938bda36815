//! `tally`: command-line client for the accounting backend.
//!
//! Runs the import wizard non-interactively, downloads import templates and
//! lists accounting records.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tally_core::{Account, CostCenter, Invoice, JournalEntry, LedgerEvent, PaymentTerm, ThirdParty};
use tally_import::{
    BatchAction, HttpImportSessions, ImportSessionApi, UploadFile, WizardController, WizardStep,
};
use tally_platform::{
    ApiClient, ClientConfig, ColumnMapping, EventBus, ImportPolicy, ImportStatus, PageRequest,
    Resource, ResourceClient, TemplateFormat,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod report;

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "Accounting backend client and data import tool")]
#[command(version)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "TALLY_API_URL")]
    api_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, env = "TALLY_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List models that accept imports
    Models,
    /// Show the importable fields of a model
    Fields { model: String },
    /// Import a CSV, XLSX or JSON file
    Import(ImportArgs),
    /// Download an empty import template, or a filled example
    Template(TemplateArgs),
    /// List records of an accounting resource
    List(ListArgs),
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(short, long)]
    model: String,

    #[arg(short, long)]
    file: PathBuf,

    #[arg(long)]
    policy: Option<ImportPolicy>,

    /// Rows per preview and execution batch
    #[arg(long)]
    batch_size: Option<u32>,

    /// Import the valid rows even when some rows fail validation
    #[arg(long)]
    skip_errors: bool,

    /// Map a column to a field, as COLUMN=FIELD
    #[arg(long = "map", value_parser = parse_pair)]
    mappings: Vec<(String, String)>,

    /// Default for a field no column supplies, as FIELD=VALUE
    #[arg(long = "default", value_parser = parse_pair)]
    defaults: Vec<(String, String)>,

    /// Start from a saved mapping template
    #[arg(long)]
    template: Option<String>,

    /// Save the final mapping as a template under this name
    #[arg(long)]
    save_template: Option<String>,

    /// Minimum confidence for server mapping suggestions
    #[arg(long, default_value_t = 0.8)]
    min_confidence: f64,

    /// Ignore server mapping suggestions
    #[arg(long)]
    no_suggest: bool,

    /// Print every preview batch, not just the first
    #[arg(long)]
    all_batches: bool,

    /// Validate the whole file and stop before importing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct TemplateArgs {
    model: String,

    #[arg(long, default_value = "csv")]
    format: TemplateFormat,

    /// Download a filled example instead of an empty template
    #[arg(long)]
    example: bool,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ListArgs {
    resource: ResourceKind,

    #[arg(long, default_value_t = 1)]
    page: u32,

    #[arg(long, default_value_t = 50)]
    page_size: u32,

    #[arg(long)]
    search: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ResourceKind {
    Accounts,
    JournalEntries,
    CostCenters,
    ThirdParties,
    PaymentTerms,
    Invoices,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    ClientConfig::from_lookup(|key| match key {
        "TALLY_API_URL" => cli.api_url.clone(),
        "TALLY_API_TOKEN" => cli.api_token.clone(),
        other => std::env::var(other).ok(),
    })
}

/// Applies explicit `COLUMN=FIELD` overrides on top of the current mapping.
fn override_mappings(
    current: &[ColumnMapping],
    overrides: &[(String, String)],
) -> Result<Vec<ColumnMapping>> {
    let mut mappings = current.to_vec();
    for (column, field) in overrides {
        let mapping = mappings
            .iter_mut()
            .find(|mapping| mapping.column_name.eq_ignore_ascii_case(column))
            .with_context(|| format!("column '{column}' is not in the uploaded file"))?;
        mapping.field_name = (!field.is_empty()).then(|| field.clone());
    }
    // A field claimed explicitly wins over a suggestion for another column.
    for (column, field) in overrides {
        for mapping in mappings.iter_mut() {
            if !mapping.column_name.eq_ignore_ascii_case(column)
                && mapping.field_name.as_deref() == Some(field.as_str())
            {
                mapping.field_name = None;
            }
        }
    }
    Ok(mappings)
}

async fn run_import(config: &ClientConfig, api: ApiClient, args: ImportArgs) -> Result<()> {
    let sessions = HttpImportSessions::new(api, config.max_upload_bytes);
    let events = EventBus::<LedgerEvent>::default();
    let mut subscription = events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            info!(?event, "ledger event");
        }
    });

    let wizard =
        WizardController::new(Arc::new(sessions), config.max_upload_bytes, config.batch_size)
            .with_events(events);

    wizard
        .select_model(&args.model)
        .await
        .with_context(|| format!("failed to load model '{}'", args.model))?;

    let file = UploadFile::from_path(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    wizard.upload_file(file).await.context("upload failed")?;

    if let Some(name) = &args.template {
        let templates = wizard.list_templates().await?;
        let template = templates
            .iter()
            .find(|template| &template.name == name)
            .with_context(|| format!("no saved template named '{name}'"))?;
        let mapped = wizard.apply_template(template)?;
        info!(template = %name, mapped, "template applied");
    } else if !args.no_suggest {
        let applied = wizard.suggest_mappings(args.min_confidence).await?;
        info!(applied, "mapping suggestions applied");
    }

    if !args.mappings.is_empty() {
        let mappings = override_mappings(wizard.snapshot().column_mappings(), &args.mappings)?;
        wizard.update_column_mappings(mappings)?;
    }
    if let Some(policy) = args.policy {
        wizard.set_import_policy(policy)?;
    }
    if let Some(batch_size) = args.batch_size {
        wizard.set_batch_size(batch_size)?;
    }
    wizard.set_skip_validation_errors(args.skip_errors)?;
    for (field, value) in &args.defaults {
        wizard.set_default_value(field, Some(value.clone()))?;
    }

    for mapping in wizard.snapshot().column_mappings() {
        match &mapping.field_name {
            Some(field) => println!("{} -> {field}", mapping.column_name),
            None => println!("{} (ignored)", mapping.column_name),
        }
    }

    if let Some(name) = &args.save_template {
        let template = wizard.save_template(name).await?;
        println!("saved template '{}'", template.name);
    }

    wizard.generate_preview().await.context("preview failed")?;
    loop {
        let state = wizard.snapshot();
        if let Some(preview) = state.preview_data() {
            print!("{}", report::preview_report(preview));
        }
        if !args.all_batches || !wizard.navigate_batch(BatchAction::Next).await? {
            break;
        }
    }

    if args.dry_run {
        let summary = wizard.validate_full_file().await?;
        println!("full file: {}", report::summary_line(&summary));
        return Ok(());
    }

    if !wizard.go_to_step(WizardStep::Execute) && !args.skip_errors {
        bail!("file has validation errors, fix them or pass --skip-errors");
    }
    let result = if args.skip_errors {
        wizard.execute_import_with_skip_errors().await?
    } else {
        wizard.execute_import().await?
    };
    print!("{}", report::result_report(&result));

    if result.status == ImportStatus::Failed {
        bail!("import of {} failed", result.model);
    }
    Ok(())
}

async fn download_template(sessions: &HttpImportSessions, args: TemplateArgs) -> Result<()> {
    let kind = if args.example { "example" } else { "template" };
    let bytes = if args.example {
        sessions.download_example(&args.model, args.format).await?
    } else {
        sessions.download_template(&args.model, args.format).await?
    };

    let output = args.output.unwrap_or_else(|| {
        PathBuf::from(format!("{}_{kind}.{}", args.model, args.format.extension()))
    });
    tokio::fs::write(&output, &bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

async fn print_page<T: Resource>(resources: &ResourceClient, request: &PageRequest) -> Result<()> {
    let page = resources
        .list::<T>(request)
        .await
        .with_context(|| format!("failed to list {} records", T::NAME))?;
    for item in &page.items {
        println!("{}", serde_json::to_string(item)?);
    }
    println!(
        "page {} of {} ({} {} records)",
        page.page,
        page.total_pages(),
        page.total,
        T::NAME
    );
    Ok(())
}

async fn list_resources(api: ApiClient, args: ListArgs) -> Result<()> {
    let resources = ResourceClient::new(api, EventBus::default());
    let request = PageRequest {
        page: args.page,
        page_size: args.page_size,
        search: args.search,
    };
    match args.resource {
        ResourceKind::Accounts => print_page::<Account>(&resources, &request).await,
        ResourceKind::JournalEntries => print_page::<JournalEntry>(&resources, &request).await,
        ResourceKind::CostCenters => print_page::<CostCenter>(&resources, &request).await,
        ResourceKind::ThirdParties => print_page::<ThirdParty>(&resources, &request).await,
        ResourceKind::PaymentTerms => print_page::<PaymentTerm>(&resources, &request).await,
        ResourceKind::Invoices => print_page::<Invoice>(&resources, &request).await,
    }
}

/// Runs `work` unless `interrupt` resolves first. The interrupted work is
/// dropped at its current await point, so later steps never start.
async fn until_interrupted<T, I>(
    work: impl Future<Output = Result<T>>,
    interrupt: impl Future<Output = I>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = interrupt => {
            warn!("interrupted, import aborted");
            bail!("interrupted, import aborted")
        }
        result = work => result,
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for interrupts: {err}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tally_cli=info,tally_import=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let api = ApiClient::new(&config).context("failed to build HTTP client")?;
    info!(api_url = %config.api_url, "tally client ready");

    match cli.command {
        Command::Models => {
            let sessions = HttpImportSessions::new(api, config.max_upload_bytes);
            for model in sessions.list_models().await? {
                println!("{model}");
            }
            Ok(())
        }
        Command::Fields { model } => {
            let sessions = HttpImportSessions::new(api, config.max_upload_bytes);
            let metadata = sessions.model_metadata(&model).await?;
            for field in &metadata.fields {
                let marker = if field.required { "*" } else { " " };
                let key = if metadata.business_key_fields.contains(&field.name) {
                    " (key)"
                } else {
                    ""
                };
                println!("{marker} {} [{}]{key}", field.name, field.field_type);
            }
            Ok(())
        }
        Command::Import(args) => {
            until_interrupted(run_import(&config, api, args), ctrl_c()).await
        }
        Command::Template(args) => {
            let sessions = HttpImportSessions::new(api, config.max_upload_bytes);
            download_template(&sessions, args).await
        }
        Command::List(args) => list_resources(api, args).await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn interrupt_stops_the_import_before_later_steps() {
        let executed = AtomicBool::new(false);
        let work = async {
            tokio::task::yield_now().await;
            executed.store(true, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        };

        let err = until_interrupted(work, std::future::ready(())).await.unwrap_err();
        assert_eq!(err.to_string(), "interrupted, import aborted");
        assert!(!executed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn uninterrupted_work_returns_its_result() {
        let value = until_interrupted(async { Ok::<_, anyhow::Error>(7) }, std::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(
            parse_pair("notes = a=b").unwrap(),
            ("notes".to_string(), "a=b".to_string())
        );
        assert!(parse_pair("no-separator").is_err());
        assert!(parse_pair("=value").is_err());
    }

    #[test]
    fn overrides_replace_suggested_fields() {
        let current = vec![
            ColumnMapping::mapped("Code", "code"),
            ColumnMapping::mapped("Label", "name"),
            ColumnMapping::unmapped("Title"),
        ];
        let mappings =
            override_mappings(&current, &[("title".to_string(), "name".to_string())]).unwrap();

        assert_eq!(
            mappings,
            vec![
                ColumnMapping::mapped("Code", "code"),
                ColumnMapping::unmapped("Label"),
                ColumnMapping::mapped("Title", "name"),
            ]
        );
        assert!(override_mappings(&current, &[("Missing".to_string(), "x".to_string())]).is_err());
    }

    #[test]
    fn cli_flags_override_environment() {
        let cli = Cli::parse_from([
            "tally",
            "--api-url",
            "http://ledger.test/api",
            "list",
            "cost-centers",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.api_url, "http://ledger.test/api");
        assert!(matches!(
            cli.command,
            Command::List(ListArgs {
                resource: ResourceKind::CostCenters,
                page: 1,
                ..
            })
        ));
    }

    #[test]
    fn import_flags_parse() {
        let cli = Cli::parse_from([
            "tally",
            "--api-url",
            "http://ledger.test",
            "import",
            "--model",
            "account",
            "--file",
            "accounts.csv",
            "--policy",
            "update-only",
            "--map",
            "Code=code",
            "--default",
            "account_type=asset",
            "--skip-errors",
        ]);
        let Command::Import(args) = cli.command else {
            panic!("expected import command");
        };
        assert_eq!(args.policy, Some(ImportPolicy::UpdateOnly));
        assert_eq!(args.mappings, vec![("Code".to_string(), "code".to_string())]);
        assert_eq!(
            args.defaults,
            vec![("account_type".to_string(), "asset".to_string())]
        );
        assert!(args.skip_errors);
        assert_eq!(args.batch_size, None);
    }
}
