//! Command-line front end for the contact directory.
//!
//! Usage:
//!     directory --backend-url https://api.example.com list person --filter city=Oslo --sort name
//!     directory import people.xlsx --server-side

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contact_directory::config::AppConfig;
use contact_directory::domain::entities::import_job::{
    mime_for_path, JobState, RowStatus, SourceFile,
};
use contact_directory::domain::entities::query::PageSize;
use contact_directory::domain::entities::record::{
    InteractionFields, Interactions, Persons, RecordId, Resource, ResourceKind,
};
use contact_directory::infra::http::client::HttpDirectoryApi;
use contact_directory::usecase::ports::api::{DirectoryApi, MutationOp};
use contact_directory::usecase::services::edit_service::EditService;
use contact_directory::usecase::services::export_service::ExportService;
use contact_directory::usecase::services::grid_controller::GridController;
use contact_directory::usecase::services::import_service::{ImportHandle, ImportService};
use contact_directory::usecase::services::person_picker::PersonPicker;

#[derive(Parser, Debug)]
#[command(name = "directory", about = "Browse, edit and import a contact directory")]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API base URL
    #[arg(long, global = true, env = "DIRECTORY_BACKEND_URL")]
    backend_url: Option<String>,

    /// Authorization header value, sent verbatim
    #[arg(long, global = true, env = "DIRECTORY_AUTH", hide_env_values = true)]
    auth: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ResourceArg {
    Person,
    Interaction,
}

impl From<ResourceArg> for ResourceKind {
    fn from(value: ResourceArg) -> Self {
        match value {
            ResourceArg::Person => ResourceKind::Person,
            ResourceArg::Interaction => ResourceKind::Interaction,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show one page of records
    List {
        resource: ResourceArg,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        page_size: Option<u32>,
        /// Column to sort by; repeat to cycle the direction
        #[arg(long = "sort")]
        sort: Vec<String>,
        /// field=value; enumerated columns take a comma-separated list
        #[arg(long = "filter", value_parser = parse_filter_arg)]
        filters: Vec<(String, String)>,
    },
    /// Soft-delete a record
    Delete { resource: ResourceArg, id: i64 },
    /// Restore a soft-deleted record
    Restore { resource: ResourceArg, id: i64 },
    /// Import persons from a .xls, .xlsx or .csv file
    Import {
        file: PathBuf,
        /// Let the server process the rows and follow its progress
        #[arg(long)]
        server_side: bool,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Download every record as CSV
    Export {
        resource: ResourceArg,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Record one interaction for one or more persons
    AddInteraction {
        #[arg(long = "person", required = true)]
        persons: Vec<String>,
        #[arg(long)]
        method: String,
        #[arg(long = "type")]
        kind: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long)]
        duration: String,
        #[arg(long)]
        notes: String,
    },
}

fn parse_filter_arg(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(field, value)| (field.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected field=value, got {raw}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contact_directory=info,directory=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }
    if let Some(auth) = cli.auth {
        config.auth_header = Some(auth);
    }

    let api: Arc<dyn DirectoryApi> = Arc::new(HttpDirectoryApi::new(config.http_settings())?);
    tracing::debug!(backend = %config.backend_url, "using backend");

    match cli.command {
        Command::List {
            resource,
            page,
            page_size,
            sort,
            filters,
        } => {
            let page_size = match page_size {
                Some(size) => PageSize::try_from(size)?,
                None => config.page_size(),
            };
            let grid = GridArgs {
                page,
                page_size,
                sort,
                filters,
            };
            match resource {
                ResourceArg::Person => list::<Persons>(api, &config, grid).await,
                ResourceArg::Interaction => list::<Interactions>(api, &config, grid).await,
            }
        }
        Command::Delete { resource, id } => {
            mutate(api, &config, resource, RecordId(id), MutationOp::SoftDelete).await
        }
        Command::Restore { resource, id } => {
            mutate(api, &config, resource, RecordId(id), MutationOp::Restore).await
        }
        Command::Import {
            file,
            server_side,
            concurrency,
        } => import(api, &config, &file, server_side, concurrency).await,
        Command::Export { resource, out } => {
            let path = ExportService::new(api).export(resource.into(), &out).await?;
            println!("wrote {}", path.display());
            Ok(())
        }
        Command::AddInteraction {
            persons,
            method,
            kind,
            date,
            duration,
            notes,
        } => {
            let fields = InteractionFields {
                kind,
                method,
                date,
                duration,
                notes,
                ..InteractionFields::default()
            };
            add_interaction(api, &persons, &fields).await
        }
    }
}

struct GridArgs {
    page: u32,
    page_size: PageSize,
    sort: Vec<String>,
    filters: Vec<(String, String)>,
}

async fn list<R: Resource>(
    api: Arc<dyn DirectoryApi>,
    config: &AppConfig,
    args: GridArgs,
) -> Result<()> {
    let grid = GridController::<R>::new(api, args.page_size, config.debounce());
    for (field, raw) in &args.filters {
        let column =
            R::column(field).with_context(|| format!("{} has no column {field}", R::KIND))?;
        grid.set_filter(field, column.parse_filter(raw)?)?;
    }
    for field in &args.sort {
        grid.set_sort(field)?;
    }
    grid.set_page(args.page);
    grid.settled().await;

    if let Some(err) = grid.last_error() {
        bail!("could not load {} records: {err}", R::KIND);
    }

    let columns = R::columns();
    println!(
        "{}",
        columns.iter().map(|c| c.label).collect::<Vec<_>>().join("\t")
    );
    for record in grid.current_rows() {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| R::cell(&record, c.field).unwrap_or_default())
            .collect();
        println!("{}", cells.join("\t"));
    }

    let info = grid.current_page_info();
    let total = grid.total_count().unwrap_or(0);
    println!("page {} of {} ({total} records)", info.page, info.total_pages);
    for (label, description) in grid.filter_summary() {
        println!("filter: {label} {description}");
    }
    Ok(())
}

async fn mutate(
    api: Arc<dyn DirectoryApi>,
    config: &AppConfig,
    resource: ResourceArg,
    id: RecordId,
    op: MutationOp,
) -> Result<()> {
    let name = op.name();
    match resource {
        ResourceArg::Person => {
            let grid = GridController::<Persons>::new(api, config.page_size(), config.debounce());
            grid.mutate(id, op).await?;
            grid.settled().await;
        }
        ResourceArg::Interaction => {
            let grid =
                GridController::<Interactions>::new(api, config.page_size(), config.debounce());
            grid.mutate(id, op).await?;
            grid.settled().await;
        }
    }
    println!("{name}: {} {id} done", ResourceKind::from(resource));
    Ok(())
}

async fn import(
    api: Arc<dyn DirectoryApi>,
    config: &AppConfig,
    path: &Path,
    server_side: bool,
    concurrency: Option<usize>,
) -> Result<()> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();
    let file = SourceFile::new(name, mime_for_path(path), content);

    let mut import_config = config.import_config();
    if let Some(concurrency) = concurrency {
        import_config.concurrency = concurrency.max(1);
    }
    let service = ImportService::new(api, import_config);

    let handle: ImportHandle = if server_side {
        service.start_upload(file)?
    } else {
        let job = service.prepare(&file)?;
        if !job.skipped_rows().is_empty() {
            eprintln!("skipping {} rows without a name", job.skipped_rows().len());
        }
        service.start(job)
    };

    let mut progress = handle.subscribe();
    while progress.changed().await.is_ok() {
        let snapshot = *progress.borrow_and_update();
        eprintln!(
            "{}/{} processed ({} ok, {} failed)",
            snapshot.processed, snapshot.total, snapshot.succeeded, snapshot.failed
        );
    }

    let job = handle.finish().await?;
    for outcome in job.outcomes().iter().filter(|o| o.status != RowStatus::Success) {
        println!(
            "row {}: {:?} {}",
            outcome.row_index + 1,
            outcome.status,
            outcome.message.as_deref().unwrap_or("")
        );
    }

    let summary = job.progress();
    match job.state() {
        JobState::Completed => {
            println!(
                "imported {} of {} rows ({} duplicates)",
                summary.succeeded, summary.total, summary.duplicates
            );
            Ok(())
        }
        JobState::Aborted(reason) => bail!("import aborted: {reason}"),
        other => bail!("import ended in unexpected state {other:?}"),
    }
}

async fn add_interaction(
    api: Arc<dyn DirectoryApi>,
    names: &[String],
    fields: &InteractionFields,
) -> Result<()> {
    let mut picker = PersonPicker::new(Arc::clone(&api));
    for name in names {
        let suggestions = picker.suggest(name).await?;
        let person = suggestions
            .iter()
            .find(|p| p.fields.name.eq_ignore_ascii_case(name.trim()))
            .or_else(|| suggestions.first())
            .with_context(|| format!("no person matches {name}"))?;
        picker.choose(person);
    }

    let report = EditService::new(api)
        .save_interaction(fields, picker.participants(), None)
        .await?;
    for (participant, err) in report.failures() {
        eprintln!("{}: {err}", participant.name);
    }
    println!(
        "saved {} of {} interactions",
        report.succeeded(),
        report.results.len()
    );
    Ok(())
}
