//! Operator CLI for the student registry.
//!
//! # Responsibility
//! - Wire a `RegistryConfig` into the replication and resync services.
//! - Print results as JSON on stdout, diagnostics on stderr.
//!
//! Exit codes: 0 success, 1 ordinary failure, 2 stores left inconsistent.

use clap::{Args, Parser, Subcommand};
use hogwarts_core::{
    default_log_level, init_logging, PartitionRegistry, RegistryConfig, ReplicationCoordinator,
    ReplicationError, RepoError, Resynchronizer, SqlRecordStore, StoreRole, StudentId, StudentRecord,
    TargetSyncReport,
};
use log::info;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_FAILURE: u8 = 1;
const EXIT_INCONSISTENT: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "hogwarts", version, about = "Replicated student registry")]
struct Cli {
    /// JSON store layout; overrides --data-dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding one SQLite file per store.
    #[arg(long, global = true, default_value = "./hogwarts-data")]
    data_dir: PathBuf,

    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Absolute directory for rolling log files. Logging is off without it.
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every record held by one store.
    List {
        /// authoritative | backup | <house> | partition:<house>
        #[arg(default_value = "authoritative")]
        store: StoreRole,
    },
    /// Create a student in all three target stores.
    Create(StudentArgs),
    /// Overwrite a student's fields in all three target stores.
    Update {
        id: String,
        #[command(flatten)]
        student: StudentArgs,
    },
    /// Delete a student from all three target stores.
    Delete { id: String },
    /// Copy authoritative records missing from every slave store.
    Resync,
    /// Copy authoritative records missing from one store.
    ResyncStore { store: StoreRole },
    /// Core linkage probe.
    Ping,
}

#[derive(Args, Debug)]
struct StudentArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    year: i64,
    #[arg(long)]
    house: String,
    #[arg(long)]
    patronus: Option<String>,
}

impl StudentArgs {
    fn into_record(self) -> Result<StudentRecord, ReplicationError> {
        Ok(StudentRecord::new(
            &self.first_name,
            &self.last_name,
            self.year,
            &self.house,
            self.patronus,
        )?)
    }
}

struct Services {
    coordinator: ReplicationCoordinator<SqlRecordStore>,
    resync: Resynchronizer<SqlRecordStore>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(err) = init_logging(level, log_dir) {
            eprintln!("warning: {err}");
        }
    }

    if let Command::Ping = cli.command {
        println!(
            "hogwarts_core ping={} version={}",
            hogwarts_core::ping(),
            hogwarts_core::core_version()
        );
        return ExitCode::SUCCESS;
    }

    let services = match build_services(&cli) {
        Ok(services) => services,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match run(cli.command, &services).await {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(err) => report(&err),
    }
}

fn build_services(cli: &Cli) -> Result<Services, String> {
    let config = match &cli.config {
        Some(path) => RegistryConfig::load(path).map_err(|err| err.to_string())?,
        None => {
            std::fs::create_dir_all(&cli.data_dir).map_err(|err| {
                format!("cannot create {}: {err}", cli.data_dir.display())
            })?;
            RegistryConfig::local_layout(&cli.data_dir)
        }
    };
    let registry = Arc::new(PartitionRegistry::from_config(&config).map_err(|err| err.to_string())?);
    let store = Arc::new(SqlRecordStore::sqlite());
    info!("event=cli_start module=cli status=ok");

    Ok(Services {
        coordinator: ReplicationCoordinator::new(Arc::clone(&store), Arc::clone(&registry)),
        resync: Resynchronizer::new(store, registry),
    })
}

async fn run(command: Command, services: &Services) -> Result<serde_json::Value, ReplicationError> {
    let coordinator = &services.coordinator;
    match command {
        Command::List { store } => {
            let records = coordinator.list_records(store).await?;
            Ok(json!({ "store": store.to_string(), "records": records }))
        }
        Command::Create(student) => {
            let id = coordinator.create_record(student.into_record()?).await?;
            Ok(json!({ "created": id }))
        }
        Command::Update { id, student } => {
            let id = StudentId::parse(&id)?;
            let record = student.into_record()?;
            coordinator.update_record(&id, &record).await?;
            Ok(json!({ "updated": id }))
        }
        Command::Delete { id } => {
            let id = StudentId::parse(&id)?;
            let record = coordinator
                .list_records(StoreRole::Authoritative)
                .await?
                .into_iter()
                .find(|record| record.id() == Some(&id))
                .ok_or_else(|| ReplicationError::Store(RepoError::NotFound(id.clone())))?;
            coordinator.delete_record(&record).await?;
            Ok(json!({ "deleted": id }))
        }
        Command::Resync => {
            let report = services.resync.resynchronize_all().await?;
            let targets: Vec<serde_json::Value> =
                report.targets.iter().map(target_json).collect();
            Ok(json!({ "source_records": report.source_records, "targets": targets }))
        }
        Command::ResyncStore { store } => {
            let target = services.resync.resynchronize_store(store).await?;
            Ok(target_json(&target))
        }
        Command::Ping => Ok(json!({ "ping": hogwarts_core::ping() })),
    }
}

fn target_json(target: &TargetSyncReport) -> serde_json::Value {
    json!({
        "target": target.target.to_string(),
        "missing": target.missing,
        "inserted": target.inserted,
    })
}

fn report(err: &ReplicationError) -> ExitCode {
    eprintln!("error: {err}");
    if let Some(outcome) = err.outcome() {
        for write in outcome.stores() {
            eprintln!("  {}: {:?}", write.role, write.status);
        }
    }
    if let ReplicationError::SyncIncomplete(report) = err {
        for target in &report.targets {
            eprintln!(
                "  {}: inserted {}/{} errors={:?}",
                target.target, target.inserted, target.missing, target.errors
            );
        }
    }
    if err.is_severe() {
        ExitCode::from(EXIT_INCONSISTENT)
    } else {
        ExitCode::from(EXIT_FAILURE)
    }
}
