//! CLI for merging master account snapshots into the local account files.
//!
//! Pipeline: snapshot live files -> load local -> merge each update dir -> promote.

use acctmerge_core::GroupAliasPair;
use acctmerge_engine::sink::json_stream::JsonStreamSink;
use acctmerge_engine::sink::{AuditSink, NullSink};
use acctmerge_engine::{Reconciler, ReconcileConfig, RunReport};
use acctmerge_source::{DirectoryProvider, MasterFileNames};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit status when the run completed but at least one update source failed.
/// Fatal errors exit 1 through `main`'s `Err`.
const PARTIAL_FAILURE_EXIT: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "acctmerge",
    version,
    about = "Merge master account snapshots into the local passwd/group/shadow"
)]
struct Cli {
    /// Working directory holding one subdirectory per update.
    #[arg(long, env = "ACCTMERGE_WORKDIR", default_value = "/root/accounts")]
    workdir: PathBuf,

    /// Directory of the live account files.
    #[arg(long, env = "ACCTMERGE_LIVE_DIR", default_value = "/etc")]
    live_dir: PathBuf,

    #[arg(long, env = "ACCTMERGE_MASTER_PASSWD", default_value = "passwd")]
    master_passwd_file: String,

    #[arg(long, env = "ACCTMERGE_MASTER_GROUP", default_value = "group")]
    master_group_file: String,

    #[arg(long, env = "ACCTMERGE_MASTER_SHADOW", default_value = "shadow")]
    master_shadow_file: String,

    /// Leave the live account files untouched; only write the merged copies.
    #[arg(long, default_value_t = false)]
    no_update: bool,

    /// Flag each merged update directory as processed.
    #[arg(long, env = "ACCTMERGE_MARK_PROCESSED", default_value_t = false)]
    mark_processed: bool,

    /// The two group names allowed to share one gid.
    #[arg(long, env = "ACCTMERGE_ALIAS_GROUPS", default_value = "cuuser,cuuser2")]
    alias_groups: GroupAliasPair,

    /// Decision log: "ndjson" writes NDJSON to stdout,
    /// "ndjson:/path/to/file" writes to file.
    #[arg(long)]
    audit: Option<String>,

    /// Print the run report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn open_audit_sink(spec: Option<&str>) -> Result<Box<dyn AuditSink>, Box<dyn std::error::Error>> {
    match spec {
        None => Ok(Box::new(NullSink)),
        Some("ndjson") => Ok(Box::new(JsonStreamSink::stdout())),
        Some(s) => match s.strip_prefix("ndjson:") {
            Some(path) => {
                let file = std::fs::File::create(path)?;
                Ok(Box::new(JsonStreamSink::new(file)))
            }
            None => Err(format!("Unknown audit sink: {s}. Use 'ndjson' or 'ndjson:/path'").into()),
        },
    }
}

fn exit_status(report: &RunReport) -> u8 {
    if report.is_clean() {
        0
    } else {
        PARTIAL_FAILURE_EXIT
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(workdir = %cli.workdir.display(), live_dir = %cli.live_dir.display(), "start merging accounts");

    let audit_to_stdout = cli.audit.as_deref() == Some("ndjson");
    let sink = open_audit_sink(cli.audit.as_deref())?;
    let provider = DirectoryProvider::new(
        &cli.workdir,
        MasterFileNames {
            passwd: cli.master_passwd_file,
            group: cli.master_group_file,
            shadow: cli.master_shadow_file,
        },
    );

    let mut config = ReconcileConfig::new(cli.workdir, cli.live_dir);
    config.promote = !cli.no_update;
    config.mark_processed = cli.mark_processed;
    config.aliases = cli.alias_groups;

    let mut reconciler = Reconciler::new(config, provider, sink);
    let report = reconciler.run()?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if audit_to_stdout {
        // Keep stdout pure NDJSON.
        eprint!("{}", report.render());
    } else {
        print!("{}", report.render());
    }

    if !report.is_clean() {
        tracing::warn!(failed = report.failed.len(), "some update sources failed");
    }
    Ok(ExitCode::from(exit_status(&report)))
}
