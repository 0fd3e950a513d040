//! multicmd - run a command template once per row of a tab-separated file
//!
//! # Logging
//!
//! Log output goes to stderr and is filtered through `RUST_LOG`
//! (default `multicmd=info`).

use std::path::PathBuf;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use multicmd::batch::{write_file, Batch, ParameterRow, Progress};
use multicmd::config::{BatchConfig, CommandHistory, PrunePolicy, ShellConfig, MAX_CONCURRENCY, MIN_CONCURRENCY};
use multicmd::{template, MultiCmdError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run a parameterized shell command once per input row, in parallel
#[derive(Parser, Debug)]
#[command(name = "multicmd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Command history file
    #[arg(long, global = true, default_value = "multicmd-settings.json")]
    history: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command template over every row of a tab-separated file
    Run(RunArgs),
    /// Manage saved command templates
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Tab-separated input; the first line is the header
    #[arg(short, long)]
    file: PathBuf,

    /// Command template with {0}, {1}, ... placeholders
    #[arg(short, long, conflicts_with = "saved")]
    template: Option<String>,

    /// Use the N-th saved template instead of --template
    #[arg(long, value_name = "N")]
    saved: Option<usize>,

    /// Number of commands to run at the same time
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(MIN_CONCURRENCY as i64..=MAX_CONCURRENCY as i64))]
    jobs: Option<u32>,

    /// Shell program used to run each command
    #[arg(long)]
    shell: Option<String>,

    /// Which rows `--prune` removes
    #[arg(long, value_enum, default_value_t = PruneArg::Succeeded)]
    prune_policy: PruneArg,

    /// Prune the table after the run and print what remains
    #[arg(long)]
    prune: bool,

    /// Write the final table (pruned, with --prune) as tab-separated text
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Print the command for every row instead of running anything
    #[arg(long)]
    dry_run: bool,

    /// Save the template to the history after the run
    #[arg(long)]
    save_template: bool,

    /// Output format for the final table
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    /// List saved templates
    List,
    /// Save a template
    Add { template: String },
    /// Forget a template
    Remove { template: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PruneArg {
    Succeeded,
    Unset,
}

impl From<PruneArg> for PrunePolicy {
    fn from(arg: PruneArg) -> Self {
        match arg {
            PruneArg::Succeeded => PrunePolicy::Succeeded,
            PruneArg::Unset => PrunePolicy::Unset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("multicmd=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut history = CommandHistory::open(&args.history)
        .with_context(|| format!("failed to read history {}", args.history.display()))?;

    match args.command {
        Commands::Run(run) => run_batch(run, &mut history).await,
        Commands::History { action } => manage_history(action, &mut history),
    }
}

fn manage_history(action: HistoryAction, history: &mut CommandHistory) -> Result<()> {
    match action {
        HistoryAction::List => {
            for (index, template) in history.get().iter().enumerate() {
                println!("{index}\t{template}");
            }
        }
        HistoryAction::Add { template } => {
            if !history.add(template)? {
                println!("already saved");
            }
        }
        HistoryAction::Remove { template } => {
            if !history.remove(&template)? {
                bail!("template not in history: {template}");
            }
        }
    }
    Ok(())
}

async fn run_batch(args: RunArgs, history: &mut CommandHistory) -> Result<()> {
    let template = match (&args.template, args.saved) {
        (Some(template), _) => template.clone(),
        (None, Some(index)) => history
            .get()
            .get(index)
            .cloned()
            .with_context(|| format!("no saved template at index {index}"))?,
        (None, None) => bail!("either --template or --saved is required"),
    };

    let mut config = BatchConfig::default().with_prune_policy(args.prune_policy.into());
    if let Some(jobs) = args.jobs {
        config = config.with_concurrency(jobs as usize);
    }
    if let Some(program) = &args.shell {
        config = config.with_shell(ShellConfig::new(program, ShellConfig::default().args));
    }

    let batch = Batch::new(config);
    batch
        .load_file(&args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;

    if args.dry_run {
        return print_commands(&template, &batch.rows());
    }

    let progress_task = tokio::spawn(report_progress(batch.subscribe_progress()));

    match batch.start(&template) {
        Ok(report) => info!(submitted = report.submitted, skipped = report.skipped, "Dispatch started"),
        Err(MultiCmdError::Template(e)) => warn!(error = %e, "Bad command line"),
        Err(e) => return Err(e).context("failed to start dispatch"),
    }

    tokio::select! {
        _ = batch.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping running commands");
            batch.stop();
        }
    }
    progress_task.abort();

    if args.save_template {
        history.add(template.clone())?;
    }

    print_rows(&batch.headers(), &batch.rows(), args.format)?;

    let failed = batch
        .rows()
        .iter()
        .filter(|row| row.result.is_some_and(|status| status != 0))
        .count();
    if failed > 0 {
        warn!(failed, "Some commands exited with a nonzero status");
    }

    if args.prune {
        let report = batch.prune().context("failed to prune")?;
        info!(removed = report.removed, reset = report.reset, "Pruned");
        print_rows(&batch.headers(), &batch.rows(), args.format)?;
    }

    if let Some(output) = &args.output {
        write_file(output, &batch.headers(), &batch.rows())
            .with_context(|| format!("failed to write {}", output.display()))?;
        info!(path = %output.display(), "Table written");
    }
    Ok(())
}

async fn report_progress(mut rx: tokio::sync::watch::Receiver<Progress>) {
    while rx.changed().await.is_ok() {
        let Progress { done, total } = *rx.borrow_and_update();
        eprint!("\r{done}/{total}");
    }
}

fn print_commands(source: &str, rows: &[ParameterRow]) -> Result<()> {
    for row in rows.iter().filter(|row| row.is_pending()) {
        match template::render(source, row) {
            Ok(command) => println!("{}\t{command}", row.id),
            Err(e @ template::TemplateError::ArityMismatch { .. }) => {
                println!("{}\t# {e}", row.id);
            }
            Err(e) => return Err(e).context("bad command template"),
        }
    }
    Ok(())
}

fn print_rows(headers: &[String], rows: &[ParameterRow], format: OutputFormat) -> Result<()> {
    eprintln!();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Table => {
            println!("#\t{}\tResult", headers.join("\t"));
            for row in rows {
                let result = row.result.map(|status| status.to_string()).unwrap_or_default();
                println!("{}\t{}\t{}", row.id, row.values.join("\t"), result);
            }
        }
    }
    Ok(())
}
