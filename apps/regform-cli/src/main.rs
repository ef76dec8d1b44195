use std::fs;
use std::io::{self, Read as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::future::join_all;
use regform_core::{
    config_schema_json, load_config, EngineConfig, FormInput, FormSession, PartialRegistration,
    Registration, SchemaMode, Submission, ValidationPipeline,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "regform", version, about = "Registration form validation engine")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Base URL of the existence lookup endpoint
    #[arg(long, global = true)]
    lookup_url: Option<String>,
    /// Schema variant: required or partial
    #[arg(long, global = true)]
    schema: Option<SchemaMode>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a JSON record and print per-field results
    Validate(InputArgs),
    /// Validate a JSON record and print the accepted typed record
    Submit(InputArgs),
    /// Check whether a single value exists remotely
    Check(CheckArgs),
    /// Replay a JSON-lines stream of edits concurrently and print the final state
    Replay(InputArgs),
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the configuration JSON schema
    Schema(PrettyArgs),
    /// Print the effective configuration after overrides
    Show(PrettyArgs),
}

#[derive(Args)]
struct InputArgs {
    /// Input file, or '-' for stdin
    #[arg(long, default_value = "-")]
    input: String,
    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct CheckArgs {
    /// Candidate value, used verbatim
    value: String,
}

#[derive(Args)]
struct PrettyArgs {
    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
struct EditLine {
    field: String,
    #[serde(default)]
    value: JsonValue,
}

#[derive(Debug, Serialize)]
struct CheckOutput {
    value: String,
    exists: bool,
}

#[derive(Serialize)]
struct ReplayOutput {
    input: FormInput,
    results: JsonValue,
    stale_discarded: u64,
}

fn main() -> ExitCode {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return ExitCode::from(2);
        }
    };
    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns `Ok(false)` when the input was processed but rejected.
async fn run(cli: Cli) -> Result<bool> {
    let config = effective_config(&cli)?;
    match cli.command {
        Commands::Validate(args) => {
            let pipeline = config.build_pipeline()?;
            let input = read_input(&args.input)?;
            let report = pipeline.validate(&input).await;
            print_json(&report, args.pretty)?;
            Ok(report.is_valid())
        }
        Commands::Submit(args) => {
            let pipeline = config.build_pipeline()?;
            let input = read_input(&args.input)?;
            submit(&pipeline, &input, config.schema.mode, args.pretty).await
        }
        Commands::Check(args) => {
            let pipeline = config.build_pipeline()?;
            let exists = pipeline.checker().check_exists(&args.value).await;
            let output = CheckOutput {
                value: args.value,
                exists,
            };
            print_json(&output, false)?;
            Ok(true)
        }
        Commands::Replay(args) => {
            let pipeline = config.build_pipeline()?;
            let edits = read_edits(&args.input)?;
            let session = FormSession::new(pipeline);
            let passes = edits
                .iter()
                .map(|edit| session.edit(&edit.field, edit.value.clone()));
            for outcome in join_all(passes).await {
                outcome?;
            }
            let results = session.results();
            let all_valid = results.values().all(|r| r.valid);
            let output = ReplayOutput {
                input: session.input(),
                results: serde_json::to_value(&results)?,
                stale_discarded: session.stale_discarded(),
            };
            print_json(&output, args.pretty)?;
            Ok(all_valid)
        }
        Commands::Config { cmd } => {
            match cmd {
                ConfigCmd::Schema(args) => print_json(&config_schema_json(), args.pretty)?,
                ConfigCmd::Show(args) => print_json(&config, args.pretty)?,
            }
            Ok(true)
        }
    }
}

async fn submit(
    pipeline: &ValidationPipeline,
    input: &FormInput,
    mode: SchemaMode,
    pretty: bool,
) -> Result<bool> {
    let accepted = match mode {
        SchemaMode::Required => {
            dispatch(pipeline.submit::<Registration>(input).await, pretty)?
        }
        SchemaMode::Partial => dispatch(
            pipeline.submit::<PartialRegistration>(input).await,
            pretty,
        )?,
    };
    Ok(accepted)
}

fn dispatch<T: Serialize>(submission: Submission<T>, pretty: bool) -> Result<bool> {
    submission.dispatch(
        |record| -> Result<bool> {
            tracing::info!("registration accepted");
            print_json(&record, pretty).map(|_| true)
        },
        |errors| -> Result<bool> {
            tracing::info!(fields = errors.fields.len(), "registration rejected");
            let rendered = render_json(&errors, pretty)?;
            eprintln!("{}", rendered);
            Ok(false)
        },
    )
}

fn effective_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(url) = &cli.lookup_url {
        config.lookup.base_url = url.clone();
    }
    if let Some(mode) = cli.schema {
        config.schema.mode = mode;
    }
    Ok(config)
}

fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        Ok(buf)
    } else {
        let path = Path::new(source);
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn read_input(source: &str) -> Result<FormInput> {
    let raw = read_source(source)?;
    let value: JsonValue = serde_json::from_str(&raw).context("input is not valid JSON")?;
    match FormInput::from_value(value) {
        Some(input) => Ok(input),
        None => bail!("input must be a JSON object"),
    }
}

fn read_edits(source: &str) -> Result<Vec<EditLine>> {
    let raw = read_source(source)?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<EditLine>(line)
                .with_context(|| format!("invalid edit on line {}", idx + 1))
        })
        .collect()
}

fn render_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(rendered)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    println!("{}", render_json(value, pretty)?);
    Ok(())
}
