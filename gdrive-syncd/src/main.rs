use std::path::PathBuf;

use anyhow::Context;
use gdrive_syncd::config::WorkerConfig;
use gdrive_syncd::telemetry::init_tracing;
use gdrive_syncd::worker::{RunTally, WorkerRuntime};
use tokio::io::BufReader;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Stdin,
    Payload(String),
    JobsFile(PathBuf),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Stdin;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--payload" => {
                let payload = args.next().context("--payload requires a value")?;
                mode = CliMode::Payload(payload);
            }
            "--jobs" => {
                let path = args.next().context("--jobs requires a file path")?;
                mode = CliMode::JobsFile(PathBuf::from(path));
            }
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: gdrive-syncd [--payload <json>] [--jobs <file>]");
        println!("  --payload <json>   Run a single job payload and exit");
        println!("  --jobs <file>      Run newline-delimited payloads from a file");
        println!("Without options, payloads are read line by line from stdin.");
        return Ok(());
    }

    init_tracing("info");
    let config = WorkerConfig::from_env()?;
    let worker = WorkerRuntime::bootstrap(config).await?;

    let tally = match mode {
        CliMode::Payload(raw) => {
            let mut tally = RunTally::default();
            tally.record(&worker.process_payload(&raw).await);
            tally
        }
        CliMode::JobsFile(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open jobs file {path:?}"))?;
            worker.run(BufReader::new(file)).await?
        }
        CliMode::Stdin | CliMode::Help => worker.run(BufReader::new(tokio::io::stdin())).await?,
    };

    tracing::info!(
        received = tally.received,
        completed = tally.completed,
        rejected = tally.rejected,
        failed = tally.failed,
        "worker finished"
    );
    Ok(())
}
