use std::path::PathBuf;
use std::process::ExitCode;

mod app;
mod config;
mod db;
mod error;
mod feed;
mod handler;
mod models;
mod services;
mod sync;

use app::App;
use config::{Config, HandlerKind};
use error::{AppError, Result};
use sync::RunReport;

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_DEADLINE: u8 = 2;

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    config: Option<PathBuf>,
    subscriptions: Option<String>,
    dummy: bool,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| AppError::Config("--config needs a path".to_string()))?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--subscriptions" => {
                let value = iter
                    .next()
                    .ok_or_else(|| AppError::Config("--subscriptions needs a path".to_string()))?;
                parsed.subscriptions = Some(value.clone());
            }
            "--dummy" => parsed.dummy = true,
            other => {
                return Err(AppError::Config(format!("unknown argument: {}", other)));
            }
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match parse_args(&args).and_then(|args| load_config(&args)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match App::new(config) {
        Ok(app) => app.run().await,
        Err(e) => Err(e),
    };

    ExitCode::from(exit_status(&result))
}

fn exit_status(result: &Result<RunReport>) -> u8 {
    match result {
        Ok(report) => {
            tracing::info!("Run complete: {}", report);
            EXIT_SUCCESS
        }
        Err(e) if e.is_deadline() => {
            tracing::error!("{}", e);
            EXIT_DEADLINE
        }
        Err(e) if e.is_fatal() => {
            tracing::error!("Nothing was processed: {}", e);
            EXIT_FAILURE
        }
        Err(e) => {
            tracing::error!("Run failed: {}", e);
            EXIT_FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(path) = &args.subscriptions {
        config.subscriptions_path = path.clone();
    }
    if args.dummy {
        config.handler = HandlerKind::Dummy;
    }
    config.validate()?;
    Ok(config)
}
