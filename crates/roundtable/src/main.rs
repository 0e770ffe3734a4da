#[macro_use]
extern crate tracing;

use std::process::ExitCode;

use roundtable::core::{CancellationToken, RunResult, StopReason};
use roundtable::{Args, Config, ConsoleSink, Logging, StdinInput};
use tokio::runtime::Runtime;

fn main() -> ExitCode {
    let args = Args::load();
    let logging = match Logging::init(args.log_file.as_deref()) {
        Ok(logging) => logging,
        Err(err) => {
            eprintln!("failed to open log file: {err}");
            return ExitCode::FAILURE;
        }
    };

    let code = match args.into_config() {
        Ok(config) => match Runtime::new() {
            Ok(runtime) => {
                let code = runtime.block_on(converse(config));
                // A pending stdin read would keep a graceful shutdown waiting.
                runtime.shutdown_background();
                code
            }
            Err(err) => {
                error!("failed to start the runtime: {err}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            error!("ConfigurationError: {err}");
            ExitCode::FAILURE
        }
    };

    logging.flush();
    code
}

async fn converse(config: Config) -> ExitCode {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping the conversation");
                cancel.cancel();
            }
        }
    });

    let provider = roundtable::model_provider(&config);
    let outcome = roundtable::run(
        &config,
        provider,
        StdinInput::new(),
        &mut ConsoleSink::stdout(),
        &cancel,
    )
    .await;

    match outcome {
        Ok(result) => report(&result),
        Err(err) => {
            error!("{}: {err}", err.kind());
            ExitCode::FAILURE
        }
    }
}

fn report(result: &RunResult) -> ExitCode {
    let len = result.transcript.len();
    let last = result
        .transcript
        .last()
        .map(|message| format!("last from {}", message.sender()))
        .unwrap_or_else(|| "empty".to_owned());
    match &result.stop {
        StopReason::Condition(condition) => {
            info!("stopped by {condition} after {len} message(s)");
            ExitCode::SUCCESS
        }
        StopReason::Cancelled => {
            warn!("Cancelled with {len} message(s), {last}");
            ExitCode::from(130)
        }
        StopReason::Failed(err) => {
            error!("{}: {err} ({len} message(s), {last})", err.kind());
            ExitCode::FAILURE
        }
    }
}
