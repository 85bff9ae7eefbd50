use clap::Parser;
use std::process::ExitCode;
use weatherwise_core::{AppError, Config};

mod app;
mod cli;

use app::App;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            if !matches!(e, AppError::Other(_)) {
                eprintln!("{}", e.user_message());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::load()?;
    weatherwise_core::init(&config.logging.level)?;

    let validation = config.validate();
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }
    // `config` still runs so it can print what is wrong
    if !matches!(cli.command, Some(Command::Config)) {
        validation.ensure_valid()?;
    }

    let app = App::new(config, cli.permission.into())?;
    tracing::info!("WeatherWise started");

    let result = cli.run(&app).await;

    app.shutdown();
    Ok(result?)
}
