use anyhow::Result;
use clap::Parser;

mod cli;

use cli::commands::config::ConfigCommand;
use cli::commands::demo::DemoCommand;
use cli::commands::{show_how_to_get_started, Command};
use cli::{Cli, Commands};
use featureflow::{init_config, init_telemetry, shutdown_telemetry, FeatureFlowConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            FeatureFlowConfig::load_env_file()?;
            FeatureFlowConfig::load_from(path)?
        }
        None => {
            init_config()?;
            featureflow::config()?.clone()
        }
    };
    init_telemetry(&config.observability)?;

    let result = match cli.command {
        None => {
            show_how_to_get_started();
            Ok(())
        }
        Some(Commands::Demo { frames, fail, json }) => {
            tokio::runtime::Runtime::new()?.block_on(async {
                DemoCommand::new(config)
                    .with_frames(frames)
                    .with_failure(fail)
                    .with_json(json)
                    .execute()
                    .await
            })
        }
        Some(Commands::Config { output }) => {
            tokio::runtime::Runtime::new()?.block_on(async {
                ConfigCommand::new(config).with_output(output).execute().await
            })
        }
    };

    shutdown_telemetry();
    result
}
