use anyhow::Result;
use std::path::PathBuf;

use super::Command;
use featureflow::FeatureFlowConfig;

pub struct ConfigCommand {
    pub config: FeatureFlowConfig,
    pub output: Option<PathBuf>,
}

impl ConfigCommand {
    pub fn new(config: FeatureFlowConfig) -> Self {
        Self {
            config,
            output: None,
        }
    }

    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }
}

impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        match &self.output {
            Some(path) => {
                self.config.save_to_file(path)?;
                println!("✅ Configuration saved to {}", path.display());
            }
            None => print!("{}", toml::to_string_pretty(&self.config)?),
        }
        Ok(())
    }
}
