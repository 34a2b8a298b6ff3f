use super::Host;
use super::config::Config;
use crate::Result;
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Default)]
pub struct ValidateArgs {
    /// Path to configuration file (default is `harvest.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Load and validate the configuration, then print how many repositories use each method.
pub fn validate_config<H: Host>(host: &mut H, args: &ValidateArgs) -> Result<()> {
    match Config::load(Path::new("."), args.config.as_deref()) {
        Ok(config) => {
            let mut output = host.output();
            let _ = writeln!(output, "Configuration file is valid");
            let _ = writeln!(output, "{} repositories", config.repos.len());
            for (method, count) in config.repos_per_method() {
                let _ = writeln!(output, "  {method}: {count}");
            }
            Ok(())
        }
        Err(e) => {
            let _ = writeln!(host.error(), "❌ Configuration validation failed: {e:#}");
            host.exit(1);
            Err(e)
        }
    }
}
