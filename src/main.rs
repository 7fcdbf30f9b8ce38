use anyhow::{Context, Result};
use clap::Parser;
use regulador::cli::{Cli, OutputFormat};
use regulador::config::GovernorConfig;
use regulador::simulate::{self, SimulationOptions};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    if args.print_default_config {
        print!("{}", GovernorConfig::default().to_toml_string()?);
        return Ok(());
    }

    if !(args.frame_ms > 0.0 && args.frame_ms.is_finite()) {
        anyhow::bail!(
            "Invalid value for --frame-ms: {} (must be a positive number)",
            args.frame_ms
        );
    }

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = match &args.config {
        Some(path) => GovernorConfig::from_toml(path)?,
        None => GovernorConfig::default(),
    };

    let options = SimulationOptions {
        frames: args.frames,
        frame_ms: args.frame_ms,
    };
    let report = simulate::run(config, options)?;

    match args.format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .context("Failed to serialize simulation report")?;
            println!("{json}");
        }
    }
    Ok(())
}
