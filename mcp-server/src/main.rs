use clap::Parser;
use safeexec_core::Config;
use safeexec_mcp_server::Cli;
use safeexec_mcp_server::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stderr carries logs and the banner; stdout is reserved for the wire
    // protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref(), cli.overrides())?;

    if !config.quiet {
        eprintln!(
            "SafeExecMCP v{} (strict: {}, sessions: {}, classified paths: {})",
            env!("CARGO_PKG_VERSION"),
            config.strict_mode,
            config.sessions_enabled,
            config.classified_paths.len(),
        );
    }

    run_main(config).await?;
    Ok(())
}
