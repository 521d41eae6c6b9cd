use shellextd::daemon::{DaemonConfig, DaemonRuntime};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    PrintSocket,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--print-socket" => mode = CliMode::PrintSocket,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

const USAGE: &str = "Usage: shellextd [--print-socket]
  --print-socket   Print the socket path shell extensions connect to and exit";

/// Output of the modes that exit without serving. Only `--print-socket`
/// needs the configuration.
fn one_shot_output<F>(mode: CliMode, load_config: F) -> anyhow::Result<Option<String>>
where
    F: FnOnce() -> anyhow::Result<DaemonConfig>,
{
    match mode {
        CliMode::Help => Ok(Some(USAGE.to_string())),
        CliMode::PrintSocket => Ok(Some(load_config()?.socket_path.display().to_string())),
        CliMode::Run => Ok(None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mode = parse_cli_mode(std::env::args())?;
    if let Some(output) = one_shot_output(mode, DaemonConfig::from_env)? {
        println!("{output}");
        return Ok(());
    }
    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    daemon.run().await
}
