use chain_sentry::config::chains::{ChainConfig, DEFAULT_NETWORKS};
use chain_sentry::supervisor::{resolve_networks, Supervisor};
use chain_sentry::utils::config::MonitorConfig;
use std::process::ExitCode;

const USAGE: &str = "\
chain_sentry - multi-chain contract deployment monitor

USAGE:
    chain_sentry [OPTIONS]

OPTIONS:
    --networks <NAME>...   Networks to monitor (space-separated)
    --all                  Monitor every configured EVM network
    --db <PATH>            Sqlite database path (overrides SENTRY_DB_PATH)
    --help                 Print this help
";

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    networks: Vec<String>,
    all: bool,
    db_path: Option<String>,
    help: bool,
}

fn parse_cli_args<I, S>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = CliArgs::default();
    let mut iter = args.into_iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--networks" => {
                while let Some(next) = iter.peek() {
                    if next.as_ref().starts_with("--") {
                        break;
                    }
                    parsed
                        .networks
                        .push(iter.next().map(|s| s.as_ref().to_string()).unwrap_or_default());
                }
                if parsed.networks.is_empty() {
                    return Err("--networks requires at least one network name".to_string());
                }
            }
            "--all" => parsed.all = true,
            "--db" => {
                parsed.db_path = iter.next().map(|s| s.as_ref().to_string());
                if parsed.db_path.as_deref().map(str::is_empty).unwrap_or(true) {
                    return Err("--db requires a path".to_string());
                }
            }
            "--help" | "-h" => parsed.help = true,
            other => return Err(format!("unknown argument `{other}`")),
        }
    }
    Ok(parsed)
}

fn selected_networks(args: &CliArgs) -> Vec<String> {
    if args.all {
        ChainConfig::all_evm_networks()
    } else if args.networks.is_empty() {
        DEFAULT_NETWORKS.iter().map(|n| (*n).to_string()).collect()
    } else {
        args.networks.clone()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_cli_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    if args.help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let mut config = match MonitorConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Fatal startup error: {}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Some(db_path) = args.db_path.clone() {
        config.db_path = db_path;
    }

    let selection = selected_networks(&args);
    tracing::info!("Selected networks: {}", selection.join(", "));
    let chains = match resolve_networks(&selection) {
        Ok(chains) => chains,
        Err(err) => {
            tracing::error!("Fatal startup error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let supervisor = match Supervisor::new(config, chains) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            tracing::error!("Fatal startup error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match supervisor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("Fatal error: {}", err);
            ExitCode::FAILURE
        }
    }
}
