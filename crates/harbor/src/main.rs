//! Harbor - Entry point

use std::path::PathBuf;

use anyhow::Context;

use harbor_config::{ConfigLoader, HarborConfig, DEFAULT_ENV_PREFIX};
use harbor_server::ShutdownSignal;

/// Environment variable naming the configuration file.
const CONFIG_PATH_VAR: &str = "HARBOR_CONFIG";

/// Configuration file used when neither `--config` nor `HARBOR_CONFIG` is
/// given. It may be absent.
const DEFAULT_CONFIG_PATH: &str = "harbor.toml";

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("harbor {}", harbor::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(2);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r#"Harbor - minimal HTTP service

USAGE:
    harbor [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    HARBOR_CONFIG                          Configuration file (default: harbor.toml, optional)
    HARBOR__SERVER__HTTP_ADDR              Bind address (default: 0.0.0.0:8080, ":8080" for dual-stack)
    HARBOR__SERVER__SHUTDOWN_TIMEOUT_SECS  Connection drain timeout (default: 10)
    HARBOR__LIFECYCLE__STOP_TIMEOUT_SECS   Deadline for all stop hooks (default: 15)
    HARBOR__TELEMETRY__LOGGING__LEVEL      Log filter (default: info)
    HARBOR__TELEMETRY__LOGGING__FORMAT     json or pretty (default: json)

ENDPOINTS:
    GET /          Greeting
    GET /metrics   Prometheus metrics
    GET /healthz   Liveness probe
    GET /readyz    Readiness probe (503 while starting or draining)
"#
    );
}

fn load_config(args: &Args) -> anyhow::Result<HarborConfig> {
    let loader = match (&args.config, std::env::var_os(CONFIG_PATH_VAR)) {
        (Some(path), _) => ConfigLoader::new()
            .with_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        (None, Some(path)) => ConfigLoader::new()
            .with_file(&path)
            .with_context(|| format!("failed to load {}", PathBuf::from(&path).display()))?,
        (None, None) => ConfigLoader::new()
            .with_optional_file(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("failed to load {DEFAULT_CONFIG_PATH}"))?,
    };

    loader
        .with_dotenv()?
        .with_env_prefix(DEFAULT_ENV_PREFIX)
        .load()
        .context("invalid configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let telemetry = config.telemetry_config()?;
    let metrics =
        harbor_telemetry::init_telemetry(&telemetry).context("failed to initialize telemetry")?;

    tracing::info!(
        version = harbor::VERSION,
        addr = %config.server.http_addr,
        "Starting Harbor"
    );

    let app = harbor::App::new(&config, metrics);
    app.run(ShutdownSignal::with_os_signals())
        .await
        .context("service lifecycle failed")?;

    tracing::info!("Harbor stopped");
    Ok(())
}
