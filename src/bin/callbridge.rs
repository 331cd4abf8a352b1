use anyhow::{anyhow, Result};
use callbridge::{
    app::{self, AppStateBuilder},
    config::Config,
    handler::middleware::request_log::AccessLogEventFormat,
    version,
};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{
    fmt::time::LocalTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version = version::get_short_version(),
    about = "Bridges dialer webhooks and agent dispositions into the CRM",
    long_about = version::get_version_info()
)]
struct Cli {
    /// Path to the configuration file
    #[clap(
        long,
        global = true,
        help = "Path to the configuration file (TOML format)"
    )]
    conf: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Process one batch of pending recording backups and exit
    BackupRun,
    /// Validate the configuration file and exit
    CheckConfig,
}

fn init_tracing(config: &Config) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let mut env_filter = EnvFilter::from_default_env();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        env_filter = env_filter.add_directive(level.into());
    }
    env_filter = env_filter.add_directive("sqlx=warn".parse()?);

    match config.log_file {
        Some(ref log_file) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
                .map_err(|e| anyhow!("failed to open log file {}: {}", log_file, e))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .event_format(AccessLogEventFormat::new(LocalTime::rfc_3339()))
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .event_format(AccessLogEventFormat::new(LocalTime::rfc_3339())),
                )
                .try_init()?;
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.conf {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };

    if matches!(cli.command, Some(Commands::CheckConfig)) {
        println!(
            "configuration ok: http_addr={} database_url={} crm={} storage={}",
            config.http_addr,
            config.database_url,
            config
                .crm
                .as_ref()
                .and_then(|crm| crm.access_token())
                .is_some(),
            config.storage.is_some(),
        );
        return Ok(());
    }

    let _guard = init_tracing(&config)?;
    info!(version = version::get_short_version(), "starting callbridge");

    let state = AppStateBuilder::new().with_config(config).build().await?;

    if matches!(cli.command, Some(Commands::BackupRun)) {
        let report = state.backup_worker()?.run_batch().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let token = state.token.clone();
    let app_future = app::run(state);
    tokio::pin!(app_future);

    tokio::select! {
        result = &mut app_future => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("received CTRL+C, shutting down");
            token.cancel();
            let _ = app_future.await;
        }
    }
    Ok(())
}
