//! Redis Monitor - Binary Entry Point
//!
//! This is the main entry point for the redis-monitor-server binary.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use redis_monitor::{server, Mode, MonitorConfig, MonitorResult};

/// Stream Redis key changes to browsers over WebSocket
#[derive(Parser, Debug)]
#[command(name = "redis-monitor-server", version, about)]
struct Cli {
    /// Port for the dashboard HTTP server
    #[arg(long, default_value_t = 8000)]
    http_port: u16,

    /// Port for the WebSocket server
    #[arg(long, default_value_t = 8001)]
    ws_port: u16,

    /// Redis host
    #[arg(long, default_value = "127.0.0.1")]
    redis_host: String,

    /// Redis port
    #[arg(long, default_value_t = 6379)]
    redis_port: u16,

    /// Redis database number
    #[arg(long, default_value_t = 0)]
    redis_db: i64,

    /// Redis password
    #[arg(long, env = "REDIS_PASSWORD")]
    redis_password: Option<String>,

    /// Seconds between polls (or between flushes in realtime mode)
    #[arg(long, default_value_t = 0.05)]
    refresh_rate: f64,

    /// Only monitor keys matching this regular expression (anchored at the start)
    #[arg(long, default_value = "")]
    key_filter: String,

    /// Use keyspace notifications instead of polling (no deletions reported)
    #[arg(long)]
    realtime: bool,

    /// Directory holding the dashboard's static files
    #[arg(long, default_value = "web")]
    web_root: String,

    /// Log level (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> MonitorConfig {
        let mode = if self.realtime {
            Mode::Notification
        } else {
            Mode::Polling
        };
        // Non-finite or negative rates become zero and fail validation
        let period = Duration::try_from_secs_f64(self.refresh_rate).unwrap_or(Duration::ZERO);

        let mut config = MonitorConfig::new(self.redis_host, self.redis_port)
            .with_db(self.redis_db)
            .with_poll_period(period)
            .with_key_filter(self.key_filter)
            .with_mode(mode)
            .with_ws_addr(SocketAddr::from(([0, 0, 0, 0], self.ws_port)))
            .with_http_addr(Some(SocketAddr::from(([0, 0, 0, 0], self.http_port))))
            .with_web_root(self.web_root);
        if let Some(password) = self.redis_password {
            config = config.with_password(password);
        }
        config
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: MonitorConfig) -> MonitorResult<()> {
    let monitor = server::connect(config).await?;

    let shutdown = monitor.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("received interrupt, shutting down");
        shutdown.trigger();
    })?;

    monitor.run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli.into_config()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "redis monitor failed");
            ExitCode::FAILURE
        }
    }
}
