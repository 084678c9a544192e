//! Server configuration loaded from environment variables, with CLI
//! overrides for host/port/store-root. Mirrors the teacher's
//! `Config::from_env` shape: `.env` first, then `env::var(...)` with
//! documented defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,

    pub admin_username: String,
    pub admin_password: String,
    pub session_duration: Duration,
    #[allow(dead_code)]
    pub cookie_secret: String,

    pub detector_url: String,
    pub detector_timeout: Duration,
    pub confidence_threshold: f64,

    pub store_root: PathBuf,
    pub worker_concurrency: usize,

    pub temp_age: Duration,
    pub batch_age: Duration,
    pub pending_age: Duration,
    pub heartbeat_period: Duration,
    pub stale_window: Duration,

    pub temp_sweep_period: Duration,
    pub batch_expiry_period: Duration,
    pub session_expiry_period: Duration,

    pub archive_item_threshold: usize,

    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_from: Option<String>,
}

/// CLI overrides. Env vars are read first; any flag here wins.
#[derive(Debug, Parser)]
#[command(name = "imagevet", about = "Batch image-validation orchestrator")]
pub struct Args {
    #[arg(long, env = "SERVER_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "SERVER_PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "STORE_ROOT")]
    pub store_root: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let cfg = Self {
            server_host: env_or("SERVER_HOST", "0.0.0.0"),
            server_port: env_or("SERVER_PORT", "8080").parse().unwrap_or(8080),

            admin_username: env_or("ADMIN_USERNAME", "admin"),
            admin_password: env_or("ADMIN_PASSWORD", "change-me"),
            session_duration: Duration::from_secs(env_or("SESSION_DURATION", "1800").parse().unwrap_or(1800)),
            cookie_secret: env_or("COOKIE_SECRET", "change-me-cookie-secret"),

            detector_url: env_or("DETECTOR_URL", "http://localhost:9000"),
            detector_timeout: Duration::from_secs(10),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", "0.5").parse().unwrap_or(0.5),

            store_root: PathBuf::from(env_or("STORE_ROOT", "./store")),
            worker_concurrency: env_or(
                "WORKER_CONCURRENCY",
                &default_worker_concurrency().to_string(),
            )
            .parse()
            .unwrap_or_else(|_| default_worker_concurrency()),

            temp_age: Duration::from_secs(env_or("TEMP_AGE_SECONDS", "1800").parse().unwrap_or(1800)),
            batch_age: Duration::from_secs(env_or("BATCH_AGE_SECONDS", "86400").parse().unwrap_or(86400)),
            pending_age: Duration::from_secs(env_or("PENDING_AGE_SECONDS", "259200").parse().unwrap_or(259200)),
            heartbeat_period: Duration::from_secs(
                env_or("HEARTBEAT_PERIOD_SECONDS", "30").parse().unwrap_or(30),
            ),
            stale_window: Duration::from_secs(env_or("STALE_WINDOW_SECONDS", "60").parse().unwrap_or(60)),

            temp_sweep_period: Duration::from_secs(
                env_or("TEMP_SWEEP_INTERVAL_SECONDS", "1800").parse().unwrap_or(1800),
            ),
            batch_expiry_period: Duration::from_secs(
                env_or("BATCH_EXPIRY_INTERVAL_SECONDS", "3600").parse().unwrap_or(3600),
            ),
            session_expiry_period: Duration::from_secs(
                env_or("SESSION_EXPIRY_INTERVAL_SECONDS", "900").parse().unwrap_or(900),
            ),

            archive_item_threshold: 300,

            smtp_host: std::env::var("SMTP_HOST").ok(),
            smtp_port: std::env::var("SMTP_PORT").ok().and_then(|p| p.parse().ok()),
            smtp_from: std::env::var("SMTP_FROM").ok(),
        };

        Ok(cfg)
    }

    pub fn apply_cli_overrides(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.server_host = host.clone();
        }
        if let Some(port) = args.port {
            self.server_port = port;
        }
        if let Some(root) = &args.store_root {
            self.store_root = root.clone();
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn default_worker_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).clamp(2, 16)
}
