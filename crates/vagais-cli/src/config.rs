//! コマンドライン / 環境変数（`VAGAIS_*`）からの設定

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use vagais_core::app::{RetryPolicy, RuntimeConfig};
use vagais_core::impls::SimulationConfig;

#[derive(Debug, Parser)]
#[command(name = "vagais")]
#[command(about = "vagais record lifecycle service", version)]
pub struct Cli {
    /// SQLite database URL (`sqlite::memory:` for a throwaway store)
    #[arg(
        long,
        global = true,
        env = "VAGAIS_DATABASE_URL",
        default_value = "sqlite://vagais.db"
    )]
    pub database_url: String,

    /// tracing filter, e.g. `info,vagais_core=debug`
    #[arg(long, global = true, env = "RUST_LOG", default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API with the dispatcher and background loops
    Serve(ServeArgs),

    /// Create the schema and exit
    Migrate,

    /// Delete terminal records older than the retention window and exit
    Cleanup {
        #[arg(long, env = "VAGAIS_RETENTION_DAYS", default_value_t = 30)]
        retention_days: u64,
    },
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, env = "VAGAIS_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    #[arg(long, env = "VAGAIS_WORKERS", default_value_t = 4)]
    pub workers: usize,

    #[arg(long, env = "VAGAIS_QUEUE_CAPACITY", default_value_t = 256)]
    pub queue_capacity: usize,

    /// Deadline of one record's work, retries included
    #[arg(long, env = "VAGAIS_TASK_TIMEOUT_SECS", default_value_t = 30)]
    pub task_timeout_secs: u64,

    /// Total attempts for transient task errors
    #[arg(long, env = "VAGAIS_TASK_MAX_ATTEMPTS", default_value_t = 3)]
    pub task_max_attempts: u32,

    /// Non-terminal records older than this are failed by the reaper
    #[arg(long, env = "VAGAIS_STALE_AFTER_SECS", default_value_t = 600)]
    pub stale_after_secs: u64,

    #[arg(long, env = "VAGAIS_REAP_INTERVAL_SECS", default_value_t = 60)]
    pub reap_interval_secs: u64,

    #[arg(long, env = "VAGAIS_RETENTION_DAYS", default_value_t = 30)]
    pub retention_days: u64,

    #[arg(long, env = "VAGAIS_GC_INTERVAL_SECS", default_value_t = 3600)]
    pub gc_interval_secs: u64,

    /// Webhook endpoints for terminal events (comma separated in the env var)
    #[arg(long = "webhook-url", env = "VAGAIS_WEBHOOK_URLS", value_delimiter = ',')]
    pub webhook_urls: Vec<String>,

    #[arg(long, env = "VAGAIS_WEBHOOK_MAX_ATTEMPTS", default_value_t = 3)]
    pub webhook_max_attempts: u32,

    #[arg(long, env = "VAGAIS_WEBHOOK_TIMEOUT_SECS", default_value_t = 10)]
    pub webhook_timeout_secs: u64,

    /// Skip the simulated provider latencies
    #[arg(long, env = "VAGAIS_INSTANT")]
    pub instant: bool,
}

impl ServeArgs {
    pub fn runtime_config(&self) -> RuntimeConfig {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.task_max_attempts,
                ..RetryPolicy::standard()
            },
            stale_after: Duration::from_secs(self.stale_after_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs),
            retention: retention(self.retention_days),
            gc_interval: Duration::from_secs(self.gc_interval_secs),
            webhook_retry: RetryPolicy {
                max_attempts: self.webhook_max_attempts,
                ..RetryPolicy::standard()
            },
            ..defaults
        }
    }

    pub fn simulation(&self) -> SimulationConfig {
        if self.instant {
            SimulationConfig::instant()
        } else {
            SimulationConfig::default()
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

pub fn retention(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(24 * 60 * 60))
}
