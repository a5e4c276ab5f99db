use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::services::{
    claim_manager::DEFAULT_CLAIM_DURATION_SECS, expiry_sweeper::DEFAULT_SWEEP_INTERVAL,
    lost_found_service::ServiceSettings, search_ranker::ScoreBlend,
};

/// Upper bounds keep every configured window inside chrono's timestamp range.
const MAX_CLAIM_DURATION_SECS: i64 = 10 * 365 * 86_400;
const MAX_SWEEP_INTERVAL_SECS: u64 = 7 * 86_400;
const MAX_DEPOSIT_SKEW_SECS: i64 = 86_400;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// How long a claim holds an item.
    pub claim_duration_secs: i64,
    pub sweep_interval_secs: u64,
    pub search_threshold: f32,
    pub score_blend: ScoreBlend,
    pub max_deposit_skew_secs: i64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Lost & found claim and collection-box service")]
pub struct Args {
    /// Host to bind to (overrides LOST_FOUND_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides LOST_FOUND_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides LOST_FOUND_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Claim duration in seconds (overrides LOST_FOUND_CLAIM_DURATION_SECS)
    #[arg(long)]
    pub claim_duration_secs: Option<i64>,

    /// Seconds between expiry sweeps (overrides LOST_FOUND_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Default search threshold (overrides LOST_FOUND_SEARCH_THRESHOLD)
    #[arg(long)]
    pub search_threshold: Option<f32>,

    /// `average`, `weighted` or `weighted:<image>,<description>` (overrides LOST_FOUND_SCORE_BLEND)
    #[arg(long)]
    pub score_blend: Option<String>,

    /// Accepted deposit clock skew in seconds (overrides LOST_FOUND_MAX_DEPOSIT_SKEW_SECS)
    #[arg(long)]
    pub max_deposit_skew_secs: Option<i64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name`, parse it, or fall back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("LOST_FOUND_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port: u16 = env_or("LOST_FOUND_PORT", 5000)?;
        let env_db = env::var("LOST_FOUND_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/lost_found.db".into());
        let env_claim: i64 = env_or("LOST_FOUND_CLAIM_DURATION_SECS", DEFAULT_CLAIM_DURATION_SECS)?;
        let env_sweep: u64 = env_or(
            "LOST_FOUND_SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL.as_secs(),
        )?;
        let env_threshold: f32 = env_or("LOST_FOUND_SEARCH_THRESHOLD", 0.2)?;
        let env_blend = env::var("LOST_FOUND_SCORE_BLEND").unwrap_or_else(|_| "average".into());
        let env_skew: i64 = env_or("LOST_FOUND_MAX_DEPOSIT_SKEW_SECS", 5)?;

        // --- Merge ---
        let blend_raw = args.score_blend.unwrap_or(env_blend);
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            claim_duration_secs: args.claim_duration_secs.unwrap_or(env_claim),
            sweep_interval_secs: args.sweep_interval_secs.unwrap_or(env_sweep),
            search_threshold: args.search_threshold.unwrap_or(env_threshold),
            score_blend: blend_raw
                .parse()
                .with_context(|| format!("parsing score blend `{}`", blend_raw))?,
            max_deposit_skew_secs: args.max_deposit_skew_secs.unwrap_or(env_skew),
        };

        anyhow::ensure!(
            (1..=MAX_CLAIM_DURATION_SECS).contains(&cfg.claim_duration_secs),
            "claim duration must lie in 1..={} seconds, got {}",
            MAX_CLAIM_DURATION_SECS,
            cfg.claim_duration_secs
        );
        anyhow::ensure!(
            (1..=MAX_SWEEP_INTERVAL_SECS).contains(&cfg.sweep_interval_secs),
            "sweep interval must lie in 1..={} seconds, got {}",
            MAX_SWEEP_INTERVAL_SECS,
            cfg.sweep_interval_secs
        );
        anyhow::ensure!(
            (-1.0..=1.0).contains(&cfg.search_threshold),
            "search threshold must lie in [-1, 1], got {}",
            cfg.search_threshold
        );
        anyhow::ensure!(
            (0..=MAX_DEPOSIT_SKEW_SECS).contains(&cfg.max_deposit_skew_secs),
            "deposit skew must lie in 0..={} seconds, got {}",
            MAX_DEPOSIT_SKEW_SECS,
            cfg.max_deposit_skew_secs
        );

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            claim_duration: chrono::Duration::seconds(self.claim_duration_secs),
            search_threshold: self.search_threshold,
            score_blend: self.score_blend,
            max_deposit_skew: chrono::Duration::seconds(self.max_deposit_skew_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Only CLI values are exercised here; environment variables are process
    // global and would race with other tests.
    #[test]
    fn cli_values_override_defaults() {
        let cfg = AppConfig::merge(Args {
            port: Some(8080),
            database_url: Some("sqlite::memory:".into()),
            claim_duration_secs: Some(60),
            score_blend: Some("weighted".into()),
            ..Args::default()
        })
        .unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.score_blend, ScoreBlend::DESCRIPTION_WEIGHTED);

        let settings = cfg.service_settings();
        assert_eq!(settings.claim_duration, chrono::Duration::minutes(1));
    }

    #[test]
    fn nonsensical_values_are_rejected() {
        let zero_claim = AppConfig::merge(Args {
            claim_duration_secs: Some(0),
            ..Args::default()
        });
        assert!(zero_claim.is_err());

        let bad_blend = AppConfig::merge(Args {
            score_blend: Some("median".into()),
            ..Args::default()
        });
        assert!(bad_blend.is_err());

        let overflowing_claim = AppConfig::merge(Args {
            claim_duration_secs: Some(10_000_000_000_000),
            ..Args::default()
        });
        assert!(overflowing_claim.is_err());

        let max_claim = AppConfig::merge(Args {
            claim_duration_secs: Some(i64::MAX),
            ..Args::default()
        });
        assert!(max_claim.is_err());

        let huge_skew = AppConfig::merge(Args {
            max_deposit_skew_secs: Some(i64::MAX),
            ..Args::default()
        });
        assert!(huge_skew.is_err());

        let bad_threshold = AppConfig::merge(Args {
            search_threshold: Some(1.5),
            ..Args::default()
        });
        assert!(bad_threshold.is_err());
    }

    #[test]
    fn largest_accepted_windows_convert_without_overflow() {
        let cfg = AppConfig::merge(Args {
            claim_duration_secs: Some(MAX_CLAIM_DURATION_SECS),
            sweep_interval_secs: Some(MAX_SWEEP_INTERVAL_SECS),
            max_deposit_skew_secs: Some(MAX_DEPOSIT_SKEW_SECS),
            ..Args::default()
        })
        .unwrap();

        let settings = cfg.service_settings();
        assert_eq!(settings.claim_duration.num_days(), 3650);
        assert_eq!(settings.max_deposit_skew.num_hours(), 24);
        assert!(
            chrono::Utc::now()
                .checked_add_signed(settings.claim_duration)
                .is_some()
        );
    }
}
