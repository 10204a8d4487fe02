//! Command line interface
//!
//! `run` starts the daemon; `check`, `strategies` and `validate` are one-shot
//! commands that print a table (or JSON with `--json`).

use crate::classifier::error_type_for;
use crate::config::AppConfig;
use crate::domain::{Endpoint, HealthCheckResult};
use crate::error::{Result, VigilError};
use crate::healing::{HealingStrategy, StrategyCatalog};
use crate::monitor::HealthMonitor;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tabled::{Table, Tabled};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(author = "Vigil Team")]
#[command(version)]
#[command(about = "Endpoint health monitor with automated healing", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default.toml, then $VIGIL_ENV.toml)
    #[arg(short, long, default_value = "config", env = "VIGIL_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor and heal endpoints until interrupted
    Run,
    /// Poll every endpoint once and print the result
    Check {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the healing strategy catalog
    Strategies {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
}

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                println!("{}", Table::new(items));
            }
        }
        OutputMode::Json => {
            println!("{}", serde_json::to_string_pretty(items)?);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Tabled)]
pub struct CheckRow {
    pub source: String,
    pub endpoint: String,
    pub priority: String,
    pub status: String,
    pub latency_ms: u64,
    pub result: String,
    pub payload_age: String,
}

impl CheckRow {
    pub fn from_result(result: &HealthCheckResult) -> Self {
        let outcome = match error_type_for(result) {
            Some(error_type) => error_type.to_string(),
            None => "healthy".to_string(),
        };
        Self {
            source: result.endpoint.source_id.clone(),
            endpoint: result.endpoint.endpoint_path.clone(),
            priority: result.endpoint.priority.to_string(),
            status: result.raw_status.to_string(),
            latency_ms: result.latency.as_millis() as u64,
            result: outcome,
            payload_age: result
                .payload_age
                .map(|age| format!("{}s", age.as_secs()))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct StrategyRow {
    pub priority: u32,
    pub name: String,
    pub action: String,
    pub scope: String,
    pub error_types: String,
}

impl From<&HealingStrategy> for StrategyRow {
    fn from(strategy: &HealingStrategy) -> Self {
        Self {
            priority: strategy.priority,
            name: strategy.name.clone(),
            action: strategy.action.kind().to_string(),
            scope: strategy.scope.to_string(),
            error_types: strategy
                .applicable_error_types
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Poll every endpoint once, concurrently
pub async fn check_endpoints(
    monitor: &HealthMonitor,
    endpoints: &[Endpoint],
) -> Vec<CheckRow> {
    let polls = endpoints
        .iter()
        .map(|endpoint| monitor.poll(Arc::new(endpoint.clone())));
    join_all(polls)
        .await
        .iter()
        .map(CheckRow::from_result)
        .collect()
}

/// Catalog rows, in declaration order
pub fn strategy_rows(config: &AppConfig) -> Result<Vec<StrategyRow>> {
    let catalog = StrategyCatalog::from_config(&config.healing.strategies)?;
    Ok(catalog.strategies().iter().map(StrategyRow::from).collect())
}

/// Validate configuration, printing every problem
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut problems = match config.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => errors,
    };
    if let Err(e) = StrategyCatalog::from_config(&config.healing.strategies) {
        problems.push(e.to_string());
    }

    if problems.is_empty() {
        println!(
            "\x1b[32mConfiguration OK: {} endpoints, {} fallback chains\x1b[0m",
            config.endpoints.len(),
            config.fallback.len()
        );
        Ok(())
    } else {
        for problem in &problems {
            eprintln!("\x1b[31m✗ {}\x1b[0m", problem);
        }
        Err(VigilError::Validation(format!(
            "{} configuration problem(s)",
            problems.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawStatus;
    use crate::healing::StrategyAction;
    use crate::monitor::Prober;
    use async_trait::async_trait;
    use clap::CommandFactory;
    use std::time::Duration;

    struct FixedProber;

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, endpoint: Arc<Endpoint>, _timeout: Duration) -> HealthCheckResult {
            let status = if endpoint.source_id == "up" { 200 } else { 429 };
            HealthCheckResult::new(endpoint, RawStatus::Http(status), Duration::from_millis(12))
                .with_payload("{}".to_string(), true)
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
        let cli = Cli::parse_from(["vigil", "--config", "/etc/vigil", "check", "--json"]);
        assert_eq!(cli.config, "/etc/vigil");
        assert!(matches!(cli.command, Some(Commands::Check { json: true })));
    }

    #[tokio::test]
    async fn test_check_rows() {
        let monitor = HealthMonitor::new(Arc::new(FixedProber));
        let endpoints = vec![
            Endpoint::new("up", "/a", "http://up.example.com/a"),
            Endpoint::new("down", "/b", "http://down.example.com/b"),
        ];

        let rows = check_endpoints(&monitor, &endpoints).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].result, "healthy");
        assert_eq!(rows[1].result, "rate_limit");
        assert_eq!(rows[0].latency_ms, 12);
    }

    #[test]
    fn test_strategy_rows_follow_configuration() {
        let mut config = AppConfig::default();
        assert_eq!(strategy_rows(&config).unwrap().len(), 5);

        config.healing.strategies = vec![HealingStrategy::new(
            "only",
            1,
            StrategyAction::ServeCached,
            [crate::domain::ErrorType::Timeout],
        )];
        let rows = strategy_rows(&config).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].error_types, "timeout");
        assert_eq!(rows[0].action, "serve_cached");
    }

    #[test]
    fn test_validate_reports_bad_catalog() {
        let mut config = AppConfig::default();
        let s = HealingStrategy::new("dup", 1, StrategyAction::Reprobe, [crate::domain::ErrorType::Timeout]);
        config.healing.strategies = vec![s.clone(), s];
        assert!(validate_config(&config).is_err());
        assert!(validate_config(&AppConfig::default()).is_ok());
    }
}
