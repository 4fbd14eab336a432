//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{ClusterBlueprint, RestartPolicy, TransferPolicy, TransportKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    listen: String,
    worker_count: usize,
    restart_policy: String,
    transfer_policy: String,
    transport: String,
    topic_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    listen: format!("{}:{}", blueprint.server.host, blueprint.server.port),
                    worker_count: blueprint.worker_count(),
                    restart_policy: match blueprint.supervisor.restart {
                        RestartPolicy::Immediate => "immediate".to_string(),
                        RestartPolicy::Backoff(_) => "backoff".to_string(),
                    },
                    transfer_policy: format!("{:?}", blueprint.dispatcher.transfer_policy),
                    transport: format!("{:?}", blueprint.broadcast.transport),
                    topic_count: blueprint.broadcast.topics.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &ClusterBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.workers.count.is_none() {
        warnings.push(format!(
            "workers.count not set - using available parallelism ({})",
            blueprint.worker_count()
        ));
    }

    if blueprint.broadcast.transport == TransportKind::Local && blueprint.worker_count() > 1 {
        warnings.push(
            "broadcast.transport is local with several workers - broadcasts will not cross workers"
                .to_string(),
        );
    }

    if blueprint.broadcast.topics.is_empty() {
        warnings.push("broadcast.topics is empty - topics are joined on first use".to_string());
    }

    if blueprint.supervisor.restart == RestartPolicy::Immediate
        && blueprint.dispatcher.transfer_policy == TransferPolicy::HoldOne
    {
        warnings.push(
            "dispatcher.transfer_policy = hold_one with immediate restart - held connections are rarely needed"
                .to_string(),
        );
    }

    if blueprint.workers.shutdown_grace_ms == 0 {
        warnings.push("workers.shutdown_grace_ms is 0 - workers are killed at once on shutdown".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Listen: {}", summary.listen);
            println!("  Workers: {}", summary.worker_count);
            println!("  Restart policy: {}", summary.restart_policy);
            println!("  Transfer policy: {}", summary.transfer_policy);
            println!(
                "  Broadcast: {} ({} topics)",
                summary.transport, summary.topic_count
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_valid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[workers]\ncount = 4\n\n[broadcast]\ntransport = \"local\"").unwrap();

        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(result.valid);
        let summary = result.summary.unwrap();
        assert_eq!(summary.worker_count, 4);
        assert_eq!(summary.restart_policy, "immediate");
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("will not cross workers")));
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[workers]\ncount = 0").unwrap();

        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&ValidateArgs {
            config: "/nonexistent/cluster.toml".into(),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }
}
