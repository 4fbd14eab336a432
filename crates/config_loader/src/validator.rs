//! Configuration validation
//!
//! Rules:
//! - field ranges declared on the blueprint types (`validator` derive)
//! - host strings parse as IP addresses
//! - worker application servers bind to loopback only
//! - the broadcast host is an IP literal or a DNS name
//! - backoff parameters are coherent
//! - broadcast topics are non-empty and unique

use std::collections::HashSet;
use std::net::IpAddr;

use contracts::{ClusterBlueprint, ContractError, RestartPolicy};
use ::validator::{Validate, ValidationErrors};

/// Validate a ClusterBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &ClusterBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_addresses(blueprint)?;
    validate_broadcast_host(&blueprint.broadcast.host)?;
    validate_restart_policy(blueprint)?;
    validate_topics(blueprint)?;
    Ok(())
}

/// Declarative field rules
fn validate_fields(blueprint: &ClusterBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|errors| first_field_error(&errors))
}

fn first_field_error(errors: &ValidationErrors) -> ContractError {
    let flattened = flatten_errors("", errors);
    match flattened.into_iter().next() {
        Some((field, message)) => ContractError::config_validation(field, message),
        None => ContractError::config_validation("<unknown>", "validation failed"),
    }
}

fn flatten_errors(prefix: &str, errors: &ValidationErrors) -> Vec<(String, String)> {
    use ::validator::ValidationErrorsKind;

    let mut out = Vec::new();
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' rule", error.code));
                    out.push((path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(inner) => out.extend(flatten_errors(&path, inner)),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    out.extend(flatten_errors(&format!("{path}[{idx}]"), inner));
                }
            }
        }
    }
    out.sort();
    out
}

/// Hosts parse, and worker servers stay on loopback
fn validate_addresses(blueprint: &ClusterBlueprint) -> Result<(), ContractError> {
    blueprint.listen_addr()?;

    let local = blueprint.worker_local_addr()?;
    if !local.ip().is_loopback() {
        return Err(ContractError::config_validation(
            "workers.local_host",
            format!(
                "worker servers must bind to a loopback address, got {}",
                local.ip()
            ),
        ));
    }
    Ok(())
}

/// The transport host must form a valid connection URL
fn validate_broadcast_host(host: &str) -> Result<(), ContractError> {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if literal.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    let is_label = |label: &str| {
        !label.is_empty()
            && !label.starts_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };
    if host.len() > 253 || !host.split('.').all(is_label) {
        return Err(ContractError::config_validation(
            "broadcast.host",
            format!("'{host}' is neither an IP address nor a host name"),
        ));
    }
    Ok(())
}

/// Backoff parameters
fn validate_restart_policy(blueprint: &ClusterBlueprint) -> Result<(), ContractError> {
    let RestartPolicy::Backoff(ref backoff) = blueprint.supervisor.restart else {
        return Ok(());
    };

    if backoff.multiplier < 1.0 {
        return Err(ContractError::config_validation(
            "supervisor.restart.multiplier",
            format!("multiplier must be >= 1.0, got {}", backoff.multiplier),
        ));
    }
    if backoff.initial_delay_ms > backoff.max_delay_ms {
        return Err(ContractError::config_validation(
            "supervisor.restart.initial_delay_ms / supervisor.restart.max_delay_ms",
            format!(
                "initial_delay_ms ({}) must be <= max_delay_ms ({})",
                backoff.initial_delay_ms, backoff.max_delay_ms
            ),
        ));
    }
    if backoff.failure_threshold == 0 {
        return Err(ContractError::config_validation(
            "supervisor.restart.failure_threshold",
            "failure_threshold must be > 0",
        ));
    }
    Ok(())
}

/// Broadcast topic names
fn validate_topics(blueprint: &ClusterBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, topic) in blueprint.broadcast.topics.iter().enumerate() {
        if topic.is_empty() {
            return Err(ContractError::config_validation(
                format!("broadcast.topics[{}]", idx),
                "topic name cannot be empty",
            ));
        }
        if !seen.insert(topic) {
            return Err(ContractError::config_validation(
                format!("broadcast.topics[{}]", idx),
                format!("duplicate topic '{topic}'"),
            ));
        }
    }
    Ok(())
}
