//! Process-start safety checks (SPEC_FULL §4.12, C12).
//!
//! Runs once, before the process accepts any tick or starts the reconciler.
//! In PRODUCTION mode every gate must pass or the process exits non-zero
//! naming the failed gate; outside PRODUCTION, a failed gate is only a
//! logged warning.

use crate::config::{BrokerEnvConfig, Config, Mode};
use crate::debt_registry::DebtRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateFailure {
    OrderExecutionDisabled,
    BrokerNotProduction(String),
    AsyncEventWriterMissing,
    DebtGateUnresolved(&'static str),
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateFailure::OrderExecutionDisabled => write!(f, "orderExecutionEnabled must be true in PRODUCTION mode"),
            GateFailure::BrokerNotProduction(code) => write!(f, "broker '{code}' is not configured for the PRODUCTION environment"),
            GateFailure::AsyncEventWriterMissing => write!(f, "persistTickEvents is enabled but the async event writer is not"),
            GateFailure::DebtGateUnresolved(gate) => write!(f, "debt gate {gate} is unresolved"),
        }
    }
}

/// Runs every check and returns every failure found, rather than stopping at
/// the first one, so a single failed startup reports the complete list.
pub fn check(config: &Config) -> Vec<GateFailure> {
    if config.mode != Mode::Production {
        for warning in non_production_warnings(config) {
            tracing::warn!(%warning, "startup gate: safety disabled outside PRODUCTION mode");
        }
        return Vec::new();
    }

    let mut failures = Vec::new();

    if !config.order_execution_enabled {
        failures.push(GateFailure::OrderExecutionDisabled);
    }

    for (code, broker) in &config.brokers {
        if broker.env != BrokerEnvConfig::Production {
            failures.push(GateFailure::BrokerNotProduction(code.clone()));
        }
    }

    if config.persist_tick_events && !config.async_event_writer_enabled {
        failures.push(GateFailure::AsyncEventWriterMissing);
    }

    for gate in DebtRegistry::unresolved() {
        failures.push(GateFailure::DebtGateUnresolved(gate.name()));
    }

    failures
}

fn non_production_warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();
    if !config.order_execution_enabled {
        warnings.push("order execution is disabled".to_string());
    }
    if !config.async_event_writer_enabled {
        warnings.push("async event writer is disabled".to_string());
    }
    warnings
}

/// Runs [`check`] and, on any PRODUCTION failure, logs every failed gate and
/// exits the process non-zero. Intended to be called once from `main`.
pub fn enforce_or_exit(config: &Config) {
    let failures = check(config);
    if failures.is_empty() {
        return;
    }
    for failure in &failures {
        tracing::error!(%failure, "startup gate failed");
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, BrokerEnvConfig};
    use std::collections::HashMap;

    fn production_config() -> Config {
        let mut config = Config::default();
        config.mode = Mode::Production;
        config.order_execution_enabled = true;
        config.persist_tick_events = true;
        config.async_event_writer_enabled = true;
        config
    }

    #[test]
    fn passes_when_every_gate_is_satisfied() {
        assert!(check(&production_config()).is_empty());
    }

    #[test]
    fn fails_when_order_execution_disabled_in_production() {
        let mut config = production_config();
        config.order_execution_enabled = false;
        assert!(check(&config).contains(&GateFailure::OrderExecutionDisabled));
    }

    #[test]
    fn fails_when_a_broker_is_not_production() {
        let mut config = production_config();
        config.brokers.insert(
            "ZERODHA".to_string(),
            BrokerConfig { env: BrokerEnvConfig::Sandbox, credentials_ref: "ref".into(), api_base_url: "https://example.test".into() },
        );
        assert!(check(&config).iter().any(|f| matches!(f, GateFailure::BrokerNotProduction(_))));
    }

    #[test]
    fn fails_when_tick_persistence_lacks_an_async_writer() {
        let mut config = production_config();
        config.async_event_writer_enabled = false;
        assert!(check(&config).contains(&GateFailure::AsyncEventWriterMissing));
    }

    #[test]
    fn non_production_mode_never_fails() {
        let mut config = Config::default();
        config.mode = Mode::Beta;
        assert!(check(&config).is_empty());
    }

    #[test]
    fn unused_import_guard() {
        let _: HashMap<String, BrokerConfig> = HashMap::new();
    }
}
