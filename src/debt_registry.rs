//! Named correctness gates (SPEC_FULL §4.14, C14).
//!
//! A gate flips from `false` to `true` as a code change when the
//! corresponding subsystem is actually wired up; it is never a config knob.
//! Queried only by [`crate::startup_gate`].

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebtGate {
    OrderExecutionImplemented,
    PositionTrackingLive,
    BrokerReconciliationRunning,
    TickDeduplicationActive,
    SignalDbConstraintsApplied,
    TradeIdempotencyConstraints,
    AsyncEventWriterIfPersist,
}

impl DebtGate {
    pub fn name(&self) -> &'static str {
        match self {
            DebtGate::OrderExecutionImplemented => "ORDER_EXECUTION_IMPLEMENTED",
            DebtGate::PositionTrackingLive => "POSITION_TRACKING_LIVE",
            DebtGate::BrokerReconciliationRunning => "BROKER_RECONCILIATION_RUNNING",
            DebtGate::TickDeduplicationActive => "TICK_DEDUPLICATION_ACTIVE",
            DebtGate::SignalDbConstraintsApplied => "SIGNAL_DB_CONSTRAINTS_APPLIED",
            DebtGate::TradeIdempotencyConstraints => "TRADE_IDEMPOTENCY_CONSTRAINTS",
            DebtGate::AsyncEventWriterIfPersist => "ASYNC_EVENT_WRITER_IF_PERSIST",
        }
    }

    pub const ALL: [DebtGate; 7] = [
        DebtGate::OrderExecutionImplemented,
        DebtGate::PositionTrackingLive,
        DebtGate::BrokerReconciliationRunning,
        DebtGate::TickDeduplicationActive,
        DebtGate::SignalDbConstraintsApplied,
        DebtGate::TradeIdempotencyConstraints,
        DebtGate::AsyncEventWriterIfPersist,
    ];
}

/// Current resolution state of every gate. All `true` in this crate: the
/// subsystems named above are fully implemented, not stubbed. A future
/// subsystem that ships partially wired should flip its gate to `false`
/// here rather than being silently left out of the registry.
pub struct DebtRegistry;

impl DebtRegistry {
    pub fn is_resolved(gate: DebtGate) -> bool {
        match gate {
            DebtGate::OrderExecutionImplemented => true,
            DebtGate::PositionTrackingLive => true,
            DebtGate::BrokerReconciliationRunning => true,
            DebtGate::TickDeduplicationActive => true,
            DebtGate::SignalDbConstraintsApplied => true,
            DebtGate::TradeIdempotencyConstraints => true,
            DebtGate::AsyncEventWriterIfPersist => true,
        }
    }

    pub fn unresolved() -> Vec<DebtGate> {
        DebtGate::ALL.into_iter().filter(|g| !Self::is_resolved(*g)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_gates_resolved_in_this_build() {
        assert!(DebtRegistry::unresolved().is_empty());
    }
}
