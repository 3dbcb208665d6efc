use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::position::Position;
use crate::domain::risk::{RiskDecision, RiskError, RiskManager};
use crate::domain::signal::Signal;

/// Admission-control boundary used by the entry orchestrator.
///
/// Async so that an implementation may consult an external balance or
/// exposure service. The in-process `RiskManager` answers synchronously
/// behind a read lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskGate: Send + Sync {
    async fn can_trade(
        &self,
        signal: &Signal,
        account_balance: f64,
        open_positions: &[Position],
    ) -> Result<RiskDecision, RiskError>;
}

#[async_trait]
impl RiskGate for RwLock<RiskManager> {
    async fn can_trade(
        &self,
        signal: &Signal,
        account_balance: f64,
        open_positions: &[Position],
    ) -> Result<RiskDecision, RiskError> {
        let manager = self.read().await;
        manager.can_trade(signal, account_balance, open_positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::Direction;

    #[test]
    fn test_rwlock_gate_delegates() {
        let gate = RwLock::new(RiskManager::default());
        let signal = Signal::new(Direction::Long, 70.0, 100.0, 98.0);

        let decision = tokio_test::block_on(gate.can_trade(&signal, 1000.0, &[])).unwrap();
        assert!(decision.allowed);
        assert!((decision.adjusted_position_size - 100.0).abs() < 1e-9);

        let err = tokio_test::block_on(gate.can_trade(&signal, 0.0, &[]));
        assert_eq!(err, Err(RiskError::InvalidBalance(0.0)));
    }

    #[tokio::test]
    async fn test_recorded_losses_visible_through_gate() {
        let gate = RwLock::new(RiskManager::default());
        {
            let mut manager = gate.write().await;
            manager.record_trade_result(-1.0);
            manager.record_trade_result(-1.0);
        }
        let signal = Signal::new(Direction::Short, 70.0, 100.0, 102.0);
        let decision = gate.can_trade(&signal, 1000.0, &[]).await.unwrap();
        assert!((decision.adjusted_position_size - 75.0).abs() < 1e-9);
    }
}
