//! Entry Orchestrator
//!
//! Turns one decision cycle's signals into ENTER, SKIP or WAIT:
//! balance precondition, signal consensus, confidence floor, trend
//! alignment, then risk admission. Every failure maps to a decision with a
//! reason; nothing is raised to the caller.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::market::Candle;
use crate::domain::position::Position;
use crate::domain::risk::RiskDecision;
use crate::domain::signal::{Signal, TrendAnalysis};
use crate::ports::risk::RiskGate;
use crate::strategy::consensus::{ConsensusOutcome, SignalConsensusEngine};
use crate::strategy::params::{ConfigError, OrchestrationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryAction {
    Enter,
    Skip,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDecision {
    pub decision: EntryAction,
    #[serde(default)]
    pub signal: Option<Signal>,
    #[serde(default)]
    pub risk_assessment: Option<RiskDecision>,
    pub reason: String,
}

impl EntryDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            decision: EntryAction::Skip,
            signal: None,
            risk_assessment: None,
            reason: reason.into(),
        }
    }

    fn wait(reason: impl Into<String>) -> Self {
        Self {
            decision: EntryAction::Wait,
            signal: None,
            risk_assessment: None,
            reason: reason.into(),
        }
    }

    pub fn is_enter(&self) -> bool {
        self.decision == EntryAction::Enter
    }
}

pub struct EntryOrchestrator<G: RiskGate> {
    risk: Arc<G>,
    config: Arc<RwLock<OrchestrationConfig>>,
}

impl<G: RiskGate> EntryOrchestrator<G> {
    pub fn new(risk: Arc<G>, config: OrchestrationConfig) -> Self {
        Self {
            risk,
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub async fn get_orchestration_config(&self) -> OrchestrationConfig {
        self.config.read().await.clone()
    }

    /// Replace the runtime configuration. Invalid values are rejected and
    /// the previous configuration stays in effect.
    pub async fn set_orchestration_config(
        &self,
        config: OrchestrationConfig,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        tracing::info!(
            "Orchestration config updated: min confidence {}, flat-market {}, conflict {}",
            config.min_confidence_threshold,
            config.flat_market_confidence_threshold,
            config.signal_conflict_threshold
        );
        *self.config.write().await = config;
        Ok(())
    }

    /// Skip reason when either timeframe lacks the configured history
    pub async fn check_data_sufficiency(
        &self,
        primary: &[Candle],
        context: &[Candle],
    ) -> Option<String> {
        let config = self.config.read().await;
        if primary.len() < config.min_primary_candles {
            return Some(format!(
                "Insufficient primary data: {} candles, need {}",
                primary.len(),
                config.min_primary_candles
            ));
        }
        if context.len() < config.min_context_candles {
            return Some(format!(
                "Insufficient context data: {} candles, need {}",
                context.len(),
                config.min_context_candles
            ));
        }
        None
    }

    pub async fn evaluate_entry(
        &self,
        signals: &[Signal],
        account_balance: f64,
        open_positions: &[Position],
        trend: &TrendAnalysis,
    ) -> EntryDecision {
        let decision = self
            .decide(signals, account_balance, open_positions, trend)
            .await;

        match decision.decision {
            EntryAction::Enter => tracing::info!("Entry ENTER: {}", decision.reason),
            EntryAction::Wait => tracing::info!("Entry WAIT: {}", decision.reason),
            EntryAction::Skip => tracing::debug!("Entry SKIP: {}", decision.reason),
        }
        decision
    }

    async fn decide(
        &self,
        signals: &[Signal],
        account_balance: f64,
        open_positions: &[Position],
        trend: &TrendAnalysis,
    ) -> EntryDecision {
        if !(account_balance.is_finite() && account_balance > 0.0) {
            tracing::warn!("Rejecting entry evaluation: account balance {}", account_balance);
            return EntryDecision::skip(format!("Invalid account balance: {}", account_balance));
        }

        if signals.is_empty() {
            return EntryDecision::skip("No signals provided");
        }

        let config = self.get_orchestration_config().await;
        let engine = SignalConsensusEngine::new(config.signal_conflict_threshold);

        let consensus = match engine.evaluate(signals) {
            ConsensusOutcome::NoSignal { reason } => return EntryDecision::skip(reason),
            ConsensusOutcome::Conflict(conflict) => {
                let reason = format!(
                    "Signal conflict detected: {} LONG vs {} SHORT (ratio {:.2} > {:.2})",
                    conflict.long_count,
                    conflict.short_count,
                    conflict.ratio,
                    config.signal_conflict_threshold
                );
                return if conflict.is_even_split() {
                    EntryDecision::skip(reason)
                } else {
                    EntryDecision::wait(reason)
                };
            }
            ConsensusOutcome::Consensus(c) => c,
        };
        let signal = consensus.signal;

        let flat_market = trend.strength.abs() < config.flat_market_strength_threshold;
        let floor = if flat_market {
            config.flat_market_confidence_threshold
        } else {
            config.min_confidence_threshold
        };
        if signal.confidence < floor {
            return EntryDecision::skip(format!(
                "Confidence {:.1} below threshold {:.1}{}",
                signal.confidence,
                floor,
                if flat_market { " (flat market)" } else { "" }
            ));
        }

        if trend.blocks(signal.direction) {
            return EntryDecision::skip(format!(
                "{} blocked by trend filter ({} bias, strength {:.2})",
                signal.direction, trend.bias, trend.strength
            ));
        }

        let assessment = match self
            .risk
            .can_trade(&signal, account_balance, open_positions)
            .await
        {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::error!("Risk check errored for {} signal: {}", signal.direction, e);
                return EntryDecision::skip(format!("Orchestrator error: {}", e));
            }
        };

        if !assessment.allowed {
            return EntryDecision {
                decision: EntryAction::Skip,
                signal: None,
                reason: format!("Risk check failed: {}", assessment.reason),
                risk_assessment: Some(assessment),
            };
        }

        EntryDecision {
            decision: EntryAction::Enter,
            reason: format!(
                "{} consensus {}/{} at {:.1} confidence, size {:.2} USDT",
                signal.direction,
                consensus.agreeing,
                consensus.directional,
                signal.confidence,
                assessment.adjusted_position_size
            ),
            signal: Some(signal),
            risk_assessment: Some(assessment),
        }
    }
}
