//! Signal Consensus
//!
//! Reconciles one decision cycle's worth of analyzer signals into a single
//! winner. Signals with confidence outside [0, 100] are dropped, HOLD votes
//! are ignored for direction counting, and the batch is reported as
//! conflicting when the minority share of LONG/SHORT votes exceeds the
//! configured threshold.

use serde::{Deserialize, Serialize};

use crate::domain::signal::{Direction, Signal};

/// Directional disagreement report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalConflict {
    /// Minority votes over all LONG + SHORT votes
    pub ratio: f64,
    pub long_count: usize,
    pub short_count: usize,
}

impl SignalConflict {
    /// An exact even split cannot be resolved by waiting for one more vote
    pub fn is_even_split(&self) -> bool {
        self.ratio >= 0.5
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consensus {
    pub signal: Signal,
    pub conflict_ratio: f64,
    /// Signals agreeing with the winner's direction
    pub agreeing: usize,
    /// LONG + SHORT signals considered
    pub directional: usize,
    /// Signals dropped for out-of-range confidence
    pub discarded: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusOutcome {
    NoSignal { reason: String },
    Conflict(SignalConflict),
    Consensus(Consensus),
}

#[derive(Debug, Clone)]
pub struct SignalConsensusEngine {
    conflict_threshold: f64,
}

impl SignalConsensusEngine {
    pub fn new(conflict_threshold: f64) -> Self {
        Self { conflict_threshold }
    }

    pub fn conflict_threshold(&self) -> f64 {
        self.conflict_threshold
    }

    pub fn evaluate(&self, signals: &[Signal]) -> ConsensusOutcome {
        let valid: Vec<&Signal> = signals.iter().filter(|s| s.has_valid_confidence()).collect();
        let discarded = signals.len() - valid.len();
        if discarded > 0 {
            tracing::debug!("Discarded {} signal(s) with out-of-range confidence", discarded);
        }

        if valid.is_empty() {
            return ConsensusOutcome::NoSignal {
                reason: if signals.is_empty() {
                    "No signals provided".to_string()
                } else {
                    format!("No signals with valid confidence ({} discarded)", discarded)
                },
            };
        }

        let long_count = valid.iter().filter(|s| s.direction == Direction::Long).count();
        let short_count = valid.iter().filter(|s| s.direction == Direction::Short).count();
        let directional = long_count + short_count;

        if directional == 0 {
            return ConsensusOutcome::NoSignal {
                reason: format!("All {} signal(s) are HOLD", valid.len()),
            };
        }

        let ratio = long_count.min(short_count) as f64 / directional as f64;
        if ratio > self.conflict_threshold {
            tracing::debug!(
                "Signal conflict: {} LONG vs {} SHORT (ratio {:.2} > {:.2})",
                long_count,
                short_count,
                ratio,
                self.conflict_threshold
            );
            return ConsensusOutcome::Conflict(SignalConflict {
                ratio,
                long_count,
                short_count,
            });
        }

        let count_for = |d: Direction| match d {
            Direction::Long => long_count,
            Direction::Short => short_count,
            Direction::Hold => 0,
        };

        // Ranking: larger population, then higher confidence, then earlier input
        let winner = valid
            .iter()
            .enumerate()
            .filter(|(_, s)| s.direction != Direction::Hold)
            .max_by(|(ia, a), (ib, b)| {
                count_for(a.direction)
                    .cmp(&count_for(b.direction))
                    .then(a.confidence.total_cmp(&b.confidence))
                    .then(ib.cmp(ia))
            })
            .map(|(_, s)| (*s).clone());

        match winner {
            Some(signal) => {
                let agreeing = count_for(signal.direction);
                ConsensusOutcome::Consensus(Consensus {
                    signal,
                    conflict_ratio: ratio,
                    agreeing,
                    directional,
                    discarded,
                })
            }
            None => ConsensusOutcome::NoSignal {
                reason: "No directional signal".to_string(),
            },
        }
    }
}

impl Default for SignalConsensusEngine {
    fn default() -> Self {
        Self::new(0.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(direction: Direction, confidence: f64) -> Signal {
        Signal::new(direction, confidence, 100.0, 98.0)
    }

    fn winner(outcome: ConsensusOutcome) -> Consensus {
        match outcome {
            ConsensusOutcome::Consensus(c) => c,
            other => panic!("expected consensus, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_batch() {
        let engine = SignalConsensusEngine::default();
        match engine.evaluate(&[]) {
            ConsensusOutcome::NoSignal { reason } => assert!(reason.contains("No signals")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_confidence_dropped() {
        let engine = SignalConsensusEngine::default();
        let signals = vec![
            signal(Direction::Long, 120.0),
            signal(Direction::Short, -5.0),
            signal(Direction::Long, f64::NAN),
        ];
        assert!(matches!(engine.evaluate(&signals), ConsensusOutcome::NoSignal { .. }));

        let signals = vec![signal(Direction::Short, 150.0), signal(Direction::Long, 65.0)];
        let result = winner(engine.evaluate(&signals));
        assert_eq!(result.signal.direction, Direction::Long);
        assert_eq!(result.discarded, 1);
        assert_eq!(result.conflict_ratio, 0.0);
    }

    #[test]
    fn test_all_hold() {
        let engine = SignalConsensusEngine::default();
        let signals = vec![signal(Direction::Hold, 80.0), signal(Direction::Hold, 70.0)];
        match engine.evaluate(&signals) {
            ConsensusOutcome::NoSignal { reason } => assert!(reason.contains("HOLD")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_even_split_conflicts() {
        let engine = SignalConsensusEngine::default();
        let signals = vec![
            signal(Direction::Long, 80.0),
            signal(Direction::Long, 70.0),
            signal(Direction::Short, 75.0),
            signal(Direction::Short, 65.0),
        ];
        match engine.evaluate(&signals) {
            ConsensusOutcome::Conflict(conflict) => {
                assert_eq!(conflict.ratio, 0.5);
                assert!(conflict.is_even_split());
                assert_eq!(conflict.long_count, 2);
                assert_eq!(conflict.short_count, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_majority_wins() {
        let engine = SignalConsensusEngine::default();
        let mut signals: Vec<Signal> = [62.0, 71.0, 68.0, 90.0, 64.0]
            .iter()
            .map(|c| signal(Direction::Long, *c))
            .collect();
        signals.push(signal(Direction::Short, 95.0));

        let result = winner(engine.evaluate(&signals));
        assert_eq!(result.signal.direction, Direction::Long);
        assert_eq!(result.signal.confidence, 90.0);
        assert_eq!(result.agreeing, 5);
        assert_eq!(result.directional, 6);
        assert!(result.conflict_ratio < 0.2);
    }

    #[test]
    fn test_hold_ignored_in_ratio() {
        let engine = SignalConsensusEngine::default();
        let signals = vec![
            signal(Direction::Hold, 99.0),
            signal(Direction::Hold, 99.0),
            signal(Direction::Short, 70.0),
        ];
        let result = winner(engine.evaluate(&signals));
        assert_eq!(result.signal.direction, Direction::Short);
        assert_eq!(result.directional, 1);
    }

    #[test]
    fn test_tie_prefers_first_seen() {
        let engine = SignalConsensusEngine::new(0.5);
        let first = signal(Direction::Short, 80.0).with_reason("first");
        let second = signal(Direction::Long, 80.0).with_reason("second");

        let result = winner(engine.evaluate(&[first, second]));
        assert_eq!(result.signal.reason, "first");
    }

    #[test]
    fn test_tie_prefers_higher_confidence() {
        let engine = SignalConsensusEngine::new(0.5);
        let signals = vec![signal(Direction::Short, 70.0), signal(Direction::Long, 85.0)];
        let result = winner(engine.evaluate(&signals));
        assert_eq!(result.signal.direction, Direction::Long);
    }
}
