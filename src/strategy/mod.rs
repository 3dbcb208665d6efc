//! Strategy Layer - Decision policies used by the orchestrators
//!
//! - `consensus`: Reconciles a batch of analyzer signals into one winner
//! - `breakeven`: Stop lock-in after the first take-profit
//! - `trailing`: Volatility-aware and band-based trailing stops
//! - `adaptive_target`: Dynamic final take-profit
//! - `params`: Tunables with defaults and validation

pub mod params;
pub mod consensus;
pub mod breakeven;
pub mod trailing;
pub mod adaptive_target;

pub use params::{
    AdaptiveTargetConfig, BreakevenConfig, ConfigError, ExitConfig, OrchestrationConfig,
    TrailingConfig, TrailingMethod,
};
pub use consensus::{Consensus, ConsensusOutcome, SignalConflict, SignalConsensusEngine};
pub use breakeven::{breakeven_price, BreakevenLock, BreakevenPolicy, BreakevenTick, LockTrigger};
pub use trailing::{band_stop, bollinger_band, SmartTrailing, TrailingDistance, TrailingTracker};
pub use adaptive_target::{target_price, AdaptiveTarget, AdaptiveTargetCalculator};
