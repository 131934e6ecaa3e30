//! The risk gate: every proposed trade passes through here and is sized,
//! rejected, or halted before anything reaches the exchange.

pub mod error;
pub mod gate;
pub mod keys;
pub mod sizer;
pub mod state;

// Re-export public types
pub use error::{Error, Rejection, Result};
pub use gate::{GateSettings, RiskGate, VolatilityProvider};
pub use keys::derive_idempotency_key;
pub use sizer::PositionSizer;
pub use state::RiskState;
