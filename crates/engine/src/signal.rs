use core_types::{MarketSnapshot, Prediction, Side};

/// The universal interface for an alpha model.
///
/// The model producing `(direction, confidence)` pairs lives behind a service
/// boundary; the pipeline only ever sees this trait. Tests substitute stubs.
pub trait SignalModel: Send + Sync {
    /// The name of the model.
    fn name(&self) -> &'static str;

    /// Produces a directional prediction for the given market snapshot.
    fn predict(&self, snapshot: &MarketSnapshot) -> Prediction;
}

/// A placeholder model emitting a constant prediction, used in paper mode
/// until a real model service is wired in.
#[derive(Debug)]
pub struct ConstantModel {
    direction: Side,
    confidence: f64,
}

impl ConstantModel {
    pub fn new(direction: Side, confidence: f64) -> Self {
        Self {
            direction,
            confidence,
        }
    }
}

impl SignalModel for ConstantModel {
    fn name(&self) -> &'static str {
        "ConstantModel"
    }

    fn predict(&self, _snapshot: &MarketSnapshot) -> Prediction {
        Prediction {
            direction: self.direction,
            confidence: self.confidence,
        }
    }
}
