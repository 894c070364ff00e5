use crate::error::ScaleError;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeightReading {
    pub weight: f64,
    pub unstable: bool,
}

impl WeightReading {
    pub fn stable(weight: f64) -> Self {
        Self {
            weight,
            unstable: false,
        }
    }

    pub fn unstable(weight: f64) -> Self {
        Self {
            weight,
            unstable: true,
        }
    }
}

/// Result of one attempt to talk to the device.
pub type ExchangeOutcome = Result<WeightReading, ScaleError>;
