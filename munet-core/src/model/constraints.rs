//! Link-quality constraint groups (§3 invariant 7, §4.7).

use serde::{Deserialize, Serialize};

/// Declarative delay/jitter/loss/rate settings for one link endpoint,
/// realised by the [`crate::tc`] applier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntfConstraints {
    /// e.g. `"10ms"`. Required if `jitter` is set (invariant 7).
    pub delay: Option<String>,
    /// e.g. `"2ms"`. Requires `delay`.
    pub jitter: Option<String>,
    /// Percentage, 0.0-100.0. Requires `jitter`.
    #[serde(rename = "jitter-correlation")]
    pub jitter_correlation: Option<f64>,
    /// Percentage, 0.0-100.0.
    pub loss: Option<f64>,
    /// Percentage, 0.0-100.0. Requires `loss`.
    #[serde(rename = "loss-correlation")]
    pub loss_correlation: Option<f64>,
    pub rate: Option<RateConstraint>,
}

impl IntfConstraints {
    pub fn is_empty(&self) -> bool {
        self.delay.is_none()
            && self.jitter.is_none()
            && self.jitter_correlation.is_none()
            && self.loss.is_none()
            && self.loss_correlation.is_none()
            && self.rate.is_none()
    }

    pub fn has_netem_fields(&self) -> bool {
        self.delay.is_some() || self.loss.is_some()
    }
}

/// Token-bucket rate limit. `limit`/`burst` are `number64` strings, parsed
/// by [`crate::numfmt::parse_number64`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateConstraint {
    pub rate: String,
    pub limit: Option<String>,
    pub burst: Option<String>,
}
