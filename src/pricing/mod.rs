pub mod lmsr;

use chrono::Utc;

use crate::config::AppConfig;
use crate::models::PricingQuote;

/// Stateless pricing engine wrapping the LMSR cost functions with the
/// configured defaults (spec.md §4.5 "Defaults").
pub struct PricingEngine {
    b: f64,
    loading_factor: f64,
    notional: f64,
    validity_minutes: i64,
}

impl PricingEngine {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            b: config.lmsr_b,
            loading_factor: config.lmsr_loading_factor,
            notional: config.lmsr_notional,
            validity_minutes: config.price_validity_minutes,
        }
    }

    pub fn quote(&self, probability: f64, confidence_low: f64, confidence_high: f64) -> PricingQuote {
        let premium = lmsr::premium(probability, self.notional, self.b, self.loading_factor);
        let now = Utc::now();
        PricingQuote {
            probability,
            confidence_low,
            confidence_high,
            premium,
            b: self.b,
            loading_factor: self.loading_factor,
            notional: self.notional,
            computed_at: now,
            valid_until: now + chrono::Duration::minutes(self.validity_minutes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_carries_the_configured_defaults() {
        let engine = PricingEngine::from_config(&AppConfig::from_env());
        let quote = engine.quote(0.6, 0.5, 0.7);
        assert_eq!(quote.b, 100.0);
        assert_eq!(quote.loading_factor, 0.10);
        assert_eq!(quote.notional, 10.0);
        assert!(quote.premium >= 0.01);
        assert!(quote.valid_until > quote.computed_at);
    }
}
