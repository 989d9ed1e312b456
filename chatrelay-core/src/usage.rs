use serde::{Deserialize, Serialize};

use crate::config::PricingCfg;

/// Token counts for one completed reply. Field names follow the OpenAI usage
/// object, which doubles as the trailer payload schema.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageRecord {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl UsageRecord {
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Running totals across a conversation. `add` is the only mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub requests: u64,
}

impl SessionUsage {
    pub fn add(&mut self, rec: &UsageRecord) {
        self.prompt_tokens += u64::from(rec.prompt_tokens);
        self.completion_tokens += u64::from(rec.completion_tokens);
        self.total_tokens += u64::from(rec.total_tokens);
        self.requests += 1;
    }

    /// Estimated spend in USD given per-million-token prices.
    pub fn cost(&self, pricing: &PricingCfg) -> f64 {
        (self.prompt_tokens as f64 / 1_000_000.0) * pricing.input_per_mtok
            + (self.completion_tokens as f64 / 1_000_000.0) * pricing.output_per_mtok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_record_json_roundtrip() {
        let rec = UsageRecord::new(5, 3, 8);
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(
            json,
            r#"{"prompt_tokens":5,"completion_tokens":3,"total_tokens":8}"#
        );
        let back: UsageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn session_accumulates_and_counts_requests() {
        let mut session = SessionUsage::default();
        session.add(&UsageRecord::new(10, 20, 30));
        session.add(&UsageRecord::new(1, 2, 3));
        assert_eq!(session.prompt_tokens, 11);
        assert_eq!(session.completion_tokens, 22);
        assert_eq!(session.total_tokens, 33);
        assert_eq!(session.requests, 2);
    }

    #[test]
    fn cost_uses_per_million_prices() {
        let mut session = SessionUsage::default();
        session.add(&UsageRecord::new(1_000_000, 2_000_000, 3_000_000));
        let pricing = PricingCfg {
            input_per_mtok: 0.15,
            output_per_mtok: 0.60,
        };
        let cost = session.cost(&pricing);
        assert!((cost - (0.15 + 2.0 * 0.60)).abs() < 1e-9);
    }

    #[test]
    fn empty_session_costs_nothing() {
        let session = SessionUsage::default();
        let pricing = PricingCfg::default();
        assert_eq!(session.cost(&pricing), 0.0);
        assert_eq!(session.requests, 0);
    }
}
