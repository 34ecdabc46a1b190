//! Cost ledger: rolling spend counters and ceiling enforcement, per
//! `spec.md` §4.11.
//!
//! Grounded in the teacher's `llm::cost::BudgetManager`, which accumulates
//! numeric counters per user/project behind an `RwLock`; this module keeps
//! the same accumulate-then-check shape but narrows the dimensions to
//! `model_id` and an optional caller-supplied tag, since the router has no
//! concept of users or projects.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::envelope::{GenerationRequest, Usage};
use crate::error::{ErrorKind, RouterError};
use crate::registry::ModelDescriptor;

/// Rough chars-per-token ratio used only to bound a pre-dispatch estimate;
/// actual cost always comes from the provider's reported token usage.
const CHARS_PER_TOKEN_ESTIMATE: f64 = 4.0;

/// Dollars are stored as micro-dollars (1e-6 USD) in the atomics so the
/// running totals stay lock-free; all public getters convert back to `f64`.
fn to_micros(usd: f64) -> u64 {
    (usd * 1_000_000.0).round().max(0.0) as u64
}

fn from_micros(micros: u64) -> f64 {
    micros as f64 / 1_000_000.0
}

#[derive(Default)]
struct TagTotal {
    micros: AtomicU64,
}

/// Tracks spend across the whole router and exposes ceiling checks both
/// before dispatch (estimated) and after (actual).
pub struct CostLedger {
    total_micros: AtomicU64,
    by_model: DashMap<String, TagTotal>,
    by_tag: DashMap<String, TagTotal>,
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CostLedger {
    pub fn new() -> Self {
        Self {
            total_micros: AtomicU64::new(0),
            by_model: DashMap::new(),
            by_tag: DashMap::new(),
        }
    }

    /// `cost = (prompt_tokens * input_price + completion_tokens *
    /// output_price) / 1_000_000`, per `spec.md` §4.8's shared formula.
    /// `prompt_tokens` is bounded by the request's actual prompt length
    /// (not `max_tokens`, which only caps completion length) so a large
    /// prompt paired with a small `max_tokens` can't sail under a
    /// `cost_ceiling` that its real cost would blow past.
    pub fn estimate(model: &ModelDescriptor, req: &GenerationRequest) -> f64 {
        let prompt_tokens = (req.prompt_char_len() as f64 / CHARS_PER_TOKEN_ESTIMATE).ceil();
        (prompt_tokens * model.input_price_per_million
            + req.max_tokens as f64 * model.output_price_per_million)
            / 1_000_000.0
    }

    pub fn actual(model: &ModelDescriptor, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 * model.input_price_per_million
            + usage.completion_tokens as f64 * model.output_price_per_million)
            / 1_000_000.0
    }

    /// Rejects dispatch before any I/O if the *estimated* cost alone would
    /// already exceed `ceiling`. Actual spend is recorded separately via
    /// [`Self::record`] once the call completes, and cache hits must call
    /// neither — `spec.md` §4.11: "cache hits must not double-charge."
    pub fn check_ceiling(&self, estimated_cost: f64, ceiling: Option<f64>) -> Result<(), RouterError> {
        if let Some(ceiling) = ceiling {
            if estimated_cost > ceiling {
                return Err(RouterError::new(
                    ErrorKind::CostCeiling,
                    format!(
                        "estimated cost {estimated_cost:.6} exceeds cost_ceiling {ceiling:.6}"
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn record(&self, model_id: &str, tag: Option<&str>, cost_usd: f64) {
        let micros = to_micros(cost_usd);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.by_model
            .entry(model_id.to_string())
            .or_default()
            .micros
            .fetch_add(micros, Ordering::Relaxed);
        if let Some(tag) = tag {
            self.by_tag
                .entry(tag.to_string())
                .or_default()
                .micros
                .fetch_add(micros, Ordering::Relaxed);
        }
    }

    pub fn total_usd(&self) -> f64 {
        from_micros(self.total_micros.load(Ordering::Relaxed))
    }

    pub fn by_model_usd(&self, model_id: &str) -> f64 {
        self.by_model
            .get(model_id)
            .map(|t| from_micros(t.micros.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    pub fn by_tag_usd(&self, tag: &str) -> f64 {
        self.by_tag
            .get(tag)
            .map(|t| from_micros(t.micros.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn model() -> ModelDescriptor {
        ModelDescriptor {
            id: "openai:gpt-4".to_string(),
            provider_tag: "openai".to_string(),
            capabilities: HashSet::from([crate::envelope::Capability::Chat]),
            context_window: 8192,
            input_price_per_million: 10.0,
            output_price_per_million: 30.0,
            default_max_tokens: 1024,
            quality_score: None,
            speed_score: None,
        }
    }

    #[test]
    fn actual_cost_matches_the_shared_formula() {
        let m = model();
        let usage = Usage::new(1000, 500);
        let cost = CostLedger::actual(&m, &usage);
        assert!((cost - (1000.0 * 10.0 + 500.0 * 30.0) / 1_000_000.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_is_bounded_by_prompt_length_not_just_max_tokens() {
        let m = model();
        let huge_prompt = "x".repeat(40_000);
        let req = GenerationRequest::new_prompt(huge_prompt, 16);
        let small_prompt_req = GenerationRequest::new_prompt("hi", 16);

        let big = CostLedger::estimate(&m, &req);
        let small = CostLedger::estimate(&m, &small_prompt_req);
        assert!(big > small, "a 40k-char prompt must estimate higher than a 2-char prompt at the same max_tokens");
    }

    #[test]
    fn ceiling_rejects_before_dispatch() {
        let ledger = CostLedger::new();
        let err = ledger.check_ceiling(5.0, Some(1.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CostCeiling);
        ledger.check_ceiling(0.5, Some(1.0)).unwrap();
    }

    #[test]
    fn record_accumulates_by_model_and_total() {
        let ledger = CostLedger::new();
        ledger.record("openai:gpt-4", Some("team-a"), 1.25);
        ledger.record("openai:gpt-4", Some("team-b"), 0.75);
        assert!((ledger.total_usd() - 2.0).abs() < 1e-6);
        assert!((ledger.by_model_usd("openai:gpt-4") - 2.0).abs() < 1e-6);
        assert!((ledger.by_tag_usd("team-a") - 1.25).abs() < 1e-6);
    }
}
