//! Selection strategies: pure functions over a registry snapshot that
//! produce an ordered candidate list, per `spec.md` §4.10.
//!
//! Kept separate from `router.rs` deliberately — nothing here touches I/O
//! or shared state, so each strategy is trivially unit-testable against a
//! hand-built [`RegistrySnapshot`].

use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cost::CostLedger;
use crate::envelope::{Capability, GenerationRequest};
use crate::registry::{CircuitState, ModelDescriptor, RegistrySnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Balanced,
    QualityFirst,
    SpeedPriority,
    CostOptimized,
    RoundRobin,
    Random,
}

impl Strategy {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "balanced" => Some(Strategy::Balanced),
            "quality_first" => Some(Strategy::QualityFirst),
            "speed_priority" => Some(Strategy::SpeedPriority),
            "cost_optimized" => Some(Strategy::CostOptimized),
            "round_robin" => Some(Strategy::RoundRobin),
            "random" => Some(Strategy::Random),
            _ => None,
        }
    }
}

fn required_capability(req: &GenerationRequest) -> Capability {
    match &req.input {
        crate::envelope::Input::Prompt(_) => Capability::Completion,
        crate::envelope::Input::Messages(_) => Capability::Chat,
    }
}

/// Applied first by every strategy, per `spec.md` §4.10: capability,
/// context window, circuit state, credentials, and exclusion/ceiling
/// checks. Returns the surviving descriptors, unordered.
pub fn candidate_filter<'a>(
    snapshot: &'a RegistrySnapshot,
    req: &GenerationRequest,
    has_credential: impl Fn(&str) -> bool,
    excluded: &[String],
) -> Vec<&'a ModelDescriptor> {
    let needed = required_capability(req);
    let estimated_tokens = req.max_tokens;

    snapshot
        .models
        .iter()
        .filter(|m| m.capabilities.contains(&needed))
        .filter(|m| m.context_window >= estimated_tokens)
        .filter(|m| snapshot.health_of(&m.id).circuit_state != CircuitState::Open)
        .filter(|m| has_credential(&m.provider_tag))
        .filter(|m| !excluded.iter().any(|e| e == &m.id))
        .filter(|m| match req.cost_ceiling {
            Some(ceiling) => CostLedger::estimate(m, req) <= ceiling,
            None => true,
        })
        .collect()
}

fn normalized_cost(m: &ModelDescriptor, max_cost: f64) -> f64 {
    if max_cost <= 0.0 {
        0.0
    } else {
        (m.input_price_per_million + m.output_price_per_million) / max_cost
    }
}

/// Produces the ordered candidate id list for `strategy`. `round_robin`
/// needs external rotation state, passed in via `round_robin_cursor` so
/// the function itself stays pure and testable; `snapshot` supplies live
/// health data for latency tie-breaks.
pub fn rank(
    strategy: Strategy,
    snapshot: &RegistrySnapshot,
    candidates: Vec<&ModelDescriptor>,
    round_robin_cursor: &AtomicUsize,
) -> Vec<String> {
    if candidates.is_empty() {
        return Vec::new();
    }

    match strategy {
        Strategy::Balanced => {
            let max_cost = candidates
                .iter()
                .map(|m| m.input_price_per_million + m.output_price_per_million)
                .fold(0.0_f64, f64::max);
            let mut scored: Vec<(&ModelDescriptor, f64)> = candidates
                .iter()
                .map(|m| {
                    let quality = m.quality_score.unwrap_or(0.5) as f64;
                    let speed = m.speed_score.unwrap_or(0.5) as f64;
                    let cost_term = 1.0 - normalized_cost(m, max_cost);
                    let score = 0.4 * quality + 0.3 * cost_term + 0.3 * speed;
                    (*m, score)
                })
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.into_iter().map(|(m, _)| m.id.clone()).collect()
        }
        Strategy::QualityFirst => {
            let mut sorted = candidates.clone();
            sorted.sort_by(|a, b| {
                let qa = a.quality_score.unwrap_or(0.0);
                let qb = b.quality_score.unwrap_or(0.0);
                qb.partial_cmp(&qa).unwrap_or(std::cmp::Ordering::Equal).then_with(|| {
                    let la = live_latency(snapshot, &a.id);
                    let lb = live_latency(snapshot, &b.id);
                    la.partial_cmp(&lb).unwrap_or(std::cmp::Ordering::Equal)
                })
            });
            sorted.into_iter().map(|m| m.id.clone()).collect()
        }
        Strategy::SpeedPriority => {
            // avg_latency_ms lives in BackendHealth, not the descriptor;
            // callers without live health data fall back to speed_score.
            let mut sorted = candidates.clone();
            sorted.sort_by(|a, b| {
                let sa = a.speed_score.unwrap_or(0.0);
                let sb = b.speed_score.unwrap_or(0.0);
                sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
            });
            sorted.into_iter().map(|m| m.id.clone()).collect()
        }
        Strategy::CostOptimized => {
            let mut sorted = candidates.clone();
            sorted.sort_by(|a, b| {
                let ca = a.input_price_per_million + a.output_price_per_million;
                let cb = b.input_price_per_million + b.output_price_per_million;
                ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
            });
            sorted.into_iter().map(|m| m.id.clone()).collect()
        }
        Strategy::RoundRobin => {
            let n = candidates.len();
            let start = round_robin_cursor.fetch_add(1, Ordering::Relaxed) % n;
            (0..n).map(|i| candidates[(start + i) % n].id.clone()).collect()
        }
        Strategy::Random => {
            let mut ids: Vec<String> = candidates.iter().map(|m| m.id.clone()).collect();
            ids.shuffle(&mut rand::thread_rng());
            ids
        }
    }
}

/// `avg_latency_ms` for a backend with live samples, or `f64::MAX` so a
/// never-dispatched candidate sorts last rather than tying for first.
fn live_latency(snapshot: &RegistrySnapshot, id: &str) -> f64 {
    let health = snapshot.health_of(id);
    if health.ok_count_window + health.fail_count_window > 0 {
        health.avg_latency_ms
    } else {
        f64::MAX
    }
}

/// Ranks by live health (`avg_latency_ms`) when it's available, used by
/// `speed_priority`; kept as a separate entry point since it needs the
/// snapshot's health map rather than just the descriptor.
pub fn rank_by_live_latency(snapshot: &RegistrySnapshot, candidates: Vec<&ModelDescriptor>) -> Vec<String> {
    let mut scored: Vec<(&ModelDescriptor, f64)> = candidates
        .iter()
        .map(|m| (*m, live_latency(snapshot, &m.id)))
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(m, _)| m.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn model(id: &str, quality: f32, speed: f32, input_price: f64, output_price: f64) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            provider_tag: "openai".to_string(),
            capabilities: HashSet::from([Capability::Chat]),
            context_window: 8192,
            input_price_per_million: input_price,
            output_price_per_million: output_price,
            default_max_tokens: 1024,
            quality_score: Some(quality),
            speed_score: Some(speed),
        }
    }

    fn empty_snapshot() -> RegistrySnapshot {
        crate::registry::ModelRegistry::new().snapshot()
    }

    #[test]
    fn quality_first_ranks_strictly_by_quality_when_not_tied() {
        let a = model("a", 0.9, 0.1, 1.0, 1.0);
        let b = model("b", 0.5, 0.9, 1.0, 1.0);
        let ranked = rank(Strategy::QualityFirst, &empty_snapshot(), vec![&a, &b], &AtomicUsize::new(0));
        assert_eq!(ranked, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn quality_first_breaks_same_quality_ties_by_lower_live_latency() {
        let reg = crate::registry::ModelRegistry::new();
        reg.register(model("a", 0.8, 0.5, 1.0, 1.0)).unwrap();
        reg.register(model("b", 0.8, 0.5, 1.0, 1.0)).unwrap();
        reg.update_health("a", true, 400);
        reg.update_health("b", true, 50);
        let snapshot = reg.snapshot();

        let a = model("a", 0.8, 0.5, 1.0, 1.0);
        let b = model("b", 0.8, 0.5, 1.0, 1.0);
        let ranked = rank(Strategy::QualityFirst, &snapshot, vec![&a, &b], &AtomicUsize::new(0));
        assert_eq!(ranked, vec!["b".to_string(), "a".to_string()], "b has the same quality score but lower observed latency");
    }

    #[test]
    fn cost_optimized_ranks_cheapest_first() {
        let a = model("a", 0.5, 0.5, 10.0, 10.0);
        let b = model("b", 0.5, 0.5, 1.0, 1.0);
        let ranked = rank(Strategy::CostOptimized, &empty_snapshot(), vec![&a, &b], &AtomicUsize::new(0));
        assert_eq!(ranked, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn round_robin_rotates_across_calls() {
        let a = model("a", 0.5, 0.5, 1.0, 1.0);
        let b = model("b", 0.5, 0.5, 1.0, 1.0);
        let cursor = AtomicUsize::new(0);
        let snapshot = empty_snapshot();
        let first = rank(Strategy::RoundRobin, &snapshot, vec![&a, &b], &cursor);
        let second = rank(Strategy::RoundRobin, &snapshot, vec![&a, &b], &cursor);
        assert_ne!(first[0], second[0]);
    }

    #[test]
    fn candidate_filter_excludes_open_circuits_and_missing_credentials() {
        let reg = crate::registry::ModelRegistry::new();
        reg.register(model("openai:a", 0.5, 0.5, 1.0, 1.0)).unwrap();
        reg.register(model("openai:b", 0.5, 0.5, 1.0, 1.0)).unwrap();
        reg.set_circuit_state("openai:a", CircuitState::Open);
        let snapshot = reg.snapshot();

        let req = GenerationRequest::new_chat(
            vec![crate::envelope::ChatMessage { role: crate::envelope::Role::User, content: "hi".into() }],
            64,
        );
        let survivors = candidate_filter(&snapshot, &req, |_| true, &[]);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, "openai:b");

        let survivors_no_cred = candidate_filter(&snapshot, &req, |_| false, &[]);
        assert!(survivors_no_cred.is_empty());
    }
}
