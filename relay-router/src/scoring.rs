//! Candidate filtering, scoring, and selection.
//!
//! Pure functions over `(profiles, analysis, slider)`: filter by hard
//! requirements, score the survivors, sort with a deterministic tie-break.
//! The same request against the same catalog must route identically.

use serde::{Deserialize, Serialize};

use relay_types::{ModelProfile, SliderConfig};

use crate::analysis::RequestAnalysis;

/// Accuracy floor applied when the request demands function calling.
pub const FC_ACCURACY_FLOOR: f64 = 0.90;

/// A ranked alternate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternate {
    /// Model identifier.
    pub model_id: String,
    /// Provider instance.
    pub provider: String,
    /// Score it achieved.
    pub score: f64,
}

/// The routing verdict for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Chosen model.
    pub model_id: String,
    /// Provider instance serving it.
    pub provider: String,
    /// Winning score.
    pub score: f64,
    /// Why the model was chosen, human-readable.
    pub reasons: Vec<String>,
    /// Up to three runners-up.
    pub alternates: Vec<Alternate>,
}

/// Apply the hard filters. Falls back rather than emptying the pool:
/// an impossible requirement relaxes to the nearest satisfiable one.
#[must_use]
pub fn filter_candidates(
    profiles: &[ModelProfile],
    analysis: &RequestAnalysis,
) -> Vec<ModelProfile> {
    let mut candidates: Vec<ModelProfile> = profiles
        .iter()
        .filter(|p| p.capabilities.chat && p.metadata.is_available)
        .cloned()
        .collect();

    if analysis.demands_function_calling() {
        let strict: Vec<ModelProfile> = candidates
            .iter()
            .filter(|p| {
                p.capabilities.function_calling
                    && p.capabilities.function_calling_accuracy >= FC_ACCURACY_FLOOR
            })
            .cloned()
            .collect();
        if strict.is_empty() {
            // Nothing clears the floor: take the top three FC models by
            // accuracy instead.
            let mut fc: Vec<ModelProfile> = candidates
                .iter()
                .filter(|p| p.capabilities.function_calling)
                .cloned()
                .collect();
            fc.sort_by(|a, b| {
                b.capabilities
                    .function_calling_accuracy
                    .total_cmp(&a.capabilities.function_calling_accuracy)
            });
            fc.truncate(3);
            if !fc.is_empty() {
                candidates = fc;
            }
        } else {
            candidates = strict;
        }
    }

    if analysis.requires_vision {
        let with_vision: Vec<ModelProfile> = candidates
            .iter()
            .filter(|p| p.capabilities.vision)
            .cloned()
            .collect();
        if !with_vision.is_empty() {
            candidates = with_vision;
        }
    }

    if analysis.is_long_conversation() {
        let roomy: Vec<ModelProfile> = candidates
            .iter()
            .filter(|p| p.performance.max_context_tokens >= 2 * analysis.estimated_tokens)
            .cloned()
            .collect();
        if !roomy.is_empty() {
            candidates = roomy;
        }
    }

    candidates
}

/// Score one candidate. Higher is better.
#[must_use]
pub fn score_model(
    profile: &ModelProfile,
    analysis: &RequestAnalysis,
    slider: &SliderConfig,
) -> (f64, Vec<String>) {
    let accuracy = profile.capabilities.function_calling_accuracy;
    let quality = slider.quality_weight;
    let cost_weight = slider.cost_weight;
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if analysis.has_tools {
        let term = 50.0 * accuracy * (0.5 + 0.5 * quality);
        score += term;
        reasons.push(format!("tools requested (+{term:.1})"));
    }
    if analysis.is_multi_step || analysis.is_multi_cloud {
        let term = 30.0 * accuracy * (0.5 + 0.5 * quality);
        score += term;
        reasons.push(format!("multi-step or multi-cloud (+{term:.1})"));
    }
    if analysis.requires_vision && profile.capabilities.vision {
        score += 20.0;
        reasons.push("vision supported (+20.0)".into());
    }
    if analysis.is_long_conversation() {
        let term = (profile.performance.max_context_tokens as f64 / 50_000.0).min(10.0);
        score += term;
        reasons.push(format!("large context window (+{term:.1})"));
    }

    let input_price: f64 = {
        use rust_decimal::prelude::ToPrimitive;
        profile.cost.input_per_1k_tokens.to_f64().unwrap_or(0.0)
    };
    let cost_term = (1.0 - (input_price / 0.01).min(1.0)) * 25.0 * cost_weight;
    score += cost_term;

    let latency_term =
        (1.0 - (profile.performance.avg_latency_ms / 1000.0).min(1.0)) * 10.0 * cost_weight;
    score += latency_term;
    if cost_weight > 0.0 {
        reasons.push(format!("cost and latency (+{:.1})", cost_term + latency_term));
    }

    if quality > 0.6 {
        let term = 15.0 * accuracy * quality;
        score += term;
        reasons.push(format!("quality preference (+{term:.1})"));
    }

    (score, reasons)
}

/// Rank candidates and build the decision.
///
/// Ties break on lower latency, then lexical model id, so a full catalog
/// rebuild cannot flip the choice between equal candidates.
#[must_use]
pub fn select(
    candidates: Vec<ModelProfile>,
    analysis: &RequestAnalysis,
    slider: &SliderConfig,
) -> Option<RoutingDecision> {
    let mut scored: Vec<(f64, Vec<String>, ModelProfile)> = candidates
        .into_iter()
        .map(|profile| {
            let (score, reasons) = score_model(&profile, analysis, slider);
            (score, reasons, profile)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then(
                a.2.performance
                    .avg_latency_ms
                    .total_cmp(&b.2.performance.avg_latency_ms),
            )
            .then(a.2.model_id.cmp(&b.2.model_id))
    });

    let mut iter = scored.into_iter();
    let (score, reasons, winner) = iter.next()?;
    let alternates = iter
        .take(3)
        .map(|(score, _, profile)| Alternate {
            model_id: profile.model_id,
            provider: profile.provider,
            score,
        })
        .collect();

    Some(RoutingDecision {
        model_id: winner.model_id,
        provider: winner.provider,
        score,
        reasons,
        alternates,
    })
}
