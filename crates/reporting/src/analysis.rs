//! Bandit and A/B experiment reports built from snapshots of arm state and
//! outcome events.

use experiment_core::config::StatisticsConfig;
use experiment_core::types::{Arm, BanditExperiment, Experiment, OutcomeEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::statistics::{
    best_observed_rate, compare_variants_at, proportion_interval, regret, required_sample_size,
    summarize, two_proportion_z_test, ConfidenceInterval, MetricSummary, StatisticalTest,
};

// ─── Bandit analysis ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmAnalysis {
    pub arm_id: String,
    pub name: String,
    pub pulls: u64,
    pub successes: u64,
    pub conversion_rate: f64,
    pub average_reward: f64,
    pub confidence_interval: ConfidenceInterval,
    pub posterior_mean: f64,
    pub traffic_allocation: f64,
    pub regret: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditAnalysis {
    pub experiment_id: String,
    pub total_pulls: u64,
    /// Arms in definition order.
    pub arms: Vec<ArmAnalysis>,
    pub total_regret: f64,
    /// Highest observed conversion rate; `None` until some arm has been pulled.
    pub best_arm_id: Option<String>,
}

impl BanditAnalysis {
    /// Arms sorted by conversion rate, best first. Ties keep definition order.
    pub fn ranked_arms(&self) -> Vec<&ArmAnalysis> {
        let mut ranked: Vec<&ArmAnalysis> = self.arms.iter().collect();
        ranked.sort_by(|a, b| b.conversion_rate.total_cmp(&a.conversion_rate));
        ranked
    }
}

pub fn analyze_bandit(experiment: &BanditExperiment, config: &StatisticsConfig) -> BanditAnalysis {
    let best_rate = best_observed_rate(&experiment.arms);
    let arm_count = experiment.arms.len().max(1) as f64;

    let arms: Vec<ArmAnalysis> = experiment
        .arms
        .iter()
        .map(|arm| ArmAnalysis {
            arm_id: arm.id.clone(),
            name: arm.name.clone(),
            pulls: arm.pulls,
            successes: arm.successes,
            conversion_rate: arm.success_rate(),
            average_reward: arm.average_reward(),
            confidence_interval: proportion_interval(arm.successes, arm.pulls, config.z_score),
            posterior_mean: arm.posterior_mean(),
            traffic_allocation: if experiment.total_pulls > 0 {
                arm.pulls as f64 / experiment.total_pulls as f64
            } else {
                1.0 / arm_count
            },
            regret: regret(arm, best_rate),
        })
        .collect();

    let total_regret = arms.iter().map(|a| a.regret).sum();
    let best_arm_id = if experiment.arms.iter().any(|a| a.pulls > 0) {
        experiment
            .arms
            .iter()
            .fold(None::<&Arm>, |best, arm| match best {
                Some(b) if b.success_rate() >= arm.success_rate() => Some(b),
                _ => Some(arm),
            })
            .map(|a| a.id.clone())
    } else {
        None
    };

    BanditAnalysis {
        experiment_id: experiment.id.clone(),
        total_pulls: experiment.total_pulls,
        arms,
        total_regret,
        best_arm_id,
    }
}

// ─── A/B experiment analysis ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantReport {
    pub variant_id: String,
    pub name: String,
    pub is_control: bool,
    pub samples: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub reward: MetricSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantComparison {
    pub control_id: String,
    pub variant_id: String,
    /// Welch comparison of per-unit reward.
    pub reward_test: StatisticalTest,
    /// Absolute difference in conversion rate (treatment − control).
    pub conversion_lift: f64,
    pub conversion_p_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub experiment_id: String,
    pub variants: Vec<VariantReport>,
    pub comparisons: Vec<VariantComparison>,
    pub total_samples: u64,
    pub min_sample_size: u64,
    pub required_samples_per_variant: Option<u64>,
    pub sample_size_reached: bool,
}

/// Group `outcomes` by variant and compare every treatment with the control
/// (the first variant). Outcomes for unknown variants are ignored.
pub fn analyze_experiment(
    experiment: &Experiment,
    outcomes: &[OutcomeEvent],
    config: &StatisticsConfig,
) -> ExperimentReport {
    let mut grouped: HashMap<&str, Vec<&OutcomeEvent>> = HashMap::new();
    for event in outcomes.iter().filter(|e| e.experiment_id == experiment.id) {
        grouped.entry(event.arm_id.as_str()).or_default().push(event);
    }

    let variants: Vec<VariantReport> = experiment
        .variants
        .iter()
        .enumerate()
        .map(|(i, variant)| {
            let events = grouped.get(variant.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let rewards: Vec<f64> = events.iter().map(|e| e.reward).collect();
            let samples = events.len() as u64;
            let conversions = events.iter().filter(|e| e.success).count() as u64;
            VariantReport {
                variant_id: variant.id.clone(),
                name: variant.name.clone(),
                is_control: i == 0,
                samples,
                conversions,
                conversion_rate: if samples > 0 {
                    conversions as f64 / samples as f64
                } else {
                    0.0
                },
                reward: summarize(&rewards),
            }
        })
        .collect();

    let comparisons = match variants.split_first() {
        Some((control, treatments)) => treatments
            .iter()
            .map(|treatment| VariantComparison {
                control_id: control.variant_id.clone(),
                variant_id: treatment.variant_id.clone(),
                reward_test: compare_variants_at(
                    &control.reward,
                    &treatment.reward,
                    config.significance_level,
                ),
                conversion_lift: treatment.conversion_rate - control.conversion_rate,
                conversion_p_value: two_proportion_z_test(
                    treatment.conversions,
                    treatment.samples,
                    control.conversions,
                    control.samples,
                ),
            })
            .collect(),
        None => Vec::new(),
    };

    let total_samples = variants.iter().map(|v| v.samples).sum();
    let required_samples_per_variant = variants.first().and_then(|control| {
        required_sample_size(
            control.conversion_rate,
            experiment.minimum_detectable_effect,
            experiment.confidence_level,
            config.power,
        )
    });
    let per_variant_ok = required_samples_per_variant
        .map_or(true, |required| variants.iter().all(|v| v.samples >= required));

    ExperimentReport {
        experiment_id: experiment.id.clone(),
        variants,
        comparisons,
        total_samples,
        min_sample_size: experiment.min_sample_size,
        required_samples_per_variant,
        sample_size_reached: total_samples >= experiment.min_sample_size && per_variant_ok,
    }
}
