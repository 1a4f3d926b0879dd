//! Continue/stop recommendations. The bar favours keeping a test running over
//! declaring a winner early.

use experiment_core::config::AdvisorConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::{BanditAnalysis, ExperimentReport};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub experiment_id: String,
    pub decision: Decision,
    /// Winning arm (or variant) id when the decision is `Stop`.
    pub winner_arm_id: Option<String>,
    pub confidence: Confidence,
    pub reasons: Vec<String>,
}

impl Recommendation {
    fn keep_going(experiment_id: &str, confidence: Confidence, reason: String) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            decision: Decision::Continue,
            winner_arm_id: None,
            confidence,
            reasons: vec![reason],
        }
    }
}

/// Recommend whether a bandit experiment has a clear winner.
///
/// Stops only when the leading arm's interval lies entirely above the
/// runner-up's and the leader has more than `min_winner_pulls` pulls.
pub fn recommend(analysis: &BanditAnalysis, config: &AdvisorConfig) -> Recommendation {
    let id = analysis.experiment_id.as_str();
    if analysis.total_pulls < config.min_total_pulls {
        return Recommendation::keep_going(
            id,
            Confidence::Low,
            format!(
                "insufficient data: {} of {} required pulls",
                analysis.total_pulls, config.min_total_pulls
            ),
        );
    }

    let ranked = analysis.ranked_arms();
    let (top, runner_up) = match ranked.as_slice() {
        [top, runner_up, ..] => (*top, *runner_up),
        _ => {
            return Recommendation::keep_going(
                id,
                Confidence::Low,
                "at least two arms are needed to declare a winner".to_string(),
            )
        }
    };

    let separated = top.confidence_interval.lower > runner_up.confidence_interval.upper;
    let enough_pulls = top.pulls > config.min_winner_pulls;

    if separated && enough_pulls {
        info!(
            experiment_id = %id,
            winner = %top.arm_id,
            conversion_rate = top.conversion_rate,
            "Bandit experiment has a clear winner"
        );
        return Recommendation {
            experiment_id: id.to_string(),
            decision: Decision::Stop,
            winner_arm_id: Some(top.arm_id.clone()),
            confidence: Confidence::High,
            reasons: vec![
                format!(
                    "arm {} converts at {:.4} vs {:.4} for arm {}",
                    top.arm_id, top.conversion_rate, runner_up.conversion_rate, runner_up.arm_id
                ),
                format!(
                    "confidence intervals do not overlap ({:.4} > {:.4})",
                    top.confidence_interval.lower, runner_up.confidence_interval.upper
                ),
            ],
        };
    }

    let mut reasons = Vec::new();
    if !separated {
        reasons.push(format!(
            "confidence intervals of {} and {} overlap",
            top.arm_id, runner_up.arm_id
        ));
    }
    if !enough_pulls {
        reasons.push(format!(
            "leading arm {} has {} pulls, needs more than {}",
            top.arm_id, top.pulls, config.min_winner_pulls
        ));
    }
    Recommendation {
        experiment_id: id.to_string(),
        decision: Decision::Continue,
        winner_arm_id: None,
        confidence: Confidence::Medium,
        reasons,
    }
}

/// Recommend on an A/B experiment report.
///
/// Continues until the sample size is reached, then stops on the significant
/// treatment with the largest positive effect, or on the control when no
/// treatment beats it.
pub fn recommend_experiment(report: &ExperimentReport) -> Recommendation {
    let id = report.experiment_id.as_str();
    if !report.sample_size_reached {
        let required = report
            .required_samples_per_variant
            .map(|n| format!(", {n} per variant"))
            .unwrap_or_default();
        return Recommendation::keep_going(
            id,
            Confidence::Low,
            format!(
                "insufficient data: {} samples of {} required{}",
                report.total_samples, report.min_sample_size, required
            ),
        );
    }

    let winner = report
        .comparisons
        .iter()
        .filter(|c| c.reward_test.is_significant && c.reward_test.effect_size > 0.0)
        .max_by(|a, b| a.reward_test.effect_size.total_cmp(&b.reward_test.effect_size));

    if let Some(best) = winner {
        info!(experiment_id = %id, winner = %best.variant_id, "Experiment has a significant winner");
        return Recommendation {
            experiment_id: id.to_string(),
            decision: Decision::Stop,
            winner_arm_id: Some(best.variant_id.clone()),
            confidence: Confidence::High,
            reasons: vec![format!(
                "variant {} beats control {} (effect size {:.3}, relative lift {:.2}%)",
                best.variant_id,
                best.control_id,
                best.reward_test.effect_size,
                best.reward_test.relative_lift * 100.0
            )],
        };
    }

    match report.variants.first() {
        Some(control) => Recommendation {
            experiment_id: id.to_string(),
            decision: Decision::Stop,
            winner_arm_id: Some(control.variant_id.clone()),
            confidence: Confidence::Medium,
            reasons: vec![format!(
                "no treatment significantly beats control {} after {} samples",
                control.variant_id, report.total_samples
            )],
        },
        None => Recommendation::keep_going(id, Confidence::Low, "experiment has no variants".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ArmAnalysis;
    use crate::statistics::{proportion_interval, Z_95};

    fn arm(id: &str, pulls: u64, successes: u64) -> ArmAnalysis {
        ArmAnalysis {
            arm_id: id.to_string(),
            name: id.to_uppercase(),
            pulls,
            successes,
            conversion_rate: if pulls > 0 { successes as f64 / pulls as f64 } else { 0.0 },
            average_reward: 0.0,
            confidence_interval: proportion_interval(successes, pulls, Z_95),
            posterior_mean: 0.0,
            traffic_allocation: 0.0,
            regret: 0.0,
        }
    }

    fn analysis(arms: Vec<ArmAnalysis>) -> BanditAnalysis {
        BanditAnalysis {
            experiment_id: "bandit".to_string(),
            total_pulls: arms.iter().map(|a| a.pulls).sum(),
            arms,
            total_regret: 0.0,
            best_arm_id: None,
        }
    }

    #[test]
    fn test_insufficient_data() {
        let rec = recommend(&analysis(vec![arm("a", 40, 30), arm("b", 40, 1)]), &AdvisorConfig::default());
        assert_eq!(rec.decision, Decision::Continue);
        assert_eq!(rec.confidence, Confidence::Low);
        assert!(rec.reasons[0].starts_with("insufficient data"));
    }

    #[test]
    fn test_clear_winner_stops() {
        let rec = recommend(&analysis(vec![arm("a", 100, 10), arm("b", 100, 40)]), &AdvisorConfig::default());
        assert_eq!(rec.decision, Decision::Stop);
        assert_eq!(rec.confidence, Confidence::High);
        assert_eq!(rec.winner_arm_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_overlap_continues() {
        let rec = recommend(&analysis(vec![arm("a", 100, 30), arm("b", 100, 33)]), &AdvisorConfig::default());
        assert_eq!(rec.decision, Decision::Continue);
        assert_eq!(rec.confidence, Confidence::Medium);
        assert!(rec.winner_arm_id.is_none());
    }

    #[test]
    fn test_leader_needs_enough_pulls() {
        let rec = recommend(&analysis(vec![arm("a", 50, 50), arm("b", 950, 10)]), &AdvisorConfig::default());
        assert_eq!(rec.decision, Decision::Continue);
        assert!(rec.reasons.iter().any(|r| r.contains("needs more than 50")));
    }

    #[test]
    fn test_tie_continues() {
        let rec = recommend(&analysis(vec![arm("a", 500, 100), arm("b", 500, 100)]), &AdvisorConfig::default());
        assert_eq!(rec.decision, Decision::Continue);
    }

    #[test]
    fn test_single_arm_continues() {
        let rec = recommend(&analysis(vec![arm("a", 500, 100)]), &AdvisorConfig::default());
        assert_eq!(rec.decision, Decision::Continue);
        assert_eq!(rec.confidence, Confidence::Low);
    }
}
