use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ExperimentError, ExperimentResult};

/// Free-form key/value context attached to outcomes and selections.
pub type Context = HashMap<String, serde_json::Value>;

// ─── A/B Experiments ────────────────────────────────────────────────────
/// A/B/n experiment definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub status: ExperimentStatus,
    /// Variants in bucketing order. The first variant is the control.
    pub variants: Vec<Variant>,
    /// Fraction of units (0–1) eligible for the experiment at all.
    pub rollout_percentage: Option<f64>,
    pub min_sample_size: u64,
    pub confidence_level: f64,
    pub minimum_detectable_effect: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub id: String,
    pub name: String,
    /// Relative weight; weights need not sum to 1.
    pub weight: f64,
}

impl Variant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
        }
    }
}

impl Experiment {
    /// A draft experiment with 95% confidence and no rollout restriction.
    pub fn new(id: impl Into<String>, name: impl Into<String>, variants: Vec<Variant>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            status: ExperimentStatus::Draft,
            variants,
            rollout_percentage: None,
            min_sample_size: 1000,
            confidence_level: 0.95,
            minimum_detectable_effect: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ExperimentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_rollout(mut self, percentage: f64) -> Self {
        self.rollout_percentage = Some(percentage);
        self
    }

    pub fn control(&self) -> Option<&Variant> {
        self.variants.first()
    }

    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Checks the definition at creation time. Selection never re-validates.
    pub fn validate(&self) -> ExperimentResult<()> {
        if self.id.trim().is_empty() {
            return Err(ExperimentError::Validation(
                "experiment id must not be empty".into(),
            ));
        }
        if self.variants.is_empty() {
            return Err(ExperimentError::Validation(format!(
                "experiment {} has no variants",
                self.id
            )));
        }
        ensure_unique(self.variants.iter().map(|v| v.id.as_str()), "variant")?;

        let mut total = 0.0;
        for variant in &self.variants {
            if !variant.weight.is_finite() || variant.weight < 0.0 {
                return Err(ExperimentError::Validation(format!(
                    "variant {} has invalid weight {}",
                    variant.id, variant.weight
                )));
            }
            total += variant.weight;
        }
        if total <= 0.0 {
            return Err(ExperimentError::Validation(format!(
                "experiment {} has no positive variant weight",
                self.id
            )));
        }
        if !total.is_finite() {
            return Err(ExperimentError::Validation(format!(
                "experiment {} total variant weight overflows",
                self.id
            )));
        }

        if let Some(rollout) = self.rollout_percentage {
            if !(0.0..=1.0).contains(&rollout) {
                return Err(ExperimentError::Validation(format!(
                    "rollout percentage {rollout} outside [0, 1]"
                )));
            }
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ExperimentError::Validation(format!(
                "confidence level {} outside (0, 1)",
                self.confidence_level
            )));
        }
        if !self.minimum_detectable_effect.is_finite() || self.minimum_detectable_effect < 0.0 {
            return Err(ExperimentError::Validation(format!(
                "minimum detectable effect {} must be non-negative",
                self.minimum_detectable_effect
            )));
        }
        Ok(())
    }
}

/// A resolved (unit, experiment) → variant mapping. Derived on demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub unit_id: String,
    pub experiment_id: String,
    pub variant_id: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    ExperimentInactive,
    NotInRollout,
    NoEligibleVariant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned(Assignment),
    NotIncluded { reason: ExclusionReason },
}

impl AssignmentOutcome {
    pub fn variant_id(&self) -> Option<&str> {
        match self {
            Self::Assigned(assignment) => Some(assignment.variant_id.as_str()),
            Self::NotIncluded { .. } => None,
        }
    }
}

// ─── Bandit Experiments ─────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BanditAlgorithm {
    EpsilonGreedy,
    Ucb1,
    #[default]
    ThompsonSampling,
    /// Same policy as Thompson Sampling.
    Bayesian,
}

impl FromStr for BanditAlgorithm {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "epsilon_greedy" => Ok(Self::EpsilonGreedy),
            "ucb1" | "ucb" => Ok(Self::Ucb1),
            "thompson" | "thompson_sampling" => Ok(Self::ThompsonSampling),
            "bayesian" => Ok(Self::Bayesian),
            _ => Err(ExperimentError::InvalidAlgorithm(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AlgorithmParams {
    /// Exploration probability for epsilon-greedy.
    pub epsilon: f64,
    /// Multiplier on the UCB1 exploration term.
    pub ucb_confidence: f64,
}

impl Default for AlgorithmParams {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            ucb_confidence: std::f64::consts::SQRT_2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BanditStatus {
    Active,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Arm {
    pub id: String,
    pub name: String,
    pub pulls: u64,
    /// Pulls that have had an outcome recorded. Never exceeds `pulls`.
    #[serde(default)]
    pub rewards: u64,
    pub successes: u64,
    pub cumulative_reward: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Arm {
    /// A fresh arm with the uninformative Beta(1, 1) prior.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            pulls: 0,
            rewards: 0,
            successes: 0,
            cumulative_reward: 0.0,
            alpha: 1.0,
            beta: 1.0,
        }
    }

    pub fn average_reward(&self) -> f64 {
        if self.pulls > 0 {
            self.cumulative_reward / self.pulls as f64
        } else {
            0.0
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.pulls > 0 {
            self.successes as f64 / self.pulls as f64
        } else {
            0.0
        }
    }

    pub fn posterior_mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Whether some pull is still waiting for its outcome.
    pub fn has_unrewarded_pull(&self) -> bool {
        self.rewards < self.pulls
    }

    /// Apply one observed outcome. Only `success` moves the Beta posterior.
    pub fn apply_reward(&mut self, reward: f64, success: bool) {
        self.rewards += 1;
        self.cumulative_reward += reward;
        if success {
            self.successes += 1;
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
    }

    /// Undo a previous [`Arm::apply_reward`] with the same arguments.
    pub fn revert_reward(&mut self, reward: f64, success: bool) {
        self.rewards = self.rewards.saturating_sub(1);
        self.cumulative_reward -= reward;
        if success {
            self.successes = self.successes.saturating_sub(1);
            self.alpha -= 1.0;
        } else {
            self.beta -= 1.0;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditExperiment {
    pub id: String,
    pub name: String,
    pub arms: Vec<Arm>,
    pub algorithm: BanditAlgorithm,
    pub params: AlgorithmParams,
    pub total_pulls: u64,
    pub status: BanditStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BanditExperiment {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        algorithm: BanditAlgorithm,
        arms: Vec<Arm>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            arms,
            algorithm,
            params: AlgorithmParams::default(),
            total_pulls: 0,
            status: BanditStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_params(mut self, params: AlgorithmParams) -> Self {
        self.params = params;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == BanditStatus::Active
    }

    pub fn arm_index(&self, arm_id: &str) -> Option<usize> {
        self.arms.iter().position(|a| a.id == arm_id)
    }

    /// Count one serve of the arm at `index` against both the arm and the experiment.
    pub fn record_pull(&mut self, index: usize) -> Option<&Arm> {
        let arm = self.arms.get_mut(index)?;
        arm.pulls += 1;
        self.total_pulls += 1;
        self.updated_at = Utc::now();
        Some(&self.arms[index])
    }

    pub fn validate(&self) -> ExperimentResult<()> {
        if self.id.trim().is_empty() {
            return Err(ExperimentError::Validation(
                "bandit id must not be empty".into(),
            ));
        }
        if self.arms.is_empty() {
            return Err(ExperimentError::Validation(format!(
                "bandit {} has no arms",
                self.id
            )));
        }
        ensure_unique(self.arms.iter().map(|a| a.id.as_str()), "arm")?;
        for arm in &self.arms {
            if arm.alpha < 1.0 || arm.beta < 1.0 {
                return Err(ExperimentError::Validation(format!(
                    "arm {} prior must satisfy alpha >= 1 and beta >= 1",
                    arm.id
                )));
            }
        }
        let eps = self.params.epsilon;
        if !(0.0..=1.0).contains(&eps) {
            return Err(ExperimentError::Validation(format!(
                "epsilon {eps} outside [0, 1]"
            )));
        }
        let c = self.params.ucb_confidence;
        if !c.is_finite() || c < 0.0 {
            return Err(ExperimentError::Validation(format!(
                "UCB confidence multiplier {c} must be finite and non-negative"
            )));
        }
        Ok(())
    }
}

// ─── Outcomes ───────────────────────────────────────────────────────────
/// One observed outcome. Append-only; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub id: Uuid,
    pub experiment_id: String,
    /// Arm id for bandits, variant id for A/B experiments.
    pub arm_id: String,
    pub unit_id: String,
    pub reward: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Context,
}

impl OutcomeEvent {
    pub fn new(
        experiment_id: impl Into<String>,
        arm_id: impl Into<String>,
        unit_id: impl Into<String>,
        reward: f64,
        success: bool,
        context: Context,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            experiment_id: experiment_id.into(),
            arm_id: arm_id.into(),
            unit_id: unit_id.into(),
            reward,
            success,
            timestamp: Utc::now(),
            context,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts <= self.end
    }
}

fn ensure_unique<'a>(ids: impl Iterator<Item = &'a str>, what: &str) -> ExperimentResult<()> {
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ExperimentError::Validation(format!("duplicate {what} id: {id}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_defaults_to_uninformative_prior() {
        let arm = Arm::new("a", "A");
        assert_eq!(arm.alpha, 1.0);
        assert_eq!(arm.beta, 1.0);
        assert_eq!(arm.average_reward(), 0.0);
        assert_eq!(arm.success_rate(), 0.0);
        assert!((arm.posterior_mean() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_credit_does_not_move_alpha() {
        let mut arm = Arm::new("a", "A");
        arm.pulls = 1;
        arm.apply_reward(0.5, false);
        assert_eq!(arm.alpha, 1.0);
        assert_eq!(arm.beta, 2.0);
        assert!((arm.cumulative_reward - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_revert_reward_restores_arm() {
        let mut arm = Arm::new("a", "A");
        arm.pulls = 2;
        arm.apply_reward(1.0, true);
        let before = arm.clone();

        arm.apply_reward(0.25, false);
        assert!(!arm.has_unrewarded_pull());
        arm.revert_reward(0.25, false);
        assert_eq!(arm, before);
        assert!(arm.has_unrewarded_pull());

        arm.revert_reward(1.0, true);
        assert_eq!(arm, Arm { pulls: 2, ..Arm::new("a", "A") });
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!(
            "epsilon-greedy".parse::<BanditAlgorithm>().unwrap(),
            BanditAlgorithm::EpsilonGreedy
        );
        assert_eq!("UCB1".parse::<BanditAlgorithm>().unwrap(), BanditAlgorithm::Ucb1);
        assert_eq!(
            "thompson".parse::<BanditAlgorithm>().unwrap(),
            BanditAlgorithm::ThompsonSampling
        );
        assert!(matches!(
            "softmax".parse::<BanditAlgorithm>(),
            Err(ExperimentError::InvalidAlgorithm(_))
        ));
    }

    #[test]
    fn test_experiment_validation() {
        let ok = Experiment::new("e1", "E1", vec![Variant::new("a", "A", 1.0)]);
        assert!(ok.validate().is_ok());

        let empty = Experiment::new("e1", "E1", vec![]);
        assert!(empty.validate().is_err());

        let dup = Experiment::new(
            "e1",
            "E1",
            vec![Variant::new("a", "A", 1.0), Variant::new("a", "B", 1.0)],
        );
        assert!(dup.validate().is_err());

        let zero = Experiment::new("e1", "E1", vec![Variant::new("a", "A", 0.0)]);
        assert!(zero.validate().is_err());

        let rollout = Experiment::new("e1", "E1", vec![Variant::new("a", "A", 1.0)]).with_rollout(1.5);
        assert!(rollout.validate().is_err());

        let overflowing = Experiment::new(
            "e1",
            "E1",
            vec![Variant::new("a", "A", f64::MAX), Variant::new("b", "B", f64::MAX)],
        );
        assert!(overflowing.validate().is_err());
    }

    #[test]
    fn test_bandit_validation() {
        let bandit = BanditExperiment::new("b", "B", BanditAlgorithm::Ucb1, vec![Arm::new("a", "A")]);
        assert!(bandit.validate().is_ok());

        let mut bad_prior = bandit.clone();
        bad_prior.arms[0].alpha = 0.5;
        assert!(bad_prior.validate().is_err());

        let bad_eps = bandit.clone().with_params(AlgorithmParams {
            epsilon: 1.5,
            ucb_confidence: 1.0,
        });
        assert!(bad_eps.validate().is_err());

        let no_arms = BanditExperiment::new("b", "B", BanditAlgorithm::Ucb1, vec![]);
        assert!(no_arms.validate().is_err());
    }

    #[test]
    fn test_record_pull_counts_both_levels() {
        let mut bandit = BanditExperiment::new(
            "b",
            "B",
            BanditAlgorithm::Ucb1,
            vec![Arm::new("a", "A"), Arm::new("b", "B")],
        );
        bandit.record_pull(1);
        bandit.record_pull(1);
        assert_eq!(bandit.arms[1].pulls, 2);
        assert_eq!(bandit.total_pulls, 2);
        assert!(bandit.record_pull(5).is_none());
        assert_eq!(bandit.total_pulls, 2);
    }
}
