//! Multi-Armed Bandit engine — Epsilon-Greedy, UCB1, Thompson Sampling
//! for adaptive traffic allocation.

use chrono::Utc;
use experiment_core::config::BanditSettings;
use experiment_core::store::{BanditHandle, DefinitionStore, OutcomeStore};
use experiment_core::types::{
    AlgorithmParams, Arm, BanditAlgorithm, BanditExperiment, BanditStatus, Context, OutcomeEvent,
};
use experiment_core::{ExperimentError, ExperimentResult};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::sampling::beta_sample;

/// Pick the index of the next arm to serve. Does not mutate any counters.
pub fn select_arm<R: Rng + ?Sized>(
    experiment: &BanditExperiment,
    rng: &mut R,
) -> ExperimentResult<usize> {
    if experiment.arms.is_empty() {
        return Err(ExperimentError::Validation(format!(
            "bandit {} has no arms",
            experiment.id
        )));
    }

    let index = match experiment.algorithm {
        BanditAlgorithm::EpsilonGreedy => {
            epsilon_greedy(&experiment.arms, experiment.params.epsilon, rng)
        }
        BanditAlgorithm::Ucb1 => ucb1(
            &experiment.arms,
            experiment.total_pulls,
            experiment.params.ucb_confidence,
        ),
        BanditAlgorithm::ThompsonSampling | BanditAlgorithm::Bayesian => {
            thompson_sampling(&experiment.arms, rng)
        }
    };
    Ok(index)
}

fn epsilon_greedy<R: Rng + ?Sized>(arms: &[Arm], epsilon: f64, rng: &mut R) -> usize {
    if rng.gen::<f64>() < epsilon {
        return rng.gen_range(0..arms.len());
    }
    argmax(arms.iter().map(Arm::average_reward))
}

/// UCB1 score for one arm. Untried arms score `+inf`.
pub fn ucb_score(arm: &Arm, total_pulls: u64, confidence: f64) -> f64 {
    if arm.pulls == 0 {
        return f64::INFINITY;
    }
    let log_total = (total_pulls.max(1) as f64).ln();
    arm.average_reward() + confidence * (log_total / arm.pulls as f64).sqrt()
}

fn ucb1(arms: &[Arm], total_pulls: u64, confidence: f64) -> usize {
    argmax(arms.iter().map(|arm| ucb_score(arm, total_pulls, confidence)))
}

fn thompson_sampling<R: Rng + ?Sized>(arms: &[Arm], rng: &mut R) -> usize {
    let samples: Vec<f64> = arms
        .iter()
        .map(|arm| beta_sample(rng, arm.alpha, arm.beta))
        .collect();
    argmax(samples.into_iter())
}

/// First index holding the maximum; later equal scores never displace it.
fn argmax(scores: impl Iterator<Item = f64>) -> usize {
    let mut best_score = f64::NEG_INFINITY;
    let mut best_index = 0;
    for (index, score) in scores.enumerate() {
        if score > best_score {
            best_score = score;
            best_index = index;
        }
    }
    best_index
}

/// Serves and learns bandit experiments held in a [`DefinitionStore`].
///
/// Every counter mutation happens under the experiment's own lock; stores are
/// called after the lock is released.
pub struct BanditEngine {
    definitions: Arc<dyn DefinitionStore>,
    outcomes: Arc<dyn OutcomeStore>,
    defaults: AlgorithmParams,
}

impl BanditEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        outcomes: Arc<dyn OutcomeStore>,
        settings: &BanditSettings,
    ) -> Self {
        Self {
            definitions,
            outcomes,
            defaults: AlgorithmParams {
                epsilon: settings.default_epsilon,
                ucb_confidence: settings.default_ucb_confidence,
            },
        }
    }

    /// Register a new bandit. An id that is already registered is rejected.
    pub fn create_bandit(&self, bandit: BanditExperiment) -> ExperimentResult<BanditHandle> {
        bandit.validate()?;
        let id = bandit.id.clone();
        let algorithm = bandit.algorithm;
        let arms = bandit.arms.len();
        let handle = self.definitions.put_bandit(bandit)?;
        info!(experiment_id = %id, algorithm = ?algorithm, arms, "Bandit experiment created");
        Ok(handle)
    }

    /// Create a bandit using the configured epsilon and UCB multiplier.
    pub fn create_with_defaults(
        &self,
        id: &str,
        name: &str,
        algorithm: BanditAlgorithm,
        arms: Vec<Arm>,
    ) -> ExperimentResult<BanditHandle> {
        self.create_bandit(BanditExperiment::new(id, name, algorithm, arms).with_params(self.defaults))
    }

    pub fn stop_bandit(&self, experiment_id: &str) -> ExperimentResult<()> {
        let handle = self.definitions.get_bandit(experiment_id)?;
        handle.lock().status = BanditStatus::Stopped;
        info!(experiment_id, "Bandit experiment stopped");
        Ok(())
    }

    /// A copy of the current state for read-only analysis.
    pub fn snapshot(&self, experiment_id: &str) -> ExperimentResult<BanditExperiment> {
        let handle = self.definitions.get_bandit(experiment_id)?;
        let snapshot = handle.lock().clone();
        Ok(snapshot)
    }

    /// Choose an arm for `unit_id` and count the pull, using the thread-local RNG.
    pub fn select_arm(
        &self,
        experiment_id: &str,
        unit_id: &str,
        context: &Context,
    ) -> ExperimentResult<Arm> {
        self.select_arm_with_rng(experiment_id, unit_id, context, &mut rand::thread_rng())
    }

    pub fn select_arm_with_rng<R: Rng + ?Sized>(
        &self,
        experiment_id: &str,
        unit_id: &str,
        _context: &Context,
        rng: &mut R,
    ) -> ExperimentResult<Arm> {
        let handle = self.definitions.get_bandit(experiment_id)?;
        let arm = {
            let mut bandit = handle.lock();
            if !bandit.is_active() {
                return Err(ExperimentError::InactiveExperiment(experiment_id.to_string()));
            }
            let index = select_arm(&bandit, rng)?;
            bandit
                .record_pull(index)
                .cloned()
                .ok_or_else(|| ExperimentError::Validation(format!("arm index {index} out of range")))?
        };

        debug!(experiment_id, unit_id, arm_id = %arm.id, pulls = arm.pulls, "Arm selected");
        self.persist_arm(experiment_id, &arm);
        Ok(arm)
    }

    /// Record the outcome of serving `arm_id`. `reward` and `success` are
    /// independent: only `success` updates the Beta posterior.
    ///
    /// The reward must be finite and the arm must have a pull without an
    /// outcome yet. The arm is updated under the lock first and the outcome
    /// appended afterwards; if the append fails the arm update is reverted, so
    /// the arm and the outcome log never disagree and the call can be retried.
    pub fn record_reward(
        &self,
        experiment_id: &str,
        arm_id: &str,
        unit_id: &str,
        reward: f64,
        success: bool,
        context: Context,
    ) -> ExperimentResult<()> {
        if !reward.is_finite() {
            return Err(ExperimentError::Validation(format!(
                "reward for {experiment_id}/{arm_id} must be finite, got {reward}"
            )));
        }

        let handle = self.definitions.get_bandit(experiment_id)?;
        let (index, arm) = {
            let mut bandit = handle.lock();
            let index = bandit
                .arm_index(arm_id)
                .ok_or_else(|| ExperimentError::ArmNotFound {
                    experiment_id: experiment_id.to_string(),
                    arm_id: arm_id.to_string(),
                })?;
            let arm = &mut bandit.arms[index];
            if !arm.has_unrewarded_pull() {
                return Err(ExperimentError::Validation(format!(
                    "arm {arm_id} of {experiment_id} has no pull awaiting a reward"
                )));
            }
            arm.apply_reward(reward, success);
            let arm = arm.clone();
            bandit.updated_at = Utc::now();
            (index, arm)
        };

        let appended = self.outcomes.append_outcome(OutcomeEvent::new(
            experiment_id,
            arm_id,
            unit_id,
            reward,
            success,
            context,
        ));
        if let Err(e) = appended {
            handle.lock().arms[index].revert_reward(reward, success);
            warn!(experiment_id, arm_id, unit_id, error = %e, "Outcome append failed, reward reverted");
            return Err(e);
        }

        debug!(experiment_id, arm_id, unit_id, reward, success, "Reward recorded");
        self.persist_arm(experiment_id, &arm);
        Ok(())
    }

    fn persist_arm(&self, experiment_id: &str, arm: &Arm) {
        if let Err(e) = self.definitions.save_arm_update(experiment_id, arm) {
            warn!(experiment_id, arm_id = %arm.id, error = %e, "Failed to persist arm update");
        }
    }
}
