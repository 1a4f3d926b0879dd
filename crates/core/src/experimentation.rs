//! Deterministic A/B/n assignment and the experiment lifecycle service.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ExperimentError, ExperimentResult};
use crate::hashing::{hash, rollout};
use crate::store::{DefinitionStore, OutcomeStore};
use crate::types::{
    Assignment, AssignmentOutcome, Context, ExclusionReason, Experiment, ExperimentStatus,
    OutcomeEvent, TimeRange, Variant,
};

/// Integer units per unit of relative weight when bucketing.
const WEIGHT_SCALE: f64 = 10_000.0;

/// Murmur3 yields 32 bits, so buckets past this are never drawn.
const MAX_BUCKETS: f64 = u32::MAX as f64;

/// Resolve the variant for `unit_id`, or `None` when the unit is not included.
///
/// Pure: the same experiment definition and unit always give the same variant.
/// Attributes do not influence bucketing.
pub fn resolve<'a>(
    experiment: &'a Experiment,
    unit_id: &str,
    attributes: &Context,
) -> Option<&'a Variant> {
    resolve_with_reason(experiment, unit_id, attributes).ok()
}

/// Like [`resolve`], but wraps the result in a timestamped [`Assignment`] and
/// reports why a unit was left out.
pub fn assign(experiment: &Experiment, unit_id: &str, attributes: &Context) -> AssignmentOutcome {
    match resolve_with_reason(experiment, unit_id, attributes) {
        Ok(variant) => AssignmentOutcome::Assigned(Assignment {
            unit_id: unit_id.to_string(),
            experiment_id: experiment.id.clone(),
            variant_id: variant.id.clone(),
            assigned_at: Utc::now(),
        }),
        Err(reason) => AssignmentOutcome::NotIncluded { reason },
    }
}

fn resolve_with_reason<'a>(
    experiment: &'a Experiment,
    unit_id: &str,
    _attributes: &Context,
) -> Result<&'a Variant, ExclusionReason> {
    if experiment.status != ExperimentStatus::Active {
        return Err(ExclusionReason::ExperimentInactive);
    }

    if let Some(fraction) = experiment.rollout_percentage {
        let percentage = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
        if !rollout(unit_id, percentage) {
            return Err(ExclusionReason::NotInRollout);
        }
    }

    let total_weight: f64 = experiment.variants.iter().map(|v| usable_weight(v.weight)).sum();
    if !total_weight.is_finite() || total_weight <= 0.0 {
        return Err(ExclusionReason::NoEligibleVariant);
    }
    // Large weights are rescaled so the bucket range stays within the hash output.
    let scale = WEIGHT_SCALE.min(MAX_BUCKETS / total_weight);

    let scaled: Vec<u64> = experiment
        .variants
        .iter()
        .map(|v| (usable_weight(v.weight) * scale).round() as u64)
        .collect();
    let total = scaled.iter().fold(0u64, |acc, w| acc.saturating_add(*w));
    if total == 0 {
        return Err(ExclusionReason::NoEligibleVariant);
    }

    let key = format!("{}{}", unit_id, experiment.id);
    let bucket = hash(&key, total);

    let mut cumulative = 0u64;
    for (variant, weight) in experiment.variants.iter().zip(&scaled) {
        cumulative = cumulative.saturating_add(*weight);
        if bucket < cumulative {
            return Ok(variant);
        }
    }
    Err(ExclusionReason::NoEligibleVariant)
}

fn usable_weight(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Experimentation engine for A/B/n testing. Definitions and outcomes live in
/// the injected stores.
pub struct ExperimentEngine {
    definitions: Arc<dyn DefinitionStore>,
    outcomes: Arc<dyn OutcomeStore>,
}

impl ExperimentEngine {
    pub fn new(definitions: Arc<dyn DefinitionStore>, outcomes: Arc<dyn OutcomeStore>) -> Self {
        Self {
            definitions,
            outcomes,
        }
    }

    pub fn create_experiment(&self, experiment: Experiment) -> ExperimentResult<String> {
        experiment.validate()?;
        let id = experiment.id.clone();
        let variants = experiment.variants.len();
        let status = experiment.status;
        self.definitions.insert_experiment(experiment)?;
        info!(experiment_id = %id, variants, status = ?status, "Experiment created");
        Ok(id)
    }

    pub fn get_experiment(&self, id: &str) -> ExperimentResult<Experiment> {
        self.definitions.get_experiment(id)
    }

    /// Move an experiment through its lifecycle. Completed is terminal.
    pub fn set_status(&self, id: &str, status: ExperimentStatus) -> ExperimentResult<Experiment> {
        let mut experiment = self.definitions.get_experiment(id)?;
        let from = experiment.status;
        if !transition_allowed(from, status) {
            return Err(ExperimentError::Validation(format!(
                "experiment {id} cannot move from {from:?} to {status:?}"
            )));
        }
        experiment.status = status;
        experiment.updated_at = Utc::now();
        self.definitions.put_experiment(experiment.clone())?;
        info!(experiment_id = %id, from = ?from, to = ?status, "Experiment status changed");
        Ok(experiment)
    }

    pub fn assign(
        &self,
        experiment_id: &str,
        unit_id: &str,
        attributes: &Context,
    ) -> ExperimentResult<AssignmentOutcome> {
        let experiment = self.definitions.get_experiment(experiment_id)?;
        let outcome = assign(&experiment, unit_id, attributes);
        if let AssignmentOutcome::NotIncluded { reason } = &outcome {
            debug!(experiment_id, unit_id, reason = ?reason, "Unit not included");
        }
        Ok(outcome)
    }

    /// Append an outcome for a variant of an A/B experiment. The reward must
    /// be finite.
    pub fn record_outcome(
        &self,
        experiment_id: &str,
        variant_id: &str,
        unit_id: &str,
        reward: f64,
        success: bool,
        context: Context,
    ) -> ExperimentResult<()> {
        if !reward.is_finite() {
            return Err(ExperimentError::Validation(format!(
                "reward for {experiment_id}/{variant_id} must be finite, got {reward}"
            )));
        }
        let experiment = self.definitions.get_experiment(experiment_id)?;
        if experiment.variant(variant_id).is_none() {
            return Err(ExperimentError::variant_not_found(variant_id));
        }
        self.outcomes.append_outcome(OutcomeEvent::new(
            experiment_id,
            variant_id,
            unit_id,
            reward,
            success,
            context,
        ))?;
        debug!(experiment_id, variant_id, unit_id, reward, success, "Outcome recorded");
        Ok(())
    }

    pub fn outcomes(
        &self,
        experiment_id: &str,
        range: Option<TimeRange>,
    ) -> ExperimentResult<Vec<OutcomeEvent>> {
        self.outcomes.list_outcomes(experiment_id, range)
    }
}

fn transition_allowed(from: ExperimentStatus, to: ExperimentStatus) -> bool {
    use ExperimentStatus::*;
    matches!(
        (from, to),
        (Draft, Active) | (Active, Paused) | (Paused, Active) | (Active, Completed) | (Paused, Completed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDefinitionStore, MemoryOutcomeStore};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn active_experiment() -> Experiment {
        Experiment::new(
            "homepage-cta",
            "Homepage CTA",
            vec![
                Variant::new("control", "Control", 1.0),
                Variant::new("treatment", "Treatment", 1.0),
            ],
        )
        .with_status(ExperimentStatus::Active)
    }

    fn engine() -> ExperimentEngine {
        ExperimentEngine::new(
            Arc::new(MemoryDefinitionStore::new()),
            Arc::new(MemoryOutcomeStore::new()),
        )
    }

    #[test]
    fn test_inactive_experiment_assigns_nothing() {
        let experiment = active_experiment().with_status(ExperimentStatus::Paused);
        assert!(resolve(&experiment, "user-1", &HashMap::new()).is_none());
        assert_eq!(
            assign(&experiment, "user-1", &HashMap::new()),
            AssignmentOutcome::NotIncluded {
                reason: ExclusionReason::ExperimentInactive
            }
        );
    }

    #[test]
    fn test_zero_rollout_excludes_everyone() {
        let experiment = active_experiment().with_rollout(0.0);
        for i in 0..200 {
            let outcome = assign(&experiment, &format!("user-{i}"), &HashMap::new());
            assert_eq!(
                outcome,
                AssignmentOutcome::NotIncluded {
                    reason: ExclusionReason::NotInRollout
                }
            );
        }
    }

    #[test]
    fn test_partial_rollout_excludes_some() {
        let experiment = active_experiment().with_rollout(0.3);
        let included = (0..2000)
            .filter(|i| resolve(&experiment, &format!("user-{i}"), &HashMap::new()).is_some())
            .count();
        assert!(included > 400 && included < 800, "included {included}");
    }

    #[test]
    fn test_weights_are_relative() {
        let mut experiment = active_experiment();
        experiment.variants[0].weight = 3.0;
        experiment.variants[1].weight = 1.0;

        let control = (0..4000)
            .filter(|i| {
                resolve(&experiment, &format!("user-{i}"), &HashMap::new())
                    .map(|v| v.id == "control")
                    .unwrap_or(false)
            })
            .count();
        assert!(control > 2700 && control < 3300, "control {control}");
    }

    #[test]
    fn test_huge_weights_keep_their_ratio() {
        let mut experiment = active_experiment();
        experiment.variants[0].weight = 1e16;
        experiment.variants[1].weight = 3e16;
        assert!(experiment.validate().is_ok());

        let control = (0..4000)
            .filter(|i| {
                resolve(&experiment, &format!("user-{i}"), &HashMap::new())
                    .map(|v| v.id == "control")
                    .unwrap_or(false)
            })
            .count();
        assert!(control > 700 && control < 1300, "control {control}");

        experiment.variants[1].weight = 1e16;
        for i in 0..200 {
            assert!(resolve(&experiment, &format!("user-{i}"), &HashMap::new()).is_some());
        }
    }

    #[test]
    fn test_zero_weight_variant_never_assigned() {
        let mut experiment = active_experiment();
        experiment.variants[1].weight = 0.0;
        for i in 0..500 {
            let variant = resolve(&experiment, &format!("user-{i}"), &HashMap::new()).unwrap();
            assert_eq!(variant.id, "control");
        }
    }

    #[test]
    fn test_attributes_do_not_change_bucketing() {
        let experiment = active_experiment();
        let mut attributes = HashMap::new();
        attributes.insert("country".to_string(), serde_json::json!("US"));
        for i in 0..100 {
            let unit = format!("user-{i}");
            assert_eq!(
                resolve(&experiment, &unit, &HashMap::new()),
                resolve(&experiment, &unit, &attributes)
            );
        }
    }

    #[test]
    fn test_engine_lifecycle() {
        let engine = engine();
        let experiment = active_experiment().with_status(ExperimentStatus::Draft);
        engine.create_experiment(experiment).unwrap();

        let outcome = engine.assign("homepage-cta", "user-1", &HashMap::new()).unwrap();
        assert!(outcome.variant_id().is_none());

        engine.set_status("homepage-cta", ExperimentStatus::Active).unwrap();
        let outcome = engine.assign("homepage-cta", "user-1", &HashMap::new()).unwrap();
        assert!(outcome.variant_id().is_some());

        engine.set_status("homepage-cta", ExperimentStatus::Completed).unwrap();
        let err = engine.set_status("homepage-cta", ExperimentStatus::Active);
        assert!(matches!(err, Err(ExperimentError::Validation(_))));
    }

    #[test]
    fn test_create_rejects_invalid_definition() {
        let engine = engine();
        let experiment = Experiment::new("bad", "Bad", vec![]);
        assert!(matches!(
            engine.create_experiment(experiment),
            Err(ExperimentError::Validation(_))
        ));
        assert!(matches!(
            engine.assign("bad", "user-1", &HashMap::new()),
            Err(ExperimentError::NotFound { .. })
        ));
    }

    #[test]
    fn test_record_outcome_requires_known_variant() {
        let engine = engine();
        engine.create_experiment(active_experiment()).unwrap();

        engine
            .record_outcome("homepage-cta", "treatment", "user-1", 12.5, true, HashMap::new())
            .unwrap();
        let err = engine.record_outcome("homepage-cta", "ghost", "user-1", 1.0, true, HashMap::new());
        assert!(matches!(err, Err(ExperimentError::NotFound { .. })));

        let outcomes = engine.outcomes("homepage-cta", None).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].arm_id, "treatment");
    }

    #[test]
    fn test_record_outcome_rejects_non_finite_reward() {
        let engine = engine();
        engine.create_experiment(active_experiment()).unwrap();
        for reward in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = engine.record_outcome("homepage-cta", "control", "user-1", reward, true, HashMap::new());
            assert!(matches!(err, Err(ExperimentError::Validation(_))));
        }
        assert!(engine.outcomes("homepage-cta", None).unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_duplicate_id() {
        let engine = engine();
        engine.create_experiment(active_experiment()).unwrap();
        engine.set_status("homepage-cta", ExperimentStatus::Paused).unwrap();

        let err = engine.create_experiment(active_experiment());
        assert!(matches!(err, Err(ExperimentError::Validation(_))));
        assert_eq!(
            engine.get_experiment("homepage-cta").unwrap().status,
            ExperimentStatus::Paused
        );
    }

    proptest! {
        #[test]
        fn prop_resolve_is_deterministic(
            unit in "[a-zA-Z0-9_-]{1,32}",
            w1 in 0.1f64..10.0,
            w2 in 0.1f64..10.0,
            w3 in 0.1f64..10.0,
        ) {
            let experiment = Experiment::new(
                "exp",
                "Exp",
                vec![
                    Variant::new("a", "A", w1),
                    Variant::new("b", "B", w2),
                    Variant::new("c", "C", w3),
                ],
            )
            .with_status(ExperimentStatus::Active);
            let first = resolve(&experiment, &unit, &HashMap::new()).map(|v| v.id.clone());
            let second = resolve(&experiment, &unit, &HashMap::new()).map(|v| v.id.clone());
            prop_assert!(first.is_some());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_full_rollout_always_assigns(unit in "[a-z0-9]{1,24}") {
            let experiment = active_experiment().with_rollout(1.0);
            prop_assert!(resolve(&experiment, &unit, &HashMap::new()).is_some());
        }
    }
}
