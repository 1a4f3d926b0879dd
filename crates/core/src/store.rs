//! Store interfaces the engines depend on, plus in-memory implementations.
//!
//! Engines accept `Arc<dyn DefinitionStore>` / `Arc<dyn OutcomeStore>` and never
//! reach for a concrete backend. Bandit state is handed out as a
//! [`BanditHandle`]: one exclusive lock per experiment through which every
//! counter mutation is funnelled.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::error::{ExperimentError, ExperimentResult};
use crate::types::{Arm, BanditExperiment, Experiment, OutcomeEvent, TimeRange};

/// Shared, lock-guarded state of one bandit experiment.
pub type BanditHandle = Arc<Mutex<BanditExperiment>>;

/// Lookup and persistence of experiment definitions.
pub trait DefinitionStore: Send + Sync {
    fn get_experiment(&self, id: &str) -> ExperimentResult<Experiment>;

    /// Store a new definition. Fails if the id is already taken.
    fn insert_experiment(&self, experiment: Experiment) -> ExperimentResult<()>;

    /// Replace an existing definition.
    fn put_experiment(&self, experiment: Experiment) -> ExperimentResult<()>;

    /// The authoritative in-process handle for a bandit experiment.
    fn get_bandit(&self, id: &str) -> ExperimentResult<BanditHandle>;

    /// Register a new bandit. Fails if the id is already taken, so live
    /// handles are never replaced.
    fn put_bandit(&self, bandit: BanditExperiment) -> ExperimentResult<BanditHandle>;

    /// Persist an arm after a mutation. Callers treat this as fire-and-forget.
    fn save_arm_update(&self, experiment_id: &str, arm: &Arm) -> ExperimentResult<()>;
}

/// Append-only log of outcome events.
pub trait OutcomeStore: Send + Sync {
    fn append_outcome(&self, event: OutcomeEvent) -> ExperimentResult<()>;

    /// A copy of the matching outcomes, oldest first.
    fn list_outcomes(
        &self,
        experiment_id: &str,
        range: Option<TimeRange>,
    ) -> ExperimentResult<Vec<OutcomeEvent>>;
}

// ─── In-memory definition store ─────────────────────────────────────────

#[derive(Default)]
pub struct MemoryDefinitionStore {
    experiments: DashMap<String, Experiment>,
    bandits: DashMap<String, BanditHandle>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    pub fn bandit_count(&self) -> usize {
        self.bandits.len()
    }
}

impl DefinitionStore for MemoryDefinitionStore {
    fn get_experiment(&self, id: &str) -> ExperimentResult<Experiment> {
        self.experiments
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| ExperimentError::experiment_not_found(id))
    }

    fn insert_experiment(&self, experiment: Experiment) -> ExperimentResult<()> {
        match self.experiments.entry(experiment.id.clone()) {
            Entry::Occupied(_) => Err(ExperimentError::already_exists("Experiment", &experiment.id)),
            Entry::Vacant(slot) => {
                slot.insert(experiment);
                Ok(())
            }
        }
    }

    fn put_experiment(&self, experiment: Experiment) -> ExperimentResult<()> {
        match self.experiments.get_mut(&experiment.id) {
            Some(mut current) => {
                *current = experiment;
                Ok(())
            }
            None => Err(ExperimentError::experiment_not_found(&experiment.id)),
        }
    }

    fn get_bandit(&self, id: &str) -> ExperimentResult<BanditHandle> {
        self.bandits
            .get(id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| ExperimentError::bandit_not_found(id))
    }

    fn put_bandit(&self, bandit: BanditExperiment) -> ExperimentResult<BanditHandle> {
        match self.bandits.entry(bandit.id.clone()) {
            Entry::Occupied(_) => Err(ExperimentError::already_exists("Bandit experiment", &bandit.id)),
            Entry::Vacant(slot) => {
                let handle = Arc::new(Mutex::new(bandit));
                slot.insert(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    fn save_arm_update(&self, experiment_id: &str, _arm: &Arm) -> ExperimentResult<()> {
        // The handle already is the stored state; only confirm it exists.
        if self.bandits.contains_key(experiment_id) {
            Ok(())
        } else {
            Err(ExperimentError::bandit_not_found(experiment_id))
        }
    }
}

// ─── In-memory outcome store ────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryOutcomeStore {
    events: RwLock<Vec<OutcomeEvent>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl OutcomeStore for MemoryOutcomeStore {
    fn append_outcome(&self, event: OutcomeEvent) -> ExperimentResult<()> {
        self.events.write().push(event);
        Ok(())
    }

    fn list_outcomes(
        &self,
        experiment_id: &str,
        range: Option<TimeRange>,
    ) -> ExperimentResult<Vec<OutcomeEvent>> {
        let events = self.events.read();
        Ok(events
            .iter()
            .filter(|e| e.experiment_id == experiment_id)
            .filter(|e| range.map_or(true, |r| r.contains(&e.timestamp)))
            .cloned()
            .collect())
    }
}
