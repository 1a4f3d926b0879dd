use thiserror::Error;

pub type ExperimentResult<T> = Result<T, ExperimentError>;

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Arm {arm_id} not found in bandit experiment {experiment_id}")]
    ArmNotFound { experiment_id: String, arm_id: String },

    #[error("Experiment is not active: {0}")]
    InactiveExperiment(String),

    #[error("Unsupported bandit algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ExperimentError {
    pub fn experiment_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Experiment",
            id: id.into(),
        }
    }

    pub fn bandit_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Bandit experiment",
            id: id.into(),
        }
    }

    pub fn already_exists(kind: &str, id: &str) -> Self {
        Self::Validation(format!("{kind} already exists: {id}"))
    }

    pub fn variant_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Variant",
            id: id.into(),
        }
    }
}

impl From<config::ConfigError> for ExperimentError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
