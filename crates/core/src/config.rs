use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `EXPERIMENT_ENGINE__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub bandit: BanditSettings,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Defaults applied to bandit experiments created without explicit parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct BanditSettings {
    #[serde(default = "default_epsilon")]
    pub default_epsilon: f64,
    #[serde(default = "default_ucb_confidence")]
    pub default_ucb_confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_z_score")]
    pub z_score: f64,
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,
    #[serde(default = "default_power")]
    pub power: f64,
}

/// Stop/continue thresholds for the decision advisor.
#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorConfig {
    #[serde(default = "default_min_total_pulls")]
    pub min_total_pulls: u64,
    #[serde(default = "default_min_winner_pulls")]
    pub min_winner_pulls: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_epsilon() -> f64 {
    0.1
}
fn default_ucb_confidence() -> f64 {
    std::f64::consts::SQRT_2
}
fn default_z_score() -> f64 {
    1.96
}
fn default_significance_level() -> f64 {
    0.05
}
fn default_power() -> f64 {
    0.8
}
fn default_min_total_pulls() -> u64 {
    100
}
fn default_min_winner_pulls() -> u64 {
    50
}
fn default_rounds() -> usize {
    200
}
fn default_workers() -> usize {
    4
}
fn default_seed() -> u64 {
    42
}

impl Default for BanditSettings {
    fn default() -> Self {
        Self {
            default_epsilon: default_epsilon(),
            default_ucb_confidence: default_ucb_confidence(),
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            z_score: default_z_score(),
            significance_level: default_significance_level(),
            power: default_power(),
        }
    }
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            min_total_pulls: default_min_total_pulls(),
            min_winner_pulls: default_min_winner_pulls(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            workers: default_workers(),
            seed: default_seed(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            bandit: BanditSettings::default(),
            statistics: StatisticsConfig::default(),
            advisor: AdvisorConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("EXPERIMENT_ENGINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.advisor.min_total_pulls, 100);
        assert_eq!(config.advisor.min_winner_pulls, 50);
        assert!((config.bandit.default_epsilon - 0.1).abs() < f64::EPSILON);
        assert!((config.statistics.z_score - 1.96).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_section_uses_field_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"advisor": {"min_total_pulls": 500}}"#).unwrap();
        assert_eq!(config.advisor.min_total_pulls, 500);
        assert_eq!(config.advisor.min_winner_pulls, 50);
        assert_eq!(config.simulation.rounds, 200);
    }
}
