//! Experiment reporting — descriptive statistics, significance tests, regret,
//! bandit/A-B analysis, and stop/continue recommendations.

pub mod advisor;
pub mod analysis;
pub mod statistics;

pub use advisor::{recommend, recommend_experiment, Confidence, Decision, Recommendation};
pub use analysis::{analyze_bandit, analyze_experiment, ArmAnalysis, BanditAnalysis, ExperimentReport};
pub use statistics::{compare_variants, regret, summarize, total_regret, MetricSummary, StatisticalTest};
