//! Multi-armed bandit engine — Epsilon-Greedy, UCB1, Thompson Sampling and its
//! Bayesian alias — with per-experiment serialized reward recording.

pub mod bandits;
pub mod sampling;

pub use bandits::{select_arm, BanditEngine};
