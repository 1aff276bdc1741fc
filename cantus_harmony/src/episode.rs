// Episode driver.
//
// `run_episode` plays one full episode: reset, then ask the policy for an
// action and step until the environment reports done. The driver is the
// only place that decides to stop; there is no early termination.
//
// `run_parallel` runs independent episodes on the rayon pool. Each worker
// builds its own environment (and with it its own model session, grid and
// mask) from a seed, so nothing mutable is shared between episodes.

use crate::env::HarmonizationEnv;
use crate::error::Result;
use crate::grid::Note;
use crate::policy::Policy;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeSummary {
    pub policy: String,
    pub steps: usize,
    pub total_reward: f64,
    pub mean_reward: f64,
    /// Model steps that fell back to contrary-motion rules.
    pub fallbacks: usize,
    pub clamped: usize,
    pub constraint_violations: usize,
    pub notes: Vec<Note>,
}

/// Play one episode from a fresh reset.
pub fn run_episode(env: &mut HarmonizationEnv, policy: &mut dyn Policy) -> Result<EpisodeSummary> {
    let mut obs = env.reset();
    let mut clamped = 0;
    let mut constraint_violations = 0;
    loop {
        let action = policy.act(env, &obs)?;
        let result = env.step(action)?;
        clamped += result.info.clamped;
        constraint_violations += result.info.constraint_violations;
        obs = result.observation;
        if result.done {
            break;
        }
    }

    let steps = env.current_step();
    let total_reward = env.total_reward();
    let summary = EpisodeSummary {
        policy: policy.name().to_string(),
        steps,
        total_reward,
        mean_reward: total_reward / steps as f64,
        fallbacks: env.fallback_count(),
        clamped,
        constraint_violations,
        notes: env.final_sequence()?,
    };
    info!(
        policy = %summary.policy,
        steps,
        total_reward,
        mean_reward = summary.mean_reward,
        "episode complete"
    );
    Ok(summary)
}

/// Run one episode per seed in parallel. Results keep the order of `seeds`.
pub fn run_parallel<F>(seeds: &[u64], build: F) -> Vec<Result<EpisodeSummary>>
where
    F: Fn(u64) -> Result<(HarmonizationEnv, Box<dyn Policy + Send>)> + Sync + Send,
{
    seeds
        .par_iter()
        .map(|&seed| {
            let (mut env, mut policy) = build(seed)?;
            run_episode(&mut env, policy.as_mut())
        })
        .collect()
}
