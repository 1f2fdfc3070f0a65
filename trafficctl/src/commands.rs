// Command implementations for trafficctl

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use ndarray::Array1;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

use traffic_rl_agent::qnet;
use traffic_rl_agent::{DQNAgent, DQNConfig};
use traffic_rl_core::Environment;
use traffic_rl_env::{ScriptedSimulator, TrafficEnv, TrafficEnvConfig};

use crate::Cli;

/// Run the training loop; `dry_run` swaps in a short scripted episode
/// and never persists anything.
pub async fn train(cli: &Cli, dry_run: bool) -> Result<()> {
    let spec = qnet::stack(&cli.arch)?;
    if spec.image_shape.is_some() {
        bail!(
            "stack '{}' consumes image observations and cannot train \
             against the feature-vector environment",
            cli.arch
        );
    }
    if !cli.images.is_empty() {
        bail!(
            "stack '{}' trains on feature vectors and cannot be evaluated \
             on image observations, use eval mode with a pix stack",
            cli.arch
        );
    }

    let mut env_config = TrafficEnvConfig::default();
    if dry_run {
        env_config.max_steps = 20;
    }
    if spec.input_dim != env_config.feature_len() {
        bail!(
            "stack '{}' expects {} input features but the environment emits {}",
            cli.arch,
            spec.input_dim,
            env_config.feature_len()
        );
    }

    let mut agent = DQNAgent::new(spec, DQNConfig::default());
    if cli.load_nets {
        agent
            .load(&cli.model_dir)
            .await
            .context("failed to load saved networks")?;
    }

    // Ctrl+C requests a stop; the loop honors it at the next boundary.
    let stop = agent.session().stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested, finishing the current step");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let simulator = ScriptedSimulator::for_intersection(&env_config);
    let mut env = TrafficEnv::new(simulator, env_config)?;

    let checkpoint_dir = (cli.save && !dry_run).then(|| cli.model_dir.as_path());

    info!(arch = %cli.arch, episodes = cli.episodes, dry_run, "starting training");
    agent.train(&mut env, cli.episodes, checkpoint_dir).await?;
    env.close().await?;
    info!("finished training");

    print_summary(&agent);

    Ok(())
}

/// Load saved networks and run them over observation images.
pub async fn eval(cli: &Cli) -> Result<()> {
    if cli.images.is_empty() {
        bail!("eval mode needs at least one --images path");
    }

    let spec = qnet::stack(&cli.arch)?;
    let mut agent = DQNAgent::new(spec, DQNConfig::default());
    agent
        .load(&cli.model_dir)
        .await
        .context("failed to load saved networks")?;

    evaluate_images(&agent, &cli.images)
}

/// Greedy rollout with saved networks: no exploration, no learning.
pub async fn demo(cli: &Cli) -> Result<()> {
    let spec = qnet::stack(&cli.arch)?;
    if spec.image_shape.is_some() {
        bail!("stack '{}' cannot run against the feature-vector environment", cli.arch);
    }

    let mut agent = DQNAgent::new(spec, DQNConfig::default());
    agent
        .load(&cli.model_dir)
        .await
        .context("failed to load saved networks")?;

    let env_config = TrafficEnvConfig::default();
    let simulator = ScriptedSimulator::for_intersection(&env_config);
    let mut env = TrafficEnv::new(simulator, env_config)?;

    let durations = agent.run_greedy(&mut env, cli.episodes).await?;
    env.close().await?;

    for (i, steps) in durations.iter().enumerate() {
        println!("Episode {i}: {steps} steps");
    }

    Ok(())
}

fn print_summary(agent: &DQNAgent) {
    let session = agent.session();
    let summary = json!({
        "episodes": session.episodes.len(),
        "steps_done": session.steps_done,
        "epsilon": agent.epsilon(),
        "episode_durations": session.episode_durations,
        "episode_rewards": session
            .episodes
            .iter()
            .map(|e| e.total_reward)
            .collect::<Vec<_>>(),
    });
    println!("{summary:#}");
}

/// Run each image through the policy network and print its action
/// values. Unreadable images are skipped with a warning; the run
/// continues.
fn evaluate_images(agent: &DQNAgent, paths: &[PathBuf]) -> Result<()> {
    let spec = agent.policy_net().spec();
    let Some((height, width, _)) = spec.image_shape else {
        bail!(
            "stack '{}' does not consume image observations, use a pix stack",
            spec.name
        );
    };

    for path in collect_image_paths(paths)? {
        let image = match image::open(&path) {
            Ok(image) => image,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable image");
                continue;
            }
        };

        let rgb = image
            .resize_exact(width as u32, height as u32, FilterType::Triangle)
            .to_rgb8();
        let state = Array1::from(
            rgb.into_raw()
                .into_iter()
                .map(|v| f32::from(v) / 255.0)
                .collect::<Vec<f32>>(),
        );

        let (values, action) = agent.evaluate(&state);
        println!("Action values for {}: {:?}", path.display(), values.to_vec());
        println!("Chosen phase index: {action}");
    }

    Ok(())
}

/// Expand directory arguments into the image files they contain.
fn collect_image_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("failed to read directory {}", path.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mode;

    #[tokio::test]
    async fn train_rejects_image_paths_for_feature_stacks() {
        let cli = Cli {
            mode: Mode::DryRun,
            arch: "v1".to_string(),
            load_nets: false,
            save: false,
            episodes: 1,
            images: vec![PathBuf::from("observation.png")],
            model_dir: PathBuf::from("models"),
        };

        let err = train(&cli, true).await.unwrap_err();
        assert!(err.to_string().contains("feature vectors"));
    }

    #[test]
    fn feature_stacks_match_the_default_environment() {
        let config = TrafficEnvConfig::default();
        for name in ["v1", "v2", "v3"] {
            let spec = qnet::stack(name).unwrap();
            assert_eq!(spec.input_dim, config.feature_len());
            assert_eq!(spec.n_actions, config.phases.len());
        }
    }

    #[test]
    fn collect_image_paths_passes_files_through() {
        let paths = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        assert_eq!(collect_image_paths(&paths).unwrap(), paths);
    }
}
