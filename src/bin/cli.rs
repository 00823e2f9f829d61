//! Handgrasp CLI - run scripted interaction scenarios and check configs

use clap::{Parser, Subcommand};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use rand::Rng;
use rapier3d::prelude::{ColliderBuilder, Isometry};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use handgrasp::config::InteractionConfig;
use handgrasp::interaction::math::pose_from_parts;
use handgrasp::interaction::{
    run_fixed_step, Chirality, InteractableSettings, InteractionEvent, InteractionManager,
    PhysicsWorld, RigidControllerSample, ScriptedTrackingProvider, TrackingFrame,
    TrackingProvider,
};

#[derive(Parser)]
#[command(name = "handgrasp")]
#[command(about = "Hand interaction engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted grab-and-throw with a rigid controller and print events
    Simulate {
        /// Number of fixed steps to run
        #[arg(long, default_value = "120")]
        steps: usize,
        /// Uniform tracking noise added to every position, in meters
        #[arg(long, default_value = "0.0")]
        jitter: f32,
        /// Interaction config file (defaults apply when omitted)
        #[arg(long, env = "HANDGRASP_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Validate an interaction config file
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },
}

/// One JSON line of `simulate` output.
#[derive(Serialize)]
struct EventLine<'a> {
    step: usize,
    time: f32,
    #[serde(flatten)]
    event: &'a InteractionEvent,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("handgrasp=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            steps,
            jitter,
            config,
        } => simulate(steps, jitter, config),
        Commands::CheckConfig { path } => check_config(path),
    }
}

fn load_config(path: Option<PathBuf>) -> InteractionConfig {
    match path {
        Some(path) => match InteractionConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => InteractionConfig::default(),
    }
}

fn check_config(path: PathBuf) {
    let config = load_config(Some(path.clone()));
    println!(
        "{} is valid (timestep {:.4}s, grasp entry {:.2})",
        path.display(),
        config.simulation.timestep,
        config.grasp.entry_strength
    );
}

/// Controller path: approach the ball, grip, swing up and out, let go.
fn scripted_frames(steps: usize, jitter: f32) -> Vec<TrackingFrame> {
    let mut rng = rand::thread_rng();
    let rest = Point3::new(0.084, 0.05, 0.0);
    let start = Point3::new(0.4, 0.05, 0.0);
    let approach = steps / 4;
    let hold = approach + steps / 8;
    let swing = hold + steps / 6;

    (0..steps)
        .map(|i| {
            let (position, grip) = if i < approach {
                let t = i as f32 / approach.max(1) as f32;
                (start + (rest - start) * t, 0.0)
            } else if i < hold {
                (rest, 1.0)
            } else if i < swing {
                let t = (i - hold) as f32 / (swing - hold).max(1) as f32;
                (rest + Vector3::new(0.3, 0.4, 0.0) * t, 1.0)
            } else {
                (rest + Vector3::new(0.3, 0.4, 0.0), 0.0)
            };
            let noise = if jitter > 0.0 {
                Vector3::new(
                    rng.gen_range(-jitter..=jitter),
                    rng.gen_range(-jitter..=jitter),
                    rng.gen_range(-jitter..=jitter),
                )
            } else {
                Vector3::zeros()
            };
            let pose = pose_from_parts(position + noise, UnitQuaternion::identity());
            TrackingFrame {
                hands: Vec::new(),
                controllers: vec![RigidControllerSample::new(Chirality::Right, pose, grip)],
            }
        })
        .collect()
}

fn simulate(steps: usize, jitter: f32, config: Option<PathBuf>) {
    let config = load_config(config);

    let mut world = PhysicsWorld::new();
    world.add_fixed_body(
        Isometry::translation(0.0, -0.05, 0.0),
        ColliderBuilder::cuboid(2.0, 0.05, 2.0).build(),
    );
    let ball = world.add_dynamic_body(
        Isometry::translation(0.0, 0.05, 0.0),
        ColliderBuilder::ball(0.05).density(500.0).build(),
    );

    let mut manager = InteractionManager::new(config);
    let object = manager.register_interactable(&mut world, ball, InteractableSettings::default());
    manager.add_rigid_controller(Chirality::Right);

    let mut provider = ScriptedTrackingProvider::new(scripted_frames(steps, jitter));
    let mut delivered = 0;
    for step in 0..steps {
        let frame = provider.current_frame();
        let time = manager.time() + config.simulation.timestep;
        for event in run_fixed_step(&mut manager, &mut world, &frame) {
            let line = EventLine {
                step,
                time,
                event: &event,
            };
            match serde_json::to_string(&line) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: failed to encode event: {}", e),
            }
            delivered += 1;
        }
    }

    let final_velocity = world.get_velocity(ball).unwrap_or_else(Vector3::zeros);
    info!(
        steps,
        events = delivered,
        object = %object,
        speed = final_velocity.norm(),
        "simulation finished"
    );
}
