//! Physics tutorial demo
//!
//! Headless walkthrough of the collision sector: builds one of several
//! scenes, steps it for a few simulated seconds and logs what happens.
//!
//! ```text
//! phystut [scene] [config.toml|config.ron]
//! ```
//!
//! Scenes: `boxes` (default), `rope`, `vehicle`, `portal`, `actor`.

mod scenes;

use sector_engine::config::{Config, EngineConfig};
use sector_engine::foundation::logging;

use scenes::{Scene, SceneError};

/// Frame length fed to `step_all`, in milliseconds
const FRAME_MS: f32 = 1000.0 / 60.0;

/// Simulated seconds per run
const RUN_SECONDS: f32 = 5.0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_with_level(log::LevelFilter::Info);

    let mut args = std::env::args().skip(1);
    let scene = args.next().unwrap_or_else(|| String::from("boxes"));
    let config = match args.next() {
        Some(path) => {
            log::info!("Loading engine config from {}", path);
            EngineConfig::load_from_file(&path)?
        }
        None => EngineConfig::default(),
    };

    println!("=== Physics Tutorial: {scene} ===");
    let mut scene = Scene::build(&scene, config)?;
    run(&mut scene)?;
    scene.report()?;
    Ok(())
}

fn run(scene: &mut Scene) -> Result<(), SceneError> {
    let frames = (RUN_SECONDS * 1000.0 / FRAME_MS).round() as usize;
    for frame in 0..frames {
        scene.drive(frame);
        scene.physics.step_all(FRAME_MS)?;
        if frame % 60 == 0 {
            scene.report()?;
        }
    }
    Ok(())
}
