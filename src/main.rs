use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use gamecrafter_sandbox::config::format_hex_color;
use gamecrafter_sandbox::{
    CanvasRegistry, GameSessionManager, HeadlessEngine, HeadlessInstance, Project,
};

const DEFAULT_RUN_MS: u64 = 250;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let mut project = Project::load(&options.path)
        .with_context(|| format!("failed to load project {}", options.path))?;
    if options.debug {
        project.config.debug = true;
    }
    println!("Loaded project \"{}\"", project.name);
    if let Some(description) = &project.description {
        println!("{description}");
    }

    let registry = Arc::new(CanvasRegistry::with_targets([project.config.canvas.clone()]));
    let mut manager = GameSessionManager::new(HeadlessEngine::new(Arc::clone(&registry)));
    let status = manager.subscribe();

    let handle = manager
        .initialize(project.config.clone(), project.source.clone())
        .context("failed to start game session")?;
    println!("Scene: {}", handle.scene());

    thread::sleep(Duration::from_millis(options.run_ms));
    manager.pause();
    if let Some(instance) = manager.instance() {
        print_final_state(instance);
    }
    manager.destroy();

    for event in status.try_iter() {
        println!("Status: {event}");
    }
    println!("Live canvas bindings: {}", registry.live_bindings());
    Ok(())
}

fn print_final_state(instance: &HeadlessInstance) {
    let bounds = instance.world().bounds();
    println!("World bounds: {}x{}", bounds.x, bounds.y);
    println!("Final object states:");
    for object in instance.world().all_objects() {
        println!(
            " - #{} {} pos=({:.2}, {:.2}) size=({}, {}) color={}",
            object.id,
            object.kind.as_str(),
            object.position.x,
            object.position.y,
            object.size.x,
            object.size.y,
            format_hex_color(object.color)
        );
    }
    println!("Script faults: {}", instance.fault_count());
    for fault in instance.faults() {
        println!(" ! {fault}");
    }
}

struct CliOptions {
    path: String,
    run_ms: u64,
    debug: bool,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        let mut args = env::args().skip(1);
        let Some(path) = args.next() else {
            return Err(anyhow!(
                "Usage: gamecrafter-sandbox <script.lua|project.xml> [--run-ms N] [--debug]"
            ));
        };
        let mut run_ms = DEFAULT_RUN_MS;
        let mut debug = false;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--run-ms" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--run-ms expects a number of milliseconds"))?;
                    run_ms = value
                        .parse()
                        .with_context(|| format!("invalid --run-ms value `{value}`"))?;
                }
                "--debug" => debug = true,
                other => {
                    return Err(anyhow!(
                        "Unknown argument: {other}. Expected --run-ms N or --debug"
                    ));
                }
            }
        }
        Ok(Self {
            path,
            run_ms,
            debug,
        })
    }
}
