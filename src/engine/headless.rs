use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};

use crate::config::GameConfig;
use crate::error::EngineError;
use crate::scripting::runtime::{SceneRuntime, ScriptFault, ScriptFaults};
use crate::scripting::{panic_message, SceneDefinition, ScriptLimits};
use crate::world::World;

use super::canvas::{CanvasBinding, CanvasHost};
use super::{Engine, EngineInstance};

/// Engine backend that simulates scenes without rendering them.
///
/// Each instance owns a world and a loop thread that steps physics and calls
/// the scene's `update` once per frame.
pub struct HeadlessEngine {
    host: Arc<dyn CanvasHost>,
    limits: ScriptLimits,
}

impl HeadlessEngine {
    pub fn new(host: impl CanvasHost + 'static) -> Self {
        Self {
            host: Arc::new(host),
            limits: ScriptLimits::default(),
        }
    }

    /// Caps the instructions a single scene callback may run.
    pub fn with_instruction_budget(mut self, instructions: u64) -> Self {
        self.limits.instructions = instructions;
        self
    }

    /// Caps the bytes each scene's Lua state may allocate.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.limits.memory = bytes;
        self
    }
}

fn validate(config: &GameConfig) -> Result<(), EngineError> {
    if config.width == 0 || config.height == 0 {
        return Err(EngineError::InvalidDimensions {
            width: config.width,
            height: config.height,
        });
    }
    if config.background_rgb().is_none() {
        return Err(EngineError::InvalidBackground(
            config.background_color.clone(),
        ));
    }
    if config.fps == 0 {
        return Err(EngineError::InvalidFrameRate);
    }
    Ok(())
}

impl Engine for HeadlessEngine {
    type Instance = HeadlessInstance;

    fn create(
        &self,
        config: &GameConfig,
        scene: SceneDefinition,
    ) -> Result<HeadlessInstance, EngineError> {
        validate(config)?;
        let binding = CanvasBinding::bind(Arc::clone(&self.host), &config.canvas)?;

        let world = World::from_config(config);
        let faults = ScriptFaults::default();
        let shared = Arc::new(LoopShared::default());
        let (boot_tx, boot_rx) = flume::bounded(1);

        let thread = {
            let world = world.clone();
            let faults = faults.clone();
            let shared = Arc::clone(&shared);
            let config = config.clone();
            let limits = self.limits;
            thread::Builder::new()
                .name(format!("scene-loop:{}", config.canvas))
                .spawn(move || {
                    run_scene_loop(scene, world, config, faults, shared, limits, boot_tx)
                })?
        };

        match boot_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = thread.join();
                return Err(EngineError::Boot(message));
            }
            Err(_) => {
                let message = match thread.join() {
                    Err(panic) => panic_message(panic),
                    Ok(()) => "scene loop exited before boot".to_string(),
                };
                return Err(EngineError::Boot(message));
            }
        }

        info!(
            "engine instance running on `{}` ({}x{})",
            config.canvas, config.width, config.height
        );
        Ok(HeadlessInstance {
            canvas: config.canvas.clone(),
            world,
            faults,
            shared,
            thread: Some(thread),
            binding: Some(binding),
        })
    }
}

#[derive(Debug)]
struct LoopControl {
    running: bool,
    paused: bool,
}

#[derive(Debug)]
struct LoopShared {
    control: Mutex<LoopControl>,
    wake: Condvar,
    abort: Arc<AtomicBool>,
    frames: AtomicU64,
}

impl Default for LoopShared {
    fn default() -> Self {
        Self {
            control: Mutex::new(LoopControl {
                running: true,
                paused: false,
            }),
            wake: Condvar::new(),
            abort: Arc::new(AtomicBool::new(false)),
            frames: AtomicU64::new(0),
        }
    }
}

/// Boots the scene, then ticks it until the instance is destroyed.
///
/// Frames run while holding the control lock, so `pause` and `destroy`
/// never return with a frame in flight.
fn run_scene_loop(
    scene: SceneDefinition,
    world: World,
    config: GameConfig,
    faults: ScriptFaults,
    shared: Arc<LoopShared>,
    limits: ScriptLimits,
    boot_tx: flume::Sender<Result<(), String>>,
) {
    let runtime = match SceneRuntime::new(
        scene,
        world.clone(),
        &config,
        faults,
        Arc::clone(&shared.abort),
        limits,
    ) {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = boot_tx.send(Err(err.to_string()));
            return;
        }
    };
    runtime.boot();
    let _ = boot_tx.send(Ok(()));
    drop(boot_tx);

    let interval = config.frame_interval();
    let started = Instant::now();
    let mut last = started;
    let mut control = shared.control.lock();
    loop {
        if !control.running {
            break;
        }
        if control.paused {
            shared.wake.wait(&mut control);
            last = Instant::now();
            continue;
        }
        shared.wake.wait_for(&mut control, interval);
        if !control.running || control.paused {
            continue;
        }
        let now = Instant::now();
        let delta = now.duration_since(last);
        last = now;
        world.step(delta.as_secs_f32());
        runtime.update(
            now.duration_since(started).as_secs_f64() * 1000.0,
            delta.as_secs_f64() * 1000.0,
        );
        shared.frames.fetch_add(1, Ordering::AcqRel);
    }
    debug!("scene loop on `{}` stopped", config.canvas);
}

/// Live instance created by [`HeadlessEngine`].
pub struct HeadlessInstance {
    canvas: String,
    world: World,
    faults: ScriptFaults,
    shared: Arc<LoopShared>,
    thread: Option<JoinHandle<()>>,
    binding: Option<CanvasBinding>,
}

impl HeadlessInstance {
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Script errors swallowed so far.
    pub fn faults(&self) -> Vec<ScriptFault> {
        self.faults.snapshot()
    }

    /// Every script error seen, including ones too many to keep.
    pub fn fault_count(&self) -> usize {
        self.faults.total()
    }

    /// Frames the update loop has completed.
    pub fn frames(&self) -> u64 {
        self.shared.frames.load(Ordering::Acquire)
    }

    pub fn is_live(&self) -> bool {
        self.thread.is_some()
    }
}

impl EngineInstance for HeadlessInstance {
    fn canvas(&self) -> &str {
        &self.canvas
    }

    fn pause(&mut self) {
        let mut control = self.shared.control.lock();
        if control.running {
            control.paused = true;
        }
    }

    fn resume(&mut self) {
        {
            let mut control = self.shared.control.lock();
            control.paused = false;
        }
        self.shared.wake.notify_all();
    }

    fn is_paused(&self) -> bool {
        self.shared.control.lock().paused
    }

    fn destroy(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shared.abort.store(true, Ordering::Release);
        {
            let mut control = self.shared.control.lock();
            control.running = false;
            control.paused = false;
        }
        self.shared.wake.notify_all();
        if let Err(panic) = thread.join() {
            error!(
                "scene loop on `{}` panicked: {}",
                self.canvas,
                panic_message(panic)
            );
        }
        self.binding.take();
        info!("engine instance on `{}` destroyed", self.canvas);
    }
}

impl Drop for HeadlessInstance {
    fn drop(&mut self) {
        self.destroy();
    }
}
