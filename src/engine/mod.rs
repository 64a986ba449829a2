//! Engine backends that run compiled scenes on a canvas.

mod canvas;
mod headless;

pub use canvas::{CanvasBinding, CanvasHost, CanvasRegistry};
pub use headless::{HeadlessEngine, HeadlessInstance};

use crate::config::GameConfig;
use crate::error::EngineError;
use crate::scripting::SceneDefinition;

/// Factory for live engine instances.
pub trait Engine {
    type Instance: EngineInstance;

    /// Builds an instance bound to `config.canvas` running `scene`.
    ///
    /// Nothing stays bound to the canvas when this fails.
    fn create(
        &self,
        config: &GameConfig,
        scene: SceneDefinition,
    ) -> Result<Self::Instance, EngineError>;
}

/// A running engine instance with its own update loop.
pub trait EngineInstance {
    fn canvas(&self) -> &str;

    /// Suspends the update loop; the instance and its state are kept.
    fn pause(&mut self);

    fn resume(&mut self);

    fn is_paused(&self) -> bool;

    /// Releases every resource the instance owns. Idempotent; returns only
    /// once the canvas is free again.
    fn destroy(&mut self);
}
