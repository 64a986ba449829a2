//! Game-preview sandbox for GameCrafter.
//!
//! User script text is compiled into a scene definition that never fails to
//! load, then run by an engine instance bound to a canvas target. The
//! session manager owns that instance and reports its lifecycle to
//! observers. Rendering is kept outside of the crate; the headless engine
//! simulates scenes so the whole pipeline can be exercised in tests and
//! tooling.

pub mod config;
pub mod engine;
pub mod error;
pub mod project;
pub mod scripting;
pub mod session;
pub mod world;

pub use config::GameConfig;
pub use engine::{
    CanvasBinding, CanvasHost, CanvasRegistry, Engine, EngineInstance, HeadlessEngine,
    HeadlessInstance,
};
pub use error::{EngineError, SessionError};
pub use project::Project;
pub use scripting::{SceneDefinition, SceneKind, ScriptCompiler, ScriptFault, ScriptSource};
pub use session::{GameSessionManager, SessionHandle, SessionState, SessionStatusEvent};
pub use world::{GameObject, ObjectKind, World};
