//! Script compilation and the sandbox user code runs in.

use std::any::Any;

mod bindings;
pub mod compiler;
pub mod runtime;
pub(crate) mod sandbox;

pub use compiler::{SceneDefinition, SceneKind, ScriptCompiler, ScriptSource, SCENE_EXPORT};
pub use runtime::{ScriptFault, ScriptFaults, ScriptPhase};
pub use sandbox::{ScriptLimits, DEFAULT_INSTRUCTION_BUDGET, DEFAULT_MEMORY_LIMIT};

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}
