//! Turns user-authored script text into scene definitions.
//!
//! The compiler never fails: malformed text degrades to an inert scene so
//! the session manager always has something to hand the engine.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, warn};
use mlua::{MultiValue, Value};

use super::panic_message;
use super::sandbox::{new_environment, new_sandbox, ScriptBudget, ScriptLimits};

/// Global a script assigns to declare a scene type.
pub const SCENE_EXPORT: &str = "MyScene";

/// Name user chunks carry in Lua error messages.
pub(crate) const CHUNK_NAME: &str = "=user-script";

/// Script text as authored in the editor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptSource(Arc<str>);

impl ScriptSource {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ScriptSource {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for ScriptSource {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl AsRef<str> for ScriptSource {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// How a definition turns into a running scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneKind {
    /// The script declared a scene table under the given export name.
    Named(String),
    /// Loose statements, run as the create phase of a synthetic scene.
    Wrapped,
    /// Compilation failed; the scene does nothing.
    Inert,
}

impl fmt::Display for SceneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneKind::Named(export) => write!(f, "named ({export})"),
            SceneKind::Wrapped => f.write_str("wrapped"),
            SceneKind::Inert => f.write_str("inert"),
        }
    }
}

/// Compiled unit derived from exactly one script snapshot.
#[derive(Debug)]
pub struct SceneDefinition {
    source: ScriptSource,
    kind: SceneKind,
    failure: Option<String>,
}

impl SceneDefinition {
    /// An empty scene that does nothing on setup.
    pub fn inert(source: ScriptSource, reason: impl Into<String>) -> Self {
        Self {
            source,
            kind: SceneKind::Inert,
            failure: Some(reason.into()),
        }
    }

    pub fn kind(&self) -> &SceneKind {
        &self.kind
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    /// Why compilation degraded to an inert scene.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_inert(&self) -> bool {
        self.kind == SceneKind::Inert
    }
}

/// Compiles script text by probing it in a throwaway sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptCompiler {
    limits: ScriptLimits,
}

impl ScriptCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the instructions the probe may run before it is abandoned.
    pub fn with_instruction_budget(mut self, instructions: u64) -> Self {
        self.limits.instructions = instructions;
        self
    }

    /// Caps the bytes the probe's Lua state may allocate.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.limits.memory = bytes;
        self
    }

    pub fn compile(&self, source: impl Into<ScriptSource>) -> SceneDefinition {
        let source = source.into();
        match panic::catch_unwind(AssertUnwindSafe(|| self.probe(&source))) {
            Ok(Ok(kind)) => {
                debug!("compiled script into {kind} scene");
                SceneDefinition {
                    source,
                    kind,
                    failure: None,
                }
            }
            Ok(Err(err)) => {
                warn!("script failed to compile, using an inert scene: {err}");
                SceneDefinition::inert(source, err.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic);
                warn!("script compiler panicked, using an inert scene: {message}");
                SceneDefinition::inert(source, message)
            }
        }
    }

    fn probe(&self, source: &ScriptSource) -> mlua::Result<SceneKind> {
        let lua = new_sandbox(self.limits)?;
        let budget = ScriptBudget::new(self.limits.instructions, Arc::new(AtomicBool::new(false)));
        budget.install(&lua)?;

        let env = new_environment(&lua)?;
        let chunk = lua
            .load(source.as_str())
            .set_name(CHUNK_NAME)
            .set_environment(env.clone())
            .into_function()?;

        budget.arm();
        let outcome = chunk.call::<_, MultiValue>(());
        let returned = match &outcome {
            Ok(values) => matches!(values.iter().next(), Some(Value::Table(_))),
            Err(_) => false,
        };
        let defined = matches!(env.raw_get::<_, Value>(SCENE_EXPORT)?, Value::Table(_));

        if let Err(err) = &outcome {
            if defined {
                warn!("script raised after defining {SCENE_EXPORT}: {err}");
            } else {
                debug!("treating script as loose statements: {err}");
            }
        }

        if defined || returned {
            Ok(SceneKind::Named(SCENE_EXPORT.to_string()))
        } else {
            Ok(SceneKind::Wrapped)
        }
    }
}
