use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::warn;
use mlua::{Function, Lua, MultiValue, RegistryKey, Table, Value};
use parking_lot::Mutex;

use crate::config::GameConfig;
use crate::world::World;

use super::bindings::{create_scene_instance, register_globals, ScriptContext};
use super::compiler::{SceneDefinition, SceneKind, ScriptSource, CHUNK_NAME};
use super::sandbox::{new_environment, new_sandbox, ScriptBudget, ScriptLimits};

/// Faults kept per instance; later ones are only counted.
const MAX_RECORDED_FAULTS: usize = 32;

/// Lifecycle step during which user code raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    Define,
    Preload,
    Create,
    Update,
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScriptPhase::Define => "define",
            ScriptPhase::Preload => "preload",
            ScriptPhase::Create => "create",
            ScriptPhase::Update => "update",
        })
    }
}

/// A user-script error that was caught and swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFault {
    pub phase: ScriptPhase,
    pub message: String,
}

impl fmt::Display for ScriptFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.phase, self.message)
    }
}

#[derive(Debug, Default)]
struct FaultLog {
    entries: Vec<ScriptFault>,
    dropped: usize,
}

/// Shared record of swallowed script errors.
#[derive(Debug, Clone, Default)]
pub struct ScriptFaults {
    log: Arc<Mutex<FaultLog>>,
}

impl ScriptFaults {
    pub fn record(&self, phase: ScriptPhase, message: impl Into<String>) {
        let mut log = self.log.lock();
        if log.entries.len() >= MAX_RECORDED_FAULTS {
            log.dropped += 1;
            return;
        }
        let fault = ScriptFault {
            phase,
            message: message.into(),
        };
        warn!("user script raised during {fault}");
        log.entries.push(fault);
    }

    pub fn snapshot(&self) -> Vec<ScriptFault> {
        self.log.lock().entries.clone()
    }

    /// Every fault seen, including the ones past the recording cap.
    pub fn total(&self) -> usize {
        let log = self.log.lock();
        log.entries.len() + log.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

enum SceneHooks {
    Named {
        preload: Option<RegistryKey>,
        create: Option<RegistryKey>,
        update: Option<RegistryKey>,
    },
    Wrapped(ScriptSource),
    Inert,
}

/// A scene definition instantiated inside its own sandboxed Lua state.
///
/// Every call into user code goes through this type and is contained here:
/// errors become [`ScriptFault`]s and never reach the caller.
pub(crate) struct SceneRuntime {
    lua: Lua,
    budget: ScriptBudget,
    instance: RegistryKey,
    hooks: SceneHooks,
    faults: ScriptFaults,
}

impl SceneRuntime {
    pub fn new(
        definition: SceneDefinition,
        world: World,
        config: &GameConfig,
        faults: ScriptFaults,
        abort: Arc<AtomicBool>,
        limits: ScriptLimits,
    ) -> mlua::Result<Self> {
        let lua = new_sandbox(limits)?;
        let budget = ScriptBudget::new(limits.instructions, abort);
        budget.install(&lua)?;
        register_globals(&lua)?;

        let (instance, hooks) = {
            let context = ScriptContext::new(world, config.clone());
            let instance = create_scene_instance(&lua, &context)?;
            let hooks = match definition.kind() {
                SceneKind::Named(export) => {
                    define_named(&lua, &budget, &faults, &definition, export, &instance)?
                }
                SceneKind::Wrapped => SceneHooks::Wrapped(definition.source().clone()),
                SceneKind::Inert => SceneHooks::Inert,
            };
            (lua.create_registry_value(instance)?, hooks)
        };

        Ok(Self {
            lua,
            budget,
            instance,
            hooks,
            faults,
        })
    }

    /// Runs the setup phase: `preload` then `create`.
    pub fn boot(&self) {
        match &self.hooks {
            SceneHooks::Named {
                preload, create, ..
            } => {
                self.invoke(ScriptPhase::Preload, preload.as_ref(), None);
                self.invoke(ScriptPhase::Create, create.as_ref(), None);
            }
            SceneHooks::Wrapped(source) => self.run_wrapped(source),
            SceneHooks::Inert => {}
        }
    }

    /// Runs one frame of the scene's `update(time, delta)`, in milliseconds.
    pub fn update(&self, time: f64, delta: f64) {
        if let SceneHooks::Named {
            update: Some(key), ..
        } = &self.hooks
        {
            self.invoke(ScriptPhase::Update, Some(key), Some((time, delta)));
        }
    }

    fn invoke(&self, phase: ScriptPhase, key: Option<&RegistryKey>, timing: Option<(f64, f64)>) {
        let Some(key) = key else {
            return;
        };
        let result = self.lua.registry_value::<Function>(key).and_then(|callback| {
            let instance: Table = self.lua.registry_value(&self.instance)?;
            self.budget.arm();
            match timing {
                Some((time, delta)) => callback.call::<_, ()>((instance, time, delta)),
                None => callback.call::<_, ()>(instance),
            }
        });
        if let Err(err) = result {
            self.faults.record(phase, err.to_string());
        }
    }

    fn run_wrapped(&self, source: &ScriptSource) {
        let result = (|| -> mlua::Result<()> {
            let env = new_environment(&self.lua)?;
            let instance: Table = self.lua.registry_value(&self.instance)?;
            env.set("self", instance)?;
            let chunk = self
                .lua
                .load(source.as_str())
                .set_name(CHUNK_NAME)
                .set_environment(env)
                .into_function()?;
            self.budget.arm();
            chunk.call::<_, ()>(())
        })();
        if let Err(err) = result {
            self.faults.record(ScriptPhase::Create, err.to_string());
        }
    }
}

/// Executes a named definition and links the instance to the scene table it
/// exports. Failures degrade to an inert scene.
fn define_named(
    lua: &Lua,
    budget: &ScriptBudget,
    faults: &ScriptFaults,
    definition: &SceneDefinition,
    export: &str,
    instance: &Table,
) -> mlua::Result<SceneHooks> {
    let env = new_environment(lua)?;
    let chunk = match lua
        .load(definition.source().as_str())
        .set_name(CHUNK_NAME)
        .set_environment(env.clone())
        .into_function()
    {
        Ok(chunk) => chunk,
        Err(err) => {
            faults.record(ScriptPhase::Define, err.to_string());
            return Ok(SceneHooks::Inert);
        }
    };

    budget.arm();
    let returned = match chunk.call::<_, MultiValue>(()) {
        Ok(values) => values.into_iter().next(),
        Err(err) => {
            faults.record(ScriptPhase::Define, err.to_string());
            None
        }
    };
    let class = match (env.raw_get::<_, Value>(export)?, returned) {
        (Value::Table(class), _) => class,
        (_, Some(Value::Table(class))) => class,
        _ => {
            faults.record(ScriptPhase::Define, format!("script did not define {export}"));
            return Ok(SceneHooks::Inert);
        }
    };

    let meta = lua.create_table()?;
    meta.set("__index", class.clone())?;
    instance.set_metatable(Some(meta));

    let lookup = |name: &str| -> mlua::Result<Option<RegistryKey>> {
        budget.arm();
        match class.get::<_, Value>(name) {
            Ok(Value::Function(callback)) => Ok(Some(lua.create_registry_value(callback)?)),
            Ok(_) => Ok(None),
            Err(err) => {
                faults.record(ScriptPhase::Define, err.to_string());
                Ok(None)
            }
        }
    };
    Ok(SceneHooks::Named {
        preload: lookup("preload")?,
        create: lookup("create")?,
        update: lookup("update")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::compiler::ScriptCompiler;

    fn instantiate(text: &str, world: &World, faults: &ScriptFaults) -> SceneRuntime {
        let definition = ScriptCompiler::new().compile(text);
        SceneRuntime::new(
            definition,
            world.clone(),
            &GameConfig::default(),
            faults.clone(),
            Arc::new(AtomicBool::new(false)),
            ScriptLimits::default(),
        )
        .unwrap()
    }

    #[test]
    fn named_scene_runs_preload_create_and_update() {
        let world = World::default();
        let faults = ScriptFaults::default();
        let runtime = instantiate(
            r#"
            MyScene = { speed = 2 }
            function MyScene:preload() self.loaded = true end
            function MyScene:create()
                assert(self.loaded)
                self.box = self.add:rectangle(0, 0, 10, 10)
            end
            function MyScene:update(time, delta)
                self.box.x = self.box.x + self.speed
            end
            "#,
            &world,
            &faults,
        );

        runtime.boot();
        runtime.update(16.0, 16.0);
        runtime.update(32.0, 16.0);

        assert!(faults.is_empty(), "{:?}", faults.snapshot());
        assert_eq!(world.all_objects()[0].position.x, 4.0);
    }

    #[test]
    fn wrapped_scene_binds_self_to_the_instance() {
        let world = World::default();
        let faults = ScriptFaults::default();
        let runtime = instantiate("self.add:circle(5, 5, 2, '#ff0000')", &world, &faults);

        runtime.boot();

        assert!(faults.is_empty());
        assert_eq!(world.all_objects()[0].color, 0xff0000);
    }

    #[test]
    fn throwing_callbacks_are_recorded_not_raised() {
        let world = World::default();
        let faults = ScriptFaults::default();
        let runtime = instantiate(
            r#"
            MyScene = {}
            function MyScene:create() error("create failed") end
            function MyScene:update() error("update failed") end
            "#,
            &world,
            &faults,
        );

        runtime.boot();
        runtime.update(0.0, 16.0);

        let recorded = faults.snapshot();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].phase, ScriptPhase::Create);
        assert!(recorded[0].message.contains("create failed"));
        assert_eq!(recorded[1].phase, ScriptPhase::Update);
    }

    #[test]
    fn wrapped_errors_are_swallowed() {
        let world = World::default();
        let faults = ScriptFaults::default();
        let runtime = instantiate("error('boom')", &world, &faults);

        runtime.boot();
        runtime.update(0.0, 16.0);

        let recorded = faults.snapshot();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].phase, ScriptPhase::Create);
        assert!(recorded[0].message.contains("boom"));
    }

    #[test]
    fn inert_scene_does_nothing() {
        let world = World::default();
        let faults = ScriptFaults::default();
        let runtime = instantiate("this is not lua", &world, &faults);

        runtime.boot();
        runtime.update(0.0, 16.0);

        assert!(world.is_empty());
        assert!(faults.is_empty());
    }

    #[test]
    fn fault_log_is_capped() {
        let faults = ScriptFaults::default();
        for index in 0..(MAX_RECORDED_FAULTS + 5) {
            faults.record(ScriptPhase::Update, format!("fault {index}"));
        }
        assert_eq!(faults.snapshot().len(), MAX_RECORDED_FAULTS);
        assert_eq!(faults.total(), MAX_RECORDED_FAULTS + 5);
        assert_eq!(faults.snapshot()[0].to_string(), "update: fault 0");
    }
}
