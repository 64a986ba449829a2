use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use mlua::{Function, HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Table, Value};

/// Instructions executed between two budget checks.
const HOOK_INTERVAL: u32 = 1000;

/// Instructions a single script entry point may run before it is cut off.
pub const DEFAULT_INSTRUCTION_BUDGET: u64 = 20_000_000;

/// Bytes a single Lua state may allocate.
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Base-library functions that reach outside the sandbox.
const BLOCKED_GLOBALS: [&str; 3] = ["dofile", "loadfile", "load"];

const BUDGET_EXCEEDED: &str = "script exceeded its instruction budget";
const STOPPED_BY_HOST: &str = "script stopped by host";

/// Resource caps applied to every Lua state that runs user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    pub instructions: u64,
    pub memory: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTION_BUDGET,
            memory: DEFAULT_MEMORY_LIMIT,
        }
    }
}

/// Creates a Lua state with only the side-effect free standard libraries.
pub(crate) fn new_sandbox(limits: ScriptLimits) -> mlua::Result<Lua> {
    let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE;
    let lua = Lua::new_with(libs, LuaOptions::default())?;
    {
        let globals = lua.globals();
        for name in BLOCKED_GLOBALS {
            globals.set(name, Value::Nil)?;
        }
    }
    lua.set_memory_limit(limits.memory)?;
    Ok(lua)
}

/// Creates a table whose lookups fall back to the globals, so user chunks
/// can define names without touching the shared global table.
pub(crate) fn new_environment(lua: &Lua) -> mlua::Result<Table<'_>> {
    let env = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__index", lua.globals())?;
    env.set_metatable(Some(meta));
    Ok(env)
}

/// Instruction budget shared by every entry point into user code.
///
/// The budget is re-armed before each call; the abort flag lets the host
/// interrupt a script from another thread. Once either fires the budget
/// stays tripped until the next `arm`, and protected calls re-raise instead
/// of swallowing the error.
#[derive(Debug, Clone)]
pub(crate) struct ScriptBudget {
    limit: u64,
    used: Arc<AtomicU64>,
    tripped: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl ScriptBudget {
    pub fn new(instructions: u64, abort: Arc<AtomicBool>) -> Self {
        Self {
            limit: (instructions / u64::from(HOOK_INTERVAL)).max(1),
            used: Arc::new(AtomicU64::new(0)),
            tripped: Arc::new(AtomicBool::new(false)),
            abort,
        }
    }

    /// Installs the instruction hook and the guarded `pcall`, `xpcall` and
    /// `coroutine.resume`.
    pub fn install(&self, lua: &Lua) -> mlua::Result<()> {
        let budget = self.clone();
        lua.set_hook(
            HookTriggers {
                every_nth_instruction: Some(HOOK_INTERVAL),
                ..Default::default()
            },
            move |_, _| {
                budget.check()?;
                let used = budget.used.fetch_add(1, Ordering::AcqRel) + 1;
                if used > budget.limit {
                    budget.tripped.store(true, Ordering::Release);
                    return Err(mlua::Error::RuntimeError(BUDGET_EXCEEDED.into()));
                }
                Ok(())
            },
        );

        let globals = lua.globals();
        self.guard(lua, &globals, "pcall")?;
        self.guard(lua, &globals, "xpcall")?;
        if let Value::Table(coroutine) = globals.get::<_, Value>("coroutine")? {
            self.guard(lua, &coroutine, "resume")?;
        }
        Ok(())
    }

    pub fn arm(&self) {
        self.used.store(0, Ordering::Release);
        self.tripped.store(false, Ordering::Release);
    }

    fn check(&self) -> mlua::Result<()> {
        if self.abort.load(Ordering::Acquire) {
            return Err(mlua::Error::RuntimeError(STOPPED_BY_HOST.into()));
        }
        if self.tripped.load(Ordering::Acquire) {
            return Err(mlua::Error::RuntimeError(BUDGET_EXCEEDED.into()));
        }
        Ok(())
    }

    /// Replaces `table[name]` with a call that re-raises once the budget has
    /// tripped. `coroutine.wrap` needs no guard since it rethrows errors.
    fn guard(&self, lua: &Lua, table: &Table, name: &str) -> mlua::Result<()> {
        let Value::Function(original) = table.get::<_, Value>(name)? else {
            return Ok(());
        };
        let original = lua.create_registry_value(original)?;
        let budget = self.clone();
        let guarded = lua.create_function(move |lua, args: MultiValue| {
            let original: Function = lua.registry_value(&original)?;
            let results = original.call::<_, MultiValue>(args)?;
            budget.check()?;
            Ok(results)
        })?;
        table.set(name, guarded)
    }
}
