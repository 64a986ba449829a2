use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::EngineError;

/// Host surface that engine instances bind to for rendering.
pub trait CanvasHost: Send + Sync {
    /// Claims `target` for one instance.
    fn bind(&self, target: &str) -> Result<(), EngineError>;

    /// Returns `target` to the pool of free surfaces.
    fn release(&self, target: &str);
}

impl<T> CanvasHost for Arc<T>
where
    T: CanvasHost + ?Sized,
{
    fn bind(&self, target: &str) -> Result<(), EngineError> {
        (**self).bind(target)
    }

    fn release(&self, target: &str) {
        (**self).release(target)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    known: Option<HashSet<String>>,
    bound: HashSet<String>,
    binds: usize,
    releases: usize,
}

/// In-process canvas host that enforces one binding per target.
#[derive(Debug, Default)]
pub struct CanvasRegistry {
    state: Mutex<RegistryState>,
}

impl CanvasRegistry {
    /// Accepts any non-empty target.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts only the listed targets, like a page with fixed canvas elements.
    pub fn with_targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(RegistryState {
                known: Some(targets.into_iter().map(Into::into).collect()),
                ..RegistryState::default()
            }),
        }
    }

    pub fn is_bound(&self, target: &str) -> bool {
        self.state.lock().bound.contains(target)
    }

    pub fn live_bindings(&self) -> usize {
        self.state.lock().bound.len()
    }

    pub fn bind_count(&self) -> usize {
        self.state.lock().binds
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().releases
    }
}

impl CanvasHost for CanvasRegistry {
    fn bind(&self, target: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if target.trim().is_empty() {
            return Err(EngineError::UnknownCanvas(target.to_string()));
        }
        if let Some(known) = &state.known {
            if !known.contains(target) {
                return Err(EngineError::UnknownCanvas(target.to_string()));
            }
        }
        if !state.bound.insert(target.to_string()) {
            return Err(EngineError::CanvasInUse(target.to_string()));
        }
        state.binds += 1;
        Ok(())
    }

    fn release(&self, target: &str) {
        let mut state = self.state.lock();
        if state.bound.remove(target) {
            state.releases += 1;
        } else {
            warn!("released canvas `{target}` that was not bound");
        }
    }
}

/// Claim on a canvas target; releases it when dropped.
pub struct CanvasBinding {
    host: Arc<dyn CanvasHost>,
    target: String,
}

impl CanvasBinding {
    pub fn bind(host: Arc<dyn CanvasHost>, target: &str) -> Result<Self, EngineError> {
        host.bind(target)?;
        debug!("bound canvas `{target}`");
        Ok(Self {
            host,
            target: target.to_string(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Debug for CanvasBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanvasBinding")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Drop for CanvasBinding {
    fn drop(&mut self) {
        self.host.release(&self.target);
        debug!("released canvas `{}`", self.target);
    }
}
