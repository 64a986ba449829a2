//! Lifecycle of the game session behind one preview canvas.

use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::GameConfig;
use crate::engine::{Engine, EngineInstance};
use crate::error::SessionError;
use crate::scripting::{SceneKind, ScriptCompiler, ScriptSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Running,
    Paused,
    Destroyed,
}

/// Lifecycle notification published to every subscriber, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatusEvent {
    Initialized,
    Paused,
    Resumed,
    Destroyed,
}

impl fmt::Display for SessionStatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatusEvent::Initialized => "initialized",
            SessionStatusEvent::Paused => "paused",
            SessionStatusEvent::Resumed => "resumed",
            SessionStatusEvent::Destroyed => "destroyed",
        })
    }
}

/// Identifies one successful `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    id: u64,
    canvas: String,
    scene: SceneKind,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn canvas(&self) -> &str {
        &self.canvas
    }

    pub fn scene(&self) -> &SceneKind {
        &self.scene
    }
}

struct ActiveSession<I> {
    handle: SessionHandle,
    config: GameConfig,
    instance: I,
}

/// Owns at most one live engine instance and drives it through
/// initialize, pause, resume, reset and destroy.
///
/// Every operation takes `&mut self`, so calls are serialized by the owner.
/// Observers receive [`SessionStatusEvent`]s through [`subscribe`].
///
/// [`subscribe`]: GameSessionManager::subscribe
pub struct GameSessionManager<E: Engine> {
    engine: E,
    compiler: ScriptCompiler,
    active: Option<ActiveSession<E::Instance>>,
    state: SessionState,
    last_launch: Option<(GameConfig, ScriptSource)>,
    subscribers: Vec<flume::Sender<SessionStatusEvent>>,
    next_id: u64,
}

impl<E: Engine> GameSessionManager<E> {
    pub fn new(engine: E) -> Self {
        Self::with_compiler(engine, ScriptCompiler::new())
    }

    pub fn with_compiler(engine: E, compiler: ScriptCompiler) -> Self {
        Self {
            engine,
            compiler,
            active: None,
            state: SessionState::Uninitialized,
            last_launch: None,
            subscribers: Vec::new(),
            next_id: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> Option<&SessionHandle> {
        self.active.as_ref().map(|active| &active.handle)
    }

    pub fn instance(&self) -> Option<&E::Instance> {
        self.active.as_ref().map(|active| &active.instance)
    }

    /// Configuration of the live session.
    pub fn config(&self) -> Option<&GameConfig> {
        self.active.as_ref().map(|active| &active.config)
    }

    /// Opens a new status stream. Dropped receivers are pruned on the next
    /// publish.
    pub fn subscribe(&mut self) -> flume::Receiver<SessionStatusEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Compiles `source` and starts it on `config.canvas`, destroying any
    /// live session first.
    ///
    /// User-script failures never surface here; only the engine refusing to
    /// build an instance does, and then the manager is left uninitialized.
    pub fn initialize(
        &mut self,
        config: GameConfig,
        source: impl Into<ScriptSource>,
    ) -> Result<SessionHandle, SessionError> {
        let source = source.into();
        self.destroy();
        self.last_launch = Some((config.clone(), source.clone()));

        let scene = self.compiler.compile(source);
        let kind = scene.kind().clone();
        let instance = match self.engine.create(&config, scene) {
            Ok(instance) => instance,
            Err(err) => {
                self.state = SessionState::Uninitialized;
                return Err(SessionError::EngineConstruction {
                    canvas: config.canvas,
                    source: err,
                });
            }
        };

        let handle = SessionHandle {
            id: self.next_id,
            canvas: config.canvas.clone(),
            scene: kind,
        };
        self.next_id += 1;
        info!(
            "session {} initialized on `{}` with {} scene",
            handle.id, handle.canvas, handle.scene
        );
        self.active = Some(ActiveSession {
            handle: handle.clone(),
            config,
            instance,
        });
        self.state = SessionState::Running;
        self.publish(SessionStatusEvent::Initialized);
        Ok(handle)
    }

    pub fn pause(&mut self) {
        if self.state != SessionState::Running {
            debug!("pause ignored in state {:?}", self.state);
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.instance.pause();
        }
        self.state = SessionState::Paused;
        info!("session paused");
        self.publish(SessionStatusEvent::Paused);
    }

    pub fn resume(&mut self) {
        if self.state != SessionState::Paused {
            debug!("resume ignored in state {:?}", self.state);
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.instance.resume();
        }
        self.state = SessionState::Running;
        info!("session resumed");
        self.publish(SessionStatusEvent::Resumed);
    }

    /// Destroys the live session, then initializes a fresh one.
    pub fn reset(
        &mut self,
        config: GameConfig,
        source: impl Into<ScriptSource>,
    ) -> Result<SessionHandle, SessionError> {
        self.destroy();
        self.initialize(config, source)
    }

    /// Relaunches the last configuration and source. Returns `None` when
    /// nothing was launched yet.
    pub fn restart(&mut self) -> Result<Option<SessionHandle>, SessionError> {
        let Some((config, source)) = self.last_launch.clone() else {
            debug!("restart ignored: nothing launched yet");
            return Ok(None);
        };
        self.reset(config, source).map(Some)
    }

    /// Relaunches with new script text, keeping the last configuration.
    pub fn reload(
        &mut self,
        source: impl Into<ScriptSource>,
    ) -> Result<SessionHandle, SessionError> {
        let config = self
            .last_launch
            .as_ref()
            .map(|(config, _)| config.clone())
            .unwrap_or_default();
        self.reset(config, source)
    }

    /// Releases the live instance and its canvas. Does nothing when no
    /// session is live.
    pub fn destroy(&mut self) {
        let Some(mut active) = self.active.take() else {
            debug!("destroy ignored: no live session");
            return;
        };
        active.instance.destroy();
        self.state = SessionState::Destroyed;
        info!(
            "session {} on `{}` destroyed",
            active.handle.id, active.handle.canvas
        );
        self.publish(SessionStatusEvent::Destroyed);
    }

    fn publish(&mut self, event: SessionStatusEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}

impl<E: Engine> Drop for GameSessionManager<E> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::scripting::SceneDefinition;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Ledger {
        live: HashSet<String>,
        created: usize,
        released: usize,
        scenes: Vec<SceneKind>,
    }

    #[derive(Clone, Default)]
    struct RecordingEngine {
        ledger: Arc<Mutex<Ledger>>,
    }

    struct RecordingInstance {
        canvas: String,
        paused: bool,
        live: bool,
        ledger: Arc<Mutex<Ledger>>,
    }

    impl Engine for RecordingEngine {
        type Instance = RecordingInstance;

        fn create(
            &self,
            config: &GameConfig,
            scene: SceneDefinition,
        ) -> Result<RecordingInstance, EngineError> {
            let mut ledger = self.ledger.lock();
            if config.canvas == "missing" {
                return Err(EngineError::UnknownCanvas(config.canvas.clone()));
            }
            if !ledger.live.insert(config.canvas.clone()) {
                return Err(EngineError::CanvasInUse(config.canvas.clone()));
            }
            ledger.created += 1;
            ledger.scenes.push(scene.kind().clone());
            Ok(RecordingInstance {
                canvas: config.canvas.clone(),
                paused: false,
                live: true,
                ledger: Arc::clone(&self.ledger),
            })
        }
    }

    impl EngineInstance for RecordingInstance {
        fn canvas(&self) -> &str {
            &self.canvas
        }

        fn pause(&mut self) {
            self.paused = true;
        }

        fn resume(&mut self) {
            self.paused = false;
        }

        fn is_paused(&self) -> bool {
            self.paused
        }

        fn destroy(&mut self) {
            if !self.live {
                return;
            }
            self.live = false;
            let mut ledger = self.ledger.lock();
            ledger.live.remove(&self.canvas);
            ledger.released += 1;
        }
    }

    const NAMED: &str = r#"
        MyScene = {}
        function MyScene:create() self.add:rectangle(400, 300, 100, 100) end
    "#;

    fn manager() -> (Arc<Mutex<Ledger>>, GameSessionManager<RecordingEngine>) {
        let engine = RecordingEngine::default();
        let ledger = Arc::clone(&engine.ledger);
        (ledger, GameSessionManager::new(engine))
    }

    fn drain(rx: &flume::Receiver<SessionStatusEvent>) -> Vec<SessionStatusEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn initialize_then_destroy_emits_in_order() {
        let (ledger, mut manager) = manager();
        let rx = manager.subscribe();

        let handle = manager.initialize(GameConfig::default(), NAMED).unwrap();
        assert_eq!(handle.id(), 1);
        assert_eq!(handle.canvas(), "game-canvas");
        assert_eq!(handle.scene(), &SceneKind::Named("MyScene".into()));
        assert_eq!(manager.state(), SessionState::Running);

        manager.destroy();
        assert_eq!(manager.state(), SessionState::Destroyed);
        assert!(manager.instance().is_none());
        assert_eq!(
            drain(&rx),
            vec![SessionStatusEvent::Initialized, SessionStatusEvent::Destroyed]
        );
        assert!(ledger.lock().live.is_empty());
    }

    #[test]
    fn destroy_without_a_session_is_silent() {
        let (ledger, mut manager) = manager();
        let rx = manager.subscribe();

        manager.destroy();
        manager.destroy();

        assert_eq!(manager.state(), SessionState::Uninitialized);
        assert!(drain(&rx).is_empty());
        assert_eq!(ledger.lock().released, 0);
    }

    #[test]
    fn second_initialize_replaces_the_first_instance() {
        let (ledger, mut manager) = manager();
        let rx = manager.subscribe();

        manager.initialize(GameConfig::default(), NAMED).unwrap();
        let second = manager.initialize(GameConfig::default(), NAMED).unwrap();

        assert_eq!(second.id(), 2);
        assert_eq!(
            drain(&rx),
            vec![
                SessionStatusEvent::Initialized,
                SessionStatusEvent::Destroyed,
                SessionStatusEvent::Initialized,
            ]
        );
        let ledger = ledger.lock();
        assert_eq!(ledger.live.len(), 1);
        assert_eq!(ledger.created, 2);
        assert_eq!(ledger.released, 1);
    }

    #[test]
    fn pause_and_resume_emit_exactly_two_events() {
        let (_ledger, mut manager) = manager();
        manager.initialize(GameConfig::default(), NAMED).unwrap();
        let rx = manager.subscribe();

        manager.pause();
        assert!(manager.instance().unwrap().is_paused());
        manager.pause();
        manager.resume();
        manager.resume();

        assert_eq!(manager.state(), SessionState::Running);
        assert!(!manager.instance().unwrap().is_paused());
        assert_eq!(
            drain(&rx),
            vec![SessionStatusEvent::Paused, SessionStatusEvent::Resumed]
        );
    }

    #[test]
    fn pause_before_initialize_is_ignored() {
        let (_ledger, mut manager) = manager();
        let rx = manager.subscribe();
        manager.pause();
        manager.resume();
        assert_eq!(manager.state(), SessionState::Uninitialized);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn reset_while_paused_destroys_once_and_initializes_once() {
        let (ledger, mut manager) = manager();
        manager.initialize(GameConfig::default(), NAMED).unwrap();
        manager.pause();
        let rx = manager.subscribe();

        manager
            .reset(GameConfig::default(), "self.add:circle(1, 1, 1)")
            .unwrap();

        assert_eq!(manager.state(), SessionState::Running);
        assert_eq!(manager.handle().unwrap().scene(), &SceneKind::Wrapped);
        assert_eq!(
            drain(&rx),
            vec![SessionStatusEvent::Destroyed, SessionStatusEvent::Initialized]
        );
        assert_eq!(ledger.lock().live.len(), 1);
    }

    #[test]
    fn engine_refusal_leaves_the_manager_uninitialized() {
        let (ledger, mut manager) = manager();
        manager.initialize(GameConfig::default(), NAMED).unwrap();
        let rx = manager.subscribe();

        let err = manager
            .initialize(GameConfig::for_canvas("missing"), NAMED)
            .unwrap_err();

        assert!(matches!(err.engine_error(), EngineError::UnknownCanvas(_)));
        assert_eq!(manager.state(), SessionState::Uninitialized);
        assert!(manager.handle().is_none());
        assert_eq!(drain(&rx), vec![SessionStatusEvent::Destroyed]);
        assert!(ledger.lock().live.is_empty());
    }

    #[test]
    fn throwing_and_invalid_scripts_still_initialize() {
        let (ledger, mut manager) = manager();
        let rx = manager.subscribe();

        manager.initialize(GameConfig::default(), "error('boom')").unwrap();
        manager.initialize(GameConfig::default(), "function (").unwrap();

        assert_eq!(manager.state(), SessionState::Running);
        assert_eq!(
            ledger.lock().scenes,
            vec![SceneKind::Wrapped, SceneKind::Inert]
        );
        assert_eq!(drain(&rx).len(), 3);
    }

    #[test]
    fn restart_and_reload_reuse_the_last_launch() {
        let (ledger, mut manager) = manager();
        assert!(manager.restart().unwrap().is_none());

        let config = GameConfig::for_canvas("preview");
        manager.initialize(config.clone(), NAMED).unwrap();
        let restarted = manager.restart().unwrap().unwrap();
        assert_eq!(restarted.canvas(), "preview");
        assert_eq!(restarted.scene(), &SceneKind::Named("MyScene".into()));

        let reloaded = manager.reload("self.add:text(0, 0, 'hi')").unwrap();
        assert_eq!(reloaded.canvas(), "preview");
        assert_eq!(reloaded.scene(), &SceneKind::Wrapped);
        assert_eq!(manager.config(), Some(&config));

        let ledger = ledger.lock();
        assert_eq!(ledger.created, 3);
        assert_eq!(ledger.released, 2);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let (_ledger, mut manager) = manager();
        let kept = manager.subscribe();
        drop(manager.subscribe());

        manager.initialize(GameConfig::default(), NAMED).unwrap();

        assert_eq!(manager.subscribers.len(), 1);
        assert_eq!(drain(&kept), vec![SessionStatusEvent::Initialized]);
    }

    #[test]
    fn dropping_the_manager_releases_the_instance() {
        let (ledger, mut manager) = manager();
        manager.initialize(GameConfig::default(), NAMED).unwrap();
        drop(manager);
        let ledger = ledger.lock();
        assert!(ledger.live.is_empty());
        assert_eq!(ledger.released, 1);
    }

    #[test]
    fn status_events_display_lowercase() {
        assert_eq!(SessionStatusEvent::Initialized.to_string(), "initialized");
        assert_eq!(SessionStatusEvent::Resumed.to_string(), "resumed");
    }
}
