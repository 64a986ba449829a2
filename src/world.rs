use std::sync::Arc;

use glam::Vec2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::GameConfig;

/// Kind of display-list entry created by a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Rectangle,
    Circle,
    Text,
    Sprite,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Rectangle => "rectangle",
            ObjectKind::Circle => "circle",
            ObjectKind::Text => "text",
            ObjectKind::Sprite => "sprite",
        }
    }
}

/// Text styling accepted from scripts, e.g. `{ color = "#fff", fontSize = "24px" }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextStyle {
    pub color: Option<String>,
    pub font_size: Option<String>,
    pub font_family: Option<String>,
}

/// Arcade physics body attached to a game object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub velocity: Vec2,
    /// Fraction of velocity kept after hitting the world bounds.
    pub bounce: f32,
    pub allow_gravity: bool,
    pub collide_world_bounds: bool,
}

impl Default for Body {
    fn default() -> Self {
        Self {
            velocity: Vec2::ZERO,
            bounce: 0.0,
            allow_gravity: true,
            collide_world_bounds: false,
        }
    }
}

/// Entry of the scene's display list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameObject {
    pub id: u64,
    pub kind: ObjectKind,
    pub position: Vec2,
    pub size: Vec2,
    /// Normalized anchor, `(0.5, 0.5)` centers the object on its position.
    pub origin: Vec2,
    pub color: u32,
    pub angle: f32,
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<TextStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
}

impl GameObject {
    pub fn new(kind: ObjectKind, position: Vec2, size: Vec2) -> Self {
        Self {
            id: 0,
            kind,
            position,
            size,
            origin: Vec2::splat(0.5),
            color: 0xffffff,
            angle: 0.0,
            visible: true,
            text: None,
            style: None,
            texture: None,
            body: None,
        }
    }

    /// Top-left corner of the object's bounding box.
    pub fn min(&self) -> Vec2 {
        self.position - self.size * self.origin
    }

    pub fn max(&self) -> Vec2 {
        self.min() + self.size
    }

    pub fn overlaps(&self, other: &GameObject) -> bool {
        let (a_min, a_max) = (self.min(), self.max());
        let (b_min, b_max) = (other.min(), other.max());
        a_min.x < b_max.x && a_max.x > b_min.x && a_min.y < b_max.y && a_max.y > b_min.y
    }
}

#[derive(Debug)]
struct WorldState {
    bounds: Vec2,
    gravity: Vec2,
    debug: bool,
    next_id: u64,
    objects: Vec<GameObject>,
}

/// Thread-safe display list and physics world of one engine instance.
///
/// Clones share the same state; the engine loop mutates it while observers
/// take snapshots.
#[derive(Debug)]
pub struct World {
    state: Arc<RwLock<WorldState>>,
}

impl Clone for World {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::from_config(&GameConfig::default())
    }
}

impl World {
    pub fn new(bounds: Vec2, gravity: Vec2) -> Self {
        Self {
            state: Arc::new(RwLock::new(WorldState {
                bounds,
                gravity,
                debug: false,
                next_id: 1,
                objects: Vec::new(),
            })),
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        let world = Self::new(
            Vec2::new(config.width as f32, config.height as f32),
            config.gravity,
        );
        world.state.write().debug = config.debug;
        world
    }

    pub fn bounds(&self) -> Vec2 {
        self.state.read().bounds
    }

    pub fn gravity(&self) -> Vec2 {
        self.state.read().gravity
    }

    pub fn set_gravity(&self, gravity: Vec2) {
        self.state.write().gravity = gravity;
    }

    pub fn debug(&self) -> bool {
        self.state.read().debug
    }

    /// Adds an object and returns the id assigned to it.
    pub fn spawn(&self, mut object: GameObject) -> u64 {
        let mut state = self.state.write();
        object.id = state.next_id;
        state.next_id += 1;
        let id = object.id;
        state.objects.push(object);
        id
    }

    /// Returns a clone of the requested object.
    pub fn get(&self, id: u64) -> Option<GameObject> {
        self.state
            .read()
            .objects
            .iter()
            .find(|object| object.id == id)
            .cloned()
    }

    /// Applies a mutation to the requested object.
    pub fn update<F, R>(&self, id: u64, updater: F) -> Option<R>
    where
        F: FnOnce(&mut GameObject) -> R,
    {
        let mut state = self.state.write();
        let object = state.objects.iter_mut().find(|object| object.id == id)?;
        Some(updater(object))
    }

    pub fn remove(&self, id: u64) -> bool {
        let mut state = self.state.write();
        let before = state.objects.len();
        state.objects.retain(|object| object.id != id);
        state.objects.len() != before
    }

    /// Returns a snapshot of all objects in creation order.
    pub fn all_objects(&self) -> Vec<GameObject> {
        self.state.read().objects.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `None` if either object no longer exists.
    pub fn overlap(&self, a: u64, b: u64) -> Option<bool> {
        let state = self.state.read();
        let first = state.objects.iter().find(|object| object.id == a)?;
        let second = state.objects.iter().find(|object| object.id == b)?;
        Some(first.overlaps(second))
    }

    /// Advances every physics body by `delta` seconds.
    pub fn step(&self, delta: f32) {
        if delta <= 0.0 {
            return;
        }
        let mut state = self.state.write();
        let WorldState {
            bounds,
            gravity,
            objects,
            ..
        } = &mut *state;
        for object in objects.iter_mut() {
            let Some(mut body) = object.body else {
                continue;
            };
            if body.allow_gravity {
                body.velocity += *gravity * delta;
            }
            object.position += body.velocity * delta;
            if body.collide_world_bounds {
                collide_with_bounds(object, &mut body, *bounds);
            }
            object.body = Some(body);
        }
    }
}

fn collide_with_bounds(object: &mut GameObject, body: &mut Body, bounds: Vec2) {
    let min = object.min();
    let max = object.max();
    if min.x < 0.0 {
        object.position.x -= min.x;
        body.velocity.x = body.velocity.x.abs() * body.bounce;
    } else if max.x > bounds.x {
        object.position.x -= max.x - bounds.x;
        body.velocity.x = -body.velocity.x.abs() * body.bounce;
    }
    if min.y < 0.0 {
        object.position.y -= min.y;
        body.velocity.y = body.velocity.y.abs() * body.bounce;
    } else if max.y > bounds.y {
        object.position.y -= max.y - bounds.y;
        body.velocity.y = -body.velocity.y.abs() * body.bounce;
    }
}
