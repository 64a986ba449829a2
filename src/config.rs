use std::time::Duration;

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Declarative settings for one game session.
///
/// Supplied by the hosting view when a session starts and left untouched
/// until that session is destroyed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Identifier of the host surface the engine instance binds to.
    pub canvas: String,
    pub width: u32,
    pub height: u32,
    /// CSS-style hex color, `#rrggbb` or `#rgb`.
    pub background_color: String,
    /// Draws physics bodies and velocities when the backend supports it.
    pub debug: bool,
    /// Arcade gravity in pixels per second squared.
    pub gravity: Vec2,
    pub fps: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            canvas: "game-canvas".to_string(),
            width: 800,
            height: 600,
            background_color: "#1a1a2e".to_string(),
            debug: false,
            gravity: Vec2::new(0.0, 200.0),
            fps: 60,
        }
    }
}

impl GameConfig {
    /// Returns a default configuration bound to `canvas`.
    pub fn for_canvas(canvas: impl Into<String>) -> Self {
        Self {
            canvas: canvas.into(),
            ..Self::default()
        }
    }

    /// Background color packed as `0xRRGGBB`, if the configured string parses.
    pub fn background_rgb(&self) -> Option<u32> {
        parse_hex_color(&self.background_color)
    }

    /// Time between two frames of the update loop.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

/// Parses `#rrggbb`, `#rgb`, `rrggbb` or `0xrrggbb` into a packed color.
pub fn parse_hex_color(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .strip_prefix('#')
        .or_else(|| value.strip_prefix("0x"))
        .unwrap_or(value);
    if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    match digits.len() {
        6 => u32::from_str_radix(digits, 16).ok(),
        3 => {
            let short = u32::from_str_radix(digits, 16).ok()?;
            let r = (short >> 8) & 0xf;
            let g = (short >> 4) & 0xf;
            let b = short & 0xf;
            Some((r * 0x11) << 16 | (g * 0x11) << 8 | b * 0x11)
        }
        _ => None,
    }
}

/// Formats a packed color as `#rrggbb`.
pub fn format_hex_color(color: u32) -> String {
    format!("#{:06x}", color & 0x00ff_ffff)
}
