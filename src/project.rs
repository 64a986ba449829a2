use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glam::Vec2;
use roxmltree::{Document, Node};

use crate::config::GameConfig;
use crate::scripting::ScriptSource;

/// Scene shown in a fresh editor.
const STARTER_SCRIPT: &str = r##"-- Example: simple GameCrafter scene
MyScene = {}

function MyScene:create()
    -- Add a rectangle
    self.add:rectangle(400, 300, 100, 100, 0x00d4ff)

    -- Add text
    self.add:text(400, 100, "Hello GameCrafter!", {
        color = "#00d4ff",
        fontSize = "24px",
    }):set_origin(0.5)
end
"##;

/// A saved game: metadata, canvas settings and script text.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub description: Option<String>,
    pub config: GameConfig,
    pub source: ScriptSource,
}

impl Project {
    /// The project a new editor opens with.
    pub fn starter() -> Self {
        Self::from_script("Untitled game", STARTER_SCRIPT)
    }

    /// Wraps bare script text with the default configuration.
    pub fn from_script(name: impl Into<String>, source: impl Into<ScriptSource>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config: GameConfig::default(),
            source: source.into(),
        }
    }

    /// Parses a project document.
    ///
    /// ```xml
    /// <project>
    ///     <name>Bouncer</name>
    ///     <config><width>640</width><gravity>0 300</gravity></config>
    ///     <script><![CDATA[ MyScene = {} ]]></script>
    /// </project>
    /// ```
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid project XML")?;
        let root = document.root_element();
        if !root.has_tag_name("project") {
            return Err(anyhow!(
                "expected a <project> root element, found <{}>",
                root.tag_name().name()
            ));
        }

        let name = required_text(&root, "name")?;
        let description = optional_text(&root, "description");
        let config = match root.children().find(|child| child.has_tag_name("config")) {
            Some(node) => parse_config(&node)?,
            None => GameConfig::default(),
        };
        let source = optional_text(&root, "script").unwrap_or_default();

        Ok(Self {
            name,
            description,
            config,
            source: source.into(),
        })
    }

    /// Loads a project file; `.xml` files are parsed as project documents,
    /// anything else is treated as a bare script.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read project {}", path.display()))?;
        let is_xml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        if is_xml {
            return Self::from_xml(&contents)
                .with_context(|| format!("failed to parse project {}", path.display()));
        }

        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("script")
            .to_string();
        Ok(Self::from_script(name, contents))
    }
}

fn parse_config(node: &Node<'_, '_>) -> Result<GameConfig> {
    let defaults = GameConfig::default();
    Ok(GameConfig {
        canvas: optional_text(node, "canvas").unwrap_or(defaults.canvas),
        width: parse_u32(optional_text(node, "width"), defaults.width)?,
        height: parse_u32(optional_text(node, "height"), defaults.height)?,
        background_color: optional_text(node, "background").unwrap_or(defaults.background_color),
        debug: parse_bool(optional_text(node, "debug"), defaults.debug)?,
        gravity: parse_vec2(optional_text(node, "gravity"), defaults.gravity)?,
        fps: parse_u32(optional_text(node, "fps"), defaults.fps)?,
    })
}

fn required_text(node: &Node<'_, '_>, tag: &str) -> Result<String> {
    optional_text(node, tag).ok_or_else(|| anyhow!("<{tag}> tag is missing"))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_u32(value: Option<String>, default: u32) -> Result<u32> {
    match value {
        Some(value) => value
            .parse::<u32>()
            .map_err(|err| anyhow!("failed to parse integer `{value}`: {err}")),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, default: bool) -> Result<bool> {
    match value.as_deref() {
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(anyhow!("failed to parse flag `{other}`")),
        None => Ok(default),
    }
}

fn parse_vec2(value: Option<String>, default: Vec2) -> Result<Vec2> {
    let Some(value) = value else {
        return Ok(default);
    };
    let mut numbers = value
        .split_whitespace()
        .filter_map(|component| component.parse::<f32>().ok());
    let x = numbers
        .next()
        .ok_or_else(|| anyhow!("vector is missing components"))?;
    let y = numbers
        .next()
        .ok_or_else(|| anyhow!("vector is missing components"))?;
    Ok(Vec2::new(x, y))
}
