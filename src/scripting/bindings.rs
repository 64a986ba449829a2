use glam::Vec2;
use log::info;
use mlua::{
    AnyUserData, IntoLua, Lua, LuaSerdeExt, Result as LuaResult, Table, UserData, UserDataFields,
    UserDataMethods, Value, Variadic,
};

use crate::config::{parse_hex_color, GameConfig};
use crate::world::{Body, GameObject, ObjectKind, TextStyle, World};

/// Key the synthetic scene reports to scripts.
const SCENE_KEY: &str = "UserScene";

const DEFAULT_FONT_PX: f32 = 16.0;
const DEFAULT_SPRITE_SIZE: f32 = 32.0;

pub(super) struct ScriptContext {
    pub world: World,
    pub config: GameConfig,
}

impl ScriptContext {
    pub fn new(world: World, config: GameConfig) -> Self {
        Self { world, config }
    }
}

pub(super) fn register_globals(lua: &Lua) -> LuaResult<()> {
    register_print(lua)?;
    register_datatypes(lua)?;
    Ok(())
}

/// Builds the table user code sees as `self`.
pub(super) fn create_scene_instance<'lua>(
    lua: &'lua Lua,
    context: &ScriptContext,
) -> LuaResult<Table<'lua>> {
    let instance = lua.create_table()?;
    instance.set("key", SCENE_KEY)?;
    instance.set(
        "add",
        lua.create_userdata(ObjectFactory {
            world: context.world.clone(),
        })?,
    )?;
    instance.set(
        "physics",
        lua.create_userdata(PhysicsApi {
            world: context.world.clone(),
        })?,
    )?;
    instance.set("width", context.config.width)?;
    instance.set("height", context.config.height)?;
    instance.set("config", lua.to_value(&context.config)?)?;
    Ok(instance)
}

fn register_print(lua: &Lua) -> LuaResult<()> {
    let print = lua.create_function(|lua, values: Variadic<Value>| {
        let mut out = Vec::new();
        for value in values.iter() {
            let text = match value {
                Value::Nil => "nil".to_string(),
                Value::Boolean(b) => b.to_string(),
                Value::String(s) => s.to_str()?.to_string(),
                _ => match lua.coerce_string(value.clone())? {
                    Some(s) => s.to_str()?.to_string(),
                    None => value.type_name().to_string(),
                },
            };
            out.push(text);
        }
        info!(target: "script", "{}", out.join("\t"));
        Ok(())
    })?;
    lua.globals().set("print", print)?;
    Ok(())
}

fn register_datatypes(lua: &Lua) -> LuaResult<()> {
    let vector2 = lua.create_table()?;
    vector2.set(
        "new",
        lua.create_function(|lua, (x, y): (Option<f32>, Option<f32>)| {
            LuaVec2(Vec2::new(x.unwrap_or(0.0), y.unwrap_or(0.0))).into_lua(lua)
        })?,
    )?;
    lua.globals().set("Vector2", vector2)?;

    let color = lua.create_table()?;
    color.set(
        "rgb",
        lua.create_function(|_, (r, g, b): (u8, u8, u8)| {
            Ok(i64::from(u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b)))
        })?,
    )?;
    color.set(
        "hex",
        lua.create_function(|_, value: String| {
            parse_hex_color(&value)
                .map(i64::from)
                .ok_or_else(|| mlua::Error::RuntimeError(format!("invalid color `{value}`")))
        })?,
    )?;
    lua.globals().set("Color", color)?;

    Ok(())
}

fn color_argument(value: Value) -> LuaResult<Option<u32>> {
    match value {
        Value::Nil => Ok(None),
        Value::Integer(n) => Ok(Some((n & 0x00ff_ffff) as u32)),
        Value::Number(n) => Ok(Some((n as i64 & 0x00ff_ffff) as u32)),
        Value::String(s) => {
            let text = s.to_str()?;
            parse_hex_color(text)
                .map(Some)
                .ok_or_else(|| mlua::Error::RuntimeError(format!("invalid color `{text}`")))
        }
        other => Err(mlua::Error::FromLuaConversionError {
            from: other.type_name(),
            to: "color",
            message: Some("expected a 0xRRGGBB number or a hex string".into()),
        }),
    }
}

fn font_px(style: &TextStyle) -> f32 {
    style
        .font_size
        .as_deref()
        .and_then(|size| size.trim().trim_end_matches("px").trim().parse::<f32>().ok())
        .filter(|size| *size > 0.0)
        .unwrap_or(DEFAULT_FONT_PX)
}

/// `self.add`: creates display-list entries.
struct ObjectFactory {
    world: World,
}

impl ObjectFactory {
    fn spawn<'lua>(&self, lua: &'lua Lua, object: GameObject) -> LuaResult<AnyUserData<'lua>> {
        let id = self.world.spawn(object);
        lua.create_userdata(ObjectHandle {
            world: self.world.clone(),
            id,
        })
    }
}

impl UserData for ObjectFactory {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method(
            "rectangle",
            |lua, this, (x, y, width, height, color): (f32, f32, Option<f32>, Option<f32>, Value)| {
                let mut object = GameObject::new(
                    ObjectKind::Rectangle,
                    Vec2::new(x, y),
                    Vec2::new(width.unwrap_or(128.0), height.unwrap_or(128.0)),
                );
                if let Some(color) = color_argument(color)? {
                    object.color = color;
                }
                this.spawn(lua, object)
            },
        );
        methods.add_method(
            "circle",
            |lua, this, (x, y, radius, color): (f32, f32, Option<f32>, Value)| {
                let diameter = radius.unwrap_or(32.0) * 2.0;
                let mut object =
                    GameObject::new(ObjectKind::Circle, Vec2::new(x, y), Vec2::splat(diameter));
                if let Some(color) = color_argument(color)? {
                    object.color = color;
                }
                this.spawn(lua, object)
            },
        );
        methods.add_method(
            "text",
            |lua, this, (x, y, text, style): (f32, f32, String, Value)| {
                let style: TextStyle = match style {
                    Value::Nil => TextStyle::default(),
                    value => lua.from_value(value)?,
                };
                let px = font_px(&style);
                let size = Vec2::new(text.chars().count() as f32 * px * 0.6, px);
                let mut object = GameObject::new(ObjectKind::Text, Vec2::new(x, y), size);
                object.origin = Vec2::ZERO;
                if let Some(color) = style.color.as_deref().and_then(parse_hex_color) {
                    object.color = color;
                }
                object.text = Some(text);
                object.style = Some(style);
                this.spawn(lua, object)
            },
        );
        methods.add_method("sprite", |lua, this, (x, y, key): (f32, f32, String)| {
            let mut object = GameObject::new(
                ObjectKind::Sprite,
                Vec2::new(x, y),
                Vec2::splat(DEFAULT_SPRITE_SIZE),
            );
            object.texture = Some(key);
            this.spawn(lua, object)
        });
        methods.add_method("count", |_, this, ()| Ok(this.world.len()));
    }
}

/// `self.physics`: arcade physics controls.
struct PhysicsApi {
    world: World,
}

impl UserData for PhysicsApi {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("gravity", |lua, this| {
            LuaVec2(this.world.gravity()).into_lua(lua)
        });
        fields.add_field_method_get("debug", |_, this| Ok(this.world.debug()));
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("enable", |_, this, object: AnyUserData| {
            {
                let handle = object.borrow::<ObjectHandle>()?;
                this.world.update(handle.id, |obj| {
                    obj.body.get_or_insert_with(Body::default);
                });
            }
            Ok(object)
        });
        methods.add_method("set_gravity", |_, this, (x, y): (f32, f32)| {
            this.world.set_gravity(Vec2::new(x, y));
            Ok(())
        });
        methods.add_method("overlap", |_, this, (a, b): (AnyUserData, AnyUserData)| {
            let a = a.borrow::<ObjectHandle>()?.id;
            let b = b.borrow::<ObjectHandle>()?.id;
            Ok(this.world.overlap(a, b).unwrap_or(false))
        });
    }
}

/// Script-side reference to a game object. Operations on a destroyed
/// object read as `nil` and write nothing.
struct ObjectHandle {
    world: World,
    id: u64,
}

impl ObjectHandle {
    fn read<R>(&self, reader: impl FnOnce(&GameObject) -> R) -> Option<R> {
        self.world.get(self.id).map(|object| reader(&object))
    }

    fn write(&self, writer: impl FnOnce(&mut GameObject)) {
        self.world.update(self.id, writer);
    }

    fn with_body(&self, writer: impl FnOnce(&mut Body)) -> LuaResult<()> {
        let attached = self.world.update(self.id, |object| match object.body.as_mut() {
            Some(body) => {
                writer(body);
                true
            }
            None => false,
        });
        match attached {
            Some(false) => Err(mlua::Error::RuntimeError(format!(
                "object {} has no physics body; call self.physics:enable(object) first",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

fn chain<'lua>(
    object: AnyUserData<'lua>,
    apply: impl FnOnce(&ObjectHandle) -> LuaResult<()>,
) -> LuaResult<AnyUserData<'lua>> {
    {
        let handle = object.borrow::<ObjectHandle>()?;
        apply(&handle)?;
    }
    Ok(object)
}

impl UserData for ObjectHandle {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("id", |_, this| Ok(this.id));
        fields.add_field_method_get("alive", |_, this| Ok(this.read(|_| ()).is_some()));
        fields.add_field_method_get("kind", |_, this| Ok(this.read(|obj| obj.kind.as_str())));
        fields.add_field_method_get("x", |_, this| Ok(this.read(|obj| obj.position.x)));
        fields.add_field_method_get("y", |_, this| Ok(this.read(|obj| obj.position.y)));
        fields.add_field_method_get("width", |_, this| Ok(this.read(|obj| obj.size.x)));
        fields.add_field_method_get("height", |_, this| Ok(this.read(|obj| obj.size.y)));
        fields.add_field_method_get("color", |_, this| Ok(this.read(|obj| obj.color)));
        fields.add_field_method_get("angle", |_, this| Ok(this.read(|obj| obj.angle)));
        fields.add_field_method_get("visible", |_, this| Ok(this.read(|obj| obj.visible)));
        fields.add_field_method_get("text", |_, this| {
            Ok(this.read(|obj| obj.text.clone()).flatten())
        });
        fields.add_field_method_get("velocity_x", |_, this| {
            Ok(this.read(|obj| obj.body.map(|body| body.velocity.x)).flatten())
        });
        fields.add_field_method_get("velocity_y", |_, this| {
            Ok(this.read(|obj| obj.body.map(|body| body.velocity.y)).flatten())
        });

        fields.add_field_method_set("x", |_, this, value: f32| {
            this.write(|obj| obj.position.x = value);
            Ok(())
        });
        fields.add_field_method_set("y", |_, this, value: f32| {
            this.write(|obj| obj.position.y = value);
            Ok(())
        });
        fields.add_field_method_set("width", |_, this, value: f32| {
            this.write(|obj| obj.size.x = value.max(0.0));
            Ok(())
        });
        fields.add_field_method_set("height", |_, this, value: f32| {
            this.write(|obj| obj.size.y = value.max(0.0));
            Ok(())
        });
        fields.add_field_method_set("color", |_, this, value: Value| {
            if let Some(color) = color_argument(value)? {
                this.write(|obj| obj.color = color);
            }
            Ok(())
        });
        fields.add_field_method_set("angle", |_, this, value: f32| {
            this.write(|obj| obj.angle = value);
            Ok(())
        });
        fields.add_field_method_set("visible", |_, this, value: bool| {
            this.write(|obj| obj.visible = value);
            Ok(())
        });
        fields.add_field_method_set("text", |_, this, value: String| {
            this.write(|obj| obj.text = Some(value));
            Ok(())
        });
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_function(
            "set_position",
            |_, (object, x, y): (AnyUserData, f32, f32)| {
                chain(object, |this| {
                    this.write(|obj| obj.position = Vec2::new(x, y));
                    Ok(())
                })
            },
        );
        methods.add_function(
            "set_origin",
            |_, (object, x, y): (AnyUserData, f32, Option<f32>)| {
                chain(object, |this| {
                    this.write(|obj| obj.origin = Vec2::new(x, y.unwrap_or(x)));
                    Ok(())
                })
            },
        );
        methods.add_function("set_color", |_, (object, color): (AnyUserData, Value)| {
            let color = color_argument(color)?;
            chain(object, |this| {
                if let Some(color) = color {
                    this.write(|obj| obj.color = color);
                }
                Ok(())
            })
        });
        methods.add_function(
            "set_velocity",
            |_, (object, x, y): (AnyUserData, f32, Option<f32>)| {
                chain(object, |this| {
                    this.with_body(|body| body.velocity = Vec2::new(x, y.unwrap_or(x)))
                })
            },
        );
        methods.add_function("set_bounce", |_, (object, bounce): (AnyUserData, f32)| {
            chain(object, |this| {
                this.with_body(|body| body.bounce = bounce.clamp(0.0, 1.0))
            })
        });
        methods.add_function(
            "set_collide_world_bounds",
            |_, (object, enabled): (AnyUserData, Option<bool>)| {
                chain(object, |this| {
                    this.with_body(|body| body.collide_world_bounds = enabled.unwrap_or(true))
                })
            },
        );
        methods.add_function(
            "set_allow_gravity",
            |_, (object, enabled): (AnyUserData, Option<bool>)| {
                chain(object, |this| {
                    this.with_body(|body| body.allow_gravity = enabled.unwrap_or(true))
                })
            },
        );
        methods.add_method("destroy", |_, this, ()| Ok(this.world.remove(this.id)));
    }
}

#[derive(Debug, Clone, Copy)]
struct LuaVec2(Vec2);

impl<'lua> IntoLua<'lua> for LuaVec2 {
    fn into_lua(self, lua: &'lua Lua) -> LuaResult<Value<'lua>> {
        let table = lua.create_table()?;
        table.set("x", self.0.x)?;
        table.set("y", self.0.y)?;
        Ok(Value::Table(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::sandbox::{new_sandbox, ScriptLimits};

    fn scene(world: &World) -> (Lua, ScriptContext) {
        let lua = new_sandbox(ScriptLimits::default()).unwrap();
        register_globals(&lua).unwrap();
        let context = ScriptContext::new(world.clone(), GameConfig::default());
        (lua, context)
    }

    #[test]
    fn factory_methods_populate_the_world() {
        let world = World::default();
        let (lua, context) = scene(&world);
        let instance = create_scene_instance(&lua, &context).unwrap();

        let (count, kind, label): (usize, String, String) = lua
            .load(
                r##"
                local self = ...
                self.add:rectangle(400, 300, 100, 100, 0x00d4ff)
                local label = self.add:text(400, 100, "Hello GameCrafter!", {
                    color = "#00d4ff",
                    fontSize = "24px",
                }):set_origin(0.5)
                self.add:sprite(10, 10, "player")
                return self.add:count(), label.kind, label.text
            "##,
            )
            .call(instance)
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(kind, "text");
        assert_eq!(label, "Hello GameCrafter!");

        let objects = world.all_objects();
        assert_eq!(objects[0].color, 0x00d4ff);
        assert_eq!(objects[0].size, Vec2::new(100.0, 100.0));
        let text = &objects[1];
        assert_eq!(text.origin, Vec2::splat(0.5));
        assert_eq!(text.color, 0x00d4ff);
        assert_eq!(text.size.y, 24.0);
        assert_eq!(
            text.style.as_ref().unwrap().font_size.as_deref(),
            Some("24px")
        );
        assert_eq!(objects[2].texture.as_deref(), Some("player"));
    }

    #[test]
    fn handles_read_and_write_through_to_the_world() {
        let world = World::default();
        let (lua, context) = scene(&world);
        let instance = create_scene_instance(&lua, &context).unwrap();

        let (x, color, alive_after): (f32, u32, bool) = lua
            .load(
                r#"
                local self = ...
                local box = self.add:rectangle(0, 0, 10, 10)
                box.x = 42
                box.color = Color.rgb(255, 0, 0)
                local x, color = box.x, box.color
                box:destroy()
                return x, color, box.alive
            "#,
            )
            .call(instance)
            .unwrap();

        assert_eq!(x, 42.0);
        assert_eq!(color, 0xff0000);
        assert!(!alive_after);
        assert!(world.is_empty());
    }

    #[test]
    fn physics_requires_an_enabled_body() {
        let world = World::default();
        let (lua, context) = scene(&world);
        let instance = create_scene_instance(&lua, &context).unwrap();

        let (failed, message, vx): (bool, String, f32) = lua
            .load(
                r#"
                local self = ...
                local ball = self.add:circle(100, 100, 8)
                local ok, err = pcall(function() ball:set_velocity(10, 0) end)
                self.physics:enable(ball):set_velocity(30, -5):set_bounce(2)
                return not ok, tostring(err), ball.velocity_x
            "#,
            )
            .call(instance)
            .unwrap();

        assert!(failed);
        assert!(message.contains("no physics body"));
        assert_eq!(vx, 30.0);
        let body = world.all_objects()[0].body.unwrap();
        assert_eq!(body.velocity, Vec2::new(30.0, -5.0));
        assert_eq!(body.bounce, 1.0);
    }

    #[test]
    fn scene_instance_exposes_config_and_gravity() {
        let world = World::default();
        let (lua, context) = scene(&world);
        let instance = create_scene_instance(&lua, &context).unwrap();

        let (width, canvas, gravity_y, key): (u32, String, f32, String) = lua
            .load(
                r#"
                local self = ...
                self.physics:set_gravity(0, 50)
                return self.width, self.config.canvas, self.physics.gravity.y, self.key
            "#,
            )
            .call(instance)
            .unwrap();

        assert_eq!(width, 800);
        assert_eq!(canvas, "game-canvas");
        assert_eq!(gravity_y, 50.0);
        assert_eq!(key, "UserScene");
        assert_eq!(world.gravity(), Vec2::new(0.0, 50.0));
    }

    #[test]
    fn invalid_colors_raise_script_errors() {
        let world = World::default();
        let (lua, context) = scene(&world);
        let instance = create_scene_instance(&lua, &context).unwrap();

        let err = lua
            .load("local self = ... self.add:rectangle(0, 0, 1, 1, 'teal')")
            .call::<_, ()>(instance)
            .unwrap_err();
        assert!(err.to_string().contains("invalid color"));
        assert_eq!(
            lua.load("return Color.hex('#0f0')").eval::<u32>().unwrap(),
            0x00ff00
        );
    }
}
