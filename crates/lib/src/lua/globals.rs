//! Global Lua values and the `keel` table.
//!
//! This module registers the `keel` global table which provides:
//! - `keel.resource(type, name, inputs[, opts])` - Declare a resource
//! - `keel.ref(name)` - Reference a resource by logical name
//! - `keel.export(name, value)` - Record a named program output
//! - `keel.all{...}` - Combine several values into one output
//! - `keel.secret(value)` - Mark a value secret
//! - `keel.json(value)` - Serialize a value to a JSON string output
//! - `keel.config.get(key[, default])` / `keel.config.require(key)`

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use mlua::prelude::*;
use tracing::debug;

use super::convert::{lua_to_input, lua_to_input_map};
use super::output::{LuaOutput, LuaResourceRef};
use crate::output::OutputError;
use crate::resource::{Program, ResourceId, ResourceOptions, ResourceRef};
use crate::value::Value;

/// The program being collected. `None` once evaluation has finished.
pub type ProgramCell = Arc<Mutex<Option<Program>>>;

fn with_program<R>(cell: &ProgramCell, f: impl FnOnce(&mut Program) -> R) -> LuaResult<R> {
  let mut guard = cell
    .lock()
    .map_err(|_| LuaError::external("program collector is poisoned"))?;
  let program = guard
    .as_mut()
    .ok_or_else(|| LuaError::external("resources can only be declared while the program is evaluated"))?;
  Ok(f(program))
}

fn parse_options(opts: Option<LuaTable>) -> LuaResult<ResourceOptions> {
  let Some(opts) = opts else {
    return Ok(ResourceOptions::default());
  };

  let mut options = ResourceOptions {
    delete_before_replace: opts.get::<Option<bool>>("delete_before_replace")?.unwrap_or(false),
    ..Default::default()
  };

  if let Some(deps) = opts.get::<Option<LuaTable>>("depends_on")? {
    for dep in deps.sequence_values::<LuaValue>() {
      let id = match dep? {
        LuaValue::String(s) => ResourceId::new(s.to_str()?.to_string()),
        LuaValue::UserData(ud) => ud.borrow::<LuaResourceRef>()?.0.id().clone(),
        other => {
          return Err(LuaError::external(format!(
            "depends_on entries must be resources or names, got {}",
            other.type_name()
          )));
        }
      };
      options.depends_on.push(id);
    }
  }

  Ok(options)
}

fn register_config(lua: &Lua, keel: &LuaTable, config: BTreeMap<String, String>) -> LuaResult<()> {
  let config = Arc::new(config);
  let table = lua.create_table()?;

  let values = config.clone();
  let get = lua.create_function(move |lua, (key, default): (String, Option<LuaValue>)| {
    Ok(match values.get(&key) {
      Some(value) => Some(LuaValue::String(lua.create_string(value)?)),
      None => default,
    })
  })?;
  table.set("get", get)?;

  let values = config;
  let require = lua.create_function(move |lua, key: String| match values.get(&key) {
    Some(value) => lua.create_string(value),
    None => Err(LuaError::external(format!(
      "missing required config value '{}' (pass -c {}=<value>)",
      key, key
    ))),
  })?;
  table.set("require", require)?;

  keel.set("config", table)?;
  Ok(())
}

/// Register the `keel` global table in the Lua runtime.
pub fn register_globals(lua: &Lua, program: ProgramCell, config: BTreeMap<String, String>) -> LuaResult<()> {
  let keel = lua.create_table()?;

  let cell = program.clone();
  let resource = lua.create_function(
    move |_, (type_token, name, inputs, opts): (String, String, LuaValue, Option<LuaTable>)| {
      if type_token.is_empty() {
        return Err(LuaError::external("resource type must not be empty"));
      }
      if name.is_empty() {
        return Err(LuaError::external("resource name must not be empty"));
      }
      let inputs = lua_to_input_map(inputs)?;
      let options = parse_options(opts)?;
      debug!(resource = %name, type_token = %type_token, inputs = inputs.len(), "declared resource");
      let reference = with_program(&cell, |p| p.resource_with(&type_token, &name, inputs, options))?;
      Ok(LuaResourceRef(reference))
    },
  )?;
  keel.set("resource", resource)?;

  let reference = lua.create_function(|_, name: String| Ok(LuaResourceRef(ResourceRef::new(ResourceId::new(name)))))?;
  keel.set("ref", reference)?;

  let cell = program;
  let export = lua.create_function(move |_, (name, value): (String, LuaValue)| {
    let output = lua_to_input(value)?.into_output();
    with_program(&cell, |p| p.export(&name, output))
  })?;
  keel.set("export", export)?;

  let all = lua.create_function(|_, values: LuaValue| Ok(LuaOutput(lua_to_input(values)?.into_output())))?;
  keel.set("all", all)?;

  let secret = lua.create_function(|_, value: LuaValue| {
    Ok(LuaOutput(lua_to_input(value)?.into_output().make_secret()))
  })?;
  keel.set("secret", secret)?;

  let json = lua.create_function(|_, value: LuaValue| {
    let output = lua_to_input(value)?.into_output().apply(|v| {
      serde_json::to_string(&v)
        .map(Value::String)
        .map_err(|e| OutputError::Conversion(e.to_string()))
    });
    Ok(LuaOutput(output))
  })?;
  keel.set("json", json)?;

  register_config(lua, &keel, config)?;

  lua.globals().set("keel", keel)?;
  Ok(())
}
