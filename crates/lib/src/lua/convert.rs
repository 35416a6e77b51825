//! Conversion between Lua values and resource inputs.

use std::collections::BTreeMap;

use mlua::prelude::*;
use serde_json::Number;

use super::output::{LuaOutput, LuaResourceRef};
use crate::output::{Input, InputMap};
use crate::value::Value;

/// Convert a Lua value to an input tree.
///
/// Outputs and resource references stay deferred; everything else becomes a
/// literal. Tables with sequential integer keys starting at 1 are arrays,
/// all other tables (including empty ones) are objects. A table mixing list
/// items with other keys is rejected.
pub fn lua_to_input(value: LuaValue) -> LuaResult<Input> {
  match value {
    LuaValue::Nil => Ok(Input::Value(Value::Null)),
    LuaValue::Boolean(b) => Ok(Input::Value(Value::Bool(b))),
    LuaValue::Integer(i) => Ok(Input::Value(Value::from(i))),
    LuaValue::Number(n) => Number::from_f64(n)
      .map(|n| Input::Value(Value::Number(n)))
      .ok_or_else(|| LuaError::external(format!("number {} cannot be used as an input", n))),
    LuaValue::String(s) => Ok(Input::Value(Value::String(s.to_str()?.to_string()))),
    LuaValue::UserData(ud) => {
      if let Ok(output) = ud.borrow::<LuaOutput>() {
        return Ok(Input::Output(output.0.clone()));
      }
      if let Ok(reference) = ud.borrow::<LuaResourceRef>() {
        return Ok(Input::Output(reference.0.physical_id()));
      }
      Err(LuaError::external("unsupported userdata in inputs"))
    }
    LuaValue::Table(t) => {
      let len = t.raw_len();
      let first: LuaValue = t.raw_get(1)?;
      if len > 0 && first != LuaValue::Nil {
        if t.pairs::<LuaValue, LuaValue>().count() != len {
          return Err(LuaError::external("table mixes list items with named keys"));
        }
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
          let item: LuaValue = t.raw_get(i)?;
          items.push(lua_to_input(item)?);
        }
        Ok(Input::Array(items))
      } else {
        let mut fields = BTreeMap::new();
        for pair in t.pairs::<LuaValue, LuaValue>() {
          let (key, value) = pair?;
          fields.insert(table_key(key)?, lua_to_input(value)?);
        }
        Ok(Input::Object(fields))
      }
    }
    LuaValue::LightUserData(ud) if ud.0.is_null() => Ok(Input::Value(Value::Null)),
    other => Err(LuaError::external(format!(
      "unsupported input type: {}",
      other.type_name()
    ))),
  }
}

/// Convert the inputs table of `keel.resource`.
pub fn lua_to_input_map(value: LuaValue) -> LuaResult<InputMap> {
  match value {
    LuaValue::Nil => Ok(InputMap::new()),
    LuaValue::Table(t) => {
      let mut inputs = InputMap::new();
      for pair in t.pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        let LuaValue::String(key) = key else {
          return Err(LuaError::external("resource input names must be strings"));
        };
        inputs.insert(key.to_str()?.to_string(), lua_to_input(value)?);
      }
      Ok(inputs)
    }
    other => Err(LuaError::external(format!(
      "resource inputs must be a table, got {}",
      other.type_name()
    ))),
  }
}

fn table_key(key: LuaValue) -> LuaResult<String> {
  match key {
    LuaValue::String(s) => Ok(s.to_str()?.to_string()),
    LuaValue::Integer(i) => Ok(i.to_string()),
    other => Err(LuaError::external(format!(
      "unsupported table key type: {}",
      other.type_name()
    ))),
  }
}

/// Convert a resolved value to Lua. `null` becomes `nil`.
pub fn value_to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
  match value {
    Value::Null => Ok(LuaValue::Nil),
    Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => Ok(LuaValue::Integer(i)),
      None => Ok(LuaValue::Number(n.as_f64().unwrap_or(f64::NAN))),
    },
    Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
    Value::Array(items) => {
      let table = lua.create_table_with_capacity(items.len(), 0)?;
      for (i, item) in items.iter().enumerate() {
        table.raw_set(i + 1, value_to_lua(lua, item)?)?;
      }
      Ok(LuaValue::Table(table))
    }
    Value::Object(fields) => {
      let table = lua.create_table_with_capacity(0, fields.len())?;
      for (key, field) in fields {
        table.raw_set(key.as_str(), value_to_lua(lua, field)?)?;
      }
      Ok(LuaValue::Table(table))
    }
  }
}
