//! Lua userdata for deferred values.
//!
//! - [`LuaOutput`] wraps an [`Output`] and exposes `out:apply(fn)`, `..`
//!   concatenation and `tostring`.
//! - [`LuaResourceRef`] is what `keel.resource` and `keel.ref` return;
//!   indexing it yields the output of that field.

use mlua::prelude::*;

use super::convert::{lua_to_input, value_to_lua};
use crate::output::{Output, OutputError};
use crate::resource::ResourceRef;
use crate::value::Value;

/// A deferred value inside a Lua program.
#[derive(Clone)]
pub struct LuaOutput(pub Output<Value>);

impl LuaUserData for LuaOutput {
  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_method("apply", |lua, this, func: LuaFunction| {
      Ok(LuaOutput(apply_lua(lua, &this.0, func)))
    });

    methods.add_meta_function(LuaMetaMethod::Concat, |_, (left, right): (LuaValue, LuaValue)| {
      let left = lua_to_input(left)?.into_output();
      let right = lua_to_input(right)?.into_output();
      Ok(LuaOutput(concat(&left, &right)))
    });

    methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| {
      let deps: Vec<&str> = this.0.dependencies().iter().map(|id| id.as_str()).collect();
      Ok(format!("output({})", deps.join(", ")))
    });
  }
}

/// A declared or referenced resource inside a Lua program.
#[derive(Clone)]
pub struct LuaResourceRef(pub ResourceRef);

impl LuaUserData for LuaResourceRef {
  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_meta_method(LuaMetaMethod::Index, |_, this, field: String| {
      Ok(LuaOutput(this.0.output(&field)))
    });

    methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| {
      Ok(format!("resource({})", this.0.id()))
    });
  }
}

fn transform_error(error: LuaError) -> OutputError {
  OutputError::Transform(error.to_string())
}

/// Run a Lua function on the resolved value.
///
/// The function may return a plain value or another output, which is
/// flattened into the result.
pub fn apply_lua(lua: &Lua, output: &Output<Value>, func: LuaFunction) -> Output<Value> {
  let weak = lua.weak();
  output.apply_flat(move |value| {
    let lua = weak
      .try_upgrade()
      .ok_or_else(|| OutputError::Transform("lua runtime is no longer available".to_string()))?;
    let arg = value_to_lua(&lua, &value).map_err(transform_error)?;
    let result: LuaValue = func.call(arg).map_err(transform_error)?;
    let input = lua_to_input(result).map_err(transform_error)?;
    Ok(input.into_output())
  })
}

/// Join the text forms of two outputs.
pub fn concat(left: &Output<Value>, right: &Output<Value>) -> Output<Value> {
  left
    .to_text()
    .tuple(&right.to_text())
    .apply(|(l, r)| Ok(Value::String(l + &r)))
}
