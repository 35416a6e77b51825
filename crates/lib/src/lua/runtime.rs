use std::collections::BTreeMap;
use std::path::Path;

use mlua::prelude::*;

use crate::lua::globals::{self, ProgramCell};

/// Create a new Lua runtime with the `keel` global registered.
///
/// `package.path` also searches `lua/` next to the working directory so
/// programs can split helpers into modules.
pub fn create_runtime(program: ProgramCell, config: BTreeMap<String, String>) -> LuaResult<Lua> {
  let lua = Lua::new();
  let package = lua.globals().get::<LuaTable>("package")?;
  let package_path = package.get::<String>("path")?;
  package.set("path", format!("./lua/?.lua;./lua/?/init.lua;{}", package_path))?;

  globals::register_globals(&lua, program, config)?;

  Ok(lua)
}

/// Load and execute a Lua file at the given path.
///
/// Sets `keel.dir` to the directory of the file and prepends that directory's
/// `lua/` folder to `package.path`.
pub fn load_file(lua: &Lua, path: &Path) -> LuaResult<LuaValue> {
  let canonical_path = dunce::canonicalize(path)
    .map_err(|e| LuaError::external(format!("cannot resolve '{}': {}", path.display(), e)))?;
  let content = std::fs::read_to_string(&canonical_path)
    .map_err(|e| LuaError::external(format!("cannot read '{}': {}", canonical_path.display(), e)))?;

  let dir = canonical_path
    .parent()
    .unwrap_or(Path::new(""))
    .to_string_lossy()
    .into_owned();

  let keel = lua.globals().get::<LuaTable>("keel")?;
  keel.set("dir", dir.as_str())?;

  let package = lua.globals().get::<LuaTable>("package")?;
  let package_path = package.get::<String>("path")?;
  package.set("path", format!("{dir}/lua/?.lua;{dir}/lua/?/init.lua;{}", package_path))?;

  lua
    .load(&content)
    .set_name(format!("@{}", canonical_path.display()))
    .eval::<LuaValue>()
}
