//! File-backed provider that simulates a cloud account.
//!
//! Every resource is a JSON document under `<root>/resources/`. Outputs echo
//! the inputs plus `id`, `name` and `arn`, and each type can add computed
//! fields from templates such as `"{account}.dkr.ecr.{region}.amazonaws.com/{name}"`.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{Created, ErrorCode, Provider, ProviderError, ResourceSchema};
use crate::value::{PropertyMap, Value};

const DEFAULT_REGION: &str = "local-1";
const DEFAULT_ACCOUNT: &str = "000000000000";

/// Per-type behaviour of the local provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeSpec {
  #[serde(flatten)]
  pub schema: ResourceSchema,
  /// Output field to template.
  pub computed: BTreeMap<String, String>,
}

/// Explicit configuration for [`LocalProvider`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
  pub region: Option<String>,
  pub account: Option<String>,
  /// Where resource documents live. Defaults to a directory chosen by the caller.
  pub root: Option<PathBuf>,
  pub types: BTreeMap<String, TypeSpec>,
  /// Logical names whose create or update fails with the given message.
  pub failures: BTreeMap<String, String>,
  /// Artificial delay per call.
  pub latency_ms: u64,
}

#[derive(Debug, Error)]
pub enum ProviderConfigError {
  #[error("failed to read provider config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid provider config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

impl ProviderConfig {
  pub fn load(path: &Path) -> Result<Self, ProviderConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ProviderConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ProviderConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }
}

/// A resource document on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResource {
  pub physical_id: String,
  pub type_token: String,
  pub logical_name: String,
  pub name: String,
  pub inputs: PropertyMap,
  pub outputs: PropertyMap,
}

pub struct LocalProvider {
  config: ProviderConfig,
  root: PathBuf,
  counter: AtomicU64,
  write_lock: Mutex<()>,
}

impl LocalProvider {
  /// Create a provider. `default_root` is used when the config names no root.
  pub fn new(config: ProviderConfig, default_root: &Path) -> Self {
    let root = config.root.clone().unwrap_or_else(|| default_root.to_path_buf());
    Self {
      config,
      root,
      counter: AtomicU64::new(0),
      write_lock: Mutex::new(()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn region(&self) -> &str {
    self.config.region.as_deref().unwrap_or(DEFAULT_REGION)
  }

  fn account(&self) -> &str {
    self.config.account.as_deref().unwrap_or(DEFAULT_ACCOUNT)
  }

  fn resources_dir(&self) -> PathBuf {
    self.root.join("resources")
  }

  fn document_path(&self, physical_id: &str) -> PathBuf {
    self.resources_dir().join(format!("{}.json", physical_id))
  }

  /// All resources currently stored, sorted by physical id.
  pub async fn resources(&self) -> Result<Vec<StoredResource>, ProviderError> {
    let dir = self.resources_dir();
    let mut entries = match tokio::fs::read_dir(&dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(io_error(&dir, e)),
    };

    let mut resources = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "json") {
        resources.push(read_document(&path).await?);
      }
    }
    resources.sort_by(|a, b| a.physical_id.cmp(&b.physical_id));
    Ok(resources)
  }

  async fn simulate_latency(&self) {
    if self.config.latency_ms > 0 {
      tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
    }
  }

  fn check_injected_failure(&self, logical_name: &str) -> Result<(), ProviderError> {
    match self.config.failures.get(logical_name) {
      Some(message) => Err(ProviderError::new(ErrorCode::Internal, message.clone())),
      None => Ok(()),
    }
  }

  fn fresh_suffix(&self, seed: &str) -> String {
    let nanos = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_nanos())
      .unwrap_or_default();
    let count = self.counter.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(count.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hex::encode(hasher.finalize())
  }

  fn compute_outputs(&self, type_token: &str, physical_id: &str, name: &str, inputs: &PropertyMap) -> PropertyMap {
    let mut outputs = inputs.clone();
    outputs.insert("id".to_string(), Value::String(physical_id.to_string()));
    outputs.insert("name".to_string(), Value::String(name.to_string()));
    outputs.insert(
      "arn".to_string(),
      Value::String(format!(
        "arn:keel:{}:{}:{}/{}",
        self.region(),
        self.account(),
        slug(type_token),
        name
      )),
    );

    if let Some(spec) = self.config.types.get(type_token) {
      for (field, template) in &spec.computed {
        let rendered = render_template(template, |key| match key {
          "id" => Some(physical_id.to_string()),
          "name" => Some(name.to_string()),
          "region" => Some(self.region().to_string()),
          "account" => Some(self.account().to_string()),
          "type" => Some(type_token.to_string()),
          other => other
            .strip_prefix("input.")
            .and_then(|field| inputs.get(field))
            .map(crate::output::value_to_text),
        });
        outputs.insert(field.clone(), Value::String(rendered));
      }
    }

    outputs
  }

  async fn write_document(&self, resource: &StoredResource) -> Result<(), ProviderError> {
    let dir = self.resources_dir();
    tokio::fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;

    let path = self.document_path(&resource.physical_id);
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(resource).map_err(|e| ProviderError::internal(e.to_string()))?;
    tokio::fs::write(&tmp, content).await.map_err(|e| io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, &path).await.map_err(|e| io_error(&path, e))?;
    Ok(())
  }

  async fn load(&self, physical_id: &str) -> Result<StoredResource, ProviderError> {
    let path = self.document_path(physical_id);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
      return Err(ProviderError::not_found(format!("resource '{}' does not exist", physical_id)));
    }
    read_document(&path).await
  }
}

#[async_trait]
impl Provider for LocalProvider {
  fn schema(&self, type_token: &str) -> ResourceSchema {
    self
      .config
      .types
      .get(type_token)
      .map(|spec| spec.schema.clone())
      .unwrap_or_default()
  }

  async fn create(&self, type_token: &str, name: &str, inputs: &PropertyMap) -> Result<Created, ProviderError> {
    self.simulate_latency().await;
    self.check_injected_failure(name)?;

    let _guard = self.write_lock.lock().await;

    let explicit_name = inputs.get("name").and_then(Value::as_str).map(str::to_string);
    if let Some(wanted) = &explicit_name {
      let existing = self.resources().await?;
      if existing.iter().any(|r| r.type_token == type_token && &r.name == wanted) {
        return Err(ProviderError::already_exists(format!(
          "a {} named '{}' already exists",
          type_token, wanted
        )));
      }
    }

    let suffix = self.fresh_suffix(&format!("{}/{}", type_token, name));
    let physical_id = format!("{}-{}", slug(name), &suffix[..8]);
    let resource_name = explicit_name.unwrap_or_else(|| format!("{}-{}", name, &suffix[8..15]));
    let outputs = self.compute_outputs(type_token, &physical_id, &resource_name, inputs);

    let resource = StoredResource {
      physical_id: physical_id.clone(),
      type_token: type_token.to_string(),
      logical_name: name.to_string(),
      name: resource_name,
      inputs: inputs.clone(),
      outputs: outputs.clone(),
    };
    self.write_document(&resource).await?;

    debug!(type_token, name, physical_id = %physical_id, "local provider created resource");
    Ok(Created { physical_id, outputs })
  }

  async fn read(&self, _type_token: &str, physical_id: &str) -> Result<PropertyMap, ProviderError> {
    self.simulate_latency().await;
    let resource = self.load(physical_id).await?;
    trace!(physical_id, "local provider read resource");
    Ok(resource.outputs)
  }

  async fn update(
    &self,
    type_token: &str,
    physical_id: &str,
    inputs: &PropertyMap,
  ) -> Result<PropertyMap, ProviderError> {
    self.simulate_latency().await;
    let _guard = self.write_lock.lock().await;

    let mut resource = self.load(physical_id).await?;
    self.check_injected_failure(&resource.logical_name)?;

    if let Some(name) = inputs.get("name").and_then(Value::as_str) {
      resource.name = name.to_string();
    }
    resource.outputs = self.compute_outputs(type_token, physical_id, &resource.name, inputs);
    resource.inputs = inputs.clone();
    resource.type_token = type_token.to_string();
    self.write_document(&resource).await?;

    debug!(type_token, physical_id, "local provider updated resource");
    Ok(resource.outputs)
  }

  async fn delete(&self, type_token: &str, physical_id: &str) -> Result<(), ProviderError> {
    self.simulate_latency().await;
    let _guard = self.write_lock.lock().await;

    let path = self.document_path(physical_id);
    match tokio::fs::remove_file(&path).await {
      Ok(()) => {
        debug!(type_token, physical_id, "local provider deleted resource");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ProviderError::not_found(format!(
        "resource '{}' does not exist",
        physical_id
      ))),
      Err(e) => Err(io_error(&path, e)),
    }
  }
}

async fn read_document(path: &Path) -> Result<StoredResource, ProviderError> {
  let content = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
  serde_json::from_slice(&content)
    .map_err(|e| ProviderError::internal(format!("corrupt resource document {}: {}", path.display(), e)))
}

fn io_error(path: &Path, error: io::Error) -> ProviderError {
  ProviderError::internal(format!("{}: {}", path.display(), error))
}

/// Lowercase alphanumerics, everything else collapsed to `-`.
fn slug(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    if c.is_ascii_alphanumeric() {
      out.push(c.to_ascii_lowercase());
    } else if !out.ends_with('-') {
      out.push('-');
    }
  }
  out.trim_matches('-').to_string()
}

/// Replace `{key}` placeholders. Unknown keys are left untouched.
fn render_template<F>(template: &str, lookup: F) -> String
where
  F: Fn(&str) -> Option<String>,
{
  let mut out = String::with_capacity(template.len());
  let mut rest = template;
  while let Some(start) = rest.find('{') {
    out.push_str(&rest[..start]);
    let after = &rest[start + 1..];
    match after.find('}') {
      Some(end) => {
        let key = &after[..end];
        match lookup(key) {
          Some(value) => out.push_str(&value),
          None => {
            out.push('{');
            out.push_str(key);
            out.push('}');
          }
        }
        rest = &after[end + 1..];
      }
      None => {
        out.push_str(&rest[start..]);
        rest = "";
      }
    }
  }
  out.push_str(rest);
  out
}
