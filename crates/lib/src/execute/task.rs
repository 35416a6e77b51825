//! Provider calls run inside the executor's worker pool.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::types::{ProviderOperation, StepError};
use crate::provider::{Created, ErrorCode, Provider, ProviderError};
use crate::value::PropertyMap;

/// One unit of provider work.
#[derive(Debug, Clone)]
pub(crate) enum Work {
  Create {
    type_token: String,
    name: String,
    inputs: PropertyMap,
    /// Set when this create is the first half of a create-before-delete replace.
    replacing: Option<String>,
  },
  Update {
    type_token: String,
    physical_id: String,
    inputs: PropertyMap,
  },
  Read {
    type_token: String,
    physical_id: String,
  },
  Delete {
    type_token: String,
    physical_id: String,
  },
  /// Delete the old resource, then create its replacement.
  ReplaceDeleteFirst {
    old_type_token: String,
    type_token: String,
    name: String,
    old_physical_id: String,
    inputs: PropertyMap,
  },
}

impl Work {
  pub(crate) fn operation(&self) -> ProviderOperation {
    match self {
      Work::Create { .. } | Work::ReplaceDeleteFirst { .. } => ProviderOperation::Create,
      Work::Update { .. } => ProviderOperation::Update,
      Work::Read { .. } => ProviderOperation::Read,
      Work::Delete { .. } => ProviderOperation::Delete,
    }
  }
}

/// What a successful unit of work produced.
#[derive(Debug, Clone)]
pub(crate) enum WorkOutput {
  Created(Created),
  Outputs(PropertyMap),
  Deleted,
}

async fn call<T, F>(operation: ProviderOperation, timeout: Option<Duration>, fut: F) -> Result<T, ProviderError>
where
  F: Future<Output = Result<T, ProviderError>>,
{
  match timeout {
    Some(limit) => match tokio::time::timeout(limit, fut).await {
      Ok(result) => result,
      Err(_) => Err(ProviderError::new(
        ErrorCode::Timeout,
        format!("{} did not finish within {:?}", operation, limit),
      )),
    },
    None => fut.await,
  }
}

/// Delete that treats an already missing resource as deleted.
async fn delete_idempotent(
  provider: &dyn Provider,
  type_token: &str,
  physical_id: &str,
  timeout: Option<Duration>,
) -> Result<(), ProviderError> {
  match call(
    ProviderOperation::Delete,
    timeout,
    provider.delete(type_token, physical_id),
  )
  .await
  {
    Err(e) if e.code == ErrorCode::NotFound => {
      warn!(type_token, physical_id, "resource already gone, treating delete as done");
      Ok(())
    }
    other => other,
  }
}

pub(crate) async fn run(provider: Arc<dyn Provider>, work: Work, timeout: Option<Duration>) -> Result<WorkOutput, StepError> {
  let operation = work.operation();
  debug!(operation = %operation, "calling provider");
  let provider = provider.as_ref();

  match work {
    Work::Create {
      type_token,
      name,
      inputs,
      replacing,
    } => match call(operation, timeout, provider.create(&type_token, &name, &inputs)).await {
      Ok(created) => Ok(WorkOutput::Created(created)),
      Err(source) => match replacing {
        Some(old_physical_id) if source.code == ErrorCode::AlreadyExists => Err(StepError::ReplaceFailure {
          old_physical_id,
          old_deleted: false,
          source,
        }),
        _ => Err(StepError::provider(operation, source)),
      },
    },
    Work::Update {
      type_token,
      physical_id,
      inputs,
    } => call(operation, timeout, provider.update(&type_token, &physical_id, &inputs))
      .await
      .map(WorkOutput::Outputs)
      .map_err(|source| StepError::provider(operation, source)),
    Work::Read {
      type_token,
      physical_id,
    } => call(operation, timeout, provider.read(&type_token, &physical_id))
      .await
      .map(WorkOutput::Outputs)
      .map_err(|source| StepError::provider(operation, source)),
    Work::Delete {
      type_token,
      physical_id,
    } => delete_idempotent(provider, &type_token, &physical_id, timeout)
      .await
      .map(|()| WorkOutput::Deleted)
      .map_err(|source| StepError::provider(operation, source)),
    Work::ReplaceDeleteFirst {
      old_type_token,
      type_token,
      name,
      old_physical_id,
      inputs,
    } => {
      delete_idempotent(provider, &old_type_token, &old_physical_id, timeout)
        .await
        .map_err(|source| StepError::provider(ProviderOperation::Delete, source))?;

      call(operation, timeout, provider.create(&type_token, &name, &inputs))
        .await
        .map(WorkOutput::Created)
        .map_err(|source| StepError::ReplaceFailure {
          old_physical_id,
          old_deleted: true,
          source,
        })
    }
  }
}
