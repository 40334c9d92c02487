//! # Submission
//!
//! Create-or-update against the API server. Objects that never change for a
//! given execution (service account, role, binding, job) treat an
//! already-exists conflict as success. Mutable objects (ConfigMaps, the ssh
//! secret) are re-read and replaced at the current resource version.

use kube::api::{Api, PostParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
#[error("failed to {operation} {kind} {name}: {source}")]
pub struct SubmissionError {
    pub operation: &'static str,
    pub kind: String,
    pub name: String,
    #[source]
    pub source: kube::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Already-exists is success
    Immutable,
    /// Already-exists falls back to a replace
    Mutable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created,
    AlreadyExists,
    Updated,
}

/// Create `obj`, resolving a conflict according to `mutability`
pub async fn submit<K>(
    api: &Api<K>,
    obj: &K,
    mutability: Mutability,
) -> Result<SubmitOutcome, SubmissionError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let kind = K::kind(&()).to_string();
    let name = obj.meta().name.clone().unwrap_or_default();
    let error = |operation: &'static str, source: kube::Error| SubmissionError {
        operation,
        kind: kind.clone(),
        name: name.clone(),
        source,
    };

    match api.create(&PostParams::default(), obj).await {
        Ok(_) => {
            info!(kind = kind.as_str(), name = name.as_str(), "Created");
            Ok(SubmitOutcome::Created)
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 409 => match mutability {
            Mutability::Immutable => {
                debug!(kind = kind.as_str(), name = name.as_str(), "Already exists");
                Ok(SubmitOutcome::AlreadyExists)
            }
            Mutability::Mutable => {
                let current = api.get(&name).await.map_err(|e| error("read", e))?;
                let mut desired = obj.clone();
                desired.meta_mut().resource_version = current.meta().resource_version.clone();
                api.replace(&name, &PostParams::default(), &desired)
                    .await
                    .map_err(|e| error("replace", e))?;
                info!(kind = kind.as_str(), name = name.as_str(), "Updated");
                Ok(SubmitOutcome::Updated)
            }
        },
        Err(e) => Err(error("create", e)),
    }
}
