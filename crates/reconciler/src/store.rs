//! Store traits: the engine's boundary with its environment.
//!
//! A missing object is `Ok(None)`, never an error. Updates carry the
//! `resource_version` the caller read; a store must answer `Error::Conflict`
//! when the object has changed since.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use depgroup_core::{Group, GroupStatus, ObjectKey, Workload};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Read/write access to group objects.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Fetch a group.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Group>>;

    /// List the keys of every group.
    async fn list(&self) -> Result<Vec<ObjectKey>>;

    /// Replace a group's status.
    async fn update_status(
        &self,
        key: &ObjectKey,
        status: GroupStatus,
        resource_version: u64,
    ) -> Result<()>;
}

/// Read/write access to workload objects.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// Fetch a workload.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Workload>>;

    /// Request a new capacity.
    async fn set_capacity(&self, key: &ObjectKey, capacity: u32, resource_version: u64)
    -> Result<()>;

    /// Set the priority class on the workload's pod template.
    async fn set_priority_class(
        &self,
        key: &ObjectKey,
        class: &str,
        resource_version: u64,
    ) -> Result<()>;
}

/// Run one store call under a timeout, refusing to start it once the pass
/// has been cancelled.
pub(crate) async fn bounded<T, F>(
    operation: &str,
    key: &ObjectKey,
    limit: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::time::timeout(limit, call).await.map_err(|_| {
        Error::timeout(
            operation,
            key,
            u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        )
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_refuses_after_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let key = ObjectKey::new("default", "db");

        let result = bounded("get", &key, Duration::from_secs(1), &cancel, async { Ok(1) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let cancel = CancellationToken::new();
        let key = ObjectKey::new("default", "db");

        let result: Result<()> = bounded("get", &key, Duration::from_millis(10), &cancel, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert!(result.is_err_and(|e| e.is_retryable()));
    }
}
