//! Boundary to the identity collaborator that decides who owns an upload.

use super::error::{UploadError, UploadResult};
use async_trait::async_trait;
use uuid::Uuid;

/// Who the finalized bytes belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerContext {
    pub owner_id: String,
}

#[async_trait]
pub trait OwnerResolver: Send + Sync {
    /// Resolve the identity a request claims (the `X-User-Id` header) into an
    /// owner, or fail with `OwnerResolution`.
    async fn resolve(&self, claimed: Option<&str>) -> UploadResult<OwnerContext>;
}

/// Trusts the claimed id as long as it is a well-formed UUID.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidOwnerResolver;

#[async_trait]
impl OwnerResolver for UuidOwnerResolver {
    async fn resolve(&self, claimed: Option<&str>) -> UploadResult<OwnerContext> {
        let claimed = claimed
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| UploadError::OwnerResolution("no user id supplied".into()))?;
        let id = Uuid::parse_str(claimed)
            .map_err(|_| UploadError::OwnerResolution("user id is not a UUID".into()))?;
        Ok(OwnerContext {
            owner_id: id.to_string(),
        })
    }
}
