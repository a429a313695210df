//! Permission Arbiter
//!
//! Flat role-to-permission resolution. A principal holds a permission when
//! one of its roles is the override role, or when an explicit, active grant
//! exists for one of its roles. Role levels play no part.
//!
//! Fail-closed: any internal error denies, and a denial caused by an error
//! is never cached.

use std::sync::Arc;

use kernel::id::PrincipalId;
use platform::cache::DecisionCache;
use platform::clock::Clock;

use crate::application::config::PermissionSettings;
use crate::domain::entity::access::{
    AccessContext, LastRecordDecision, LastRecordResource, PermissionAuditEntry,
};
use crate::domain::entity::principal::Principal;
use crate::domain::repository::{AccessRepository, PrincipalRepository};
use crate::error::{AuthError, AuthResult};

/// Outcome of one uncached resolution
struct Resolution {
    granted: bool,
    role_used: Option<String>,
    details: Option<String>,
}

impl Resolution {
    fn denied(details: &str) -> Self {
        Self {
            granted: false,
            role_used: None,
            details: Some(details.to_string()),
        }
    }
}

pub struct PermissionArbiter<R, C> {
    repo: Arc<R>,
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    settings: PermissionSettings,
}

impl<R, C> PermissionArbiter<R, C>
where
    R: PrincipalRepository + AccessRepository + Send + Sync,
    C: DecisionCache + Send + Sync,
{
    pub fn new(repo: Arc<R>, cache: Arc<C>, clock: Arc<dyn Clock>, settings: PermissionSettings) -> Self {
        Self {
            repo,
            cache,
            clock,
            settings,
        }
    }

    fn cache_key(principal_id: &PrincipalId, key: &str) -> String {
        format!("{}:{}", principal_id, key)
    }

    fn ttl_ms(&self) -> i64 {
        self.settings.cache_ttl.as_millis() as i64
    }

    /// Decide whether `principal_id` holds `key`
    pub async fn check(&self, principal_id: &PrincipalId, key: &str, context: &AccessContext) -> bool {
        let cache_key = Self::cache_key(principal_id, key);
        let now_ms = self.clock.now_ms();

        let cached = match self.cache.get(&cache_key, now_ms).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(error = %e, "Permission cache read failed");
                None
            }
        };

        let resolution = match cached {
            Some(granted) => Resolution {
                granted,
                role_used: None,
                details: Some("cached".to_string()),
            },
            None => match self.resolve(principal_id, key).await {
                Ok(resolution) => {
                    if let Err(e) = self
                        .cache
                        .put(&cache_key, resolution.granted, now_ms, self.ttl_ms())
                        .await
                    {
                        tracing::warn!(error = %e, "Permission cache write failed");
                    }
                    resolution
                }
                Err(e) => {
                    tracing::warn!(
                        principal_id = %principal_id,
                        permission = key,
                        error = %e,
                        "Permission resolution failed, denying"
                    );
                    Resolution::denied("resolution_error")
                }
            },
        };

        if !resolution.granted {
            tracing::warn!(principal_id = %principal_id, permission = key, "Permission denied");
        }

        if !context.suppress_audit {
            self.audit(principal_id, key, &resolution, context).await;
        }

        resolution.granted
    }

    /// `check` that turns a denial into `PermissionDenied`
    pub async fn require(&self, principal_id: &PrincipalId, key: &str, context: &AccessContext) -> AuthResult<()> {
        if self.check(principal_id, key, context).await {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied {
                permission: key.to_string(),
            })
        }
    }

    async fn resolve(&self, principal_id: &PrincipalId, key: &str) -> AuthResult<Resolution> {
        let Some(principal) = self.active_principal(principal_id).await? else {
            return Ok(Resolution::denied("inactive_principal"));
        };

        if principal.roles.holds(&self.settings.override_role) {
            return Ok(Resolution {
                granted: true,
                role_used: Some(self.settings.override_role.clone()),
                details: None,
            });
        }

        let role_names = principal.roles.names();
        match self.repo.find_granting_role(&role_names, key).await? {
            Some(role) => Ok(Resolution {
                granted: true,
                role_used: Some(role),
                details: None,
            }),
            None => Ok(Resolution::denied("no_grant")),
        }
    }

    async fn active_principal(&self, principal_id: &PrincipalId) -> AuthResult<Option<Principal>> {
        let principal = self.repo.find_principal(principal_id).await?;
        Ok(principal.filter(|p| p.status.can_login()))
    }

    async fn audit(
        &self,
        principal_id: &PrincipalId,
        key: &str,
        resolution: &Resolution,
        context: &AccessContext,
    ) {
        let entry = PermissionAuditEntry::record(
            *principal_id,
            key,
            resolution.granted,
            resolution.role_used.clone(),
            resolution.details.clone(),
            context,
            self.clock.now(),
        );
        if let Err(e) = self.repo.append_audit(&entry).await {
            tracing::warn!(
                principal_id = %principal_id,
                permission = key,
                error = %e,
                "Permission audit write failed"
            );
        }
    }

    /// Every permission key the principal holds. The override role sees the
    /// whole catalog.
    pub async fn list_permissions(&self, principal_id: &PrincipalId) -> AuthResult<Vec<String>> {
        let Some(principal) = self.active_principal(principal_id).await? else {
            return Ok(Vec::new());
        };

        let mut keys = if principal.roles.holds(&self.settings.override_role) {
            self.repo.permission_catalog().await?
        } else {
            self.repo.granted_permissions(&principal.roles.names()).await?
        };
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Refuse to delete the final active record of a scope unless the actor
    /// holds the override role. Errors deny.
    pub async fn check_last_record_protection(
        &self,
        resource: LastRecordResource,
        scope_id: &uuid::Uuid,
        principal_id: &PrincipalId,
    ) -> LastRecordDecision {
        match self.evaluate_last_record(resource, scope_id, principal_id).await {
            Ok(decision) => {
                if !decision.allowed {
                    tracing::warn!(
                        principal_id = %principal_id,
                        resource = resource.code(),
                        "Last record deletion refused"
                    );
                }
                decision
            }
            Err(e) => {
                tracing::warn!(
                    resource = resource.code(),
                    error = %e,
                    "Last record check failed, denying"
                );
                LastRecordDecision::deny(0, "Unable to verify remaining records")
            }
        }
    }

    async fn evaluate_last_record(
        &self,
        resource: LastRecordResource,
        scope_id: &uuid::Uuid,
        principal_id: &PrincipalId,
    ) -> AuthResult<LastRecordDecision> {
        let count = self.repo.count_active_records(resource, scope_id).await?;
        if count != 1 {
            return Ok(LastRecordDecision::allow(count));
        }

        let overrides = self
            .active_principal(principal_id)
            .await?
            .is_some_and(|p| p.roles.holds(&self.settings.override_role));
        if overrides {
            Ok(LastRecordDecision::allow(count))
        } else {
            Ok(LastRecordDecision::deny(
                count,
                format!(
                    "Cannot delete the last remaining {}. At least one must remain.",
                    resource.label()
                ),
            ))
        }
    }

    /// Drop cached decisions for one principal, or all of them
    pub async fn invalidate(&self, principal_id: Option<&PrincipalId>) -> AuthResult<()> {
        match principal_id {
            Some(id) => {
                let removed = self.cache.remove_prefix(&format!("{}:", id)).await?;
                tracing::debug!(principal_id = %id, removed, "Permission cache invalidated");
            }
            None => {
                self.cache.clear().await?;
                tracing::info!("Permission cache cleared");
            }
        }
        Ok(())
    }
}
