use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use tandem_db::Database;
use tandem_types::models::{AccessDecision, EntitlementSnapshot};

/// Access level that grants a couple subscription access.
pub const PREMIUM_TIER: &str = "premium";

#[derive(Debug, Clone)]
pub struct Entitlement {
    pub tier: String,
    pub is_active: bool,
}

/// The external subscription collaborator. Its identity context is stateful
/// per process: `current_entitlement` answers for whichever ref was last
/// switched to.
#[async_trait]
pub trait EntitlementProvider: Send + Sync {
    async fn switch_identity(&self, entitlement_ref: &str) -> Result<()>;
    async fn current_entitlement(&self) -> Result<Entitlement>;
}

/// Determines whether a couple has subscription access by inspecting both
/// members' entitlement refs.
///
/// Checking the partner's ref requires switching the provider's identity
/// context; the caller's own context is restored on every exit path, and an
/// async mutex keeps concurrent checks from interleaving switch/restore
/// windows on the shared context.
pub struct EntitlementResolver {
    db: Arc<Database>,
    provider: Arc<dyn EntitlementProvider>,
    context_lock: Mutex<()>,
}

enum Resolution {
    Resolved { any_active: bool },
    NoneResolved,
}

impl EntitlementResolver {
    pub fn new(db: Arc<Database>, provider: Arc<dyn EntitlementProvider>) -> Self {
        Self {
            db,
            provider,
            context_lock: Mutex::new(()),
        }
    }

    /// Subscription access for the account's couple: granted when either
    /// bound entitlement ref reports an active premium tier.
    ///
    /// A single ref failing to resolve is non-fatal; only total resolution
    /// failure yields `Indeterminate`. Record-store errors propagate as
    /// transient I/O for the caller to retry.
    pub async fn has_access(&self, account: Uuid) -> Result<AccessDecision> {
        let db = self.db.clone();
        let row = tokio::task::spawn_blocking(move || db.active_couple_for(account)).await??;
        let Some(row) = row else {
            return Ok(AccessDecision::Unpaired);
        };
        let couple = row.into_model()?;

        let own_ref = couple
            .entitlement_ref_of(account)
            .map(str::to_string)
            // An unbound caller still has an identity of their own to
            // restore: the account-keyed profile.
            .unwrap_or_else(|| account.to_string());
        let partner_ref = couple
            .partner_of(account)
            .and_then(|p| couple.entitlement_ref_of(p))
            .map(str::to_string);

        let mut refs: Vec<String> = Vec::new();
        if couple.entitlement_ref_of(account).is_some() {
            refs.push(own_ref.clone());
        }
        if let Some(r) = partner_ref {
            refs.push(r);
        }

        if refs.is_empty() {
            // Neither slot bound: confirmed not subscribed, nothing to check.
            return Ok(AccessDecision::Denied(EntitlementSnapshot {
                couple_id: couple.id,
                either_member_active: false,
                checked_at: Utc::now(),
            }));
        }

        let _ctx = self.context_lock.lock().await;
        let resolution = self.resolve_refs(&refs).await;

        // Restore the caller's own identity context on every exit path.
        if let Err(e) = self.provider.switch_identity(&own_ref).await {
            warn!("Failed to restore identity context for {}: {}", account, e);
        }
        drop(_ctx);

        match resolution {
            Resolution::Resolved { any_active } => {
                let snapshot = EntitlementSnapshot {
                    couple_id: couple.id,
                    either_member_active: any_active,
                    checked_at: Utc::now(),
                };
                if any_active {
                    Ok(AccessDecision::Granted(snapshot))
                } else {
                    Ok(AccessDecision::Denied(snapshot))
                }
            }
            Resolution::NoneResolved => Ok(AccessDecision::Indeterminate),
        }
    }

    async fn resolve_refs(&self, refs: &[String]) -> Resolution {
        let mut resolved = 0usize;
        let mut any_active = false;

        for entitlement_ref in refs {
            match self.check_one(entitlement_ref).await {
                Ok(entitlement) => {
                    resolved += 1;
                    if entitlement.is_active && entitlement.tier == PREMIUM_TIER {
                        any_active = true;
                    }
                }
                Err(e) => {
                    warn!("Entitlement ref {} failed to resolve: {}", entitlement_ref, e);
                }
            }
        }

        if resolved == 0 {
            Resolution::NoneResolved
        } else {
            Resolution::Resolved { any_active }
        }
    }

    async fn check_one(&self, entitlement_ref: &str) -> Result<Entitlement> {
        self.provider.switch_identity(entitlement_ref).await?;
        self.provider.current_entitlement().await
    }
}
