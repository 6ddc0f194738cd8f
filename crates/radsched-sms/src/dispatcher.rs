// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use radsched_identity::{last_four, sticky_index};
use radsched_store::{AuditEntry, AuditSink, ConsentStore, Direction, MessageTag, StoreError, Tenant};

use crate::{SendOutcome, SmsProvider, StandardError};

/// Sticky-sender cache capacity. Loss is harmless; selection recomputes
/// deterministically from the phone hash.
const STICKY_CACHE_SIZE: usize = 16_384;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Latest consent row is a revocation; nothing was sent.
    #[error("consent revoked for this phone")]
    Revoked,

    #[error("tenant references unknown or disabled provider: {0}")]
    UnknownProvider(String),

    #[error("tenant has no from-numbers configured")]
    NoFromNumber,

    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The message could not be sent and failover does not apply or also
    /// failed. The session layer cancels on this.
    #[error("send failed terminally: {code:?}: {message}")]
    Final {
        code: StandardError,
        message: String,
    },
}

/// Successful dispatch result.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub outcome: SendOutcome,
    pub from_number: String,
    /// True when the failover provider carried the message.
    pub failover: bool,
}

/// One send for a tenant.
#[derive(Debug, Clone)]
pub struct SendRequest<'a> {
    pub tenant: &'a Tenant,
    /// Decrypted E.164 recipient. Exists only for the duration of the call.
    pub to_phone: &'a str,
    pub phone_hash: &'a str,
    pub body: &'a str,
    pub tag: MessageTag,
    pub from_override: Option<&'a str>,
    /// Permit sending to a revoked phone. Only the revocation
    /// acknowledgment itself sets this.
    pub allow_revoked: bool,
}

/// The dispatcher: provider registry, sticky sender, failover, audit.
pub struct SmsDispatcher {
    providers: HashMap<String, Arc<dyn SmsProvider>>,
    consent: Arc<dyn ConsentStore>,
    audit: Arc<dyn AuditSink>,
    sticky_cache: Mutex<LruCache<(Uuid, String), String>>,
    send_deadline: Duration,
}

impl SmsDispatcher {
    pub fn new(
        providers: Vec<Arc<dyn SmsProvider>>,
        consent: Arc<dyn ConsentStore>,
        audit: Arc<dyn AuditSink>,
        send_deadline: Duration,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self {
            providers,
            consent,
            audit,
            sticky_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(STICKY_CACHE_SIZE).expect("nonzero cache size"),
            )),
            send_deadline,
        }
    }

    /// Send exactly one SMS.
    ///
    /// Every attempt (primary and failover) appends one audit row before
    /// this returns. Recipient-class failures and exhausted failover come
    /// back as [`DispatchError::Final`]; the caller stops messaging this
    /// session.
    pub async fn dispatch(&self, req: SendRequest<'_>) -> Result<DispatchOutcome, DispatchError> {
        if !req.allow_revoked && self.consent.is_revoked(req.tenant.id, req.phone_hash).await? {
            debug!(tenant = %req.tenant.slug, "refusing send to revoked phone");
            return Err(DispatchError::Revoked);
        }

        let from = match req.from_override {
            Some(f) => f.to_string(),
            None => self
                .select_from(
                    req.tenant.id,
                    "primary",
                    &req.tenant.sms.from_numbers,
                    req.phone_hash,
                )
                .ok_or(DispatchError::NoFromNumber)?,
        };

        let primary = self.provider(&req.tenant.sms.primary_provider)?;
        let outcome = self.attempt(primary.as_ref(), &req, &from).await;

        if !outcome.is_failure() {
            return Ok(DispatchOutcome {
                outcome,
                from_number: from,
                failover: false,
            });
        }

        let code = outcome.error_code.unwrap_or(StandardError::Unknown);
        if !code.is_failover_eligible() {
            return Err(DispatchError::Final {
                code,
                message: outcome.error_message.unwrap_or_default(),
            });
        }

        // Carrier-class failure: exactly one attempt on the failover
        // provider with a failover from-number.
        let Some(failover_name) = req.tenant.sms.failover_provider.as_deref() else {
            return Err(DispatchError::Final {
                code,
                message: outcome.error_message.unwrap_or_default(),
            });
        };
        let failover = self.provider(failover_name)?;
        let failover_from = self
            .select_from(
                req.tenant.id,
                "failover",
                &req.tenant.sms.failover_from_numbers,
                req.phone_hash,
            )
            .ok_or(DispatchError::NoFromNumber)?;

        warn!(
            tenant = %req.tenant.slug,
            code = code.as_str(),
            "primary send failed, attempting failover via {failover_name}"
        );
        let second = self.attempt(failover.as_ref(), &req, &failover_from).await;

        if second.is_failure() {
            let code = second.error_code.unwrap_or(StandardError::Unknown);
            return Err(DispatchError::Final {
                code,
                message: second.error_message.unwrap_or_default(),
            });
        }
        Ok(DispatchOutcome {
            outcome: second,
            from_number: failover_from,
            failover: true,
        })
    }

    /// One provider attempt plus its audit row.
    async fn attempt(
        &self,
        provider: &dyn SmsProvider,
        req: &SendRequest<'_>,
        from: &str,
    ) -> SendOutcome {
        let outcome = match tokio::time::timeout(
            self.send_deadline,
            provider.send(req.to_phone, req.body, from),
        )
        .await
        {
            Ok(o) => o,
            Err(_) => SendOutcome::failed(
                provider.name(),
                StandardError::NetworkError,
                format!("send deadline {}s exceeded", self.send_deadline.as_secs()),
            ),
        };

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            tenant_id: req.tenant.id,
            phone_hash: req.phone_hash.to_string(),
            phone_last_four: last_four(req.to_phone),
            direction: Direction::Outbound,
            message_tag: req.tag,
            from_number: Some(from.to_string()),
            provider: Some(outcome.provider.clone()),
            provider_message_id: outcome.provider_message_id.clone(),
            success: !outcome.is_failure(),
            error_code: outcome.error_code.map(|c| c.as_str().to_string()),
            at: Utc::now(),
        };
        // The audit row must exist even if the backend hiccups; a lost
        // attempt record is worse than a failed send.
        if let Err(e) = self.audit.append_audit(entry).await {
            warn!("audit append failed: {e}");
        }
        outcome
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn SmsProvider>, DispatchError> {
        self.providers
            .get(name)
            .filter(|p| p.is_enabled())
            .cloned()
            .ok_or_else(|| DispatchError::UnknownProvider(name.to_string()))
    }

    /// Sticky from-number selection.
    ///
    /// Pools of one skip selection entirely. Larger pools hash the phone
    /// hash to an index; the choice is cached per (tenant, pool, phone)
    /// and recomputed when the cached number has left the pool.
    fn select_from(
        &self,
        tenant_id: Uuid,
        pool_tag: &str,
        pool: &[String],
        phone_hash: &str,
    ) -> Option<String> {
        match pool {
            [] => None,
            [single] => Some(single.clone()),
            _ => {
                let key = (tenant_id, format!("{pool_tag}:{phone_hash}"));
                let mut cache = self.sticky_cache.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(cached) = cache.get(&key) {
                    if pool.contains(cached) {
                        return Some(cached.clone());
                    }
                }
                let chosen = pool[sticky_index(phone_hash, pool.len())].clone();
                cache.put(key, chosen.clone());
                Some(chosen)
            }
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
