//! Identity consolidation: match, merge, extend, and assemble a cluster view.

use std::future::Future;

use tracing::{debug, info, instrument, warn};

use contactlink_shared::{
    Contact, ContactDraft, ContactId, ContactLinkError, EngineConfig, IdentifyRequest,
    IdentityView, Result,
};
use contactlink_storage::{ContactStore, MergeOutcome};

use crate::locks::IdentifierLocks;
use crate::view;

/// Resolves identify requests against a [`ContactStore`].
pub struct Engine<S> {
    store: S,
    locks: IdentifierLocks,
    config: EngineConfig,
}

impl<S: ContactStore> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            locks: IdentifierLocks::new(config.lock_shards),
            store,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve a request to its canonical identity, persisting any new linkage.
    ///
    /// Attempts that lose a merge race are restarted from the match step; once
    /// `merge_retries` attempts have conflicted the error surfaces as
    /// `StorageUnavailable`.
    #[instrument(
        skip_all,
        fields(
            has_email = request.email.is_some(),
            has_phone = request.phone_number.is_some(),
        )
    )]
    pub async fn resolve(&self, request: &IdentifyRequest) -> Result<IdentityView> {
        let request = request.normalized()?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let guard = self.locks.acquire(&request).await;
            let result = self.resolve_once(&request).await;
            drop(guard);

            match result {
                Err(e) if e.is_retryable() => {
                    if attempt >= self.config.merge_retries {
                        warn!(attempt, error = %e, "merge conflicts exhausted retries");
                        return Err(ContactLinkError::StorageUnavailable(format!(
                            "merge did not settle after {attempt} attempts: {e}"
                        )));
                    }
                    warn!(attempt, error = %e, "merge conflict, re-reading cluster");
                }
                other => return other,
            }
        }
    }

    /// Canonical view of an existing cluster without writing anything.
    #[instrument(skip(self))]
    pub async fn view(&self, primary_id: ContactId) -> Result<IdentityView> {
        let cluster = self
            .call("find_by_primary", self.store.find_by_primary(primary_id))
            .await?;
        let primary = cluster
            .iter()
            .find(|c| c.id == primary_id && c.is_primary())
            .ok_or_else(|| {
                ContactLinkError::validation(format!("contact {primary_id} is not a live primary"))
            })?;
        Ok(view::assemble(primary, &cluster))
    }

    /// One pass of the algorithm; callers hold the identifier locks.
    async fn resolve_once(&self, request: &IdentifyRequest) -> Result<IdentityView> {
        let email = request.email.as_deref();
        let phone = request.phone_number.as_deref();

        let matches = self
            .call(
                "find_by_identifiers",
                self.store.find_by_identifiers(email, phone),
            )
            .await?;
        debug!(matched = matches.len(), "matched existing contacts");

        let mut primaries = self.primaries_of(&matches).await?;
        if primaries.is_empty() {
            return self.create_primary(request).await;
        }

        primaries.sort_by_key(Contact::age_key);
        let survivor = primaries.remove(0);
        if !primaries.is_empty() {
            self.merge(&survivor, &primaries).await?;
        }

        let mut cluster = self
            .call("find_by_primary", self.store.find_by_primary(survivor.id))
            .await?;
        let primary = cluster
            .iter()
            .find(|c| c.id == survivor.id && c.is_primary())
            .cloned()
            .ok_or_else(|| {
                ContactLinkError::MergeConflict(format!(
                    "primary {} changed while expanding its cluster",
                    survivor.id
                ))
            })?;

        let email_is_new =
            email.is_some_and(|e| !cluster.iter().any(|c| c.email.as_deref() == Some(e)));
        let phone_is_new = phone
            .is_some_and(|p| !cluster.iter().any(|c| c.phone_number.as_deref() == Some(p)));

        if email_is_new || phone_is_new {
            // The field that already matched stays empty on the new record.
            let draft = ContactDraft::secondary(
                primary.id,
                email.filter(|_| email_is_new).map(String::from),
                phone.filter(|_| phone_is_new).map(String::from),
            );
            let secondary = self.call("insert", self.store.insert(draft)).await?;
            info!(
                contact_id = %secondary.id,
                primary_id = %primary.id,
                "linked new secondary contact"
            );
            cluster.push(secondary);
        } else {
            debug!(primary_id = %primary.id, "request carries no new information");
        }

        Ok(view::assemble(&primary, &cluster))
    }

    /// Distinct live primaries referenced by `matches`, directly or through
    /// a secondary's link.
    async fn primaries_of(&self, matches: &[Contact]) -> Result<Vec<Contact>> {
        let mut primaries: Vec<Contact> = Vec::new();

        for contact in matches {
            let primary_id = contact.primary_id()?;
            if primaries.iter().any(|p| p.id == primary_id) {
                continue;
            }

            if contact.is_primary() {
                primaries.push(contact.clone());
                continue;
            }

            let cluster = self
                .call("find_by_primary", self.store.find_by_primary(primary_id))
                .await?;
            match cluster.into_iter().find(|c| c.id == primary_id) {
                Some(primary) if primary.is_primary() => primaries.push(primary),
                // Demoted between our two reads.
                Some(_) => {
                    return Err(ContactLinkError::MergeConflict(format!(
                        "contact {primary_id} was demoted during lookup"
                    )));
                }
                None => {
                    debug!(
                        contact_id = %contact.id,
                        %primary_id,
                        "skipping contact whose primary is deleted"
                    );
                }
            }
        }

        Ok(primaries)
    }

    async fn create_primary(&self, request: &IdentifyRequest) -> Result<IdentityView> {
        let draft = ContactDraft::primary(request.email.clone(), request.phone_number.clone());
        let contact = self.call("insert", self.store.insert(draft)).await?;
        info!(contact_id = %contact.id, "created new primary contact");
        Ok(view::assemble(&contact, std::slice::from_ref(&contact)))
    }

    /// Demote `others` under `survivor`.
    async fn merge(&self, survivor: &Contact, others: &[Contact]) -> Result<()> {
        let old_ids: Vec<ContactId> = others.iter().map(|c| c.id).collect();
        let outcome = self
            .call(
                "demote_and_relink",
                self.store.demote_and_relink(&old_ids, survivor.id),
            )
            .await?;

        match outcome {
            MergeOutcome::Merged => {
                info!(
                    primary_id = %survivor.id,
                    demoted = ?old_ids,
                    "merged primary contacts"
                );
                Ok(())
            }
            MergeOutcome::Conflict => Err(ContactLinkError::MergeConflict(format!(
                "demoting {old_ids:?} under {}",
                survivor.id
            ))),
        }
    }

    /// Run a store call under the configured timeout.
    async fn call<T>(&self, op: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.config.store_timeout.as_millis();
                warn!(op, timeout_ms, "store call timed out");
                Err(ContactLinkError::StorageUnavailable(format!(
                    "{op} timed out after {timeout_ms}ms"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use contactlink_shared::ErrorKind;

    /// Store double whose calls never complete.
    struct HangingStore;

    impl ContactStore for HangingStore {
        async fn find_by_identifiers(
            &self,
            _email: Option<&str>,
            _phone_number: Option<&str>,
        ) -> Result<Vec<Contact>> {
            std::future::pending().await
        }

        async fn find_by_primary(&self, _primary_id: ContactId) -> Result<Vec<Contact>> {
            std::future::pending().await
        }

        async fn insert(&self, _draft: ContactDraft) -> Result<Contact> {
            std::future::pending().await
        }

        async fn demote_and_relink(
            &self,
            _old_primary_ids: &[ContactId],
            _new_primary_id: ContactId,
        ) -> Result<MergeOutcome> {
            std::future::pending().await
        }
    }

    /// Store double that always loses the secondary insert race.
    #[derive(Default)]
    struct ConflictingStore {
        attempts: AtomicUsize,
    }

    impl ConflictingStore {
        fn primary() -> Contact {
            let now = chrono::Utc::now();
            Contact {
                id: ContactId(1),
                email: Some("a@x.com".into()),
                phone_number: None,
                link_precedence: contactlink_shared::LinkPrecedence::Primary,
                linked_id: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            }
        }
    }

    impl ContactStore for ConflictingStore {
        async fn find_by_identifiers(
            &self,
            _email: Option<&str>,
            _phone_number: Option<&str>,
        ) -> Result<Vec<Contact>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Self::primary()])
        }

        async fn find_by_primary(&self, _primary_id: ContactId) -> Result<Vec<Contact>> {
            Ok(vec![Self::primary()])
        }

        async fn insert(&self, _draft: ContactDraft) -> Result<Contact> {
            Err(ContactLinkError::MergeConflict("primary demoted".into()))
        }

        async fn demote_and_relink(
            &self,
            _old_primary_ids: &[ContactId],
            _new_primary_id: ContactId,
        ) -> Result<MergeOutcome> {
            Ok(MergeOutcome::Conflict)
        }
    }

    fn request(email: Option<&str>, phone: Option<&str>) -> IdentifyRequest {
        IdentifyRequest::new(email.map(String::from), phone.map(String::from))
    }

    #[tokio::test]
    async fn empty_request_never_reaches_store() {
        let engine = Engine::new(HangingStore, EngineConfig::default());
        let err = engine.resolve(&request(None, Some("  "))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn hanging_store_times_out() {
        let config = EngineConfig {
            store_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        let engine = Engine::new(HangingStore, config);

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            engine.resolve(&request(Some("a@x.com"), None)),
        )
        .await
        .expect("resolve returns instead of hanging")
        .unwrap_err();
        assert!(matches!(err, ContactLinkError::StorageUnavailable(_)));
        assert!(err.to_string().contains("timed out"));

        // The identifier lock was released on the error path.
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            engine.resolve(&request(Some("a@x.com"), None)),
        )
        .await
        .expect("lock released")
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[tokio::test]
    async fn exhausted_conflicts_surface_as_storage_unavailable() {
        let store = Arc::new(ConflictingStore::default());
        let config = EngineConfig {
            merge_retries: 3,
            ..EngineConfig::default()
        };
        let engine = Engine::new(Arc::clone(&store), config);

        let err = engine
            .resolve(&request(Some("a@x.com"), Some("222")))
            .await
            .unwrap_err();
        assert!(matches!(err, ContactLinkError::StorageUnavailable(_)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }
}
