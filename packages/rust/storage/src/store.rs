//! The contact store collaborator consumed by the consolidation engine.

use std::future::Future;
use std::sync::Arc;

use contactlink_shared::{Contact, ContactDraft, ContactId, Result};

/// Result of a conditional merge write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Every old primary was demoted and its secondaries re-pointed.
    Merged,
    /// A precondition no longer held; nothing was written.
    Conflict,
}

/// Durable contact storage.
///
/// Every lookup excludes soft-deleted contacts and returns them oldest first,
/// ordered by `(created_at, id)`.
pub trait ContactStore: Send + Sync {
    /// Contacts whose email equals `email` or whose phone equals `phone_number`.
    /// An absent identifier matches nothing.
    fn find_by_identifiers(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Contact>>> + Send;

    /// The primary `primary_id` plus every contact linked to it.
    fn find_by_primary(
        &self,
        primary_id: ContactId,
    ) -> impl Future<Output = Result<Vec<Contact>>> + Send;

    /// Persist a draft, assigning `id` and timestamps.
    ///
    /// A secondary draft is only written while its `linked_id` is still a live
    /// primary; otherwise this fails with `MergeConflict`.
    fn insert(&self, draft: ContactDraft) -> impl Future<Output = Result<Contact>> + Send;

    /// Atomically demote `old_primary_ids` under `new_primary_id` and re-point
    /// their secondaries. Each demotion is conditional on the contact still
    /// being primary; any failed precondition rolls the whole write back.
    fn demote_and_relink(
        &self,
        old_primary_ids: &[ContactId],
        new_primary_id: ContactId,
    ) -> impl Future<Output = Result<MergeOutcome>> + Send;
}

impl<S: ContactStore> ContactStore for Arc<S> {
    fn find_by_identifiers(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Contact>>> + Send {
        (**self).find_by_identifiers(email, phone_number)
    }

    fn find_by_primary(
        &self,
        primary_id: ContactId,
    ) -> impl Future<Output = Result<Vec<Contact>>> + Send {
        (**self).find_by_primary(primary_id)
    }

    fn insert(&self, draft: ContactDraft) -> impl Future<Output = Result<Contact>> + Send {
        (**self).insert(draft)
    }

    fn demote_and_relink(
        &self,
        old_primary_ids: &[ContactId],
        new_primary_id: ContactId,
    ) -> impl Future<Output = Result<MergeOutcome>> + Send {
        (**self).demote_and_relink(old_primary_ids, new_primary_id)
    }
}
