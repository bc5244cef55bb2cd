//! Canonical identity view assembly.

use std::collections::HashSet;

use contactlink_shared::{Contact, IdentityView};

/// Insertion-ordered set of strings.
#[derive(Debug, Default)]
struct OrderedSet {
    items: Vec<String>,
    seen: HashSet<String>,
}

impl OrderedSet {
    fn insert(&mut self, value: &str) {
        if self.seen.insert(value.to_string()) {
            self.items.push(value.to_string());
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.items
    }
}

/// Build the view for `primary` and its cluster (oldest first).
///
/// The primary's own email and phone lead their lists; every other distinct
/// value follows in first-seen order.
pub fn assemble(primary: &Contact, cluster: &[Contact]) -> IdentityView {
    let mut emails = OrderedSet::default();
    let mut phone_numbers = OrderedSet::default();

    if let Some(email) = &primary.email {
        emails.insert(email);
    }
    if let Some(phone) = &primary.phone_number {
        phone_numbers.insert(phone);
    }

    let mut secondary_contact_ids = Vec::new();
    for contact in cluster {
        if let Some(email) = &contact.email {
            emails.insert(email);
        }
        if let Some(phone) = &contact.phone_number {
            phone_numbers.insert(phone);
        }
        if !contact.is_primary() {
            secondary_contact_ids.push(contact.id);
        }
    }

    IdentityView {
        primary_contact_id: primary.id,
        emails: emails.into_vec(),
        phone_numbers: phone_numbers.into_vec(),
        secondary_contact_ids,
    }
}
