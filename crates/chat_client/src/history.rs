//! Reconciliation of REST-fetched history with live events: one ordered,
//! deduplicated message list per room, whatever the arrival order.

use std::collections::HashSet;

use shared::protocol::ChatMessage;

fn dedup_by_id(messages: &mut Vec<ChatMessage>) {
    let mut seen = HashSet::new();
    messages.retain(|message| seen.insert(message.id.clone()));
}

/// Sort a fetched page ascending by creation time and drop duplicate ids.
pub(crate) fn reconcile_page(mut page: Vec<ChatMessage>) -> Vec<ChatMessage> {
    page.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    dedup_by_id(&mut page);
    page
}

/// Append a live message unless its id is already present (duplicate
/// delivery, e.g. after a reconnect, is dropped). Insertion keeps
/// `created_at` non-decreasing regardless of arrival order. Returns whether
/// the message was inserted.
pub(crate) fn insert_live(messages: &mut Vec<ChatMessage>, incoming: ChatMessage) -> bool {
    if messages.iter().any(|message| message.id == incoming.id) {
        return false;
    }
    let at = messages.partition_point(|message| message.created_at <= incoming.created_at);
    messages.insert(at, incoming);
    true
}

/// A server-initiated resync is authoritative: replace the list wholesale.
pub(crate) fn replace_all(messages: &mut Vec<ChatMessage>, history: Vec<ChatMessage>) {
    *messages = reconcile_page(history);
}

/// Merge an older page in front of what is already loaded.
pub(crate) fn prepend_page(messages: &mut Vec<ChatMessage>, page: Vec<ChatMessage>) {
    let mut combined = page;
    combined.append(messages);
    *messages = reconcile_page(combined);
}
