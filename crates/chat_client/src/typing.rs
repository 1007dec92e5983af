use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use shared::domain::UserId;

/// Who is composing in a room right now.
///
/// An entry lives until an explicit stop signal or until the silence window
/// elapses; the active set is derived at read time and never stored.
#[derive(Debug, Default)]
pub(crate) struct TypingSet {
    last_seen: HashMap<UserId, Instant>,
}

impl TypingSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn apply(&mut self, user: UserId, is_typing: bool, now: Instant) {
        if is_typing {
            self.last_seen.insert(user, now);
        } else {
            self.last_seen.remove(&user);
        }
    }

    pub(crate) fn active_users(&self, now: Instant, expiry: Duration) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) < expiry)
            .map(|(user, _)| user.clone())
            .collect();
        users.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        users
    }

    pub(crate) fn clear(&mut self) {
        self.last_seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPIRY: Duration = Duration::from_secs(3);

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    #[test]
    fn entries_expire_after_the_silence_window() {
        let start = Instant::now();
        let mut typing = TypingSet::new();
        typing.apply(user("u1"), true, start);

        assert_eq!(
            typing.active_users(start + Duration::from_secs(2), EXPIRY),
            vec![user("u1")]
        );
        assert!(typing
            .active_users(start + Duration::from_secs(3), EXPIRY)
            .is_empty());
    }

    #[test]
    fn explicit_stop_clears_immediately() {
        let start = Instant::now();
        let mut typing = TypingSet::new();
        typing.apply(user("u1"), true, start);
        typing.apply(user("u1"), false, start + Duration::from_millis(100));

        assert!(typing
            .active_users(start + Duration::from_millis(200), EXPIRY)
            .is_empty());
    }

    #[test]
    fn several_users_can_type_at_once() {
        let start = Instant::now();
        let mut typing = TypingSet::new();
        typing.apply(user("u2"), true, start);
        typing.apply(user("u1"), true, start + Duration::from_millis(500));

        assert_eq!(
            typing.active_users(start + Duration::from_secs(1), EXPIRY),
            vec![user("u1"), user("u2")]
        );
    }

    #[test]
    fn restarting_keeps_the_entry_fresh() {
        let start = Instant::now();
        let mut typing = TypingSet::new();
        typing.apply(user("u1"), true, start);
        typing.apply(user("u1"), true, start + Duration::from_secs(2));

        assert_eq!(
            typing.active_users(start + Duration::from_secs(4), EXPIRY),
            vec![user("u1")]
        );
    }
}
