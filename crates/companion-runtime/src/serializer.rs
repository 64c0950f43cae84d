//! Per-user serializer (C9). Admission control guaranteeing at-most-one
//! in-flight chat turn per user_id, partitioned by user so different users
//! proceed in parallel (§4.1), via a per-key `dashmap::DashMap` lock instead
//! of one global mutex.

use std::sync::Arc;
use std::time::{Duration, Instant};

use companion_core::{GatewayError, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

#[derive(Clone)]
pub struct UserSerializer {
    inflight: Arc<DashMap<UserId, (u64, Instant)>>,
    stale_after: Duration,
}

impl UserSerializer {
    pub fn new(stale_after: Duration) -> Self {
        Self { inflight: Arc::new(DashMap::new()), stale_after }
    }

    /// `admit(user_id) → handle | Busy`. A handle already held for
    /// `user_id` older than `stale_after` is reclaimed (crashed-handler
    /// recovery, §4.1) rather than returned as busy. Reclaiming bumps the
    /// slot's generation token so the stale handle's eventual `Drop` (the
    /// original handler unwinding late, not actually crashed) cannot evict
    /// the new handle's slot — it only removes the entry if its own token
    /// is still current.
    pub fn admit(&self, user_id: &UserId) -> Result<SerializerHandle, GatewayError> {
        let token = match self.inflight.entry(user_id.clone()) {
            Entry::Occupied(mut entry) => {
                let (existing_token, started) = *entry.get();
                if started.elapsed() < self.stale_after {
                    return Err(GatewayError::Busy(user_id.clone()));
                }
                warn!(%user_id, "reclaiming stale serializer handle");
                let next_token = existing_token.wrapping_add(1);
                *entry.get_mut() = (next_token, Instant::now());
                next_token
            }
            Entry::Vacant(entry) => {
                entry.insert((0, Instant::now()));
                0
            }
        };
        Ok(SerializerHandle { inflight: Arc::clone(&self.inflight), user_id: user_id.clone(), token })
    }
}

/// Releases its user's slot on drop, so every exit path — return, `?`,
/// panic unwind — releases the handle (§4.1, §5 cancellation).
pub struct SerializerHandle {
    inflight: Arc<DashMap<UserId, (u64, Instant)>>,
    user_id: UserId,
    token: u64,
}

impl Drop for SerializerHandle {
    fn drop(&mut self) {
        self.inflight.remove_if(&self.user_id, |_, (token, _)| *token == self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_admission_for_same_user_is_busy() {
        let serializer = UserSerializer::new(Duration::from_secs(60));
        let user = UserId::new("u1");
        let _first = serializer.admit(&user).unwrap();
        assert!(matches!(serializer.admit(&user), Err(GatewayError::Busy(_))));
    }

    #[test]
    fn different_users_admit_concurrently() {
        let serializer = UserSerializer::new(Duration::from_secs(60));
        let _a = serializer.admit(&UserId::new("u1")).unwrap();
        assert!(serializer.admit(&UserId::new("u2")).is_ok());
    }

    #[test]
    fn dropping_a_handle_frees_the_slot() {
        let serializer = UserSerializer::new(Duration::from_secs(60));
        let user = UserId::new("u1");
        {
            let _handle = serializer.admit(&user).unwrap();
        }
        assert!(serializer.admit(&user).is_ok());
    }

    #[test]
    fn a_stale_handle_is_reclaimed_instead_of_busy() {
        let serializer = UserSerializer::new(Duration::from_millis(1));
        let user = UserId::new("u1");
        let first = serializer.admit(&user).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        // The first handle is still alive (not dropped), but it's stale —
        // a fresh admission reclaims the slot rather than returning Busy.
        assert!(serializer.admit(&user).is_ok());
        drop(first);
    }

    #[test]
    fn a_stale_handle_dropped_late_does_not_evict_the_reclaiming_handle() {
        let serializer = UserSerializer::new(Duration::from_millis(1));
        let user = UserId::new("u1");
        let first = serializer.admit(&user).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let _second = serializer.admit(&user).unwrap();
        // The stale first handle finally unwinds. Its slot was reclaimed
        // under a new generation token, so its drop must not free it.
        drop(first);
        assert!(matches!(serializer.admit(&user), Err(GatewayError::Busy(_))));
    }
}
