//! Admission gate: per-client throttling and job identifier bookkeeping.
//!
//! Both checks run before a job exists, so a rejected request never touches
//! the registry.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use scenecraft_core::{ClientKey, JobId};

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the caller may try again; 0 when allowed.
    pub retry_after_secs: u64,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    fn deny(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs,
        }
    }
}

type Window = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

/// Sliding-window throttle plus the set of live job identifiers.
///
/// Each client's window has its own lock; the outer map lock is only held
/// long enough to find or insert that window.
#[derive(Debug)]
pub struct AdmissionGate {
    limit: usize,
    window: Duration,
    clients: RwLock<HashMap<ClientKey, Window>>,
    active_ids: Mutex<HashSet<JobId>>,
}

impl AdmissionGate {
    /// `limit` requests per client per rolling minute.
    pub fn new(limit: usize) -> Self {
        Self::with_window(limit, Duration::seconds(60))
    }

    pub fn with_window(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            clients: RwLock::new(HashMap::new()),
            active_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record a request from `client` now, or refuse it.
    pub fn allow(&self, client: &ClientKey) -> RateDecision {
        self.allow_at(client, Utc::now())
    }

    /// Same as [`allow`](Self::allow) with an explicit clock reading.
    pub fn allow_at(&self, client: &ClientKey, now: DateTime<Utc>) -> RateDecision {
        let window = self.window_for(client);
        let mut stamps = window.lock();

        let cutoff = now - self.window;
        while stamps.front().is_some_and(|ts| *ts <= cutoff) {
            stamps.pop_front();
        }

        if stamps.len() >= self.limit {
            let oldest = stamps.front().copied().unwrap_or(now);
            let wait_ms = (oldest + self.window - now).num_milliseconds().max(0) as u64;
            let wait_secs = wait_ms.div_ceil(1000).max(1);
            return RateDecision::deny(wait_secs);
        }

        stamps.push_back(now);
        RateDecision::allow()
    }

    fn window_for(&self, client: &ClientKey) -> Window {
        if let Some(w) = self.clients.read().get(client) {
            return w.clone();
        }
        self.clients
            .write()
            .entry(client.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Drop clients whose window holds no live timestamps. Returns how many
    /// records were removed.
    pub fn prune_idle_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|_, w| w.lock().back().is_some_and(|ts| *ts > cutoff));
        before - clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.read().len()
    }

    /// Shape check for externally supplied identifiers.
    pub fn validate_id(&self, token: &str) -> bool {
        JobId::is_well_formed(token)
    }

    /// Mint a fresh random identifier and mark it active.
    pub fn generate_id(&self) -> JobId {
        let mut active = self.active_ids.lock();
        loop {
            let id = JobId::generate();
            if active.insert(id.clone()) {
                return id;
            }
        }
    }

    pub fn exists(&self, id: &JobId) -> bool {
        self.active_ids.lock().contains(id)
    }

    /// Forget an identifier. Returns whether it was active.
    pub fn release(&self, id: &JobId) -> bool {
        self.active_ids.lock().remove(id)
    }

    pub fn active_ids(&self) -> usize {
        self.active_ids.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn fourth_request_in_window_is_refused_then_allowed_after_expiry() {
        let gate = AdmissionGate::new(3);
        let client = ClientKey::new("10.0.0.1");
        let start = t0();

        for i in 0..3 {
            let d = gate.allow_at(&client, start + Duration::seconds(i));
            assert!(d.allowed);
            assert_eq!(d.retry_after_secs, 0);
        }

        let denied = gate.allow_at(&client, start + Duration::seconds(10));
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs > 0);
        assert_eq!(denied.retry_after_secs, 50);

        let later = gate.allow_at(&client, start + Duration::seconds(61));
        assert!(later.allowed);
    }

    #[test]
    fn refused_requests_do_not_extend_the_window() {
        let gate = AdmissionGate::new(1);
        let client = ClientKey::new("a");
        let start = t0();

        assert!(gate.allow_at(&client, start).allowed);
        for s in [5, 20, 59] {
            assert!(!gate.allow_at(&client, start + Duration::seconds(s)).allowed);
        }
        assert!(gate.allow_at(&client, start + Duration::seconds(60)).allowed);
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let gate = AdmissionGate::new(1);
        let client = ClientKey::new("a");
        let start = t0();

        gate.allow_at(&client, start);
        let d = gate.allow_at(&client, start + Duration::milliseconds(59_900));
        assert!(!d.allowed);
        assert_eq!(d.retry_after_secs, 1);
    }

    #[test]
    fn clients_are_throttled_independently() {
        let gate = AdmissionGate::new(1);
        let now = t0();
        assert!(gate.allow_at(&ClientKey::new("a"), now).allowed);
        assert!(gate.allow_at(&ClientKey::new("b"), now).allowed);
        assert!(!gate.allow_at(&ClientKey::new("a"), now).allowed);
    }

    #[test]
    fn idle_clients_are_pruned() {
        let gate = AdmissionGate::new(5);
        let now = t0();
        gate.allow_at(&ClientKey::new("old"), now);
        gate.allow_at(&ClientKey::new("fresh"), now + Duration::seconds(90));
        assert_eq!(gate.tracked_clients(), 2);

        let removed = gate.prune_idle_at(now + Duration::seconds(100));
        assert_eq!(removed, 1);
        assert_eq!(gate.tracked_clients(), 1);
    }

    #[test]
    fn id_lifecycle() {
        let gate = AdmissionGate::new(30);
        let id = gate.generate_id();

        assert!(gate.validate_id(id.as_str()));
        assert!(gate.exists(&id));
        assert!(gate.release(&id));
        assert!(!gate.exists(&id));
        assert!(!gate.release(&id));
    }

    #[test]
    fn validate_id_rejects_malformed_tokens() {
        let gate = AdmissionGate::new(30);
        for token in [
            "job_123",
            "JOB_0123456789abcdef0123456789abcdef",
            "job_0123456789ABCDEF0123456789ABCDEF",
            "job_zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz",
            "job_0123456789abcdef0123456789abcdef00",
        ] {
            assert!(!gate.validate_id(token), "accepted {token}");
        }
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        let gate = Arc::new(AdmissionGate::new(50));
        let client = ClientKey::new("shared");
        let now = t0();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let client = client.clone();
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| gate.allow_at(&client, now).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }
}
