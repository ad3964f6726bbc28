use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reportd_core::OrgId;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Render slots of one organization.
///
/// One semaphore per org for the life of the process. A limit change
/// resizes it in place: a raise adds permits, a cut forgets free permits
/// and records the rest as `debt`, paid off by permits as they are released.
struct OrgSlots {
    capacity: u32,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    debt: Arc<AtomicUsize>,
}

impl OrgSlots {
    fn new(capacity: u32) -> Self {
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            debt: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn resize(&mut self, capacity: u32) {
        let old = self.capacity as usize;
        let new = capacity as usize;
        if new > old {
            let grow = new - old;
            let repaid = take_up_to(&self.debt, grow);
            self.semaphore.add_permits(grow - repaid);
        } else if new < old {
            let shrink = old - new;
            let forgotten = self.semaphore.forget_permits(shrink);
            self.debt.fetch_add(shrink - forgotten, Ordering::SeqCst);
        }
        self.capacity = capacity;
    }
}

/// Subtract up to `n` from `counter`, returning how much was taken.
fn take_up_to(counter: &AtomicUsize, n: usize) -> usize {
    match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v - v.min(n))) {
        Ok(prev) => prev.min(n),
        Err(_) => 0,
    }
}

/// The wait for a render slot ran out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no render slot for org {org_id} within {waited:?} ({capacity} concurrent renders allowed)")]
pub struct GateTimeout {
    pub org_id: OrgId,
    pub capacity: u32,
    pub waited: Duration,
}

/// Caps concurrent renders per organization.
///
/// Each organization gets its own FIFO semaphore sized from its
/// `max_concurrent_renders` limit, so one tenant's backlog never holds
/// another tenant's slots. Lowering the limit never revokes a held slot,
/// but no new slot is handed out until the org is back under the new limit.
pub struct ConcurrencyGate {
    orgs: DashMap<OrgId, OrgSlots>,
    timeout: Duration,
}

/// A held render slot. Dropping it frees the slot, unless the org's limit
/// was cut while it was held.
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    in_flight: Arc<AtomicUsize>,
    debt: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(permit) = self.permit.take() {
            if take_up_to(&self.debt, 1) == 1 {
                permit.forget();
            }
        }
    }
}

impl ConcurrencyGate {
    /// `timeout` bounds how long [`acquire`](Self::acquire) waits.
    pub fn new(timeout: Duration) -> Self {
        Self {
            orgs: DashMap::new(),
            timeout,
        }
    }

    fn slots(&self, org_id: OrgId, capacity: u32) -> (Arc<Semaphore>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let capacity = capacity.max(1);
        let mut entry = self
            .orgs
            .entry(org_id)
            .or_insert_with(|| OrgSlots::new(capacity));
        if entry.capacity != capacity {
            info!(org_id, from = entry.capacity, to = capacity, "render slot limit changed");
            entry.resize(capacity);
        }
        (
            entry.semaphore.clone(),
            entry.in_flight.clone(),
            entry.debt.clone(),
        )
    }

    /// Wait (FIFO) for a render slot of `org_id`, whose limit is `capacity`.
    pub async fn acquire(&self, org_id: OrgId, capacity: u32) -> Result<GatePermit, GateTimeout> {
        let (semaphore, in_flight, debt) = self.slots(org_id, capacity);
        let timed_out = || GateTimeout {
            org_id,
            capacity,
            waited: self.timeout,
        };

        let permit = match tokio::time::timeout(self.timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed; treat it like exhaustion anyway.
            Ok(Err(_)) | Err(_) => return Err(timed_out()),
        };
        let now_running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(org_id, in_flight = now_running, capacity, "render slot acquired");
        Ok(GatePermit {
            permit: Some(permit),
            in_flight,
            debt,
        })
    }

    /// Renders currently holding a slot for `org_id`.
    pub fn in_flight(&self, org_id: OrgId) -> usize {
        self.orgs
            .get(&org_id)
            .map(|s| s.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// In-flight renders per organization, for health reporting.
    pub fn snapshot(&self) -> BTreeMap<OrgId, usize> {
        self.orgs
            .iter()
            .map(|e| (*e.key(), e.in_flight.load(Ordering::SeqCst)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bound_holds_under_load() {
        let gate = Arc::new(ConcurrencyGate::new(Duration::from_secs(5)));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..20 {
            let gate = gate.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = gate.acquire(7, 3).await.unwrap();
                peak.fetch_max(gate.in_flight(7), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(gate.in_flight(7), 0);
    }

    #[tokio::test]
    async fn orgs_do_not_share_slots() {
        let gate = ConcurrencyGate::new(Duration::from_millis(50));
        let _a = gate.acquire(1, 1).await.unwrap();
        // Org 1 is saturated, org 2 is not.
        assert!(gate.acquire(2, 1).await.is_ok());
        let err = gate.acquire(1, 1).await.err().unwrap();
        assert_eq!(err.org_id, 1);
        assert_eq!(err.capacity, 1);
    }

    #[tokio::test]
    async fn dropping_permit_frees_slot() {
        let gate = ConcurrencyGate::new(Duration::from_millis(50));
        let permit = gate.acquire(1, 1).await.unwrap();
        assert_eq!(gate.snapshot().get(&1), Some(&1));
        drop(permit);
        assert_eq!(gate.in_flight(1), 0);
        assert!(gate.acquire(1, 1).await.is_ok());
    }

    #[tokio::test]
    async fn raising_limit_applies_to_new_acquisitions() {
        let gate = ConcurrencyGate::new(Duration::from_millis(50));
        let _first = gate.acquire(1, 1).await.unwrap();
        assert!(gate.acquire(1, 1).await.is_err());
        let _second = gate.acquire(1, 2).await.unwrap();
        assert_eq!(gate.in_flight(1), 2);
    }

    #[tokio::test]
    async fn raising_limit_with_held_slots_stays_bounded() {
        let gate = ConcurrencyGate::new(Duration::from_millis(30));
        let _a = gate.acquire(1, 2).await.unwrap();
        let _b = gate.acquire(1, 2).await.unwrap();

        let mut extra = Vec::new();
        for _ in 0..5 {
            if let Ok(p) = gate.acquire(1, 3).await {
                extra.push(p);
            }
        }
        assert_eq!(extra.len(), 1);
        assert_eq!(gate.in_flight(1), 3);
    }

    #[tokio::test]
    async fn cutting_limit_waits_for_held_slots_to_drain() {
        let gate = ConcurrencyGate::new(Duration::from_millis(30));
        let a = gate.acquire(1, 3).await.unwrap();
        let b = gate.acquire(1, 3).await.unwrap();
        let c = gate.acquire(1, 3).await.unwrap();

        assert!(gate.acquire(1, 1).await.is_err());
        drop(a);
        assert!(gate.acquire(1, 1).await.is_err());
        drop(b);
        assert!(gate.acquire(1, 1).await.is_err());
        drop(c);

        let d = gate.acquire(1, 1).await.unwrap();
        assert_eq!(gate.in_flight(1), 1);
        assert!(gate.acquire(1, 1).await.is_err());
        drop(d);
        assert!(gate.acquire(1, 1).await.is_ok());
    }

    #[tokio::test]
    async fn alternating_limits_never_exceed_the_larger_one() {
        let gate = ConcurrencyGate::new(Duration::from_millis(20));
        let mut held = Vec::new();
        for i in 0..6 {
            let capacity = if i % 2 == 0 { 1 } else { 2 };
            if let Ok(p) = gate.acquire(9, capacity).await {
                held.push(p);
            }
            assert!(gate.in_flight(9) <= 2, "in flight: {}", gate.in_flight(9));
        }
        assert_eq!(held.len(), 2);

        // Back at limit 1 with two held: both must drain before a new slot.
        held.pop();
        assert!(gate.acquire(9, 1).await.is_err());
        held.pop();
        assert!(gate.acquire(9, 1).await.is_ok());
    }
}
