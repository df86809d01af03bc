//! Admission control for in-flight work.
//!
//! Two independent bounded pools gate work before it starts: one for all
//! extraction requests and one for concurrent OCR provider calls. A slot is
//! held as a [`Lease`]; dropping the lease returns the slot, so every exit path
//! (including cancellation of the owning task) releases it exactly once.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Which bounded pool ran out of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("Server at capacity, try again later")]
    Requests,

    #[error("OCR capacity reached, try again later")]
    Ocr,
}

/// Pool a lease was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Requests,
    Ocr,
}

impl PoolKind {
    fn exhausted(self) -> CapacityError {
        match self {
            PoolKind::Requests => CapacityError::Requests,
            PoolKind::Ocr => CapacityError::Ocr,
        }
    }
}

/// An acquired slot. Released when dropped.
#[derive(Debug)]
pub struct Lease {
    kind: PoolKind,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    pub fn kind(&self) -> PoolKind {
        self.kind
    }
}

#[derive(Debug)]
struct Pool {
    kind: PoolKind,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl Pool {
    fn new(kind: PoolKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    async fn acquire(&self, wait: Duration) -> Result<Lease, CapacityError> {
        let permit = if wait.is_zero() {
            self.semaphore
                .clone()
                .try_acquire_owned()
                .map_err(|_| self.kind.exhausted())?
        } else {
            match tokio::time::timeout(wait, self.semaphore.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                // Timed out, or the semaphore was closed.
                _ => return Err(self.kind.exhausted()),
            }
        };

        Ok(Lease {
            kind: self.kind,
            _permit: permit,
        })
    }

    fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

/// Request and OCR concurrency pools.
#[derive(Debug)]
pub struct AdmissionController {
    requests: Pool,
    ocr: Pool,
}

impl AdmissionController {
    /// Create pools with the given capacities. Zero capacities are raised to one.
    pub fn new(max_requests: usize, max_ocr: usize) -> Self {
        Self {
            requests: Pool::new(PoolKind::Requests, max_requests.max(1)),
            ocr: Pool::new(PoolKind::Ocr, max_ocr.max(1)),
        }
    }

    /// Take a request slot, waiting at most `wait` (zero fails fast).
    pub async fn acquire_request_slot(&self, wait: Duration) -> Result<Lease, CapacityError> {
        self.requests.acquire(wait).await
    }

    /// Take an OCR slot, waiting at most `wait` (zero fails fast).
    pub async fn acquire_ocr_slot(&self, wait: Duration) -> Result<Lease, CapacityError> {
        self.ocr.acquire(wait).await
    }

    /// Return a slot to its pool.
    pub fn release(&self, lease: Lease) {
        drop(lease);
    }

    pub fn in_flight_requests(&self) -> usize {
        self.requests.in_flight()
    }

    pub fn in_flight_ocr(&self) -> usize {
        self.ocr.in_flight()
    }

    pub fn max_requests(&self) -> usize {
        self.requests.capacity
    }

    pub fn max_ocr(&self) -> usize {
        self.ocr.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_saturated_pool_fails_fast() {
        let ctl = AdmissionController::new(2, 1);
        let a = ctl.acquire_request_slot(Duration::ZERO).await.unwrap();
        let _b = ctl.acquire_request_slot(Duration::ZERO).await.unwrap();
        assert_eq!(ctl.in_flight_requests(), 2);

        let err = ctl.acquire_request_slot(Duration::ZERO).await.unwrap_err();
        assert_eq!(err, CapacityError::Requests);

        ctl.release(a);
        assert_eq!(ctl.in_flight_requests(), 1);
        let _c = ctl.acquire_request_slot(Duration::ZERO).await.unwrap();
        assert!(ctl.acquire_request_slot(Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn test_pools_are_independent() {
        let ctl = AdmissionController::new(1, 1);
        let _req = ctl.acquire_request_slot(Duration::ZERO).await.unwrap();
        let ocr = ctl.acquire_ocr_slot(Duration::ZERO).await.unwrap();
        assert_eq!(ocr.kind(), PoolKind::Ocr);

        let err = ctl.acquire_ocr_slot(Duration::ZERO).await.unwrap_err();
        assert_eq!(err, CapacityError::Ocr);
        assert_eq!(ctl.in_flight_requests(), 1);
        assert_eq!(ctl.in_flight_ocr(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_slot() {
        let ctl = AdmissionController::new(1, 1);
        {
            let _lease = ctl.acquire_ocr_slot(Duration::ZERO).await.unwrap();
            assert_eq!(ctl.in_flight_ocr(), 1);
        }
        assert_eq!(ctl.in_flight_ocr(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let ctl = AdmissionController::new(1, 1);
        let _held = ctl.acquire_request_slot(Duration::ZERO).await.unwrap();
        let err = ctl
            .acquire_request_slot(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, CapacityError::Requests);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_succeeds_when_slot_freed() {
        let ctl = Arc::new(AdmissionController::new(1, 1));
        let held = ctl.acquire_request_slot(Duration::ZERO).await.unwrap();

        let waiter = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.acquire_request_slot(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctl.release(held);

        let lease = waiter.await.unwrap().unwrap();
        assert_eq!(lease.kind(), PoolKind::Requests);
        assert_eq!(ctl.in_flight_requests(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_releases_slot() {
        let ctl = Arc::new(AdmissionController::new(1, 1));
        let task = {
            let ctl = ctl.clone();
            tokio::spawn(async move {
                let _lease = ctl.acquire_request_slot(Duration::ZERO).await.unwrap();
                std::future::pending::<()>().await;
            })
        };
        while ctl.in_flight_requests() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert_eq!(ctl.in_flight_requests(), 0);
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let ctl = AdmissionController::new(0, 0);
        assert_eq!(ctl.max_requests(), 1);
        assert_eq!(ctl.max_ocr(), 1);
    }
}
