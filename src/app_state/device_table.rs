/// Device session table: per-device bridge bookkeeping
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::SessionHandle;

/// Tells a reader task to stop. One-way: once raised it stays raised for the
/// lifetime of the session that armed it.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(CancellationToken);

impl StopFlag {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    pub fn raise(&self) {
        self.0.cancel();
    }

    pub fn is_raised(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the flag is raised
    pub async fn raised(&self) {
        self.0.cancelled().await
    }
}

/// Diagnostic state of a device's reader task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderState {
    Idle,
    Running,
}

/// Whether a reader task is alive on a device, plus the completion signal
/// raised when it ends.
///
/// Lives outside the table lock so a finishing reader can report without
/// waiting on it.
#[derive(Debug, Default)]
pub struct ReaderStatus {
    running: AtomicBool,
    finished: Notify,
}

impl ReaderStatus {
    pub fn state(&self) -> ReaderState {
        if self.running.load(Ordering::SeqCst) {
            ReaderState::Running
        } else {
            ReaderState::Idle
        }
    }

    /// Mark a reader as running. Dropping the guard marks it idle again,
    /// whichever way the reader ends.
    pub fn start(self: &Arc<Self>) -> ReaderGuard {
        self.running.store(true, Ordering::SeqCst);
        ReaderGuard {
            status: self.clone(),
        }
    }

    /// Wait until no reader runs, at most `timeout`. Returns whether the
    /// reader is idle at the end of the wait.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let finished = self.finished.notified();
            if self.state() == ReaderState::Idle {
                return true;
            }
            if tokio::time::timeout_at(deadline, finished).await.is_err() {
                return self.state() == ReaderState::Idle;
            }
        }
    }
}

/// Completion signal of one reader run
#[derive(Debug)]
pub struct ReaderGuard {
    status: Arc<ReaderStatus>,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.status.running.store(false, Ordering::SeqCst);
        self.status.finished.notify_waiters();
    }
}

/// Bookkeeping for one physical device
#[derive(Debug, Default)]
struct DeviceSlot {
    /// Session currently bridged onto the device
    owner: Option<SessionHandle>,
    /// Abort handle of the running reader task
    reader: Option<AbortHandle>,
    /// Stop request for the reader of the current session
    terminating: StopFlag,
}

/// Snapshot of a slot for diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    pub device: usize,
    pub owner: Option<String>,
    pub reader: ReaderState,
    pub terminating: bool,
}

/// Fixed-size table of device slots behind one lock.
///
/// The lock is only held for the bookkeeping itself, never across device or
/// network I/O.
#[derive(Debug)]
pub struct DeviceTable {
    slots: Mutex<Vec<DeviceSlot>>,
    readers: Vec<Arc<ReaderStatus>>,
}

impl DeviceTable {
    /// Create a table with every slot free and idle
    pub fn new(device_count: usize) -> Self {
        Self {
            slots: Mutex::new((0..device_count).map(|_| DeviceSlot::default()).collect()),
            readers: (0..device_count)
                .map(|_| Arc::new(ReaderStatus::default()))
                .collect(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.readers.len()
    }

    /// Claim a free slot for `owner`. Returns false when the device is
    /// already owned or does not exist. A successful claim arms a fresh stop
    /// flag for the new session.
    pub async fn try_claim(&self, device: usize, owner: SessionHandle) -> bool {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get_mut(device) else {
            return false;
        };
        if let Some(current) = &slot.owner {
            debug!(
                "Device {} claim by {} refused, owned by {}",
                device, owner.id, current.id
            );
            return false;
        }
        info!("Device {} claimed by session {}", device, owner.id);
        slot.owner = Some(owner);
        slot.terminating = StopFlag::new();
        true
    }

    /// Free a slot owned by `owner_id`. Callers release only after the
    /// reader has signalled completion (or the bounded teardown wait ran
    /// out). Returns false if the slot was owned by someone else.
    pub async fn release(&self, device: usize, owner_id: &str) -> bool {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get_mut(device) else {
            return false;
        };
        match &slot.owner {
            Some(current) if current.id == owner_id => {
                slot.owner = None;
                slot.reader = None;
                info!("Device {} released by session {}", device, owner_id);
                true
            }
            Some(current) => {
                warn!(
                    "Device {} release by {} ignored, owned by {}",
                    device, owner_id, current.id
                );
                false
            }
            None => false,
        }
    }

    /// Ask the device's reader to stop. Does not wait.
    pub async fn request_stop(&self, device: usize) {
        let slots = self.slots.lock().await;
        if let Some(slot) = slots.get(device) {
            slot.terminating.raise();
        }
    }

    /// Stop flag armed by the current claim
    pub async fn stop_flag(&self, device: usize) -> Option<StopFlag> {
        let slots = self.slots.lock().await;
        slots.get(device).map(|slot| slot.terminating.clone())
    }

    /// Record the reader task running on a claimed device
    pub async fn attach_reader(&self, device: usize, reader: AbortHandle) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(device) {
            slot.reader = Some(reader);
        }
    }

    /// Non-blocking peek at the device's reader. Best effort: the answer
    /// can be stale as soon as it is returned.
    pub fn is_reader_idle(&self, device: usize) -> bool {
        self.readers
            .get(device)
            .map(|status| status.state() == ReaderState::Idle)
            .unwrap_or(true)
    }

    /// Reader status cell of a device
    pub fn reader_status(&self, device: usize) -> Option<Arc<ReaderStatus>> {
        self.readers.get(device).cloned()
    }

    /// Session currently owning the device
    pub async fn owner(&self, device: usize) -> Option<SessionHandle> {
        let slots = self.slots.lock().await;
        slots.get(device).and_then(|slot| slot.owner.clone())
    }

    /// Status of every slot
    pub async fn snapshot(&self) -> Vec<SlotStatus> {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .enumerate()
            .map(|(device, slot)| SlotStatus {
                device,
                owner: slot.owner.as_ref().map(|owner| owner.id.clone()),
                reader: self.readers[device].state(),
                terminating: slot.terminating.is_raised(),
            })
            .collect()
    }

    /// Request disconnect of every owning session, e.g. on shutdown.
    /// Returns how many sessions were asked to end.
    pub async fn disconnect_all(&self) -> usize {
        let slots = self.slots.lock().await;
        let mut count = 0;
        for slot in slots.iter() {
            if let Some(owner) = &slot.owner {
                owner.disconnect.request();
                count += 1;
            }
        }
        count
    }

    /// Abort every reader task still attached to a slot. Used on shutdown
    /// after the owning sessions had their chance to tear down.
    pub async fn abort_readers(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let mut count = 0;
        for (device, slot) in slots.iter_mut().enumerate() {
            if let Some(reader) = slot.reader.take() {
                if !reader.is_finished() {
                    warn!("Aborting reader task of UART {}", device);
                    reader.abort();
                    count += 1;
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DisconnectFlag;

    fn handle(id: &str) -> SessionHandle {
        SessionHandle {
            id: id.to_string(),
            disconnect: DisconnectFlag::new(),
        }
    }

    #[tokio::test]
    async fn second_claim_is_refused() {
        let table = DeviceTable::new(2);
        assert!(table.try_claim(0, handle("a")).await);
        assert!(!table.try_claim(0, handle("b")).await);
        assert_eq!(table.owner(0).await.unwrap().id, "a");
        assert!(table.try_claim(1, handle("b")).await);
    }

    #[tokio::test]
    async fn claim_out_of_range_fails() {
        let table = DeviceTable::new(1);
        assert!(!table.try_claim(1, handle("a")).await);
        assert!(table.is_reader_idle(5));
    }

    #[tokio::test]
    async fn release_requires_the_owner() {
        let table = DeviceTable::new(1);
        assert!(table.try_claim(0, handle("a")).await);
        assert!(!table.release(0, "b").await);
        assert!(table.owner(0).await.is_some());
        assert!(table.release(0, "a").await);
        assert!(table.owner(0).await.is_none());
        assert!(table.try_claim(0, handle("b")).await);
    }

    #[tokio::test]
    async fn each_claim_arms_a_fresh_stop_flag() {
        let table = DeviceTable::new(1);
        assert!(table.try_claim(0, handle("a")).await);
        let first = table.stop_flag(0).await.unwrap();
        table.request_stop(0).await;
        assert!(first.is_raised());
        table.release(0, "a").await;

        assert!(table.try_claim(0, handle("b")).await);
        let second = table.stop_flag(0).await.unwrap();
        assert!(!second.is_raised());
        assert!(first.is_raised());
    }

    #[tokio::test]
    async fn reader_guard_tracks_running_state() {
        let table = DeviceTable::new(1);
        let status = table.reader_status(0).unwrap();
        assert!(table.is_reader_idle(0));
        let guard = status.start();
        assert!(!table.is_reader_idle(0));
        drop(guard);
        assert!(table.is_reader_idle(0));
    }

    #[tokio::test]
    async fn wait_idle_returns_when_the_guard_drops() {
        let status = Arc::new(ReaderStatus::default());
        let guard = status.start();
        assert!(!status.wait_idle(Duration::from_millis(10)).await);

        let dropper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        assert!(status.wait_idle(Duration::from_secs(5)).await);
        dropper.await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_and_disconnect_all() {
        let table = DeviceTable::new(2);
        let owner = handle("a");
        let flag = owner.disconnect.clone();
        table.try_claim(1, owner).await;
        let snapshot = table.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].owner, None);
        assert_eq!(snapshot[1].owner.as_deref(), Some("a"));
        assert_eq!(snapshot[1].reader, ReaderState::Idle);

        assert_eq!(table.disconnect_all().await, 1);
        assert!(flag.is_requested());
    }
}
