//! Reference counted ownership of the one physical camera

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::FrameBuffer;
use crate::capture::CameraDevice;
use crate::{CameraError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Proof of one `acquire()`, to be handed back to `release()`.
///
/// A lease belongs to a single device run. Once that run has been preempted
/// the lease is stale and releasing it has no effect.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a lease that is never released keeps the camera running"]
pub struct Lease {
    epoch: u64,
}

impl Lease {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub viewers: usize,
    pub epoch: u64,
}

/// Owns the camera device and its frame buffer.
///
/// The device is started lazily by the first `acquire()` and stopped when
/// the last lease is released, or immediately by `preempt()`. Every
/// transition happens under one lock, so `begin()` and `end()` never
/// overlap and callers observe each transition as atomic.
pub struct CameraSession {
    inner: Mutex<Inner>,
    buffer: Arc<FrameBuffer>,
    warmup: Duration,
}

struct Inner {
    state: SessionState,
    device: Box<dyn CameraDevice>,
    viewers: usize,
    epoch: u64,
}

impl CameraSession {
    pub fn new(device: Box<dyn CameraDevice>, warmup: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                device,
                viewers: 0,
                epoch: 0,
            }),
            buffer: Arc::new(FrameBuffer::new()),
            warmup,
        }
    }

    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    /// Register a viewer, starting the device if it is the first one.
    ///
    /// Blocks for the warm-up delay when the device has to be started.
    #[instrument(skip(self))]
    pub fn acquire(&self) -> Result<Lease> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Idle => self.start(&mut inner),
            SessionState::Starting | SessionState::Active => {
                inner.viewers += 1;
                inner.state = SessionState::Active;
                metrics::gauge!("camwatch_viewers").set(inner.viewers as f64);
                debug!("Viewer attached, {} watching", inner.viewers);
                Ok(Lease { epoch: inner.epoch })
            }
            SessionState::Stopping => Err(CameraError::DeviceUnavailable(
                "camera session is stopping".into(),
            )),
        }
    }

    fn start(&self, inner: &mut Inner) -> Result<Lease> {
        inner.state = SessionState::Starting;
        inner.viewers = 1;
        inner.epoch = self.buffer.open();

        info!("Starting camera {}...", inner.device.name());
        if let Err(e) = inner.device.begin(Arc::clone(&self.buffer)) {
            warn!("Camera {} failed to start: {}", inner.device.name(), e);
            self.buffer.close();
            inner.viewers = 0;
            inner.state = SessionState::Idle;
            return Err(e);
        }
        metrics::counter!("camwatch_device_starts_total").increment(1);

        if !self.warmup.is_zero() {
            info!("Waiting {:?} for camera to warm up...", self.warmup);
            thread::sleep(self.warmup);
        }

        inner.state = SessionState::Active;
        metrics::gauge!("camwatch_viewers").set(1.0);
        info!("Camera {} active (run {})", inner.device.name(), inner.epoch);
        Ok(Lease { epoch: inner.epoch })
    }

    /// Give back a lease. The device stops when the last one is returned.
    pub fn release(&self, lease: Lease) {
        let mut inner = self.lock();
        if inner.state == SessionState::Idle {
            warn!("release() on an idle camera session ignored");
            return;
        }
        if lease.epoch != inner.epoch {
            debug!(
                "Ignoring lease from run {} (current run {})",
                lease.epoch, inner.epoch
            );
            return;
        }

        inner.viewers = inner.viewers.saturating_sub(1);
        metrics::gauge!("camwatch_viewers").set(inner.viewers as f64);
        if inner.viewers > 0 {
            debug!("Viewer detached, {} still watching", inner.viewers);
            return;
        }

        debug!("Last viewer detached");
        self.stop(&mut inner);
    }

    /// Stop the device now, whoever is watching.
    pub fn preempt(&self) {
        let mut inner = self.lock();
        self.preempt_locked(&mut inner);
    }

    /// Preempt, then run `f` with exclusive use of the stopped device.
    ///
    /// The session lock is held throughout, so no viewer can restart the
    /// stream before `f` returns.
    pub fn preempt_with<R>(&self, f: impl FnOnce(&mut dyn CameraDevice) -> R) -> R {
        let mut inner = self.lock();
        self.preempt_locked(&mut inner);
        f(inner.device.as_mut())
    }

    fn preempt_locked(&self, inner: &mut Inner) {
        if inner.state == SessionState::Idle {
            warn!("preempt() on an idle camera session ignored");
            return;
        }
        info!("Preempting camera session with {} viewer(s)", inner.viewers);
        self.stop(inner);
    }

    fn stop(&self, inner: &mut Inner) {
        inner.state = SessionState::Stopping;
        info!("Stopping camera {}...", inner.device.name());
        inner.device.end();
        self.buffer.close();

        inner.viewers = 0;
        inner.state = SessionState::Idle;
        metrics::gauge!("camwatch_viewers").set(0.0);
        info!("Camera stopped");
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn viewers(&self) -> usize {
        self.lock().viewers
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.lock();
        SessionStatus {
            state: inner.state,
            viewers: inner.viewers,
            epoch: inner.epoch,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSession")
            .field("status", &self.status())
            .field("warmup", &self.warmup)
            .finish()
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.state != SessionState::Idle {
            inner.device.end();
            self.buffer.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    use bytes::Bytes;

    use crate::capture::SimulatedCamera;

    #[derive(Default)]
    struct Counters {
        begins: AtomicUsize,
        ends: AtomicUsize,
        running: AtomicBool,
    }

    /// Device that records lifecycle calls instead of capturing anything.
    struct CountingDevice {
        counters: Arc<Counters>,
        fail: bool,
    }

    impl CameraDevice for CountingDevice {
        fn name(&self) -> &str {
            "counting"
        }

        fn begin(&mut self, _sink: Arc<FrameBuffer>) -> Result<()> {
            if self.fail {
                return Err(CameraError::DeviceUnavailable("unplugged".into()));
            }
            assert!(
                !self.counters.running.swap(true, Ordering::SeqCst),
                "begin() while already running"
            );
            self.counters.begins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn end(&mut self) {
            if self.counters.running.swap(false, Ordering::SeqCst) {
                self.counters.ends.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn capture_still(&mut self, _dest: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn session() -> (CameraSession, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let device = CountingDevice {
            counters: Arc::clone(&counters),
            fail: false,
        };
        (CameraSession::new(Box::new(device), Duration::ZERO), counters)
    }

    #[test]
    fn first_acquire_starts_and_last_release_stops() {
        let (session, counters) = session();
        let a = session.acquire().unwrap();
        let b = session.acquire().unwrap();
        assert_eq!(counters.begins.load(Ordering::SeqCst), 1);
        assert_eq!(session.viewers(), 2);

        session.release(a);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(counters.ends.load(Ordering::SeqCst), 0);

        session.release(b);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(counters.ends.load(Ordering::SeqCst), 1);
        assert!(session.buffer().is_closed());
    }

    #[test]
    fn device_runs_exactly_while_leases_are_held() {
        let (session, counters) = session();
        let mut held = Vec::new();
        let mut runs = 0;

        // Deterministic mix of attaches and detaches.
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;

            if seed % 3 != 0 || held.is_empty() {
                if held.is_empty() {
                    runs += 1;
                }
                held.push(session.acquire().unwrap());
            } else {
                session.release(held.pop().unwrap());
            }

            assert_eq!(session.viewers(), held.len());
            assert_eq!(counters.running.load(Ordering::SeqCst), !held.is_empty());
            assert_eq!(counters.begins.load(Ordering::SeqCst), runs);
        }

        for lease in held.drain(..) {
            session.release(lease);
        }
        assert_eq!(counters.ends.load(Ordering::SeqCst), runs);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn preempt_is_idempotent() {
        let (session, counters) = session();
        let _lease = session.acquire().unwrap();
        let _other = session.acquire().unwrap();

        session.preempt();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.viewers(), 0);
        session.preempt();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(counters.ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn preempt_on_idle_session_is_a_noop() {
        let (session, counters) = session();
        session.preempt();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(counters.ends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_lease_does_not_touch_a_later_run() {
        let (session, counters) = session();
        let stale = session.acquire().unwrap();
        session.preempt();

        let current = session.acquire().unwrap();
        assert_ne!(stale.epoch(), current.epoch());

        session.release(stale);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.viewers(), 1);

        session.release(current);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(counters.begins.load(Ordering::SeqCst), 2);
        assert_eq!(counters.ends.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn release_after_preempt_is_benign() {
        let (session, counters) = session();
        let lease = session.acquire().unwrap();
        session.preempt();
        session.release(lease);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(counters.ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_begin_returns_to_idle() {
        let counters = Arc::new(Counters::default());
        let device = CountingDevice {
            counters: Arc::clone(&counters),
            fail: true,
        };
        let session = CameraSession::new(Box::new(device), Duration::ZERO);

        let err = session.acquire().unwrap_err();
        assert!(matches!(err, CameraError::DeviceUnavailable(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.viewers(), 0);

        // Still retryable, not stuck in Starting.
        assert!(session.acquire().is_err());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn preempt_with_sees_stopped_device() {
        let (session, counters) = session();
        let _lease = session.acquire().unwrap();

        let was_running = session.preempt_with(|_device| counters.running.load(Ordering::SeqCst));
        assert!(!was_running);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn acquire_waits_out_warmup_and_hides_warmup_frames() {
        let frames = vec![
            Bytes::from_static(&[0xFF, 0xD8, 0x01, 0xFF, 0xD9]),
            Bytes::from_static(&[0xFF, 0xD8, 0x02, 0xFF, 0xD9]),
        ];
        let camera = SimulatedCamera::with_frames(frames, Duration::from_millis(5));
        let warmup = Duration::from_millis(200);
        let session = CameraSession::new(Box::new(camera), warmup);

        let started = Instant::now();
        let lease = session.acquire().unwrap();
        assert!(started.elapsed() >= warmup);
        assert_eq!(session.state(), SessionState::Active);

        // The camera kept publishing while warming up.
        let during_warmup = session.buffer().stats().published;
        assert!(during_warmup > 0);

        let frame = session
            .buffer()
            .read_latest_for(lease.epoch(), Duration::from_secs(2))
            .unwrap();
        assert!(frame.sequence > during_warmup);
        session.release(lease);
    }

    #[test]
    fn concurrent_acquires_start_the_device_once() {
        let counters = Arc::new(Counters::default());
        let device = CountingDevice {
            counters: Arc::clone(&counters),
            fail: false,
        };
        let session = Arc::new(CameraSession::new(
            Box::new(device),
            Duration::from_millis(50),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                thread::spawn(move || session.acquire().unwrap())
            })
            .collect();
        let leases: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(counters.begins.load(Ordering::SeqCst), 1);
        assert_eq!(session.viewers(), 8);
        for lease in leases {
            session.release(lease);
        }
        assert_eq!(counters.ends.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Idle);
    }
}
