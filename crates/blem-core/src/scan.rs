//! Scan sessions.
//!
//! A [`Scanner`] is one request to scan for a number of seconds. Only one
//! scanner is active per [`Central`](crate::Central): starting a scanner
//! stops the active one (firing its finished callback), tells the transport
//! to stop scanning, waits a grace interval and only then starts the new scan.
//!
//! ```text
//!            start() + grace            duration elapsed / stop() / preempted
//! Waiting ─────────────────▶ Scanning ──────────────────────────────────▶ Stopped
//!    │                                                                      ▲
//!    ├──────────── stop() / preempted ──────────────────────────────────────┘
//!    │
//!    └──────────── start-up watchdog ───────────────────────────────────▶ Failed
//! ```
//!
//! # Example
//!
//! ```ignore
//! let scanner = central
//!     .scanner(Duration::from_secs(10))
//!     .services(vec![uuids::HEART_RATE_SERVICE])
//!     .on_discover(|device| println!("{} {:?}", device.name(), device.rssi()))
//!     .on_finished(|| println!("done"))
//!     .on_failed(|e| eprintln!("{}", e))
//!     .build();
//! scanner.start().await?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blem_types::ScanState;

use crate::device::{Device, DeviceOptions};
use crate::error::{Error, Result};
use crate::events::DeviceEvent;
use crate::manager::CentralShared;
use crate::transport::DiscoveryBundle;

static NEXT_SCANNER_ID: AtomicU64 = AtomicU64::new(1);

/// Builds [`DeviceOptions`] for a device seen for the first time.
pub type DeviceFactory = Arc<dyn Fn(&DiscoveryBundle) -> DeviceOptions + Send + Sync>;

type DiscoverCallback = Box<dyn FnMut(&Device) + Send>;
type FinishedCallback = Box<dyn FnOnce() + Send>;
type FailedCallback = Box<dyn FnOnce(&Error) + Send>;

/// Builder returned by [`Central::scanner`](crate::Central::scanner).
#[must_use]
pub struct ScannerBuilder {
    central: Weak<CentralShared>,
    seconds: Duration,
    services: Vec<Uuid>,
    on_discover: Option<DiscoverCallback>,
    on_finished: Option<FinishedCallback>,
    on_failed: Option<FailedCallback>,
    factory: Option<DeviceFactory>,
}

impl ScannerBuilder {
    pub(crate) fn new(central: Weak<CentralShared>, seconds: Duration) -> Self {
        Self {
            central,
            seconds,
            services: Vec::new(),
            on_discover: None,
            on_finished: None,
            on_failed: None,
            factory: None,
        }
    }

    /// Only report peripherals advertising one of these services.
    pub fn services(mut self, services: Vec<Uuid>) -> Self {
        self.services = services;
        self
    }

    pub fn on_discover(mut self, f: impl FnMut(&Device) + Send + 'static) -> Self {
        self.on_discover = Some(Box::new(f));
        self
    }

    pub fn on_finished(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(f));
        self
    }

    pub fn on_failed(mut self, f: impl FnOnce(&Error) + Send + 'static) -> Self {
        self.on_failed = Some(Box::new(f));
        self
    }

    /// Decide how devices first seen by this scanner are set up.
    pub fn device_factory(
        mut self,
        f: impl Fn(&DiscoveryBundle) -> DeviceOptions + Send + Sync + 'static,
    ) -> Self {
        self.factory = Some(Arc::new(f));
        self
    }

    /// Create the scanner in `Waiting` and arm its start-up watchdog.
    pub fn build(self) -> Scanner {
        let done = CancellationToken::new();
        let scanner = Scanner {
            inner: Arc::new(ScannerInner {
                id: NEXT_SCANNER_ID.fetch_add(1, Ordering::Relaxed),
                seconds: self.seconds,
                services: self.services,
                state: Mutex::new(ScanState::Waiting),
                on_discover: Mutex::new(self.on_discover),
                on_finished: Mutex::new(self.on_finished),
                on_failed: Mutex::new(self.on_failed),
                factory: self.factory,
                started: done.child_token(),
                done,
                central: self.central,
            }),
        };

        if let Some(central) = scanner.inner.central.upgrade() {
            let timeout = central.config.scan_startup_timeout;
            let watchdog = scanner.clone();
            central.runtime.spawn(async move {
                tokio::select! {
                    _ = watchdog.inner.started.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => watchdog.fail(timeout),
                }
            });
        }
        scanner
    }
}

/// One scan session. Cheap to clone.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
}

struct ScannerInner {
    id: u64,
    seconds: Duration,
    services: Vec<Uuid>,
    state: Mutex<ScanState>,
    on_discover: Mutex<Option<DiscoverCallback>>,
    on_finished: Mutex<Option<FinishedCallback>>,
    on_failed: Mutex<Option<FailedCallback>>,
    factory: Option<DeviceFactory>,
    /// Cancelled once scanning starts or the scanner ends.
    started: CancellationToken,
    /// Cancelled when the scanner reaches a terminal state.
    done: CancellationToken,
    central: Weak<CentralShared>,
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("id", &self.inner.id)
            .field("seconds", &self.inner.seconds)
            .field("services", &self.inner.services)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Scanner {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> ScanState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How long the scan runs once started.
    pub fn duration(&self) -> Duration {
        self.inner.seconds
    }

    pub fn services(&self) -> &[Uuid] {
        &self.inner.services
    }

    /// Make this the active scanner and start scanning after the grace
    /// interval.
    ///
    /// Returns once the scan has started, or as soon as it is clear it never
    /// will (stopped, preempted, already started).
    #[tracing::instrument(level = "info", skip(self), fields(scanner = self.inner.id))]
    pub async fn start(&self) -> Result<()> {
        let central = self.inner.central.upgrade().ok_or(Error::Shutdown)?;
        central.activate(self).await;
        Ok(())
    }

    /// Stop the scan. Idempotent; only `Waiting` and `Scanning` scanners move
    /// to `Stopped`, firing the finished callback.
    pub fn stop(&self) {
        let previous = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                ScanState::Waiting | ScanState::Scanning => std::mem::replace(&mut *state, ScanState::Stopped),
                ScanState::Stopped | ScanState::Failed => return,
            }
        };
        self.inner.done.cancel();

        if let Some(central) = self.inner.central.upgrade() {
            central.release(self, previous == ScanState::Scanning);
            central.events.send(DeviceEvent::ScanFinished);
        }
        info!(scanner = self.inner.id, "Scan finished");

        let finished = self.inner.on_finished.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(finished) = finished {
            finished();
        }
    }

    /// Whether `other` is the same scanner.
    pub fn same(&self, other: &Scanner) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    pub(crate) async fn done(&self) {
        self.inner.done.cancelled().await;
    }

    /// Waiting → Scanning. False if the scanner left `Waiting` meanwhile.
    pub(crate) fn begin_scanning(&self) -> bool {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != ScanState::Waiting {
            return false;
        }
        *state = ScanState::Scanning;
        self.inner.started.cancel();
        true
    }

    /// Stop after the scan duration unless stopped first.
    pub(crate) fn arm_duration(&self, runtime: &tokio::runtime::Handle) {
        let scanner = self.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = scanner.done() => {}
                _ = tokio::time::sleep(scanner.inner.seconds) => {
                    debug!(scanner = scanner.inner.id, "Scan duration elapsed");
                    scanner.stop();
                }
            }
        });
    }

    pub(crate) fn device_options(&self, bundle: &DiscoveryBundle) -> DeviceOptions {
        self.inner
            .factory
            .as_ref()
            .map(|factory| factory(bundle))
            .unwrap_or_default()
    }

    /// Hand a discovery to the callback while scanning.
    pub(crate) fn deliver(&self, device: &Device) {
        if self.state() != ScanState::Scanning {
            return;
        }
        let mut callback = self.inner.on_discover.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(on_discover) = callback.as_mut() {
            on_discover(device);
        }
    }

    fn fail(&self, timeout: Duration) {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ScanState::Waiting {
                return;
            }
            *state = ScanState::Failed;
        }
        self.inner.done.cancel();

        let error = Error::ScanStartupTimeout { timeout };
        warn!(scanner = self.inner.id, "{}", error);
        if let Some(central) = self.inner.central.upgrade() {
            central.release(self, false);
            central.events.send(DeviceEvent::ScanFailed {
                error: error.to_string(),
            });
        }

        let failed = self.inner.on_failed.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(failed) = failed {
            failed(&error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::manager::{Central, CentralConfig};
    use crate::mock::{MockTransport, TransportCall};
    use crate::transport::event_channel;

    fn central() -> (Arc<MockTransport>, Central) {
        let (tx, rx) = event_channel();
        let transport = Arc::new(MockTransport::new(tx));
        let central = Central::new(transport.clone(), rx, CentralConfig::default()).unwrap();
        (transport, central)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_runs_for_its_duration() {
        let (transport, central) = central();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        let scanner = central
            .scanner(Duration::from_secs(5))
            .on_finished(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        scanner.start().await.unwrap();
        assert_eq!(scanner.state(), ScanState::Scanning);
        assert_eq!(
            transport.calls(),
            vec![TransportCall::StopScan, TransportCall::StartScan(Vec::new())]
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(scanner.state(), ScanState::Stopped);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(central.active_scanner().is_none());
        assert_eq!(transport.count(|c| *c == TransportCall::StopScan), 2);

        scanner.stop();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_waiting() {
        let (transport, central) = central();
        let scanner = central.scanner(Duration::from_secs(5)).build();

        scanner.stop();
        scanner.start().await.unwrap();

        assert_eq!(scanner.state(), ScanState::Stopped);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_grace_prevents_scan() {
        let (transport, central) = central();
        let scanner = central.scanner(Duration::from_secs(5)).build();

        let starting = tokio::spawn({
            let scanner = scanner.clone();
            async move { scanner.start().await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        scanner.stop();
        starting.await.unwrap().unwrap();

        assert_eq!(scanner.state(), ScanState::Stopped);
        assert_eq!(transport.count(|c| matches!(c, TransportCall::StartScan(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_watchdog_fails_waiting_scanner() {
        let (_transport, central) = central();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let scanner = central
            .scanner(Duration::from_secs(10))
            .on_finished(|| panic!("failed scanner must not finish"))
            .on_failed(move |e| sink.lock().unwrap().push(e.to_string()))
            .build();

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(scanner.state(), ScanState::Failed);
        assert_eq!(failures.lock().unwrap().len(), 1);
        scanner.stop();
        assert_eq!(scanner.state(), ScanState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_defaults() {
        let (_transport, central) = central();
        let plain = central.scanner(Duration::from_secs(1)).build();
        let custom = central
            .scanner(Duration::from_secs(1))
            .device_factory(|bundle| DeviceOptions::new().name(format!("dev-{}", bundle.peripheral_id)))
            .build();
        let bundle = DiscoveryBundle {
            peripheral_id: "p1".into(),
            advertisement: Default::default(),
            rssi: None,
        };

        assert!(plain.device_options(&bundle).name.is_none());
        assert_eq!(custom.device_options(&bundle).name.as_deref(), Some("dev-p1"));
    }
}
