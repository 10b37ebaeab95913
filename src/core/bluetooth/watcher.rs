//! Device watcher
//! Start/stop control over the platform listener, plus the public roster API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WatcherConfig;
use crate::core::bluetooth::events::{EventBus, EventChannel, SubscriptionId, WatcherEvent};
use crate::core::bluetooth::ingest::{AdvertisementIngestor, Clock, system_clock};
use crate::core::bluetooth::radio::{AdvertisementSource, DeviceResolver, RadioEvent};
use crate::core::bluetooth::roster::{HeartbeatTimeout, RosterStore};
use crate::core::bluetooth::types::{DeviceRecord, ListenerStatus, ScanMode, StopReason};
use crate::error::{Result, WatcherError};

/// One listening session. `cancel_token` is Some while Listening.
#[derive(Default)]
struct Session {
    generation: u64,
    cancel_token: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

struct WatcherInner {
    radio: Arc<dyn AdvertisementSource>,
    roster: Arc<RosterStore>,
    bus: Arc<EventBus>,
    heartbeat: Arc<HeartbeatTimeout>,
    ingestor: AdvertisementIngestor,
    scan_mode: ScanMode,
    sweep_interval: Duration,
    session: Mutex<Session>,
    listening: AtomicBool,
}

/// Builds a [`DeviceWatcher`]; the config is validated in `build`.
pub struct WatcherBuilder {
    radio: Arc<dyn AdvertisementSource>,
    config: WatcherConfig,
    resolver: Option<Arc<dyn DeviceResolver>>,
    clock: Clock,
}

impl WatcherBuilder {
    /// Enables the connection/pairing metadata lookup for every advertisement.
    pub fn resolver(mut self, resolver: Arc<dyn DeviceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<DeviceWatcher> {
        self.config.validate()?;

        let roster = Arc::new(RosterStore::new());
        let bus = Arc::new(EventBus::new());
        let heartbeat = Arc::new(HeartbeatTimeout::new(self.config.heartbeat_timeout()));
        let mut ingestor =
            AdvertisementIngestor::new(roster.clone(), bus.clone(), heartbeat.clone(), self.clock);
        if let Some(resolver) = self.resolver {
            ingestor = ingestor.with_resolver(resolver, self.config.resolve_timeout());
        }

        Ok(DeviceWatcher {
            inner: Arc::new(WatcherInner {
                radio: self.radio,
                roster,
                bus,
                heartbeat,
                ingestor,
                scan_mode: self.config.scan_mode,
                sweep_interval: self.config.sweep_interval(),
                session: Mutex::new(Session::default()),
                listening: AtomicBool::new(false),
            }),
        })
    }
}

/// Watches BLE advertisements and keeps the roster of nearby devices.
pub struct DeviceWatcher {
    inner: Arc<WatcherInner>,
}

impl DeviceWatcher {
    pub fn builder(radio: Arc<dyn AdvertisementSource>, config: WatcherConfig) -> WatcherBuilder {
        WatcherBuilder {
            radio,
            config,
            resolver: None,
            clock: system_clock(),
        }
    }

    /// Creates a watcher without metadata lookup, using the system clock.
    pub fn new(radio: Arc<dyn AdvertisementSource>, config: WatcherConfig) -> Result<Self> {
        Self::builder(radio, config).build()
    }

    /// Engages the platform listener. No-op if already listening.
    pub async fn start_listening(&self) -> Result<()> {
        let inner = &self.inner;
        let mut session = inner.session.lock().await;
        if session.cancel_token.is_some() {
            debug!("Watcher already listening, ignoring start request.");
            return Ok(());
        }

        inner.radio.set_scan_mode(inner.scan_mode).await?;
        let (sink, events) = mpsc::unbounded_channel();
        inner.radio.start(sink).await?;

        session.generation += 1;
        let generation = session.generation;
        let cancel_token = CancellationToken::new();

        session.tasks.push(tokio::spawn(WatcherInner::pump(
            inner.clone(),
            events,
            cancel_token.clone(),
            generation,
        )));
        if !inner.sweep_interval.is_zero() {
            session.tasks.push(tokio::spawn(WatcherInner::sweep_loop(
                inner.clone(),
                cancel_token.clone(),
            )));
        }
        session.cancel_token = Some(cancel_token);
        inner.listening.store(true, Ordering::SeqCst);

        info!("Watcher started (session {}).", generation);
        inner.bus.emit(WatcherEvent::Started);
        Ok(())
    }

    /// Disengages the platform listener and clears the roster. No-op if already stopped.
    pub async fn stop_listening(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        self.inner
            .finish_session(&mut session, StopReason::Requested)
            .await;
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    /// Status as reported by the platform listener itself.
    pub async fn radio_status(&self) -> ListenerStatus {
        self.inner.radio.status().await
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.inner.heartbeat.get()
    }

    /// Changes the heartbeat timeout; applies from the next sweep on.
    pub fn set_heartbeat_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(WatcherError::InvalidConfig(
                "heartbeat timeout must be > 0".to_string(),
            ));
        }
        info!("Heartbeat timeout set to {:?}", timeout);
        self.inner.heartbeat.set(timeout);
        Ok(())
    }

    /// Current roster ordered by address. Stale devices are evicted (and announced) first.
    pub fn discovered_devices(&self) -> Vec<DeviceRecord> {
        self.inner.ingestor.snapshot()
    }

    /// Runs a timeout sweep now. Returns the number of evicted devices.
    pub fn sweep_timeouts(&self) -> usize {
        self.inner.ingestor.sweep()
    }

    pub fn subscribe<F>(&self, channel: EventChannel, handler: F) -> SubscriptionId
    where
        F: Fn(&WatcherEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(channel, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }
}

impl Drop for DeviceWatcher {
    /// A watcher dropped while listening stops its session in the background,
    /// which still fires `Stopped`. Outside a runtime its tasks are only cancelled.
    fn drop(&mut self) {
        if !self.is_listening() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Watcher dropped while listening, stopping the session.");
                let inner = self.inner.clone();
                handle.spawn(async move {
                    let mut session = inner.session.lock().await;
                    inner.finish_session(&mut session, StopReason::Requested).await;
                });
            }
            Err(_) => {
                warn!("Watcher dropped outside a runtime while listening; the platform listener is not stopped.");
                if let Ok(session) = self.inner.session.try_lock() {
                    if let Some(token) = &session.cancel_token {
                        token.cancel();
                    }
                }
            }
        }
    }
}

impl WatcherInner {
    /// Listening -> Stopped. Only the caller that finds a live session fires `Stopped`.
    async fn finish_session(&self, session: &mut Session, reason: StopReason) {
        let Some(cancel_token) = session.cancel_token.take() else {
            debug!("Watcher already stopped, ignoring stop ({:?}).", reason);
            return;
        };
        cancel_token.cancel();
        self.listening.store(false, Ordering::SeqCst);

        if let Err(e) = self.radio.stop().await {
            warn!("Platform listener reported an error while stopping: {}", e);
        }
        for task in session.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Watcher task ended abnormally: {:?}", e);
            }
        }

        self.roster.clear();
        info!("Watcher stopped ({:?}).", reason);
        self.bus.emit(WatcherEvent::Stopped(reason));
    }

    async fn handle_platform_stop(self: Arc<Self>, generation: u64) {
        let mut session = self.session.lock().await;
        if session.generation != generation {
            debug!("Ignoring listener stop from stale session {}.", generation);
            return;
        }
        self.finish_session(&mut session, StopReason::PlatformHalted)
            .await;
    }

    /// Feeds radio events into the ingestor until the session is cancelled.
    async fn pump(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<RadioEvent>,
        cancel_token: CancellationToken,
        generation: u64,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                event = events.recv() => match event {
                    Some(RadioEvent::Advertisement(advertisement)) => {
                        self.ingestor.ingest(advertisement).await;
                    }
                    Some(RadioEvent::ListenerStopped) | None => {
                        warn!("Platform listener stopped on its own.");
                        // finish_session awaits this task, so hand off instead of calling it here.
                        tokio::spawn(self.clone().handle_platform_stop(generation));
                        break;
                    }
                },
            }
        }
        debug!("Advertisement pump for session {} finished.", generation);
    }

    async fn sweep_loop(self: Arc<Self>, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    self.ingestor.sweep();
                }
            }
        }
    }
}
