// SPDX-License-Identifier: GPL-3.0-only
//! Acquisition loop for a device session
//!
//! Frames are pulled by short read steps executed on the tokio blocking pool.
//! Each step performs one read and, unless a stop was requested, schedules its
//! own successor, so at most one step is ever scheduled or executing.
//!
//! Stopping is cooperative and uses two signals:
//!
//! - **stop requested** (manual reset): raised by [`AcquisitionLoop::stop`],
//!   cleared by the last step on its way out.
//! - **read finished** (auto reset): raised by the last step after clearing
//!   the stop signal, consumed by a waiting `stop`.
//!
//! The stop signal is checked before the read, before committing the result,
//! before each notification and before rescheduling. Once a step commits to
//! rescheduling it does not check again.
//!
//! ```text
//!  start ─▶ step ─▶ step ─▶ step ─▶ … ─▶ step (stop seen)
//!                                          │ clear stop
//!                                          ▼ signal finished
//!  stop(wait) ─────────────────────────────▶ returns
//! ```

use super::session::DeviceSession;
use super::types::Frame;
use crate::constants::DEFAULT_STOP_WAIT;
use crate::errors::{ProviderError, ProviderResult};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Lifecycle of an acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Not running and no step pending
    Idle,
    /// Read steps are being scheduled
    Running,
    /// Stop requested, the last step has not acknowledged yet
    Stopping,
}

/// Token returned by the subscribe calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Loop counters, cumulative over the loop's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub steps: u64,
    pub frames_published: u64,
    pub availability_changes: u64,
    /// Largest number of read steps ever executing at once
    pub peak_concurrent_steps: u32,
}

type Handler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum Channel {
    FrameReady,
    AvailabilityChanged,
}

/// Subscriber list for one notification channel
#[derive(Default)]
struct EventSource {
    handlers: Mutex<Vec<(SubscriptionToken, Handler)>>,
}

impl EventSource {
    fn add(&self, token: SubscriptionToken, handler: Handler) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((token, handler));
    }

    fn remove(&self, token: SubscriptionToken) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        handlers.len() != before
    }

    /// Call every handler outside the list lock
    fn invoke_all(&self) {
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler();
        }
    }
}

#[derive(Debug, Default)]
struct SignalState {
    stop_requested: bool,
    read_finished: bool,
}

/// The stop-requested / read-finished pair
#[derive(Default)]
struct StepSignals {
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl StepSignals {
    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn raise_stop(&self) {
        self.lock().stop_requested = true;
        self.changed.notify_all();
    }

    fn is_stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    fn reset_finished(&self) {
        self.lock().read_finished = false;
    }

    /// Clear the stop signal, then raise read-finished
    fn acknowledge_stop(&self) {
        let mut state = self.lock();
        state.stop_requested = false;
        state.read_finished = true;
        drop(state);
        self.changed.notify_all();
    }

    /// Wait up to `timeout` for read-finished, consuming it
    fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.read_finished {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        state.read_finished = false;
        true
    }

    /// Sleep up to `timeout`, waking early when a stop is requested
    fn sleep_unless_stopped(&self, timeout: Duration) {
        let state = self.lock();
        if state.stop_requested {
            return;
        }
        let _ = self
            .changed
            .wait_timeout_while(state, timeout, |s| !s.stop_requested);
    }
}

#[derive(Debug, Default)]
struct FrameSlot {
    frame: Option<Frame>,
    /// Outcome of the last committed read, `None` before any
    last_result: Option<ProviderResult<()>>,
}

#[derive(Default)]
struct StepCounters {
    steps: AtomicU64,
    frames: AtomicU64,
    availability_changes: AtomicU64,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
}

struct LoopInner {
    name: String,
    session: Arc<DeviceSession>,
    runtime: Handle,
    stop_wait: Duration,
    /// Pause between steps while the session is closed
    idle_backoff: Duration,
    /// Serializes start, stop, subscription changes and idle probes
    running: Mutex<bool>,
    signals: StepSignals,
    slot: Mutex<FrameSlot>,
    available: AtomicBool,
    next_token: AtomicU64,
    frame_ready: EventSource,
    availability_changed: EventSource,
    counters: StepCounters,
}

impl LoopInner {
    fn lock_running(&self) -> MutexGuard<'_, bool> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_slot(&self) -> MutexGuard<'_, FrameSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn events(&self, channel: Channel) -> &EventSource {
        match channel {
            Channel::FrameReady => &self.frame_ready,
            Channel::AvailabilityChanged => &self.availability_changed,
        }
    }

    fn keep_running(&self) -> bool {
        !self.signals.is_stop_requested()
    }

    fn schedule(inner: &Arc<LoopInner>) {
        let next = Arc::clone(inner);
        drop(inner.runtime.spawn_blocking(move || LoopInner::read_step(&next)));
    }

    /// Close the session after a dead read; `true` if this call closed it
    fn invalidate(&self) -> bool {
        let closed = self.session.close();
        if closed {
            self.available.store(false, Ordering::SeqCst);
            warn!(name = %self.name, "Device invalidated, session closed");
        }
        closed
    }

    fn read_step(inner: &Arc<LoopInner>) {
        let counters = &inner.counters;
        let in_flight = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        counters.steps.fetch_add(1, Ordering::Relaxed);

        let mut availability_changed = false;
        let mut read_ok = false;
        let mut session_closed = false;

        if inner.keep_running() {
            let mut slot = inner.lock_slot();

            let result = if inner.session.is_open() {
                let outcome = inner.session.read_frame();
                if !outcome.still_valid {
                    availability_changed = inner.invalidate();
                }
                outcome.result
            } else {
                session_closed = true;
                Err(ProviderError::ReadTransientFailure)
            };
            read_ok = result.is_ok();

            // stop() resets the slot itself, leave it alone once stopping
            if inner.keep_running() {
                match result {
                    Ok(frame) => {
                        slot.frame = Some(frame);
                        slot.last_result = Some(Ok(()));
                    }
                    Err(e) if availability_changed => {
                        slot.frame = None;
                        slot.last_result = Some(Err(e));
                    }
                    Err(e) => {
                        debug!(name = %inner.name, error = %e, "Read step produced no frame");
                    }
                }
            }
        }

        if inner.keep_running() && availability_changed {
            counters.availability_changes.fetch_add(1, Ordering::SeqCst);
            inner.availability_changed.invoke_all();
        }

        if inner.keep_running() && read_ok {
            counters.frames.fetch_add(1, Ordering::Relaxed);
            inner.frame_ready.invoke_all();
        }

        if session_closed {
            inner.signals.sleep_unless_stopped(inner.idle_backoff);
        }

        counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        if inner.keep_running() {
            LoopInner::schedule(inner);
        } else {
            debug!(name = %inner.name, "Read step acknowledging stop");
            inner.signals.acknowledge_stop();
        }
    }
}

/// Self-rescheduling frame reader over one [`DeviceSession`]
///
/// # Example
///
/// ```ignore
/// let acquisition = AcquisitionLoop::builder(session).name("ir0").build()?;
/// acquisition.subscribe_frame_ready(|| println!("frame"))?;
/// acquisition.start()?;
/// // ...
/// acquisition.stop(true)?;
/// ```
pub struct AcquisitionLoop {
    inner: Arc<LoopInner>,
}

impl AcquisitionLoop {
    pub fn builder(session: Arc<DeviceSession>) -> AcquisitionLoopBuilder {
        AcquisitionLoopBuilder::new(session)
    }

    /// Start reading frames
    ///
    /// # Returns
    /// * `Err(ProviderError::AlreadyRunning)` - already running
    /// * `Err(ProviderError::StopInProgress)` - the previous stop has not been
    ///   acknowledged by its last read step yet
    /// * `Err(_)` - the stream could not be activated
    pub fn start(&self) -> ProviderResult<()> {
        let inner = &self.inner;
        let mut running = inner.lock_running();

        if *running {
            return Err(ProviderError::AlreadyRunning);
        }
        if inner.signals.is_stop_requested() {
            return Err(ProviderError::StopInProgress);
        }

        inner.signals.reset_finished();
        inner.session.set_stream_active(true)?;
        *running = true;
        inner
            .available
            .store(inner.session.is_open(), Ordering::SeqCst);
        LoopInner::schedule(inner);

        if let Err(e) = inner.session.refresh_cached_state() {
            debug!(name = %inner.name, error = %e, "Could not refresh cached device state");
        }

        info!(name = %inner.name, "Acquisition started");
        Ok(())
    }

    /// Stop reading frames
    ///
    /// Returns once the loop is idle. With `wait`, blocks up to the configured
    /// stop wait for the in-flight read step to acknowledge; without it, a
    /// `start` issued before the acknowledgement fails with `StopInProgress`.
    /// The current frame and last result are cleared either way.
    pub fn stop(&self, wait: bool) -> ProviderResult<()> {
        let inner = &self.inner;
        {
            let mut running = inner.lock_running();
            if !*running {
                return Err(ProviderError::InvalidState(
                    "acquisition not running".to_string(),
                ));
            }

            inner.signals.raise_stop();
            if let Err(e) = inner.session.set_stream_active(false) {
                warn!(name = %inner.name, error = %e, "Failed to deactivate stream during stop");
            }
            *running = false;
        }

        let timeout = if wait { inner.stop_wait } else { Duration::ZERO };
        let acknowledged = inner.signals.wait_finished(timeout);
        if wait && !acknowledged {
            warn!(
                name = %inner.name,
                wait_ms = inner.stop_wait.as_millis() as u64,
                "Read step did not acknowledge stop in time"
            );
        }

        let mut slot = inner.lock_slot();
        slot.frame = None;
        slot.last_result = None;

        info!(name = %inner.name, acknowledged, "Acquisition stopped");
        Ok(())
    }

    /// Stop (waiting) if running, then close the session
    pub fn shutdown(&self) {
        if self.is_running() {
            let _ = self.stop(true);
        }
        self.inner.session.close();
    }

    pub fn state(&self) -> AcquisitionState {
        if *self.inner.lock_running() {
            AcquisitionState::Running
        } else if self.inner.signals.is_stop_requested() {
            AcquisitionState::Stopping
        } else {
            AcquisitionState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        *self.inner.lock_running()
    }

    /// Whether the device is reachable
    ///
    /// While running this returns the flag maintained by the read steps.
    /// Otherwise it probes the device with one read; a probe that finds the
    /// handle dead closes the session and notifies availability subscribers.
    pub fn is_available(&self) -> bool {
        let inner = &self.inner;
        let running = inner.lock_running();
        if *running {
            return inner.available.load(Ordering::SeqCst);
        }

        if !inner.session.is_open() {
            return false;
        }

        let outcome = inner.session.read_frame();
        if outcome.still_valid {
            return true;
        }

        let changed = inner.invalidate();
        drop(running);
        if changed {
            inner
                .counters
                .availability_changes
                .fetch_add(1, Ordering::SeqCst);
            inner.availability_changed.invoke_all();
        }
        false
    }

    /// Copy of the current frame, sharing its payload
    pub fn current_frame(&self) -> Option<Frame> {
        self.inner.lock_slot().frame.clone()
    }

    /// Outcome of the last committed read, `None` before the first one
    pub fn current_frame_result(&self) -> Option<ProviderResult<()>> {
        self.inner.lock_slot().last_result.clone()
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.inner.session
    }

    pub fn stats(&self) -> LoopStats {
        let counters = &self.inner.counters;
        LoopStats {
            steps: counters.steps.load(Ordering::SeqCst),
            frames_published: counters.frames.load(Ordering::SeqCst),
            availability_changes: counters.availability_changes.load(Ordering::SeqCst),
            peak_concurrent_steps: counters.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    // ===== Subscriptions =====
    // Only allowed while the loop is not running

    /// Call `handler` after every committed frame
    pub fn subscribe_frame_ready<F>(&self, handler: F) -> ProviderResult<SubscriptionToken>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Channel::FrameReady, Arc::new(handler))
    }

    /// Call `handler` when the device becomes unavailable
    pub fn subscribe_availability_changed<F>(
        &self,
        handler: F,
    ) -> ProviderResult<SubscriptionToken>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Channel::AvailabilityChanged, Arc::new(handler))
    }

    pub fn unsubscribe_frame_ready(&self, token: SubscriptionToken) -> ProviderResult<()> {
        self.unsubscribe(Channel::FrameReady, token)
    }

    pub fn unsubscribe_availability_changed(&self, token: SubscriptionToken) -> ProviderResult<()> {
        self.unsubscribe(Channel::AvailabilityChanged, token)
    }

    fn subscribe(
        &self,
        channel: Channel,
        handler: Handler,
    ) -> ProviderResult<SubscriptionToken> {
        let running = self.inner.lock_running();
        if *running {
            return Err(ProviderError::InvalidState(
                "cannot subscribe while running".to_string(),
            ));
        }
        let token = SubscriptionToken(self.inner.next_token.fetch_add(1, Ordering::SeqCst));
        self.inner.events(channel).add(token, handler);
        Ok(token)
    }

    fn unsubscribe(
        &self,
        channel: Channel,
        token: SubscriptionToken,
    ) -> ProviderResult<()> {
        let running = self.inner.lock_running();
        if *running {
            return Err(ProviderError::InvalidState(
                "cannot unsubscribe while running".to_string(),
            ));
        }
        if self.inner.events(channel).remove(token) {
            Ok(())
        } else {
            Err(ProviderError::InvalidState(
                "unknown subscription token".to_string(),
            ))
        }
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        if self.is_running() {
            debug!(name = %self.inner.name, "AcquisitionLoop dropped, stopping");
            let _ = self.stop(true);
        }
    }
}

impl std::fmt::Debug for AcquisitionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionLoop")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builder for acquisition loops
pub struct AcquisitionLoopBuilder {
    session: Arc<DeviceSession>,
    name: String,
    runtime: Option<Handle>,
    stop_wait: Duration,
}

impl AcquisitionLoopBuilder {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        let name = session.identity().id;
        Self {
            session,
            name,
            runtime: None,
            stop_wait: DEFAULT_STOP_WAIT,
        }
    }

    /// Name used in log output
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Runtime whose blocking pool runs the read steps
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Upper bound for `stop(true)`
    pub fn stop_wait(mut self, stop_wait: Duration) -> Self {
        self.stop_wait = stop_wait;
        self
    }

    /// Build the loop; without an explicit runtime the current one is used
    pub fn build(self) -> ProviderResult<AcquisitionLoop> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| {
                ProviderError::InvalidState(format!("no tokio runtime available: {}", e))
            })?,
        };

        let idle_backoff = self
            .session
            .format()
            .frame_rate
            .frame_period()
            .unwrap_or(self.stop_wait);

        Ok(AcquisitionLoop {
            inner: Arc::new(LoopInner {
                name: self.name,
                available: AtomicBool::new(self.session.is_open()),
                session: self.session,
                runtime,
                stop_wait: self.stop_wait,
                idle_backoff,
                running: Mutex::new(false),
                signals: StepSignals::default(),
                slot: Mutex::new(FrameSlot::default()),
                next_token: AtomicU64::new(1),
                frame_ready: EventSource::default(),
                availability_changed: EventSource::default(),
                counters: StepCounters::default(),
            }),
        })
    }
}
