//! Dispatcher: the single owner of the EI channel.
//!
//! # Architecture (for beginners)
//!
//! ```text
//!  InputSession ──Command──▶ ┌────────────┐ ──bytes──▶ socket (write half)
//!   (any task)  ◀──reply───  │ Dispatcher │
//!                            │   (actor)  │ ◀─Inbound─ reader task ◀── socket (read half)
//!                            └────────────┘
//! ```
//!
//! - The **reader task** frames incoming bytes into [`RawMessage`]s and
//!   forwards them.  It knows nothing about interfaces.
//! - The **dispatcher actor** owns everything else: the write half, the
//!   [`ObjectRegistry`], the [`EmulationTracker`], the server serial and the
//!   [`HandshakeNegotiator`].  Because one task owns them, no locks are
//!   needed and requests go out in exactly the order they are built.
//! - [`InputSession`] is the cheap handle callers hold.  Each public
//!   operation becomes a [`Command`] with a oneshot reply channel.
//!
//! A gesture is planned by the pure synthesizer, then executed step by
//! step.  Requests are buffered and written at every frame, stop and wait,
//! so one frame's worth of events always reaches the server in one write.
//! While a gesture waits between steps, incoming events are still handled:
//! a disconnect, a write failure, a pause of a device in use or the caller
//! going away aborts the gesture, releases everything it held and reports
//! how many steps completed.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use eis_core::protocol::{decode_event, ClientIdAllocator, MessageBuffer, RawMessage, SerialTracker};
use eis_core::{
    Capability, DisplayBounds, Event, FrameCommit, InterfaceKind, KeyMapper, Modifier, MouseButton,
    Point, Request, ScrollAxis,
};
use nix::time::{clock_gettime, ClockId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::application::errors::InputError;
use crate::application::gestures::{
    self, Gesture, GestureContext, GesturePlan, Step, Timing, Waypoint,
};
use crate::application::session_tracker::{DeviceHandles, EmulationTracker};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::handshake::HandshakeNegotiator;
use crate::infrastructure::registry::ObjectRegistry;

/// Capacity of the command and inbound channels.
const CHANNEL_CAPACITY: usize = 64;

/// Read buffer size for the socket reader.
const READ_CHUNK: usize = 4096;

/// Microseconds of `CLOCK_MONOTONIC`, for frame timestamps.
///
/// The compositor compares these against its own clock, so the value must
/// come from the system clock rather than a process-local base.
fn monotonic_us() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(now) => now.tv_sec() as u64 * 1_000_000 + now.tv_nsec() as u64 / 1_000,
        Err(e) => {
            // Not reachable on Linux; keep timestamps increasing regardless.
            static BASE: OnceLock<Instant> = OnceLock::new();
            warn!("CLOCK_MONOTONIC unavailable ({e}), using process clock");
            BASE.get_or_init(Instant::now).elapsed().as_micros() as u64
        }
    }
}

// ── Messages between tasks ────────────────────────────────────────────────────

/// What the reader task forwards to the dispatcher.
#[derive(Debug)]
enum Inbound {
    Message(RawMessage),
    /// The read side is finished; no more messages will follow.
    Closed(InputError),
}

type Reply = oneshot::Sender<Result<(), InputError>>;

/// A request from an [`InputSession`] handle.
#[derive(Debug)]
enum Command {
    Perform { gesture: Gesture, reply: Reply },
    Sync { reply: Reply },
    Close { reply: Reply },
}

// ── Reader task ───────────────────────────────────────────────────────────────

async fn read_loop<R>(mut reader: R, tx: mpsc::Sender<Inbound>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = MessageBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                let _ = tx
                    .send(Inbound::Closed(InputError::Connection(
                        "server closed the connection".to_string(),
                    )))
                    .await;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                let _ = tx
                    .send(Inbound::Closed(InputError::Connection(format!("read failed: {e}"))))
                    .await;
                return;
            }
        };
        buffer.extend(&chunk[..n]);

        loop {
            match buffer.next_message() {
                Ok(Some(raw)) => {
                    if tx.send(Inbound::Message(raw)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Inbound::Closed(InputError::from(e))).await;
                    return;
                }
            }
        }
    }
}

// ── Dispatcher actor ──────────────────────────────────────────────────────────

/// Owns the channel and all per-session protocol state.
struct Dispatcher<W> {
    writer: W,
    out: Vec<u8>,
    inbound: mpsc::Receiver<Inbound>,
    inbound_done: bool,
    reader: Option<JoinHandle<()>>,

    registry: ObjectRegistry,
    negotiator: HandshakeNegotiator,
    tracker: EmulationTracker,
    serials: SerialTracker,
    ids: ClientIdAllocator,
    done_callbacks: Vec<u64>,

    configured_bounds: DisplayBounds,
    timing: Timing,
    pointer: Option<Point>,
    /// Set once the session is unusable; every later call fails with it.
    fatal: Option<String>,
}

impl<W> Dispatcher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn new(writer: W, inbound: mpsc::Receiver<Inbound>, config: &ClientConfig) -> Self {
        Self {
            writer,
            out: Vec::new(),
            inbound,
            inbound_done: false,
            reader: None,
            registry: ObjectRegistry::new(),
            negotiator: HandshakeNegotiator::new(
                config.name.clone(),
                config.required_set(),
                config.requested_set(),
            ),
            tracker: EmulationTracker::new(),
            serials: SerialTracker::new(),
            ids: ClientIdAllocator::new(),
            done_callbacks: Vec::new(),
            configured_bounds: config.bounds(),
            timing: config.timing(),
            pointer: None,
            fatal: None,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Runs the handshake until every required capability has a device.
    async fn handshake(&mut self, timeout: Duration) -> Result<(), InputError> {
        let deadline = time::Instant::now() + timeout;
        while !self.negotiator.is_complete(&self.registry) {
            let next = match time::timeout_at(deadline, self.next_inbound()).await {
                Ok(Some(inbound)) => inbound,
                Ok(None) => return Err(self.connection_error()),
                Err(_) => {
                    let err = self.negotiator.timeout_error(&self.registry);
                    warn!("handshake timed out after {timeout:?}: {err}");
                    return Err(err);
                }
            };
            self.handle_inbound(next).await?;
        }
        info!(
            "handshake complete: {} device(s), display {:?}",
            self.registry.devices().count(),
            self.bounds()
        );
        Ok(())
    }

    /// Serves commands until `close` or until every handle is dropped.
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Perform { gesture, mut reply }) => {
                        let result = self.perform(&gesture, &mut reply).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Sync { reply }) => {
                        let result = self.sync().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Close { reply }) => {
                        let result = self.close().await;
                        let _ = reply.send(result);
                        break;
                    }
                    None => {
                        if let Err(e) = self.close().await {
                            debug!("close after last handle dropped: {e}");
                        }
                        break;
                    }
                },
                inbound = self.inbound.recv(), if !self.inbound_done => match inbound {
                    Some(inbound) => {
                        if let Err(e) = self.handle_inbound(inbound).await {
                            debug!("idle event handling failed: {e}");
                        }
                    }
                    None => self.inbound_done = true,
                },
            }
        }
        debug!("dispatcher stopped");
    }

    async fn next_inbound(&mut self) -> Option<Inbound> {
        if self.inbound_done {
            return None;
        }
        let next = self.inbound.recv().await;
        if next.is_none() {
            self.inbound_done = true;
        }
        next
    }

    fn connection_error(&self) -> InputError {
        InputError::Connection(
            self.fatal
                .clone()
                .unwrap_or_else(|| "the connection is closed".to_string()),
        )
    }

    /// Marks the session unusable and drops all protocol state.
    ///
    /// Held buttons, keys and touches are forgotten without sending
    /// anything: the channel they lived on is gone.
    fn fail(&mut self, reason: String) -> InputError {
        if self.fatal.is_none() {
            error!("EI session lost: {reason}");
            self.fatal = Some(reason);
        }
        let abandoned = self.tracker.emulating_devices();
        if !abandoned.is_empty() {
            warn!("dropping emulation state of {} device(s)", abandoned.len());
        }
        self.tracker.clear();
        self.out.clear();
        self.connection_error()
    }

    // ── Writing ──────────────────────────────────────────────────────────

    fn queue(&mut self, request: &Request) -> Result<(), InputError> {
        let bytes = request.encode()?;
        debug!("→ {} on {:#x}", request.name(), request.object_id());
        self.out.extend_from_slice(&bytes);
        Ok(())
    }

    /// Writes everything queued.  A write failure is fatal.
    async fn flush(&mut self) -> Result<(), InputError> {
        if self.fatal.is_some() {
            return Err(self.connection_error());
        }
        if self.out.is_empty() {
            return Ok(());
        }
        let bytes = std::mem::take(&mut self.out);
        let written = async {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await
        }
        .await;
        written.map_err(|e| self.fail(format!("write failed: {e}")))
    }

    // ── Incoming events ──────────────────────────────────────────────────

    /// Applies one inbound item.
    ///
    /// Returns the device whose emulation was cut short by the event (paused
    /// or destroyed), if any.  Errors only for session-fatal conditions.
    async fn handle_inbound(&mut self, inbound: Inbound) -> Result<Option<u64>, InputError> {
        let raw = match inbound {
            Inbound::Message(raw) => raw,
            Inbound::Closed(cause) => {
                self.inbound_done = true;
                let reason = match cause {
                    InputError::Connection(reason) => reason,
                    other => other.to_string(),
                };
                return Err(self.fail(reason));
            }
        };

        let Some(interface) = self.registry.interface_of(raw.object_id) else {
            warn!(
                "event {} for unknown object {:#x} skipped",
                raw.opcode, raw.object_id
            );
            return Ok(None);
        };
        let event = match decode_event(interface, &raw) {
            Ok(event) => event,
            Err(e) if matches!(interface, InterfaceKind::Handshake | InterfaceKind::Connection) => {
                return Err(self.fail(format!("malformed {} event: {e}", interface.name())));
            }
            Err(e) => {
                error!("malformed {} event skipped: {e}", interface.name());
                return Ok(None);
            }
        };
        debug!("← {event:?}");
        if let Some(serial) = event.serial() {
            self.serials.observe(serial);
        }

        let mut interrupted = None;
        match &event {
            Event::Disconnected {
                reason,
                explanation,
                ..
            } => {
                let reason = match explanation {
                    Some(text) => format!("server disconnected ({reason:?}): {text}"),
                    None => format!("server disconnected ({reason:?})"),
                };
                return Err(self.fail(reason));
            }
            Event::InvalidObject { invalid_id, .. } => {
                warn!("server rejected a request on invalid object {invalid_id:#x}");
            }
            Event::Ping { pingpong, .. } => {
                self.queue(&Request::PingpongDone {
                    pingpong: *pingpong,
                    data: 0,
                })?;
                self.flush().await?;
            }
            Event::CallbackDone { callback, .. } => {
                self.done_callbacks.push(*callback);
                self.registry.release(*callback);
            }
            Event::DevicePaused { device, .. } => {
                if self.tracker.set_paused(*device, true) {
                    warn!("device {device:#x} paused while emulating");
                }
                interrupted = Some(*device);
            }
            Event::DeviceResumed { device, .. } => {
                self.tracker.set_paused(*device, false);
            }
            Event::Destroyed { object, .. } => {
                interrupted = self.destroyed_device(*object);
            }
            _ => {}
        }

        match self.negotiator.on_event(&event, &mut self.registry) {
            Ok(requests) => {
                for request in &requests {
                    self.queue(request)?;
                }
                self.flush().await?;
            }
            Err(e) if matches!(interface, InterfaceKind::Handshake | InterfaceKind::Connection) => {
                return Err(self.fail(e.to_string()));
            }
            Err(e) => error!("{e}"),
        }
        Ok(interrupted)
    }

    /// Forgets tracker state for a destroyed device (or the device owning a
    /// destroyed interface) and returns that device.
    fn destroyed_device(&mut self, object: u64) -> Option<u64> {
        let record = self.registry.lookup(object).copied()?;
        let device = match record.interface {
            InterfaceKind::Device => object,
            InterfaceKind::Seat => {
                let devices: Vec<u64> = self
                    .registry
                    .devices()
                    .filter(|d| d.seat == object)
                    .map(|d| d.id)
                    .collect();
                for id in &devices {
                    self.tracker.forget(*id);
                }
                return devices.first().copied();
            }
            _ => record.parent?,
        };
        if self.tracker.forget(device) {
            warn!("device {device:#x} destroyed while emulating");
        }
        Some(device)
    }

    /// Handles whatever has already arrived without waiting.
    async fn drain(&mut self, in_use: &[u64]) -> Result<(), InputError> {
        while !self.inbound_done {
            let Ok(inbound) = self.inbound.try_recv() else {
                break;
            };
            let interrupted = self.handle_inbound(inbound).await?;
            check_interrupted(interrupted, in_use)?;
        }
        Ok(())
    }

    // ── Gestures ─────────────────────────────────────────────────────────

    fn bounds(&self) -> DisplayBounds {
        let regions: Vec<_> = self
            .registry
            .devices()
            .flat_map(|d| d.regions.iter())
            .collect();
        DisplayBounds::from_regions(regions).unwrap_or(self.configured_bounds)
    }

    fn context(&self) -> GestureContext {
        let devices = Capability::ALL
            .into_iter()
            .filter_map(|role| {
                self.registry
                    .usable_device(role)
                    .map(|d| (role, self.tracker.view(d.id)))
            })
            .collect();
        GestureContext {
            bounds: self.bounds(),
            pointer: self.pointer,
            timing: self.timing.clone(),
            devices,
        }
    }

    /// Resolves every role the plan uses to a device, and checks that each
    /// call has the interface it needs.  Nothing is written on failure.
    fn resolve(&self, plan: &GesturePlan) -> Result<BTreeMap<Capability, DeviceHandles>, InputError> {
        let mut handles = BTreeMap::new();
        for role in plan.roles() {
            let device = self
                .registry
                .usable_device(role)
                .ok_or(InputError::CapabilityUnavailable(role))?;
            handles.insert(role, device.handles());
        }
        for call in plan.calls() {
            let role = call.capability();
            let available = handles
                .get(&role)
                .and_then(|h| h.interface(call.interface()))
                .is_some();
            if !available {
                return Err(InputError::CapabilityUnavailable(role));
            }
        }
        Ok(handles)
    }

    async fn perform(&mut self, gesture: &Gesture, reply: &mut Reply) -> Result<(), InputError> {
        if self.fatal.is_some() {
            return Err(self.connection_error());
        }
        self.drain(&[]).await?;

        let plan = gestures::plan(gesture, &self.context())?;
        if plan.is_empty() {
            return Ok(());
        }
        let handles = self.resolve(&plan)?;
        let in_use: Vec<u64> = handles.values().map(|h| h.device).collect();
        debug!(
            "{}: {} steps, {} checkpoints, {:?} of waits",
            gesture.name(),
            plan.steps.len(),
            plan.checkpoints(),
            plan.total_wait()
        );

        let mut run = PlanRun::default();
        for step in &plan.steps {
            let result = self.execute(step, &handles, &in_use, &mut run, reply).await;
            if let Err(cause) = result {
                return Err(self.abort(cause, &run, &handles).await);
            }
        }
        if let Err(cause) = self.flush().await {
            return Err(self.abort(cause, &run, &handles).await);
        }

        if plan.pointer_after.is_some() {
            self.pointer = plan.pointer_after;
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        step: &Step,
        handles: &BTreeMap<Capability, DeviceHandles>,
        in_use: &[u64],
        run: &mut PlanRun,
        reply: &mut Reply,
    ) -> Result<(), InputError> {
        if reply.is_closed() {
            return Err(InputError::Cancelled);
        }
        match step {
            Step::Start(role) => {
                let device = role_handles(handles, *role)?.device;
                let count = run.started.entry(device).or_insert(0);
                *count += 1;
                if *count == 1 {
                    let request = self.tracker.start_emulating(device, self.serials.last())?;
                    self.queue(&request)?;
                }
            }
            Step::Emit(call) => {
                let request = self.tracker.emit(role_handles(handles, call.capability())?, call)?;
                self.queue(&request)?;
            }
            Step::Frame(role) => {
                let device = role_handles(handles, *role)?.device;
                let commit = FrameCommit::new(device, self.serials.last(), monotonic_us());
                let request = self.tracker.commit_frame(commit)?;
                self.queue(&request)?;
                self.send(run).await?;
            }
            Step::Wait(duration) => {
                self.send(run).await?;
                self.wait(*duration, in_use, reply).await?;
            }
            Step::Stop(role) => {
                let device = role_handles(handles, *role)?.device;
                if let Some(count) = run.started.get_mut(&device) {
                    *count = count.saturating_sub(1);
                    if *count > 0 {
                        return Ok(());
                    }
                }
                let request = self.tracker.stop_emulating(device, self.serials.last())?;
                self.queue(&request)?;
                self.send(run).await?;
            }
            Step::Checkpoint => {
                run.completed += 1;
                self.drain(in_use).await?;
            }
        }
        Ok(())
    }

    /// Flushes and remembers that this gesture reached the wire.
    async fn send(&mut self, run: &mut PlanRun) -> Result<(), InputError> {
        let pending = !self.out.is_empty();
        self.flush().await?;
        run.wrote |= pending;
        Ok(())
    }

    /// Sleeps for `duration` while still handling incoming events.
    async fn wait(&mut self, duration: Duration, in_use: &[u64], reply: &mut Reply) -> Result<(), InputError> {
        let deadline = time::Instant::now() + duration;
        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => return Ok(()),
                _ = reply.closed() => return Err(InputError::Cancelled),
                inbound = self.inbound.recv(), if !self.inbound_done => match inbound {
                    Some(inbound) => {
                        let interrupted = self.handle_inbound(inbound).await?;
                        check_interrupted(interrupted, in_use)?;
                    }
                    None => self.inbound_done = true,
                },
            }
        }
    }

    /// Releases everything the gesture holds and builds the error to report.
    ///
    /// A failure before anything reached the wire is reported as is, with
    /// the tracker rolled back.  Later failures become
    /// [`InputError::PartialGesture`].
    async fn abort(
        &mut self,
        cause: InputError,
        run: &PlanRun,
        handles: &BTreeMap<Capability, DeviceHandles>,
    ) -> InputError {
        let ts = monotonic_us();
        let serial = self.serials.last();
        if !run.wrote {
            self.out.clear();
            for device in run.started.keys() {
                let unsent = DeviceHandles::new(*device);
                self.tracker.force_release(&unsent, serial, ts);
            }
            return cause;
        }

        let mut released = Vec::new();
        let mut seen = Vec::new();
        for h in handles.values() {
            if seen.contains(&h.device) {
                continue;
            }
            seen.push(h.device);
            released.extend(self.tracker.force_release(h, serial, ts));
        }
        if self.fatal.is_none() {
            self.out.clear();
            let queued: Result<(), InputError> = released.iter().try_for_each(|r| self.queue(r));
            let sent = match queued {
                Ok(()) => self.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!("could not deliver release after failed gesture: {e}");
            }
        }
        warn!("gesture aborted after {} steps: {cause}", run.completed);
        InputError::partial(run.completed, cause)
    }

    // ── Round trip and teardown ──────────────────────────────────────────

    async fn sync(&mut self) -> Result<(), InputError> {
        if self.fatal.is_some() {
            return Err(self.connection_error());
        }
        let connection = self
            .registry
            .connection()
            .ok_or_else(|| InputError::Connection("no connection object".to_string()))?;
        let callback = self
            .ids
            .next()
            .ok_or_else(|| InputError::Connection("client object ids exhausted".to_string()))?;
        self.registry
            .bind(connection, callback, InterfaceKind::Callback, 1)?;
        self.queue(&Request::Sync {
            connection,
            callback,
            version: 1,
        })?;
        self.flush().await?;

        while !self.done_callbacks.contains(&callback) {
            match self.next_inbound().await {
                Some(inbound) => {
                    self.handle_inbound(inbound).await?;
                }
                None => return Err(self.connection_error()),
            }
        }
        self.done_callbacks.retain(|c| *c != callback);
        debug!("sync {callback} done");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), InputError> {
        if self.fatal.is_some() {
            return Ok(());
        }
        let ts = monotonic_us();
        let serial = self.serials.last();
        for device in self.tracker.emulating_devices() {
            let handles = self
                .registry
                .device(device)
                .map(|d| d.handles())
                .unwrap_or_else(|| DeviceHandles::new(device));
            for request in self.tracker.force_release(&handles, serial, ts) {
                self.queue(&request)?;
            }
        }
        if let Some(connection) = self.registry.connection() {
            self.queue(&Request::Disconnect { connection })?;
        }
        let result = self.flush().await;
        self.fatal = Some("the session was closed".to_string());
        self.tracker.clear();
        self.registry.clear();
        info!("EI session closed");
        result
    }
}

impl<W> Drop for Dispatcher<W> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Progress of one plan execution.
#[derive(Debug, Default)]
struct PlanRun {
    completed: usize,
    /// Devices this plan started, with the number of roles sharing each.
    started: BTreeMap<u64, usize>,
    wrote: bool,
}

fn role_handles(
    handles: &BTreeMap<Capability, DeviceHandles>,
    role: Capability,
) -> Result<&DeviceHandles, InputError> {
    handles.get(&role).ok_or(InputError::CapabilityUnavailable(role))
}

fn check_interrupted(interrupted: Option<u64>, in_use: &[u64]) -> Result<(), InputError> {
    match interrupted {
        Some(device) if in_use.contains(&device) => Err(InputError::ProtocolViolation(format!(
            "device {device:#x} was paused or removed mid-gesture"
        ))),
        _ => Ok(()),
    }
}


// ── Public handle ─────────────────────────────────────────────────────────────

/// A connected EI sender session.
///
/// Cheap to share behind an `Arc`; all calls are serialized through the
/// dispatcher task, so gestures never interleave on the wire.
///
/// # Examples
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), eis_client::InputError> {
/// use eis_client::{ClientConfig, InputSession};
/// use eis_core::MouseButton;
///
/// let session = InputSession::connect_unix("/run/user/1000/eis-0", &ClientConfig::default()).await?;
/// session.click(100.0, 200.0, MouseButton::Left, 1, &[], 0).await?;
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct InputSession {
    commands: mpsc::Sender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InputSession {
    /// Runs the handshake over `stream` and starts the dispatcher.
    ///
    /// # Errors
    ///
    /// - [`InputError::CapabilityUnavailable`] if a required capability has
    ///   no usable device when the handshake timeout expires.
    /// - [`InputError::Connection`] if the channel fails or closes.
    /// - [`InputError::ProtocolViolation`] if the server misbehaves.
    pub async fn connect<S>(stream: S, config: &ClientConfig) -> Result<Self, InputError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_loop(read_half, inbound_tx));

        let mut dispatcher = Dispatcher::new(write_half, inbound_rx, config);
        dispatcher.reader = Some(reader);
        dispatcher.handshake(config.handshake_timeout()).await?;

        let (commands, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(dispatcher.run(commands_rx));
        Ok(Self {
            commands,
            task: Mutex::new(Some(task)),
        })
    }

    /// Connects to the EIS Unix socket at `path`.
    ///
    /// # Errors
    ///
    /// [`InputError::Connection`] if the socket cannot be opened, plus
    /// everything [`InputSession::connect`] returns.
    pub async fn connect_unix(path: impl AsRef<Path>, config: &ClientConfig) -> Result<Self, InputError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            InputError::Connection(format!("could not connect to {}: {e}", path.display()))
        })?;
        info!("connected to EIS socket {}", path.display());
        Self::connect(stream, config).await
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<(), InputError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| InputError::Connection("the session task has stopped".to_string()))?;
        rx.await
            .map_err(|_| InputError::Connection("the session task has stopped".to_string()))?
    }

    /// Performs one gesture to completion.
    ///
    /// # Errors
    ///
    /// Any [`InputError`]; see the variant docs for what each one means.
    pub async fn perform(&self, gesture: Gesture) -> Result<(), InputError> {
        self.request(|reply| Command::Perform { gesture, reply }).await
    }

    /// Moves the pointer to `(x, y)`.
    pub async fn move_to(&self, x: f64, y: f64) -> Result<(), InputError> {
        self.perform(Gesture::Move { x, y }).await
    }

    /// Clicks `count` times at `(x, y)` with `modifiers` held.  `hold_ms`
    /// keeps the last press down that long.
    pub async fn click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        count: u32,
        modifiers: &[Modifier],
        hold_ms: u64,
    ) -> Result<(), InputError> {
        self.perform(Gesture::Click {
            x,
            y,
            button,
            count,
            modifiers: modifiers.to_vec(),
            hold_ms,
        })
        .await
    }

    /// Presses `button` at `(x, y)` and leaves it held.
    pub async fn button_down(&self, x: f64, y: f64, button: MouseButton) -> Result<(), InputError> {
        self.perform(Gesture::ButtonDown { x, y, button }).await
    }

    /// Releases `button` at `(x, y)`.  Fails with
    /// [`InputError::ProtocolViolation`] if nothing is being emulated.
    pub async fn button_up(&self, x: f64, y: f64, button: MouseButton) -> Result<(), InputError> {
        self.perform(Gesture::ButtonUp { x, y, button }).await
    }

    /// Drags from `from` through `waypoints` to `to`.
    pub async fn drag(
        &self,
        from: Point,
        to: Point,
        waypoints: &[Waypoint],
        button: MouseButton,
        modifiers: &[Modifier],
    ) -> Result<(), InputError> {
        self.perform(Gesture::Drag {
            from,
            to,
            waypoints: waypoints.to_vec(),
            button,
            modifiers: modifiers.to_vec(),
        })
        .await
    }

    /// Scrolls `delta` units at `(x, y)` in `steps` increments.
    pub async fn scroll(
        &self,
        x: f64,
        y: f64,
        delta: i32,
        axis: ScrollAxis,
        discrete: bool,
        steps: u32,
    ) -> Result<(), InputError> {
        self.perform(Gesture::Scroll {
            x,
            y,
            delta,
            axis,
            discrete,
            steps,
        })
        .await
    }

    /// Presses and holds a key or combo such as `"shift"` or `"ctrl+a"`.
    pub async fn key_down(&self, combo: &str) -> Result<(), InputError> {
        self.perform(Gesture::KeyDown {
            combo: combo.to_string(),
        })
        .await
    }

    pub async fn key_up(&self, combo: &str) -> Result<(), InputError> {
        self.perform(Gesture::KeyUp {
            combo: combo.to_string(),
        })
        .await
    }

    /// Presses and releases a combo such as `"ctrl+shift+t"`.
    pub async fn key_combo(&self, combo: &str) -> Result<(), InputError> {
        // Parse early so a bad combo never reaches the dispatcher.
        KeyMapper::parse_combo(combo)?;
        self.perform(Gesture::KeyCombo {
            combo: combo.to_string(),
        })
        .await
    }

    /// Types `text` on the US layout.
    pub async fn type_text(&self, text: &str) -> Result<(), InputError> {
        self.perform(Gesture::Type {
            text: text.to_string(),
        })
        .await
    }

    pub async fn touch_tap(&self, x: f64, y: f64, hold_ms: u64) -> Result<(), InputError> {
        self.perform(Gesture::TouchTap { x, y, hold_ms }).await
    }

    pub async fn touch_swipe(&self, from: Point, to: Point, duration_ms: u64) -> Result<(), InputError> {
        self.perform(Gesture::TouchSwipe {
            from,
            to,
            duration_ms,
        })
        .await
    }

    /// Two fingers about `center`, from `start_distance` apart to
    /// `end_distance` apart.
    pub async fn touch_pinch(
        &self,
        center: Point,
        start_distance: f64,
        end_distance: f64,
        duration_ms: u64,
    ) -> Result<(), InputError> {
        self.perform(Gesture::TouchPinch {
            center,
            start_distance,
            end_distance,
            duration_ms,
        })
        .await
    }

    /// `fingers` (2–5) contacts moved together from `from` to `to`.
    pub async fn touch_multi_swipe(
        &self,
        from: Point,
        to: Point,
        fingers: u32,
        duration_ms: u64,
    ) -> Result<(), InputError> {
        self.perform(Gesture::TouchMultiSwipe {
            from,
            to,
            fingers,
            duration_ms,
        })
        .await
    }

    /// Waits until the server has processed everything sent so far.
    pub async fn sync(&self) -> Result<(), InputError> {
        self.request(|reply| Command::Sync { reply }).await
    }

    /// Releases all held input, disconnects and stops the dispatcher.
    pub async fn close(&self) -> Result<(), InputError> {
        let result = self.request(|reply| Command::Close { reply }).await;
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("dispatcher task ended abnormally: {e}");
            }
        }
        result
    }
}

#[async_trait::async_trait]
impl crate::application::backend::InputBackend for InputSession {
    async fn perform(&self, gesture: Gesture) -> Result<(), InputError> {
        InputSession::perform(self, gesture).await
    }

    async fn sync(&self) -> Result<(), InputError> {
        InputSession::sync(self).await
    }

    async fn close(&self) -> Result<(), InputError> {
        InputSession::close(self).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use eis_core::protocol::{Region, SERVER_ID_BASE};
    use eis_core::protocol::decode;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    const CONN: u64 = SERVER_ID_BASE;
    const SEAT: u64 = SERVER_ID_BASE + 1;
    const DEV: u64 = SERVER_ID_BASE + 2;
    const POINTER: u64 = SERVER_ID_BASE + 3;
    const BUTTON: u64 = SERVER_ID_BASE + 4;
    const KEYBOARD: u64 = SERVER_ID_BASE + 5;

    /// Accepts a fixed number of writes, then fails with a broken pipe.
    struct FailingWriter {
        remaining: usize,
        written: Arc<AtomicUsize>,
        bytes: Vec<u8>,
    }

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")));
            }
            self.remaining -= 1;
            self.written.fetch_add(1, Ordering::SeqCst);
            self.bytes.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// A dispatcher whose registry already holds one resumed pointer +
    /// keyboard device, as if the handshake had run.
    fn connected(writes_allowed: usize) -> (Dispatcher<FailingWriter>, mpsc::Sender<Inbound>, Arc<AtomicUsize>) {
        let written = Arc::new(AtomicUsize::new(0));
        let writer = FailingWriter {
            remaining: writes_allowed,
            written: Arc::clone(&written),
            bytes: Vec::new(),
        };
        let (tx, rx) = mpsc::channel(8);
        let mut d = Dispatcher::new(writer, rx, &ClientConfig::default());

        let events = [
            Event::HandshakeVersion { version: 1 },
            Event::HandshakeConnection {
                serial: 0,
                connection: CONN,
                version: 1,
            },
            Event::SeatAdded {
                seat: SEAT,
                version: 1,
            },
            Event::DeviceAdded {
                seat: SEAT,
                device: DEV,
                version: 1,
            },
            Event::DeviceRegion {
                device: DEV,
                region: Region {
                    offset_x: 0,
                    offset_y: 0,
                    width: 1920,
                    height: 1080,
                    scale: 1.0,
                },
            },
            Event::DeviceInterface {
                device: DEV,
                object: POINTER,
                interface: "ei_pointer_absolute".to_string(),
                version: 1,
            },
            Event::DeviceInterface {
                device: DEV,
                object: BUTTON,
                interface: "ei_button".to_string(),
                version: 1,
            },
            Event::DeviceInterface {
                device: DEV,
                object: KEYBOARD,
                interface: "ei_keyboard".to_string(),
                version: 1,
            },
            Event::DeviceDone { device: DEV },
            Event::DeviceResumed {
                device: DEV,
                serial: 1,
            },
        ];
        for event in &events {
            d.negotiator.on_event(event, &mut d.registry).unwrap();
        }
        d.serials.observe(1);
        (d, tx, written)
    }

    /// Decodes everything the writer accepted into (object, opcode) pairs.
    fn wire_trace(bytes: &[u8]) -> Vec<(u64, u32)> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (raw, used) = decode(&bytes[offset..]).unwrap();
            out.push((raw.object_id, raw.opcode));
            offset += used;
        }
        out
    }

    fn drag() -> Gesture {
        Gesture::Drag {
            from: Point::new(100.0, 100.0),
            to: Point::new(200.0, 100.0),
            waypoints: Vec::new(),
            button: MouseButton::Left,
            modifiers: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_mid_drag_reports_completed_steps() {
        // Arrange – the first write carries start+press, then one write per
        // interpolation step; the fifth write fails.
        let (mut d, _tx, written) = connected(4);
        let (mut reply, _rx) = oneshot::channel();

        // Act
        let result = d.perform(&drag(), &mut reply).await;

        // Assert
        match result {
            Err(InputError::PartialGesture {
                completed_steps,
                source,
            }) => {
                assert_eq!(completed_steps, 3);
                assert!(matches!(*source, InputError::Connection(_)));
            }
            other => panic!("expected partial gesture failure, got {other:?}"),
        }
        assert_eq!(written.load(Ordering::SeqCst), 4);
        assert!(!d.tracker.is_emulating(DEV));
        assert!(d.tracker.view(DEV).held_buttons.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_after_write_failure_fail_with_connection_error() {
        let (mut d, _tx, _) = connected(0);
        let (mut reply, _rx) = oneshot::channel();
        let first = d.perform(&Gesture::Move { x: 10.0, y: 10.0 }, &mut reply).await;
        assert!(matches!(first, Err(InputError::PartialGesture { .. }) | Err(InputError::Connection(_))));

        let (mut reply, _rx) = oneshot::channel();
        let second = d.perform(&Gesture::Move { x: 10.0, y: 10.0 }, &mut reply).await;

        assert!(matches!(second, Err(InputError::Connection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_trace_is_bracketed_by_one_start_stop_pair() {
        // Arrange
        let (mut d, _tx, _) = connected(usize::MAX);
        let (mut reply, _rx) = oneshot::channel();
        let click = Gesture::Click {
            x: 100.0,
            y: 200.0,
            button: MouseButton::Left,
            count: 1,
            modifiers: Vec::new(),
            hold_ms: 0,
        };

        // Act
        d.perform(&click, &mut reply).await.unwrap();

        // Assert
        let trace = wire_trace(&d.writer.bytes);
        assert_eq!(
            trace,
            vec![
                (DEV, 1),     // start_emulating
                (POINTER, 1), // motion_absolute
                (BUTTON, 1),  // press
                (DEV, 3),     // frame
                (BUTTON, 1),  // release
                (DEV, 3),     // frame
                (DEV, 2),     // stop_emulating
            ]
        );
        assert!(!d.tracker.is_emulating(DEV));
        assert_eq!(d.pointer, Some(Point::new(100.0, 200.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_device_starts_once_for_pointer_and_keyboard() {
        // Arrange – pointer and keyboard live on the same device
        let (mut d, _tx, _) = connected(usize::MAX);
        let (mut reply, _rx) = oneshot::channel();
        let click = Gesture::Click {
            x: 10.0,
            y: 10.0,
            button: MouseButton::Left,
            count: 1,
            modifiers: vec![Modifier::Ctrl],
            hold_ms: 0,
        };

        // Act
        d.perform(&click, &mut reply).await.unwrap();

        // Assert
        let trace = wire_trace(&d.writer.bytes);
        let starts = trace.iter().filter(|m| **m == (DEV, 1)).count();
        let stops = trace.iter().filter(|m| **m == (DEV, 2)).count();
        assert_eq!((starts, stops), (1, 1));
        assert_eq!(trace.first(), Some(&(DEV, 1)));
        assert_eq!(trace.last(), Some(&(DEV, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_up_while_idle_writes_nothing() {
        let (mut d, _tx, written) = connected(usize::MAX);
        let (mut reply, _rx) = oneshot::channel();

        let result = d
            .perform(
                &Gesture::ButtonUp {
                    x: 10.0,
                    y: 10.0,
                    button: MouseButton::Left,
                },
                &mut reply,
            )
            .await;

        assert!(matches!(result, Err(InputError::ProtocolViolation(_))));
        assert_eq!(written.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_without_scroll_interface_is_capability_unavailable() {
        let (mut d, _tx, written) = connected(usize::MAX);
        let (mut reply, _rx) = oneshot::channel();
        let scroll = Gesture::Scroll {
            x: 10.0,
            y: 10.0,
            delta: 3,
            axis: ScrollAxis::Vertical,
            discrete: true,
            steps: 1,
        };

        let result = d.perform(&scroll, &mut reply).await;

        assert_eq!(result, Err(InputError::CapabilityUnavailable(Capability::Pointer)));
        assert_eq!(written.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_without_touch_device_is_capability_unavailable() {
        let (mut d, _tx, _) = connected(usize::MAX);
        let (mut reply, _rx) = oneshot::channel();

        let result = d
            .perform(
                &Gesture::TouchTap {
                    x: 5.0,
                    y: 5.0,
                    hold_ms: 0,
                },
                &mut reply,
            )
            .await;

        assert_eq!(result, Err(InputError::CapabilityUnavailable(Capability::Touch)));
    }

    fn paused_message(serial: u32) -> RawMessage {
        let bytes = Event::DevicePaused {
            device: DEV,
            serial,
        }
        .encode(DEV)
        .unwrap();
        decode(&bytes).unwrap().0
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_during_drag_aborts_and_releases() {
        // Arrange – the server pauses the device while the drag is running
        let (mut d, tx, _) = connected(usize::MAX);
        let (mut reply, _rx) = oneshot::channel();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(55)).await;
            let _ = tx.send(Inbound::Message(paused_message(7))).await;
        });

        // Act
        let result = d.perform(&drag(), &mut reply).await;

        // Assert
        match result {
            Err(InputError::PartialGesture {
                completed_steps,
                source,
            }) => {
                assert!(completed_steps > 0 && completed_steps < 10);
                assert!(matches!(*source, InputError::ProtocolViolation(_)));
            }
            other => panic!("expected partial gesture failure, got {other:?}"),
        }
        assert!(!d.tracker.is_emulating(DEV));
        assert_eq!(d.serials.last(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancel_mid_drag_releases_button() {
        // Arrange – the caller stops waiting while the drag sleeps between steps
        let (mut d, _tx, _) = connected(usize::MAX);
        let (mut reply, rx) = oneshot::channel::<Result<(), InputError>>();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(37)).await;
            drop(rx);
        });

        // Act
        let result = d.perform(&drag(), &mut reply).await;

        // Assert
        match result {
            Err(InputError::PartialGesture {
                completed_steps,
                source,
            }) => {
                assert!(completed_steps > 0);
                assert_eq!(*source, InputError::Cancelled);
            }
            other => panic!("expected partial gesture failure, got {other:?}"),
        }
        assert!(!d.tracker.is_emulating(DEV));
        assert!(d.tracker.view(DEV).held_buttons.is_empty());
        let trace = wire_trace(&d.writer.bytes);
        assert_eq!(trace[trace.len() - 3..], [(BUTTON, 1), (DEV, 3), (DEV, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_gone_before_start_sends_nothing() {
        // Arrange
        let (mut d, _tx, written) = connected(usize::MAX);
        let (mut reply, rx) = oneshot::channel::<Result<(), InputError>>();
        drop(rx);

        // Act
        let result = d.perform(&drag(), &mut reply).await;

        // Assert
        assert_eq!(result, Err(InputError::Cancelled));
        assert_eq!(written.load(Ordering::SeqCst), 0);
        assert!(!d.tracker.is_emulating(DEV));

        // The session survives a cancellation.
        let (mut reply, _rx) = oneshot::channel();
        d.perform(&Gesture::Move { x: 5.0, y: 5.0 }, &mut reply)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_device_is_not_used() {
        let (mut d, tx, written) = connected(usize::MAX);
        tx.send(Inbound::Message(paused_message(3))).await.unwrap();
        let (mut reply, _rx) = oneshot::channel();

        let result = d.perform(&drag(), &mut reply).await;

        assert_eq!(result, Err(InputError::CapabilityUnavailable(Capability::Pointer)));
        assert_eq!(written.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_held_button_then_disconnects() {
        // Arrange
        let (mut d, _tx, _) = connected(usize::MAX);
        let (mut reply, _rx) = oneshot::channel();
        d.perform(
            &Gesture::ButtonDown {
                x: 10.0,
                y: 10.0,
                button: MouseButton::Left,
            },
            &mut reply,
        )
        .await
        .unwrap();
        let before = d.writer.bytes.len();

        // Act
        d.close().await.unwrap();

        // Assert
        let trace = wire_trace(&d.writer.bytes[before..]);
        assert_eq!(
            trace,
            vec![(BUTTON, 1), (DEV, 3), (DEV, 2), (CONN, 1)]
        );
        assert!(d.tracker.emulating_devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_leaves_no_device_emulating() {
        // Arrange – a button is held when the reader reports the peer gone
        let (mut d, tx, _) = connected(usize::MAX);
        let (mut reply, _rx) = oneshot::channel();
        d.perform(
            &Gesture::ButtonDown {
                x: 10.0,
                y: 10.0,
                button: MouseButton::Left,
            },
            &mut reply,
        )
        .await
        .unwrap();
        assert!(d.tracker.is_emulating(DEV));
        tx.send(Inbound::Closed(InputError::Connection("peer gone".to_string())))
            .await
            .unwrap();
        let before = d.writer.bytes.len();

        // Act
        let result = d.perform(&Gesture::Move { x: 20.0, y: 20.0 }, &mut reply).await;

        // Assert
        assert_eq!(result, Err(InputError::Connection("peer gone".to_string())));
        assert!(!d.tracker.is_emulating(DEV));
        assert!(d.tracker.emulating_devices().is_empty());
        assert!(d.tracker.view(DEV).held_buttons.is_empty());
        assert_eq!(d.writer.bytes.len(), before, "nothing is written after the loss");
        assert!(d.close().await.is_ok());
    }

    // ── Reader ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_read_loop_reassembles_messages_split_across_reads() {
        // Arrange
        let mut bytes = eis_core::protocol::Event::DeviceDone { device: DEV }
            .encode(DEV)
            .unwrap();
        bytes.extend(
            eis_core::protocol::Event::DeviceResumed {
                device: DEV,
                serial: 9,
            }
            .encode(DEV)
            .unwrap(),
        );
        let stream = tokio_test::io::Builder::new()
            .read(&bytes[..10])
            .read(&bytes[10..30])
            .read(&bytes[30..])
            .build();
        let (tx, mut rx) = mpsc::channel(8);

        // Act
        read_loop(stream, tx).await;

        // Assert
        let mut opcodes = Vec::new();
        while let Some(inbound) = rx.recv().await {
            match inbound {
                Inbound::Message(raw) => opcodes.push((raw.object_id, raw.opcode)),
                Inbound::Closed(e) => {
                    assert!(matches!(e, InputError::Connection(_)), "EOF is a connection error");
                    break;
                }
            }
        }
        assert_eq!(opcodes, vec![(DEV, 6), (DEV, 7)]);
    }

    #[tokio::test]
    async fn test_read_loop_stops_at_impossible_length() {
        // Arrange – header claiming a 4 GiB message
        let mut header = Vec::new();
        header.extend_from_slice(&DEV.to_ne_bytes());
        header.extend_from_slice(&u32::MAX.to_ne_bytes());
        header.extend_from_slice(&0u32.to_ne_bytes());
        let stream = tokio_test::io::Builder::new().read(&header).build();
        let (tx, mut rx) = mpsc::channel(8);

        // Act
        read_loop(stream, tx).await;

        // Assert
        assert!(matches!(rx.recv().await, Some(Inbound::Closed(_))));
        assert!(rx.recv().await.is_none(), "nothing may follow the close");
    }
}
