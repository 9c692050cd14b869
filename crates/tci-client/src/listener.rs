//! TCI connection core.
//!
//! [`Listener`] owns one connection to a TCI server. `start()` spawns a
//! connection task that performs the transport handshake and then runs two
//! loops over the split connection:
//!
//! - the **receive loop** parses every inbound frame, updates the
//!   [`ParameterStore`] and dispatches callbacks;
//! - the **send loop** drains the outbound queue onto the transport in
//!   FIFO order, one frame at a time.
//!
//! Both loops share one [`CancellationToken`] and hold a drop guard on it,
//! so whichever exits first (error, remote close, or `shutdown()`) cancels
//! the other. The connection task joins both before it reports completion
//! through `wait()`.
//!
//! ```text
//! Idle -> Connecting -> AwaitingReady -> Ready
//!            \               \             \
//!             +---------------+-------------+--> Closed
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{RwLock, RwLockReadGuard, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tci_core::{Connection, Connector, Error, Frame, FrameReader, FrameWriter, ParamValue, Result, Value};

use crate::builder::{ListenerBuilder, ListenerOptions};
use crate::codec;
use crate::commands::{self, Action, CommandSpec, ParamCount};
use crate::dispatch::{DataCallback, DataKey, Dispatcher, FailureReporter, ParamCallback, ParamKey};
use crate::events::{ConnectionState, ParamEvent, TciEvent};
use crate::packet::DataPacket;
use crate::store::ParameterStore;

/// One queued outbound frame and the channel its write result goes to.
struct Outbound {
    frame: Frame,
    ack: Option<oneshot::Sender<Result<()>>>,
}

/// State shared between the listener handle and its connection task.
struct Shared {
    store: RwLock<ParameterStore>,
    dispatcher: Dispatcher,
    events: broadcast::Sender<TciEvent>,
    state: watch::Sender<ConnectionState>,
    /// Generation of the newest session. State writes from older sessions
    /// are dropped.
    generation: AtomicU64,
}

impl Shared {
    /// Begin a new session generation and move to `Connecting`.
    fn next_generation(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.transition(generation, |_| true, ConnectionState::Connecting);
        generation
    }

    fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        self.transition(generation, |_| true, state)
    }

    /// Move to `state` if `generation` is still current and `allowed`
    /// accepts the present state. Returns whether the state changed.
    fn transition(
        &self,
        generation: u64,
        allowed: impl FnOnce(ConnectionState) -> bool,
        state: ConnectionState,
    ) -> bool {
        let mut previous = state;
        let changed = self.state.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation || !allowed(*current) {
                return false;
            }
            previous = std::mem::replace(current, state);
            previous != state
        });
        if changed {
            tracing::debug!(from = %previous, to = %state, generation, "TCI connection state changed");
        }
        changed
    }

    fn publish(&self, event: TciEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Resources of one `start()` attempt.
struct Session {
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

/// Client for one TCI server connection.
///
/// Construct with [`Listener::builder`] (or [`Listener::with_connector`]),
/// register callbacks, then call [`start`](Self::start) and
/// [`ready`](Self::ready). The listener may be shared across tasks behind
/// an `Arc`; every method takes `&self`.
pub struct Listener {
    connector: Arc<dyn Connector>,
    options: ListenerOptions,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl Listener {
    /// Start configuring a listener.
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::new()
    }

    /// Create an idle listener on an arbitrary connector.
    pub fn with_connector(connector: Arc<dyn Connector>, options: ListenerOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_channel_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            connector,
            options,
            shared: Arc::new(Shared {
                store: RwLock::new(ParameterStore::new()),
                dispatcher: Dispatcher::new(),
                events,
                state,
                generation: AtomicU64::new(0),
            }),
            session: Mutex::new(None),
        }
    }

    /// Endpoint description of the underlying connector.
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to the event broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<TciEvent> {
        self.shared.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Connect and start the receive and send loops.
    ///
    /// Returns once the transport handshake has completed. If the handshake
    /// fails the connection error is returned; if `timeout` elapses first
    /// the attempt is cancelled and [`Error::Timeout`] is returned. Calling
    /// `start()` while a connection is live is a no-op. Otherwise any
    /// previous connection task is cancelled and awaited first, then a new
    /// connection is started.
    pub async fn start(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        if let Some(task) = self.retire_session() {
            match tokio::time::timeout_at(deadline, join(task)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Previous TCI connection ended with error"),
                Err(_) => {
                    tracing::debug!(endpoint = %self.endpoint(), ?timeout, "Previous TCI connection did not stop in time");
                    return Err(Error::Timeout);
                }
            }
        }

        let mut state_rx = self.shared.state.subscribe();
        {
            let mut session = self.lock_session();
            if !self.is_live(session.as_ref()) {
                *session = Some(self.spawn_session());
            }
        }

        let outcome = tokio::time::timeout_at(deadline, async {
            let state = state_rx
                .wait_for(|s| *s != ConnectionState::Connecting)
                .await
                .map(|s| *s);
            match state {
                Ok(ConnectionState::Closed) => match self.take_task() {
                    Some(task) => Err(join(task).await.err().unwrap_or(Error::ConnectionLost)),
                    None => Err(Error::ConnectionLost),
                },
                Ok(_) => Ok(()),
                Err(_) => Err(Error::NotConnected),
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(endpoint = %self.endpoint(), ?timeout, "TCI connect timed out");
                self.abort().await;
                Err(Error::Timeout)
            }
        }
    }

    /// Wait for the server's `READY` notification.
    ///
    /// On timeout the connection is cancelled and [`Error::Timeout`] is
    /// returned. Fails with [`Error::ConnectionLost`] if the connection
    /// closes first, and [`Error::NotConnected`] if `start()` was never
    /// called.
    pub async fn ready(&self, timeout: Duration) -> Result<()> {
        let mut state_rx = self.shared.state.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            state_rx
                .wait_for(|s| {
                    matches!(
                        s,
                        ConnectionState::Ready | ConnectionState::Closed | ConnectionState::Idle
                    )
                })
                .await
                .map(|s| *s)
        })
        .await;

        match waited {
            Ok(Ok(ConnectionState::Ready)) => Ok(()),
            Ok(Ok(ConnectionState::Idle)) => Err(Error::NotConnected),
            Ok(_) => Err(Error::ConnectionLost),
            Err(_) => {
                tracing::debug!(endpoint = %self.endpoint(), ?timeout, "TCI READY timed out");
                self.abort().await;
                Err(Error::Timeout)
            }
        }
    }

    /// Cancel the connection and both loops. Does not wait for them; use
    /// [`wait`](Self::wait) for that.
    pub fn shutdown(&self) {
        if let Some(session) = self.lock_session().as_ref() {
            tracing::debug!(endpoint = %self.endpoint(), "TCI shutdown requested");
            session.cancel.cancel();
        }
    }

    /// Wait until the connection task has terminated.
    ///
    /// Returns the terminal error: a protocol or transport error,
    /// [`Error::ConnectionLost`] after a remote close, or
    /// [`Error::Callback`] when aborting on callback errors. After
    /// `shutdown()` it returns `Ok(())`. The terminal error is reported to
    /// the first caller only.
    pub async fn wait(&self) -> Result<()> {
        if let Some(task) = self.take_task() {
            return join(task).await;
        }
        let mut state_rx = self.shared.state.subscribe();
        let _ = state_rx
            .wait_for(|s| matches!(s, ConnectionState::Idle | ConnectionState::Closed))
            .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Queue a frame and wait until the transport has accepted it.
    pub async fn send(&self, data: impl Into<Frame>) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.enqueue(data.into(), Some(ack_tx))?;
        ack_rx.await.unwrap_or(Err(Error::ConnectionLost))
    }

    /// Queue a frame without waiting for it to be written.
    ///
    /// Frames queued while connecting are sent once the handshake
    /// completes. Fails with [`Error::NotConnected`] when there is no live
    /// connection attempt.
    pub fn send_nowait(&self, data: impl Into<Frame>) -> Result<()> {
        self.enqueue(data.into(), None)
    }

    /// Encode and send a stream packet (e.g. TX audio).
    pub async fn send_packet(&self, packet: &DataPacket) -> Result<()> {
        let buf = packet.encode()?;
        self.send(buf.to_vec()).await
    }

    /// Build, validate and send a command by name.
    pub async fn send_command(
        &self,
        name: &str,
        action: Action,
        rx: Option<u32>,
        sub_rx: Option<u32>,
        values: &[Value],
    ) -> Result<()> {
        let line = commands::require(name)?.build_outbound(action, rx, sub_rx, values, true)?;
        self.send(line).await
    }

    fn enqueue(&self, frame: Frame, ack: Option<oneshot::Sender<Result<()>>>) -> Result<()> {
        let session = self.lock_session();
        let Some(session) = session.as_ref().filter(|s| !s.cancel.is_cancelled()) else {
            return Err(Error::NotConnected);
        };
        session
            .outbound
            .send(Outbound { frame, ack })
            .map_err(|_| Error::NotConnected)
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    /// Last cached value of a parameter.
    ///
    /// Fails with [`Error::InvalidParameter`] if the command needs a
    /// receiver or channel index that was not supplied.
    pub async fn query(
        &self,
        spec: &CommandSpec,
        rx: Option<u32>,
        sub_rx: Option<u32>,
    ) -> Result<Option<ParamValue>> {
        let store = self.shared.store.read().await;
        Ok(store.query(spec, rx, sub_rx)?.cloned())
    }

    /// [`query`](Self::query) by command name.
    pub async fn get(&self, name: &str, rx: Option<u32>, sub_rx: Option<u32>) -> Result<Option<ParamValue>> {
        self.query(commands::require(name)?, rx, sub_rx).await
    }

    /// Read access to the whole cache.
    pub async fn store(&self) -> RwLockReadGuard<'_, ParameterStore> {
        self.shared.store.read().await
    }

    /// Copy of the whole cache.
    pub async fn snapshot(&self) -> ParameterStore {
        self.shared.store.read().await.clone()
    }

    // -----------------------------------------------------------------------
    // Listener registration
    // -----------------------------------------------------------------------

    /// Register a callback for a command name, or `"*"` for all.
    ///
    /// Returns `false` if the callback was already registered under this
    /// key. Unknown command names are rejected.
    pub fn add_param_listener(&self, name: &str, callback: ParamCallback) -> Result<bool> {
        Ok(self
            .shared
            .dispatcher
            .add_param_listener(ParamKey::parse(name)?, callback))
    }

    pub fn remove_param_listener(&self, name: &str, callback: &ParamCallback) -> Result<bool> {
        Ok(self
            .shared
            .dispatcher
            .remove_param_listener(ParamKey::parse(name)?, callback))
    }

    /// Register a callback for a stream type, or [`DataKey::All`].
    pub fn add_data_listener(&self, key: impl Into<DataKey>, callback: DataCallback) -> bool {
        self.shared.dispatcher.add_data_listener(key.into(), callback)
    }

    pub fn remove_data_listener(&self, key: impl Into<DataKey>, callback: &DataCallback) -> bool {
        self.shared.dispatcher.remove_data_listener(key.into(), callback)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, session: Option<&Session>) -> bool {
        session.is_some_and(|s| !s.cancel.is_cancelled()) && self.state() != ConnectionState::Closed
    }

    /// Detach a finished or cancelled session and return its task, if any.
    fn retire_session(&self) -> Option<JoinHandle<Result<()>>> {
        let mut session = self.lock_session();
        if self.is_live(session.as_ref()) {
            return None;
        }
        let previous = session.take()?;
        previous.cancel.cancel();
        previous.task
    }

    fn take_task(&self) -> Option<JoinHandle<Result<()>>> {
        self.lock_session().as_mut().and_then(|s| s.task.take())
    }

    /// Cancel the current attempt and wait for its task to finish.
    async fn abort(&self) {
        let task = {
            let mut session = self.lock_session();
            session.as_mut().and_then(|s| {
                s.cancel.cancel();
                s.task.take()
            })
        };
        if let Some(task) = task {
            if let Err(e) = join(task).await {
                tracing::debug!(error = %e, "TCI connection ended during abort");
            }
        }
    }

    fn spawn_session(&self) -> Session {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let callback_error = Arc::new(Mutex::new(None));

        let mut reporter = FailureReporter::new(self.shared.events.clone());
        if self.options.abort_on_callback_error {
            reporter = reporter.aborting(cancel.clone(), Arc::clone(&callback_error));
        }

        let generation = self.shared.next_generation();
        let task = tokio::spawn(run_connection(
            Arc::clone(&self.connector),
            Arc::clone(&self.shared),
            generation,
            outbound_rx,
            cancel.clone(),
            reporter,
            callback_error,
        ));

        Session {
            outbound: outbound_tx,
            cancel,
            task: Some(task),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(session) = self.lock_session().as_ref() {
            session.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(Error::Transport(format!("connection task failed: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

async fn run_connection(
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    generation: u64,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
    reporter: FailureReporter,
    callback_error: Arc<Mutex<Option<Error>>>,
) -> Result<()> {
    let endpoint = connector.endpoint();
    tracing::debug!(endpoint = %endpoint, "Connecting to TCI server");

    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = connector.connect() => Some(result),
    };

    let Connection { reader, writer } = match connected {
        Some(Ok(connection)) => connection,
        Some(Err(e)) => {
            tracing::debug!(endpoint = %endpoint, error = %e, "TCI connect failed");
            shared.set_state(generation, ConnectionState::Closed);
            shared.publish(TciEvent::Disconnected {
                error: Some(e.to_string()),
            });
            return Err(e);
        }
        None => {
            shared.set_state(generation, ConnectionState::Closed);
            shared.publish(TciEvent::Disconnected { error: None });
            return Ok(());
        }
    };

    tracing::debug!(endpoint = %endpoint, "TCI connected");
    shared.set_state(generation, ConnectionState::AwaitingReady);
    shared.publish(TciEvent::Connected);

    let (received, sent) = tokio::join!(
        receive_loop(reader, Arc::clone(&shared), generation, cancel.clone(), reporter),
        send_loop(writer, outbound, cancel.clone()),
    );

    let callback_error = callback_error
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let result = match (received.and(sent), callback_error) {
        (Err(e), _) => Err(e),
        (Ok(()), Some(e)) => Err(e),
        (Ok(()), None) => Ok(()),
    };

    match &result {
        Ok(()) => tracing::debug!(endpoint = %endpoint, "TCI connection closed"),
        Err(e) => tracing::error!(endpoint = %endpoint, error = %e, "TCI connection terminated"),
    }
    shared.set_state(generation, ConnectionState::Closed);
    shared.publish(TciEvent::Disconnected {
        error: result.as_ref().err().map(ToString::to_string),
    });
    result
}

async fn receive_loop(
    mut reader: Box<dyn FrameReader>,
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
    reporter: FailureReporter,
) -> Result<()> {
    let _guard = cancel.clone().drop_guard();
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frame = reader.recv() => frame?,
        };

        match frame {
            Some(Frame::Text(text)) => {
                tracing::trace!(frame = %text, "TCI rx");
                handle_text(&shared, generation, &text, &reporter).await?;
            }
            Some(Frame::Binary(buf)) => {
                tracing::trace!(bytes = buf.len(), "TCI rx data");
                handle_binary(&shared, &buf, &reporter)?;
            }
            None => {
                tracing::debug!("TCI server closed the connection");
                return Err(Error::ConnectionLost);
            }
        }
    }
}

async fn handle_text(
    shared: &Shared,
    generation: u64,
    text: &str,
    reporter: &FailureReporter,
) -> Result<()> {
    let notification = codec::parse_notification(text)?;
    let spec = notification.spec;
    let (rx, sub_rx) = (notification.rx, notification.sub_rx);

    let value = if spec.total_params() == ParamCount::Fixed(0) {
        None
    } else {
        let mut store = shared.store.write().await;
        store.apply(spec, rx, sub_rx, notification.values)?.cloned()
    };

    if spec.name == commands::READY
        && shared.transition(
            generation,
            |current| current == ConnectionState::AwaitingReady,
            ConnectionState::Ready,
        )
    {
        shared.publish(TciEvent::Ready);
    }

    let event = ParamEvent {
        name: spec.name,
        rx,
        sub_rx,
        value,
    };
    shared.dispatcher.dispatch_param(&event, reporter);
    shared.publish(TciEvent::Param(event));
    Ok(())
}

fn handle_binary(shared: &Shared, buf: &[u8], reporter: &FailureReporter) -> Result<()> {
    let packet = Arc::new(DataPacket::decode(buf)?);
    shared.publish(TciEvent::Data {
        rx: packet.rx,
        stream_type: packet.stream_type,
        sample_rate: packet.sample_rate,
        length: packet.length,
    });
    shared.dispatcher.dispatch_data(&packet, reporter);
    Ok(())
}

async fn send_loop(
    mut writer: Box<dyn FrameWriter>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = cancel.clone().drop_guard();
    let result = loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            item = outbound.recv() => item,
        };
        // Every sender dropped: the listener is gone.
        let Some(Outbound { frame, ack }) = item else {
            break Ok(());
        };

        if let Frame::Text(text) = &frame {
            tracing::trace!(frame = %text, "TCI tx");
        }
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            written = writer.send(frame) => written,
        };

        match written {
            Ok(()) => {
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(e) => {
                if let Some(ack) = ack {
                    let _ = ack.send(Err(Error::Transport(e.to_string())));
                }
                break Err(e);
            }
        }
    };

    if let Err(e) = writer.close().await {
        tracing::trace!(error = %e, "TCI close failed");
    }
    result
}
