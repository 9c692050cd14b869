//! Listener registration and fan-out.
//!
//! Consumers register callbacks for parameter notifications, keyed by
//! command name, and for stream packets, keyed by [`StreamType`]. Both
//! tables accept a wildcard key that matches everything. For each event the
//! callbacks under the exact key run first, then the wildcard callbacks,
//! each in registration order and each in its own tokio task.
//!
//! A callback's outcome is always observed. An error return or a panic is
//! logged, published as [`TciEvent::CallbackFailed`] and, when the listener
//! is configured to abort on callback errors, tears the connection down.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use tci_core::{Error, Result};

use crate::commands;
use crate::events::{ParamEvent, TciEvent};
use crate::packet::{DataPacket, StreamType};

/// Registration key that matches every parameter or stream type.
pub const WILDCARD: &str = "*";

/// Error type callbacks may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one callback invocation.
pub type CallbackResult = std::result::Result<(), BoxError>;

/// Receives parameter notifications.
#[async_trait]
pub trait ParamListener: Send + Sync + 'static {
    async fn on_param(&self, event: ParamEvent) -> CallbackResult;
}

/// Receives decoded stream packets.
#[async_trait]
pub trait DataListener: Send + Sync + 'static {
    async fn on_data(&self, packet: Arc<DataPacket>) -> CallbackResult;
}

#[async_trait]
impl<F, Fut> ParamListener for F
where
    F: Fn(ParamEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    async fn on_param(&self, event: ParamEvent) -> CallbackResult {
        (self)(event).await
    }
}

#[async_trait]
impl<F, Fut> DataListener for F
where
    F: Fn(Arc<DataPacket>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    async fn on_data(&self, packet: Arc<DataPacket>) -> CallbackResult {
        (self)(packet).await
    }
}

/// Shared handle to a parameter callback. Identity is the allocation, so
/// registering a clone of the same handle twice is a no-op.
pub type ParamCallback = Arc<dyn ParamListener>;

/// Shared handle to a data callback.
pub type DataCallback = Arc<dyn DataListener>;

/// Wrap an async closure as a [`ParamCallback`].
pub fn param_fn<F, Fut>(f: F) -> ParamCallback
where
    F: Fn(ParamEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as a [`DataCallback`].
pub fn data_fn<F, Fut>(f: F) -> DataCallback
where
    F: Fn(Arc<DataPacket>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    Arc::new(f)
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Parameter registration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    All,
    Name(&'static str),
}

impl ParamKey {
    /// Resolve `"*"` or a command name (case-insensitive).
    pub fn parse(name: &str) -> Result<Self> {
        if name == WILDCARD {
            return Ok(ParamKey::All);
        }
        Ok(ParamKey::Name(commands::require(name)?.name))
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::All => f.write_str(WILDCARD),
            ParamKey::Name(name) => f.write_str(name),
        }
    }
}

/// Stream registration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKey {
    All,
    Stream(StreamType),
}

impl From<StreamType> for DataKey {
    fn from(stream: StreamType) -> Self {
        DataKey::Stream(stream)
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKey::All => f.write_str(WILDCARD),
            DataKey::Stream(stream) => write!(f, "{stream:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure reporting
// ---------------------------------------------------------------------------

/// Where callback failures of one connection go.
#[derive(Clone)]
pub(crate) struct FailureReporter {
    events: broadcast::Sender<TciEvent>,
    abort: Option<AbortOnFailure>,
}

#[derive(Clone)]
struct AbortOnFailure {
    cancel: CancellationToken,
    /// First callback error; becomes the connection's terminal error.
    slot: Arc<Mutex<Option<Error>>>,
}

impl FailureReporter {
    /// Log and publish failures without affecting the connection.
    pub(crate) fn new(events: broadcast::Sender<TciEvent>) -> Self {
        Self {
            events,
            abort: None,
        }
    }

    /// Additionally record the first failure in `slot` and cancel the
    /// connection.
    pub(crate) fn aborting(mut self, cancel: CancellationToken, slot: Arc<Mutex<Option<Error>>>) -> Self {
        self.abort = Some(AbortOnFailure { cancel, slot });
        self
    }

    fn report(&self, listener: String, message: String) {
        tracing::error!(listener = %listener, error = %message, "TCI listener callback failed");
        let _ = self.events.send(TciEvent::CallbackFailed {
            listener: listener.clone(),
            message: message.clone(),
        });
        if let Some(abort) = &self.abort {
            abort
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert(Error::Callback { listener, message });
            abort.cancel.cancel();
        }
    }
}

/// Spawn one callback invocation plus a watcher for its outcome.
fn supervise<F>(key: String, reporter: &FailureReporter, invocation: F)
where
    F: Future<Output = CallbackResult> + Send + 'static,
{
    let task = tokio::spawn(invocation);
    let reporter = reporter.clone();
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => reporter.report(key, e.to_string()),
            Err(e) if e.is_panic() => reporter.report(key, panic_message(e.into_panic())),
            Err(_) => tracing::trace!(listener = %key, "callback task cancelled"),
        }
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Registration table
// ---------------------------------------------------------------------------

/// Callback registrations of one listener.
#[derive(Default)]
pub struct Dispatcher {
    params: RwLock<HashMap<ParamKey, Vec<ParamCallback>>>,
    data: RwLock<HashMap<DataKey, Vec<DataCallback>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter callback. Returns `false` if this callback was
    /// already registered under `key`.
    pub fn add_param_listener(&self, key: ParamKey, callback: ParamCallback) -> bool {
        let mut params = self.params.write().unwrap_or_else(PoisonError::into_inner);
        insert_unique(params.entry(key).or_default(), callback)
    }

    /// Remove a parameter callback. Returns `false` if it was not registered.
    pub fn remove_param_listener(&self, key: ParamKey, callback: &ParamCallback) -> bool {
        let mut params = self.params.write().unwrap_or_else(PoisonError::into_inner);
        params.get_mut(&key).is_some_and(|list| remove_ptr(list, callback))
    }

    pub fn add_data_listener(&self, key: DataKey, callback: DataCallback) -> bool {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        insert_unique(data.entry(key).or_default(), callback)
    }

    pub fn remove_data_listener(&self, key: DataKey, callback: &DataCallback) -> bool {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.get_mut(&key).is_some_and(|list| remove_ptr(list, callback))
    }

    /// Callbacks to notify for `name`: exact registrations, then wildcard.
    pub fn param_listeners(&self, name: &'static str) -> Vec<(ParamKey, ParamCallback)> {
        let params = self.params.read().unwrap_or_else(PoisonError::into_inner);
        [ParamKey::Name(name), ParamKey::All]
            .into_iter()
            .flat_map(|key| {
                params
                    .get(&key)
                    .into_iter()
                    .flatten()
                    .map(move |cb| (key, Arc::clone(cb)))
            })
            .collect()
    }

    /// Callbacks to notify for a packet of `stream`: exact, then wildcard.
    pub fn data_listeners(&self, stream: StreamType) -> Vec<(DataKey, DataCallback)> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        [DataKey::Stream(stream), DataKey::All]
            .into_iter()
            .flat_map(|key| {
                data.get(&key)
                    .into_iter()
                    .flatten()
                    .map(move |cb| (key, Arc::clone(cb)))
            })
            .collect()
    }

    /// Schedule every matching parameter callback.
    pub(crate) fn dispatch_param(&self, event: &ParamEvent, reporter: &FailureReporter) {
        for (key, callback) in self.param_listeners(event.name) {
            let event = event.clone();
            supervise(key.to_string(), reporter, async move { callback.on_param(event).await });
        }
    }

    /// Schedule every matching data callback.
    pub(crate) fn dispatch_data(&self, packet: &Arc<DataPacket>, reporter: &FailureReporter) {
        for (key, callback) in self.data_listeners(packet.stream_type) {
            let packet = Arc::clone(packet);
            supervise(key.to_string(), reporter, async move { callback.on_data(packet).await });
        }
    }
}

fn insert_unique<T: ?Sized>(list: &mut Vec<Arc<T>>, item: Arc<T>) -> bool {
    if list.iter().any(|existing| Arc::ptr_eq(existing, &item)) {
        return false;
    }
    list.push(item);
    true
}

fn remove_ptr<T: ?Sized>(list: &mut Vec<Arc<T>>, item: &Arc<T>) -> bool {
    let before = list.len();
    list.retain(|existing| !Arc::ptr_eq(existing, item));
    list.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tci_core::{ParamValue, Value};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl ParamListener for Counter {
        async fn on_param(&self, _event: ParamEvent) -> CallbackResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl DataListener for Counter {
        async fn on_data(&self, _packet: Arc<DataPacket>) -> CallbackResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ParamListener for Failing {
        async fn on_param(&self, event: ParamEvent) -> CallbackResult {
            Err(format!("cannot handle {}", event.name).into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl ParamListener for Panicking {
        async fn on_param(&self, _event: ParamEvent) -> CallbackResult {
            panic!("boom");
        }
    }

    fn vfo_event() -> ParamEvent {
        ParamEvent {
            name: "VFO",
            rx: Some(0),
            sub_rx: Some(0),
            value: Some(ParamValue::Scalar(Value::Int(14_200_000))),
        }
    }

    fn packet(stream_type: StreamType) -> Arc<DataPacket> {
        Arc::new(DataPacket {
            rx: 0,
            sample_rate: 48_000,
            format: crate::packet::SampleFormat::Float32,
            codec: 0,
            crc: 0,
            length: 0,
            stream_type,
            channels: 2,
            payload: None,
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // -- Keys --

    #[test]
    fn param_key_parse() {
        assert_eq!(ParamKey::parse("*").unwrap(), ParamKey::All);
        assert_eq!(ParamKey::parse("vfo").unwrap(), ParamKey::Name("VFO"));
        assert!(ParamKey::parse("NOPE").is_err());
        assert_eq!(ParamKey::Name("VFO").to_string(), "VFO");
        assert_eq!(DataKey::from(StreamType::Iq).to_string(), "Iq");
    }

    // -- Registration --

    #[test]
    fn duplicate_registration_is_noop() {
        let d = Dispatcher::new();
        let cb: ParamCallback = Arc::new(Counter(AtomicUsize::new(0)));
        assert!(d.add_param_listener(ParamKey::Name("VFO"), Arc::clone(&cb)));
        assert!(!d.add_param_listener(ParamKey::Name("VFO"), Arc::clone(&cb)));
        assert_eq!(d.param_listeners("VFO").len(), 1);
        // Same callback under another key is a separate registration.
        assert!(d.add_param_listener(ParamKey::All, Arc::clone(&cb)));
        assert_eq!(d.param_listeners("VFO").len(), 2);
    }

    #[test]
    fn remove_listener() {
        let d = Dispatcher::new();
        let cb: ParamCallback = Arc::new(Counter(AtomicUsize::new(0)));
        d.add_param_listener(ParamKey::Name("DDS"), Arc::clone(&cb));
        assert!(d.remove_param_listener(ParamKey::Name("DDS"), &cb));
        assert!(!d.remove_param_listener(ParamKey::Name("DDS"), &cb));
        assert!(!d.remove_param_listener(ParamKey::All, &cb));
        assert!(d.param_listeners("DDS").is_empty());
    }

    #[test]
    fn exact_listeners_precede_wildcard() {
        let d = Dispatcher::new();
        let wild: ParamCallback = Arc::new(Counter(AtomicUsize::new(0)));
        let exact1: ParamCallback = Arc::new(Counter(AtomicUsize::new(0)));
        let exact2: ParamCallback = Arc::new(Counter(AtomicUsize::new(0)));
        d.add_param_listener(ParamKey::All, Arc::clone(&wild));
        d.add_param_listener(ParamKey::Name("VFO"), Arc::clone(&exact1));
        d.add_param_listener(ParamKey::Name("VFO"), Arc::clone(&exact2));

        let listeners = d.param_listeners("VFO");
        assert_eq!(listeners.len(), 3);
        assert!(Arc::ptr_eq(&listeners[0].1, &exact1));
        assert!(Arc::ptr_eq(&listeners[1].1, &exact2));
        assert!(Arc::ptr_eq(&listeners[2].1, &wild));
        assert_eq!(listeners[2].0, ParamKey::All);

        assert_eq!(d.param_listeners("DDS").len(), 1);
    }

    // -- Dispatch --

    #[tokio::test]
    async fn exact_and_wildcard_each_fire_once() {
        let d = Dispatcher::new();
        let exact = Arc::new(Counter(AtomicUsize::new(0)));
        let wild = Arc::new(Counter(AtomicUsize::new(0)));
        d.add_param_listener(ParamKey::Name("VFO"), exact.clone());
        d.add_param_listener(ParamKey::All, wild.clone());
        d.add_param_listener(ParamKey::All, wild.clone());

        let (tx, _rx) = broadcast::channel(8);
        d.dispatch_param(&vfo_event(), &FailureReporter::new(tx));
        settle().await;

        assert_eq!(exact.0.load(Ordering::SeqCst), 1);
        assert_eq!(wild.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn data_dispatch_by_stream_type() {
        let d = Dispatcher::new();
        let iq = Arc::new(Counter(AtomicUsize::new(0)));
        let all = Arc::new(Counter(AtomicUsize::new(0)));
        d.add_data_listener(StreamType::Iq.into(), iq.clone());
        d.add_data_listener(DataKey::All, all.clone());

        let (tx, _rx) = broadcast::channel(8);
        let reporter = FailureReporter::new(tx);
        d.dispatch_data(&packet(StreamType::Iq), &reporter);
        d.dispatch_data(&packet(StreamType::RxAudio), &reporter);
        settle().await;

        assert_eq!(iq.0.load(Ordering::SeqCst), 1);
        assert_eq!(all.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closure_listeners() {
        let d = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = param_fn(move |event: ParamEvent| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(event.to_string());
                Ok::<(), BoxError>(())
            }
        });
        d.add_param_listener(ParamKey::Name("VFO"), cb);

        let (tx, _rx) = broadcast::channel(8);
        d.dispatch_param(&vfo_event(), &FailureReporter::new(tx));
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["VFO rx=0 ch=0 = 14200000".to_string()]);
    }

    #[tokio::test]
    async fn callback_error_is_published() {
        let d = Dispatcher::new();
        d.add_param_listener(ParamKey::Name("VFO"), Arc::new(Failing));

        let (tx, mut rx) = broadcast::channel(8);
        d.dispatch_param(&vfo_event(), &FailureReporter::new(tx));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            TciEvent::CallbackFailed {
                listener: "VFO".into(),
                message: "cannot handle VFO".into(),
            }
        );
    }

    #[tokio::test]
    async fn callback_panic_aborts_when_configured() {
        let d = Dispatcher::new();
        d.add_param_listener(ParamKey::All, Arc::new(Panicking));

        let (tx, mut rx) = broadcast::channel(8);
        let cancel = CancellationToken::new();
        let slot = Arc::new(Mutex::new(None));
        let reporter = FailureReporter::new(tx).aborting(cancel.clone(), Arc::clone(&slot));
        d.dispatch_param(&vfo_event(), &reporter);

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            TciEvent::CallbackFailed { ref listener, ref message }
                if listener == "*" && message.contains("boom")
        ));
        assert!(cancel.is_cancelled());
        let err = slot.lock().unwrap().take().unwrap();
        assert!(matches!(err, Error::Callback { .. }));
    }
}
