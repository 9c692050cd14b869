//! Cached parameter state mirrored from TCI notifications.
//!
//! The server pushes its full state after connecting and every change
//! afterwards, so reads are answered from this cache without a round trip.
//! Where a parameter lives is fixed by its [`CommandSpec`]:
//!
//! - **system** -- commands with no receiver scope (`VOLUME`, `DEVICE`)
//! - **receiver direct** -- receiver-scoped commands (`DDS`, `SQL_LEVEL`)
//! - **receiver channel** -- channel-scoped commands (`VFO`, `RX_VOLUME`)
//!
//! The receive loop is the only writer; the listener guards the store with a
//! `tokio::sync::RwLock` so callbacks and cache queries can read it
//! concurrently.

use std::collections::BTreeMap;

use serde::Serialize;

use tci_core::{Error, ParamValue, Result, Value};

use crate::commands::{self, CommandSpec};

/// Parameters of one scope, keyed by canonical command name.
pub type ParamMap = BTreeMap<&'static str, ParamValue>;

/// Parameters of a single receiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReceiverParams {
    /// Receiver-scoped parameters.
    pub direct: ParamMap,
    /// Channel-scoped parameters, keyed by channel index.
    pub channels: BTreeMap<u32, ParamMap>,
}

/// Complete cached state of one connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterStore {
    pub system: ParamMap,
    pub receivers: BTreeMap<u32, ReceiverParams>,
}

/// Resolved location of a command inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    System,
    Receiver(u32),
    Channel(u32, u32),
}

impl Scope {
    fn resolve(spec: &CommandSpec, rx: Option<u32>, sub_rx: Option<u32>) -> Result<Self> {
        if !spec.has_rx {
            return Ok(Scope::System);
        }
        let rx = rx.ok_or_else(|| {
            Error::InvalidParameter(format!("command {} requires a receiver index", spec.name))
        })?;
        if !spec.has_sub_rx {
            return Ok(Scope::Receiver(rx));
        }
        let sub_rx = sub_rx.ok_or_else(|| {
            Error::InvalidParameter(format!("command {} requires a channel index", spec.name))
        })?;
        Ok(Scope::Channel(rx, sub_rx))
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the values of a notification.
    ///
    /// Receiver and channel entries are created on first use even when
    /// `values` is empty; the parameter itself is only written when there is
    /// at least one value. Returns the value as stored.
    pub fn apply(
        &mut self,
        spec: &'static CommandSpec,
        rx: Option<u32>,
        sub_rx: Option<u32>,
        values: Vec<Value>,
    ) -> Result<Option<&ParamValue>> {
        let map = match Scope::resolve(spec, rx, sub_rx)? {
            Scope::System => &mut self.system,
            Scope::Receiver(rx) => &mut self.receivers.entry(rx).or_default().direct,
            Scope::Channel(rx, sub_rx) => self
                .receivers
                .entry(rx)
                .or_default()
                .channels
                .entry(sub_rx)
                .or_default(),
        };

        match ParamValue::from_values(values) {
            Some(value) => {
                map.insert(spec.name, value);
                Ok(map.get(spec.name))
            }
            None => Ok(None),
        }
    }

    /// Last cached value of a parameter, or `None` if it was never set.
    ///
    /// Fails with [`Error::InvalidParameter`] when the command needs a
    /// receiver or channel index that was not supplied.
    pub fn query(
        &self,
        spec: &CommandSpec,
        rx: Option<u32>,
        sub_rx: Option<u32>,
    ) -> Result<Option<&ParamValue>> {
        let value = match Scope::resolve(spec, rx, sub_rx)? {
            Scope::System => self.system.get(spec.name),
            Scope::Receiver(rx) => self.receivers.get(&rx).and_then(|r| r.direct.get(spec.name)),
            Scope::Channel(rx, sub_rx) => self
                .receivers
                .get(&rx)
                .and_then(|r| r.channels.get(&sub_rx))
                .and_then(|c| c.get(spec.name)),
        };
        Ok(value)
    }

    /// [`query`](Self::query) by command name.
    pub fn get(&self, name: &str, rx: Option<u32>, sub_rx: Option<u32>) -> Result<Option<&ParamValue>> {
        self.query(commands::require(name)?, rx, sub_rx)
    }

    /// Parameters of one receiver, if anything was seen for it.
    pub fn receiver(&self, rx: u32) -> Option<&ReceiverParams> {
        self.receivers.get(&rx)
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.receivers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::lookup;

    fn spec(name: &str) -> &'static CommandSpec {
        lookup(name).unwrap()
    }

    #[test]
    fn new_store_is_empty() {
        let store = ParameterStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("VOLUME", None, None).unwrap(), None);
    }

    #[test]
    fn channel_scoped_value() {
        let mut store = ParameterStore::new();
        store
            .apply(spec("VFO"), Some(0), Some(0), vec![Value::Int(14_200_000)])
            .unwrap();
        assert_eq!(
            store.query(spec("VFO"), Some(0), Some(0)).unwrap(),
            Some(&ParamValue::Scalar(Value::Int(14_200_000)))
        );
        assert_eq!(store.query(spec("VFO"), Some(0), Some(1)).unwrap(), None);
        assert_eq!(store.query(spec("VFO"), Some(1), Some(0)).unwrap(), None);
    }

    #[test]
    fn receiver_scoped_leaves_channels_untouched() {
        let mut store = ParameterStore::new();
        store.apply(spec("SQL_LEVEL"), Some(0), None, vec![Value::Int(5)]).unwrap();
        let rx0 = store.receiver(0).unwrap();
        assert_eq!(rx0.direct.get("SQL_LEVEL"), Some(&ParamValue::Scalar(Value::Int(5))));
        assert!(rx0.channels.is_empty());
    }

    #[test]
    fn system_list_value() {
        let mut store = ParameterStore::new();
        let stored = store
            .apply(
                spec("VFO_LIMITS"),
                None,
                None,
                vec![Value::Int(10_000), Value::Int(30_000_000)],
            )
            .unwrap()
            .cloned();
        let expected = ParamValue::List(vec![Value::Int(10_000), Value::Int(30_000_000)]);
        assert_eq!(stored, Some(expected.clone()));
        assert_eq!(store.get("vfo_limits", None, None).unwrap(), Some(&expected));
    }

    #[test]
    fn later_value_replaces_earlier() {
        let mut store = ParameterStore::new();
        store.apply(spec("VOLUME"), None, None, vec![Value::Int(-20)]).unwrap();
        store.apply(spec("VOLUME"), None, None, vec![Value::Int(-6)]).unwrap();
        assert_eq!(
            store.get("VOLUME", None, None).unwrap(),
            Some(&ParamValue::Scalar(Value::Int(-6)))
        );
    }

    #[test]
    fn empty_values_create_entries_but_store_nothing() {
        let mut store = ParameterStore::new();
        let stored = store.apply(spec("AUDIO_START"), Some(1), None, Vec::new()).unwrap();
        assert!(stored.is_none());
        let rx1 = store.receiver(1).unwrap();
        assert!(rx1.direct.is_empty());
    }

    #[test]
    fn missing_index_is_invalid_argument() {
        let store = ParameterStore::new();
        let err = store.query(spec("DDS"), None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        let err = store.query(spec("VFO"), Some(0), None).unwrap_err();
        assert!(err.to_string().contains("channel index"));

        let mut store = ParameterStore::new();
        assert!(store.apply(spec("VFO"), None, Some(0), vec![Value::Int(1)]).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn unscoped_query_ignores_indices() {
        let mut store = ParameterStore::new();
        store.apply(spec("MUTE"), None, None, vec![Value::Bool(true)]).unwrap();
        assert!(store.query(spec("MUTE"), Some(4), Some(2)).unwrap().is_some());
    }

    #[test]
    fn unknown_name_rejected() {
        let store = ParameterStore::new();
        assert!(store.get("NOPE", None, None).is_err());
    }

    #[test]
    fn serializes_as_nested_maps() {
        let mut store = ParameterStore::new();
        store.apply(spec("DEVICE"), None, None, vec!["SunSDR2DX".into()]).unwrap();
        store.apply(spec("DDS"), Some(0), None, vec![Value::Int(7_100_000)]).unwrap();
        store
            .apply(spec("VFO"), Some(0), Some(1), vec![Value::Int(7_074_000)])
            .unwrap();
        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "system": {"DEVICE": "SunSDR2DX"},
                "receivers": {
                    "0": {
                        "direct": {"DDS": 7100000},
                        "channels": {"1": {"VFO": 7074000}}
                    }
                }
            })
        );
    }
}
