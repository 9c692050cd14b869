//! TCI command registry.
//!
//! Every command the client can send or receive is described by a static
//! [`CommandSpec`]: whether it may be read and written by the client,
//! whether its first wire parameter is a receiver index and its second a
//! channel (sub-receiver) index, and how many value parameters follow.
//! The table is built at compile time and shared read-only by every
//! [`Listener`](crate::listener::Listener).
//!
//! # Wire form
//!
//! ```text
//! NAME;                          no parameters at all
//! NAME:rx,channel,v1,v2,...;     scoping indices first, then values
//! ```
//!
//! Command names are case-insensitive inbound and always uppercase
//! outbound. The read form of a command omits its last value parameter,
//! e.g. `VFO:0,0;` reads what `VFO:0,0,14200000;` writes.
//!
//! The table covers TCI protocol 2.0 sections 4.1-4.5, the CW macro
//! commands of section 3.2.1, and commands seen from 1.6-era servers that
//! later documents no longer list.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use tci_core::{Error, Result, Value};

/// Name of the zero-parameter notification that ends the initial state dump.
pub const READY: &str = "READY";

/// Declared number of value parameters of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamCount {
    /// Exactly this many values.
    Fixed(u8),
    /// Any number of trailing values (e.g. `MODULATIONS_LIST`).
    Variable,
}

impl fmt::Display for ParamCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamCount::Fixed(n) => write!(f, "{n}"),
            ParamCount::Variable => f.write_str("variable"),
        }
    }
}

/// Whether an outbound command requests a value or sets one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Write,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Read => f.write_str("read"),
            Action::Write => f.write_str("write"),
        }
    }
}

/// Static description of one TCI command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Canonical uppercase name.
    pub name: &'static str,
    /// The client may send the read form.
    pub readable: bool,
    /// The client may send the write form.
    pub writeable: bool,
    /// First wire parameter is a receiver index.
    pub has_rx: bool,
    /// Second wire parameter is a channel index. Implies `has_rx`.
    pub has_sub_rx: bool,
    /// Declared value parameters after the scoping indices.
    pub params: ParamCount,
    /// Extra trailing values the write form may carry beyond `params`.
    ///
    /// Only `TRX` uses this: `TRX:0,true,tci;` selects the TCI audio
    /// stream as the transmit signal source.
    pub optional_values: u8,
}

impl CommandSpec {
    const fn new(name: &'static str) -> Self {
        CommandSpec {
            name,
            readable: true,
            writeable: true,
            has_rx: false,
            has_sub_rx: false,
            params: ParamCount::Fixed(1),
            optional_values: 0,
        }
    }

    const fn no_read(self) -> Self {
        Self {
            readable: false,
            ..self
        }
    }

    const fn no_write(self) -> Self {
        Self {
            writeable: false,
            ..self
        }
    }

    /// Server-to-client only.
    const fn notify(self) -> Self {
        self.no_read().no_write()
    }

    const fn rx(self) -> Self {
        Self {
            has_rx: true,
            ..self
        }
    }

    const fn channel(self) -> Self {
        Self {
            has_rx: true,
            has_sub_rx: true,
            ..self
        }
    }

    const fn values(self, n: u8) -> Self {
        Self {
            params: ParamCount::Fixed(n),
            ..self
        }
    }

    const fn variable(self) -> Self {
        Self {
            params: ParamCount::Variable,
            ..self
        }
    }

    const fn optional(self, n: u8) -> Self {
        Self {
            optional_values: n,
            ..self
        }
    }

    /// Number of leading receiver/channel index parameters (0, 1 or 2).
    pub fn scoping_params(&self) -> usize {
        usize::from(self.has_rx) + usize::from(self.has_sub_rx)
    }

    /// Total wire parameter count: declared values plus scoping indices.
    ///
    /// A variable-arity command stays [`ParamCount::Variable`].
    pub fn total_params(&self) -> ParamCount {
        match self.params {
            ParamCount::Fixed(n) => ParamCount::Fixed(n + self.scoping_params() as u8),
            ParamCount::Variable => ParamCount::Variable,
        }
    }

    /// Build an outbound command string.
    ///
    /// `rx` and `sub_rx` are required exactly when the command is scoped to
    /// a receiver / channel and ignored otherwise. With `validate` set, the
    /// number of `values` must match the declared count, which is one less
    /// for [`Action::Read`] when the command declares any value parameter.
    pub fn build_outbound(
        &self,
        action: Action,
        rx: Option<u32>,
        sub_rx: Option<u32>,
        values: &[Value],
        validate: bool,
    ) -> Result<String> {
        match action {
            Action::Read if !self.readable => {
                return Err(Error::InvalidParameter(format!(
                    "command {} not readable",
                    self.name
                )));
            }
            Action::Write if !self.writeable => {
                return Err(Error::InvalidParameter(format!(
                    "command {} not writeable",
                    self.name
                )));
            }
            _ => {}
        }

        let mut tokens: Vec<String> = Vec::with_capacity(self.scoping_params() + values.len());

        if self.has_rx {
            let rx = rx.ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "command {} requires a receiver index (non-negative integer)",
                    self.name
                ))
            })?;
            tokens.push(rx.to_string());
        }

        if self.has_sub_rx {
            let sub_rx = sub_rx.ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "command {} requires a channel index (non-negative integer)",
                    self.name
                ))
            })?;
            tokens.push(sub_rx.to_string());
        }

        if validate {
            self.check_value_count(action, values.len())?;
        }

        tokens.extend(values.iter().map(Value::to_string));

        if tokens.is_empty() {
            Ok(format!("{};", self.name))
        } else {
            Ok(format!("{}:{};", self.name, tokens.join(",")))
        }
    }

    /// Validated read form. Shorthand for `build_outbound(Action::Read, .., true)`.
    pub fn read(&self, rx: Option<u32>, sub_rx: Option<u32>, values: &[Value]) -> Result<String> {
        self.build_outbound(Action::Read, rx, sub_rx, values, true)
    }

    /// Validated write form. Shorthand for `build_outbound(Action::Write, .., true)`.
    pub fn write(&self, rx: Option<u32>, sub_rx: Option<u32>, values: &[Value]) -> Result<String> {
        self.build_outbound(Action::Write, rx, sub_rx, values, true)
    }

    fn check_value_count(&self, action: Action, given: usize) -> Result<()> {
        let ParamCount::Fixed(declared) = self.params else {
            return Ok(());
        };
        let declared = usize::from(declared);

        let expected = match action {
            Action::Read if declared > 0 => declared - 1,
            _ => declared,
        };
        let optional = match action {
            Action::Write => usize::from(self.optional_values),
            Action::Read => 0,
        };

        if given < expected || given > expected + optional {
            let wanted = if optional == 0 {
                expected.to_string()
            } else {
                format!("{}-{}", expected, expected + optional)
            };
            return Err(Error::InvalidParameter(format!(
                "command {} requires {} value parameters to {}, {} given",
                self.name, wanted, action, given
            )));
        }
        Ok(())
    }
}

/// All known commands.
pub static COMMANDS: &[CommandSpec] = &[
    // Initialization (protocol 2.0, 4.1)
    CommandSpec::new("VFO_LIMITS").notify().values(2),
    CommandSpec::new("IF_LIMITS").notify().values(2),
    CommandSpec::new("TRX_COUNT").notify(),
    CommandSpec::new("CHANNELS_COUNT").notify(),
    CommandSpec::new("DEVICE").notify(),
    CommandSpec::new("RECEIVE_ONLY").notify(),
    CommandSpec::new("MODULATIONS_LIST").notify().variable(),
    CommandSpec::new("PROTOCOL").notify().values(2),
    CommandSpec::new(READY).notify().values(0),
    // Bidirectional control (4.2)
    CommandSpec::new("START").no_read().values(0),
    CommandSpec::new("STOP").no_read().values(0),
    CommandSpec::new("DDS").rx(),
    CommandSpec::new("IF").channel(),
    CommandSpec::new("VFO").channel(),
    CommandSpec::new("MODULATION").rx(),
    CommandSpec::new("TRX").rx().optional(1),
    CommandSpec::new("TUNE").rx(),
    CommandSpec::new("DRIVE").rx(),
    CommandSpec::new("TUNE_DRIVE").rx(),
    CommandSpec::new("RIT_ENABLE").rx(),
    CommandSpec::new("XIT_ENABLE").rx(),
    CommandSpec::new("SPLIT_ENABLE").rx(),
    CommandSpec::new("RIT_OFFSET").rx(),
    CommandSpec::new("XIT_OFFSET").rx(),
    CommandSpec::new("RX_CHANNEL_ENABLE").channel(),
    CommandSpec::new("RX_FILTER_BAND").rx().values(2),
    CommandSpec::new("CW_MACROS_SPEED"),
    CommandSpec::new("CW_MACROS_DELAY"),
    CommandSpec::new("CW_KEYER_SPEED"),
    CommandSpec::new("VOLUME"),
    CommandSpec::new("MUTE"),
    CommandSpec::new("RX_MUTE").rx(),
    CommandSpec::new("RX_VOLUME").channel(),
    CommandSpec::new("RX_BALANCE").channel(),
    CommandSpec::new("MON_VOLUME"),
    CommandSpec::new("MON_ENABLE"),
    CommandSpec::new("AGC_MODE").rx(),
    CommandSpec::new("AGC_GAIN").rx(),
    CommandSpec::new("RX_NB_ENABLE").rx(),
    CommandSpec::new("RX_NB_PARAM").rx().values(2),
    CommandSpec::new("RX_BIN_ENABLE").rx(),
    CommandSpec::new("RX_NR_ENABLE").rx(),
    CommandSpec::new("RX_ANC_ENABLE").rx(),
    CommandSpec::new("RX_ANF_ENABLE").rx(),
    CommandSpec::new("RX_APF_ENABLE").rx(),
    CommandSpec::new("RX_DSE_ENABLE").rx(),
    CommandSpec::new("RX_NF_ENABLE").rx(),
    CommandSpec::new("LOCK").rx(),
    CommandSpec::new("SQL_ENABLE").rx(),
    CommandSpec::new("SQL_LEVEL").rx(),
    CommandSpec::new("DIGL_OFFSET"),
    CommandSpec::new("DIGU_OFFSET"),
    // Unidirectional control (4.3)
    CommandSpec::new("TX_ENABLE").notify().rx(),
    CommandSpec::new("CW_MACROS_SPEED_UP").no_read(),
    CommandSpec::new("CW_MACROS_SPEED_DOWN").no_read(),
    CommandSpec::new("SPOT").no_read().values(5),
    CommandSpec::new("SPOT_DELETE").no_read(),
    CommandSpec::new("IQ_SAMPLERATE").no_read(),
    CommandSpec::new("AUDIO_SAMPLERATE").no_read(),
    CommandSpec::new("IQ_START").no_read().rx().values(0),
    CommandSpec::new("IQ_STOP").no_read().rx().values(0),
    CommandSpec::new("AUDIO_START").no_read().rx().values(0),
    CommandSpec::new("AUDIO_STOP").no_read().rx().values(0),
    CommandSpec::new("LINE_OUT_START").no_read().rx().values(0),
    CommandSpec::new("LINE_OUT_STOP").no_read().rx().values(0),
    CommandSpec::new("LINE_OUT_RECORDER_START").no_read().rx(),
    CommandSpec::new("LINE_OUT_RECORDER_SAVE").no_read().rx(),
    CommandSpec::new("LINE_OUT_RECORDER_BREAK").no_read().rx().values(0),
    CommandSpec::new("SPOT_CLEAR").no_read().values(0),
    CommandSpec::new("AUDIO_STREAM_SAMPLE_TYPE").no_read(),
    CommandSpec::new("AUDIO_STREAM_CHANNELS").no_read(),
    CommandSpec::new("AUDIO_STREAM_SAMPLES").no_read(),
    CommandSpec::new("TX_STREAM_AUDIO_BUFFERING").no_read(),
    // Notifications (4.4); a few of these are also client-writeable
    CommandSpec::new("CLICKED_ON_SPOT").notify().values(2),
    CommandSpec::new("RX_CLICKED_ON_SPOT").notify().channel().values(2),
    CommandSpec::new("TX_FOOTSWITCH").notify().rx(),
    CommandSpec::new("TX_FREQUENCY").notify(),
    CommandSpec::new("APP_FOCUS").notify(),
    CommandSpec::new("SET_IN_FOCUS").no_read().values(0),
    CommandSpec::new("KEYER").notify().rx(),
    CommandSpec::new("RX_SENSORS_ENABLE").no_read().values(2),
    CommandSpec::new("TX_SENSORS_ENABLE").no_read().values(2),
    CommandSpec::new("RX_SENSORS").notify().rx(),
    CommandSpec::new("TX_SENSORS").notify().rx().values(4),
    // Added in 2.0 (4.5)
    CommandSpec::new("VFO_LOCK").notify().channel(),
    CommandSpec::new("RX_CHANNEL_SENSORS").notify().channel(),
    // CW macros (3.2.1)
    CommandSpec::new("CW_MACROS").no_read().rx(),
    CommandSpec::new("CW_TERMINAL").no_read(),
    CommandSpec::new("CW_MACROS_EMPTY").notify().values(0),
    CommandSpec::new("CW_MSG").no_read().rx().values(3),
    CommandSpec::new("CALLSIGN_SEND").notify(),
    CommandSpec::new("CW_MACROS_STOP").no_read().values(0),
    // Seen from 1.6 servers, undocumented in 1.9+
    CommandSpec::new("RX_ENABLE").rx(),
    CommandSpec::new("CTCSS_ENABLE").rx(),
    CommandSpec::new("CTCSS_MODE").rx(),
    CommandSpec::new("CTCSS_RX_TONE").rx(),
    CommandSpec::new("CTCSS_TX_TONE").rx(),
    CommandSpec::new("CTCSS_LEVEL").rx(),
    CommandSpec::new("ECODER_SWITCH_RX").rx(),
    CommandSpec::new("ECODER_SWITCH_CHANNEL").rx(),
    CommandSpec::new("RX_SMETER").no_write().channel(),
    CommandSpec::new("TX_POWER").no_write(),
    CommandSpec::new("TX_SWR").no_write(),
];

static INDEX: LazyLock<HashMap<&'static str, &'static CommandSpec>> =
    LazyLock::new(|| COMMANDS.iter().map(|spec| (spec.name, spec)).collect());

/// Look up a command by name, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    if let Some(spec) = INDEX.get(name) {
        return Some(*spec);
    }
    INDEX.get(name.to_ascii_uppercase().as_str()).copied()
}

/// Look up a command by name for outbound use.
///
/// Unlike [`lookup`], an unknown name is a validation error.
pub fn require(name: &str) -> Result<&'static CommandSpec> {
    lookup(name).ok_or_else(|| Error::InvalidParameter(format!("unknown command {name}")))
}
