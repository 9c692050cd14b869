//! Inbound TCI text frame parsing.
//!
//! A server notification is one text frame of the form `NAME;` or
//! `NAME:p1,p2,...;`. Parsing resolves the name against the command
//! registry, checks the parameter count against the command's declared
//! arity, splits off the receiver and channel indices and coerces the
//! remaining tokens.
//!
//! All functions in this module are pure parsing -- no I/O is performed.

use tci_core::{Error, ParamValue, Result, Value, coerce};

use crate::commands::{self, CommandSpec, ParamCount};

/// One parsed server notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub spec: &'static CommandSpec,
    pub rx: Option<u32>,
    pub sub_rx: Option<u32>,
    /// Value parameters after the scoping indices, in wire order.
    pub values: Vec<Value>,
}

impl Notification {
    /// Values collapsed the way they are cached and dispatched: absent when
    /// there are none, a scalar when there is one, a list otherwise.
    pub fn param_value(&self) -> Option<ParamValue> {
        ParamValue::from_values(self.values.clone())
    }

    /// Whether this is the end-of-initial-state notification.
    pub fn is_ready(&self) -> bool {
        self.spec.name == commands::READY
    }
}

/// Parse one inbound text frame.
///
/// Errors are protocol errors: an unknown command, a parameterized command
/// sent without parameters, a parameter count that does not match the
/// declared arity, or a receiver/channel index that is not a non-negative
/// integer.
pub fn parse_notification(frame: &str) -> Result<Notification> {
    let body = frame.trim();
    let body = body.strip_suffix(';').unwrap_or(body);
    let (name, args) = match body.split_once(':') {
        Some((name, args)) => (name.trim(), Some(args)),
        None => (body.trim(), None),
    };

    if name.is_empty() {
        return Err(Error::Protocol(format!("empty command in frame {frame:?}")));
    }

    let spec = commands::lookup(name)
        .ok_or_else(|| Error::Protocol(format!("command {} unrecognized", name.to_ascii_uppercase())))?;

    // Zero-parameter commands ignore anything after the name.
    if spec.total_params() == ParamCount::Fixed(0) {
        if args.is_some_and(|a| !a.is_empty()) {
            tracing::trace!(command = spec.name, "ignoring parameters of zero-parameter command");
        }
        return Ok(Notification {
            spec,
            rx: None,
            sub_rx: None,
            values: Vec::new(),
        });
    }

    let Some(args) = args else {
        return Err(Error::Protocol(format!(
            "command {} should have parameters, but none received",
            spec.name
        )));
    };

    let tokens: Vec<&str> = args.split(',').collect();
    check_arity(spec, tokens.len())?;

    let mut tokens = tokens.into_iter();
    let rx = if spec.has_rx {
        Some(parse_index(spec, "receiver", tokens.next())?)
    } else {
        None
    };
    let sub_rx = if spec.has_sub_rx {
        Some(parse_index(spec, "channel", tokens.next())?)
    } else {
        None
    };

    Ok(Notification {
        spec,
        rx,
        sub_rx,
        values: tokens.map(coerce).collect(),
    })
}

fn check_arity(spec: &CommandSpec, given: usize) -> Result<()> {
    let ParamCount::Fixed(total) = spec.total_params() else {
        // Variable arity still needs its scoping indices.
        if given < spec.scoping_params() {
            return Err(Error::Protocol(format!(
                "command {} should have at least {} params, received {}",
                spec.name,
                spec.scoping_params(),
                given
            )));
        }
        return Ok(());
    };
    let total = usize::from(total);
    let max = total + usize::from(spec.optional_values);
    if given < total || given > max {
        return Err(Error::Protocol(format!(
            "command {} should have {} params, received {}",
            spec.name, total, given
        )));
    }
    Ok(())
}

fn parse_index(spec: &CommandSpec, what: &str, token: Option<&str>) -> Result<u32> {
    let token = token.unwrap_or_default();
    token.trim().parse::<u32>().map_err(|_| {
        Error::Protocol(format!(
            "command {} has invalid {} index {:?}",
            spec.name, what, token
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Names --

    #[test]
    fn parse_ready() {
        let n = parse_notification("READY;").unwrap();
        assert_eq!(n.spec.name, "READY");
        assert!(n.is_ready());
        assert_eq!(n.rx, None);
        assert_eq!(n.param_value(), None);
    }

    #[test]
    fn name_is_case_insensitive() {
        let n = parse_notification("vfo:0,1,7074000;").unwrap();
        assert_eq!(n.spec.name, "VFO");
        assert_eq!(n.rx, Some(0));
        assert_eq!(n.sub_rx, Some(1));
    }

    #[test]
    fn unknown_command_is_protocol_error() {
        let err = parse_notification("FROBNICATE:1;").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("FROBNICATE unrecognized"));
    }

    #[test]
    fn empty_frame_is_protocol_error() {
        assert!(parse_notification(";").is_err());
        assert!(parse_notification("").is_err());
    }

    // -- Scoping and values --

    #[test]
    fn vfo_channel_scoped() {
        let n = parse_notification("VFO:0,0,14200000;").unwrap();
        assert_eq!((n.rx, n.sub_rx), (Some(0), Some(0)));
        assert_eq!(n.values, vec![Value::Int(14_200_000)]);
        assert_eq!(n.param_value(), Some(ParamValue::Scalar(Value::Int(14_200_000))));
    }

    #[test]
    fn receiver_scoped_single_value() {
        let n = parse_notification("SQL_LEVEL:0,5;").unwrap();
        assert_eq!(n.rx, Some(0));
        assert_eq!(n.sub_rx, None);
        assert_eq!(n.values, vec![Value::Int(5)]);
    }

    #[test]
    fn system_multi_value() {
        let n = parse_notification("VFO_LIMITS:10000,30000000;").unwrap();
        assert_eq!(n.rx, None);
        assert_eq!(
            n.param_value(),
            Some(ParamValue::List(vec![Value::Int(10_000), Value::Int(30_000_000)]))
        );
    }

    #[test]
    fn mixed_coercion() {
        let n = parse_notification("RX_CHANNEL_ENABLE:1,1,true;").unwrap();
        assert_eq!(n.values, vec![Value::Bool(true)]);
        let n = parse_notification("DEVICE:SunSDR2PRO;").unwrap();
        assert_eq!(n.values, vec![Value::Str("SunSDR2PRO".into())]);
        let n = parse_notification("RX_SMETER:0,0,-73.5;").unwrap();
        assert_eq!(n.values, vec![Value::Float(-73.5)]);
    }

    #[test]
    fn zero_value_receiver_command() {
        let n = parse_notification("AUDIO_START:0;").unwrap();
        assert_eq!(n.rx, Some(0));
        assert!(n.values.is_empty());
        assert_eq!(n.param_value(), None);
    }

    #[test]
    fn variable_arity() {
        let n = parse_notification("MODULATIONS_LIST:AM,SAM,DSB,LSB,USB,CW;").unwrap();
        assert_eq!(n.values.len(), 6);
        assert_eq!(n.values[5], Value::Str("CW".into()));
    }

    #[test]
    fn trx_optional_trailing_value() {
        let n = parse_notification("TRX:0,true,tci;").unwrap();
        assert_eq!(n.values, vec![Value::Bool(true), Value::Str("tci".into())]);
        assert!(parse_notification("TRX:0,false;").is_ok());
    }

    // -- Arity errors --

    #[test]
    fn missing_parameters_rejected() {
        let err = parse_notification("VOLUME;").unwrap_err();
        assert!(err.to_string().contains("none received"));
    }

    #[test]
    fn wrong_count_rejected() {
        let err = parse_notification("VFO:0,14200000;").unwrap_err();
        assert!(err.to_string().contains("should have 3 params, received 2"));
        assert!(parse_notification("VOLUME:1,2;").is_err());
    }

    #[test]
    fn invalid_index_rejected() {
        let err = parse_notification("DDS:-1,14000000;").unwrap_err();
        assert!(err.to_string().contains("invalid receiver index"));
        let err = parse_notification("VFO:0,x,14000000;").unwrap_err();
        assert!(err.to_string().contains("invalid channel index"));
    }

    #[test]
    fn zero_parameter_command_ignores_arguments() {
        let n = parse_notification("READY:junk;").unwrap();
        assert!(n.is_ready());
    }

    #[test]
    fn surrounding_whitespace_tolerated() {
        let n = parse_notification("  VOLUME:-20;\n").unwrap();
        assert_eq!(n.values, vec![Value::Int(-20)]);
    }
}
