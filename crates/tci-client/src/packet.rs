//! TCI binary stream packet codec.
//!
//! IQ samples, receive audio, transmit audio and transmit timing ("chrono")
//! packets travel as binary WebSocket frames. Each frame starts with a fixed
//! 64-byte header of sixteen little-endian `u32` fields, eight meaningful
//! and eight reserved, followed immediately by the sample payload:
//!
//! ```text
//! offset  field
//!  0      rx             receiver index
//!  4      sample_rate    samples per second
//!  8      format         0=INT16 1=INT24 2=INT32 3=FLOAT32
//! 12      codec          reserved for compressed streams, 0
//! 16      crc            0
//! 20      length         sample count
//! 24      type           0=IQ 1=RX_AUDIO 2=TX_AUDIO 3=TX_CHRONO
//! 28      channels       interleaved channel count
//! 32..64  reserved
//! 64..    payload        length * channels * bytes_per_sample(format)
//! ```
//!
//! A packet with `length == 0` carries no payload. All functions here are
//! pure, with no I/O.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use tci_core::{Error, Result};

/// Header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Number of meaningful `u32` header fields; the rest are reserved.
const HEADER_FIELDS: usize = 8;

/// Encoding of individual samples in a packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SampleFormat {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl SampleFormat {
    /// Decode the numeric header value.
    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(SampleFormat::Int16),
            1 => Ok(SampleFormat::Int24),
            2 => Ok(SampleFormat::Int32),
            3 => Ok(SampleFormat::Float32),
            other => Err(Error::Protocol(format!("unknown sample format {other}"))),
        }
    }

    /// The numeric header value.
    pub fn to_wire(self) -> u32 {
        match self {
            SampleFormat::Int16 => 0,
            SampleFormat::Int24 => 1,
            SampleFormat::Int32 => 2,
            SampleFormat::Float32 => 3,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 => 3,
            SampleFormat::Int32 | SampleFormat::Float32 => 4,
        }
    }

    /// Lowercase name as used by `AUDIO_STREAM_SAMPLE_TYPE`.
    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::Int16 => "int16",
            SampleFormat::Int24 => "int24",
            SampleFormat::Int32 => "int32",
            SampleFormat::Float32 => "float32",
        }
    }
}

/// Kind of stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StreamType {
    /// Raw IQ samples from a receiver.
    Iq,
    /// Demodulated receive audio.
    RxAudio,
    /// Audio sent by the client for transmission.
    TxAudio,
    /// Timing packet asking the client for the next block of TX audio.
    TxChrono,
}

impl StreamType {
    /// Decode the numeric header value.
    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(StreamType::Iq),
            1 => Ok(StreamType::RxAudio),
            2 => Ok(StreamType::TxAudio),
            3 => Ok(StreamType::TxChrono),
            other => Err(Error::Protocol(format!("unknown stream type {other}"))),
        }
    }

    /// The numeric header value.
    pub fn to_wire(self) -> u32 {
        match self {
            StreamType::Iq => 0,
            StreamType::RxAudio => 1,
            StreamType::TxAudio => 2,
            StreamType::TxChrono => 3,
        }
    }
}

/// One decoded (or to-be-encoded) stream packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub rx: u32,
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub codec: u32,
    pub crc: u32,
    /// Declared sample count per channel.
    pub length: u32,
    pub stream_type: StreamType,
    pub channels: u32,
    /// Raw sample bytes; `None` when `length` is zero.
    pub payload: Option<Bytes>,
}

impl DataPacket {
    /// Build a transmit audio packet, deriving `length` from the payload.
    ///
    /// `payload` must hold whole interleaved frames of `channels` samples
    /// in `format`.
    pub fn tx_audio(
        rx: u32,
        sample_rate: u32,
        format: SampleFormat,
        channels: u32,
        payload: Bytes,
    ) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidParameter(
                "TX audio packet needs at least one channel".into(),
            ));
        }
        let frame_bytes = format.bytes_per_sample() * channels as usize;
        if payload.len() % frame_bytes != 0 {
            return Err(Error::InvalidParameter(format!(
                "TX audio payload of {} bytes is not a whole number of {}-byte frames",
                payload.len(),
                frame_bytes
            )));
        }
        let length = (payload.len() / frame_bytes) as u32;
        Ok(DataPacket {
            rx,
            sample_rate,
            format,
            codec: 0,
            crc: 0,
            length,
            stream_type: StreamType::TxAudio,
            channels,
            payload: (length > 0).then_some(payload),
        })
    }

    /// Payload size implied by the header fields, or `None` if it does not
    /// fit in `usize`.
    pub fn expected_payload_len(&self) -> Option<usize> {
        (self.length as usize)
            .checked_mul(self.channels as usize)?
            .checked_mul(self.format.bytes_per_sample())
    }

    /// Decode a packet from a binary frame.
    ///
    /// Fails only when the buffer is shorter than the header or a numeric
    /// enum field is out of range. When `length > 0` everything after the
    /// header is taken as payload.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Protocol(format!(
                "data packet too short: {} bytes, header is {}",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let mut fields = [0u32; HEADER_FIELDS];
        for (i, field) in fields.iter_mut().enumerate() {
            let at = i * 4;
            *field = u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        }
        let [rx, sample_rate, format, codec, crc, length, stream_type, channels] = fields;

        let packet = DataPacket {
            rx,
            sample_rate,
            format: SampleFormat::from_wire(format)?,
            codec,
            crc,
            length,
            stream_type: StreamType::from_wire(stream_type)?,
            channels,
            payload: (length > 0).then(|| Bytes::copy_from_slice(&buf[HEADER_SIZE..])),
        };

        if let Some(payload) = &packet.payload {
            match packet.expected_payload_len() {
                Some(expected) if expected == payload.len() => {}
                expected => tracing::trace!(
                    got = payload.len(),
                    ?expected,
                    "data packet payload size differs from header"
                ),
            }
        }

        Ok(packet)
    }

    /// Encode the packet into a binary frame.
    ///
    /// The payload must be exactly [`expected_payload_len`](Self::expected_payload_len)
    /// bytes, and absent when `length` is zero.
    pub fn encode(&self) -> Result<Bytes> {
        let expected = self.expected_payload_len().ok_or_else(|| {
            Error::InvalidParameter(format!(
                "data packet size overflows: {} samples x {} channels",
                self.length, self.channels
            ))
        })?;
        let payload: &[u8] = match (&self.payload, self.length) {
            (None, 0) => &[],
            (Some(_), 0) => {
                return Err(Error::InvalidParameter(
                    "data packet with zero length must not carry a payload".into(),
                ));
            }
            (None, _) => {
                return Err(Error::InvalidParameter(format!(
                    "data packet declares {} samples but has no payload",
                    self.length
                )));
            }
            (Some(p), _) if p.len() != expected => {
                return Err(Error::InvalidParameter(format!(
                    "data packet payload is {} bytes, header implies {}",
                    p.len(),
                    expected
                )));
            }
            (Some(p), _) => p,
        };

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        for field in [
            self.rx,
            self.sample_rate,
            self.format.to_wire(),
            self.codec,
            self.crc,
            self.length,
            self.stream_type.to_wire(),
            self.channels,
        ] {
            buf.put_u32_le(field);
        }
        buf.put_bytes(0, HEADER_SIZE - HEADER_FIELDS * 4);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Convert the payload to normalized `f32` samples (interleaved).
    ///
    /// Integer formats are scaled to `[-1.0, 1.0)`. An absent payload
    /// yields an empty vector.
    pub fn samples_f32(&self) -> Result<Vec<f32>> {
        let Some(payload) = &self.payload else {
            return Ok(Vec::new());
        };
        let width = self.format.bytes_per_sample();
        if payload.len() % width != 0 {
            return Err(Error::Protocol(format!(
                "payload length {} is not a multiple of {} ({:?})",
                payload.len(),
                width,
                self.format
            )));
        }

        let samples = payload
            .chunks_exact(width)
            .map(|b| match self.format {
                SampleFormat::Int16 => f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0,
                SampleFormat::Int24 => {
                    // Sign-extend by placing the 24 bits in the top of an i32.
                    let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                    v as f32 / 8_388_608.0
                }
                SampleFormat::Int32 => {
                    i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0
                }
                SampleFormat::Float32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            })
            .collect();
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(format: SampleFormat, length: u32, channels: u32) -> DataPacket {
        let len = length as usize * channels as usize * format.bytes_per_sample();
        DataPacket {
            rx: 1,
            sample_rate: 48_000,
            format,
            codec: 0,
            crc: 0,
            length,
            stream_type: StreamType::RxAudio,
            channels,
            payload: (length > 0).then(|| Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>())),
        }
    }

    // -- Header layout --

    #[test]
    fn header_layout_little_endian() {
        let p = DataPacket {
            rx: 2,
            sample_rate: 8000,
            format: SampleFormat::Float32,
            codec: 0,
            crc: 0,
            length: 0,
            stream_type: StreamType::TxChrono,
            channels: 2,
            payload: None,
        };
        let buf = p.encode().unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[0..4], &2u32.to_le_bytes());
        assert_eq!(&buf[4..8], &8000u32.to_le_bytes());
        assert_eq!(&buf[8..12], &3u32.to_le_bytes());
        assert_eq!(&buf[24..28], &3u32.to_le_bytes());
        assert_eq!(&buf[28..32], &2u32.to_le_bytes());
        assert!(buf[32..64].iter().all(|&b| b == 0));
    }

    // -- Round trip --

    #[test]
    fn round_trip_each_format() {
        for format in [
            SampleFormat::Int16,
            SampleFormat::Int24,
            SampleFormat::Int32,
            SampleFormat::Float32,
        ] {
            let p = packet(format, 5, 2);
            let buf = p.encode().unwrap();
            assert_eq!(buf.len(), HEADER_SIZE + 5 * 2 * format.bytes_per_sample());
            assert_eq!(DataPacket::decode(&buf).unwrap(), p, "{format:?}");
        }
    }

    #[test]
    fn round_trip_zero_length_has_no_payload() {
        let p = packet(SampleFormat::Int16, 0, 1);
        assert!(p.payload.is_none());
        let buf = p.encode().unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        let decoded = DataPacket::decode(&buf).unwrap();
        assert_eq!(decoded, p);
        assert!(decoded.payload.is_none());
    }

    // -- Decode errors --

    #[test]
    fn reject_short_header() {
        let err = DataPacket::decode(&[0u8; 63]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("too short"));
        assert!(DataPacket::decode(&[]).is_err());
    }

    #[test]
    fn reject_unknown_enums() {
        let mut buf = packet(SampleFormat::Int16, 0, 1).encode().unwrap().to_vec();
        buf[8..12].copy_from_slice(&9u32.to_le_bytes());
        assert!(DataPacket::decode(&buf).unwrap_err().to_string().contains("sample format"));

        let mut buf = packet(SampleFormat::Int16, 0, 1).encode().unwrap().to_vec();
        buf[24..28].copy_from_slice(&7u32.to_le_bytes());
        assert!(DataPacket::decode(&buf).unwrap_err().to_string().contains("stream type"));
    }

    #[test]
    fn decode_keeps_trailing_bytes_as_payload() {
        let mut buf = packet(SampleFormat::Int16, 2, 1).encode().unwrap().to_vec();
        buf.extend_from_slice(&[0xAA, 0xBB]);
        let p = DataPacket::decode(&buf).unwrap();
        assert_eq!(p.payload.unwrap().len(), 6);
    }

    #[test]
    fn decode_tolerates_huge_declared_size() {
        let mut buf = packet(SampleFormat::Float32, 0, 1).encode().unwrap().to_vec();
        buf[20..24].copy_from_slice(&u32::MAX.to_le_bytes());
        buf[28..32].copy_from_slice(&u32::MAX.to_le_bytes());
        buf.push(0x01);

        let p = DataPacket::decode(&buf).unwrap();
        assert_eq!(p.length, u32::MAX);
        assert_eq!(p.channels, u32::MAX);
        assert_eq!(p.expected_payload_len(), None);
        assert_eq!(p.payload.unwrap().len(), 1);
    }

    // -- Encode errors --

    #[test]
    fn encode_rejects_overflowing_size() {
        let mut p = packet(SampleFormat::Int32, 1, 1);
        p.length = u32::MAX;
        p.channels = u32::MAX;
        let err = p.encode().unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn encode_rejects_mismatched_payload() {
        let mut p = packet(SampleFormat::Int32, 4, 1);
        p.payload = Some(Bytes::from_static(&[0u8; 15]));
        assert!(matches!(p.encode(), Err(Error::InvalidParameter(_))));

        let mut p = packet(SampleFormat::Int32, 4, 1);
        p.payload = None;
        assert!(p.encode().is_err());

        let mut p = packet(SampleFormat::Int32, 0, 1);
        p.payload = Some(Bytes::from_static(&[0u8; 4]));
        assert!(p.encode().is_err());
    }

    // -- Helpers --

    #[test]
    fn tx_audio_derives_length() {
        let payload = Bytes::from(vec![0u8; 2 * 2 * 10]);
        let p = DataPacket::tx_audio(0, 24_000, SampleFormat::Int16, 2, payload).unwrap();
        assert_eq!(p.length, 10);
        assert_eq!(p.stream_type, StreamType::TxAudio);
        assert!(p.encode().is_ok());

        let odd = Bytes::from(vec![0u8; 3]);
        assert!(DataPacket::tx_audio(0, 24_000, SampleFormat::Int16, 1, odd).is_err());
    }

    #[test]
    fn tx_audio_rejects_zero_channels() {
        let payload = Bytes::from(vec![0u8; 8]);
        assert!(matches!(
            DataPacket::tx_audio(0, 48_000, SampleFormat::Float32, 0, payload),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn samples_f32_scaling() {
        let mut p = packet(SampleFormat::Int16, 2, 1);
        let mut raw = Vec::new();
        raw.extend_from_slice(&i16::MIN.to_le_bytes());
        raw.extend_from_slice(&16_384i16.to_le_bytes());
        p.payload = Some(Bytes::from(raw));
        assert_eq!(p.samples_f32().unwrap(), vec![-1.0, 0.5]);

        let mut p = packet(SampleFormat::Int24, 2, 1);
        p.payload = Some(Bytes::from(vec![0x00, 0x00, 0x80, 0x00, 0x00, 0x40]));
        assert_eq!(p.samples_f32().unwrap(), vec![-1.0, 0.5]);

        let mut p = packet(SampleFormat::Float32, 1, 1);
        p.payload = Some(Bytes::copy_from_slice(&0.25f32.to_le_bytes()));
        assert_eq!(p.samples_f32().unwrap(), vec![0.25]);
    }

    #[test]
    fn wire_values_round_trip() {
        for v in 0..4 {
            assert_eq!(SampleFormat::from_wire(v).unwrap().to_wire(), v);
            assert_eq!(StreamType::from_wire(v).unwrap().to_wire(), v);
        }
        assert_eq!(SampleFormat::Float32.name(), "float32");
    }
}
