//! Agent/collector wire codec
//!
//! Every message after the handshake is a little-endian `u32` byte count
//! followed by the payload:
//!
//! ```text
//! agent -> collector   [len][ViolationInfo, 32 bytes fixed layout]
//! collector -> agent   [len][UTF-8 JSON entry array]
//! ```
//!
//! The one exception is the handshake: right after accepting a connection the
//! collector writes the full configuration JSON *unframed*. The agent reads it
//! by parsing exactly one JSON value off the stream, which consumes nothing past
//! the closing bracket.
//!
//! ViolationInfo layout (matches the C struct the collector was built around):
//!
//! ```text
//! offset  size  field
//!      0     4  pid        u32 LE
//!      4    16  name       NUL-padded
//!     20     1  metric     u8
//!     21     3  padding    zero
//!     24     4  value      u32 LE
//!     28     4  threshold  u32 LE
//! ```

use std::io::{Read, Write};

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    Metric, NAME_CAPACITY, ProcessName, Violation, ViolationInfo,
    config::{ConfigEntry, ConfigRecord},
    error::ProtocolError,
};

pub const VIOLATION_SIZE: usize = 32;

/// Upper bound on any frame; protects against a garbage length prefix.
pub const MAX_FRAME_LEN: u32 = 1 << 20;

const NAME_OFFSET: usize = 4;
const METRIC_OFFSET: usize = NAME_OFFSET + NAME_CAPACITY;
const VALUE_OFFSET: usize = 24;
const THRESHOLD_OFFSET: usize = 28;

pub fn encode_violation(info: &ViolationInfo) -> [u8; VIOLATION_SIZE] {
    let mut buf = [0u8; VIOLATION_SIZE];
    buf[..NAME_OFFSET].copy_from_slice(&info.pid.to_le_bytes());
    buf[NAME_OFFSET..METRIC_OFFSET].copy_from_slice(info.name.as_bytes());
    buf[METRIC_OFFSET] = info.violation.metric as u8;
    buf[VALUE_OFFSET..THRESHOLD_OFFSET].copy_from_slice(&info.violation.value.to_le_bytes());
    buf[THRESHOLD_OFFSET..].copy_from_slice(&info.violation.threshold.to_le_bytes());
    buf
}

pub fn decode_violation(payload: &[u8]) -> Result<ViolationInfo, ProtocolError> {
    let buf: &[u8; VIOLATION_SIZE] =
        payload
            .try_into()
            .map_err(|_| ProtocolError::InvalidLength {
                expected: VIOLATION_SIZE,
                actual: payload.len(),
            })?;

    let mut name = [0u8; NAME_CAPACITY];
    name.copy_from_slice(&buf[NAME_OFFSET..METRIC_OFFSET]);

    let raw_metric = buf[METRIC_OFFSET];
    let metric = Metric::from_u8(raw_metric).ok_or(ProtocolError::InvalidMetric(raw_metric))?;

    Ok(ViolationInfo {
        pid: read_u32(buf, 0),
        name: ProcessName::from_bytes(name),
        violation: Violation {
            metric,
            value: read_u32(buf, VALUE_OFFSET),
            threshold: read_u32(buf, THRESHOLD_OFFSET),
        },
    })
}

fn read_u32(buf: &[u8; VIOLATION_SIZE], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub fn encode_config(entries: &[ConfigEntry]) -> Result<Vec<u8>, ProtocolError> {
    let records: Vec<ConfigRecord> = entries.iter().map(ConfigRecord::from).collect();
    Ok(serde_json::to_vec(&records)?)
}

pub fn decode_config(payload: &[u8]) -> Result<Vec<ConfigEntry>, ProtocolError> {
    let records: Vec<ConfigRecord> = serde_json::from_slice(payload)?;
    Ok(records.into_iter().map(ConfigEntry::from).collect())
}

fn frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    check_len(len)?;

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

fn check_len(len: u32) -> Result<usize, ProtocolError> {
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(len as usize)
}

/// Write one length-prefixed frame with a single `write_all`, so frames never
/// interleave on a shared stream.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
    writer.write_all(&frame(payload)?)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = check_len(u32::from_le_bytes(len))?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

pub fn write_violation<W: Write>(writer: &mut W, info: &ViolationInfo) -> Result<(), ProtocolError> {
    write_frame(writer, &encode_violation(info))
}

pub fn read_violation<R: Read>(reader: &mut R) -> Result<ViolationInfo, ProtocolError> {
    decode_violation(&read_frame(reader)?)
}

pub fn write_config_frame<W: Write>(
    writer: &mut W,
    entries: &[ConfigEntry],
) -> Result<(), ProtocolError> {
    write_frame(writer, &encode_config(entries)?)
}

pub fn read_config_frame<R: Read>(reader: &mut R) -> Result<Vec<ConfigEntry>, ProtocolError> {
    decode_config(&read_frame(reader)?)
}

/// Read the unframed handshake configuration.
///
/// Exactly one JSON value is consumed; bytes following it stay in the stream.
/// The reader must not be buffered by the caller.
pub fn read_initial_config<R: Read>(reader: &mut R) -> Result<Vec<ConfigEntry>, ProtocolError> {
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    let records = Vec::<ConfigRecord>::deserialize(&mut deserializer)?;
    Ok(records.into_iter().map(ConfigEntry::from).collect())
}

pub fn write_initial_config<W: Write>(
    writer: &mut W,
    entries: &[ConfigEntry],
) -> Result<(), ProtocolError> {
    writer.write_all(&encode_config(entries)?)?;
    writer.flush()?;
    Ok(())
}

pub async fn write_frame_async<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame(payload)?).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame_async<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let len = check_len(reader.read_u32_le().await?)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

pub async fn read_violation_async<R>(reader: &mut R) -> Result<ViolationInfo, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    decode_violation(&read_frame_async(reader).await?)
}
