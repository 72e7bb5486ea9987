use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::net::SocketAddr;

use super::constants::{
    CODE_UNITS_PER_EVENT, CODE_UNIT_SIZE_BYTES, HEADER_CODE_UNITS, MAX_EVENTS_PER_PACKET,
    NOMINAL_PACKET_SIZE_BYTES, REPLACEMENT_VALUE,
};
use super::error::PacketError;

/// How the decoder treats payloads that do not decode cleanly.
///
/// The TDC stream has always been read as UTF-16LE text with replacement of bad sequences,
/// so BestEffort keeps every packet and substitutes [`REPLACEMENT_VALUE`]. Strict rejects
/// any packet with an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    #[default]
    BestEffort,
    Strict,
}

/// One datagram as it came off the socket. Borrows the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawDatagram<'a> {
    pub payload: &'a [u8],
    pub source: SocketAddr,
    /// Seconds since the start of acquisition
    pub arrival_time: f64,
}

/// A single detected photon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotonEvent {
    pub x: u32,
    pub y: u32,
    pub pulse_height: u32,
}

/// The events contained in one datagram.
///
/// `event_count` is the value the TDC wrote in the header, taken verbatim. `events` only
/// holds the triples that are actually present, so it can be shorter than `event_count`
/// for a truncated payload; padding beyond `event_count` is never included.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedPacket {
    pub event_count: u32,
    pub packet_number: u32,
    pub events: Vec<PhotonEvent>,
    pub anomalies: Vec<PacketError>,
}

impl DecodedPacket {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn has_anomalies(&self) -> bool {
        !self.anomalies.is_empty()
    }
}

/// Turn the payload into numeric values, reproducing a UTF-16LE decode with replacement.
///
/// Lone surrogates become [`REPLACEMENT_VALUE`], valid surrogate pairs collapse into one
/// value above u16::MAX, and a dangling odd byte becomes one more replacement.
fn decode_values(payload: &[u8], anomalies: &mut Vec<PacketError>) -> Vec<u32> {
    let mut cursor = Cursor::new(payload);
    let mut units: Vec<u16> = Vec::with_capacity(payload.len() / CODE_UNIT_SIZE_BYTES);
    while let Ok(unit) = cursor.read_u16::<LittleEndian>() {
        units.push(unit);
    }

    let mut n_invalid = 0;
    let mut n_pairs = 0;
    let mut values: Vec<u32> = char::decode_utf16(units)
        .map(|decoded| match decoded {
            Ok(c) => {
                let value = c as u32;
                if value > u16::MAX as u32 {
                    n_pairs += 1;
                }
                value
            }
            Err(_) => {
                n_invalid += 1;
                REPLACEMENT_VALUE
            }
        })
        .collect();

    if payload.len() % CODE_UNIT_SIZE_BYTES != 0 {
        anomalies.push(PacketError::OddLength(payload.len()));
        values.push(REPLACEMENT_VALUE);
    }
    if n_invalid > 0 {
        anomalies.push(PacketError::InvalidCodeUnits(n_invalid));
    }
    if n_pairs > 0 {
        anomalies.push(PacketError::SurrogatePairs(n_pairs));
    }

    values
}

/// Decode one TDC datagram payload.
///
/// Layout is `[n_events, packet_number, 0, x0, y0, p0, x1, y1, p1, ...]`. Only the first
/// `n_events` triples are events, clamped to the number of triples the payload can hold
/// and never more than a packet carries.
/// In [`DecodeMode::Strict`] the first anomaly is returned as an error instead.
pub fn decode_packet(payload: &[u8], mode: DecodeMode) -> Result<DecodedPacket, PacketError> {
    let mut anomalies = Vec::new();
    let values = decode_values(payload, &mut anomalies);

    if values.len() < HEADER_CODE_UNITS {
        anomalies.push(PacketError::Undersized(payload.len()));
    }
    if payload.len() > NOMINAL_PACKET_SIZE_BYTES {
        anomalies.push(PacketError::Oversized(payload.len()));
    }

    let event_count = values.first().copied().unwrap_or(0);
    let packet_number = values.get(1).copied().unwrap_or(0);
    let capacity = (values.len().saturating_sub(HEADER_CODE_UNITS) / CODE_UNITS_PER_EVENT)
        .min(MAX_EVENTS_PER_PACKET);
    let n_events = (event_count as usize).min(capacity);
    if n_events < event_count as usize {
        anomalies.push(PacketError::TooManyEvents(event_count, capacity));
    }

    if mode == DecodeMode::Strict && !anomalies.is_empty() {
        return Err(anomalies.swap_remove(0));
    }

    let events = values
        .get(HEADER_CODE_UNITS..)
        .unwrap_or(&[])
        .chunks_exact(CODE_UNITS_PER_EVENT)
        .take(n_events)
        .map(|triple| PhotonEvent {
            x: triple[0],
            y: triple[1],
            pulse_height: triple[2],
        })
        .collect();

    Ok(DecodedPacket {
        event_count,
        packet_number,
        events,
        anomalies,
    })
}

/// Build a payload in the TDC format, zero padded to the nominal packet size.
///
/// Used to drive the collector without hardware. Events beyond what a packet can
/// carry are dropped.
pub fn encode_packet(packet_number: u16, events: &[PhotonEvent]) -> Vec<u8> {
    let n_events = events.len().min(MAX_EVENTS_PER_PACKET);
    let mut buffer: Vec<u8> = Vec::with_capacity(NOMINAL_PACKET_SIZE_BYTES);
    // Writes into a Vec cannot fail
    let _ = buffer.write_u16::<LittleEndian>(n_events as u16);
    let _ = buffer.write_u16::<LittleEndian>(packet_number);
    let _ = buffer.write_u16::<LittleEndian>(0);
    for event in events.iter().take(n_events) {
        let _ = buffer.write_u16::<LittleEndian>(event.x as u16);
        let _ = buffer.write_u16::<LittleEndian>(event.y as u16);
        let _ = buffer.write_u16::<LittleEndian>(event.pulse_height as u16);
    }
    buffer.resize(NOMINAL_PACKET_SIZE_BYTES, 0);
    buffer
}
