//! Kite Ticker Binary Codec
//!
//! Decodes binary tick frames from the Kite ticker WebSocket.
//!
//! # Frame Layout
//!
//! ```text
//! [u16 packet count] ([u16 packet length] [packet bytes])*
//! ```
//!
//! All integers are big-endian. Prices are in paise (divide by 100). A
//! frame of exactly one byte is a heartbeat.
//!
//! # Packet Layouts (by length)
//!
//! | Length | Mode          | Fields                                              |
//! |--------|---------------|-----------------------------------------------------|
//! | 8      | LTP           | token, last price                                   |
//! | 28     | index quote   | token, last, high, low, open, close, change         |
//! | 32     | index full    | index quote + exchange timestamp                    |
//! | 44     | quote         | token, last, qty, avg, volume, buy/sell qty, OHLC   |
//! | 184    | full          | quote + ltt, OI (3), exchange timestamp, 10x depth  |
//!
//! Depth entries are 12 bytes (`qty u32, price u32, orders u16, pad u16`),
//! five bids then five asks, starting at offset 64.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Frame ended before a declared length.
    #[error("truncated frame: needed {needed} bytes at offset {offset}, frame is {len}")]
    Truncated {
        /// Offset where the read started.
        offset: usize,
        /// Bytes required.
        needed: usize,
        /// Frame length.
        len: usize,
    },
    /// Zero-length frame.
    #[error("empty frame")]
    Empty,
}

/// Packet kind, inferred from its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Last price only.
    Ltp,
    /// Index quote.
    IndexQuote,
    /// Index quote with timestamp.
    IndexFull,
    /// Equity quote.
    Quote,
    /// Equity quote with depth.
    Full,
}

impl PacketKind {
    /// Kind for a packet length, if known.
    #[must_use]
    pub const fn from_len(len: usize) -> Option<Self> {
        match len {
            8 => Some(Self::Ltp),
            28 => Some(Self::IndexQuote),
            32 => Some(Self::IndexFull),
            44 => Some(Self::Quote),
            184 => Some(Self::Full),
            _ => None,
        }
    }
}

/// One decoded tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Instrument token.
    pub token: u32,
    /// Packet kind.
    pub kind: PacketKind,
    /// Last traded price.
    pub last_price: Decimal,
    /// Day volume.
    pub volume: Option<u64>,
    /// Best bid (full mode only).
    pub bid: Option<Decimal>,
    /// Best ask (full mode only).
    pub ask: Option<Decimal>,
    /// Open interest (full mode only).
    pub open_interest: Option<u64>,
    /// Exchange timestamp (full modes only).
    pub exchange_time: Option<DateTime<Utc>>,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickFrame {
    /// Zero or more ticks.
    Ticks(Vec<Tick>),
    /// Keep-alive byte.
    Heartbeat,
}

/// Offset of the first depth entry in a full packet.
const DEPTH_OFFSET: usize = 64;
/// Size of one depth entry.
const DEPTH_ENTRY: usize = 12;
/// Offset of the first ask entry.
const ASK_OFFSET: usize = DEPTH_OFFSET + 5 * DEPTH_ENTRY;

/// Decode one binary frame.
///
/// Packets of unknown length are skipped.
///
/// # Errors
///
/// Returns an error if the frame is empty or shorter than its headers claim.
pub fn decode_frame(data: &[u8]) -> Result<TickFrame, CodecError> {
    match data.len() {
        0 => return Err(CodecError::Empty),
        1 => return Ok(TickFrame::Heartbeat),
        _ => {}
    }

    let count = usize::from(read_u16(data, 0)?);
    let mut offset = 2;
    let mut ticks = Vec::with_capacity(count);

    for _ in 0..count {
        let len = usize::from(read_u16(data, offset)?);
        offset += 2;
        let packet = slice(data, offset, len)?;
        offset += len;

        match PacketKind::from_len(len) {
            Some(kind) => ticks.push(decode_packet(packet, kind)?),
            None => tracing::debug!(len, "Skipping tick packet of unknown length"),
        }
    }

    Ok(TickFrame::Ticks(ticks))
}

fn decode_packet(packet: &[u8], kind: PacketKind) -> Result<Tick, CodecError> {
    let token = read_u32(packet, 0)?;
    let last_price = paise(read_u32(packet, 4)?);

    let mut tick = Tick {
        token,
        kind,
        last_price,
        volume: None,
        bid: None,
        ask: None,
        open_interest: None,
        exchange_time: None,
    };

    match kind {
        PacketKind::Ltp | PacketKind::IndexQuote => {}
        PacketKind::IndexFull => {
            tick.exchange_time = timestamp(read_u32(packet, 28)?);
        }
        PacketKind::Quote => {
            tick.volume = Some(u64::from(read_u32(packet, 16)?));
        }
        PacketKind::Full => {
            tick.volume = Some(u64::from(read_u32(packet, 16)?));
            tick.open_interest = Some(u64::from(read_u32(packet, 48)?)).filter(|oi| *oi > 0);
            tick.exchange_time = timestamp(read_u32(packet, 60)?);
            tick.bid = depth_price(packet, DEPTH_OFFSET)?;
            tick.ask = depth_price(packet, ASK_OFFSET)?;
        }
    }

    Ok(tick)
}

/// Best price at a depth entry; zero means the side is empty.
fn depth_price(packet: &[u8], entry: usize) -> Result<Option<Decimal>, CodecError> {
    let raw = read_u32(packet, entry + 4)?;
    Ok((raw > 0).then(|| paise(raw)))
}

fn paise(raw: u32) -> Decimal {
    Decimal::new(i64::from(raw), 2)
}

fn timestamp(secs: u32) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(i64::from(secs), 0)
}

fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], CodecError> {
    data.get(offset..offset + len).ok_or(CodecError::Truncated {
        offset,
        needed: len,
        len: data.len(),
    })
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, CodecError> {
    let bytes = slice(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, CodecError> {
    let bytes = slice(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
