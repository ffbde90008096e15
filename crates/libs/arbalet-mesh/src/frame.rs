//! Frame codec: wire layout of every frame type.
//!
//! ```text
//! Offset  Frame        Field
//! ------  -----------  -----------------------------------------
//! 0       all          version
//! 1       all          type
//! 2..8    BEACON       sender address
//! 2..8    BEACON_ACK   target address
//! 2..8    INSTALL      address, slot at 8
//! 2..8    ERROR        sender address
//! 2..4    COLOR        sequence (big endian), triplets from 4
//! 2..4    COLOR_ENTRY  sequence, triplet at 4..7, target at 7..13
//! 2       ADDRESSING   sub-code
//! 2       SLEEP        sub-code
//! last    all          integrity code
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::integrity;
use crate::{FRAME_SIZE, PROTOCOL_VERSION};

/// Offset of the version byte.
pub const VERSION_OFFSET: usize = 0;
/// Offset of the type byte.
pub const TYPE_OFFSET: usize = 1;
/// Offset of the first payload byte.
pub const DATA_OFFSET: usize = 2;

const SLOT_OFFSET: usize = DATA_OFFSET + 6;
const TRIPLETS_OFFSET: usize = DATA_OFFSET + 2;
const ENTRY_TARGET_OFFSET: usize = DATA_OFFSET + 5;

/// Bytes of a COLOR frame that are not color triplets.
pub const COLOR_OVERHEAD: usize = 5;

/// Errors from frame decoding and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("unknown frame type: {0}")]
    UnknownType(u8),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("unknown {kind} sub-type: {code}")]
    UnknownSubType { kind: FrameType, code: u8 },

    #[error("integrity code mismatch: expected {expected:#04x}, got {actual:#04x}")]
    IntegrityMismatch { expected: u8, actual: u8 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Beacon = 1,
    BeaconAck = 2,
    Install = 3,
    Color = 4,
    ColorEntry = 5,
    Addressing = 6,
    Error = 7,
    Sleep = 8,
}

impl FrameType {
    /// Convert from raw byte value.
    pub fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            1 => Ok(Self::Beacon),
            2 => Ok(Self::BeaconAck),
            3 => Ok(Self::Install),
            4 => Ok(Self::Color),
            5 => Ok(Self::ColorEntry),
            6 => Ok(Self::Addressing),
            7 => Ok(Self::Error),
            8 => Ok(Self::Sleep),
            _ => Err(FrameError::UnknownType(b)),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Beacon => "BEACON",
            Self::BeaconAck => "BEACON_ACK",
            Self::Install => "INSTALL",
            Self::Color => "COLOR",
            Self::ColorEntry => "COLOR_ENTRY",
            Self::Addressing => "ADDRESSING",
            Self::Error => "ERROR",
            Self::Sleep => "SLEEP",
        };
        f.write_str(name)
    }
}

/// ADDRESSING sub-codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressingKind {
    Init = 61,
    ColorDone = 62,
    Resume = 69,
}

impl AddressingKind {
    fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            61 => Ok(Self::Init),
            62 => Ok(Self::ColorDone),
            69 => Ok(Self::Resume),
            code => Err(FrameError::UnknownSubType { kind: FrameType::Addressing, code }),
        }
    }
}

/// SLEEP sub-codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SleepKind {
    ServerSleep = 81,
    MeshSleep = 82,
    WakeUp = 89,
}

impl SleepKind {
    fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            81 => Ok(Self::ServerSleep),
            82 => Ok(Self::MeshSleep),
            89 => Ok(Self::WakeUp),
            code => Err(FrameError::UnknownSubType { kind: FrameType::Sleep, code }),
        }
    }
}

/// 6-byte mesh member identifier (the station MAC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 6]);

impl Address {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    fn read(data: &[u8], offset: usize) -> Self {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&data[offset..offset + 6]);
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for Address {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| FrameError::InvalidAddress(s.to_string()))?;
            if part.len() != 2 {
                return Err(FrameError::InvalidAddress(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| FrameError::InvalidAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(FrameError::InvalidAddress(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One color triplet as displayed by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    fn read(data: &[u8], offset: usize) -> Self {
        Self { red: data[offset], green: data[offset + 1], blue: data[offset + 2] }
    }

    fn write(&self, out: &mut [u8], offset: usize) {
        out[offset] = self.red;
        out[offset + 1] = self.green;
        out[offset + 2] = self.blue;
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.red, self.green, self.blue)
    }
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Member announcing itself.
    Beacon { sender: Address },
    /// Root acknowledging an installed member.
    BeaconAck { target: Address },
    /// Backend assigning `address` to `slot`.
    Install { address: Address, slot: u8 },
    /// Colors for every member, indexed by slot.
    Color { sequence: u16, colors: Vec<Rgb> },
    /// Color for a single member, derived from a COLOR frame by the root.
    ColorEntry { sequence: u16, color: Rgb, target: Address },
    Addressing(AddressingKind),
    Error { sender: Address },
    Sleep(SleepKind),
}

/// Wire length of a frame of type `type_byte` in a mesh of `member_count`
/// members.
pub fn frame_length(type_byte: u8, member_count: usize) -> Result<usize, FrameError> {
    match FrameType::from_byte(type_byte)? {
        FrameType::Color => Ok(3 * member_count + COLOR_OVERHEAD),
        _ => Ok(FRAME_SIZE),
    }
}

/// Address embedded in `frame`, if its type carries one.
pub fn extract_sender_address(frame: &[u8]) -> Option<Address> {
    let type_byte = *frame.get(TYPE_OFFSET)?;
    let offset = match FrameType::from_byte(type_byte) {
        Ok(FrameType::Beacon | FrameType::BeaconAck | FrameType::Install | FrameType::Error) => {
            DATA_OFFSET
        }
        Ok(FrameType::ColorEntry) => ENTRY_TARGET_OFFSET,
        Ok(FrameType::Color | FrameType::Addressing | FrameType::Sleep) => return None,
        Err(_) => {
            log::warn!("frame: no address in frame of unknown type {}", type_byte);
            return None;
        }
    };
    if frame.len() < offset + 6 {
        return None;
    }
    Some(Address::read(frame, offset))
}

/// Exact 6-byte equality.
pub fn addresses_equal(a: &Address, b: &Address) -> bool {
    a.0 == b.0
}

/// Receiver-side gate: version, type, exact length and integrity code.
pub fn validate(record: &[u8], member_count: usize) -> Result<FrameType, FrameError> {
    if record.len() <= TYPE_OFFSET {
        return Err(FrameError::TooShort(record.len()));
    }
    let version = record[VERSION_OFFSET];
    if version != PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }
    let kind = FrameType::from_byte(record[TYPE_OFFSET])?;
    let expected = frame_length(kind as u8, member_count)?;
    if record.len() != expected {
        return Err(FrameError::LengthMismatch { expected, actual: record.len() });
    }
    let (&actual, body) = record.split_last().ok_or(FrameError::TooShort(0))?;
    let computed = integrity::compute(body);
    if computed != actual {
        return Err(FrameError::IntegrityMismatch { expected: computed, actual });
    }
    Ok(kind)
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Beacon { .. } => FrameType::Beacon,
            Self::BeaconAck { .. } => FrameType::BeaconAck,
            Self::Install { .. } => FrameType::Install,
            Self::Color { .. } => FrameType::Color,
            Self::ColorEntry { .. } => FrameType::ColorEntry,
            Self::Addressing(_) => FrameType::Addressing,
            Self::Error { .. } => FrameType::Error,
            Self::Sleep(_) => FrameType::Sleep,
        }
    }

    /// Encode to wire bytes. The integrity byte is left zero; transmitters
    /// fill it in with [`integrity::seal`].
    pub fn encode(&self) -> Vec<u8> {
        let len = match self {
            Self::Color { colors, .. } => 3 * colors.len() + COLOR_OVERHEAD,
            _ => FRAME_SIZE,
        };
        let mut out = vec![0u8; len];
        out[VERSION_OFFSET] = PROTOCOL_VERSION;
        out[TYPE_OFFSET] = self.frame_type() as u8;
        match self {
            Self::Beacon { sender: address }
            | Self::BeaconAck { target: address }
            | Self::Error { sender: address } => {
                out[DATA_OFFSET..DATA_OFFSET + 6].copy_from_slice(address.as_bytes());
            }
            Self::Install { address, slot } => {
                out[DATA_OFFSET..DATA_OFFSET + 6].copy_from_slice(address.as_bytes());
                out[SLOT_OFFSET] = *slot;
            }
            Self::Color { sequence, colors } => {
                out[DATA_OFFSET..DATA_OFFSET + 2].copy_from_slice(&sequence.to_be_bytes());
                for (index, color) in colors.iter().enumerate() {
                    color.write(&mut out, TRIPLETS_OFFSET + 3 * index);
                }
            }
            Self::ColorEntry { sequence, color, target } => {
                out[DATA_OFFSET..DATA_OFFSET + 2].copy_from_slice(&sequence.to_be_bytes());
                color.write(&mut out, TRIPLETS_OFFSET);
                out[ENTRY_TARGET_OFFSET..ENTRY_TARGET_OFFSET + 6]
                    .copy_from_slice(target.as_bytes());
            }
            Self::Addressing(kind) => out[DATA_OFFSET] = *kind as u8,
            Self::Sleep(kind) => out[DATA_OFFSET] = *kind as u8,
        }
        out
    }

    /// Decode from wire bytes. The integrity code is not checked here, see
    /// [`validate`].
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() <= TYPE_OFFSET {
            return Err(FrameError::TooShort(data.len()));
        }
        let version = data[VERSION_OFFSET];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let kind = FrameType::from_byte(data[TYPE_OFFSET])?;

        if kind == FrameType::Color {
            if data.len() < COLOR_OVERHEAD || (data.len() - COLOR_OVERHEAD) % 3 != 0 {
                return Err(FrameError::LengthMismatch {
                    expected: 3 * (data.len().saturating_sub(COLOR_OVERHEAD) / 3) + COLOR_OVERHEAD,
                    actual: data.len(),
                });
            }
            let members = (data.len() - COLOR_OVERHEAD) / 3;
            let colors =
                (0..members).map(|index| Rgb::read(data, TRIPLETS_OFFSET + 3 * index)).collect();
            return Ok(Self::Color { sequence: read_sequence(data), colors });
        }

        if data.len() != FRAME_SIZE {
            return Err(FrameError::LengthMismatch { expected: FRAME_SIZE, actual: data.len() });
        }

        let frame = match kind {
            FrameType::Beacon => Self::Beacon { sender: Address::read(data, DATA_OFFSET) },
            FrameType::BeaconAck => Self::BeaconAck { target: Address::read(data, DATA_OFFSET) },
            FrameType::Install => Self::Install {
                address: Address::read(data, DATA_OFFSET),
                slot: data[SLOT_OFFSET],
            },
            FrameType::ColorEntry => Self::ColorEntry {
                sequence: read_sequence(data),
                color: Rgb::read(data, TRIPLETS_OFFSET),
                target: Address::read(data, ENTRY_TARGET_OFFSET),
            },
            FrameType::Addressing => Self::Addressing(AddressingKind::from_byte(data[DATA_OFFSET])?),
            FrameType::Error => Self::Error { sender: Address::read(data, DATA_OFFSET) },
            FrameType::Sleep => Self::Sleep(SleepKind::from_byte(data[DATA_OFFSET])?),
            FrameType::Color => unreachable!("COLOR handled above"),
        };
        Ok(frame)
    }
}

fn read_sequence(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[DATA_OFFSET], data[DATA_OFFSET + 1]])
}

/// Reassembles frames from a byte stream.
///
/// Stream reads may split or merge frames. Each frame's length is derived
/// from its type byte. A byte position that cannot start a frame, or whose
/// candidate frame fails the integrity code, is skipped.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame whose integrity code checks out, if one is
    /// buffered.
    pub fn next_frame(&mut self, member_count: usize) -> Option<Vec<u8>> {
        loop {
            if self.buffer.len() <= TYPE_OFFSET {
                return None;
            }
            let version = self.buffer[VERSION_OFFSET];
            let length = match frame_length(self.buffer[TYPE_OFFSET], member_count) {
                Ok(length) if version == PROTOCOL_VERSION => length,
                _ => {
                    self.skip_byte();
                    continue;
                }
            };
            if self.buffer.len() < length {
                return None;
            }
            if !integrity::verify(&self.buffer[..length]) {
                self.skip_byte();
                continue;
            }
            return Some(self.buffer.drain(..length).collect());
        }
    }

    fn skip_byte(&mut self) {
        log::debug!(
            "frame: resync, dropping byte {:#04x} (next {:#04x})",
            self.buffer[0],
            self.buffer[TYPE_OFFSET]
        );
        self.buffer.remove(0);
    }
}
