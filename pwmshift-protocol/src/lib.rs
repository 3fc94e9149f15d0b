//! Binary UDP command format for pwmshift remote control.
//!
//! Every command is a single datagram with a fixed layout. Two layouts exist
//! and a deployment uses exactly one of them (see [`ProtocolVariant`]); they
//! differ in how the target is addressed and how colors are encoded.
//!
//! All multi-byte integers and floats are little-endian.
//!
//! # `Bitmask` layout (default)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0  | 1 | Command code |
//! | 1  | 8 | Target mask (u64), bit `n-1` selects id `n`, 0 = everyone |
//! | 9  | 4 | Ramp duration in ms (u32) |
//! | 13 | 3 | SetLevels: red, green, blue bytes (value / 255) |
//! | 13 | 1 | AutoPattern: step count (capped at 35) |
//! | 14 | 7 × n | AutoPattern: steps of red, green, blue bytes + rest ms (u32) |
//!
//! # `SingleId` layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | Command code |
//! | 1 | 1 | Target id, 0 = everyone |
//! | 2 | 4 | Ramp duration in ms (u32) |
//! | 6 | 24 | SetLevels: red, green, blue as f64 |
//! | 6 | 1 | AutoPattern: step count (capped at 35) |
//! | 7 | 28 × n | AutoPattern: steps of red, green, blue f64 + rest ms (u32) |
//!
//! Off and AutoDisable carry nothing beyond the target. Trailing bytes after
//! the declared fields are ignored.

use std::fmt;
use std::str::FromStr;

use derive_more::{Display, Error};
use pwmshift_engine::{ColorStep, ColorTriple, Intensity, Pattern, MAX_STEPS};
use serde::{Deserialize, Serialize};

/// UDP port the daemon listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 6565;

/// Receive buffer size; larger datagrams are truncated by the socket.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Highest addressable target id.
pub const MAX_TARGET_ID: u8 = 64;

/// Size of the ramp duration field.
const DURATION_SIZE: usize = 4;

/// Size of the rest duration at the end of each pattern step.
const REST_SIZE: usize = 4;

/// Command codes (first byte of every datagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    Off = 0,
    SetLevels = 1,
    AutoPattern = 2,
    AutoDisable = 3,
}

impl CommandCode {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::SetLevels),
            2 => Some(Self::AutoPattern),
            3 => Some(Self::AutoDisable),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::SetLevels => "SET_LEVELS",
            Self::AutoPattern => "AUTO_PATTERN",
            Self::AutoDisable => "AUTO_DISABLE",
        }
    }
}

/// Which datagram layout is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolVariant {
    /// One-byte target id and f64 colors.
    SingleId,
    /// 64-bit target mask and byte colors.
    #[default]
    Bitmask,
}

impl ProtocolVariant {
    #[must_use]
    pub const fn target_size(self) -> usize {
        match self {
            Self::SingleId => 1,
            Self::Bitmask => 8,
        }
    }

    /// Command code plus target.
    #[must_use]
    pub const fn header_size(self) -> usize {
        1 + self.target_size()
    }

    #[must_use]
    pub const fn color_size(self) -> usize {
        match self {
            Self::SingleId => 8,
            Self::Bitmask => 1,
        }
    }

    /// Bytes per AutoPattern step.
    #[must_use]
    pub const fn step_record_size(self) -> usize {
        3 * self.color_size() + REST_SIZE
    }

    const fn payload_offset(self) -> usize {
        self.header_size() + DURATION_SIZE
    }

    /// Minimum size of a SetLevels datagram.
    #[must_use]
    pub const fn set_levels_size(self) -> usize {
        self.payload_offset() + 3 * self.color_size()
    }

    /// Size of an AutoPattern datagram carrying `steps` steps.
    #[must_use]
    pub const fn pattern_size(self, steps: usize) -> usize {
        self.payload_offset() + 1 + steps * self.step_record_size()
    }

    fn read_color(self, buf: &[u8], offset: usize) -> Intensity {
        match self {
            Self::SingleId => Intensity::new(f64::from_le_bytes(array_at(buf, offset))),
            Self::Bitmask => Intensity::from_byte(buf[offset]),
        }
    }

    fn write_color(self, out: &mut Vec<u8>, level: Intensity) {
        match self {
            Self::SingleId => out.extend_from_slice(&level.get().to_le_bytes()),
            Self::Bitmask => out.push(level.to_byte()),
        }
    }

    fn read_triple(self, buf: &[u8], offset: usize) -> ColorTriple {
        let size = self.color_size();
        ColorTriple::new(
            self.read_color(buf, offset),
            self.read_color(buf, offset + size),
            self.read_color(buf, offset + 2 * size),
        )
    }

    fn write_triple(self, out: &mut Vec<u8>, triple: ColorTriple) {
        self.write_color(out, triple.r);
        self.write_color(out, triple.g);
        self.write_color(out, triple.b);
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SingleId => "single-id",
            Self::Bitmask => "bitmask",
        })
    }
}

impl FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single-id" | "single" | "id" => Ok(Self::SingleId),
            "bitmask" | "mask" => Ok(Self::Bitmask),
            other => Err(format!(
                "unknown protocol '{other}' (expected 'single-id' or 'bitmask')"
            )),
        }
    }
}

/// Addressing field of a datagram. The variant decides the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetField {
    /// `SingleId`: exact id, or 0 for everyone.
    Id(u8),
    /// `Bitmask`: bit `n-1` selects id `n`, 0 for everyone.
    Mask(u64),
}

impl TargetField {
    /// Build the field addressing `ids`; an empty list means everyone.
    pub fn from_ids(variant: ProtocolVariant, ids: &[u8]) -> Result<Self, EncodeError> {
        match variant {
            ProtocolVariant::SingleId => match ids {
                [] => Ok(Self::Id(0)),
                [id] => Ok(Self::Id(*id)),
                _ => Err(EncodeError::TooManyIds { count: ids.len() }),
            },
            ProtocolVariant::Bitmask => {
                let mut mask = 0u64;
                for &id in ids {
                    if id == 0 || id > MAX_TARGET_ID {
                        return Err(EncodeError::IdOutOfRange { id });
                    }
                    mask |= 1 << (id - 1);
                }
                Ok(Self::Mask(mask))
            }
        }
    }

    #[must_use]
    pub fn variant(self) -> ProtocolVariant {
        match self {
            Self::Id(_) => ProtocolVariant::SingleId,
            Self::Mask(_) => ProtocolVariant::Bitmask,
        }
    }

    /// Whether an instance configured with `my_id` should act on this datagram.
    ///
    /// With a mask, an instance with id 0 listens to everything; with a
    /// single id it only hears broadcasts.
    #[must_use]
    pub fn selects(self, my_id: u8) -> bool {
        match self {
            Self::Id(target) => target == 0 || target == my_id,
            Self::Mask(mask) => {
                if my_id == 0 || mask == 0 {
                    return true;
                }
                u32::from(my_id - 1) < u64::BITS && mask & (1 << (my_id - 1)) != 0
            }
        }
    }

    fn read(variant: ProtocolVariant, buf: &[u8]) -> Self {
        match variant {
            ProtocolVariant::SingleId => Self::Id(buf[1]),
            ProtocolVariant::Bitmask => Self::Mask(u64::from_le_bytes(array_at(buf, 1))),
        }
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            Self::Id(id) => out.push(id),
            Self::Mask(mask) => out.extend_from_slice(&mask.to_le_bytes()),
        }
    }
}

/// A decoded remote command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Stop auto mode and switch off.
    Off,
    /// Stop auto mode and ramp to `levels`, which become the base color.
    SetLevels { ramp_ms: u32, levels: ColorTriple },
    /// Start cycling through `pattern`.
    AutoPattern {
        ramp_ms: u32,
        pattern: Pattern,
        /// Step count as sent, before capping at [`MAX_STEPS`].
        declared_steps: u8,
    },
    /// Stop auto mode and fade back to the base color.
    AutoDisable,
}

impl Command {
    #[must_use]
    pub fn code(&self) -> CommandCode {
        match self {
            Self::Off => CommandCode::Off,
            Self::SetLevels { .. } => CommandCode::SetLevels,
            Self::AutoPattern { .. } => CommandCode::AutoPattern,
            Self::AutoDisable => CommandCode::AutoDisable,
        }
    }

    /// Serialize for the layout implied by `target`.
    #[must_use]
    pub fn encode(&self, target: TargetField) -> Vec<u8> {
        let variant = target.variant();
        let mut out = Vec::with_capacity(variant.set_levels_size());
        out.push(self.code() as u8);
        target.write(&mut out);

        match self {
            Self::Off | Self::AutoDisable => {}
            Self::SetLevels { ramp_ms, levels } => {
                out.extend_from_slice(&ramp_ms.to_le_bytes());
                variant.write_triple(&mut out, *levels);
            }
            Self::AutoPattern { ramp_ms, pattern, .. } => {
                out.extend_from_slice(&ramp_ms.to_le_bytes());
                // Pattern never holds more than MAX_STEPS (35)
                #[allow(clippy::cast_possible_truncation)]
                out.push(pattern.len() as u8);
                for step in pattern.steps() {
                    variant.write_triple(&mut out, step.color);
                    out.extend_from_slice(&step.rest_ms.to_le_bytes());
                }
            }
        }
        out
    }
}

/// Result of decoding a datagram that was well-formed enough to address.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Command(Command),
    /// Addressed to other instances; nothing else was inspected.
    NotForUs,
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum DecodeError {
    #[display("datagram too short: need {needed} bytes, got {got}")]
    TooShort { needed: usize, got: usize },
    #[display("unknown command code 0x{code:02x}")]
    UnknownCommand { code: u8 },
    #[display("auto pattern with zero steps")]
    EmptyPattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum EncodeError {
    #[display("single-id protocol addresses one target, got {count}")]
    TooManyIds { count: usize },
    #[display("target id {id} outside 1..={}", MAX_TARGET_ID)]
    IdOutOfRange { id: u8 },
}

/// Per-instance decoder: knows the layout in use and this instance's id.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    variant: ProtocolVariant,
    id: u8,
}

impl Decoder {
    #[must_use]
    pub fn new(variant: ProtocolVariant, id: u8) -> Self {
        Self { variant, id }
    }

    #[must_use]
    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Decode one datagram.
    ///
    /// The target is checked before anything else, so datagrams for other
    /// instances come back as [`Decoded::NotForUs`] even when their payload
    /// would not parse.
    pub fn decode(&self, buf: &[u8]) -> Result<Decoded, DecodeError> {
        let variant = self.variant;
        ensure_len(buf, variant.header_size())?;

        if !TargetField::read(variant, buf).selects(self.id) {
            return Ok(Decoded::NotForUs);
        }

        let code = CommandCode::from_u8(buf[0]).ok_or(DecodeError::UnknownCommand { code: buf[0] })?;
        let duration_at = variant.header_size();
        let payload_at = variant.payload_offset();

        let command = match code {
            CommandCode::Off => Command::Off,
            CommandCode::AutoDisable => Command::AutoDisable,
            CommandCode::SetLevels => {
                ensure_len(buf, variant.set_levels_size())?;
                Command::SetLevels {
                    ramp_ms: u32::from_le_bytes(array_at(buf, duration_at)),
                    levels: variant.read_triple(buf, payload_at),
                }
            }
            CommandCode::AutoPattern => {
                ensure_len(buf, variant.pattern_size(0))?;
                let ramp_ms = u32::from_le_bytes(array_at(buf, duration_at));
                let declared_steps = buf[payload_at];
                let count = usize::from(declared_steps).min(MAX_STEPS);
                if count == 0 {
                    return Err(DecodeError::EmptyPattern);
                }
                ensure_len(buf, variant.pattern_size(count))?;

                let record = variant.step_record_size();
                let steps_at = payload_at + 1;
                let steps = (0..count)
                    .map(|i| {
                        let at = steps_at + i * record;
                        let color = variant.read_triple(buf, at);
                        let rest_ms = u32::from_le_bytes(array_at(buf, at + 3 * variant.color_size()));
                        ColorStep::new(color, rest_ms)
                    })
                    .collect();
                let pattern = Pattern::new(steps).map_err(|_| DecodeError::EmptyPattern)?;

                Command::AutoPattern {
                    ramp_ms,
                    pattern,
                    declared_steps,
                }
            }
        };

        Ok(Decoded::Command(command))
    }
}

fn ensure_len(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
    if buf.len() < needed {
        return Err(DecodeError::TooShort {
            needed,
            got: buf.len(),
        });
    }
    Ok(())
}

/// Copy `N` bytes starting at `offset`. Callers check the length first.
fn array_at<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}
