//! Intensity values and the shared output state.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::warn;
use rgb::RGB;

use crate::sink::OutputSink;

/// Brightness of one channel, always within `[0.0, 1.0]`.
///
/// Construction never fails: negative inputs are sign-corrected, values above
/// one are clamped and NaN becomes zero.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Intensity(f64);

impl Intensity {
    pub const OFF: Self = Self(0.0);
    pub const FULL: Self = Self(1.0);

    #[must_use]
    pub fn new(raw: f64) -> Self {
        if raw.is_nan() {
            return Self::OFF;
        }
        Self(raw.abs().min(1.0))
    }

    /// Scale a wire byte (0..=255) to an intensity.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self(f64::from(byte) / 255.0)
    }

    /// Nearest wire byte for this intensity.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // 0.0..=255.0 after rounding
    pub fn to_byte(self) -> u8 {
        (self.0 * 255.0).round() as u8
    }

    #[must_use]
    pub const fn get(self) -> f64 {
        self.0
    }

    /// `self + delta`, saturating at both ends of the range.
    #[must_use]
    pub fn offset(self, delta: f64) -> Self {
        Self::new((self.0 + delta).clamp(0.0, 1.0))
    }
}

impl From<f64> for Intensity {
    fn from(raw: f64) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

/// Red, green and blue intensities.
pub type ColorTriple = RGB<Intensity>;

pub const BLACK: ColorTriple = RGB {
    r: Intensity::OFF,
    g: Intensity::OFF,
    b: Intensity::OFF,
};

/// Build a triple from raw values, correcting each channel.
#[must_use]
pub fn color(red: f64, green: f64, blue: f64) -> ColorTriple {
    RGB::new(Intensity::new(red), Intensity::new(green), Intensity::new(blue))
}

/// One of the three PWM outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Self; 3] = [Self::Red, Self::Green, Self::Blue];

    #[must_use]
    pub fn get(self, triple: ColorTriple) -> Intensity {
        match self {
            Self::Red => triple.r,
            Self::Green => triple.g,
            Self::Blue => triple.b,
        }
    }

    pub fn set(self, triple: &mut ColorTriple, level: Intensity) {
        match self {
            Self::Red => triple.r = level,
            Self::Green => triple.g = level,
            Self::Blue => triple.b = level,
        }
    }
}

/// The device sink together with the last triple written to it.
pub struct Output {
    sink: Box<dyn OutputSink>,
    current: ColorTriple,
}

/// Output handle shared by the controller and the auto-cycle worker.
pub type SharedOutput = Arc<Mutex<Output>>;

impl Output {
    /// Wrap a sink. Nothing is written until the first `set_*` call.
    pub fn new(sink: impl OutputSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            current: BLACK,
        }
    }

    #[must_use]
    pub fn shared(self) -> SharedOutput {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub fn current(&self) -> ColorTriple {
        self.current
    }

    pub fn set_levels(&mut self, levels: ColorTriple) {
        self.current = levels;
        if let Err(e) = self.sink.write_levels(levels) {
            warn!("Output write failed: {e}");
        }
    }

    pub fn set_channel(&mut self, channel: Channel, level: Intensity) {
        channel.set(&mut self.current, level);
        if let Err(e) = self.sink.write_channel(channel, level) {
            warn!("Output write failed ({channel:?}): {e}");
        }
    }
}
