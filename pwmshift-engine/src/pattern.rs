//! Auto-cycle patterns and the built-in presets.

use derive_more::{Display, Error};
use log::warn;

use crate::level::{color, ColorTriple, BLACK};

/// Most steps a pattern may hold. Remote patterns cannot carry more in one datagram.
pub const MAX_STEPS: usize = 35;

/// A color to ramp to and how long to hold it afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStep {
    pub color: ColorTriple,
    pub rest_ms: u32,
}

impl ColorStep {
    #[must_use]
    pub const fn new(color: ColorTriple, rest_ms: u32) -> Self {
        Self { color, rest_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum PatternError {
    #[display("pattern has no steps")]
    Empty,
}

/// Ordered, non-empty list of at most [`MAX_STEPS`] steps, played in a loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    steps: Vec<ColorStep>,
}

impl Pattern {
    /// Build a pattern, keeping only the first [`MAX_STEPS`] steps.
    pub fn new(mut steps: Vec<ColorStep>) -> Result<Self, PatternError> {
        if steps.is_empty() {
            return Err(PatternError::Empty);
        }
        if steps.len() > MAX_STEPS {
            warn!(
                "Pattern has {} steps, keeping the first {MAX_STEPS}",
                steps.len()
            );
            steps.truncate(MAX_STEPS);
        }
        Ok(Self { steps })
    }

    /// The single all-black step that tells the worker to pick random colors.
    #[must_use]
    pub fn crazy() -> Self {
        Self {
            steps: vec![ColorStep::new(BLACK, 0)],
        }
    }

    /// `true` iff this is exactly one step whose three channels are exactly zero.
    #[must_use]
    #[allow(clippy::float_cmp)] // exact zero is the marker
    pub fn is_crazy(&self) -> bool {
        match self.steps.as_slice() {
            [only] => {
                only.color.r.get() == 0.0 && only.color.g.get() == 0.0 && only.color.b.get() == 0.0
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the pattern has no steps, which construction rules out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at `index`, wrapping around the end of the pattern.
    #[must_use]
    pub fn step(&self, index: usize) -> ColorStep {
        self.steps[index % self.steps.len()]
    }

    #[must_use]
    pub fn steps(&self) -> &[ColorStep] {
        &self.steps
    }
}

/// Built-in named patterns selectable from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Christmas,
    Halloween,
    JulyFourth,
    Easter,
}

impl Preset {
    pub const ALL: [Self; 4] = [
        Self::Christmas,
        Self::Halloween,
        Self::JulyFourth,
        Self::Easter,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Christmas => "christmas",
            Self::Halloween => "halloween",
            Self::JulyFourth => "july-fourth",
            Self::Easter => "easter",
        }
    }

    /// Ramp duration between steps.
    #[must_use]
    pub const fn ramp_ms(self) -> u32 {
        1000
    }

    #[must_use]
    pub fn pattern(self) -> Pattern {
        let steps = match self {
            Self::Christmas => vec![
                ColorStep::new(color(1.0, 0.0, 0.0), 2000), // red
                ColorStep::new(color(0.0, 1.0, 0.0), 2000), // green
            ],
            Self::Halloween => vec![
                ColorStep::new(color(1.0, 0.094, 0.0), 1000), // orange
                ColorStep::new(BLACK, 250),
            ],
            Self::JulyFourth => vec![
                ColorStep::new(color(1.0, 0.0, 0.0), 1000), // red
                ColorStep::new(color(0.5, 0.5, 0.5), 1000), // white
                ColorStep::new(color(0.0, 0.0, 1.0), 1000), // blue
            ],
            Self::Easter => vec![
                ColorStep::new(color(1.0, 0.012, 0.753), 1000), // pink
                ColorStep::new(color(0.031, 1.0, 0.969), 1000), // cyan
                ColorStep::new(color(1.0, 0.988, 0.02), 1000),  // yellow
            ],
        };
        Pattern { steps }
    }
}
