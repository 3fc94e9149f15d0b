//! Interactive keyboard console.
//!
//! Puts the terminal in raw mode, redraws a status screen every poll
//! interval and maps single key presses to controller operations.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{execute, queue};
use log::{error, info};
use pwmshift_engine::{Channel, Intensity, ModeController, Preset, Status};

use crate::config::{CRAZY_DELAY_STEP_MS, MAX_CRAZY_DELAY_MS, MIN_CRAZY_DELAY_MS};
use crate::listener::ListenerStats;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Base color change per key press.
const ADJUST_STEP: f64 = 0.1;

const KEY_HELP: &[&str] = &[
    "Press 'R' or 'r' to increase/decrease static red intensity",
    "Press 'G' or 'g' to increase/decrease static green intensity",
    "Press 'B' or 'b' to increase/decrease static blue intensity",
    "Press '[' or ']' to increase/decrease all static intensity",
    "",
    "Press 'h' to be scary",
    "Press 'e' to summon the easter bunny",
    "Press 'x' to get into the holiday spirit",
    "Press '4' for an independence celebration",
    "Press 'c' to GO CRAZY!!!! (epilepsy warning)",
    "Press '-' or '=' to decrease/increase the crazy delay",
    "Press '.' to disable any auto-cycler",
    "",
    "Press 'q' to quit",
];

/// What a key press asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Adjust(Channel, f64),
    AdjustAll(f64),
    StartPreset(Preset),
    StartCrazy,
    ChangeCrazyDelay(i64),
    DisableAuto,
    Quit,
    /// Ctrl-C arrives as a key press while the terminal is raw
    Interrupt,
}

/// Why the console loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    Interrupted,
}

#[must_use]
pub fn action_for_key(key: KeyEvent) -> Option<Action> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let KeyCode::Char(c) = key.code else {
        return None;
    };
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return matches!(c, 'c' | 'C').then_some(Action::Interrupt);
    }

    let action = match c {
        'R' => Action::Adjust(Channel::Red, ADJUST_STEP),
        'r' => Action::Adjust(Channel::Red, -ADJUST_STEP),
        'G' => Action::Adjust(Channel::Green, ADJUST_STEP),
        'g' => Action::Adjust(Channel::Green, -ADJUST_STEP),
        'B' => Action::Adjust(Channel::Blue, ADJUST_STEP),
        'b' => Action::Adjust(Channel::Blue, -ADJUST_STEP),
        '[' => Action::AdjustAll(ADJUST_STEP),
        ']' => Action::AdjustAll(-ADJUST_STEP),
        'h' => Action::StartPreset(Preset::Halloween),
        'e' => Action::StartPreset(Preset::Easter),
        'x' => Action::StartPreset(Preset::Christmas),
        '4' => Action::StartPreset(Preset::JulyFourth),
        'c' => Action::StartCrazy,
        '-' => Action::ChangeCrazyDelay(-i64::from(CRAZY_DELAY_STEP_MS)),
        '=' => Action::ChangeCrazyDelay(i64::from(CRAZY_DELAY_STEP_MS)),
        '.' => Action::DisableAuto,
        'q' => Action::Quit,
        _ => return None,
    };
    Some(action)
}

/// Restores the terminal when dropped, including on early returns.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let guard = Self;
        execute!(io::stdout(), EnterAlternateScreen, Hide)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

/// Leave raw mode and the alternate screen. Safe to call more than once.
pub fn restore_terminal() {
    let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
    let _ = disable_raw_mode();
}

pub struct Console {
    controller: Arc<ModeController>,
    stats: Arc<ListenerStats>,
    target_id: u8,
    crazy_delay_ms: u32,
}

impl Console {
    pub fn new(
        controller: Arc<ModeController>,
        stats: Arc<ListenerStats>,
        target_id: u8,
        crazy_delay_ms: u32,
    ) -> Self {
        Self {
            controller,
            stats,
            target_id,
            crazy_delay_ms,
        }
    }

    /// Run until the user quits. The terminal is restored before returning.
    pub fn run(&mut self) -> io::Result<ConsoleExit> {
        let _terminal = TerminalGuard::enter()?;
        let mut stdout = io::stdout();

        loop {
            self.draw(&mut stdout)?;
            if !event::poll(POLL_INTERVAL)? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                if let Some(exit) = action_for_key(key).and_then(|action| self.apply(action)) {
                    return Ok(exit);
                }
            }
        }
    }

    /// Carry out one action. Returns `Some` when the console should close.
    pub fn apply(&mut self, action: Action) -> Option<ConsoleExit> {
        match action {
            Action::Adjust(channel, delta) => {
                self.controller.adjust_static(&[channel], delta);
            }
            Action::AdjustAll(delta) => {
                self.controller.adjust_static(&Channel::ALL, delta);
            }
            Action::StartPreset(preset) => {
                if let Err(e) = self.controller.start_preset(preset) {
                    error!("Preset '{}' not started: {e}", preset.name());
                }
            }
            Action::StartCrazy => {
                if let Err(e) = self.controller.start_crazy(self.crazy_delay_ms) {
                    error!("Crazy mode not started: {e}");
                }
            }
            Action::ChangeCrazyDelay(delta) => {
                let next = i64::from(self.crazy_delay_ms) + delta;
                if (i64::from(MIN_CRAZY_DELAY_MS)..=i64::from(MAX_CRAZY_DELAY_MS)).contains(&next) {
                    // In range, so the conversion cannot fail
                    self.crazy_delay_ms = u32::try_from(next).unwrap_or(self.crazy_delay_ms);
                    info!("Crazy delay now {}ms", self.crazy_delay_ms);
                }
            }
            Action::DisableAuto => {
                self.controller.disable_auto();
            }
            Action::Quit => return Some(ConsoleExit::Quit),
            Action::Interrupt => return Some(ConsoleExit::Interrupted),
        }
        None
    }

    fn draw(&self, out: &mut impl Write) -> io::Result<()> {
        let mut lines = status_lines(
            &self.controller.status(),
            &self.stats,
            self.target_id,
            self.crazy_delay_ms,
        );
        lines.extend(KEY_HELP.iter().map(|line| (*line).to_string()));

        for (row, line) in lines.iter().enumerate() {
            let row = u16::try_from(row).unwrap_or(u16::MAX);
            queue!(out, MoveTo(0, row), Print(line), Clear(ClearType::UntilNewLine))?;
        }
        out.flush()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // 0..=100
fn percent(level: Intensity) -> u32 {
    (level.get() * 100.0) as u32
}

/// Status screen above the key help.
#[must_use]
pub fn status_lines(
    status: &Status,
    stats: &ListenerStats,
    target_id: u8,
    crazy_delay_ms: u32,
) -> Vec<String> {
    let channel = |name: &str, channel: Channel| {
        format!(
            "{name:<6}: {} ({}) %",
            percent(channel.get(status.current)),
            percent(channel.get(status.base))
        )
    };
    vec![
        "PWM Shifter Running".to_string(),
        "-------------------".to_string(),
        channel("Red", Channel::Red),
        channel("Green", Channel::Green),
        channel("Blue", Channel::Blue),
        format!(
            "Crazy Speed : {}/20 (restart crazy to apply)",
            crazy_delay_ms / CRAZY_DELAY_STEP_MS
        ),
        format!("Mode: {}", status.mode.label()),
        format!(
            "Auto worker: {}",
            if status.worker.is_alive() { "active" } else { "idle" }
        ),
        format!("ID: {target_id}"),
        format!(
            "UDP Messages: {} ({} accepted, {} discarded)",
            stats.received(),
            stats.accepted(),
            stats.discarded()
        ),
        String::new(),
    ]
}
