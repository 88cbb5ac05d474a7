//! Projection of mixes into board cards and the terminal renderer.

use std::io::Write;

use mixboard_shared::domain::{Mix, MixId, UserProfile};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alert::AudioGate;
use crate::indicators::{FaviconBadge, IconSink, compose_title};
use crate::ticker::{BoardView, TickReport, TimerState, TimerWidget, WidgetSource};

pub const BOARD_TITLE: &str = "Mixboard";
pub const DEFAULT_MIX_NAME: &str = "A mix";
pub const DEFAULT_STAGE_NAME: &str = "Component";

/// Which mixes the board shows.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Mixes owned by other users
    #[default]
    Team,
    /// Mixes owned by the current user
    Mine,
    /// Every active mix
    All,
}

impl ViewMode {
    fn includes(self, mix: &Mix, me: &UserProfile) -> bool {
        match self {
            ViewMode::Team => mix.owner.id != me.id,
            ViewMode::Mine => mix.owner.id == me.id,
            ViewMode::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub mix_id: MixId,
    pub name: String,
    pub owner: String,
    pub color: String,
    pub stage_name: String,
    /// 1-based position of the current stage, and the stage count.
    pub stage_position: (usize, usize),
    pub on_final_stage: bool,
    /// Index into [`Board::widgets`].
    pub widget: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Board {
    pub cards: Vec<Card>,
    pub widgets: Vec<TimerWidget>,
    /// Connection or server status shown above the cards.
    pub status: Option<String>,
}

impl Board {
    pub fn project(mixes: &[Mix], me: &UserProfile, mode: ViewMode) -> Self {
        let mut board = Board::default();
        for mix in mixes
            .iter()
            .filter(|m| !m.is_deleted && mode.includes(m, me))
        {
            let name = display_name(mix);
            let stage_name = mix
                .current_stage()
                .map(|s| non_blank(&s.name, DEFAULT_STAGE_NAME))
                .unwrap_or_else(|| DEFAULT_STAGE_NAME.to_string());
            let widget = mix.current_deadline_ms().map(|end_at_ms| {
                board.widgets.push(TimerWidget {
                    key: Some(mix.entity_key()),
                    end_at_ms,
                    display_name: name.clone(),
                    stage_name: stage_name.clone(),
                });
                board.widgets.len() - 1
            });
            board.cards.push(Card {
                mix_id: mix.id.clone(),
                name,
                owner: mix.owner.label().to_string(),
                color: mix.color().to_string(),
                stage_name,
                stage_position: (mix.current_stage_index + 1, mix.stages.len()),
                on_final_stage: mix.is_on_final_stage(),
                widget,
            });
        }
        board
    }

    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }
}

impl WidgetSource for Board {
    fn widgets(&self) -> &[TimerWidget] {
        &self.widgets
    }
}

/// Mix name for alerts and cards, batch number appended when present.
pub fn display_name(mix: &Mix) -> String {
    let name = non_blank(&mix.name, DEFAULT_MIX_NAME);
    match mix.metadata.batch_number.as_deref().map(str::trim) {
        Some(b) if !b.is_empty() => format!("{name} #{b}"),
        _ => name,
    }
}

fn non_blank(s: &str, fallback: &str) -> String {
    let t = s.trim();
    if t.is_empty() {
        fallback.to_string()
    } else {
        t.to_string()
    }
}

/// Terminal icon name (OSC 1). Escapes are buffered until the renderer
/// flushes them.
#[derive(Debug)]
pub struct TerminalIcon {
    icon: String,
    pending: Vec<u8>,
}

impl TerminalIcon {
    pub fn new(icon: impl Into<String>) -> Self {
        Self {
            icon: icon.into(),
            pending: Vec::new(),
        }
    }

    fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

impl IconSink for TerminalIcon {
    fn current_icon(&self) -> String {
        self.icon.clone()
    }

    fn set_icon(&mut self, icon: &str) {
        self.icon = icon.to_string();
        self.pending
            .extend_from_slice(format!("\x1b]1;{icon}\x07").as_bytes());
    }
}

const RESET: &str = "\x1b[0m";
const OVERDUE_STYLE: &str = "\x1b[1;31m";
const WARNING_STYLE: &str = "\x1b[1;33m";

/// Redraws the board on a terminal every tick.
pub struct ConsoleRenderer<W> {
    out: W,
    original_title: String,
    shown_title: Option<String>,
    badge: FaviconBadge<TerminalIcon>,
    gate: Option<AudioGate>,
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            out,
            badge: FaviconBadge::new(TerminalIcon::new(title.clone())),
            original_title: title,
            shown_title: None,
            gate: None,
        }
    }

    /// Shows a hint until audio has been unlocked.
    pub fn with_audio_gate(mut self, gate: AudioGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn draw(&mut self, board: &Board, report: &TickReport) -> std::io::Result<()> {
        let title = compose_title(
            report.any_overdue,
            report.min_remaining_ms,
            &self.original_title,
        );
        if self.shown_title.as_deref() != Some(title.as_str()) {
            write!(self.out, "\x1b]0;{title}\x07")?;
            self.shown_title = Some(title.clone());
        }
        self.badge.update(report.any_overdue);
        let icon = self.badge.sink_mut().take_pending();
        self.out.write_all(&icon)?;

        write!(self.out, "\x1b[2J\x1b[H")?;
        writeln!(self.out, "{title}")?;
        if let Some(status) = &board.status {
            writeln!(self.out, "{WARNING_STYLE}{status}{RESET}")?;
        }
        if let Some(gate) = &self.gate
            && !gate.is_unlocked()
        {
            writeln!(self.out, "Press Enter to enable alert sounds.")?;
        }
        writeln!(self.out)?;
        if board.cards.is_empty() {
            writeln!(self.out, "No active mixes.")?;
        }
        for card in &board.cards {
            let view = card.widget.and_then(|i| report.widgets.get(i));
            let state = view.map(|v| v.state).unwrap_or(TimerState::Normal);
            let label = match view {
                Some(v) if v.state == TimerState::Overdue && card.on_final_stage => {
                    "All stages complete".to_string()
                }
                Some(v) => v.label.clone(),
                None => String::new(),
            };
            let style = match state {
                TimerState::Overdue => OVERDUE_STYLE,
                TimerState::Warning => WARNING_STYLE,
                TimerState::Normal => "",
            };
            let marker = if report.overdue_cards.contains(&card.mix_id) {
                "!"
            } else {
                " "
            };
            let (pos, total) = card.stage_position;
            writeln!(
                self.out,
                "{marker}{} {:<28} {:<20} {pos}/{total}  {style}{label:>20}{}  {}",
                swatch(&card.color),
                card.name,
                card.stage_name,
                if style.is_empty() { "" } else { RESET },
                card.owner,
            )?;
        }
        self.out.flush()
    }

    /// Puts the terminal title and icon back.
    pub fn restore(&mut self) {
        self.badge.update(false);
        let icon = self.badge.sink_mut().take_pending();
        let res = self
            .out
            .write_all(&icon)
            .and_then(|_| write!(self.out, "\x1b]0;{}\x07", self.original_title))
            .and_then(|_| self.out.flush());
        if let Err(e) = res {
            debug!(error=%e, "failed to restore terminal title");
        }
        self.shown_title = None;
    }
}

impl<W: Write + Send> BoardView<Board> for ConsoleRenderer<W> {
    fn render(&mut self, frame: &Board, report: &TickReport) {
        if let Err(e) = self.draw(frame, report) {
            debug!(error=%e, "board redraw failed");
        }
    }
}

/// Coloured block for a `#rrggbb` colour, or a plain one if it does not parse.
fn swatch(color: &str) -> String {
    match hex_rgb(color) {
        Some((r, g, b)) => format!("\x1b[38;2;{r};{g};{b}m■{RESET}"),
        None => "■".to_string(),
    }
}

fn hex_rgb(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.trim().strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((byte(0)?, byte(2)?, byte(4)?))
}
