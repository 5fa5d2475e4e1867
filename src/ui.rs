use std::io::{Write, stdout};

use anyhow::Result;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::style::Stylize;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};

use crate::util::truncate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerRow {
    pub id: String,
    pub label: String,
    pub last_active: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PickerAction {
    Continue,
    Chosen(usize),
    Cancelled,
}

#[derive(Debug)]
struct PickerState {
    selected: usize,
    len: usize,
}

impl PickerState {
    fn new(len: usize) -> Self {
        Self { selected: 0, len }
    }

    fn handle_key(&mut self, key: KeyEvent) -> PickerAction {
        if key.kind == KeyEventKind::Release {
            return PickerAction::Continue;
        }
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.checked_sub(1).unwrap_or(self.len - 1);
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected = (self.selected + 1) % self.len;
            }
            KeyCode::Home => self.selected = 0,
            KeyCode::End => self.selected = self.len - 1,
            KeyCode::Enter => return PickerAction::Chosen(self.selected),
            KeyCode::Esc | KeyCode::Char('q') => return PickerAction::Cancelled,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return PickerAction::Cancelled;
            }
            _ => {}
        }
        PickerAction::Continue
    }
}

/// Lets the user choose one row. Returns the index of the chosen row, or `None` when the list
/// is empty or the user cancels.
pub fn pick(title: &str, rows: &[PickerRow]) -> Result<Option<usize>> {
    if rows.is_empty() {
        return Ok(None);
    }

    let mut state = PickerState::new(rows.len());
    enter_terminal()?;

    let mut run = || -> Result<Option<usize>> {
        loop {
            draw(title, rows, state.selected)?;
            if let Event::Key(key) = event::read()? {
                match state.handle_key(key) {
                    PickerAction::Continue => {}
                    PickerAction::Chosen(index) => return Ok(Some(index)),
                    PickerAction::Cancelled => return Ok(None),
                }
            }
        }
    };

    let result = run();
    let _ = leave_terminal();
    result
}

fn enter_terminal() -> Result<()> {
    let mut out = stdout();
    terminal::enable_raw_mode()?;
    execute!(out, EnterAlternateScreen, Hide)?;
    Ok(())
}

fn leave_terminal() -> Result<()> {
    let mut out = stdout();
    execute!(out, Show, LeaveAlternateScreen)?;
    terminal::disable_raw_mode()?;
    Ok(())
}

fn draw(title: &str, rows: &[PickerRow], selected: usize) -> Result<()> {
    let mut out = stdout();
    let (width, height) = terminal::size()?;
    if width == 0 || height < 3 {
        return Ok(());
    }
    let w = width as usize;
    let visible = (height as usize).saturating_sub(2);
    let first = visible_window_start(selected, rows.len(), visible);

    execute!(out, MoveTo(0, 0), Clear(ClearType::All))?;
    write!(out, "{}", truncate(title, w).bold())?;

    for (offset, row) in rows.iter().enumerate().skip(first).take(visible) {
        let line = truncate(&row_text(row), w.saturating_sub(2));
        execute!(out, MoveTo(0, (offset - first + 1) as u16))?;
        if offset == selected {
            write!(out, "{} {}", ">".cyan().bold(), line.reverse())?;
        } else {
            write!(out, "  {line}")?;
        }
    }

    execute!(out, MoveTo(0, height - 1))?;
    let footer = "Up/Down to move, Enter to select, Esc or q to cancel.";
    write!(out, "{}", truncate(footer, w).dark_grey())?;
    out.flush()?;
    Ok(())
}

fn row_text(row: &PickerRow) -> String {
    format!("{:<19}  {}  {}", row.last_active, row.label, row.id)
}

fn visible_window_start(selected: usize, len: usize, visible: usize) -> usize {
    if visible == 0 || len <= visible {
        return 0;
    }
    let start = selected.saturating_sub(visible - 1);
    start.min(len - visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn navigation_wraps_both_ways() {
        let mut state = PickerState::new(3);
        assert_eq!(state.handle_key(key(KeyCode::Up)), PickerAction::Continue);
        assert_eq!(state.selected, 2);
        state.handle_key(key(KeyCode::Down));
        assert_eq!(state.selected, 0);
        state.handle_key(key(KeyCode::Char('j')));
        assert_eq!(state.handle_key(key(KeyCode::Enter)), PickerAction::Chosen(1));
    }

    #[test]
    fn escape_and_ctrl_c_cancel() {
        let mut state = PickerState::new(2);
        assert_eq!(state.handle_key(key(KeyCode::Esc)), PickerAction::Cancelled);
        assert_eq!(
            state.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            PickerAction::Cancelled
        );
    }

    #[test]
    fn window_keeps_selection_visible() {
        assert_eq!(visible_window_start(0, 3, 10), 0);
        assert_eq!(visible_window_start(4, 20, 5), 0);
        assert_eq!(visible_window_start(7, 20, 5), 3);
        assert_eq!(visible_window_start(19, 20, 5), 15);
    }

    #[test]
    fn empty_list_returns_none_without_touching_terminal() {
        assert_eq!(pick("Resume", &[]).expect("pick"), None);
    }
}
