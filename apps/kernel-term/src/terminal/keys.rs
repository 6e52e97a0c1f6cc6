use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use kernel_term_core::input::{KEY_BACKSPACE, KEY_ENTER, KEY_INTERRUPT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Input(char),
    Quit,
    Skip,
}

/// Maps a terminal key event to the character the input buffer expects.
pub fn translate(event: KeyEvent) -> KeyAction {
    if event.kind == KeyEventKind::Release {
        return KeyAction::Skip;
    }
    let ctrl = event.modifiers.contains(KeyModifiers::CONTROL);
    match event.code {
        KeyCode::Char('c') | KeyCode::Char('C') if ctrl => KeyAction::Input(KEY_INTERRUPT),
        KeyCode::Char('d') | KeyCode::Char('D') if ctrl => KeyAction::Quit,
        KeyCode::Char(_) if ctrl => KeyAction::Skip,
        KeyCode::Char(ch) => KeyAction::Input(ch),
        KeyCode::Enter => KeyAction::Input(KEY_ENTER),
        KeyCode::Backspace => KeyAction::Input(KEY_BACKSPACE),
        _ => KeyAction::Skip,
    }
}
