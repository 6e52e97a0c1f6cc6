//! Line editing for keystrokes typed into the active session.

use crate::sink::RenderSink;

pub const KEY_ENTER: char = '\r';
pub const KEY_BACKSPACE: char = '\u{7f}';
pub const KEY_BACKSPACE_ALT: char = '\u{08}';
pub const KEY_INTERRUPT: char = '\u{03}';

const ERASE_CELL: &[u8] = b"\x08 \x08";
const INTERRUPT_GLYPH: &[u8] = b"^C";
const LINE_BREAK: &[u8] = b"\r\n";

/// What a keystroke asks of the render sink and the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEffect {
    Echo(char),
    Erase,
    Interrupt,
    /// A committed line, newline included, ready for SendInput.
    Commit(String),
    Ignored,
}

impl KeyEffect {
    /// Bytes to render locally for this effect. A commit only moves to the
    /// next line; the remote shell's echo of the line is suppressed.
    pub fn local_echo(&self) -> Option<Vec<u8>> {
        match self {
            KeyEffect::Echo(ch) => {
                let mut buf = [0u8; 4];
                Some(ch.encode_utf8(&mut buf).as_bytes().to_vec())
            }
            KeyEffect::Erase => Some(ERASE_CELL.to_vec()),
            KeyEffect::Interrupt => Some(INTERRUPT_GLYPH.to_vec()),
            KeyEffect::Commit(_) => Some(LINE_BREAK.to_vec()),
            KeyEffect::Ignored => None,
        }
    }

    pub fn render(&self, sink: &mut dyn RenderSink) {
        if let Some(bytes) = self.local_echo() {
            sink.write(&bytes);
        }
    }

    pub fn committed(&self) -> Option<&str> {
        match self {
            KeyEffect::Commit(line) => Some(line),
            _ => None,
        }
    }
}

/// Printable ASCII or anything at or above U+00A0.
pub fn is_printable(ch: char) -> bool {
    matches!(ch, ' '..='~') || ch >= '\u{a0}'
}

#[derive(Debug, Default, Clone)]
pub struct InputBuffer {
    line: String,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    /// Routes one keystroke to the matching edit operation.
    pub fn feed(&mut self, ch: char) -> KeyEffect {
        match ch {
            KEY_ENTER => self.on_commit(),
            KEY_BACKSPACE | KEY_BACKSPACE_ALT => self.on_backspace(),
            KEY_INTERRUPT => self.on_interrupt(),
            ch => self.on_char(ch),
        }
    }

    /// Feeds a pasted run of characters; effects come back in order.
    pub fn feed_str(&mut self, input: &str) -> Vec<KeyEffect> {
        input
            .chars()
            .map(|ch| self.feed(ch))
            .filter(|effect| *effect != KeyEffect::Ignored)
            .collect()
    }

    pub fn on_char(&mut self, ch: char) -> KeyEffect {
        if !is_printable(ch) {
            return KeyEffect::Ignored;
        }
        self.line.push(ch);
        KeyEffect::Echo(ch)
    }

    pub fn on_backspace(&mut self) -> KeyEffect {
        match self.line.pop() {
            Some(_) => KeyEffect::Erase,
            None => KeyEffect::Ignored,
        }
    }

    /// Renders `^C` only; the buffer and the server are left untouched.
    pub fn on_interrupt(&mut self) -> KeyEffect {
        KeyEffect::Interrupt
    }

    pub fn on_commit(&mut self) -> KeyEffect {
        let mut line = std::mem::take(&mut self.line);
        line.push('\n');
        KeyEffect::Commit(line)
    }

    pub fn reset(&mut self) {
        self.line.clear();
    }
}
