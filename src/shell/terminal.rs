//! Keys and readers
//!
//! A `Reader` turns whatever input is already known to be ready into at
//! most one complete `Key`. It never blocks and never hands out half a key:
//! until a multi-byte character or escape sequence is complete it returns
//! `None`.

use crate::error::{Error, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

/// Longest escape sequence kept before giving up on it
const MAX_ESCAPE: usize = 16;

/// One complete unit of keyboard input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    /// Control character, named by its lowercase letter (`^C` is `Ctrl('c')`)
    Ctrl(char),
    /// A complete escape sequence, including the leading ESC
    Escape(String),
}

impl Key {
    pub const UP: &'static str = "\x1b[A";
    pub const DOWN: &'static str = "\x1b[B";
    pub const RIGHT: &'static str = "\x1b[C";
    pub const LEFT: &'static str = "\x1b[D";

    /// The bytes a terminal would have sent for this key
    pub fn to_text(&self) -> String {
        match self {
            Key::Char(c) => c.to_string(),
            Key::Enter => "\n".to_string(),
            Key::Backspace => "\x7f".to_string(),
            Key::Ctrl(c) => char::from((*c as u8) & 0x1f).to_string(),
            Key::Escape(seq) => seq.clone(),
        }
    }
}

/// Source of keys for a job
pub trait Reader {
    /// Consume ready input; `None` until a key is complete
    fn read(&mut self) -> Result<Option<Key>>;
}

// ============================================================================
// Scripted input
// ============================================================================

/// Shared queue of keys
///
/// Clones share the queue, so a harness can keep feeding keys after
/// handing a clone to a job.
#[derive(Debug, Clone, Default)]
pub struct QueueReader {
    queue: Rc<RefCell<VecDeque<Key>>>,
}

impl QueueReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: Key) {
        self.queue.borrow_mut().push_back(key);
    }

    /// Queue each character of `text`; newlines become `Enter`
    pub fn push_str(&self, text: &str) {
        for c in text.chars() {
            self.push(match c {
                '\n' => Key::Enter,
                c => Key::Char(c),
            });
        }
    }

    /// Queue `text` followed by `Enter`
    pub fn push_line(&self, text: &str) {
        self.push_str(text);
        self.push(Key::Enter);
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl Reader for QueueReader {
    fn read(&mut self) -> Result<Option<Key>> {
        Ok(self.queue.borrow_mut().pop_front())
    }
}

// ============================================================================
// Terminal input
// ============================================================================

/// Reads a terminal file descriptor one byte per call
///
/// Each call consumes exactly one byte, so it never blocks when the loop
/// has reported the descriptor readable. End of file reads as `^D`.
#[derive(Debug)]
pub struct TtyReader {
    fd: RawFd,
    pending: Vec<u8>,
}

impl TtyReader {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            pending: Vec::new(),
        }
    }

    pub fn stdin() -> Self {
        Self::new(libc::STDIN_FILENO)
    }

    /// Feed one input byte, returning a key once one is complete
    pub fn feed(&mut self, byte: u8) -> Option<Key> {
        match self.pending.first() {
            None => self.start(byte),
            Some(0x1b) => self.escape(byte),
            Some(_) => self.utf8(byte),
        }
    }

    fn start(&mut self, byte: u8) -> Option<Key> {
        match byte {
            0x1b => {
                self.pending.push(byte);
                None
            }
            b'\r' | b'\n' => Some(Key::Enter),
            0x7f | 0x08 => Some(Key::Backspace),
            b'\t' => Some(Key::Char('\t')),
            0x01..=0x1a => Some(Key::Ctrl(char::from(b'a' + byte - 1))),
            0x00..=0x7f => Some(Key::Char(char::from(byte))),
            0xc0..=0xf7 => {
                self.pending.push(byte);
                None
            }
            // Stray continuation byte
            _ => None,
        }
    }

    fn escape(&mut self, byte: u8) -> Option<Key> {
        self.pending.push(byte);

        if self.pending.len() == 2 {
            if byte == b'[' {
                return None;
            }
            // Not a control sequence introducer: ESC plus one key
            return Some(self.take_escape());
        }

        if (0x40..=0x7e).contains(&byte) {
            return Some(self.take_escape());
        }
        if self.pending.len() >= MAX_ESCAPE {
            self.pending.clear();
        }
        None
    }

    fn utf8(&mut self, byte: u8) -> Option<Key> {
        if byte & 0xc0 != 0x80 {
            // Broken sequence: drop it and start over with this byte
            self.pending.clear();
            return self.start(byte);
        }
        self.pending.push(byte);

        let want = match self.pending[0] {
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            _ => 4,
        };
        if self.pending.len() < want {
            return None;
        }

        let bytes = std::mem::take(&mut self.pending);
        std::str::from_utf8(&bytes).ok().and_then(|s| s.chars().next()).map(Key::Char)
    }

    fn take_escape(&mut self) -> Key {
        let bytes = std::mem::take(&mut self.pending);
        Key::Escape(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Reader for TtyReader {
    fn read(&mut self) -> Result<Option<Key>> {
        let mut byte = 0u8;
        // SAFETY: reads at most one byte into a valid local buffer.
        let n = unsafe { libc::read(self.fd, (&mut byte as *mut u8).cast(), 1) };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                _ => Err(Error::Io(err)),
            };
        }
        if n == 0 {
            return Ok(Some(Key::Ctrl('d')));
        }
        Ok(self.feed(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(reader: &mut TtyReader, bytes: &[u8]) -> Vec<Key> {
        bytes.iter().filter_map(|b| reader.feed(*b)).collect()
    }

    #[test]
    fn test_plain_and_control_bytes() {
        let mut reader = TtyReader::new(0);
        let keys = feed_all(&mut reader, b"ab\t\r\x7f\x03\x1a");
        assert_eq!(
            keys,
            vec![
                Key::Char('a'),
                Key::Char('b'),
                Key::Char('\t'),
                Key::Enter,
                Key::Backspace,
                Key::Ctrl('c'),
                Key::Ctrl('z'),
            ]
        );
    }

    #[test]
    fn test_escape_sequence_assembled_across_calls() {
        let mut reader = TtyReader::new(0);
        assert_eq!(reader.feed(0x1b), None);
        assert_eq!(reader.feed(b'['), None);
        assert_eq!(reader.feed(b'A'), Some(Key::Escape(Key::UP.to_string())));

        // Longer sequences end at the final byte
        let keys = feed_all(&mut reader, b"\x1b[1;5C");
        assert_eq!(keys, vec![Key::Escape("\x1b[1;5C".to_string())]);
    }

    #[test]
    fn test_escape_without_csi() {
        let mut reader = TtyReader::new(0);
        let keys = feed_all(&mut reader, b"\x1bxy");
        assert_eq!(keys, vec![Key::Escape("\x1bx".to_string()), Key::Char('y')]);
    }

    #[test]
    fn test_utf8_assembled() {
        let mut reader = TtyReader::new(0);
        let keys = feed_all(&mut reader, "é€".as_bytes());
        assert_eq!(keys, vec![Key::Char('é'), Key::Char('€')]);
    }

    #[test]
    fn test_broken_utf8_recovers() {
        let mut reader = TtyReader::new(0);
        let keys = feed_all(&mut reader, &[0xe2, b'a']);
        assert_eq!(keys, vec![Key::Char('a')]);
    }

    #[test]
    fn test_tty_reader_reads_pipe() {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds has room for the two descriptors pipe(2) writes.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (rd, wr) = (fds[0], fds[1]);

        // SAFETY: wr is the open write end of the pipe.
        assert_eq!(unsafe { libc::write(wr, b"q\n".as_ptr().cast(), 2) }, 2);
        let mut reader = TtyReader::new(rd);
        assert_eq!(reader.read().unwrap(), Some(Key::Char('q')));
        assert_eq!(reader.read().unwrap(), Some(Key::Enter));

        // SAFETY: wr is open; closing it makes the next read hit end of file.
        unsafe { libc::close(wr) };
        assert_eq!(reader.read().unwrap(), Some(Key::Ctrl('d')));

        // SAFETY: rd is open and owned by this test.
        unsafe { libc::close(rd) };
    }

    #[test]
    fn test_queue_reader_shares_queue() {
        let queue = QueueReader::new();
        let mut reader = queue.clone();
        queue.push_line("hi");

        assert_eq!(queue.len(), 3);
        assert_eq!(reader.read().unwrap(), Some(Key::Char('h')));
        assert_eq!(reader.read().unwrap(), Some(Key::Char('i')));
        assert_eq!(reader.read().unwrap(), Some(Key::Enter));
        assert_eq!(reader.read().unwrap(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_key_text() {
        assert_eq!(Key::Ctrl('c').to_text(), "\x03");
        assert_eq!(Key::Enter.to_text(), "\n");
        assert_eq!(Key::Escape(Key::DOWN.into()).to_text(), "\x1b[B");
    }
}
