//! Jobs - interactive applications under job control
//!
//! A `Job` wraps an `Application` by composition. It reads one key per
//! readiness event, assembles commands in a `CommandBuffer`, and hands each
//! complete command to the application. After every command it asks the
//! application whether it has stopped and, if so, cleans up and pops
//! itself off its session.
//!
//! ```text
//! loaded -> foreground <-> background
//!               |  ^
//!          ^Z   v  | fg
//!             suspended
//! foreground -> (stopped, popped) -> loaded
//! ```

use super::session::Session;
use super::terminal::{Key, Reader};
use crate::error::Result;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Maximum command history entries; oldest are discarded first
const MAX_HISTORY: usize = 100;

/// Job-control state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Not on any session stack
    #[default]
    Loaded,
    /// Top of its session's stack, receives input
    Foreground,
    /// On a stack under another job
    Background,
    /// Taken off the stack by `^Z`, waiting for `fg`
    Suspended,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Loaded => "loaded",
            JobState::Foreground => "foreground",
            JobState::Background => "background",
            JobState::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// How keys become commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Edit a line; Enter completes the command
    #[default]
    Line,
    /// Every key is a command on its own
    Key,
}

/// Result of feeding one key to a [`CommandBuffer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Keep collecting
    Pending,
    /// A complete command
    Command(String),
    /// `^Z`: move this job to the background
    Suspend,
    /// `^L`: show the line being edited again
    Redraw,
}

/// Line editor with bounded history
///
/// Emacs-style keys: `^A`/`^E` line start/end, `^B`/`^F` (or the arrow
/// keys) move one character, `^K` kills to end of line, `^D` deletes at the
/// cursor, `^J` starts a continuation line.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    mode: InputMode,
    line: String,
    /// Cursor, a byte offset on a char boundary of `line`
    point: usize,
    /// Submitted commands, newest first
    history: VecDeque<String>,
    /// Position in history while walking it with ^P/^N
    history_pos: Option<usize>,
    /// Line being edited before the history walk started
    saved: String,
    stop_command: Option<String>,
}

impl CommandBuffer {
    pub fn new(mode: InputMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Command submitted by `^D` on an empty line
    pub fn with_stop_command(mut self, command: Option<String>) -> Self {
        self.stop_command = command;
        self
    }

    pub fn push(&mut self, key: Key) -> Input {
        if key == Key::Ctrl('z') {
            return Input::Suspend;
        }
        match self.mode {
            InputMode::Key => Input::Command(key.to_text()),
            InputMode::Line => self.edit(key),
        }
    }

    fn edit(&mut self, key: Key) -> Input {
        match key {
            Key::Char(c) if c == '\t' || !c.is_control() => self.insert(c),
            Key::Backspace => self.delete_backward(),
            Key::Enter => return Input::Command(self.submit()),
            Key::Ctrl('a') => self.point = 0,
            Key::Ctrl('e') => self.point = self.line.len(),
            Key::Ctrl('b') => self.backward(),
            Key::Ctrl('f') => self.forward(),
            Key::Ctrl('k') => self.line.truncate(self.point),
            Key::Ctrl('j') => self.insert('\n'),
            Key::Ctrl('l') => return Input::Redraw,
            Key::Ctrl('u') => self.set_line(String::new()),
            Key::Ctrl('c') => {
                self.set_line(String::new());
                self.history_pos = None;
            }
            Key::Ctrl('d') if self.line.is_empty() => {
                if let Some(stop) = self.stop_command.clone() {
                    return Input::Command(stop);
                }
            }
            Key::Ctrl('d') => self.delete_forward(),
            Key::Ctrl('p') => self.history_prev(),
            Key::Ctrl('n') => self.history_next(),
            Key::Escape(seq) => match seq.as_str() {
                Key::UP => self.history_prev(),
                Key::DOWN => self.history_next(),
                Key::LEFT => self.backward(),
                Key::RIGHT => self.forward(),
                _ => {}
            },
            _ => {}
        }
        Input::Pending
    }

    fn insert(&mut self, c: char) {
        self.line.insert(self.point, c);
        self.point += c.len_utf8();
        self.history_pos = None;
    }

    fn backward(&mut self) {
        if let Some(c) = self.line[..self.point].chars().next_back() {
            self.point -= c.len_utf8();
        }
    }

    fn forward(&mut self) {
        if let Some(c) = self.line[self.point..].chars().next() {
            self.point += c.len_utf8();
        }
    }

    fn delete_backward(&mut self) {
        let end = self.point;
        self.backward();
        self.line.replace_range(self.point..end, "");
    }

    fn delete_forward(&mut self) {
        if self.point < self.line.len() {
            self.line.remove(self.point);
        }
    }

    /// Replace the line, cursor at its end
    fn set_line(&mut self, line: String) {
        self.point = line.len();
        self.line = line;
    }

    fn submit(&mut self) -> String {
        let line = std::mem::take(&mut self.line);
        self.point = 0;
        self.history_pos = None;
        self.saved.clear();

        if !line.trim().is_empty() {
            if self.history.front() == Some(&line) {
                self.history.pop_front();
            }
            self.history.push_front(line.clone());
            self.history.truncate(MAX_HISTORY);
        }
        line
    }

    fn history_prev(&mut self) {
        if self.history.is_empty() {
            return;
        }
        match self.history_pos {
            None => {
                self.saved = std::mem::take(&mut self.line);
                self.history_pos = Some(0);
                self.set_line(self.history[0].clone());
            }
            Some(pos) if pos + 1 < self.history.len() => {
                self.history_pos = Some(pos + 1);
                self.set_line(self.history[pos + 1].clone());
            }
            _ => {}
        }
    }

    fn history_next(&mut self) {
        match self.history_pos {
            Some(0) => {
                self.history_pos = None;
                let saved = std::mem::take(&mut self.saved);
                self.set_line(saved);
            }
            Some(pos) => {
                self.history_pos = Some(pos - 1);
                self.set_line(self.history[pos - 1].clone());
            }
            None => {}
        }
    }

    /// Discard the line being edited; history is kept
    pub fn reset(&mut self) {
        self.line.clear();
        self.point = 0;
        self.saved.clear();
        self.history_pos = None;
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }
}

/// An interactive application that can run as a job
///
/// `process` and the lifecycle hooks must return promptly: they run inside
/// a scheduler handler.
pub trait Application {
    /// Execute one complete command. `session` is the session this job is
    /// running in, for starting or resuming other jobs.
    fn process(&mut self, command: &str, session: &Session) -> Result<()>;

    /// Queried after every command; true pops the job
    fn stopped(&self) -> bool;

    /// Called when the job starts or regains the foreground
    fn startup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called before collecting each command (print a prompt)
    fn restart(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after the application stops, before the job is popped
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on `^L` with the line being edited
    fn redraw(&mut self, _line: &str) -> Result<()> {
        Ok(())
    }

    /// Command that `^D` on an empty line submits
    fn stop_command(&self) -> Option<&str> {
        None
    }

    fn input_mode(&self) -> InputMode {
        InputMode::Line
    }
}

struct JobInner {
    name: String,
    app: RefCell<Box<dyn Application>>,
    reader: RefCell<Box<dyn Reader>>,
    buffer: RefCell<CommandBuffer>,
    state: Cell<JobState>,
    restarts: Cell<u64>,
}

/// Handle to a job; clones refer to the same job
#[derive(Clone)]
pub struct Job {
    inner: Rc<JobInner>,
}

impl Job {
    pub fn new<A, R>(name: impl Into<String>, app: A, reader: R) -> Self
    where
        A: Application + 'static,
        R: Reader + 'static,
    {
        let buffer = CommandBuffer::new(app.input_mode()).with_stop_command(app.stop_command().map(str::to_string));
        Self {
            inner: Rc::new(JobInner {
                name: name.into(),
                app: RefCell::new(Box::new(app)),
                reader: RefCell::new(Box::new(reader)),
                buffer: RefCell::new(buffer),
                state: Cell::new(JobState::Loaded),
                restarts: Cell::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> JobState {
        self.inner.state.get()
    }

    pub(crate) fn set_state(&self, state: JobState) {
        let old = self.inner.state.replace(state);
        if old != state {
            tracing::debug!(job = self.name(), from = %old, to = %state, "job state");
        }
    }

    /// Number of times the job has been restarted
    pub fn restarts(&self) -> u64 {
        self.inner.restarts.get()
    }

    /// Partially collected command
    pub fn pending_input(&self) -> String {
        self.inner.buffer.borrow().line().to_string()
    }

    pub fn history(&self) -> Vec<String> {
        self.inner.buffer.borrow().history().map(str::to_string).collect()
    }

    pub fn same(&self, other: &Job) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start (or resume) the application, then prepare for input
    pub fn run(&self) -> Result<()> {
        self.inner.app.borrow_mut().startup()?;
        self.restart()
    }

    /// Clear the command buffer and let the application prompt again
    pub fn restart(&self) -> Result<()> {
        self.inner.buffer.borrow_mut().reset();
        self.inner.restarts.set(self.inner.restarts.get() + 1);
        self.inner.app.borrow_mut().restart()
    }

    /// Consume one unit of ready input on behalf of `session`
    pub fn handle(&self, session: &Session) -> Result<()> {
        let key = self.inner.reader.borrow_mut().read()?;
        let Some(key) = key else {
            return Ok(());
        };

        let input = self.inner.buffer.borrow_mut().push(key);
        match input {
            Input::Pending => Ok(()),
            Input::Command(command) => self.execute(&command, session),
            Input::Suspend if session.len() > 1 => session.suspend(),
            Input::Suspend => {
                tracing::debug!(job = self.name(), "nothing to suspend to");
                Ok(())
            }
            Input::Redraw => {
                let line = self.pending_input();
                self.inner.app.borrow_mut().redraw(&line)
            }
        }
    }

    fn execute(&self, command: &str, session: &Session) -> Result<()> {
        let stopped = {
            let mut app = self.inner.app.borrow_mut();
            app.process(command, session)?;
            let stopped = app.stopped();
            if stopped {
                app.cleanup()?;
            }
            stopped
        };

        if self.state() != JobState::Foreground {
            // The command started or resumed another job on top of this one
            return Ok(());
        }
        if stopped {
            return session.stop();
        }
        self.restart()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
