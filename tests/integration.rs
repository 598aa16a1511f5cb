//! Integration tests for piety
//!
//! End-to-end scenarios: a session of jobs driven by an event loop, with
//! keyboard input scripted on a virtual clock. Each scripted readiness
//! event lets the foreground job read exactly one key.

use piety::kernel::{
    CallbackLoop, EventKey, EventLoop, LoopState, PollLoop, Poller, Scheduler, Task, VirtualPoller, run_protected,
};
use piety::shell::{Application, Job, JobState, Key, QueueReader, Session};
use piety::{Error, LoopConfig, Result};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

const CONSOLE: EventKey = EventKey::Source(0);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Queue `keys` and make the console ready once per key, 10ms apart
fn type_keys(poller: &VirtualPoller, input: &QueueReader, start_ms: u64, keys: Vec<Key>) -> u64 {
    let mut at = start_ms;
    for key in keys {
        input.push(key);
        poller.schedule(ms(at), CONSOLE);
        at += 10;
    }
    at
}

fn line(text: &str) -> Vec<Key> {
    text.chars().map(Key::Char).chain([Key::Enter]).collect()
}

/// Line editor: collects lines, "q" quits, "boom" fails
struct Editor {
    lines: Rc<RefCell<Vec<String>>>,
    done: bool,
}

impl Application for Editor {
    fn process(&mut self, command: &str, _session: &Session) -> Result<()> {
        match command {
            "q" => self.done = true,
            "boom" => return Err(Error::application("ed", "cannot write buffer")),
            text => self.lines.borrow_mut().push(text.to_string()),
        }
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.done
    }

    fn startup(&mut self) -> Result<()> {
        self.done = false;
        Ok(())
    }

    fn stop_command(&self) -> Option<&str> {
        Some("q")
    }
}

/// Shell: "ed" starts the editor, "fg <job>" resumes, "exit" quits
struct Shell {
    editor: Job,
    log: Rc<RefCell<Vec<String>>>,
    restarts: Rc<Cell<u32>>,
    done: bool,
}

impl Application for Shell {
    fn process(&mut self, command: &str, session: &Session) -> Result<()> {
        self.log.borrow_mut().push(command.to_string());
        let mut words = command.split_whitespace();
        match words.next() {
            Some("ed") => session.start(&self.editor),
            Some("fg") => session.resume_job(words.next().unwrap_or_default()),
            Some("exit") => {
                self.done = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn stopped(&self) -> bool {
        self.done
    }

    fn restart(&mut self) -> Result<()> {
        self.restarts.set(self.restarts.get() + 1);
        Ok(())
    }
}

struct Rig {
    sched: Scheduler,
    poller: VirtualPoller,
    input: QueueReader,
    session: Session,
    shell: Job,
    editor: Job,
    lines: Rc<RefCell<Vec<String>>>,
    log: Rc<RefCell<Vec<String>>>,
    restarts: Rc<Cell<u32>>,
    ticks: Rc<Cell<u32>>,
}

impl Rig {
    /// Shell job on a console session, a clock task, and a task that
    /// quits once the session is empty
    fn new() -> Self {
        let sched = Scheduler::new();
        let poller = VirtualPoller::new();
        let input = QueueReader::new();
        let lines = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::new(RefCell::new(Vec::new()));
        let restarts = Rc::new(Cell::new(0));
        let ticks = Rc::new(Cell::new(0));

        let t = ticks.clone();
        Task::builder(EventKey::Timer)
            .name("clock")
            .handler(move || {
                t.set(t.get() + 1);
                Ok(())
            })
            .spawn(&sched)
            .unwrap();

        let session = Session::new(&sched, "console", CONSOLE).unwrap();
        let editor = Job::new(
            "ed",
            Editor {
                lines: lines.clone(),
                done: false,
            },
            input.clone(),
        );
        let shell = Job::new(
            "shell",
            Shell {
                editor: editor.clone(),
                log: log.clone(),
                restarts: restarts.clone(),
                done: false,
            },
            input.clone(),
        );

        let (watched, s) = (session.clone(), sched.clone());
        Task::builder(CONSOLE)
            .name("reaper")
            .handler(move || {
                if watched.is_empty() {
                    s.quit();
                }
                Ok(())
            })
            .spawn(&sched)
            .unwrap();

        session.start(&shell).unwrap();

        Self {
            sched,
            poller,
            input,
            session,
            shell,
            editor,
            lines,
            log,
            restarts,
            ticks,
        }
    }

    fn backend(&self, which: usize) -> Box<dyn EventLoop> {
        match which {
            0 => Box::new(PollLoop::new(self.sched.clone(), self.poller.clone(), ms(100))),
            _ => Box::new(CallbackLoop::new(self.sched.clone(), self.poller.clone(), ms(100))),
        }
    }

    fn type_line(&self, start_ms: u64, text: &str) -> u64 {
        type_keys(&self.poller, &self.input, start_ms, line(text))
    }
}

// ============================================================================
// Shell and editor
// ============================================================================

#[test]
fn test_editor_session_until_exit() {
    for which in 0..2 {
        let rig = Rig::new();
        let at = rig.type_line(5, "ed");
        let at = rig.type_line(at, "hello");
        let at = rig.type_line(at, "world");
        let at = rig.type_line(at, "q");
        rig.type_line(at, "exit");

        let mut lp = rig.backend(which);
        lp.run(0).unwrap();

        assert_eq!(lp.state(), LoopState::Stopped);
        assert!(rig.session.is_empty());
        assert_eq!(rig.lines.borrow().as_slice(), &["hello", "world"]);
        assert_eq!(rig.log.borrow().as_slice(), &["ed", "exit"]);
        assert_eq!(rig.shell.state(), JobState::Loaded);
        assert_eq!(rig.editor.state(), JobState::Loaded);

        // 22 keys, the last at 215ms: two clock ticks in between
        assert_eq!(rig.ticks.get(), 2);
        assert_eq!(rig.poller.now(), ms(215));
    }
}

#[test]
fn test_editor_stop_restarts_shell_once() {
    let rig = Rig::new();
    let at = rig.type_line(5, "ed");
    rig.type_line(at, "q");

    let mut lp = rig.backend(0);
    lp.run(1).unwrap();

    // Once when first started, once when the editor returned; the "ed"
    // command itself replaced the shell, so it was not restarted then
    assert_eq!(rig.restarts.get(), 2);
    assert_eq!(rig.shell.state(), JobState::Foreground);
    assert_eq!(rig.session.len(), 1);
}

#[test]
fn test_ctrl_d_stops_editor() {
    let rig = Rig::new();
    let mut keys = line("ed");
    keys.push(Key::Ctrl('d'));
    type_keys(&rig.poller, &rig.input, 5, keys);

    let mut lp = rig.backend(1);
    lp.run(1).unwrap();

    assert_eq!(rig.editor.state(), JobState::Loaded);
    assert_eq!(rig.shell.state(), JobState::Foreground);
}

// ============================================================================
// Job control
// ============================================================================

#[test]
fn test_suspend_and_fg() {
    for which in 0..2 {
        let rig = Rig::new();
        let mut keys = line("ed");
        keys.extend("dra".chars().map(Key::Char));
        keys.push(Key::Ctrl('z'));
        let at = type_keys(&rig.poller, &rig.input, 5, keys);

        let mut lp = rig.backend(which);
        lp.run(1).unwrap();

        assert_eq!(rig.editor.state(), JobState::Suspended);
        assert_eq!(rig.shell.state(), JobState::Foreground);
        let jobs: Vec<(String, JobState)> = rig.session.jobs().into_iter().map(|j| (j.name, j.state)).collect();
        assert_eq!(
            jobs,
            vec![("shell".to_string(), JobState::Foreground), ("ed".to_string(), JobState::Suspended)]
        );

        let at = rig.type_line(at.max(105), "fg ed");
        let at = rig.type_line(at, "ft");
        rig.type_line(at, "q");
        lp.run(2).unwrap();

        assert_eq!(rig.lines.borrow().as_slice(), &["ft"]);
        assert_eq!(rig.editor.state(), JobState::Loaded);
        assert_eq!(rig.shell.state(), JobState::Foreground);
        assert!(rig.session.jobs().iter().all(|j| j.name == "shell"));
    }
}

#[test]
fn test_fg_unknown_job_is_an_error() {
    let rig = Rig::new();
    rig.type_line(5, "fg nothing");

    let mut lp = rig.backend(0);
    let err = lp.run(0).unwrap_err();
    assert!(matches!(err, Error::NoSuchJob(name) if name == "nothing"));
}

// ============================================================================
// Failure boundary
// ============================================================================

#[test]
fn test_application_error_restores_and_loop_resumes() {
    let rig = Rig::new();
    let at = rig.type_line(5, "ed");
    rig.type_line(at, "boom");

    let restored = Rc::new(Cell::new(0));
    let r = restored.clone();
    let mut lp = rig.backend(1);
    let err = run_protected(lp.as_mut(), 0, move || r.set(r.get() + 1)).unwrap_err();

    assert_eq!(err.to_string(), "ed: cannot write buffer");
    assert_eq!(restored.get(), 1);
    assert_eq!(lp.state(), LoopState::Stopped);
    assert_eq!(rig.editor.state(), JobState::Foreground);

    // Same schedule, same session: carry on where it stopped
    let now = rig.poller.now().as_millis() as u64;
    let at = rig.type_line(now + 5, "q");
    rig.type_line(at, "exit");
    run_protected(lp.as_mut(), 0, || panic!("restore after a clean run")).unwrap();
    assert!(rig.session.is_empty());
}

// ============================================================================
// Configuration and diagnostics
// ============================================================================

#[test]
fn test_configured_loop_drives_session() {
    let rig = Rig::new();
    let config = LoopConfig::from_json(r#"{"period_ms": 50, "backend": "callback", "max_ticks": 4}"#).unwrap();
    rig.type_line(20, "ed");

    let mut lp = config.build(&rig.sched, rig.poller.clone());
    lp.run(config.max_ticks).unwrap();

    assert_eq!(rig.ticks.get(), 4);
    assert_eq!(rig.poller.now(), ms(200));
    assert_eq!(rig.editor.state(), JobState::Foreground);
}

#[test]
fn test_diagnostics_serialize() {
    let rig = Rig::new();
    rig.sched.dispatch(EventKey::Timer).unwrap();

    let tasks = serde_json::to_value(rig.sched.tasks()).unwrap();
    let names: Vec<&str> = tasks
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["clock", "console", "reaper"]);
    assert_eq!(tasks[0]["count"], 1);
    assert_eq!(tasks[1]["enabled"], true);

    let jobs = serde_json::to_string(&rig.session.jobs()).unwrap();
    assert_eq!(jobs, r#"[{"name":"shell","state":"foreground"}]"#);
}
