//! piety CLI - a shell and a notes job sharing stdin, plus a clock task
//!
//! Run with: cargo run --bin piety-cli -- --period-ms 500
//! Logs go to stderr; set RUST_LOG=piety=debug to watch the scheduler.

use clap::Parser;
use piety::kernel::{EventKey, FdPoller, Scheduler, Task, run_protected};
use piety::shell::{Application, Job, Session, TtyReader};
use piety::{Backend, Error, LoopConfig, Result};
use std::cell::Cell;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "piety-cli")]
#[command(about = "Cooperative job control on one terminal", long_about = None)]
#[command(version)]
struct Args {
    /// JSON loop configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Clock period in milliseconds
    #[arg(long)]
    period_ms: Option<u64>,

    /// Event loop back end: poll or callback
    #[arg(long)]
    backend: Option<Backend>,

    /// Stop after this many clock ticks (0 runs until exit)
    #[arg(long)]
    ticks: Option<u64>,
}

fn prompt(text: &str) -> Result<()> {
    let mut out = io::stdout();
    write!(out, "{}", text)?;
    out.flush()?;
    Ok(())
}

struct Shell {
    scheduler: Scheduler,
    notes: Job,
    done: bool,
}

impl Application for Shell {
    fn process(&mut self, command: &str, session: &Session) -> Result<()> {
        let mut words = command.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(());
        };

        match name {
            "help" => {
                println!("commands:");
                println!("  help       show this help");
                println!("  jobs       list jobs in this session");
                println!("  tasks      list scheduler tasks");
                println!("  notes      start the notes job");
                println!("  fg <job>   resume a suspended job");
                println!("  echo ...   print arguments");
                println!("  exit       leave the shell (also ^D)");
                println!("^Z suspends the foreground job");
            }
            "jobs" => {
                for info in session.jobs() {
                    println!("{}", info);
                }
            }
            "tasks" => {
                println!(" id       name enabled   count key");
                for info in self.scheduler.tasks() {
                    println!("{}", info);
                }
            }
            "notes" => match session.start(&self.notes) {
                Err(Error::JobBusy(job)) => println!("{}: already running, try fg {}", job, job),
                other => other?,
            },
            "fg" => match words.next() {
                Some(job) => match session.resume_job(job) {
                    Err(Error::NoSuchJob(job)) => println!("fg: {}: no such job", job),
                    other => other?,
                },
                None => println!("usage: fg <job>"),
            },
            "echo" => println!("{}", words.collect::<Vec<_>>().join(" ")),
            "exit" => self.done = true,
            other => println!("{}: command not found", other),
        }
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.done
    }

    fn startup(&mut self) -> Result<()> {
        println!("piety shell, type help");
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        prompt("piety> ")
    }

    fn redraw(&mut self, line: &str) -> Result<()> {
        prompt(&format!("\npiety> {}", line))
    }

    fn stop_command(&self) -> Option<&str> {
        Some("exit")
    }
}

#[derive(Default)]
struct Notes {
    lines: Vec<String>,
    done: bool,
}

impl Application for Notes {
    fn process(&mut self, command: &str, _session: &Session) -> Result<()> {
        if command == "." {
            self.done = true;
        } else {
            self.lines.push(command.to_string());
        }
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.done
    }

    fn startup(&mut self) -> Result<()> {
        self.done = false;
        println!("notes: {} lines so far, end with '.'", self.lines.len());
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        prompt("notes> ")
    }

    fn redraw(&mut self, line: &str) -> Result<()> {
        prompt(&format!("\nnotes> {}", line))
    }

    fn cleanup(&mut self) -> Result<()> {
        println!("notes: {} lines", self.lines.len());
        Ok(())
    }

    fn stop_command(&self) -> Option<&str> {
        Some(".")
    }
}

fn load_config(args: &Args) -> Result<LoopConfig> {
    let mut config = match &args.config {
        Some(path) => LoopConfig::load(path)?,
        None => LoopConfig::default(),
    };
    if let Some(ms) = args.period_ms.filter(|ms| *ms > 0) {
        config.period = Duration::from_millis(ms);
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(ticks) = args.ticks {
        config.max_ticks = ticks;
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let scheduler = Scheduler::new();

    let ticks = Rc::new(Cell::new(0u64));
    let t = ticks.clone();
    Task::builder(EventKey::Timer)
        .name("clock")
        .handler(move || {
            t.set(t.get() + 1);
            tracing::debug!(tick = t.get(), "clock");
            Ok(())
        })
        .spawn(&scheduler)?;

    let session = Session::new(&scheduler, "console", EventKey::STDIN)?;
    let notes = Job::new("notes", Notes::default(), TtyReader::stdin());
    let shell = Shell {
        scheduler: scheduler.clone(),
        notes,
        done: false,
    };

    // Runs after the session on every stdin event
    let watched = session.clone();
    let s = scheduler.clone();
    Task::builder(EventKey::STDIN)
        .name("reaper")
        .handler(move || {
            if watched.is_empty() {
                s.quit();
            }
            Ok(())
        })
        .spawn(&scheduler)?;

    session.start(&Job::new("shell", shell, TtyReader::stdin()))?;

    let mut event_loop = config.build(&scheduler, FdPoller::new());
    run_protected(event_loop.as_mut(), config.max_ticks, || {
        println!();
        let _ = io::stdout().flush();
    })?;

    tracing::info!(ticks = ticks.get(), "session closed");
    session.close()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("piety-cli: {}", err);
            ExitCode::FAILURE
        }
    }
}
