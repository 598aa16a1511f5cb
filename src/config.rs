//! Loop configuration
//!
//! ```json
//! { "period_ms": 250, "backend": "callback", "max_ticks": 0 }
//! ```
//!
//! Every field is optional. `max_ticks` of 0 runs until quit.

use crate::error::Result;
use crate::kernel::{CallbackLoop, EventLoop, PollLoop, Poller, Scheduler};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Which event-loop realization to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Block on the poller directly
    #[default]
    Poll,
    /// Reader and timer continuations on a reactor
    Callback,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "poll" => Ok(Backend::Poll),
            "callback" => Ok(Backend::Callback),
            other => Err(format!("unknown backend '{}' (expected poll or callback)", other)),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Poll => f.write_str("poll"),
            Backend::Callback => f.write_str("callback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    /// Timer period
    #[serde(rename = "period_ms", with = "millis", default = "default_period")]
    pub period: Duration,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub max_ticks: u64,
}

fn default_period() -> Duration {
    Duration::from_secs(1)
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            backend: Backend::default(),
            max_ticks: 0,
        }
    }
}

impl LoopConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Create the configured event loop over `scheduler`
    pub fn build<P: Poller + 'static>(&self, scheduler: &Scheduler, poller: P) -> Box<dyn EventLoop> {
        tracing::debug!(backend = %self.backend, period_ms = self.period.as_millis() as u64, "building event loop");
        match self.backend {
            Backend::Poll => Box::new(PollLoop::new(scheduler.clone(), poller, self.period)),
            Backend::Callback => Box::new(CallbackLoop::new(scheduler.clone(), poller, self.period)),
        }
    }
}

/// `Duration` as a positive whole number of milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(period: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(period.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        if ms == 0 {
            return Err(de::Error::custom("period_ms must be positive"));
        }
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::kernel::{EventKey, LoopState, Task, VirtualPoller};

    #[test]
    fn test_defaults() {
        let config = LoopConfig::from_json("{}").unwrap();
        assert_eq!(config, LoopConfig::default());
        assert_eq!(config.period, Duration::from_millis(1000));
        assert_eq!(config.backend, Backend::Poll);
    }

    #[test]
    fn test_full_config() {
        let config = LoopConfig::from_json(r#"{"period_ms": 250, "backend": "callback", "max_ticks": 8}"#).unwrap();
        assert_eq!(config.period, Duration::from_millis(250));
        assert_eq!(config.backend, Backend::Callback);
        assert_eq!(config.max_ticks, 8);
    }

    #[test]
    fn test_invalid_config_rejected() {
        for bad in [r#"{"period_ms": 0}"#, r#"{"backend": "epoll"}"#, r#"{"period": 5}"#, "not json"] {
            assert!(matches!(LoopConfig::from_json(bad), Err(Error::Config(_))), "{}", bad);
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(LoopConfig::load("/nonexistent/piety.json"), Err(Error::Io(_))));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("callback".parse::<Backend>().unwrap(), Backend::Callback);
        assert!("select".parse::<Backend>().is_err());
        assert_eq!(Backend::Poll.to_string(), "poll");
    }

    #[test]
    fn test_build_either_backend() {
        for backend in [Backend::Poll, Backend::Callback] {
            let sched = Scheduler::new();
            Task::builder(EventKey::Timer).handler(|| Ok(())).spawn(&sched).unwrap();
            let config = LoopConfig {
                period: Duration::from_millis(20),
                backend,
                max_ticks: 3,
            };

            let poller = VirtualPoller::new();
            let mut lp = config.build(&sched, poller.clone());
            lp.run(config.max_ticks).unwrap();

            assert_eq!(lp.state(), LoopState::Stopped);
            assert_eq!(sched.count(EventKey::Timer), 3);
            assert_eq!(poller.now(), Duration::from_millis(60));
        }
    }
}
