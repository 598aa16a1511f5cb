//! Shell - job control on a shared input stream
//!
//! Several interactive applications (a shell, an editor, ...) share one
//! input key. A `Session` stacks them; only the top job gets input.
//! - `terminal`: keys and non-blocking readers
//! - `job`: command assembly and the `Application` contract
//! - `session`: the job stack, suspend and resume

pub mod job;
pub mod session;
pub mod terminal;

pub use job::{Application, CommandBuffer, Input, InputMode, Job, JobState};
pub use session::{JobInfo, Session};
pub use terminal::{Key, QueueReader, Reader, TtyReader};
