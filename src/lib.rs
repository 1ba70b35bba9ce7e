//! Terrarium: in-process isolated execution environments for AI agents.
//!
//! Each sandbox binds a virtual filesystem ([`memvfs`]), a POSIX-flavored
//! shell, bounded resource quotas, and an observer fanout under one
//! identity; the [`SessionManager`] multiplexes many of them inside a
//! single host process. Agents interact purely through strings in and
//! structured results out; there is no path from a sandbox to the host
//! filesystem or network except through explicitly registered extension
//! commands.

pub mod cli;
pub mod logging;
pub mod shell;

mod events;
mod fs_guard;
mod options;
mod sandbox;
mod session;
mod web;

pub use events::{
    clip_output, FileChangeKind, LifecycleKind, Observer, ObserverFanout, SandboxEvent,
    Subscription, EVENT_OUTPUT_LIMIT,
};
pub use fs_guard::{FsError, GuardedFs, QuotaError};
pub use options::{
    SandboxOptions, DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_NODE_COUNT,
    DEFAULT_MAX_TOTAL_SIZE,
};
pub use sandbox::{Sandbox, SandboxError, SandboxStats, Snapshot};
pub use session::{Reaper, SessionError, SessionManager, DEFAULT_INACTIVITY_TIMEOUT};
pub use shell::{
    CommandOutput, ExtensionCommand, Shell, ShellContext, ShellResult, EXIT_FAILURE,
    EXIT_NOT_FOUND, EXIT_SUCCESS,
};
pub use web::{interface as web_api, ApiServer};
