//! The sandbox shell: tokenizer, command dispatch, and I/O redirection.

mod builtins;
mod context;
pub mod ext;
pub mod tokenizer;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use self::builtins::{Builtin, BUILTINS};
pub use self::context::ShellContext;
pub use self::ext::ExtensionCommand;
pub use self::tokenizer::{ParseError, ParsedLine, Redirect, RedirectKind};

use crate::fs_guard::GuardedFs;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_NOT_FOUND: i32 = 127;

/// Raw output of a single command handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: EXIT_FAILURE,
            ..Self::default()
        }
    }
}

/// The result of one shell execution, as recorded in sandbox history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellResult {
    /// The full original command line.
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl ShellResult {
    pub fn success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}

/// Tokenizes, dispatches, and applies redirection for one sandbox.
///
/// A shell owns its [`ShellContext`] (working directory and environment);
/// callers serialize access to it, so command effects within one sandbox are
/// observed in order.
pub struct Shell {
    context: ShellContext,
    extensions: Vec<Arc<dyn ExtensionCommand>>,
    /// Maps primary names and aliases to indices into `extensions`.
    extension_lookup: HashMap<String, usize>,
}

impl Shell {
    pub fn new(
        fs: Arc<GuardedFs>,
        environment: BTreeMap<String, String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            context: ShellContext::new(fs, environment, command_timeout),
            extensions: Vec::new(),
            extension_lookup: HashMap::new(),
        }
    }

    pub fn context(&self) -> &ShellContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ShellContext {
        &mut self.context
    }

    pub fn current_directory(&self) -> &str {
        &self.context.current_directory
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.context.environment
    }

    /// Registers an extension command. A name or alias that collides with a
    /// built-in is skipped (built-ins always win), but the remaining names
    /// still resolve.
    pub fn register_extension(&mut self, extension: Arc<dyn ExtensionCommand>) {
        let index = self.extensions.len();

        let mut names = vec![extension.name().to_owned()];
        names.extend(extension.aliases().iter().map(|alias| alias.to_string()));

        for name in names {
            if builtins::find(&name).is_some() {
                log::warn!(
                    "extension name '{}' collides with a built-in and is ignored",
                    name
                );
                continue;
            }
            if let Some(previous) = self.extension_lookup.insert(name.clone(), index) {
                log::warn!(
                    "extension name '{}' was already registered (entry {}), now overridden",
                    name,
                    previous
                );
            }
        }

        self.extensions.push(extension);
    }

    /// Whether `name` resolves to a registered extension (and not to a
    /// built-in, which would shadow it).
    pub fn is_extension_command(&self, name: &str) -> bool {
        builtins::find(name).is_none() && self.extension_lookup.contains_key(name)
    }

    /// Runs a full command line through the pipeline: parse, resolve,
    /// invoke, redirect, wrap.
    pub fn execute(&mut self, line: &str) -> ShellResult {
        let started = Instant::now();

        let parsed = match tokenizer::parse(line, &self.context.environment) {
            Ok(parsed) => parsed,
            Err(err) => {
                return ShellResult {
                    command: line.to_owned(),
                    stdout: String::new(),
                    stderr: err.to_string(),
                    exit_code: EXIT_FAILURE,
                    duration: started.elapsed(),
                }
            }
        };

        let mut output = match parsed.argv.split_first() {
            None => CommandOutput::empty(),
            Some((name, args)) => self.dispatch(name, args),
        };

        if let Some(redirect) = parsed.redirect {
            output = self.apply_redirect(output, &redirect);
        }

        ShellResult {
            command: line.to_owned(),
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            duration: started.elapsed(),
        }
    }

    fn dispatch(&mut self, name: &str, args: &[String]) -> CommandOutput {
        if let Some(builtin) = builtins::find(name) {
            let mut output = (builtin.run)(args, &mut self.context);
            // `help` also advertises registered extensions, which only the
            // shell knows about.
            if name == "help" && !self.extensions.is_empty() {
                for extension in &self.extensions {
                    output.stdout.push_str(&format!(
                        "\n{:<8} {}",
                        extension.name(),
                        extension.description()
                    ));
                }
            }
            return output;
        }

        if let Some(&index) = self.extension_lookup.get(name) {
            let extension = Arc::clone(&self.extensions[index]);
            return extension.execute(args, &mut self.context);
        }

        CommandOutput {
            stdout: String::new(),
            stderr: format!("{}: command not found", name),
            exit_code: EXIT_NOT_FOUND,
        }
    }

    /// Routes captured stdout into the redirect target through the
    /// quota-guarded filesystem. On failure the command is reported as
    /// failed with an empty stdout.
    fn apply_redirect(&mut self, output: CommandOutput, redirect: &Redirect) -> CommandOutput {
        let target = self.context.resolve_path(&redirect.target);
        let write = match redirect.kind {
            RedirectKind::Overwrite => self
                .context
                .fs
                .write_file(&target, output.stdout.as_bytes()),
            RedirectKind::Append => self
                .context
                .fs
                .append_to_file(&target, output.stdout.as_bytes()),
        };

        match write {
            Ok(()) => CommandOutput {
                stdout: String::new(),
                stderr: output.stderr,
                exit_code: output.exit_code,
            },
            Err(err) => CommandOutput {
                stdout: String::new(),
                stderr: err.to_string(),
                exit_code: EXIT_FAILURE,
            },
        }
    }
}
