use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use termcolor::{Color, ColorSpec, StandardStream, WriteColor};

use super::{serve::load_options, GlobalOptions};
use crate::options::SandboxOptions;
use crate::sandbox::Sandbox;
use crate::shell::ext::http::HttpCommand;

/// Run an interactive sandbox playground on stdin/stdout.
#[derive(Debug, Parser)]
pub struct ReplCommand {
    /// JSON5 file with sandbox options for the playground.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Identifier for the playground sandbox.
    #[clap(long, default_value = "playground")]
    pub id: String,
}

impl ReplCommand {
    pub fn run(self, global: GlobalOptions) -> anyhow::Result<()> {
        let mut options = match &self.config {
            Some(path) => load_options(path)?,
            None => SandboxOptions::default(),
        };
        options.shell_extensions.push(Arc::new(HttpCommand));

        let sandbox = Sandbox::new(self.id.clone(), options)?;

        let stdout = StandardStream::stdout(global.color.into());
        let mut stdout = stdout.lock();

        writeln!(stdout, "Terrarium playground. Type 'help' for commands, 'exit' to quit.")?;

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        loop {
            let stats = sandbox.stats();
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true))?;
            write!(stdout, "{}:{}$ ", self.id, stats.current_directory)?;
            stdout.reset()?;
            stdout.flush()?;

            let line = match lines.next() {
                Some(line) => line?,
                None => break,
            };
            let line = line.trim();

            if line.is_empty() {
                continue;
            }
            if line == "exit" {
                break;
            }

            let result = sandbox.execute(line)?;

            if !result.stdout.is_empty() {
                writeln!(stdout, "{}", result.stdout)?;
            }
            if !result.stderr.is_empty() {
                stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
                writeln!(stdout, "{}", result.stderr)?;
                stdout.reset()?;
            }

            let stats = sandbox.stats();
            stdout.set_color(ColorSpec::new().set_dimmed(true))?;
            writeln!(
                stdout,
                "[exit {} in {} | {} nodes, {} bytes, {} commands]",
                result.exit_code,
                humantime::format_duration(round_millis(result.duration)),
                stats.file_count,
                stats.total_size,
                stats.command_count,
            )?;
            stdout.reset()?;
        }

        sandbox.dispose();
        writeln!(stdout, "Bye.")?;
        Ok(())
    }
}

/// Rounds to whole milliseconds so the duration prints compactly.
fn round_millis(duration: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_millis_drops_sub_millisecond_noise() {
        let rounded = round_millis(std::time::Duration::from_micros(2_347));
        assert_eq!(rounded, std::time::Duration::from_millis(2));
        assert_eq!(humantime::format_duration(rounded).to_string(), "2ms");
    }
}
