//! The built-in command set.
//!
//! Every handler works exclusively through the [`ShellContext`] and returns
//! a [`CommandOutput`]. Failure messages follow the POSIX spellings
//! (`cd: /x: No such file or directory`) so agents trained on real shells
//! feel at home. Output never carries a trailing newline; lines are joined
//! with `\n`.

use memvfs::{format_mode, path_ops};

use crate::shell::{CommandOutput, ShellContext, EXIT_FAILURE};

pub struct Builtin {
    pub name: &'static str,
    pub description: &'static str,
    pub run: fn(&[String], &mut ShellContext) -> CommandOutput,
}

pub const BUILTINS: &[Builtin] = &[
    Builtin { name: "cat", description: "Concatenate file contents", run: cat },
    Builtin { name: "cd", description: "Change the working directory", run: cd },
    Builtin { name: "clear", description: "Clear the terminal", run: clear },
    Builtin { name: "cp", description: "Copy files and directories", run: cp },
    Builtin { name: "echo", description: "Print arguments", run: echo },
    Builtin { name: "env", description: "Print environment variables", run: env },
    Builtin { name: "export", description: "Set an environment variable", run: export },
    Builtin { name: "find", description: "Walk a directory tree", run: find_cmd },
    Builtin { name: "grep", description: "Search file contents for a pattern", run: grep },
    Builtin { name: "head", description: "Print the first lines of a file", run: head },
    Builtin { name: "help", description: "List available commands", run: help },
    Builtin { name: "ls", description: "List directory contents", run: ls },
    Builtin { name: "mkdir", description: "Create directories", run: mkdir },
    Builtin { name: "mv", description: "Move files and directories", run: mv },
    Builtin { name: "pwd", description: "Print the working directory", run: pwd },
    Builtin { name: "rm", description: "Remove files and directories", run: rm },
    Builtin { name: "tail", description: "Print the last lines of a file", run: tail },
    Builtin { name: "touch", description: "Create files or update timestamps", run: touch },
    Builtin { name: "wc", description: "Count lines, words and bytes", run: wc },
];

pub fn find(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

/// Splits arguments into flag characters (from `-xyz` style tokens) and
/// positional operands.
fn split_flags<'a>(args: &'a [String]) -> (Vec<char>, Vec<&'a String>) {
    let mut flags = Vec::new();
    let mut operands = Vec::new();

    for arg in args {
        if arg.len() > 1 && arg.starts_with('-') {
            flags.extend(arg[1..].chars());
        } else {
            operands.push(arg);
        }
    }

    (flags, operands)
}

fn pwd(_args: &[String], context: &mut ShellContext) -> CommandOutput {
    CommandOutput::success(context.current_directory.clone())
}

fn cd(args: &[String], context: &mut ShellContext) -> CommandOutput {
    let target = match args.first() {
        Some(arg) => arg.clone(),
        None => context
            .environment
            .get("HOME")
            .cloned()
            .unwrap_or_else(|| "/".to_owned()),
    };

    let resolved = context.resolve_path(&target);
    if !context.fs.is_directory(&resolved) {
        return CommandOutput::failure(format!("cd: {}: No such file or directory", target));
    }

    context.set_current_directory(resolved);
    CommandOutput::empty()
}

fn ls(args: &[String], context: &mut ShellContext) -> CommandOutput {
    let (flags, operands) = split_flags(args);
    let long = flags.contains(&'l');

    let target = operands
        .first()
        .map(|path| context.resolve_path(path))
        .unwrap_or_else(|| context.current_directory.clone());

    let entry = match context.fs.get_entry(&target) {
        Some(entry) => entry,
        None => {
            return CommandOutput::failure(format!(
                "ls: {}: No such file or directory",
                operands.first().map(|s| s.as_str()).unwrap_or(target.as_str())
            ))
        }
    };

    let render = |entry: &memvfs::FileEntry| -> String {
        if long {
            format!(
                "{} {:>8} {} {}",
                format_mode(entry),
                entry.size(),
                humantime::format_rfc3339_seconds(entry.modified_at),
                entry.name
            )
        } else {
            entry.name.clone()
        }
    };

    if !entry.is_directory {
        return CommandOutput::success(render(&entry));
    }

    let names = match context.fs.list_directory(&target) {
        Ok(names) => names,
        Err(err) => return CommandOutput::failure(format!("ls: {}", err)),
    };

    let lines: Vec<String> = names
        .iter()
        .filter_map(|name| {
            context
                .fs
                .get_entry(&path_ops::combine([target.as_str(), name.as_str()]))
                .map(|child| render(&child))
        })
        .collect();

    CommandOutput::success(lines.join("\n"))
}

fn cat(args: &[String], context: &mut ShellContext) -> CommandOutput {
    if args.is_empty() {
        return CommandOutput::failure("usage: cat <path>...");
    }

    let mut output = CommandOutput::empty();
    for arg in args {
        let resolved = context.resolve_path(arg);
        match context.fs.read_file(&resolved) {
            Ok(bytes) => output
                .stdout
                .push_str(&String::from_utf8_lossy(&bytes)),
            Err(err) => {
                if !output.stderr.is_empty() {
                    output.stderr.push('\n');
                }
                output.stderr.push_str(&format!("cat: {}", err));
                output.exit_code = EXIT_FAILURE;
            }
        }
    }

    output
}

fn echo(args: &[String], _context: &mut ShellContext) -> CommandOutput {
    CommandOutput::success(args.join(" "))
}

fn mkdir(args: &[String], context: &mut ShellContext) -> CommandOutput {
    let (flags, operands) = split_flags(args);
    let parents = flags.contains(&'p');

    if operands.is_empty() {
        return CommandOutput::failure("usage: mkdir [-p] <path>...");
    }

    let mut output = CommandOutput::empty();
    for operand in operands {
        let resolved = context.resolve_path(operand);

        let result = if parents {
            context.fs.create_directory(&resolved).map_err(|err| format!("mkdir: {}", err))
        } else if context.fs.exists(&resolved) {
            Err(format!("mkdir: {}: File exists", operand))
        } else if !context.fs.is_directory(&path_ops::parent(&resolved)) {
            Err(format!("mkdir: {}: No such file or directory", operand))
        } else {
            context.fs.create_directory(&resolved).map_err(|err| format!("mkdir: {}", err))
        };

        if let Err(message) = result {
            if !output.stderr.is_empty() {
                output.stderr.push('\n');
            }
            output.stderr.push_str(&message);
            output.exit_code = EXIT_FAILURE;
        }
    }

    output
}

fn rm(args: &[String], context: &mut ShellContext) -> CommandOutput {
    let (flags, operands) = split_flags(args);
    let recursive = flags.contains(&'r');
    let force = flags.contains(&'f');

    if operands.is_empty() {
        return CommandOutput::failure("usage: rm [-rf] <path>...");
    }

    let mut output = CommandOutput::empty();
    let mut complain = |message: String, output: &mut CommandOutput| {
        if !output.stderr.is_empty() {
            output.stderr.push('\n');
        }
        output.stderr.push_str(&message);
        output.exit_code = EXIT_FAILURE;
    };

    for operand in operands {
        let resolved = context.resolve_path(operand);

        match context.fs.get_entry(&resolved) {
            None => {
                if !force {
                    complain(
                        format!("rm: {}: No such file or directory", operand),
                        &mut output,
                    );
                }
            }
            Some(entry) if entry.is_directory && !recursive => {
                complain(format!("rm: {}: Is a directory", operand), &mut output);
            }
            Some(_) => {
                if let Err(err) = context.fs.delete(&resolved, recursive) {
                    complain(format!("rm: {}", err), &mut output);
                }
            }
        }
    }

    output
}

fn cp(args: &[String], context: &mut ShellContext) -> CommandOutput {
    let (flags, operands) = split_flags(args);
    let recursive = flags.contains(&'r');

    let (src, dst) = match operands.as_slice() {
        [src, dst] => (src, dst),
        _ => return CommandOutput::failure("usage: cp [-r] <src> <dst>"),
    };

    let resolved_src = context.resolve_path(src);
    let resolved_dst = context.resolve_path(dst);

    match context.fs.get_entry(&resolved_src) {
        None => CommandOutput::failure(format!("cp: {}: No such file or directory", src)),
        Some(entry) if entry.is_directory && !recursive => {
            CommandOutput::failure(format!("cp: -r not specified; omitting directory '{}'", src))
        }
        Some(_) => match context.fs.copy(&resolved_src, &resolved_dst, true) {
            Ok(()) => CommandOutput::empty(),
            Err(err) => CommandOutput::failure(format!("cp: {}", err)),
        },
    }
}

fn mv(args: &[String], context: &mut ShellContext) -> CommandOutput {
    let (_, operands) = split_flags(args);

    let (src, dst) = match operands.as_slice() {
        [src, dst] => (src, dst),
        _ => return CommandOutput::failure("usage: mv <src> <dst>"),
    };

    let resolved_src = context.resolve_path(src);
    let resolved_dst = context.resolve_path(dst);

    match context.fs.rename(&resolved_src, &resolved_dst, true) {
        Ok(()) => CommandOutput::empty(),
        Err(err) => CommandOutput::failure(format!("mv: {}", err)),
    }
}

fn touch(args: &[String], context: &mut ShellContext) -> CommandOutput {
    if args.is_empty() {
        return CommandOutput::failure("usage: touch <path>...");
    }

    let mut output = CommandOutput::empty();
    for arg in args {
        let resolved = context.resolve_path(arg);
        if let Err(err) = context.fs.touch(&resolved) {
            if !output.stderr.is_empty() {
                output.stderr.push('\n');
            }
            output.stderr.push_str(&format!("touch: {}", err));
            output.exit_code = EXIT_FAILURE;
        }
    }

    output
}

/// Shared implementation for `head` and `tail`.
fn line_window(
    command: &str,
    args: &[String],
    context: &mut ShellContext,
    take: fn(Vec<String>, usize) -> Vec<String>,
) -> CommandOutput {
    let mut count = 10usize;
    let mut operands: Vec<&String> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.as_str() == "-n" {
            let value = match iter.next() {
                Some(value) => value,
                None => {
                    return CommandOutput::failure(format!("{}: option -n requires a count", command))
                }
            };
            count = match value.parse() {
                Ok(parsed) => parsed,
                Err(_) => {
                    return CommandOutput::failure(format!(
                        "{}: invalid line count: '{}'",
                        command, value
                    ))
                }
            };
        } else {
            operands.push(arg);
        }
    }

    let path = match operands.as_slice() {
        [path] => path,
        _ => return CommandOutput::failure(format!("usage: {} [-n N] <path>", command)),
    };

    let resolved = context.resolve_path(path);
    match context.fs.read_lines(&resolved) {
        Ok(lines) => CommandOutput::success(take(lines, count).join("\n")),
        Err(err) => CommandOutput::failure(format!("{}: {}", command, err)),
    }
}

fn head(args: &[String], context: &mut ShellContext) -> CommandOutput {
    line_window("head", args, context, |mut lines, count| {
        lines.truncate(count);
        lines
    })
}

fn tail(args: &[String], context: &mut ShellContext) -> CommandOutput {
    line_window("tail", args, context, |lines, count| {
        let skip = lines.len().saturating_sub(count);
        lines.into_iter().skip(skip).collect()
    })
}

fn wc(args: &[String], context: &mut ShellContext) -> CommandOutput {
    let (flags, operands) = split_flags(args);

    let path = match operands.as_slice() {
        [path] => path,
        _ => return CommandOutput::failure("usage: wc [-l|-w|-c] <path>"),
    };

    let resolved = context.resolve_path(path);
    let bytes = match context.fs.read_file(&resolved) {
        Ok(bytes) => bytes,
        Err(err) => return CommandOutput::failure(format!("wc: {}", err)),
    };

    let text = String::from_utf8_lossy(&bytes);
    let lines = bytes.iter().filter(|byte| **byte == b'\n').count();
    let words = text.split_whitespace().count();

    let rendered = if flags.contains(&'l') {
        format!("{} {}", lines, path)
    } else if flags.contains(&'w') {
        format!("{} {}", words, path)
    } else if flags.contains(&'c') {
        format!("{} {}", bytes.len(), path)
    } else {
        format!("{} {} {} {}", lines, words, bytes.len(), path)
    };

    CommandOutput::success(rendered)
}

fn grep(args: &[String], context: &mut ShellContext) -> CommandOutput {
    let (flags, operands) = split_flags(args);
    let ignore_case = flags.contains(&'i');

    let (pattern, paths) = match operands.split_first() {
        Some((pattern, paths)) if !paths.is_empty() => (pattern, paths),
        _ => return CommandOutput::failure("usage: grep [-i] <pattern> <path>..."),
    };

    let needle = if ignore_case {
        pattern.to_lowercase()
    } else {
        pattern.to_string()
    };

    let mut output = CommandOutput::empty();
    let mut matched = false;

    for path in paths {
        let resolved = context.resolve_path(path);
        let lines = match context.fs.read_lines(&resolved) {
            Ok(lines) => lines,
            Err(err) => {
                if !output.stderr.is_empty() {
                    output.stderr.push('\n');
                }
                output.stderr.push_str(&format!("grep: {}", err));
                continue;
            }
        };

        for line in lines {
            let haystack = if ignore_case {
                line.to_lowercase()
            } else {
                line.clone()
            };

            if haystack.contains(&needle) {
                matched = true;
                if !output.stdout.is_empty() {
                    output.stdout.push('\n');
                }
                if paths.len() > 1 {
                    output.stdout.push_str(&format!("{}:{}", path, line));
                } else {
                    output.stdout.push_str(&line);
                }
            }
        }
    }

    if !matched {
        output.exit_code = EXIT_FAILURE;
    }
    output
}

fn find_cmd(args: &[String], context: &mut ShellContext) -> CommandOutput {
    let mut root = None;
    let mut pattern = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.as_str() == "-name" {
            pattern = match iter.next() {
                Some(value) => Some(value.clone()),
                None => return CommandOutput::failure("find: -name requires a pattern"),
            };
        } else if root.is_none() {
            root = Some(arg.clone());
        } else {
            return CommandOutput::failure("usage: find <root> [-name <pattern>]");
        }
    }

    let root = match root {
        Some(root) => root,
        None => return CommandOutput::failure("usage: find <root> [-name <pattern>]"),
    };

    let resolved = context.resolve_path(&root);
    if !context.fs.exists(&resolved) {
        return CommandOutput::failure(format!("find: {}: No such file or directory", root));
    }

    let matcher = match &pattern {
        Some(pattern) => match globset::Glob::new(pattern) {
            Ok(glob) => Some(glob.compile_matcher()),
            Err(_) => {
                return CommandOutput::failure(format!("find: invalid pattern '{}'", pattern))
            }
        },
        None => None,
    };

    // Pre-order walk with children visited in sorted order.
    fn walk(
        context: &ShellContext,
        path: &str,
        matcher: &Option<globset::GlobMatcher>,
        results: &mut Vec<String>,
    ) {
        let keep = match matcher {
            Some(matcher) => matcher.is_match(path_ops::name(path)),
            None => true,
        };
        if keep {
            results.push(path.to_owned());
        }

        if context.fs.is_directory(path) {
            if let Ok(names) = context.fs.list_directory(path) {
                for name in names {
                    walk(
                        context,
                        &path_ops::combine([path, name.as_str()]),
                        matcher,
                        results,
                    );
                }
            }
        }
    }

    let mut results = Vec::new();
    walk(context, &resolved, &matcher, &mut results);
    CommandOutput::success(results.join("\n"))
}

fn env(_args: &[String], context: &mut ShellContext) -> CommandOutput {
    // BTreeMap iteration is already sorted by key.
    let lines: Vec<String> = context
        .environment
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    CommandOutput::success(lines.join("\n"))
}

fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn export(args: &[String], context: &mut ShellContext) -> CommandOutput {
    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            if is_valid_variable_name(key) {
                context
                    .environment
                    .insert(key.to_owned(), value.to_owned());
            }
        }
        // Malformed assignments are silently ignored.
    }
    CommandOutput::empty()
}

fn clear(_args: &[String], _context: &mut ShellContext) -> CommandOutput {
    CommandOutput::empty()
}

fn help(_args: &[String], _context: &mut ShellContext) -> CommandOutput {
    let lines: Vec<String> = BUILTINS
        .iter()
        .map(|builtin| format!("{:<8} {}", builtin.name, builtin.description))
        .collect();
    CommandOutput::success(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use memvfs::Vfs;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::events::ObserverFanout;
    use crate::fs_guard::GuardedFs;
    use crate::options::SandboxOptions;

    fn context() -> ShellContext {
        let fs = Arc::new(GuardedFs::new(
            Arc::new(Vfs::new_in_memory()),
            &SandboxOptions::default(),
            ObserverFanout::new(),
            "test".to_owned(),
        ));
        ShellContext::new(fs, BTreeMap::new(), Duration::from_secs(30))
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn pwd_prints_cwd() {
        let mut context = context();
        context.set_current_directory("/deep/down".to_owned());
        let output = pwd(&[], &mut context);
        assert_eq!(output.stdout, "/deep/down");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn cd_updates_cwd_and_pwd() {
        let mut context = context();
        context.fs.create_directory("/work").unwrap();

        let output = cd(&args(&["work"]), &mut context);
        assert_eq!(output.exit_code, 0);
        assert_eq!(context.current_directory, "/work");
        assert_eq!(context.environment.get("PWD").unwrap(), "/work");
    }

    #[test]
    fn cd_missing_target_fails_posix_style() {
        let mut context = context();
        let output = cd(&args(&["/nope"]), &mut context);
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.stderr, "cd: /nope: No such file or directory");
        assert_eq!(context.current_directory, "/");
    }

    #[test]
    fn cd_to_file_fails() {
        let mut context = context();
        context.fs.write_file("/f", b"").unwrap();
        let output = cd(&args(&["/f"]), &mut context);
        assert_eq!(output.exit_code, 1);
    }

    #[test]
    fn cd_without_argument_goes_home() {
        let mut context = context();
        context.fs.create_directory("/work").unwrap();
        context
            .environment
            .insert("HOME".to_owned(), "/work".to_owned());

        cd(&[], &mut context);
        assert_eq!(context.current_directory, "/work");
    }

    #[test]
    fn ls_lists_sorted_names() {
        let mut context = context();
        for name in ["zeta", "alpha", "mid"] {
            context.fs.write_file(&format!("/{}", name), b"").unwrap();
        }

        let output = ls(&[], &mut context);
        assert_eq!(output.stdout, "alpha\nmid\nzeta");
    }

    #[test]
    fn ls_long_format_includes_mode_and_size() {
        let mut context = context();
        context.fs.write_file("/file.txt", b"12345").unwrap();

        let output = ls(&args(&["-l"]), &mut context);
        assert!(output.stdout.starts_with("-rw-r--r--"));
        assert!(output.stdout.contains("5"));
        assert!(output.stdout.ends_with("file.txt"));
    }

    #[test]
    fn ls_missing_path_fails() {
        let mut context = context();
        let output = ls(&args(&["/ghost"]), &mut context);
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.stderr, "ls: /ghost: No such file or directory");
    }

    #[test]
    fn cat_concatenates_files() {
        let mut context = context();
        context.fs.write_file("/a", b"one").unwrap();
        context.fs.write_file("/b", b"two").unwrap();

        let output = cat(&args(&["/a", "/b"]), &mut context);
        assert_eq!(output.stdout, "onetwo");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn cat_reports_missing_file() {
        let mut context = context();
        let output = cat(&args(&["/ghost"]), &mut context);
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.stderr, "cat: /ghost: No such file or directory");
    }

    #[test]
    fn echo_joins_with_single_spaces_no_newline() {
        let mut context = context();
        let output = echo(&args(&["a", "b", "c"]), &mut context);
        assert_eq!(output.stdout, "a b c");
        assert!(!output.stdout.ends_with('\n'));
    }

    #[test]
    fn mkdir_without_p_requires_parent() {
        let mut context = context();
        let output = mkdir(&args(&["/a/b"]), &mut context);
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.stderr, "mkdir: /a/b: No such file or directory");
        assert!(!context.fs.exists("/a"));
    }

    #[test]
    fn mkdir_p_creates_chain_idempotently() {
        let mut context = context();
        assert_eq!(mkdir(&args(&["-p", "/a/b/c"]), &mut context).exit_code, 0);
        assert_eq!(mkdir(&args(&["-p", "/a/b/c"]), &mut context).exit_code, 0);
        assert!(context.fs.is_directory("/a/b/c"));
    }

    #[test]
    fn mkdir_existing_target_fails_without_p() {
        let mut context = context();
        context.fs.create_directory("/a").unwrap();
        let output = mkdir(&args(&["/a"]), &mut context);
        assert_eq!(output.stderr, "mkdir: /a: File exists");
    }

    #[test]
    fn rm_file_and_missing_behavior() {
        let mut context = context();
        context.fs.write_file("/f", b"x").unwrap();

        assert_eq!(rm(&args(&["/f"]), &mut context).exit_code, 0);
        assert!(!context.fs.exists("/f"));

        let output = rm(&args(&["/f"]), &mut context);
        assert_eq!(output.exit_code, 1);

        // -f silences the missing-target error.
        assert_eq!(rm(&args(&["-f", "/f"]), &mut context).exit_code, 0);
    }

    #[test]
    fn rm_directory_requires_r() {
        let mut context = context();
        context.fs.write_file("/d/f", b"x").unwrap();

        let output = rm(&args(&["/d"]), &mut context);
        assert_eq!(output.stderr, "rm: /d: Is a directory");

        assert_eq!(rm(&args(&["-rf", "/d"]), &mut context).exit_code, 0);
        assert!(!context.fs.exists("/d"));
    }

    #[test]
    fn cp_copies_and_overwrites() {
        let mut context = context();
        context.fs.write_file("/src", b"data").unwrap();
        context.fs.write_file("/dst", b"old").unwrap();

        assert_eq!(cp(&args(&["/src", "/dst"]), &mut context).exit_code, 0);
        assert_eq!(context.fs.read_file("/dst").unwrap(), b"data");
    }

    #[test]
    fn cp_directory_needs_r() {
        let mut context = context();
        context.fs.write_file("/d/f", b"x").unwrap();

        let output = cp(&args(&["/d", "/e"]), &mut context);
        assert_eq!(output.exit_code, 1);

        assert_eq!(cp(&args(&["-r", "/d", "/e"]), &mut context).exit_code, 0);
        assert_eq!(context.fs.read_file("/e/f").unwrap(), b"x");
    }

    #[test]
    fn mv_renames() {
        let mut context = context();
        context.fs.write_file("/old", b"data").unwrap();

        assert_eq!(mv(&args(&["/old", "/new"]), &mut context).exit_code, 0);
        assert!(!context.fs.exists("/old"));
        assert_eq!(context.fs.read_file("/new").unwrap(), b"data");
    }

    #[test]
    fn touch_creates_empty_file() {
        let mut context = context();
        assert_eq!(touch(&args(&["/f"]), &mut context).exit_code, 0);
        assert_eq!(context.fs.read_file("/f").unwrap(), b"");
    }

    #[test]
    fn head_defaults_to_ten_lines() {
        let mut context = context();
        let body: Vec<String> = (1..=20).map(|i| i.to_string()).collect();
        context.fs.write_file("/nums", body.join("\n").as_bytes()).unwrap();

        let output = head(&args(&["/nums"]), &mut context);
        assert_eq!(output.stdout, "1\n2\n3\n4\n5\n6\n7\n8\n9\n10");
    }

    #[test]
    fn head_and_tail_honor_n() {
        let mut context = context();
        context.fs.write_file("/nums", b"1\n2\n3\n4\n5").unwrap();

        assert_eq!(head(&args(&["-n", "2", "/nums"]), &mut context).stdout, "1\n2");
        assert_eq!(tail(&args(&["-n", "2", "/nums"]), &mut context).stdout, "4\n5");
    }

    #[test]
    fn head_rejects_bad_count() {
        let mut context = context();
        context.fs.write_file("/f", b"x").unwrap();
        let output = head(&args(&["-n", "lots", "/f"]), &mut context);
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.stderr, "head: invalid line count: 'lots'");
    }

    #[test]
    fn wc_counts() {
        let mut context = context();
        context.fs.write_file("/f", b"one two\nthree\n").unwrap();

        assert_eq!(wc(&args(&["/f"]), &mut context).stdout, "2 3 14 /f");
        assert_eq!(wc(&args(&["-l", "/f"]), &mut context).stdout, "2 /f");
        assert_eq!(wc(&args(&["-w", "/f"]), &mut context).stdout, "3 /f");
        assert_eq!(wc(&args(&["-c", "/f"]), &mut context).stdout, "14 /f");
    }

    #[test]
    fn grep_matches_substrings() {
        let mut context = context();
        context
            .fs
            .write_file("/log", b"error: boom\ninfo: fine\nERROR again")
            .unwrap();

        let output = grep(&args(&["error", "/log"]), &mut context);
        assert_eq!(output.stdout, "error: boom");
        assert_eq!(output.exit_code, 0);

        let output = grep(&args(&["-i", "error", "/log"]), &mut context);
        assert_eq!(output.stdout, "error: boom\nERROR again");
    }

    #[test]
    fn grep_no_match_exits_one() {
        let mut context = context();
        context.fs.write_file("/log", b"all good").unwrap();

        let output = grep(&args(&["oops", "/log"]), &mut context);
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.stdout, "");
    }

    #[test]
    fn grep_prefixes_path_for_multiple_files() {
        let mut context = context();
        context.fs.write_file("/a", b"hit here").unwrap();
        context.fs.write_file("/b", b"hit there").unwrap();

        let output = grep(&args(&["hit", "/a", "/b"]), &mut context);
        assert_eq!(output.stdout, "/a:hit here\n/b:hit there");
    }

    #[test]
    fn find_walks_preorder() {
        let mut context = context();
        context.fs.write_file("/root/b/inner.txt", b"").unwrap();
        context.fs.write_file("/root/a.txt", b"").unwrap();

        let output = find_cmd(&args(&["/root"]), &mut context);
        assert_eq!(output.stdout, "/root\n/root/a.txt\n/root/b\n/root/b/inner.txt");
    }

    #[test]
    fn find_filters_by_glob() {
        let mut context = context();
        context.fs.write_file("/root/a.txt", b"").unwrap();
        context.fs.write_file("/root/b.log", b"").unwrap();
        context.fs.write_file("/root/sub/c.txt", b"").unwrap();

        let output = find_cmd(&args(&["/root", "-name", "*.txt"]), &mut context);
        assert_eq!(output.stdout, "/root/a.txt\n/root/sub/c.txt");

        let output = find_cmd(&args(&["/root", "-name", "?.log"]), &mut context);
        assert_eq!(output.stdout, "/root/b.log");
    }

    #[test]
    fn env_prints_sorted_pairs() {
        let mut context = context();
        context
            .environment
            .insert("ZED".to_owned(), "1".to_owned());
        context
            .environment
            .insert("ABC".to_owned(), "2".to_owned());

        let output = env(&[], &mut context);
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines.first(), Some(&"ABC=2"));
        assert!(output.stdout.contains("HOME=/"));
        assert!(output.stdout.contains("ZED=1"));
    }

    #[test]
    fn export_assigns_and_ignores_malformed() {
        let mut context = context();

        assert_eq!(export(&args(&["NAME=World"]), &mut context).exit_code, 0);
        assert_eq!(context.environment.get("NAME").unwrap(), "World");

        // Value may itself contain '='.
        export(&args(&["EQ=a=b"]), &mut context);
        assert_eq!(context.environment.get("EQ").unwrap(), "a=b");

        // No '=' and invalid names are silent no-ops.
        assert_eq!(export(&args(&["JUNK"]), &mut context).exit_code, 0);
        assert!(!context.environment.contains_key("JUNK"));
        export(&args(&["1BAD=x"]), &mut context);
        assert!(!context.environment.contains_key("1BAD"));
    }

    #[test]
    fn clear_emits_nothing() {
        let mut context = context();
        let output = clear(&[], &mut context);
        assert_eq!(output.stdout, "");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn help_lists_every_builtin() {
        let mut context = context();
        let output = help(&[], &mut context);
        for builtin in BUILTINS {
            assert!(output.stdout.contains(builtin.name), "missing {}", builtin.name);
        }
    }

    #[test]
    fn builtin_table_is_sorted_and_complete() {
        let names: Vec<&str> = BUILTINS.iter().map(|builtin| builtin.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names.len(), 19);
    }
}
