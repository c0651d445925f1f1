//! Runner module - External program execution and user confirmation
//!
//! Every builder talks to the host through [`Runner`] and [`Confirm`] so the
//! build sequences can run against a recording fake in tests.

use std::io::{self, BufRead, Write};

use nix::unistd::geteuid;
use tracing::debug;
use xshell::Shell;

use super::error::{Error, Result};

/// Executes external programs on behalf of a builder.
pub trait Runner {
    /// Run a program, streaming its output to the terminal.
    fn run(&self, program: &str, args: &[String]) -> Result<()>;

    /// Run a program and capture its standard output (trimmed).
    fn output(&self, program: &str, args: &[String]) -> Result<String>;

    /// Whether `program` can be found on the executable search path.
    fn exists(&self, program: &str) -> bool;

    /// Whether the current process runs with an effective uid of 0.
    fn is_root(&self) -> bool;
}

/// [`Runner`] backed by the real host.
pub struct HostRunner {
    sh: Shell,
}

impl HostRunner {
    pub fn new() -> Result<Self> {
        let sh = Shell::new()
            .map_err(|e| Error::Environment(format!("failed to create shell: {e}")))?;
        Ok(Self { sh })
    }
}

impl Runner for HostRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<()> {
        debug!(program, ?args, "running");
        self.sh
            .cmd(program)
            .args(args)
            .run()
            .map_err(|e| Error::Command {
                program: program.to_string(),
                message: e.to_string(),
            })
    }

    fn output(&self, program: &str, args: &[String]) -> Result<String> {
        debug!(program, ?args, "capturing");
        let out = self
            .sh
            .cmd(program)
            .args(args)
            .quiet()
            .read()
            .map_err(|e| Error::Command {
                program: program.to_string(),
                message: e.to_string(),
            })?;
        Ok(out.trim().to_string())
    }

    fn exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn is_root(&self) -> bool {
        geteuid().is_root()
    }
}

/// Answers a yes/no question before a destructive step.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Asks on the terminal; only `y` or `yes` count as agreement.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N]: ", prompt);
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => false,
            Ok(_) => is_affirmative(&line),
        }
    }
}

/// Agrees to everything (`--yes`).
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Convert a list of string-like values into owned arguments.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::*;

    /// Records every invocation and fails the programs it is told to fail.
    pub struct FakeRunner {
        pub root: bool,
        pub missing: Vec<&'static str>,
        pub failing: Vec<&'static str>,
        pub outputs: Vec<(&'static str, String)>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self {
                root: true,
                missing: Vec::new(),
                failing: Vec::new(),
                outputs: Vec::new(),
                calls: RefCell::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        /// Position of the first recorded call starting with `prefix`.
        pub fn position(&self, prefix: &str) -> Option<usize> {
            self.calls.borrow().iter().position(|c| c.starts_with(prefix))
        }

        fn record(&self, program: &str, args: &[String]) -> Result<()> {
            let mut line = program.to_string();
            for a in args {
                line.push(' ');
                line.push_str(a);
            }
            self.calls.borrow_mut().push(line);

            if self.failing.contains(&program) {
                return Err(Error::Command {
                    program: program.to_string(),
                    message: "exit status: 1".into(),
                });
            }
            Ok(())
        }
    }

    impl Runner for FakeRunner {
        fn run(&self, program: &str, args: &[String]) -> Result<()> {
            self.record(program, args)
        }

        fn output(&self, program: &str, args: &[String]) -> Result<String> {
            self.record(program, args)?;
            Ok(self
                .outputs
                .iter()
                .find(|(p, _)| *p == program)
                .map(|(_, o)| o.clone())
                .unwrap_or_default())
        }

        fn exists(&self, program: &str) -> bool {
            !self.missing.contains(&program)
        }

        fn is_root(&self) -> bool {
            self.root
        }
    }

    /// Fixed answer to every confirmation prompt.
    pub struct Answer(pub bool);

    impl Confirm for Answer {
        fn confirm(&self, _prompt: &str) -> bool {
            self.0
        }
    }
}
