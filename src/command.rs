//! The one seam through which every external program (`kubectl`, `docker`, `k3d`, `helm`, `mkcert`) is invoked.
//!
//! Nothing else in the crate spawns processes. Tests swap [`ProcessRunner`] for a fake that records invocations
//! and replays canned output.

use crate::error::{
    Error,
    Result,
};
use std::{
    process::Stdio,
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt as _,
    process::Command,
};

/// A single external command: argv plus how to treat its exit code and output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub stdin: Option<String>,
    /// Fail with [`Error::ExternalCommand`] on a non-zero exit.
    pub check: bool,
    /// Let stdout/stderr go straight to the terminal instead of capturing them.
    pub stream: bool,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![program.into()];
        argv.extend(args.into_iter().map(Into::into));
        Self {
            argv,
            stdin: None,
            check: true,
            stream: false,
        }
    }

    /// Don't fail on a non-zero exit; the caller inspects [`CommandOutput::exit_code`].
    pub fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// True if `fragment` appears as a contiguous run somewhere in the argv.
    pub fn contains(&self, fragment: &[&str]) -> bool {
        if fragment.is_empty() {
            return true;
        }
        self.argv
            .windows(fragment.len())
            .any(|window| window.iter().zip(fragment).all(|(a, b)| a == b))
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&render_argv(&self.argv))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was terminated by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn the process and collect its output. Only fails if the process could not be run at all; the exit code
    /// is reported as-is.
    async fn spawn(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Spawn and enforce [`Invocation::check`]. No retries happen here.
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput> {
        debug!(command = %invocation, "run");
        let output = self.spawn(&invocation).await?;
        if invocation.check && !output.success() {
            return Err(failure(invocation, &output));
        }
        Ok(output)
    }
}

/// The error a checked run would have produced, for callers that ran unchecked to look at stderr first.
pub(crate) fn failure(invocation: Invocation, output: &CommandOutput) -> Error {
    Error::ExternalCommand {
        argv: invocation.argv,
        exit_code: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    }
}

/// Path of `program` as resolved by the shell, if it resolves at all.
pub async fn which(runner: &dyn CommandRunner, program: &str) -> Result<Option<String>> {
    let output = runner
        .run(Invocation::new("sh", ["-c".to_string(), format!("command -v {}", quote(program))]).unchecked())
        .await?;
    let path = output.stdout.trim();
    Ok((output.success() && !path.is_empty()).then(|| path.to_string()))
}

pub async fn require_executable(runner: &dyn CommandRunner, program: &str, hint: &str) -> Result<()> {
    match which(runner, program).await? {
        Some(path) => {
            debug!(%program, %path, "found executable");
            Ok(())
        }
        None => Err(Error::MissingExecutable {
            program: program.to_string(),
            hint: hint.to_string(),
        }),
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn spawn(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let program = invocation.program().to_string();
        let spawn_error = |source| Error::Spawn {
            program: program.clone(),
            source,
        };

        let mut command = Command::new(&program);
        command
            .args(invocation.argv.iter().skip(1))
            .kill_on_drop(true)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if invocation.stream {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command.spawn().map_err(spawn_error)?;

        // Feed stdin while the child runs so a chatty process can't block on a full stdout pipe.
        let stdin = child.stdin.take();
        let input = invocation.stdin.clone();
        let feed = async move {
            if let (Some(mut pipe), Some(input)) = (stdin, input) {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(spawn_error)?;
        if let Err(err) = fed {
            // The process may exit before reading everything; its exit code tells the real story.
            trace!(%program, "writing stdin failed: {err}");
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// `timeout` as whole seconds (`"90s"`) for kubectl and helm flags, rounded up so a sub-second timeout never becomes
/// `0s`.
pub fn timeout_secs(timeout: Duration) -> String {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    format!("{secs}s")
}

/// Render argv the way one would type it into a POSIX shell.
pub fn render_argv(argv: &[String]) -> String {
    argv.iter().map(|arg| quote(arg)).collect::<Vec<_>>().join(" ")
}

fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | ',' | '+'));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
