//! External process invocation.
//!
//! Every tool the pipeline drives goes through a [`CommandRunner`]. The
//! runner is picked once at startup: [`NativeRunner`] spawns commands
//! directly, [`WslRunner`] re-issues them inside WSL. Commands are argument
//! vectors, never shell strings.

use log::{debug, trace};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{PipelineError, Result};
use crate::toolchain::{ResolveStrategy, Resolver, ToolSpec, ToolchainHandle};

/// How often a child is polled while a timeout is armed
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One command-line argument.
///
/// Paths are kept apart from plain text so a runner that executes in another
/// OS context can translate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Text(OsString),
    Path(PathBuf),
}

impl Arg {
    pub fn as_os_str(&self) -> &OsStr {
        match self {
            Arg::Text(s) => s.as_os_str(),
            Arg::Path(p) => p.as_os_str(),
        }
    }
}

/// A program plus its arguments and working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<Arg>,
    pub cwd: Option<PathBuf>,
    /// Let stdout flow to the terminal instead of capturing it
    pub stream_stdout: bool,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stream_stdout: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(Arg::Text(arg.into()));
        self
    }

    pub fn path_arg(mut self, path: impl Into<PathBuf>) -> Self {
        self.args.push(Arg::Path(path.into()));
        self
    }

    pub fn args<I: IntoIterator<Item = Arg>>(mut self, args: I) -> Self {
        self.args.extend(args);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stream_stdout(mut self) -> Self {
        self.stream_stdout = true;
        self
    }

    /// Short program name for messages (`cmake`, not `/usr/bin/cmake`)
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Text arguments, lossily converted; handy for assertions and logs
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.as_os_str().to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            let text = arg.as_os_str().to_string_lossy();
            if text.contains(' ') {
                write!(f, " \"{}\"", text)?;
            } else {
                write!(f, " {}", text)?;
            }
        }
        Ok(())
    }
}

/// Outcome of one external invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StageResult {
    fn from_status(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            success: status.success(),
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        }
    }
}

/// Platform-specific way of finding and running tools
pub trait CommandRunner: Send + Sync {
    /// Short label for logs
    fn label(&self) -> &'static str;

    /// Find `spec` in whatever environment this runner executes in
    fn resolve(&self, spec: &ToolSpec) -> Result<ToolchainHandle>;

    /// Run to completion, capturing stderr (and stdout unless streamed)
    fn invoke(&self, invocation: &Invocation) -> Result<StageResult>;
}

/// Runs commands directly on the host
#[derive(Debug, Clone)]
pub struct NativeRunner {
    resolver: Resolver,
    timeout: Option<Duration>,
}

impl NativeRunner {
    pub fn new(resolver: Resolver, timeout: Option<Duration>) -> Self {
        Self { resolver, timeout }
    }
}

impl CommandRunner for NativeRunner {
    fn label(&self) -> &'static str {
        "native"
    }

    fn resolve(&self, spec: &ToolSpec) -> Result<ToolchainHandle> {
        self.resolver.resolve(spec)
    }

    fn invoke(&self, invocation: &Invocation) -> Result<StageResult> {
        execute(invocation, self.timeout)
    }
}

/// Re-issues every command inside WSL through `wsl.exe --exec`.
///
/// Host paths in [`Arg::Path`] arguments and the program itself are
/// translated to their `/mnt/<drive>` form; the working directory is handed
/// to `--cd`, which accepts host paths.
#[derive(Debug, Clone)]
pub struct WslRunner {
    wrapper: ToolchainHandle,
    resolver: Resolver,
    timeout: Option<Duration>,
}

impl WslRunner {
    /// Locate the wrapper itself on the host; fails if it is not installed
    pub fn new(resolver: Resolver, wrapper: &ToolSpec, timeout: Option<Duration>) -> Result<Self> {
        let wrapper = resolver.resolve(wrapper)?;
        debug!("Using WSL wrapper at {}", wrapper.path().display());
        Ok(Self {
            wrapper,
            resolver,
            timeout,
        })
    }

    pub fn wrapper(&self) -> &ToolchainHandle {
        &self.wrapper
    }

    /// The host-side command that runs `invocation` inside WSL
    pub fn wrap(&self, invocation: &Invocation) -> Invocation {
        let mut wrapped = Invocation::new(self.wrapper.path());
        if let Some(dir) = &invocation.cwd {
            wrapped = wrapped.arg("--cd").arg(dir.as_os_str());
        }
        wrapped = wrapped
            .arg("--exec")
            .arg(to_wsl_path(&invocation.program));
        for arg in &invocation.args {
            wrapped = match arg {
                Arg::Text(text) => wrapped.arg(text.clone()),
                Arg::Path(path) => wrapped.arg(to_wsl_path(path)),
            };
        }
        wrapped.stream_stdout = invocation.stream_stdout;
        wrapped
    }

    fn query(&self, args: &[&OsStr]) -> Result<StageResult> {
        let mut query = Invocation::new("sh");
        for arg in args {
            query = query.arg(*arg);
        }
        execute(&self.wrap(&query), self.timeout)
    }
}

impl CommandRunner for WslRunner {
    fn label(&self) -> &'static str {
        "wsl"
    }

    fn resolve(&self, spec: &ToolSpec) -> Result<ToolchainHandle> {
        // `command -v "$1"` with the name as a positional parameter, never spliced
        let found = self.query(&[
            OsStr::new("-c"),
            OsStr::new("command -v \"$1\""),
            OsStr::new("sh"),
            OsStr::new(&spec.name),
        ])?;
        if found.success {
            if let Some(path) = found.stdout.lines().next().map(str::trim).filter(|l| !l.is_empty()) {
                debug!("Resolved {} inside WSL: {}", spec.name, path);
                return Ok(ToolchainHandle::new(&spec.name, path, ResolveStrategy::SearchPath));
            }
        }

        let candidates = self.resolver.candidates(spec);
        for candidate in &candidates {
            let translated = to_wsl_path(candidate);
            let exists = self.query(&[
                OsStr::new("-c"),
                OsStr::new("test -x \"$1\""),
                OsStr::new("sh"),
                OsStr::new(&translated),
            ])?;
            if exists.success {
                debug!("Resolved {} inside WSL via fallback: {}", spec.name, translated);
                return Ok(ToolchainHandle::new(&spec.name, translated, ResolveStrategy::Fallback));
            }
        }

        Err(PipelineError::ToolchainNotFound {
            name: spec.name.clone(),
            candidates_tried: candidates,
        })
    }

    fn invoke(&self, invocation: &Invocation) -> Result<StageResult> {
        execute(&self.wrap(invocation), self.timeout)
    }
}

/// Translate a host path to the path WSL sees.
///
/// `C:\dev\demo` becomes `/mnt/c/dev/demo`; paths without a drive prefix only
/// get their separators flipped.
pub fn to_wsl_path(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    let bytes = text.as_bytes();
    let has_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    if !has_drive {
        return text;
    }

    let drive = (bytes[0] as char).to_ascii_lowercase();
    let rest = text[2..].trim_start_matches('/');
    if rest.is_empty() {
        format!("/mnt/{}", drive)
    } else {
        format!("/mnt/{}/{}", drive, rest)
    }
}

/// Spawn, wait (optionally bounded by `timeout`) and collect output
fn execute(invocation: &Invocation, timeout: Option<Duration>) -> Result<StageResult> {
    let program = invocation.program_name();
    debug!("Running: {}", invocation);

    let mut command = Command::new(&invocation.program);
    command.args(invocation.args.iter().map(Arg::as_os_str));
    if let Some(dir) = &invocation.cwd {
        command.current_dir(dir);
    }
    command.stdin(Stdio::null());
    command.stdout(if invocation.stream_stdout {
        Stdio::inherit()
    } else {
        Stdio::piped()
    });
    command.stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| PipelineError::Spawn {
        program: program.clone(),
        source,
    })?;

    // Drain pipes on their own threads so a chatty child cannot fill them and stall
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let status = match timeout {
        Some(limit) => wait_with_timeout(&mut child, limit, &program)?,
        None => child.wait().map_err(|source| PipelineError::Spawn {
            program: program.clone(),
            source,
        })?,
    };

    let stdout = stdout.map(join_reader).unwrap_or_default();
    let stderr = stderr.map(join_reader).unwrap_or_default();
    let result = StageResult::from_status(status, stdout, stderr);
    trace!("{} finished: {:?}", program, result.exit_code);
    Ok(result)
}

fn wait_with_timeout(child: &mut Child, limit: Duration, program: &str) -> Result<ExitStatus> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(source) => {
                return Err(PipelineError::Spawn {
                    program: program.to_string(),
                    source,
                });
            }
        }

        if started.elapsed() >= limit {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipelineError::TimedOut {
                program: program.to_string(),
                seconds: limit.as_secs(),
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}
