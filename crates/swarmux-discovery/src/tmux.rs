use crate::mux::{MuxError, Multiplexer, SessionTarget, WindowInfo};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use swarmux_core::config::DEFAULT_COMMAND_TIMEOUT_MS;
use swarmux_core::EngineConfig;

// Name goes last so tabs inside it survive the split.
const WINDOW_FORMAT: &str = "#{window_id}\t#{window_index}\t#{window_active}\t#{window_name}";
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// `Multiplexer` backed by the tmux binary, one `-L <socket>` server per
/// orchestrator session. Every command is killed once it outlives `timeout`.
#[derive(Debug, Clone)]
pub struct TmuxCli {
    binary: PathBuf,
    timeout: Duration,
}

impl TmuxCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.tmux_bin.clone()).with_timeout(config.command_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, socket: &str, args: &[&str]) -> Result<String, MuxError> {
        let command = args.first().copied().unwrap_or("tmux");
        let mut child = Command::new(&self.binary)
            .arg("-L")
            .arg(socket)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| self.spawn_error(source))?;
        // Drained on their own threads so a chatty command cannot stall on a
        // full pipe while we wait for it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait_bounded(&mut child, command)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !status.success() {
            return Err(MuxError::CommandFailed {
                command: command.to_string(),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn wait_bounded(
        &self,
        child: &mut Child,
        command: &str,
    ) -> Result<std::process::ExitStatus, MuxError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(MuxError::Timeout {
                        command: command.to_string(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    return Err(self.spawn_error(source));
                }
            }
        }
    }

    fn spawn_error(&self, source: std::io::Error) -> MuxError {
        MuxError::Spawn {
            binary: self.binary.display().to_string(),
            source,
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

impl Multiplexer for TmuxCli {
    fn has_session(&self, target: &SessionTarget) -> bool {
        self.run(
            &target.socket,
            &["has-session", "-t", &exact_session(&target.session)],
        )
        .is_ok()
    }

    fn list_windows(&self, target: &SessionTarget) -> Result<Vec<WindowInfo>, MuxError> {
        let output = self.run(
            &target.socket,
            &[
                "list-windows",
                "-t",
                &exact_session(&target.session),
                "-F",
                WINDOW_FORMAT,
            ],
        )?;
        parse_window_list(&output)
    }

    fn capture_pane(
        &self,
        target: &SessionTarget,
        window_id: &str,
        max_lines: usize,
    ) -> Result<String, MuxError> {
        let pane = format!("{}:{window_id}.{{top-left}}", exact_session(&target.session));
        let start = format!("-{max_lines}");
        let output = self.run(
            &target.socket,
            &["capture-pane", "-p", "-J", "-t", &pane, "-S", &start],
        )?;
        Ok(tail_lines(&output, max_lines))
    }

    fn session_working_dir(&self, target: &SessionTarget) -> Result<PathBuf, MuxError> {
        let output = self.run(
            &target.socket,
            &[
                "display-message",
                "-p",
                "-t",
                &exact_session(&target.session),
                "#{session_path}",
            ],
        )?;
        let path = output.trim();
        if path.is_empty() {
            return Err(MuxError::Parse {
                command: "display-message".to_string(),
                detail: "empty session_path".to_string(),
            });
        }
        Ok(PathBuf::from(path))
    }
}

fn exact_session(session: &str) -> String {
    format!("={session}")
}

fn parse_window_list(output: &str) -> Result<Vec<WindowInfo>, MuxError> {
    let mut windows = Vec::new();
    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        let mut fields = line.splitn(4, '\t');
        let (Some(id), Some(index), Some(active), Some(name)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(MuxError::Parse {
                command: "list-windows".to_string(),
                detail: format!("expected 4 fields in {line:?}"),
            });
        };
        let index = index.trim().parse::<u32>().map_err(|err| MuxError::Parse {
            command: "list-windows".to_string(),
            detail: format!("bad window index {index:?}: {err}"),
        })?;
        windows.push(WindowInfo {
            id: id.trim().to_string(),
            index,
            name: name.to_string(),
            active: active.trim() == "1",
        });
    }
    Ok(windows)
}

fn tail_lines(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.trim_end_matches('\n').lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
