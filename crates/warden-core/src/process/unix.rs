use std::{os::unix::process::ExitStatusExt, process::ExitStatus, time::Duration};

use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWriteExt, BufReader},
    process::Child,
    task::JoinHandle,
    time::{sleep_until, timeout, Instant},
};
use tokio_util::io::ReaderStream;

use crate::{
    error::{Error, Result},
    options::{CreateOptions, Resolved, Sink},
};

/// How long output pumps may keep running after the process exits, in case a
/// detached grandchild still holds the pipes open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub(crate) struct Spawned {
    pub child: Child,
    pub pid: i32,
    pub deadline: Option<Instant>,
    pumps: Vec<JoinHandle<()>>,
}

impl Spawned {
    /// Hands out the output pumps so they can be drained after the exit has
    /// been recorded.
    pub fn take_pumps(&mut self) -> Pumps {
        Pumps {
            pid: self.pid,
            handles: std::mem::take(&mut self.pumps),
        }
    }
}

/// Output pump tasks of one process.
#[derive(Debug)]
pub(crate) struct Pumps {
    pid: i32,
    handles: Vec<JoinHandle<()>>,
}

impl Pumps {
    /// Waits for every byte to reach its sinks.
    pub async fn drain(self) {
        for mut pump in self.handles {
            if timeout(DRAIN_TIMEOUT, &mut pump).await.is_err() {
                tracing::warn!(pid = self.pid, "output still open after exit, detaching");
                pump.abort();
            }
        }
    }
}

/// Final state of an exited process.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub exit_code: i32,
    pub successful: bool,
    pub timeout: bool,
    pub result: Result<i32>,
}

/// Spawns the resolved command in its own session and wires up its standard
/// streams.
pub(crate) fn start(resolved: Resolved, opts: &CreateOptions) -> Result<Spawned> {
    let Resolved {
        mut command,
        argv,
        deadline,
    } = resolved;

    let mut child = command.spawn()?;

    let pid = child
        .id()
        .and_then(|pid| libc::pid_t::try_from(pid).ok())
        .ok_or_else(|| Error::State(format!("spawned `{}` has no pid", argv[0])))?;

    let mut pumps = Vec::with_capacity(3);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, opts.output.stdout_targets())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, opts.output.stderr_targets())));
    }
    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), opts.standard_input.clone()) {
        tokio::spawn(async move {
            if let Err(err) = stdin.write_all(&input).await {
                tracing::debug!(pid, "failed to write standard input: {err}");
            }
        });
    }

    tracing::debug!(pid, ?argv, "process started");

    Ok(Spawned {
        child,
        pid,
        deadline,
        pumps,
    })
}

async fn pump<R>(reader: R, targets: Vec<Sink>)
where
    R: AsyncRead + Unpin,
{
    let mut stream = ReaderStream::new(BufReader::new(reader));
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else {
            break;
        };
        for target in &targets {
            if let Err(err) = target.write_chunk(&chunk) {
                tracing::debug!("dropping output chunk: {err}");
            }
        }
    }
}

/// Waits for exit, killing the process if the deadline passes first.
pub(crate) async fn wait_for_exit(
    child: &mut Child,
    deadline: Option<Instant>,
) -> std::io::Result<ExitStatus> {
    if let Some(deadline) = deadline {
        tokio::select! {
            status = child.wait() => return status,
            () = sleep_until(deadline) => kill_on_deadline(child),
        }
    }
    child.wait().await
}

pub(crate) fn kill_on_deadline(child: &mut Child) {
    tracing::debug!(pid = ?child.id(), "deadline reached, killing process");
    if let Err(err) = child.start_kill() {
        tracing::warn!("failed to kill timed out process: {err}");
    }
}

/// Interprets an exit status. A SIGKILL at or after the deadline counts as a
/// timeout; any other signal is reported through the exit code.
pub(crate) fn outcome(status: std::io::Result<ExitStatus>, deadline: Option<Instant>) -> Outcome {
    let status = match status {
        Ok(status) => status,
        Err(err) => {
            return Outcome {
                exit_code: -1,
                successful: false,
                timeout: false,
                result: Err(err.into()),
            }
        }
    };

    let (exit_code, signal) = match (status.code(), status.signal()) {
        (Some(code), _) => (code, None),
        (None, Some(signal)) => (signal, Some(signal)),
        (None, None) => (-1, None),
    };
    let timeout =
        signal == Some(libc::SIGKILL) && deadline.is_some_and(|d| Instant::now() >= d);

    let result = if status.success() {
        Ok(0)
    } else if timeout {
        Err(Error::Timeout { exit_code })
    } else {
        Err(Error::Execution {
            exit_code,
            message: status.to_string(),
        })
    };

    Outcome {
        exit_code,
        successful: status.success(),
        timeout,
        result,
    }
}
