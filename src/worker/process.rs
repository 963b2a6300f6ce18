use std::fs::File;
use std::io::Write;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::scheduler::job::JobSpec;

/// Live OS process backing one running job.
///
/// Owned exclusively by the scheduler entry that tracks it; dropped after a
/// reap or a kill. A killed child that is dropped before its exit has been
/// observed is reaped by the runtime in the background.
#[derive(Debug)]
pub struct JobProcess {
    child: Child,
}

impl JobProcess {
    /// Non-blocking exit poll. Returns `Some(code)` once the process has
    /// exited, `None` while it is still running.
    pub fn poll_exit(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    /// Ask the OS to terminate the process. Returns once the kill has been
    /// issued; the exit itself is observed later (or not at all, if the
    /// handle is dropped first).
    pub fn terminate(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Collapse an exit status to a single code. A signal death is reported as
/// the negated signal number, mirroring what callers of the original poll
/// interface see on POSIX systems.
fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// Start the OS process for `spec`.
///
/// Failures here are contained: the error is written into whichever of the
/// job's stdout/stderr files was already open (stdout when both are) and
/// `None` is returned, so the caller degrades the job to `Failed` instead of
/// unwinding the dispatch loop.
pub fn spawn_job(spec: &JobSpec) -> Option<JobProcess> {
    match try_spawn(spec) {
        Ok(child) => Some(JobProcess { child }),
        Err(failure) => {
            tracing::warn!(
                job_id = %spec.id,
                error = %failure.cause,
                "Job process could not be started"
            );
            failure.report(spec);
            None
        }
    }
}

struct SpawnFailure {
    cause: std::io::Error,
    /// Stream the failure report goes to, when one was opened in time.
    sink: Option<File>,
}

impl SpawnFailure {
    fn new(cause: std::io::Error, sink: Option<File>) -> Self {
        Self { cause, sink }
    }

    fn report(mut self, spec: &JobSpec) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = writeln!(
                sink,
                "could not start job '{}': {}",
                spec.command.join(" "),
                self.cause
            );
            let _ = sink.flush();
        }
    }
}

fn try_spawn(spec: &JobSpec) -> Result<Child, SpawnFailure> {
    let Some(program) = spec.command.first() else {
        return Err(SpawnFailure::new(
            std::io::Error::other("empty command"),
            None,
        ));
    };

    let stdout_file = match &spec.stdout_path {
        Some(path) => match File::create(path) {
            Ok(file) => Some(file),
            Err(e) => return Err(SpawnFailure::new(e, None)),
        },
        None => None,
    };

    let stderr_file = if spec.join_stderrout {
        match stdout_file.as_ref().map(File::try_clone).transpose() {
            Ok(clone) => clone,
            Err(e) => return Err(SpawnFailure::new(e, stdout_file)),
        }
    } else {
        match &spec.stderr_path {
            Some(path) => match File::create(path) {
                Ok(file) => Some(file),
                Err(e) => return Err(SpawnFailure::new(e, stdout_file)),
            },
            None => None,
        }
    };

    let stdin_file = match &spec.stdin_path {
        Some(path) => match File::open(path) {
            Ok(file) => Some(file),
            // Report onto stderr when it is a separate stream, else stdout.
            Err(e) => {
                let sink = stderr_file
                    .filter(|_| !spec.join_stderrout)
                    .or(stdout_file);
                return Err(SpawnFailure::new(e, sink));
            }
        },
        None => None,
    };

    let mut cmd = Command::new(program);
    cmd.args(&spec.command[1..]);
    if let Some(dir) = &spec.working_directory {
        cmd.current_dir(dir);
    }
    if let Some(env) = &spec.env {
        cmd.env_clear();
        cmd.envs(env.iter().cloned());
    }
    cmd.stdout(stdio_of(&stdout_file));
    cmd.stderr(stdio_of(&stderr_file));
    cmd.stdin(match stdin_file {
        Some(file) => Stdio::from(file),
        None => Stdio::null(),
    });

    cmd.spawn().map_err(|e| {
        let sink = stderr_file
            .filter(|_| !spec.join_stderrout)
            .or(stdout_file);
        SpawnFailure::new(e, sink)
    })
}

fn stdio_of(file: &Option<File>) -> Stdio {
    match file {
        Some(f) => match f.try_clone() {
            Ok(clone) => Stdio::from(clone),
            Err(_) => Stdio::null(),
        },
        None => Stdio::null(),
    }
}
