//! Subprocess execution seam (spec §6 "opaque container CLI is assumed",
//! §9 "container CLI diversity"). Mirrors the teacher's
//! spawn-and-capture idiom (stdout/stderr/exit-code/duration) but behind a
//! trait so the container runtime can be driven by a fake in tests, the way
//! `vulnforge_state::fakes` stands in for real storage backends.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of one subprocess invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one program invocation, optionally feeding `stdin` (used for PoC
/// injection via `docker exec -i`, spec §4.7 step 5).
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> std::io::Result<CommandOutput>;
}

/// Real subprocess execution via `tokio::process::Command`.
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> std::io::Result<CommandOutput> {
        let start = Instant::now();
        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if stdin.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command.spawn()?;
        if let Some(bytes) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(bytes).await?;
            }
        }
        let output = child.wait_with_output().await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration_ms,
        })
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Records every invocation and replays scripted outputs in order,
    /// mirroring `vulnforge_state::fakes`' in-memory-store pattern.
    pub struct FakeProcessRunner {
        scripted: Mutex<Vec<CommandOutput>>,
        pub calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeProcessRunner {
        pub fn new(scripted: Vec<CommandOutput>) -> Self {
            Self { scripted: Mutex::new(scripted), calls: Mutex::new(Vec::new()) }
        }

        pub fn always_ok() -> Self {
            Self::new(vec![CommandOutput { exit_code: 0, ..Default::default() }])
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeProcessRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            _stdin: Option<&[u8]>,
        ) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push((program.to_string(), args.to_vec()));
            let mut scripted = self.scripted.lock().unwrap();
            if scripted.len() > 1 {
                Ok(scripted.remove(0))
            } else {
                Ok(scripted.first().cloned().unwrap_or_default())
            }
        }
    }
}
