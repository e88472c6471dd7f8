// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Subprocess runner shared by the CLI-based engines.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use super::ScanContext;
use crate::errors::{EngineError, ScannerError, ScannerResult};

/// Output of a finished engine process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    pub success: bool,
}

impl ProcessOutput {
    /// Turn a non-zero exit into an engine crash
    pub fn into_success(self, engine: &str) -> ScannerResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(EngineError::Crashed {
                engine: engine.to_string(),
                code: self.code,
                stderr: truncate(self.stderr.trim(), 2_000),
            }
            .into())
        }
    }
}

/// Spawn `program`, stream stdout line by line into `on_line`, and wait for
/// it to exit. Cancellation and the context timeout kill the child.
pub async fn run_streaming<F>(
    engine: &str,
    program: &str,
    args: &[String],
    ctx: &ScanContext,
    mut on_line: F,
) -> ScannerResult<ProcessOutput>
where
    F: FnMut(&str) + Send,
{
    debug!(engine = engine, program = program, args = ?args, scan_id = %ctx.scan_id, "Spawning engine process");

    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(engine, program, e))?;

    let stdout = child.stdout.take().ok_or_else(|| EngineError::Crashed {
        engine: engine.to_string(),
        code: None,
        stderr: "stdout pipe unavailable".to_string(),
    })?;

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        })
    });

    let deadline = tokio::time::sleep(ctx.timeout);
    tokio::pin!(deadline);

    let mut lines = BufReader::new(stdout).lines();
    let mut collected = String::new();

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                debug!(engine = engine, scan_id = %ctx.scan_id, "Engine process cancelled");
                return Err(ScannerError::Cancelled(ctx.scan_id));
            }
            _ = &mut deadline => {
                warn!(engine = engine, scan_id = %ctx.scan_id, timeout = ?ctx.timeout, "Engine process timed out");
                return Err(timeout_error(engine, ctx.timeout));
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    on_line(&line);
                    collected.push_str(&line);
                    collected.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(EngineError::MalformedOutput {
                        engine: engine.to_string(),
                        reason: format!("failed reading stdout: {}", e),
                    }
                    .into());
                }
            }
        }
    }

    let status = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(ScannerError::Cancelled(ctx.scan_id)),
        _ = &mut deadline => return Err(timeout_error(engine, ctx.timeout)),
        status = child.wait() => status.map_err(|e| EngineError::Crashed {
            engine: engine.to_string(),
            code: None,
            stderr: e.to_string(),
        })?,
    };

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    Ok(ProcessOutput {
        stdout: collected,
        stderr,
        code: status.code(),
        success: status.success(),
    })
}

/// Run `program args` briefly and report whether it exits cleanly
pub async fn probe(program: &str, args: &[&str]) -> bool {
    let output = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(Duration::from_secs(10), output).await {
        Ok(Ok(status)) => status.success(),
        _ => false,
    }
}

fn spawn_error(engine: &str, program: &str, err: io::Error) -> ScannerError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => EngineError::NotInstalled {
            engine: engine.to_string(),
            reason: format!("{}: {}", program, err),
        }
        .into(),
        _ => EngineError::Crashed {
            engine: engine.to_string(),
            code: None,
            stderr: format!("failed to spawn {}: {}", program, err),
        }
        .into(),
    }
}

fn timeout_error(engine: &str, timeout: Duration) -> ScannerError {
    EngineError::Timeout {
        engine: engine.to_string(),
        timeout,
    }
    .into()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::scanners::ProgressSink;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx(timeout: Duration) -> ScanContext {
        ScanContext::new(
            Uuid::new_v4(),
            ProgressSink::detached(),
            CancellationToken::new(),
            timeout,
        )
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_streams_lines_and_captures_exit() {
        let mut seen = Vec::new();
        let out = run_streaming("sh", "sh", &sh("echo one; echo two; echo err >&2"), &ctx(Duration::from_secs(5)), |l| {
            seen.push(l.to_string())
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["one", "two"]);
        assert!(out.success);
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_crash() {
        let out = run_streaming("sh", "sh", &sh("echo fatal >&2; exit 3"), &ctx(Duration::from_secs(5)), |_| {})
            .await
            .unwrap();

        match out.into_success("sh") {
            Err(ScannerError::Engine(EngineError::Crashed { code, stderr, .. })) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "fatal");
            }
            other => panic!("expected crash, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_installed() {
        let err = run_streaming("ghost", "/nonexistent/ghost-engine", &[], &ctx(Duration::from_secs(5)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::Engine(EngineError::NotInstalled { .. })));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let err = run_streaming("sh", "sh", &sh("sleep 30"), &ctx(Duration::from_millis(100)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::Engine(EngineError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_stops_process() {
        let c = ctx(Duration::from_secs(30));
        let token = c.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = run_streaming("sh", "sh", &sh("sleep 30"), &c, |_| {}).await.unwrap_err();
        assert!(matches!(err, ScannerError::Cancelled(_)));
    }
}
