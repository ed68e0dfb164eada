//! Engine gateway backed by the engine's command-line client.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;

use super::{ContainerEngine, LineHandler};
use crate::error::{AppError, Result};

/// Invokes `<program> <args...>` as a child process.
#[derive(Debug, Clone)]
pub struct CliEngine {
    program: String,
}

impl CliEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, args: &[String], cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut line = self.program.clone();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn spawn_error(&self, args: &[String], err: &std::io::Error) -> AppError {
        AppError::process(format!(
            "Failed to start `{}`: {}",
            self.command_line(args),
            err
        ))
    }
}

#[async_trait]
impl ContainerEngine for CliEngine {
    fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[String], cwd: &Path) -> Result<()> {
        self.run_captured(args, cwd).await.map(|_| ())
    }

    async fn run_captured(&self, args: &[String], cwd: &Path) -> Result<String> {
        log::debug!("Running {}", self.command_line(args));
        let output = self
            .command(args, cwd)
            .output()
            .await
            .map_err(|e| self.spawn_error(args, &e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout
            } else {
                stderr
            };
            return Err(AppError::process_exit(
                &self.command_line(args),
                output.status.code(),
                &detail,
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_streaming(
        &self,
        args: &[String],
        cwd: &Path,
        on_line: LineHandler<'_>,
    ) -> Result<()> {
        log::debug!("Streaming {}", self.command_line(args));
        let mut child = self
            .command(args, cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(args, &e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::process("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::process("Failed to capture stderr"))?;

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut captured_stderr: Vec<String> = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => on_line(&line),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        log::warn!("Failed to read stdout of {}: {}", self.program, e);
                        stdout_open = false;
                    }
                },
                line = stderr_lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        captured_stderr.push(line);
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        log::warn!("Failed to read stderr of {}: {}", self.program, e);
                        stderr_open = false;
                    }
                },
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AppError::process(format!("Failed to wait for {}: {}", self.program, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(AppError::process_exit(
                &self.command_line(args),
                status.code(),
                &captured_stderr.join("\n"),
            ))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::engine::args;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn streaming_failure_carries_stderr() {
        let engine = CliEngine::new("sh");
        let lines = Mutex::new(Vec::new());
        let on_line = |line: &str| lines.lock().unwrap().push(line.to_string());

        let err = engine
            .run_streaming(
                &args(&["-c", "echo starting; echo boom 1>&2; exit 1"]),
                Path::new("."),
                &on_line,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Process);
        assert!(err.to_string().contains("boom"), "{}", err);
        assert_eq!(err.detail("exit_code"), Some("1"));
        let lines = lines.lock().unwrap();
        assert!(lines.contains(&"starting".to_string()));
        assert!(lines.contains(&"boom".to_string()));
    }

    #[tokio::test]
    async fn streaming_success_delivers_lines_in_order() {
        let engine = CliEngine::new("sh");
        let lines = Mutex::new(Vec::new());
        let on_line = |line: &str| lines.lock().unwrap().push(line.to_string());

        engine
            .run_streaming(&args(&["-c", "echo one; echo two"]), Path::new("."), &on_line)
            .await
            .unwrap();

        assert_eq!(*lines.lock().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn captured_returns_stdout() {
        let engine = CliEngine::new("sh");
        let out = engine
            .run_captured(&args(&["-c", "echo hello"]), Path::new("."))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn run_uses_stdout_when_stderr_is_empty() {
        let engine = CliEngine::new("sh");
        let err = engine
            .run(&args(&["-c", "echo only-stdout; exit 3"]), Path::new("."))
            .await
            .unwrap_err();
        assert_eq!(err.detail("exit_code"), Some("3"));
        assert_eq!(err.detail("stderr"), Some("only-stdout"));
    }

    #[tokio::test]
    async fn missing_program_is_a_process_error() {
        let engine = CliEngine::new("definitely-not-an-engine-binary");
        let err = engine
            .run(&args(&["--version"]), Path::new("."))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Process);
    }
}
