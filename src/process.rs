//! Bounded external-process runner.
//!
//! Every external tool (diagram CLI, HTML→PDF CLI, document converter) is
//! started through [`ToolRunner`]. The production implementation,
//! [`ProcessRunner`], enforces a hard time budget, kills the child when the
//! budget expires, and spawns with `kill_on_drop` so a render future dropped
//! by its caller takes its children down with it.
//!
//! [`run_file_tool`] is the file-staging layer on top: it writes inputs into
//! a private temp directory, expands `{input}` / `{output}` / custom
//! placeholders in the argument template, runs the tool and reads the output.

use crate::config::ToolCommand;
use crate::error::ToolError;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest stderr excerpt kept in a [`ToolError::NonZeroExit`].
const STDERR_EXCERPT: usize = 600;

/// One external process run.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

/// Captured output of a successful run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub elapsed_ms: u64,
}

/// Starts external tools. Swappable so tests can run without real binaries.
pub trait ToolRunner: Send + Sync {
    /// Run to completion or until `invocation.timeout` expires.
    fn run(&self, invocation: ToolInvocation) -> BoxFuture<'_, Result<ToolOutput, ToolError>>;

    /// Whether `program` can be started at all.
    fn is_installed(&self, program: &str) -> bool;
}

/// [`ToolRunner`] backed by real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: ToolInvocation) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(run_bounded(invocation))
    }

    fn is_installed(&self, program: &str) -> bool {
        find_executable(program).is_some()
    }
}

async fn run_bounded(inv: ToolInvocation) -> Result<ToolOutput, ToolError> {
    let start = Instant::now();
    let program = inv.program.clone();
    debug!("Running {} {:?} (timeout {:?})", program, inv.args, inv.timeout);

    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .stdin(if inv.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &inv.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotFound {
                program: program.clone(),
            }
        } else {
            ToolError::Spawn {
                program: program.clone(),
                detail: e.to_string(),
            }
        }
    })?;

    // Feed stdin and drain both pipes concurrently so a chatty child can
    // never block on a full pipe.
    if let (Some(input), Some(mut stdin)) = (inv.stdin, child.stdin.take()) {
        tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
        });
    }
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(s) = stdout.as_mut() {
            s.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(s) = stderr.as_mut() {
            s.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    });

    let status = match tokio::time::timeout(inv.timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            stdout_task.abort();
            stderr_task.abort();
            return Err(ToolError::Io {
                program,
                detail: e.to_string(),
            });
        }
        Err(_) => {
            warn!("{} exceeded {:?}, killing", program, inv.timeout);
            // kill() also reaps the child.
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", program, e);
            }
            stdout_task.abort();
            stderr_task.abort();
            return Err(ToolError::Timeout {
                program,
                timeout_ms: inv.timeout.as_millis() as u64,
            });
        }
    };

    let io_err = |e: String| ToolError::Io {
        program: program.clone(),
        detail: e,
    };
    let stdout = stdout_task
        .await
        .map_err(|e| io_err(e.to_string()))?
        .map_err(|e| io_err(e.to_string()))?;
    let stderr_bytes = stderr_task
        .await
        .map_err(|e| io_err(e.to_string()))?
        .map_err(|e| io_err(e.to_string()))?;
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();
    let elapsed_ms = start.elapsed().as_millis() as u64;

    if !status.success() {
        return Err(ToolError::NonZeroExit {
            program,
            status: status.to_string(),
            stderr: excerpt(&stderr),
        });
    }

    debug!("{} finished in {}ms", program, elapsed_ms);
    Ok(ToolOutput {
        stdout,
        stderr,
        elapsed_ms,
    })
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_EXCERPT {
        return trimmed.to_string();
    }
    let mut end = STDERR_EXCERPT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

/// Locate `program` the way a shell would: paths are checked directly,
/// bare names are searched on `PATH`.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{program}.exe"));
            if is_executable(&exe) {
                return Some(exe);
            }
        }
        None
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── File-staging layer ───────────────────────────────────────────────────

/// A tool run that communicates through files in a scratch directory.
#[derive(Debug, Clone)]
pub struct FileJob<'a> {
    /// File name for the primary input, substituted for `{input}`.
    pub input_name: &'a str,
    pub input: &'a [u8],
    /// File name the tool is told to write, substituted for `{output}`.
    pub output_name: &'a str,
    /// Extra staged files: `(placeholder, file name, bytes)`, e.g.
    /// `("{reference}", "reference.docx", ..)`.
    pub extra: Vec<(&'a str, &'a str, Vec<u8>)>,
    pub timeout: Duration,
}

/// Stage the job's files, run the tool, and return the output file's bytes.
///
/// Tools that ignore `{output}` and print to stdout are supported: when the
/// output file is absent or empty, non-empty stdout is returned instead.
pub async fn run_file_tool(
    runner: &dyn ToolRunner,
    tool: &ToolCommand,
    job: FileJob<'_>,
) -> Result<Vec<u8>, ToolError> {
    let io_err = |e: std::io::Error| ToolError::Io {
        program: tool.program.clone(),
        detail: e.to_string(),
    };

    let scratch = tempfile::TempDir::new().map_err(io_err)?;
    let input_path = scratch.path().join(job.input_name);
    let output_path = scratch.path().join(job.output_name);
    tokio::fs::write(&input_path, job.input).await.map_err(io_err)?;

    let mut placeholders: HashMap<&str, PathBuf> = HashMap::new();
    placeholders.insert("{input}", input_path);
    placeholders.insert("{output}", output_path.clone());
    for (placeholder, name, bytes) in job.extra {
        let path = scratch.path().join(name);
        tokio::fs::write(&path, &bytes).await.map_err(io_err)?;
        placeholders.insert(placeholder, path);
    }

    let args = expand_args(&tool.args, &placeholders);
    let output = runner
        .run(ToolInvocation {
            program: tool.program.clone(),
            args,
            stdin: None,
            timeout: job.timeout,
            working_dir: Some(scratch.path().to_path_buf()),
        })
        .await?;

    match tokio::fs::read(&output_path).await {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        _ if !output.stdout.is_empty() => Ok(output.stdout),
        _ => Err(ToolError::MissingOutput {
            program: tool.program.clone(),
        }),
    }
}

fn expand_args(template: &[String], placeholders: &HashMap<&str, PathBuf>) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            placeholders
                .iter()
                .fold(arg.clone(), |acc, (key, path)| {
                    if acc.contains(key) {
                        acc.replace(key, &path.to_string_lossy())
                    } else {
                        acc
                    }
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> ToolInvocation {
        ToolInvocation {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            stdin: None,
            timeout,
            working_dir: None,
        }
    }

    #[test]
    fn expand_replaces_embedded_placeholders() {
        let mut map = HashMap::new();
        map.insert("{reference}", PathBuf::from("/tmp/x/ref.docx"));
        map.insert("{output}", PathBuf::from("/tmp/x/out.docx"));
        let args = expand_args(
            &["--reference-doc={reference}".into(), "-o".into(), "{output}".into()],
            &map,
        );
        assert_eq!(
            args,
            vec!["--reference-doc=/tmp/x/ref.docx", "-o", "/tmp/x/out.docx"]
        );
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(STDERR_EXCERPT);
        let e = excerpt(&long);
        assert!(e.ends_with('…'));
        assert!(e.len() <= STDERR_EXCERPT + '…'.len_utf8());
    }

    #[test]
    fn missing_program_is_not_installed() {
        assert!(!ProcessRunner.is_installed("md2doc-definitely-not-a-real-tool"));
        assert!(find_executable("").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn sh_is_installed() {
        assert!(ProcessRunner.is_installed("sh"));
    }

    #[cfg(unix)]
    #[test]
    fn file_without_exec_bit_is_not_installed() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("fake-tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();

        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(find_executable(tool.to_str().unwrap()).is_none());

        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_executable(tool.to_str().unwrap()), Some(tool.clone()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout() {
        let out = ProcessRunner
            .run(sh("printf hello", Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(out.stdout, b"hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwards_stdin() {
        let mut inv = sh("cat", Duration::from_secs(10));
        inv.stdin = Some(b"piped".to_vec());
        let out = ProcessRunner.run(inv).await.unwrap();
        assert_eq!(out.stdout, b"piped");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let err = ProcessRunner
            .run(sh("echo broken >&2; exit 3", Duration::from_secs(10)))
            .await
            .unwrap_err();
        match err {
            ToolError::NonZeroExit { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_program_is_not_found() {
        let err = ProcessRunner
            .run(ToolInvocation {
                program: "md2doc-definitely-not-a-real-tool".into(),
                args: vec![],
                stdin: None,
                timeout: Duration::from_secs(5),
                working_dir: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }), "got: {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_child() {
        let start = Instant::now();
        let err = ProcessRunner
            .run(sh("sleep 30", Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_ms: 200, .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_the_future_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());

        let fut = ProcessRunner.run(sh(&script, Duration::from_secs(60)));
        // The outer timeout drops the in-flight future.
        let _ = tokio::time::timeout(Duration::from_millis(500), fut).await;

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let stat_path = format!("/proc/{}/stat", pid.trim());
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Either fully reaped or a zombie waiting for the reaper.
        if let Ok(stat) = std::fs::read_to_string(&stat_path) {
            let state = stat.rsplit(')').next().unwrap().trim().chars().next();
            assert_eq!(state, Some('Z'), "child still running: {stat}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_tool_reads_output_file() {
        let tool = ToolCommand::new("sh", ["-c", "tr a-z A-Z < \"$0\" > \"$1\"", "{input}", "{output}"]);
        let bytes = run_file_tool(
            &ProcessRunner,
            &tool,
            FileJob {
                input_name: "in.txt",
                input: b"shout",
                output_name: "out.txt",
                extra: vec![],
                timeout: Duration::from_secs(10),
            },
        )
        .await
        .unwrap();
        assert_eq!(bytes, b"SHOUT");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_tool_falls_back_to_stdout() {
        let tool = ToolCommand::new("sh", ["-c", "cat \"$0\"", "{input}"]);
        let bytes = run_file_tool(
            &ProcessRunner,
            &tool,
            FileJob {
                input_name: "in.txt",
                input: b"echoed",
                output_name: "out.txt",
                extra: vec![],
                timeout: Duration::from_secs(10),
            },
        )
        .await
        .unwrap();
        assert_eq!(bytes, b"echoed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_tool_without_output_errors() {
        let tool = ToolCommand::new("sh", ["-c", "true"]);
        let err = run_file_tool(
            &ProcessRunner,
            &tool,
            FileJob {
                input_name: "in.txt",
                input: b"x",
                output_name: "out.txt",
                extra: vec![],
                timeout: Duration::from_secs(10),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::MissingOutput { .. }));
    }
}
