//! Shared integration-test harness for spawning a `rupture` server as a
//! child process.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

/// How long to wait for the server to report its listening address.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A running `rupture serve` process bound to an ephemeral port.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
#[allow(clippy::missing_panics_doc)]
pub struct RuptureProcess {
    child: Child,
    stderr: BufReader<ChildStderr>,
    pub base_url: String,
    pub client: reqwest::Client,
}

impl RuptureProcess {
    /// Spawns `rupture serve` on `127.0.0.1:0` with extra arguments.
    ///
    /// Reads stderr until the "WebSocket server listening" line to
    /// discover the port.
    pub async fn start(extra_args: &[&str]) -> Self {
        let bin = env!("CARGO_BIN_EXE_rupture");
        let mut child = Command::new(bin)
            .args(["serve", "--bind", "127.0.0.1:0", "-v"])
            .args(extra_args)
            .env_remove("RUPTURE_LOG_LEVEL")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn rupture");

        let stderr = child.stderr.take().expect("stderr not captured");
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        let mut port: Option<u16> = None;

        let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            line.clear();
            let read = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
                .await
                .expect("timed out waiting for server startup")
                .expect("failed to read stderr");

            assert!(read > 0, "server exited before printing listening address");

            if line.contains("listening") {
                if let Some(addr_start) = line.find("127.0.0.1:") {
                    let after_host = &line[addr_start + "127.0.0.1:".len()..];
                    let port_str: String = after_host
                        .chars()
                        .take_while(char::is_ascii_digit)
                        .collect();
                    port = port_str.parse().ok();
                }
                break;
            }
        }

        let port = port.expect("failed to discover server port from stderr");
        Self {
            child,
            stderr: reader,
            base_url: format!("http://127.0.0.1:{port}"),
            client: reqwest::Client::new(),
        }
    }

    /// GETs a path relative to the server root.
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .expect("failed to send HTTP request")
    }

    /// Process id of the child.
    pub fn pid(&self) -> u32 {
        self.child.id().expect("child already reaped")
    }

    /// Waits for the process to exit and returns its exit code.
    pub async fn wait(mut self) -> Option<i32> {
        let status = tokio::time::timeout(Duration::from_secs(10), self.child.wait())
            .await
            .expect("server did not exit in time")
            .expect("failed to wait on child");
        status.code()
    }

    /// Waits for the process to exit and returns its exit code together
    /// with everything it wrote to stderr after startup.
    pub async fn wait_with_stderr(mut self) -> (Option<i32>, String) {
        let mut rest = String::new();
        tokio::time::timeout(
            Duration::from_secs(10),
            tokio::io::AsyncReadExt::read_to_string(&mut self.stderr, &mut rest),
        )
        .await
        .expect("server did not close stderr in time")
        .expect("failed to read stderr");
        let code = self.wait().await;
        (code, rest)
    }

    /// Kills the server.
    pub async fn shutdown(mut self) {
        let _ = self.child.kill().await;
    }

    /// Runs the binary to completion with the given arguments.
    pub fn spawn_command(args: &[&str]) -> Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_rupture"))
            .args(args)
            .env_remove("RUPTURE_CONFIG")
            .output()
            .expect("failed to run rupture")
    }

    /// Path of a file under `tests/fixtures`.
    pub fn fixture_path(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }
}

/// Sends `signal` (e.g. `"TERM"`, `"INT"`) to a process via `kill(1)`.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: &str) {
    let status = std::process::Command::new("kill")
        .args([format!("-{signal}"), pid.to_string()])
        .status()
        .expect("failed to run kill");
    assert!(status.success(), "kill -{signal} {pid} failed");
}
