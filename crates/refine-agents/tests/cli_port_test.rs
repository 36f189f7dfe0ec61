//! CliReasoningPort against stand-in executables.
//!
//! Each case writes a small shell script that plays the reasoning CLI. The
//! cases run inside one test so no other test thread forks while a script is
//! still open for writing.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use refine_agents::cli_port::CliReasoningPort;
use refine_agents::{ReasoningError, ReasoningPort};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn port(path: &Path, timeout: Duration) -> CliReasoningPort {
    CliReasoningPort::new(path.to_string_lossy(), timeout)
}

#[tokio::test]
async fn cli_port_maps_process_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let timeout = Duration::from_secs(10);

    // Prompt arrives on stdin, model selector in argv.
    let echo = write_script(dir.path(), "echo.sh", "echo \"args: $*\"\ncat");
    let out = port(&echo, timeout)
        .invoke("prove the lemma", "opus")
        .await
        .unwrap();
    assert!(out.starts_with("args: --model opus --print -"), "{out}");
    assert!(out.ends_with("prove the lemma"), "{out}");

    let failing = write_script(
        dir.path(),
        "fail.sh",
        "cat >/dev/null\necho boom >&2\nexit 3",
    );
    let err = port(&failing, timeout).invoke("x", "opus").await.unwrap_err();
    assert_eq!(
        err,
        ReasoningError::Failed {
            code: Some(3),
            diagnostic: "boom".into()
        }
    );

    let limited = write_script(
        dir.path(),
        "limit.sh",
        "cat >/dev/null\necho 'Limit reached - resets 5pm'\nexit 1",
    );
    let err = port(&limited, timeout).invoke("x", "opus").await.unwrap_err();
    assert!(err.is_rate_limited(), "{err:?}");

    let silent = write_script(dir.path(), "silent.sh", "cat >/dev/null");
    let err = port(&silent, timeout).invoke("x", "opus").await.unwrap_err();
    assert!(matches!(err, ReasoningError::NoResponse(_)), "{err:?}");

    let slow = write_script(dir.path(), "slow.sh", "exec sleep 5");
    let err = port(&slow, Duration::from_millis(200))
        .invoke("x", "opus")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ReasoningError::NoResponse("timed out after 200ms".into())
    );

    let missing = dir.path().join("does-not-exist");
    let err = port(&missing, timeout).invoke("x", "opus").await.unwrap_err();
    assert!(err.is_fatal_everywhere(), "{err:?}");
}
