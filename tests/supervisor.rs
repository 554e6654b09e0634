use std::process::Command;

/// Run detbox with the given sandboxed command and return
/// (exit_code, stdout, stderr).
fn run_detbox(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_detbox"))
        .args(args)
        .output()
        .expect("failed to execute detbox");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    (code, stdout, stderr)
}

#[test]
fn true_exits_zero() {
    let (code, _stdout, stderr) = run_detbox(&["/bin/true"]);
    assert_eq!(code, 0, "expected exit code 0 for /bin/true; stderr: {stderr}");
}

#[test]
fn exit_status_propagates() {
    // The tracee's only interesting syscall is exit_group(7); the
    // supervisor must report 7 as its own exit code.
    let (code, _stdout, _stderr) = run_detbox(&["/bin/sh", "-c", "exit 7"]);
    assert_eq!(code, 7);
}

#[test]
fn stdout_passes_through() {
    let (code, stdout, _stderr) = run_detbox(&["/bin/sh", "-c", "echo hello"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("hello"), "stdout was: {stdout:?}");
}

#[test]
fn fork_workload_completes() {
    // sh forks for the external command, so this exercises the fork
    // reconciler, the ancestor stack, and child-first scheduling.
    let (code, stdout, stderr) = run_detbox(&["/bin/sh", "-c", "/bin/echo forked"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("forked"));
}

#[test]
fn nested_forks_complete() {
    let (code, stdout, _stderr) =
        run_detbox(&["/bin/sh", "-c", "/bin/sh -c '/bin/echo deep'"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("deep"));
}

#[test]
fn fatal_signal_is_forwarded() {
    // The shell raises SIGUSR1 on itself with no handler installed; the
    // supervisor must deliver it and report the termination as 128+10.
    let (code, _stdout, _stderr) = run_detbox(&["/bin/sh", "-c", "kill -USR1 $$"]);
    assert_eq!(code, 128 + libc::SIGUSR1);
}

#[test]
fn missing_command_exits_127() {
    let (code, _stdout, _stderr) = run_detbox(&["/nonexistent/really-not-here"]);
    assert_eq!(code, 127);
}

#[test]
fn rejects_empty_invocation() {
    let output = Command::new(env!("CARGO_BIN_EXE_detbox"))
        .output()
        .expect("failed to execute detbox");
    assert!(!output.status.success());
}
