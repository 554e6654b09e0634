use std::ffi::CString;

use nix::sys::signal::{raise, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};

use crate::error::{Error, Result};
use crate::seccomp;
use crate::tracer::dispatch::{FORCED_ENOSYS, INTERCEPTED};
use crate::tracer::ptracer::Ptracer;

/// Fork the root tracee and bring it to its first stop.
///
/// The child marks itself traced, stops itself so the parent can attach
/// the ptrace options, then installs the seccomp filter and execs. The
/// filter is built before forking so the child allocates nothing between
/// fork and exec.
pub fn spawn_traced(command: &[String]) -> Result<Pid> {
    // The CLI requires at least one command word, so argv is never empty.
    let argv = command
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::InvalidCommand(command.join(" ")))?;

    let filter = seccomp::build_filter(INTERCEPTED, FORCED_ENOSYS);

    match unsafe { fork() }.map_err(Error::Spawn)? {
        ForkResult::Child => run_child(&argv, &filter),
        ForkResult::Parent { child } => {
            // The raise(SIGSTOP) below is the child's first stop.
            match waitpid(child, None).map_err(Error::Wait)? {
                WaitStatus::Stopped(_, Signal::SIGSTOP) => {}
                other => {
                    return Err(Error::UnexpectedStop {
                        pid: child,
                        what: format!("{other:?} instead of the initial SIGSTOP"),
                    })
                }
            }
            Ptracer::set_options(child)?;
            Ok(child)
        }
    }
}

fn run_child(argv: &[CString], filter: &[libc::sock_filter]) -> ! {
    // Any failure here is reported on stderr; the supervisor sees the
    // child exit with 127 like a failed exec.
    if let Err(e) = nix::sys::ptrace::traceme() {
        eprintln!("detbox: ptrace traceme failed: {e}");
        std::process::exit(127);
    }
    if let Err(e) = raise(Signal::SIGSTOP) {
        eprintln!("detbox: failed to stop for the tracer: {e}");
        std::process::exit(127);
    }

    // Resumed: the tracer is attached and its options are set, so TRACE
    // rules fire as seccomp events from here on.
    if let Err(e) = seccomp::install(filter) {
        eprintln!("detbox: seccomp filter install failed: {e}");
        std::process::exit(127);
    }

    if let Err(err) = execvp(&argv[0], argv) {
        eprintln!(
            "detbox: failed to execute {}: {err}",
            argv[0].to_string_lossy()
        );
    }
    std::process::exit(127);
}
