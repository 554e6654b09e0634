use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Classified ptrace stop, one per `waitpid` return.
///
/// `PTRACE_EVENT_EXIT` and `PTRACE_EVENT_STOP` never appear here: we do not
/// enable the former and never group-stop tracees ourselves, so observing
/// either is a kernel-invariant violation and classification fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    /// Pre-syscall stop raised by the seccomp filter; the event message
    /// carries the syscall number matched by the filter.
    Seccomp,
    /// Syscall-trap stop (`SIGTRAP | 0x80`), only seen when the previous
    /// resume used `PTRACE_SYSCALL`.
    SyscallStop,
    Fork,
    Vfork,
    CloneEvent,
    Exec,
    /// A signal was intercepted before delivery to the tracee.
    SignalStop(Signal),
    Exited(i32),
    KilledBySignal(Signal),
}

impl StopEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StopEvent::Seccomp => "seccomp",
            StopEvent::SyscallStop => "syscall-trap",
            StopEvent::Fork => "fork",
            StopEvent::Vfork => "vfork",
            StopEvent::CloneEvent => "clone",
            StopEvent::Exec => "exec",
            StopEvent::SignalStop(_) => "signal-stop",
            StopEvent::Exited(_) => "exited",
            StopEvent::KilledBySignal(_) => "killed-by-signal",
        }
    }
}

impl std::fmt::Display for StopEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Classify a raw wait status into a `StopEvent`.
///
/// Ptrace event codes are packed into the high bits of the status word and
/// must be tested before generic signal-stop classification; `nix` has
/// already split them into `PtraceEvent`, so the match below only has to
/// keep exit / event / syscall-trap / signal in that order.
pub fn classify(status: WaitStatus) -> Result<(Pid, StopEvent)> {
    match status {
        WaitStatus::Exited(pid, code) => Ok((pid, StopEvent::Exited(code))),
        WaitStatus::PtraceEvent(pid, _, event) => match event {
            libc::PTRACE_EVENT_EXEC => Ok((pid, StopEvent::Exec)),
            libc::PTRACE_EVENT_CLONE => Ok((pid, StopEvent::CloneEvent)),
            libc::PTRACE_EVENT_VFORK => Ok((pid, StopEvent::Vfork)),
            libc::PTRACE_EVENT_FORK => Ok((pid, StopEvent::Fork)),
            libc::PTRACE_EVENT_SECCOMP => Ok((pid, StopEvent::Seccomp)),
            libc::PTRACE_EVENT_EXIT => Err(Error::UnexpectedStop {
                pid,
                what: "ptrace exit-event".into(),
            }),
            libc::PTRACE_EVENT_STOP => Err(Error::UnexpectedStop {
                pid,
                what: "ptrace group-stop event".into(),
            }),
            other => Err(Error::UnexpectedStop {
                pid,
                what: format!("ptrace event {other}"),
            }),
        },
        WaitStatus::PtraceSyscall(pid) => Ok((pid, StopEvent::SyscallStop)),
        WaitStatus::Stopped(pid, signal) => Ok((pid, StopEvent::SignalStop(signal))),
        WaitStatus::Signaled(pid, signal, _) => Ok((pid, StopEvent::KilledBySignal(signal))),
        other => Err(Error::UnexpectedStop {
            pid: Pid::from_raw(-1),
            what: format!("{other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid() -> Pid {
        Pid::from_raw(1234)
    }

    #[test]
    fn classifies_exit() {
        let (p, ev) = classify(WaitStatus::Exited(pid(), 7)).unwrap();
        assert_eq!(p, pid());
        assert_eq!(ev, StopEvent::Exited(7));
    }

    #[test]
    fn classifies_ptrace_events() {
        let cases = [
            (libc::PTRACE_EVENT_FORK, StopEvent::Fork),
            (libc::PTRACE_EVENT_VFORK, StopEvent::Vfork),
            (libc::PTRACE_EVENT_CLONE, StopEvent::CloneEvent),
            (libc::PTRACE_EVENT_EXEC, StopEvent::Exec),
            (libc::PTRACE_EVENT_SECCOMP, StopEvent::Seccomp),
        ];
        for (code, want) in cases {
            let status = WaitStatus::PtraceEvent(pid(), Signal::SIGTRAP, code);
            assert_eq!(classify(status).unwrap().1, want);
        }
    }

    #[test]
    fn syscall_trap_beats_plain_signal_stop() {
        // TRACESYSGOOD marks syscall traps; a plain SIGTRAP stop is an
        // ordinary intercepted signal.
        let trap = classify(WaitStatus::PtraceSyscall(pid())).unwrap().1;
        assert_eq!(trap, StopEvent::SyscallStop);

        let stop = classify(WaitStatus::Stopped(pid(), Signal::SIGTRAP)).unwrap().1;
        assert_eq!(stop, StopEvent::SignalStop(Signal::SIGTRAP));
    }

    #[test]
    fn classifies_termination_by_signal() {
        let status = WaitStatus::Signaled(pid(), Signal::SIGUSR1, false);
        assert_eq!(
            classify(status).unwrap().1,
            StopEvent::KilledBySignal(Signal::SIGUSR1)
        );
    }

    #[test]
    fn exit_event_is_fatal() {
        let status = WaitStatus::PtraceEvent(pid(), Signal::SIGTRAP, libc::PTRACE_EVENT_EXIT);
        assert!(classify(status).is_err());
    }
}
