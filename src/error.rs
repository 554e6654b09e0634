use nix::unistd::Pid;
use thiserror::Error;

/// Everything the supervisor can die from. It recovers from none of these:
/// any inconsistency means a misconfigured filter, an unsupported kernel,
/// or a bug. Syscall failures *inside* a tracee are not errors of ours.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no seccomp filter rule for syscall {name} (#{number})")]
    NoFilterRule { number: u64, name: &'static str },

    #[error("unknown syscall {name} (#{number})")]
    UnknownSyscall { number: u64, name: &'static str },

    #[error("unexpected stop for pid {pid}: {what}")]
    UnexpectedStop { pid: Pid, what: String },

    #[error("fork reconciler expected a fork/vfork event or a signal-stop, got {got} (pid {pid})")]
    ForkRace { pid: Pid, got: &'static str },

    #[error("wait returned pid {got} while waiting for new child {want}")]
    ChildMismatch { want: Pid, got: Pid },

    #[error("pid {pid} missing from the tracee registry")]
    UnknownTracee { pid: Pid },

    #[error("ptrace {request} failed for pid {pid}: {source}")]
    Ptrace {
        request: &'static str,
        pid: Pid,
        #[source]
        source: nix::Error,
    },

    #[error("waitpid failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("memory write at {addr:#x} in pid {pid} failed: {source}")]
    MemoryWrite {
        pid: Pid,
        addr: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fork the traced command: {0}")]
    Spawn(#[source] nix::Error),

    #[error("invalid command: {0:?}")]
    InvalidCommand(String),
}

pub type Result<T> = std::result::Result<T, Error>;
