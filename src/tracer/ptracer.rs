use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// How a stopped tracee is resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// `PTRACE_CONT`: run until the next seccomp event, ptrace event, or
    /// signal. The common case when the seccomp filter drives interception.
    Continue,
    /// `PTRACE_SYSCALL`: additionally stop at the next syscall boundary.
    /// Used to reach the syscall-exit stop for post-hooks.
    SyscallTrap,
}

/// Thin capability over ptrace: resume tracees, fetch event messages, and
/// read or rewrite the register file of the most recently inspected tracee.
///
/// Registers are cached by `update`; the accessors below read that cache,
/// so callers must refresh before consuming them for a newly stopped pid.
pub struct Ptracer {
    regs: libc::user_regs_struct,
}

impl Ptracer {
    pub fn new() -> Self {
        Self {
            regs: unsafe { std::mem::zeroed() },
        }
    }

    /// Options applied to every tracee. `TRACESYSGOOD` makes syscall traps
    /// distinguishable from ordinary SIGTRAPs; the event options cover the
    /// whole fork family plus exec and seccomp. New children inherit them.
    pub fn set_options(pid: Pid) -> Result<()> {
        let options = ptrace::Options::PTRACE_O_TRACESYSGOOD
            | ptrace::Options::PTRACE_O_TRACEFORK
            | ptrace::Options::PTRACE_O_TRACEVFORK
            | ptrace::Options::PTRACE_O_TRACECLONE
            | ptrace::Options::PTRACE_O_TRACEEXEC
            | ptrace::Options::PTRACE_O_TRACESECCOMP;
        ptrace::setoptions(pid, options).map_err(|source| Error::Ptrace {
            request: "SETOPTIONS",
            pid,
            source,
        })
    }

    /// Resume `pid`, injecting `signal` if one is pending for it.
    pub fn resume(&self, pid: Pid, mode: ResumeMode, signal: Option<Signal>) -> Result<()> {
        match mode {
            ResumeMode::Continue => {
                ptrace::cont(pid, signal).map_err(|source| Error::Ptrace {
                    request: "CONT",
                    pid,
                    source,
                })
            }
            ResumeMode::SyscallTrap => {
                ptrace::syscall(pid, signal).map_err(|source| Error::Ptrace {
                    request: "SYSCALL",
                    pid,
                    source,
                })
            }
        }
    }

    /// Event message of the last ptrace event-stop: the new child's pid for
    /// fork-family events, the filter's return data for seccomp events.
    pub fn event_message(&self, pid: Pid) -> Result<u64> {
        ptrace::getevent(pid)
            .map(|msg| msg as u64)
            .map_err(|source| Error::Ptrace {
                request: "GETEVENTMSG",
                pid,
                source,
            })
    }

    /// Refresh the register cache from `pid`.
    pub fn update(&mut self, pid: Pid) -> Result<()> {
        self.regs = ptrace::getregs(pid).map_err(|source| Error::Ptrace {
            request: "GETREGS",
            pid,
            source,
        })?;
        Ok(())
    }

    pub fn syscall_number(&self) -> u64 {
        self.regs.orig_rax
    }

    pub fn return_value(&self) -> i64 {
        self.regs.rax as i64
    }

    /// Syscall argument `n` per the x86_64 ABI. The argument registers are
    /// preserved across the syscall, so this is valid at exit stops too.
    pub fn arg(&self, n: usize) -> u64 {
        match n {
            0 => self.regs.rdi,
            1 => self.regs.rsi,
            2 => self.regs.rdx,
            3 => self.regs.r10,
            4 => self.regs.r8,
            5 => self.regs.r9,
            _ => 0,
        }
    }

    /// Overwrite the syscall return value seen by the tracee.
    pub fn set_return_value(&mut self, pid: Pid, value: i64) -> Result<()> {
        self.regs.rax = value as u64;
        ptrace::setregs(pid, self.regs).map_err(|source| Error::Ptrace {
            request: "SETREGS",
            pid,
            source,
        })
    }
}

impl Default for Ptracer {
    fn default() -> Self {
        Self::new()
    }
}
