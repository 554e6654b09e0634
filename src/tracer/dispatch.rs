use syscalls::Sysno;

use crate::error::{Error, Result};

use super::handlers::{
    Entropy, ForkMark, InstantSleep, LogicalClock, Observed, Passthrough, PinnedUname,
    SyscallHandler, ZeroedStat,
};

/// The interception table. The seccomp filter traps exactly these syscalls
/// and `dispatch` yields a handler for each; everything else runs
/// untraced. Keep the two in sync through this list.
pub const INTERCEPTED: &[Sysno] = &[
    Sysno::access,
    Sysno::alarm,
    Sysno::chdir,
    Sysno::chmod,
    Sysno::clock_gettime,
    Sysno::clone,
    Sysno::connect,
    Sysno::execve,
    Sysno::exit,
    Sysno::exit_group,
    Sysno::fork,
    Sysno::fstat,
    Sysno::fstatfs,
    Sysno::futex,
    Sysno::getcwd,
    Sysno::getdents,
    Sysno::getpid,
    Sysno::getrandom,
    Sysno::getrlimit,
    Sysno::getrusage,
    Sysno::gettimeofday,
    Sysno::ioctl,
    Sysno::lstat,
    Sysno::nanosleep,
    Sysno::newfstatat,
    Sysno::open,
    Sysno::openat,
    Sysno::pipe,
    Sysno::poll,
    Sysno::prlimit64,
    Sysno::pselect6,
    Sysno::read,
    Sysno::readlink,
    Sysno::select,
    Sysno::sendto,
    Sysno::set_robust_list,
    Sysno::stat,
    Sysno::statfs,
    Sysno::sysinfo,
    Sysno::tgkill,
    Sysno::time,
    Sysno::uname,
    Sysno::unlink,
    Sysno::unlinkat,
    Sysno::utimensat,
    Sysno::vfork,
    Sysno::write,
    Sysno::writev,
];

/// Syscalls the filter answers with `ENOSYS` so libc falls back to an
/// intercepted equivalent. glibc prefers `clone3` for fork and
/// posix_spawn where the kernel offers it, which would create children
/// behind the fork reconciler's back; failing it once makes glibc use
/// `clone` for the rest of the process lifetime.
pub const FORCED_ENOSYS: &[Sysno] = &[Sysno::clone3];

/// Yield a fresh handler for `number`. A number outside the table is a
/// configuration failure: the filter should never have trapped it.
pub fn dispatch(number: u64) -> Result<Box<dyn SyscallHandler>> {
    let sysno = Sysno::new(number as usize).ok_or(Error::UnknownSyscall {
        number,
        name: "?",
    })?;

    let handler: Box<dyn SyscallHandler> = match sysno {
        Sysno::time | Sysno::gettimeofday | Sysno::clock_gettime => Box::new(LogicalClock(sysno)),
        Sysno::getrandom => Box::new(Entropy(sysno)),
        Sysno::nanosleep => Box::new(InstantSleep(sysno)),
        Sysno::getrusage | Sysno::sysinfo => Box::new(ZeroedStat(sysno)),
        Sysno::uname => Box::new(PinnedUname(sysno)),
        Sysno::getpid => Box::new(Observed(sysno)),
        Sysno::fork | Sysno::vfork | Sysno::clone => Box::new(ForkMark(sysno)),

        Sysno::access
        | Sysno::alarm
        | Sysno::chdir
        | Sysno::chmod
        | Sysno::connect
        | Sysno::execve
        | Sysno::exit
        | Sysno::exit_group
        | Sysno::fstat
        | Sysno::fstatfs
        | Sysno::futex
        | Sysno::getcwd
        | Sysno::getdents
        | Sysno::getrlimit
        | Sysno::ioctl
        | Sysno::lstat
        | Sysno::newfstatat
        | Sysno::open
        | Sysno::openat
        | Sysno::pipe
        | Sysno::poll
        | Sysno::prlimit64
        | Sysno::pselect6
        | Sysno::read
        | Sysno::readlink
        | Sysno::select
        | Sysno::sendto
        | Sysno::set_robust_list
        | Sysno::stat
        | Sysno::statfs
        | Sysno::tgkill
        | Sysno::unlink
        | Sysno::unlinkat
        | Sysno::utimensat
        | Sysno::write
        | Sysno::writev => Box::new(Passthrough(sysno)),

        other => {
            return Err(Error::UnknownSyscall {
                number,
                name: other.name(),
            })
        }
    };

    Ok(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::ptracer::Ptracer;
    use crate::tracer::state::TraceeState;
    use nix::unistd::Pid;

    #[test]
    fn every_table_entry_dispatches() {
        for &sysno in INTERCEPTED {
            let handler = dispatch(sysno.id() as u64)
                .unwrap_or_else(|e| panic!("{sysno} should dispatch: {e}"));
            assert_eq!(handler.sysno(), sysno);
        }
    }

    #[test]
    fn unknown_number_is_a_configuration_failure() {
        let err = dispatch(100_000).unwrap_err();
        assert!(matches!(err, Error::UnknownSyscall { number: 100_000, .. }));
        // The failure message names the offending number.
        assert!(err.to_string().contains("100000"));
    }

    #[test]
    fn untabled_syscall_is_rejected_by_name() {
        // kill is a real syscall but not in the interception table.
        let err = dispatch(Sysno::kill.id() as u64).unwrap_err();
        assert!(err.to_string().contains("kill"));
    }

    #[test]
    fn fork_family_requests_no_post_hook() {
        let mut state = TraceeState::new(Pid::from_raw(1));
        let mut tracer = Ptracer::new();
        for sysno in [Sysno::fork, Sysno::vfork, Sysno::clone] {
            let handler = dispatch(sysno.id() as u64).unwrap();
            assert!(!handler.enter(&mut state, &mut tracer).unwrap());
        }
    }

    #[test]
    fn getpid_requests_a_post_hook() {
        let mut state = TraceeState::new(Pid::from_raw(1));
        let mut tracer = Ptracer::new();
        let handler = dispatch(Sysno::getpid.id() as u64).unwrap();
        assert!(handler.enter(&mut state, &mut tracer).unwrap());
    }
}
