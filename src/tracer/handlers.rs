use syscalls::Sysno;

use crate::error::Result;

use super::memory;
use super::ptracer::Ptracer;
use super::state::TraceeState;

/// A determinization handler for one syscall.
///
/// `enter` runs at the seccomp pre-hook, before the kernel executes the
/// syscall; its return value tells the supervisor whether to stop again at
/// syscall-exit so `exit` can run. Handlers rewrite tracee registers and
/// memory through the `Ptracer`; they never touch the supervisor's own
/// bookkeeping beyond the state entry they are handed.
pub trait SyscallHandler: std::fmt::Debug {
    fn sysno(&self) -> Sysno;

    fn name(&self) -> &'static str {
        self.sysno().name()
    }

    fn enter(&self, _state: &mut TraceeState, _tracer: &mut Ptracer) -> Result<bool> {
        Ok(false)
    }

    fn exit(&self, _state: &mut TraceeState, _tracer: &mut Ptracer) -> Result<()> {
        Ok(())
    }
}

/// Syscalls that are intercepted only so the filter table stays closed;
/// the kernel's behavior is already deterministic for our purposes.
#[derive(Debug)]
pub struct Passthrough(pub Sysno);

impl SyscallHandler for Passthrough {
    fn sysno(&self) -> Sysno {
        self.0
    }
}

/// Deterministic syscalls whose return value is still worth observing at
/// the exit stop (e.g. `getpid`).
#[derive(Debug)]
pub struct Observed(pub Sysno);

impl SyscallHandler for Observed {
    fn sysno(&self) -> Sysno {
        self.0
    }

    fn enter(&self, _state: &mut TraceeState, _tracer: &mut Ptracer) -> Result<bool> {
        Ok(true)
    }

    fn exit(&self, state: &mut TraceeState, tracer: &mut Ptracer) -> Result<()> {
        log::debug!(
            "[pid {}] {} -> {}",
            state.pid,
            self.name(),
            tracer.return_value()
        );
        Ok(())
    }
}

/// `time`, `gettimeofday`, `clock_gettime`: the tracee observes the
/// logical clock instead of wall time.
#[derive(Debug)]
pub struct LogicalClock(pub Sysno);

impl SyscallHandler for LogicalClock {
    fn sysno(&self) -> Sysno {
        self.0
    }

    fn enter(&self, _state: &mut TraceeState, _tracer: &mut Ptracer) -> Result<bool> {
        Ok(true)
    }

    fn exit(&self, state: &mut TraceeState, tracer: &mut Ptracer) -> Result<()> {
        let seconds = state.logical_time() as i64;
        match self.0 {
            Sysno::time => {
                let out = tracer.arg(0);
                if out != 0 {
                    memory::write_struct(state.pid, out, &seconds)?;
                }
                tracer.set_return_value(state.pid, seconds)?;
            }
            Sysno::gettimeofday => {
                let out = tracer.arg(0);
                if out != 0 && tracer.return_value() == 0 {
                    let tv = libc::timeval {
                        tv_sec: seconds,
                        tv_usec: 0,
                    };
                    memory::write_struct(state.pid, out, &tv)?;
                }
            }
            Sysno::clock_gettime => {
                let out = tracer.arg(1);
                if out != 0 && tracer.return_value() == 0 {
                    let ts = libc::timespec {
                        tv_sec: seconds,
                        tv_nsec: 0,
                    };
                    memory::write_struct(state.pid, out, &ts)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// `getrandom`: the buffer is refilled from a keystream seeded by the
/// logical clock, so every run reads the same "entropy".
#[derive(Debug)]
pub struct Entropy(pub Sysno);

impl SyscallHandler for Entropy {
    fn sysno(&self) -> Sysno {
        self.0
    }

    fn enter(&self, _state: &mut TraceeState, _tracer: &mut Ptracer) -> Result<bool> {
        Ok(true)
    }

    fn exit(&self, state: &mut TraceeState, tracer: &mut Ptracer) -> Result<()> {
        let filled = tracer.return_value();
        if filled > 0 {
            let bytes = keystream(state.logical_time(), filled as usize);
            memory::write_memory(state.pid, tracer.arg(0), &bytes)?;
        }
        Ok(())
    }
}

/// `nanosleep`: the requested duration is zeroed at entry so the call
/// completes immediately, and `rem` is zeroed on the way out.
#[derive(Debug)]
pub struct InstantSleep(pub Sysno);

impl SyscallHandler for InstantSleep {
    fn sysno(&self) -> Sysno {
        self.0
    }

    fn enter(&self, state: &mut TraceeState, tracer: &mut Ptracer) -> Result<bool> {
        let req = tracer.arg(0);
        if req != 0 {
            let zero = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            memory::write_struct(state.pid, req, &zero)?;
        }
        Ok(true)
    }

    fn exit(&self, state: &mut TraceeState, tracer: &mut Ptracer) -> Result<()> {
        let rem = tracer.arg(1);
        if rem != 0 && tracer.return_value() == 0 {
            let zero = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            memory::write_struct(state.pid, rem, &zero)?;
        }
        Ok(())
    }
}

/// `getrusage` and `sysinfo`: the kernel-filled struct is zeroed, which is
/// both deterministic and honest about what we can promise.
#[derive(Debug)]
pub struct ZeroedStat(pub Sysno);

impl SyscallHandler for ZeroedStat {
    fn sysno(&self) -> Sysno {
        self.0
    }

    fn enter(&self, _state: &mut TraceeState, _tracer: &mut Ptracer) -> Result<bool> {
        Ok(true)
    }

    fn exit(&self, state: &mut TraceeState, tracer: &mut Ptracer) -> Result<()> {
        if tracer.return_value() != 0 {
            return Ok(());
        }
        let (addr, len) = match self.0 {
            Sysno::getrusage => (tracer.arg(1), std::mem::size_of::<libc::rusage>()),
            Sysno::sysinfo => (tracer.arg(0), std::mem::size_of::<libc::sysinfo>()),
            _ => return Ok(()),
        };
        if addr != 0 {
            memory::write_zeros(state.pid, addr, len)?;
        }
        Ok(())
    }
}

/// `uname`: every field is pinned so kernel upgrades do not leak into the
/// tracee.
#[derive(Debug)]
pub struct PinnedUname(pub Sysno);

impl SyscallHandler for PinnedUname {
    fn sysno(&self) -> Sysno {
        self.0
    }

    fn enter(&self, _state: &mut TraceeState, _tracer: &mut Ptracer) -> Result<bool> {
        Ok(true)
    }

    fn exit(&self, state: &mut TraceeState, tracer: &mut Ptracer) -> Result<()> {
        let out = tracer.arg(0);
        if out == 0 || tracer.return_value() != 0 {
            return Ok(());
        }
        let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
        fill_field(&mut uts.sysname, "Linux");
        fill_field(&mut uts.nodename, "detbox");
        fill_field(&mut uts.release, "4.8.0-detbox");
        fill_field(&mut uts.version, "#1 SMP detbox");
        fill_field(&mut uts.machine, "x86_64");
        fill_field(&mut uts.domainname, "(none)");
        memory::write_struct(state.pid, out, &uts)
    }
}

/// `fork`, `vfork`, `clone`: the supervisor short-circuits these at the
/// pre-hook to run the fork reconciler, so the handler itself has nothing
/// to do and requests no post-hook.
#[derive(Debug)]
pub struct ForkMark(pub Sysno);

impl SyscallHandler for ForkMark {
    fn sysno(&self) -> Sysno {
        self.0
    }
}

fn fill_field(field: &mut [libc::c_char; 65], value: &str) {
    for (dst, src) in field.iter_mut().zip(value.bytes()) {
        *dst = src as libc::c_char;
    }
}

/// xorshift64 keystream; the seed is the tracee's logical time, which is
/// never zero once a syscall has been intercepted.
fn keystream(seed: u64, len: usize) -> Vec<u8> {
    let mut x = seed;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        let bytes = x.to_le_bytes();
        let take = std::cmp::min(8, len - out.len());
        out.extend_from_slice(&bytes[..take]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keystream_is_reproducible() {
        assert_eq!(keystream(3, 32), keystream(3, 32));
        assert_ne!(keystream(3, 32), keystream(4, 32));
        assert_eq!(keystream(7, 5).len(), 5);
    }

    #[test]
    fn fill_field_leaves_nul_terminator() {
        let mut field = [0 as libc::c_char; 65];
        fill_field(&mut field, "Linux");
        assert_eq!(field[0] as u8, b'L');
        assert_eq!(field[5], 0);
    }

    #[test]
    fn handler_names_come_from_the_syscall_table() {
        assert_eq!(Passthrough(Sysno::read).name(), "read");
        assert_eq!(LogicalClock(Sysno::clock_gettime).name(), "clock_gettime");
        assert_eq!(ForkMark(Sysno::vfork).name(), "vfork");
    }
}
