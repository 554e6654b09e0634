use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use syscalls::Sysno;

use crate::error::{Error, Result};
use crate::event::{self, StopEvent};
use crate::seccomp;

pub mod dispatch;
pub mod handlers;
pub mod memory;
pub mod ptracer;
pub mod registry;
pub mod state;

use ptracer::{Ptracer, ResumeMode};
use registry::Registry;

/// Single-threaded supervisor driving every tracee of one sandboxed run.
///
/// Tracees execute in parallel with the supervisor only while resumed; the
/// sole suspension point is `waitpid(-1)` in `next_event`, and the
/// registry and ancestor stack are owned here exclusively. Scheduling is
/// the child-runs-first discipline: after a fork the new child is advanced
/// until it terminates, then its parent is resumed.
pub struct Supervisor {
    registry: Registry,
    tracer: Ptracer,
    /// Tracee to resume on entry to the next wait.
    resume_target: Pid,
    root: Pid,
    exit_code: i32,
    done: bool,
    /// Pre-4.8 kernels deliver a syscall entry-stop between the seccomp
    /// event and the exit-stop; the only version-dependent branch.
    drain_entry_stop: bool,
    debug: u8,
}

impl Supervisor {
    /// The root tracee must already be stopped with its ptrace options set
    /// (see `spawn::spawn_traced`).
    pub fn new(root: Pid, debug: u8) -> Self {
        let drain_entry_stop = kernel_needs_entry_drain();
        if drain_entry_stop {
            log::info!("pre-4.8 kernel: syscall entry-stops will be drained");
        }

        let mut registry = Registry::new();
        registry.insert(root);

        Self {
            registry,
            tracer: Ptracer::new(),
            resume_target: root,
            root,
            exit_code: 0,
            done: false,
            drain_entry_stop,
            debug,
        }
    }

    /// Drive all tracees to completion and return the root's exit code
    /// (`128 + signal` if it died by signal).
    pub fn run(&mut self) -> Result<i32> {
        // Seccomp only reports pre-hook events under PTRACE_CONT; when a
        // handler wants the syscall-exit stop as well we resume with
        // PTRACE_SYSCALL instead. That choice lives here.
        let mut want_post_hook = false;

        while !self.done {
            let (pid, stop) = self.next_event(self.resume_target, want_post_hook)?;
            self.resume_target = pid;

            match stop {
                StopEvent::Seccomp => {
                    want_post_hook = self.handle_seccomp(pid)?;
                }
                StopEvent::SyscallStop => {
                    if self.drain_entry_stop {
                        let state = self.registry.get_mut(pid)?;
                        if state.is_pre_exit {
                            // Entry-stop; the pre-hook already ran at the
                            // seccomp event. Take the exit-stop next.
                            state.is_pre_exit = false;
                            want_post_hook = true;
                            continue;
                        }
                    }
                    self.tracer.update(pid)?;
                    self.handle_post_syscall(pid)?;
                    want_post_hook = false;
                }
                StopEvent::Fork | StopEvent::Vfork => {
                    // Normally drained by the reconciler at pre-hook time;
                    // reaching here means the event was observed on its
                    // own and the child is already registered.
                    log::debug!("[pid {pid}] late {stop} event");
                }
                StopEvent::CloneEvent => {
                    log::debug!("[pid {pid}] clone event");
                }
                StopEvent::Exec => {
                    log::debug!("[pid {pid}] exec event; the new image stays traced");
                }
                StopEvent::SignalStop(signal) => {
                    log::debug!("[pid {pid}] intercepted {signal}; delivering on next resume");
                    self.registry.get_mut(pid)?.signal_to_deliver = Some(signal);
                }
                StopEvent::Exited(code) => {
                    log::debug!("[pid {pid}] exited with status {code}");
                    if pid == self.root {
                        self.exit_code = code;
                    }
                    self.handle_exit(pid);
                }
                StopEvent::KilledBySignal(signal) => {
                    log::debug!("[pid {pid}] killed by {signal}");
                    if pid == self.root {
                        self.exit_code = 128 + signal as i32;
                    }
                    self.handle_exit(pid);
                }
            }
        }

        debug_assert!(
            self.registry.is_empty(),
            "supervisor finished with live tracees"
        );
        Ok(self.exit_code)
    }

    /// Resume `resume` and block until any tracee stops.
    ///
    /// The pending signal is taken in the same step as the resume that
    /// injects it, so it is delivered exactly once and only to its own
    /// tracee.
    fn next_event(&mut self, resume: Pid, want_post_hook: bool) -> Result<(Pid, StopEvent)> {
        let signal = self.registry.get_mut(resume)?.take_pending_signal();
        let mode = if want_post_hook {
            ResumeMode::SyscallTrap
        } else {
            ResumeMode::Continue
        };
        self.tracer.resume(resume, mode, signal)?;

        let status = waitpid(None::<Pid>, Some(WaitPidFlag::__WALL)).map_err(Error::Wait)?;
        let (pid, stop) = event::classify(status)?;
        log::trace!("[pid {pid}] stop: {stop}");
        Ok((pid, stop))
    }

    /// Seccomp pre-hook stop. The event message carries the filter's match
    /// data: the syscall number, or the no-rule sentinel.
    fn handle_seccomp(&mut self, pid: Pid) -> Result<bool> {
        let message = self.tracer.event_message(pid)?;
        if (message & 0xFFFF) as u16 == seccomp::NO_RULE_SENTINEL {
            // The filter trapped a syscall it has no rule for.
            self.tracer.update(pid)?;
            let number = self.tracer.syscall_number();
            let name = Sysno::new(number as usize).map_or("?", |s| s.name());
            return Err(Error::NoFilterRule { number, name });
        }

        self.tracer.update(pid)?;
        self.handle_pre_syscall(pid)
    }

    /// Dispatch the pre-hook for the syscall the stopped tracee entered.
    /// Returns whether the next resume should stop at syscall-exit.
    fn handle_pre_syscall(&mut self, pid: Pid) -> Result<bool> {
        let number = self.tracer.syscall_number();
        let handler = dispatch::dispatch(number)?;
        let sysno = handler.sysno();

        let want_post;
        {
            let state = self.registry.get_mut(pid)?;
            let time = state.tick();
            log::debug!(
                "[time {time}][pid {pid}] intercepted {} (#{number})",
                handler.name()
            );
            want_post = handler.enter(state, &mut self.tracer)?;
            state.current_syscall = Some(handler);
            if self.drain_entry_stop {
                state.is_pre_exit = true;
            }
        }

        // The fork family is resolved synchronously: the next events for
        // this tracee are known to be the fork event and the child's first
        // stop, in either order. Post-hook interception is skipped.
        if matches!(sysno, Sysno::fork | Sysno::vfork | Sysno::clone) {
            self.reconcile_fork(pid)?;
            return Ok(false);
        }

        if self.drain_entry_stop {
            // The entry-stop is owed regardless of what the handler wants.
            return Ok(true);
        }
        // At -vvv take every exit-stop so return values land in the log.
        Ok(if self.debug >= 3 { true } else { want_post })
    }

    /// Syscall-exit stop: run the post-hook of the syscall in flight.
    fn handle_post_syscall(&mut self, pid: Pid) -> Result<()> {
        let state = self.registry.get_mut(pid)?;
        let handler = state
            .current_syscall
            .take()
            .ok_or_else(|| Error::UnexpectedStop {
                pid,
                what: "syscall-exit with no syscall in flight".into(),
            })?;

        log::trace!(
            "[pid {pid}] {} value before post-hook: {}",
            handler.name(),
            self.tracer.return_value()
        );
        handler.exit(state, &mut self.tracer)?;
        log::debug!(
            "[pid {pid}] {} returned {}",
            handler.name(),
            self.tracer.return_value()
        );
        Ok(())
    }

    /// Drain the events following a fork-family syscall entry and hand
    /// them to the fork reconciler.
    fn reconcile_fork(&mut self, pid: Pid) -> Result<()> {
        if self.drain_entry_stop {
            let (stopped, stop) = self.next_event(pid, true)?;
            if stop != StopEvent::SyscallStop {
                return Err(Error::UnexpectedStop {
                    pid: stopped,
                    what: format!("{stop} while draining the fork entry-stop"),
                });
            }
            self.registry.get_mut(stopped)?.is_pre_exit = false;
        }

        let (stopped, stop) = self.next_event(pid, false)?;
        self.handle_fork(stopped, stop)
    }

    /// Resolve the fork-event / child-signal-stop race.
    ///
    /// The kernel reports a new tracee twice: an event-stop in the parent
    /// and a signal-stop in the child, in no guaranteed order. Whichever
    /// arrives first, the registry ends up with the child registered, the
    /// parent parked on the ancestor stack, and the child scheduled next.
    fn handle_fork(&mut self, pid: Pid, stop: StopEvent) -> Result<()> {
        let child = match stop {
            StopEvent::Fork | StopEvent::Vfork => {
                log::debug!("[pid {pid}] fork event arrived before the child's signal-stop");
                let child = self.register_child(pid)?;

                // Wait until the child reaches its first traced stop.
                let status = waitpid(child, Some(WaitPidFlag::__WALL)).map_err(Error::Wait)?;
                let (got, _) = event::classify(status)?;
                if got != child {
                    return Err(Error::ChildMismatch { want: child, got });
                }
                child
            }
            StopEvent::SignalStop(_) => {
                log::debug!("[pid {pid}] child signal-stop arrived before the fork event");
                // Only one tracee runs the critical section at a time, so
                // the next stop must be the parent's fork event.
                let status = waitpid(None::<Pid>, Some(WaitPidFlag::__WALL)).map_err(Error::Wait)?;
                let (parent, parent_stop) = event::classify(status)?;
                match parent_stop {
                    StopEvent::Fork | StopEvent::Vfork => {}
                    other => {
                        return Err(Error::ForkRace {
                            pid: parent,
                            got: other.kind(),
                        })
                    }
                }
                let child = self.register_child(parent)?;
                if child != pid {
                    return Err(Error::ChildMismatch {
                        want: child,
                        got: pid,
                    });
                }
                child
            }
            other => {
                return Err(Error::ForkRace {
                    pid,
                    got: other.kind(),
                })
            }
        };

        // Child runs to completion first.
        self.resume_target = child;
        Ok(())
    }

    fn register_child(&mut self, parent: Pid) -> Result<Pid> {
        let child = Pid::from_raw(self.tracer.event_message(parent)? as i32);
        self.registry.push_ancestor(parent);
        self.registry.insert(child);
        log::debug!(
            "[pid {parent}] registered child {child}; ancestor depth {}",
            self.registry.ancestor_depth()
        );
        Ok(child)
    }

    /// A tracee terminated. Its parent (if any) is the next to run; with
    /// no ancestors left the whole run is over.
    fn handle_exit(&mut self, pid: Pid) {
        self.registry.remove(pid);
        log::debug!("{} tracee(s) remain", self.registry.len());
        match self.registry.pop_ancestor() {
            Some(parent) => self.resume_target = parent,
            None => self.done = true,
        }
    }
}

/// Kernels below 4.8 do not fold the syscall entry-stop into the seccomp
/// event, so the supervisor must drain one syscall-trap between the
/// seccomp stop and the exit-stop. Computed once at startup.
fn kernel_needs_entry_drain() -> bool {
    match std::fs::read_to_string("/proc/sys/kernel/osrelease") {
        Ok(release) => match parse_release(&release) {
            Some(version) => version < (4, 8),
            None => {
                log::warn!("unparseable kernel release {release:?}; assuming 4.8+");
                false
            }
        },
        Err(e) => {
            log::warn!("failed to read kernel release ({e}); assuming 4.8+");
            false
        }
    }
}

fn parse_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.trim().split(['.', '-']);
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_release_strings() {
        assert_eq!(parse_release("5.15.0-91-generic\n"), Some((5, 15)));
        assert_eq!(parse_release("6.8.0"), Some((6, 8)));
        assert_eq!(parse_release("4.4.0-210"), Some((4, 4)));
        assert_eq!(parse_release("garbage"), None);
    }

    #[test]
    fn entry_drain_threshold_is_4_8() {
        assert!(parse_release("4.7.10").unwrap() < (4, 8));
        assert!(parse_release("4.8.0").unwrap() >= (4, 8));
        assert!(parse_release("5.10.0").unwrap() >= (4, 8));
    }
}
