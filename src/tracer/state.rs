use nix::sys::signal::Signal;
use nix::unistd::Pid;

use super::handlers::SyscallHandler;

/// Per-tracee bookkeeping. One entry exists for every tracee that has
/// stopped and not yet been resumed.
pub struct TraceeState {
    pub pid: Pid,
    /// Counter fed to time-returning handlers, bumped once per intercepted
    /// syscall.
    logical_time: u64,
    /// Signal to inject on this tracee's next resume. One slot only: the
    /// kernel does not re-queue on our behalf, so a second signal-stop
    /// before the first is consumed overwrites it.
    pub signal_to_deliver: Option<Signal>,
    /// Pre-4.8 kernels deliver a syscall entry-stop between the seccomp
    /// event and the exit-stop; set while that entry-stop is still owed.
    pub is_pre_exit: bool,
    /// Handler for the syscall currently in flight, valid between the
    /// pre-hook and the post-hook.
    pub current_syscall: Option<Box<dyn SyscallHandler>>,
}

impl TraceeState {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            logical_time: 0,
            signal_to_deliver: None,
            is_pre_exit: false,
            current_syscall: None,
        }
    }

    /// Advance the logical clock, returning the new value.
    pub fn tick(&mut self) -> u64 {
        self.logical_time += 1;
        self.logical_time
    }

    pub fn logical_time(&self) -> u64 {
        self.logical_time
    }

    /// Consume the pending signal; clearing and consumption are one step so
    /// a signal is never delivered twice.
    pub fn take_pending_signal(&mut self) -> Option<Signal> {
        self.signal_to_deliver.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_time_is_strictly_increasing() {
        let mut state = TraceeState::new(Pid::from_raw(100));
        assert_eq!(state.logical_time(), 0);
        assert_eq!(state.tick(), 1);
        assert_eq!(state.tick(), 2);
        assert_eq!(state.logical_time(), 2);
    }

    #[test]
    fn pending_signal_slot_overwrites() {
        let mut state = TraceeState::new(Pid::from_raw(100));
        state.signal_to_deliver = Some(Signal::SIGUSR1);
        state.signal_to_deliver = Some(Signal::SIGUSR2);
        assert_eq!(state.take_pending_signal(), Some(Signal::SIGUSR2));
        // Consumption clears the slot.
        assert_eq!(state.take_pending_signal(), None);
    }
}
