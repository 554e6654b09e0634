use std::collections::HashMap;

use nix::unistd::Pid;

use crate::error::{Error, Result};

use super::state::TraceeState;

/// Live-tracee map plus the stack of parents waiting for a descendant.
///
/// The key set equals the set of live tracees. The ancestor stack models
/// the child-runs-first discipline: a parent is pushed when its fork event
/// is handled and popped when the child terminates, which also names the
/// tracee to resume next. The running tracee is never on the stack.
pub struct Registry {
    states: HashMap<Pid, TraceeState>,
    ancestors: Vec<Pid>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            ancestors: Vec::new(),
        }
    }

    pub fn insert(&mut self, pid: Pid) {
        self.states.insert(pid, TraceeState::new(pid));
    }

    pub fn remove(&mut self, pid: Pid) {
        self.states.remove(&pid);
    }

    pub fn get_mut(&mut self, pid: Pid) -> Result<&mut TraceeState> {
        self.states
            .get_mut(&pid)
            .ok_or(Error::UnknownTracee { pid })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn push_ancestor(&mut self, pid: Pid) {
        self.ancestors.push(pid);
    }

    pub fn pop_ancestor(&mut self) -> Option<Pid> {
        self.ancestors.pop()
    }

    pub fn ancestor_depth(&self) -> usize {
        self.ancestors.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_live_tracees() {
        let mut registry = Registry::new();
        let root = Pid::from_raw(10);
        registry.insert(root);
        assert_eq!(registry.len(), 1);
        assert!(registry.get_mut(root).is_ok());

        registry.remove(root);
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get_mut(root),
            Err(Error::UnknownTracee { .. })
        ));
    }

    #[test]
    fn fork_then_exit_restores_ancestor_order() {
        // Mirrors a fork-then-wait run: depth goes 0 -> 1 -> 0 and the
        // parent comes back as the next tracee to resume.
        let mut registry = Registry::new();
        let parent = Pid::from_raw(10);
        let child = Pid::from_raw(11);

        registry.insert(parent);
        assert_eq!(registry.ancestor_depth(), 0);

        registry.push_ancestor(parent);
        registry.insert(child);
        assert_eq!(registry.ancestor_depth(), 1);
        assert_eq!(registry.len(), 2);

        registry.remove(child);
        assert_eq!(registry.pop_ancestor(), Some(parent));
        assert_eq!(registry.ancestor_depth(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn ancestor_stack_is_lifo() {
        let mut registry = Registry::new();
        registry.push_ancestor(Pid::from_raw(1));
        registry.push_ancestor(Pid::from_raw(2));
        assert_eq!(registry.pop_ancestor(), Some(Pid::from_raw(2)));
        assert_eq!(registry.pop_ancestor(), Some(Pid::from_raw(1)));
        assert_eq!(registry.pop_ancestor(), None);
    }
}
