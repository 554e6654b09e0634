//! Seccomp-BPF filter for syscall interception. Pure Rust, no libseccomp.
//!
//! The filter returns `SECCOMP_RET_TRACE` with the syscall number as event
//! data for every entry in the interception table, so the supervisor can
//! read the number straight from the event message. Everything else is
//! allowed through untraced, which is what makes seccomp-driven tracing
//! cheaper than stopping at every syscall boundary.

use syscalls::Sysno;

// BPF instruction classes and fields, as sock_filter wants them. Not
// exported by libc.
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;

const AUDIT_ARCH_X86_64: u32 = 0xc000_003e;

// Offsets into struct seccomp_data.
const SECCOMP_DATA_NR: u32 = 0;
const SECCOMP_DATA_ARCH: u32 = 4;

/// Filter return data meaning "no rule matched this syscall". The
/// supervisor treats a seccomp event carrying this value as a
/// configuration error.
pub const NO_RULE_SENTINEL: u16 = 0x7FFF;

const fn stmt(code: u16, k: u32) -> libc::sock_filter {
    libc::sock_filter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> libc::sock_filter {
    libc::sock_filter { code, jt, jf, k }
}

fn trace(data: u16) -> libc::sock_filter {
    stmt(
        BPF_RET + BPF_K,
        libc::SECCOMP_RET_TRACE | (data as u32 & libc::SECCOMP_RET_DATA),
    )
}

fn errno(err: i32) -> libc::sock_filter {
    stmt(
        BPF_RET + BPF_K,
        libc::SECCOMP_RET_ERRNO | (err as u32 & libc::SECCOMP_RET_DATA),
    )
}

/// Build the interception filter: an architecture prologue, an `ENOSYS`
/// rule per forced-fallback entry, one `TRACE(nr)` rule per table entry,
/// and a final allow.
///
/// Event data is 16 bits wide; a table entry whose number cannot be
/// represented is marked with the sentinel instead, which surfaces as a
/// configuration error the first time it fires.
pub fn build_filter(table: &[Sysno], forced_enosys: &[Sysno]) -> Vec<libc::sock_filter> {
    let mut prog = vec![
        stmt(BPF_LD + BPF_W + BPF_ABS, SECCOMP_DATA_ARCH),
        jump(BPF_JMP + BPF_JEQ + BPF_K, AUDIT_ARCH_X86_64, 1, 0),
        stmt(BPF_RET + BPF_K, libc::SECCOMP_RET_KILL_PROCESS),
        stmt(BPF_LD + BPF_W + BPF_ABS, SECCOMP_DATA_NR),
    ];

    for &sysno in forced_enosys {
        prog.push(jump(BPF_JMP + BPF_JEQ + BPF_K, sysno.id() as u32, 0, 1));
        prog.push(errno(libc::ENOSYS));
    }

    for &sysno in table {
        let nr = sysno.id() as u32;
        let data = if nr < NO_RULE_SENTINEL as u32 {
            nr as u16
        } else {
            NO_RULE_SENTINEL
        };
        prog.push(jump(BPF_JMP + BPF_JEQ + BPF_K, nr, 0, 1));
        prog.push(trace(data));
    }

    prog.push(stmt(BPF_RET + BPF_K, libc::SECCOMP_RET_ALLOW));
    prog
}

/// Install `prog` on the calling process. Runs in the child between fork
/// and exec; `PR_SET_NO_NEW_PRIVS` makes the install legal without
/// CAP_SYS_ADMIN and is inherited across exec.
pub fn install(prog: &[libc::sock_filter]) -> std::io::Result<()> {
    let fprog = libc::sock_fprog {
        len: prog.len() as u16,
        filter: prog.as_ptr() as *mut libc::sock_filter,
    };

    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let rc = unsafe {
        libc::prctl(
            libc::PR_SET_SECCOMP,
            libc::SECCOMP_MODE_FILTER,
            &fprog as *const libc::sock_fprog,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::dispatch::{FORCED_ENOSYS, INTERCEPTED};

    #[test]
    fn filter_shape() {
        let prog = build_filter(INTERCEPTED, FORCED_ENOSYS);

        // Arch validation comes first.
        assert_eq!(prog[0].code, BPF_LD + BPF_W + BPF_ABS);
        assert_eq!(prog[0].k, SECCOMP_DATA_ARCH);
        assert_eq!(prog[2].k, libc::SECCOMP_RET_KILL_PROCESS);

        // One jump + one return per rule, then the allow.
        let rules = FORCED_ENOSYS.len() + INTERCEPTED.len();
        assert_eq!(prog.len(), 4 + 2 * rules + 1);
        assert_eq!(
            prog.last().unwrap().k,
            libc::SECCOMP_RET_ALLOW,
            "unmatched syscalls must run untraced"
        );
    }

    #[test]
    fn trace_rules_carry_the_syscall_number() {
        let prog = build_filter(&[Sysno::getpid], &[]);
        let rule = prog[4 + 1];
        assert_eq!(
            rule.k,
            libc::SECCOMP_RET_TRACE | Sysno::getpid.id() as u32
        );
    }

    #[test]
    fn clone3_is_failed_not_traced() {
        let prog = build_filter(&[], FORCED_ENOSYS);
        let rule = prog[4 + 1];
        assert_eq!(
            rule.k,
            libc::SECCOMP_RET_ERRNO | libc::ENOSYS as u32
        );
    }

    #[test]
    fn every_intercepted_number_fits_the_event_data() {
        for &sysno in INTERCEPTED {
            assert!((sysno.id() as u32) < NO_RULE_SENTINEL as u32);
        }
    }
}
