use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Write data into a tracee's memory.
/// Primary: process_vm_writev (one syscall for the whole buffer)
/// Fallback: ptrace::write, word by word
pub fn write_memory(pid: Pid, addr: u64, data: &[u8]) -> Result<()> {
    match write_memory_process_vm(pid, addr, data) {
        Ok(()) => return Ok(()),
        Err(e) => {
            log::debug!("process_vm_writev failed, falling back to ptrace: {}", e);
        }
    }

    write_memory_ptrace(pid, addr, data)
}

fn write_memory_process_vm(pid: Pid, addr: u64, data: &[u8]) -> Result<()> {
    let local_iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };
    let remote_iov = libc::iovec {
        iov_base: addr as *mut libc::c_void,
        iov_len: data.len(),
    };

    let res = unsafe { libc::process_vm_writev(pid.as_raw(), &local_iov, 1, &remote_iov, 1, 0) };

    if res < 0 || res as usize != data.len() {
        return Err(Error::MemoryWrite {
            pid,
            addr,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn write_memory_ptrace(pid: Pid, addr: u64, data: &[u8]) -> Result<()> {
    let mem_err = |addr: u64, e: nix::Error| Error::MemoryWrite {
        pid,
        addr,
        source: std::io::Error::from(e),
    };

    // Pokes are word-sized; a ragged tail must be read-modify-written so
    // the bytes past the buffer survive.
    let mut offset = 0usize;
    while offset < data.len() {
        let word_addr = (addr + offset as u64) as ptrace::AddressType;
        let remaining = data.len() - offset;

        let word = if remaining >= 8 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[offset..offset + 8]);
            libc::c_long::from_le_bytes(bytes)
        } else {
            let existing =
                ptrace::read(pid, word_addr).map_err(|e| mem_err(addr + offset as u64, e))?;
            let mut bytes = existing.to_le_bytes();
            bytes[..remaining].copy_from_slice(&data[offset..]);
            libc::c_long::from_le_bytes(bytes)
        };

        ptrace::write(pid, word_addr, word).map_err(|e| mem_err(addr + offset as u64, e))?;
        offset += 8;
    }
    Ok(())
}

/// Write a plain-data struct into tracee memory.
pub fn write_struct<T: Sized>(pid: Pid, addr: u64, value: &T) -> Result<()> {
    let bytes = unsafe {
        std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
    };
    write_memory(pid, addr, bytes)
}

/// Zero `len` bytes of tracee memory.
pub fn write_zeros(pid: Pid, addr: u64, len: usize) -> Result<()> {
    write_memory(pid, addr, &vec![0u8; len])
}
