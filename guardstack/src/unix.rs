use libc::{mmap, mprotect, munmap};
use libc::{MAP_ANON, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE};
use std::io::Error;
use std::ptr;

#[cold]
pub(crate) fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Maps `len` bytes of read/write memory. MAP_NORESERVE lets us overcommit, pages are only backed
/// once the stack actually reaches them.
pub(crate) unsafe fn map(len: usize) -> Result<*mut u8, Error> {
    let ptr = mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANON | MAP_NORESERVE,
        -1,
        0,
    );
    if ptr == MAP_FAILED {
        Err(Error::last_os_error())
    } else {
        Ok(ptr as *mut u8)
    }
}

/// Revokes all access to `len` bytes starting at `ptr`. Returns false if the kernel refused.
pub(crate) unsafe fn protect(ptr: *mut u8, len: usize) -> bool {
    mprotect(ptr as *mut libc::c_void, len, PROT_NONE) == 0
}

pub(crate) unsafe fn unmap(ptr: *mut u8, len: usize) {
    let result = munmap(ptr as *mut libc::c_void, len);
    debug_assert_eq!(result, 0);
}
