use std::io::Error;
use std::ptr;

use winapi::ctypes::c_void;
use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE};

#[cold]
pub(crate) fn page_size() -> usize {
    use winapi::um::sysinfoapi::GetSystemInfo;
    use winapi::um::sysinfoapi::{LPSYSTEM_INFO, SYSTEM_INFO};

    unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info as LPSYSTEM_INFO);
        info.dwPageSize as usize
    }
}

/// Reserves and commits `len` bytes of read/write memory.
///
/// The whole area is committed up front. The context switch sets the stack limit in the Thread
/// Information Block to the lowest usable address, so Windows never tries to move a `PAGE_GUARD`
/// page around inside our stack.
pub(crate) unsafe fn map(len: usize) -> Result<*mut u8, Error> {
    let ptr = VirtualAlloc(
        ptr::null_mut(),
        len,
        MEM_RESERVE | MEM_COMMIT,
        PAGE_READWRITE,
    );
    if ptr.is_null() {
        Err(Error::last_os_error())
    } else {
        Ok(ptr as *mut u8)
    }
}

/// Makes `len` bytes starting at `ptr` inaccessible. Returns false if the protection failed.
pub(crate) unsafe fn protect(ptr: *mut u8, len: usize) -> bool {
    let mut old_protect: u32 = 0;
    VirtualProtect(ptr as *mut c_void, len, PAGE_NOACCESS, &mut old_protect) != 0
}

pub(crate) unsafe fn unmap(ptr: *mut u8, _len: usize) {
    let result = VirtualFree(ptr as *mut c_void, 0, MEM_RELEASE);
    debug_assert_ne!(result, 0);
}
