//! Fixed size execution stacks for userland context switches.
//!
//! A [`Stack`] is a single page aligned memory mapping. Execution stacks grow downwards, so code
//! running on it starts at [`Stack::top`] (the end of the mapping) and moves towards
//! [`Stack::limit`]. Optionally one extra page is reserved under the limit and made inaccessible,
//! turning a stack overflow into an immediate fault instead of silently corrupting the memory
//! next to the stack.
//!
//! Guard pages are best-effort. If the platform refuses to change the page protection the stack
//! is still handed out, but [`Stack::has_guard_page`] returns `false`. Callers that depend on
//! overflow protection need to check it.

#[cfg(target_family = "unix")]
mod unix;
#[cfg(target_family = "unix")]
use self::unix as sys;

#[cfg(target_family = "windows")]
mod windows;
#[cfg(target_family = "windows")]
use self::windows as sys;

use std::io::{Error, ErrorKind};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns page size in bytes
pub fn page_size() -> usize {
    static PAGE_SIZE_CACHE: AtomicUsize = AtomicUsize::new(0);
    match PAGE_SIZE_CACHE.load(Ordering::Relaxed) {
        0 => {
            let page_size = sys::page_size();
            debug_assert!(page_size.is_power_of_two());

            PAGE_SIZE_CACHE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

/// An exclusively owned stack mapping.
///
/// ```text
/// deallocation()   limit()                                  top()
///      +--------------+-----------------------------------------+
///      |  guard page  |  usable area (size() bytes)  <-- grows  |
///      +--------------+-----------------------------------------+
/// ```
///
/// Without a guard page `deallocation()` and `limit()` are the same address.
pub struct Stack {
    mapping: *mut u8,
    mapping_len: usize,
    size: usize,
    guard_page: bool,
}

// The mapping is owned and never aliased by another `Stack`.
unsafe impl Send for Stack {}

impl Stack {
    /// Maps a new stack with at least `size` usable bytes.
    ///
    /// The usable size is rounded up to a whole number of pages. If `guard_page` is set one more
    /// page is mapped under the usable area and protected.
    pub fn new(size: usize, guard_page: bool) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "stack size must be larger than 0",
            ));
        }
        let page = page_size();
        let too_large = || Error::new(ErrorKind::InvalidInput, "stack size too large");
        let size = size
            .checked_add(page - 1)
            .map(|size| size & !(page - 1))
            .ok_or_else(too_large)?;
        let mapping_len = if guard_page {
            size.checked_add(page).ok_or_else(too_large)?
        } else {
            size
        };

        let mapping = unsafe { sys::map(mapping_len)? };
        // Failing to protect the page is not an error, the stack just stays unguarded.
        let guard_page = guard_page && unsafe { sys::protect(mapping, page) };

        Ok(Self {
            mapping,
            mapping_len,
            size,
            guard_page,
        })
    }

    /// Returns a pointer to the top of the stack (highest address, exclusive).
    ///
    /// This is where execution on the stack begins. It's always page aligned.
    pub fn top(&self) -> *mut u8 {
        // The `add(size)` function for type T adds `size * size_of(T)` bytes to the pointer.
        unsafe { self.mapping.add(self.mapping_len) }
    }

    /// Returns a pointer to the lowest usable address of the stack.
    pub fn limit(&self) -> *mut u8 {
        unsafe { self.top().sub(self.size) }
    }

    /// Returns a pointer to the start of the whole mapping, guard page included.
    pub fn deallocation(&self) -> *mut u8 {
        self.mapping
    }

    /// Usable size in bytes. The guard page is not counted.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true if the page under [`limit`](Stack::limit) is protected.
    pub fn has_guard_page(&self) -> bool {
        self.guard_page
    }

    /// Returns true if `ptr` points into the usable area (`top()` included).
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.limit() as *const u8 <= ptr && ptr <= self.top() as *const u8
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe { sys::unmap(self.mapping, self.mapping_len) };
    }
}
