//! Guarded memory arena
//!
//! Each worker owns one `Arena`: an anonymous private mapping whose first
//! and last page are `PROT_NONE`. Any access past either end of the
//! usable interior faults immediately in hardware; there are no software
//! bounds checks to get wrong. The interior is managed by a first-fit
//! free list with coalescing; the allocation algorithm is an
//! implementation detail behind `alloc`/`dealloc` and may be swapped.
//!
//! An arena is single-owner. It moves into its worker thread at spawn
//! and is unmapped when the worker drops it. No internal locking.

use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use burrow_core::error::ArenaError;

/// Allocation granularity; also the per-allocation header size, so
/// payloads stay 16-byte aligned.
const ALIGN: usize = 16;
const HDR: usize = ALIGN;
/// Smallest remainder worth keeping as its own free block.
const MIN_BLOCK: usize = 2 * ALIGN;

/// Live mapped regions, process wide. Lets a teardown harness verify
/// that every arena was unmapped.
static LIVE_REGIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of arena regions currently mapped in this process.
pub fn live_regions() -> usize {
    LIVE_REGIONS.load(Ordering::SeqCst)
}

pub fn page_size() -> usize {
    // Safety: sysconf(_SC_PAGESIZE) has no failure mode on any supported
    // platform; it returns the constant page size.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Free-list node, stored inside the free block itself.
#[repr(C)]
struct FreeBlock {
    /// Total block size, header included.
    size: usize,
    next: *mut FreeBlock,
}

pub struct Arena {
    base: *mut u8,
    total: usize,
    usable: *mut u8,
    usable_len: usize,
    free_head: *mut FreeBlock,
}

// Safety: an Arena is exclusively owned. It is created on the spawning
// thread and moved into exactly one worker; no pointer into the region
// outlives the arena or crosses to another thread.
unsafe impl Send for Arena {}

impl Arena {
    /// Map an arena of `page_size() << 5` bytes (32 pages), the default
    /// per-worker pool size.
    pub fn with_default_size() -> Result<Self, ArenaError> {
        Self::new(page_size() << 5)
    }

    /// Map an arena of at least `bytes` bytes, rounded up to whole pages.
    /// The first and last page become guards; the rest is the usable pool.
    pub fn new(bytes: usize) -> Result<Self, ArenaError> {
        let page = page_size();
        let total = bytes
            .checked_add(page - 1)
            .map(|b| b & !(page - 1))
            .ok_or(ArenaError::TooSmall { size: bytes })?;
        if total < 3 * page {
            return Err(ArenaError::TooSmall { size: bytes });
        }

        // Safety: anonymous private mapping, no fd, checked for MAP_FAILED.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ArenaError::Map {
                size: total,
                source: io::Error::last_os_error(),
            });
        }
        let base = base as *mut u8;

        // Guard both ends. On failure the mapping must not leak.
        // Safety: both ranges lie inside the mapping created above.
        let ret = unsafe { libc::mprotect(base as *mut libc::c_void, page, libc::PROT_NONE) };
        let ret2 = if ret == 0 {
            unsafe {
                libc::mprotect(
                    base.add(total - page) as *mut libc::c_void,
                    page,
                    libc::PROT_NONE,
                )
            }
        } else {
            ret
        };
        if ret != 0 || ret2 != 0 {
            let source = io::Error::last_os_error();
            unsafe { libc::munmap(base as *mut libc::c_void, total) };
            return Err(ArenaError::Protect { source });
        }

        let usable = unsafe { base.add(page) };
        let usable_len = total - 2 * page;

        // The whole interior starts out as one free block.
        let head = usable as *mut FreeBlock;
        // Safety: `usable..usable+usable_len` is mapped read/write and
        // large enough for a FreeBlock (>= one page).
        unsafe {
            (*head).size = usable_len;
            (*head).next = ptr::null_mut();
        }

        LIVE_REGIONS.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            base,
            total,
            usable,
            usable_len,
            free_head: head,
        })
    }

    /// Size of the usable interior in bytes.
    pub fn usable_size(&self) -> usize {
        self.usable_len
    }

    /// Start of the usable interior. Offsets `-1` and `usable_size()`
    /// relative to this pointer land on guard pages.
    pub fn usable_ptr(&self) -> *mut u8 {
        self.usable
    }

    /// Allocate `n` bytes from the interior. Returns `None` when the
    /// pool is exhausted; never panics, never touches the guards.
    pub fn alloc(&mut self, n: usize) -> Option<NonNull<u8>> {
        let need = n.max(1).checked_add(HDR + ALIGN - 1)? & !(ALIGN - 1);

        // First fit over the free list.
        let mut prev: *mut *mut FreeBlock = &mut self.free_head;
        // Safety: every pointer on the list points into the mapped
        // interior and was written by alloc/dealloc below.
        unsafe {
            let mut cur = *prev;
            while !cur.is_null() {
                if (*cur).size >= need {
                    let remain = (*cur).size - need;
                    if remain >= MIN_BLOCK {
                        let rest = (cur as *mut u8).add(need) as *mut FreeBlock;
                        (*rest).size = remain;
                        (*rest).next = (*cur).next;
                        *prev = rest;
                        (*cur).size = need;
                    } else {
                        *prev = (*cur).next;
                    }
                    // Stash the block size for dealloc.
                    *(cur as *mut usize) = (*cur).size;
                    return NonNull::new((cur as *mut u8).add(HDR));
                }
                prev = &mut (*cur).next;
                cur = *prev;
            }
        }
        None
    }

    /// Return an allocation to the pool, coalescing with adjacent free
    /// blocks. `ptr` must come from `alloc` on this arena and not have
    /// been freed already.
    pub fn dealloc(&mut self, ptr: NonNull<u8>) {
        // Safety: per the contract above, `ptr - HDR` is a block header
        // inside our interior holding the size written by `alloc`.
        unsafe {
            let block = ptr.as_ptr().sub(HDR) as *mut FreeBlock;
            debug_assert!(self.contains(block as *mut u8));
            let size = *(block as *mut usize);
            (*block).size = size;

            // Address-ordered insert.
            let mut prev: *mut FreeBlock = ptr::null_mut();
            let mut cur = self.free_head;
            while !cur.is_null() && (cur as usize) < (block as usize) {
                prev = cur;
                cur = (*cur).next;
            }
            (*block).next = cur;
            if prev.is_null() {
                self.free_head = block;
            } else {
                (*prev).next = block;
            }

            // Merge with the following block.
            if !cur.is_null() && (block as *mut u8).add((*block).size) == cur as *mut u8 {
                (*block).size += (*cur).size;
                (*block).next = (*cur).next;
            }
            // Merge with the preceding block.
            if !prev.is_null() && (prev as *mut u8).add((*prev).size) == block as *mut u8 {
                (*prev).size += (*block).size;
                (*prev).next = (*block).next;
            }
        }
    }

    fn contains(&self, p: *mut u8) -> bool {
        let start = self.usable as usize;
        (p as usize) >= start && (p as usize) < start + self.usable_len
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // Safety: base/total describe the mapping created in `new`; the
        // type is not Clone, so this runs at most once per region.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total);
        }
        LIVE_REGIONS.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_regions_too_small_for_guards() {
        assert!(matches!(
            Arena::new(page_size()),
            Err(ArenaError::TooSmall { .. })
        ));
    }

    #[test]
    fn alloc_write_free_cycle() {
        let mut arena = Arena::new(page_size() * 4).unwrap();
        let a = arena.alloc(100).unwrap();
        let b = arena.alloc(200).unwrap();
        assert_ne!(a, b);
        unsafe {
            ptr::write_bytes(a.as_ptr(), 0xAB, 100);
            ptr::write_bytes(b.as_ptr(), 0xCD, 200);
            assert_eq!(*a.as_ptr(), 0xAB);
            assert_eq!(*b.as_ptr().add(199), 0xCD);
        }
        arena.dealloc(a);
        arena.dealloc(b);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut arena = Arena::new(page_size() * 3).unwrap();
        assert!(arena.alloc(arena.usable_size() * 2).is_none());
        // Whole interior minus header fits in one shot.
        let big = arena.alloc(arena.usable_size() - HDR).unwrap();
        assert!(arena.alloc(64).is_none());
        arena.dealloc(big);
    }

    #[test]
    fn coalescing_restores_capacity() {
        let mut arena = Arena::new(page_size() * 4).unwrap();
        let full = arena.usable_size() - HDR;

        let a = arena.alloc(1000).unwrap();
        let b = arena.alloc(1000).unwrap();
        let c = arena.alloc(1000).unwrap();
        arena.dealloc(b);
        arena.dealloc(a);
        arena.dealloc(c);

        // After freeing everything the original single block is back.
        let again = arena.alloc(full).unwrap();
        arena.dealloc(again);
    }

    #[test]
    fn allocations_are_aligned() {
        let mut arena = Arena::new(page_size() * 4).unwrap();
        for n in [1usize, 7, 16, 33, 100] {
            let p = arena.alloc(n).unwrap();
            assert_eq!(p.as_ptr() as usize % ALIGN, 0);
            arena.dealloc(p);
        }
    }

    /// Run `touch` in a forked child; report how the child exited.
    ///
    /// The child only performs a volatile write and `_exit`, which is
    /// async-signal-safe, so forking from the threaded test runner is ok.
    fn probe_in_child(arena: &Arena, touch: impl FnOnce(*mut u8)) -> (bool, i32) {
        unsafe {
            let child = libc::fork();
            assert!(child >= 0, "fork failed");
            if child == 0 {
                touch(arena.usable_ptr());
                libc::_exit(0);
            }
            let mut status = 0;
            let ret = libc::waitpid(child, &mut status, 0);
            assert_eq!(ret, child);
            if libc::WIFSIGNALED(status) {
                (true, libc::WTERMSIG(status))
            } else {
                (false, libc::WEXITSTATUS(status))
            }
        }
    }

    #[test]
    fn interior_writes_succeed() {
        let arena = Arena::new(page_size() * 4).unwrap();
        let len = arena.usable_size();
        let (signaled, code) = probe_in_child(&arena, |p| unsafe {
            ptr::write_volatile(p, 0x11);
            ptr::write_volatile(p.add(len - 1), 0x22);
        });
        assert!(!signaled);
        assert_eq!(code, 0);
    }

    #[test]
    fn write_below_pool_faults() {
        let arena = Arena::new(page_size() * 4).unwrap();
        let (signaled, sig) = probe_in_child(&arena, |p| unsafe {
            ptr::write_volatile(p.sub(1), 0xAA);
        });
        assert!(signaled);
        assert_eq!(sig, libc::SIGSEGV);
    }

    #[test]
    fn write_past_pool_faults() {
        let arena = Arena::new(page_size() * 4).unwrap();
        let len = arena.usable_size();
        let (signaled, sig) = probe_in_child(&arena, |p| unsafe {
            ptr::write_volatile(p.add(len), 0xAA);
        });
        assert!(signaled);
        assert_eq!(sig, libc::SIGSEGV);
    }
}
