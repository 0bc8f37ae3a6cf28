//! Cross-process shared state
//!
//! [`SharedCell`] keeps a value and a process-shared mutex in an anonymous
//! `MAP_SHARED` mapping. A cell created before a worker starts is visible to
//! both the caller and the worker's execution context.

use std::fmt;
use std::io;
use std::mem::{self, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// Value cell shared between a process and the children it forks.
///
/// `T` is plain data: it is copied bit for bit into shared memory, so heap
/// pointers inside it would not mean anything in another process.
pub struct SharedCell<T: Copy + Send> {
    region: Arc<Region<T>>,
}

#[repr(C)]
struct Slot<T> {
    mutex: libc::pthread_mutex_t,
    value: T,
}

struct Region<T> {
    slot: NonNull<Slot<T>>,
}

// SAFETY: all access to the value goes through the process-shared mutex.
unsafe impl<T: Send> Send for Region<T> {}
unsafe impl<T: Send> Sync for Region<T> {}

impl<T> Region<T> {
    fn map() -> io::Result<Self> {
        // SAFETY: anonymous mapping, no file descriptor involved.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mem::size_of::<Slot<T>>(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let slot = NonNull::new(addr.cast::<Slot<T>>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { slot })
    }

    fn mutex(&self) -> *mut libc::pthread_mutex_t {
        // SAFETY: the slot stays mapped for the lifetime of the region.
        unsafe { ptr::addr_of_mut!((*self.slot.as_ptr()).mutex) }
    }

    fn value(&self) -> *mut T {
        // SAFETY: the slot stays mapped for the lifetime of the region.
        unsafe { ptr::addr_of_mut!((*self.slot.as_ptr()).value) }
    }
}

impl<T> Drop for Region<T> {
    fn drop(&mut self) {
        // The mutex is left alone: another process may still be using it.
        // SAFETY: the mapping was created by `Region::map` with this size.
        unsafe {
            libc::munmap(self.slot.as_ptr().cast(), mem::size_of::<Slot<T>>());
        }
    }
}

fn check(code: libc::c_int) -> io::Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(code))
    }
}

impl<T: Copy + Send> SharedCell<T> {
    pub fn new(value: T) -> io::Result<Self> {
        let region = Region::<T>::map()?;

        // SAFETY: the mapping is fresh and private to this call until `Self` is returned.
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
            let initialized = check(libc::pthread_mutexattr_setpshared(
                attr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            ))
            .and_then(|()| check(libc::pthread_mutex_init(region.mutex(), attr.as_ptr())));
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            initialized?;

            region.value().write(value);
        }

        Ok(Self {
            region: Arc::new(region),
        })
    }

    /// Acquire the cell's lock, blocking until it is available.
    pub fn lock(&self) -> io::Result<SharedGuard<'_, T>> {
        // SAFETY: the mutex was initialised in `new`.
        check(unsafe { libc::pthread_mutex_lock(self.region.mutex()) })?;
        Ok(SharedGuard { cell: self })
    }

    /// Copy the current value out under the lock.
    pub fn get(&self) -> io::Result<T> {
        Ok(*self.lock()?)
    }

    /// Replace the value under the lock.
    pub fn set(&self, value: T) -> io::Result<()> {
        *self.lock()? = value;
        Ok(())
    }
}

impl<T: Copy + Send> Clone for SharedCell<T> {
    fn clone(&self) -> Self {
        Self {
            region: Arc::clone(&self.region),
        }
    }
}

impl<T: Copy + Send> fmt::Debug for SharedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCell")
            .field("addr", &self.region.slot)
            .finish_non_exhaustive()
    }
}

/// Lock held on a [`SharedCell`]; released on drop.
pub struct SharedGuard<'a, T: Copy + Send> {
    cell: &'a SharedCell<T>,
}

impl<T: Copy + Send> Deref for SharedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the lock is held for the lifetime of the guard.
        unsafe { &*self.cell.region.value() }
    }
}

impl<T: Copy + Send> DerefMut for SharedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the lock is held for the lifetime of the guard.
        unsafe { &mut *self.cell.region.value() }
    }
}

impl<T: Copy + Send> Drop for SharedGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: this guard holds the lock.
        unsafe {
            libc::pthread_mutex_unlock(self.cell.region.mutex());
        }
    }
}
