// src/sync/mod.rs

//! Interrupt-safe locking.
//!
//! On a single CPU the only viable locking discipline is "disable
//! interrupts, remember the prior state, restore on release". [`IrqLock`]
//! wraps a spinlock in exactly that: the guard saves EFLAGS and executes
//! `cli` before acquiring, and restores the saved flags after releasing.
//!
//! Lock order (outermost first): process table, terminal record, screen
//! writer, serial port. An IRQ handler can therefore never deadlock with
//! preempted kernel code: whoever holds one of these runs with IF clear.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::arch::{ArchCpu, Cpu};

/// A spinlock whose critical sections run with interrupts disabled.
pub struct IrqLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqLock<T> {
    /// Creates a new lock around `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquires the lock, disabling interrupts for the guard's lifetime.
    pub fn lock(&self) -> IrqGuard<'_, T> {
        let flags = ArchCpu::save_and_disable_interrupts();
        IrqGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            flags,
        }
    }
}

// SAFETY: the contained value is only reachable through the guard, which
// existed under mutual exclusion with interrupts disabled.
unsafe impl<T: Send> Sync for IrqLock<T> {}
unsafe impl<T: Send> Send for IrqLock<T> {}

/// Guard for [`IrqLock`]; releases the lock, then restores EFLAGS.
pub struct IrqGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    flags: u32,
}

impl<T> Deref for IrqGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqGuard<'_, T> {
    fn drop(&mut self) {
        // Release while interrupts are still off, then restore. The other
        // order would allow an IRQ to spin on a lock we still hold.
        // SAFETY: the guard is dropped exactly once, here.
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        ArchCpu::restore_interrupts(self.flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_round_trip() {
        let lock = IrqLock::new(41);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 42);
    }

    #[test]
    fn sequential_relock() {
        let lock = IrqLock::new(0u32);
        for _ in 0..16 {
            *lock.lock() += 1;
        }
        assert_eq!(*lock.lock(), 16);
    }
}
