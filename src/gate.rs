use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Lock shared between tasks and interrupt handlers.
///
/// Interrupt handlers only ever `try_with`, giving up on contention instead of
/// spinning. Tasks spin in `with`, which is bounded because the holder is
/// either an interrupt handler (never preempted by a task) or another task
/// that already holds the registry mutex.
pub(crate) struct IsrGate<T> {
    busy: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: `busy` grants exclusive access to `value`
unsafe impl<T: Send> Sync for IsrGate<T> {}

struct Release<'a>(&'a AtomicBool);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> IsrGate<T> {
    pub const fn new(value: T) -> Self {
        Self {
            busy: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    #[inline(always)]
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        let _release = Release(&self.busy);
        // SAFETY: we own `busy`
        Some(f(unsafe { &*self.value.get() }))
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        while self
            .busy
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        let _release = Release(&self.busy);
        // SAFETY: we own `busy`
        f(unsafe { &mut *self.value.get() })
    }
}
