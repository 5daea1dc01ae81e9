//! Thread plumbing for exercising per-thread teardown.

use core::ffi::c_void;
use core::mem::zeroed;
use core::ptr::{null, null_mut};
use rustix::io;

pub use rustix::thread::Pid as ThreadId;

// Symbols defined in libc but not declared in the libc crate.
unsafe extern "C" {
    fn __cxa_thread_atexit_impl(
        func: unsafe extern "C" fn(*mut c_void),
        obj: *mut c_void,
        _dso_symbol: *mut c_void,
    ) -> libc::c_int;

    static __dso_handle: *const c_void;
}

/// Run `f` on a new thread and wait for that thread to finish.
///
/// The new thread's thread-local destructors, including its slot's, have
/// run by the time this returns.
pub fn run_on_thread<F>(f: F) -> io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    extern "C" fn start(arg: *mut c_void) -> *mut c_void {
        // SAFETY: `arg` is the pointer produced by `Box::into_raw` in
        // `run_on_thread`, handed to exactly one thread.
        let f = unsafe { Box::from_raw(arg.cast::<Box<dyn FnOnce() + Send>>()) };

        #[cfg(feature = "log")]
        log::trace!(
            target: "tls_at_exit::thread",
            "Thread[{:?}] started",
            current_thread_id().as_raw_nonzero()
        );

        f();

        #[cfg(feature = "log")]
        log::trace!(
            target: "tls_at_exit::thread",
            "Thread[{:?}] returning",
            current_thread_id().as_raw_nonzero()
        );

        null_mut()
    }

    let f: Box<dyn FnOnce() + Send> = Box::new(f);
    let arg = Box::into_raw(Box::new(f));

    unsafe {
        let mut thread: libc::pthread_t = zeroed();
        match libc::pthread_create(&mut thread, null(), start, arg.cast()) {
            0 => (),
            err => {
                drop(Box::from_raw(arg));
                return Err(io::Errno::from_raw_os_error(err));
            }
        }

        match libc::pthread_join(thread, null_mut()) {
            0 => Ok(()),
            err => Err(io::Errno::from_raw_os_error(err)),
        }
    }
}

/// Registers a function to call when the current thread exits.
///
/// Thread-exit functions and thread-local destructors share one list, and
/// run in reverse order of registration.
pub fn at_thread_exit(func: Box<dyn FnOnce()>) {
    extern "C" fn call(arg: *mut c_void) {
        #[cfg(feature = "log")]
        log::trace!(target: "tls_at_exit::thread", "Calling `at_thread_exit`-registered function");

        unsafe {
            let arg = arg.cast::<Box<dyn FnOnce()>>();
            let arg = Box::from_raw(arg);
            arg()
        }
    }

    unsafe {
        let arg = Box::into_raw(Box::new(func));

        assert_eq!(__cxa_thread_atexit_impl(call, arg.cast(), dso_handle()), 0);
    }
}

/// Return the current thread id.
#[inline]
#[must_use]
pub fn current_thread_id() -> ThreadId {
    rustix::thread::gettid()
}

/// Return the address of `__dso_handle`, appropriately casted.
unsafe fn dso_handle() -> *mut c_void {
    let dso_handle: *const *const c_void = unsafe { &raw const __dso_handle };
    dso_handle.cast::<c_void>().cast_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn runs_and_joins() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        run_on_thread(move || flag.store(true, Ordering::Relaxed)).unwrap();
        assert!(ran.load(Ordering::Relaxed));
    }

    #[test]
    fn thread_has_its_own_id_and_slot() {
        let main_id = current_thread_id();
        slot::initialize();

        let seen = Arc::new(AtomicBool::new(true));
        let result = seen.clone();
        run_on_thread(move || {
            assert_ne!(current_thread_id(), main_id);
            result.store(slot::is_live(), Ordering::Relaxed);
        })
        .unwrap();

        assert!(!seen.load(Ordering::Relaxed));
        assert!(slot::is_live());
        slot::force_release();
    }

    #[test]
    fn thread_exit_releases_resource() {
        let live_before_teardown = Arc::new(AtomicBool::new(false));
        let released_after_teardown = Arc::new(AtomicBool::new(false));
        let before = live_before_teardown.clone();
        let after = released_after_teardown.clone();
        run_on_thread(move || {
            // Runs last: registered ahead of the slot's destructor.
            at_thread_exit(Box::new(move || {
                after.store(
                    !slot::is_live() && slot::live_resources() == 0,
                    Ordering::SeqCst,
                );
            }));
            slot::initialize();
            // Runs first: registered after the slot's destructor.
            at_thread_exit(Box::new(move || {
                before.store(
                    slot::is_live() && slot::live_resources() == 1,
                    Ordering::SeqCst,
                );
            }));
        })
        .unwrap();
        assert!(live_before_teardown.load(Ordering::SeqCst));
        assert!(released_after_teardown.load(Ordering::SeqCst));
    }

    #[test]
    fn at_thread_exit_runs_after_body() {
        let order = Arc::new(AtomicUsize::new(0));
        let in_thread = order.clone();
        run_on_thread(move || {
            let in_dtor = in_thread.clone();
            at_thread_exit(Box::new(move || {
                assert_eq!(in_dtor.fetch_add(1, Ordering::SeqCst), 1);
            }));
            assert_eq!(in_thread.fetch_add(1, Ordering::SeqCst), 0);
        })
        .unwrap();
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }
}
