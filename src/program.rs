//! Program shutdown.
//!
//! Functions registered with [`at_exit`] go through libc's `__cxa_atexit`
//! list. glibc's `exit` runs the calling thread's thread-local destructors
//! first and only then drains that list, so an exit callback registered here
//! observes the main thread's slot after it has been torn down.

use core::ffi::c_void;
use core::ptr::null_mut;
use libc::c_int;

/// Register a function to be called when [`exit`] is called, or when `main`
/// returns.
pub fn at_exit(func: Box<dyn FnOnce() + Send>) {
    unsafe extern "C" {
        // <https://refspecs.linuxbase.org/LSB_5.0.0/LSB-Core-generic/LSB-Core-generic/baselib---cxa-atexit.html>
        fn __cxa_atexit(
            func: unsafe extern "C" fn(*mut c_void),
            arg: *mut c_void,
            _dso: *mut c_void,
        ) -> c_int;
    }

    // The function to pass to `__cxa_atexit`.
    unsafe extern "C" fn at_exit_func(arg: *mut c_void) {
        #[cfg(feature = "log")]
        log::trace!(target: "tls_at_exit::program", "Calling `at_exit`-registered function");

        // SAFETY: `arg` is the pointer produced by `Box::into_raw` below, and
        // libc calls each registration exactly once.
        unsafe { Box::from_raw(arg.cast::<Box<dyn FnOnce() + Send>>())() }
    }

    let at_exit_arg = Box::into_raw(Box::new(func)).cast::<c_void>();
    let r = unsafe { __cxa_atexit(at_exit_func, at_exit_arg, null_mut()) };
    assert_eq!(r, 0);
}

/// Register [`crate::probe`] to run at process exit.
///
/// The probe runs on whichever thread calls `exit`, after that thread's
/// slot has been torn down.
pub fn register_probe_at_exit() {
    #[cfg(feature = "log")]
    log::trace!(target: "tls_at_exit::program", "Registering probe as an exit callback");

    at_exit(Box::new(crate::slot::probe));
}

/// Run thread-local destructors and the functions registered with
/// [`at_exit`], in that order, and exit the program.
pub fn exit(status: c_int) -> ! {
    #[cfg(feature = "log")]
    log::trace!(target: "tls_at_exit::program", "Exiting with status {}", status);

    unsafe {
        // Call `libc` to run *its* dtors, and exit the program.
        libc::exit(status)
    }
}
