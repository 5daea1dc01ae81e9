/// Initialize logging, if enabled.
///
/// This runs from `.init_array` so that the logger is already installed
/// when thread-local destructors and exit callbacks run at the end of the
/// process; those are the messages this crate exists to show.
#[unsafe(link_section = ".init_array.00099")]
#[used]
static INIT_ARRAY: unsafe extern "C" fn() = {
    unsafe extern "C" fn function() {
        init()
    }
    function
};

fn init() {
    // `try_init` so that a host which installed its own logger first wins.
    let _ = env_logger::try_init();

    #[cfg(feature = "log")]
    log::trace!(
        target: "tls_at_exit::program",
        "Logger initialized on Thread[{:?}]",
        crate::thread::current_thread_id().as_raw_nonzero()
    );
}
