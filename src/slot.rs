//! The per-thread resource slot.
//!
//! Each thread owns one slot which is either empty or holds a single live
//! `ThreadResource`. The slot lives in a `thread_local!` with a destructor,
//! so the runtime tears it down when the thread exits, or when the process
//! exits for the main thread. On glibc that teardown runs before the
//! callbacks registered with [`crate::program::at_exit`].
//!
//! [`probe`] is the exit-hook side of the story: it checks the slot once and
//! then trusts what it saw, dereferencing either the live payload address or
//! [`SENTINEL_ADDR`]. It is meant to crash when called after a release.

use core::cell::{Cell, RefCell};
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

/// The value stored in every freshly constructed resource.
pub const PAYLOAD: i32 = 42;

/// The address written into a resource's pointer when it is released, and
/// dereferenced by [`probe`] when the slot is empty.
pub const SENTINEL_ADDR: usize = 0xdead_beef;

/// Return [`SENTINEL_ADDR`] as a pointer.
#[inline]
#[must_use]
pub fn sentinel() -> *mut i32 {
    ptr::without_provenance_mut(SENTINEL_ADDR)
}

/// Return [`SENTINEL_ADDR`] as a byte pointer, which has no alignment
/// requirement.
#[inline]
fn sentinel_byte() -> *const u8 {
    sentinel().cast::<u8>().cast_const()
}

/// A heap-allocated payload owned by exactly one thread's slot.
struct ThreadResource {
    data: *mut i32,
}

impl ThreadResource {
    fn new() -> Self {
        let data = Box::into_raw(Box::new(PAYLOAD));
        LIVE_RESOURCES.with(|live| live.set(live.get() + 1));

        #[cfg(feature = "log")]
        log::trace!(target: "tls_at_exit::slot", "Resource constructed at {:p}", data);

        Self { data }
    }

    #[inline]
    fn addr(&self) -> *mut i32 {
        self.data
    }

    /// Free the payload and poison the stored address.
    fn release(&mut self) {
        if self.data.is_null() || self.data == sentinel() {
            return;
        }

        #[cfg(feature = "log")]
        log::trace!(
            target: "tls_at_exit::slot",
            "Resource at {:p} released, poisoning with {:#x}",
            self.data,
            SENTINEL_ADDR
        );

        // SAFETY: `data` came from `Box::into_raw` in `new` and has not been
        // freed, since freeing it always overwrites it with the sentinel.
        unsafe {
            drop(Box::from_raw(self.data));
        }
        self.data = sentinel();

        // `LIVE_RESOURCES` has no destructor, so it is still accessible while
        // `SLOT` is being torn down.
        LIVE_RESOURCES.with(|live| live.set(live.get() - 1));
        RELEASES.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for ThreadResource {
    fn drop(&mut self) {
        self.release();
    }
}

/// The state of a thread's slot.
enum SlotState {
    Empty,
    Live(ThreadResource),
}

thread_local! {
    static SLOT: RefCell<SlotState> = const { RefCell::new(SlotState::Empty) };
    static LIVE_RESOURCES: Cell<usize> = const { Cell::new(0) };
}

/// Total number of resources released on any thread, by [`force_release`],
/// by re-initialization, or by thread-local teardown.
static RELEASES: AtomicUsize = AtomicUsize::new(0);

/// Construct a new resource in the calling thread's slot.
///
/// Any previous occupant is released first, so the slot never holds more
/// than one resource. Calling this on a thread whose thread-local storage has
/// already been torn down does nothing.
pub fn initialize() {
    let result = SLOT.try_with(|slot| {
        let mut slot = slot.borrow_mut();
        drop(mem::replace(&mut *slot, SlotState::Empty));
        *slot = SlotState::Live(ThreadResource::new());
    });

    if result.is_err() {
        #[cfg(feature = "log")]
        log::trace!(target: "tls_at_exit::slot", "Slot already torn down; not initializing");
    }
}

/// Release the calling thread's resource now, if there is one.
///
/// Releasing an empty slot, or a slot that has already been torn down, is a
/// no-op.
pub fn force_release() {
    let previous = SLOT
        .try_with(|slot| mem::replace(&mut *slot.borrow_mut(), SlotState::Empty))
        .unwrap_or(SlotState::Empty);

    match previous {
        SlotState::Live(resource) => drop(resource),
        SlotState::Empty => {
            #[cfg(feature = "log")]
            log::trace!(target: "tls_at_exit::slot", "Slot already empty; nothing to release");
        }
    }
}

/// Access the calling thread's resource the way a stale exit hook would.
///
/// The slot is checked once. If it is empty, or has already been torn down,
/// this reads from [`SENTINEL_ADDR`], which faults. Otherwise the payload
/// address is copied out and read without further validation.
pub fn probe() {
    let addr = SLOT
        .try_with(|slot| match &*slot.borrow() {
            SlotState::Live(resource) => Some(resource.addr()),
            SlotState::Empty => None,
        })
        .unwrap_or(None);

    match addr {
        None => {
            #[cfg(feature = "log")]
            log::trace!(
                target: "tls_at_exit::slot",
                "Probe found no resource; reading {:#x}",
                SENTINEL_ADDR
            );

            // SAFETY: none. This is the crash the probe exists to produce.
            // The read is byte-sized so that it reaches the unmapped address
            // instead of tripping the alignment precondition first.
            let _ = unsafe { ptr::read_volatile(sentinel_byte()) };
        }
        Some(addr) => {
            #[cfg(feature = "log")]
            log::trace!(target: "tls_at_exit::slot", "Probe reading resource at {:p}", addr);

            // SAFETY: only as good as the check above. Nothing re-validates
            // `addr` between the check and the read.
            let _ = unsafe { ptr::read_volatile(addr) };
        }
    }
}

/// Test whether the calling thread's slot holds a live resource.
#[must_use]
pub fn is_live() -> bool {
    SLOT.try_with(|slot| matches!(&*slot.borrow(), SlotState::Live(_)))
        .unwrap_or(false)
}

/// Return the address [`probe`] would read on the calling thread.
///
/// This is the payload address while the slot is live, and
/// [`SENTINEL_ADDR`] once it has been released or torn down.
#[must_use]
pub fn payload_addr() -> *const i32 {
    SLOT.try_with(|slot| match &*slot.borrow() {
        SlotState::Live(resource) => resource.addr().cast_const(),
        SlotState::Empty => sentinel().cast_const(),
    })
    .unwrap_or(sentinel().cast_const())
}

/// Read the calling thread's payload, if the slot is live.
#[must_use]
pub fn payload() -> Option<i32> {
    SLOT.try_with(|slot| match &*slot.borrow() {
        // SAFETY: a resource in the `Live` state has not been released.
        SlotState::Live(resource) => Some(unsafe { *resource.addr() }),
        SlotState::Empty => None,
    })
    .unwrap_or(None)
}

/// Return the number of resources constructed and not yet released on the
/// calling thread.
#[must_use]
pub fn live_resources() -> usize {
    LIVE_RESOURCES.with(Cell::get)
}

/// Return the number of resources released on any thread so far.
#[must_use]
pub fn release_count() -> usize {
    RELEASES.load(Ordering::Relaxed)
}
