//! Run one thread-local teardown scenario and let the process live or die.
//!
//! The scenarios that exercise the hazard end in a fault; a harness checks
//! the exit status rather than any output.

use clap::{Parser, ValueEnum};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tls_at_exit::host::module_init;
use tls_at_exit::program::{self, register_probe_at_exit};
use tls_at_exit::slot;
use tls_at_exit::thread::{at_thread_exit, run_on_thread};

/// The payload address the child thread held, cached the way a stale exit
/// hook would cache it.
static CHILD_PAYLOAD_ADDR: AtomicUsize = AtomicUsize::new(0);

/// Whether the child's slot was empty once its thread-local destructors ran.
static CHILD_TORN_DOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(
    name = "tls-at-exit",
    version,
    about = "Observe thread-local destruction from exit callbacks"
)]
struct Cli {
    /// The scenario to run
    #[arg(value_enum, env = "TLS_AT_EXIT_SCENARIO", default_value = "exit-teardown")]
    scenario: Scenario,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Initialize, then probe while the resource is live; exits normally
    ProbeLive,
    /// Initialize, force a release, then probe; faults
    ReleaseThenProbe,
    /// Release an empty slot repeatedly; exits normally
    ReleaseIdempotent,
    /// Initialize on a child thread that exits before the exit-time probe;
    /// faults
    ThreadTeardown,
    /// Initialize on the main thread and probe from an exit callback; faults
    ExitTeardown,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let module = module_init();

    match cli.scenario {
        Scenario::ProbeLive => {
            module.call("initialize_tls")?;
            eprintln!("TLS initialized");
            eprintln!("Probing live TLS object");
            module.call("atexit_handler")?;
            eprintln!("Probe completed");
        }
        Scenario::ReleaseThenProbe => {
            module.call("initialize_tls")?;
            eprintln!("TLS initialized");
            module.call("force_cleanup")?;
            eprintln!("TLS cleanup forced");
            eprintln!("Attempting to access freed TLS object...");
            module.call("atexit_handler")?;
            eprintln!("Access succeeded - no segfault occurred");
        }
        Scenario::ReleaseIdempotent => {
            for _ in 0..3 {
                module.call("force_cleanup")?;
            }
            eprintln!("Released an empty slot three times");
        }
        Scenario::ThreadTeardown => {
            program::at_exit(Box::new(|| {
                eprintln!(
                    "Exit callback: child resource cached {}, child slot torn down {}",
                    CHILD_PAYLOAD_ADDR.load(Ordering::SeqCst) != 0,
                    CHILD_TORN_DOWN.load(Ordering::SeqCst)
                );
                tls_at_exit::probe();
            }));
            eprintln!("Probe registered at exit");
            run_on_thread(|| {
                // Registered ahead of the slot's destructor, so it runs after
                // the slot is gone.
                at_thread_exit(Box::new(|| {
                    CHILD_TORN_DOWN.store(
                        !slot::is_live() && slot::live_resources() == 0,
                        Ordering::SeqCst,
                    );
                }));
                tls_at_exit::initialize();
                CHILD_PAYLOAD_ADDR.store(slot::payload_addr().addr(), Ordering::SeqCst);
                at_thread_exit(Box::new(|| eprintln!("Child thread exiting")));
                eprintln!("TLS initialized on child thread");
            })?;
            eprintln!("Child thread joined");
            eprintln!("Exiting... (segfault may occur here)");
            program::exit(0);
        }
        Scenario::ExitTeardown => {
            module.call("initialize_tls")?;
            register_probe_at_exit();
            eprintln!("TLS initialized and atexit handler registered");
            eprintln!("Exiting... (segfault may occur here)");
            program::exit(0);
        }
    }

    Ok(())
}
