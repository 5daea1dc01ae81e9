#![allow(dead_code)]

use std::os::unix::process::ExitStatusExt;

/// How a scenario is expected to end.
#[derive(Debug, Copy, Clone)]
pub enum Outcome {
    /// Exit with the given status code.
    Code(i32),
    /// Be killed by the given signal.
    Signal(i32),
}

pub fn run_scenario(
    scenario: &str,
    envs: &[(&str, &str)],
    stdout: &'static str,
    stderr: &'static str,
    outcome: Outcome,
) {
    use assert_cmd::Command;

    let mut command = Command::cargo_bin("tls-at-exit").unwrap();
    if !scenario.is_empty() {
        command.arg(scenario);
    }
    command.env_remove("TLS_AT_EXIT_SCENARIO");
    command.env_remove("RUST_LOG");
    command.envs(envs.iter().copied());
    let assert = command.assert();

    let output = assert.get_output();
    similar_asserts::assert_eq!(
        String::from_utf8_lossy(&output.stderr).lines().collect::<Vec<_>>(),
        stderr.lines().collect::<Vec<_>>(),
        "scenario {:?} had unexpected stderr",
        scenario
    );

    let assert = assert.stdout(stdout).stderr(stderr);
    match outcome {
        Outcome::Code(code) => {
            assert.code(code);
        }
        Outcome::Signal(signal) => {
            let status = assert.interrupted().get_output().status;
            assert_eq!(
                status.signal(),
                Some(signal),
                "scenario {:?} ended with {:?}",
                scenario,
                status
            );
        }
    }
}

/// Stderr output for the scenarios that fault at process exit from the
/// main thread.
pub const EXIT_TEARDOWN_STDERR: &str = "TLS initialized and atexit handler registered\n\
    Exiting... (segfault may occur here)\n";
