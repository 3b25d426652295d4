// Forking needs a unix platform. On Windows an overflow into the guard page terminates the
// process with an access violation, which the test harness can't observe from the inside.
#![cfg(target_family = "unix")]

use std::hint::black_box;
use std::io::Error;

use coroutine_context::Context;

// Uses 1 Kb per iteration and never stops on its own.
fn overflow(depth: u64) -> u64 {
    let frame = black_box([depth as u8; 1024]);
    if depth == u64::MAX {
        return 0;
    }
    overflow(depth + 1) + frame[0] as u64
}

#[test]
fn overflow_faults_on_the_guard_page() -> Result<(), Error> {
    // Everything that allocates happens before the fork, the child only switches stacks.
    let mut context = Context::with_work(16 * 1024, true, |_suspender| {
        overflow(0);
    })?;
    assert!(context.has_guard_page());

    unsafe {
        let pid = libc::fork();
        if pid < 0 {
            return Err(Error::last_os_error());
        }
        if pid == 0 {
            context.start();
            libc::_exit(0);
        }

        let mut status = 0;
        assert_eq!(libc::waitpid(pid, &mut status, 0), pid);
        assert!(libc::WIFSIGNALED(status), "child exited with {}", status);
        let signal = libc::WTERMSIG(status);
        // On Darwin, guard page accesses are raised as SIGBUS.
        assert!(signal == libc::SIGSEGV || signal == libc::SIGBUS);
    }
    Ok(())
}

#[test]
fn unguarded_stack_reports_it() -> Result<(), Error> {
    let context = Context::new(16 * 1024, false)?;
    assert!(!context.has_guard_page());
    Ok(())
}
