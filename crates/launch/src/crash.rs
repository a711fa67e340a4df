//! Crash isolation: keep one dying rank from taking the allocation down.
//!
//! On some HPC runtimes a single process exiting non-zero tears down every
//! process in the allocation, including sub-jobs that are still healthy.
//! So a failing rank reports once — to the stderr descriptor preserved
//! before redirection — and then exits 0. Three paths funnel through that
//! policy: a SIGSEGV handler, a panic hook, and [`mask_exit`] for harnesses
//! that observe an application's non-zero status directly.
//!
//! Everything the signal handler touches is a process-global atomic set
//! once at install time, and reporting uses only `write(2)` with integers
//! formatted on the stack.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static JOB_ID: AtomicI32 = AtomicI32::new(-1);
static LOCAL_RANK: AtomicI32 = AtomicI32::new(-1);
static SAVED_STDERR: AtomicI32 = AtomicI32::new(libc::STDERR_FILENO);
static FINALIZED: AtomicBool = AtomicBool::new(false);

/// Arms the crash path for this rank.
///
/// `saved_stderr` is the duplicated pre-redirection stderr descriptor, if
/// redirection happened. Installs the SIGSEGV handler and a panic hook;
/// both report one line and exit 0.
pub fn install(job_id: u32, local_rank: u32, saved_stderr: Option<i32>) {
    JOB_ID.store(job_id as i32, Ordering::SeqCst);
    LOCAL_RANK.store(local_rank as i32, Ordering::SeqCst);
    if let Some(fd) = saved_stderr {
        SAVED_STDERR.store(fd, Ordering::SeqCst);
    }

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        let handler: extern "C" fn(libc::c_int) = on_segv;
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut());
    }

    std::panic::set_hook(Box::new(|_| {
        report(b"application panicked");
        unsafe { libc::_exit(0) }
    }));
}

/// Records that the runtime was shut down cleanly, so later crash
/// reporting knows there is nothing left to finalize.
pub fn mark_finalized() {
    FINALIZED.store(true, Ordering::SeqCst);
}

/// True once [`mark_finalized`] has run.
pub fn is_finalized() -> bool {
    FINALIZED.load(Ordering::SeqCst)
}

/// Exit path for harnesses that collect the application's status: a
/// non-zero status is reported, and the process always exits 0.
pub fn mask_exit(status: i32) -> ! {
    if status != 0 {
        report(b"application exited with non-zero status");
    }
    std::process::exit(0)
}

extern "C" fn on_segv(_signal: libc::c_int) {
    report(b"terminated by SIGSEGV");
    unsafe { libc::_exit(0) }
}

/// Writes `cram: rank R of job J <what>\n` to the preserved stderr.
/// Async-signal-safe: one buffer, one `write`.
fn report(what: &[u8]) {
    let mut line = [0u8; 160];
    let mut at = 0;
    at = append(&mut line, at, b"cram: rank ");
    at = append_i32(&mut line, at, LOCAL_RANK.load(Ordering::SeqCst));
    at = append(&mut line, at, b" of job ");
    at = append_i32(&mut line, at, JOB_ID.load(Ordering::SeqCst));
    at = append(&mut line, at, b" ");
    at = append(&mut line, at, what);
    at = append(&mut line, at, b"\n");

    let fd = SAVED_STDERR.load(Ordering::SeqCst);
    unsafe {
        let _ = libc::write(fd, line.as_ptr() as *const libc::c_void, at);
    }
}

fn append(buf: &mut [u8], at: usize, bytes: &[u8]) -> usize {
    let end = (at + bytes.len()).min(buf.len());
    buf[at..end].copy_from_slice(&bytes[..end - at]);
    end
}

fn append_i32(buf: &mut [u8], at: usize, value: i32) -> usize {
    let mut digits = [0u8; 11];
    let len = format_i32(value, &mut digits);
    append(buf, at, &digits[..len])
}

/// Formats `value` into `out` without allocating; returns the length.
fn format_i32(value: i32, out: &mut [u8; 11]) -> usize {
    let mut at = 0;
    let mut magnitude = if value < 0 {
        out[at] = b'-';
        at += 1;
        (value as i64).unsigned_abs()
    } else {
        value as u64
    };

    let mut digits = [0u8; 10];
    let mut count = 0;
    loop {
        digits[count] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        count += 1;
        if magnitude == 0 {
            break;
        }
    }
    for d in digits[..count].iter().rev() {
        out[at] = *d;
        at += 1;
    }
    at
}
