//! Process-global argument mirror.
//!
//! Some language bindings fetch command-line arguments through runtime
//! accessors that never look at the argument vector the host language sees.
//! The mirror gives those accessors one stable place to read the sub-job's
//! arguments from. It is written once, during launch, before the
//! application gains control, and is read-only after that.

use std::sync::RwLock;

static MIRROR: RwLock<Vec<Vec<u8>>> = RwLock::new(Vec::new());

/// Publishes the argument vector. Called by per-process setup; the last
/// publish before the application starts is what accessors observe.
pub fn publish(argv: Vec<Vec<u8>>) {
    *MIRROR.write().unwrap_or_else(|e| e.into_inner()) = argv;
}

/// Number of published arguments (the `argc` half of the mirror).
pub fn arg_count() -> usize {
    MIRROR.read().unwrap_or_else(|e| e.into_inner()).len()
}

/// Returns a copy of argument `i`, or `None` past the end.
pub fn arg(i: usize) -> Option<Vec<u8>> {
    MIRROR
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(i)
        .cloned()
}

/// Copies argument `i` into a fixed-width buffer, filling the tail with
/// nul bytes, and returns how many argument bytes were copied. Bindings
/// with fixed-length string variables read arguments this way.
pub fn copy_arg(i: usize, dest: &mut [u8]) -> usize {
    let mirror = MIRROR.read().unwrap_or_else(|e| e.into_inner());
    let copied = match mirror.get(i) {
        Some(arg) => {
            let n = arg.len().min(dest.len());
            dest[..n].copy_from_slice(&arg[..n]);
            n
        }
        None => 0,
    };
    for b in dest[copied..].iter_mut() {
        *b = 0;
    }
    copied
}
