//! Process-wide "cores requested" hint.
//!
//! Rendering a script publishes the cpu count of its [`Resources`](crate::Resources)
//! here so that in-process collaborators (thread pools sized for the job, for
//! instance) can read it.  The value the script itself needs is threaded
//! explicitly; this is informational only.
//!
//! Writers are serialised by a mutex and each publication bumps a version, so
//! readers either see the old `(version, cores)` pair or the new one, never a
//! mix.
use std::sync::Mutex;

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreHint {
    pub version: u64,
    pub cores: usize,
}

static HINT: Lazy<Mutex<CoreHint>> = Lazy::new(|| {
    let cores = std::env::var("NUM_CORES")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1);
    Mutex::new(CoreHint { version: 0, cores })
});

/// Publish a new core count, returning the hint as stored.
pub fn publish(cores: usize) -> CoreHint {
    let mut guard = match HINT.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.version += 1;
    guard.cores = cores;
    log::debug!("core hint set to {} (version {})", cores, guard.version);
    *guard
}

pub fn current() -> CoreHint {
    match HINT.lock() {
        Ok(g) => *g,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_writers_never_tear() {
        let handles: Vec<_> = (1..=8)
            .map(|n| std::thread::spawn(move || (n, publish(n))))
            .collect();
        let mut hints: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (n, h) in &hints {
            assert_eq!(h.cores, *n);
        }
        hints.sort_by_key(|(_, h)| h.version);
        hints.dedup_by_key(|(_, h)| h.version);
        assert_eq!(hints.len(), 8);

        // other tests may publish concurrently, but never behind our last write
        let last = hints[7].1;
        let now = current();
        assert!(now.version >= last.version);
        if now.version == last.version {
            assert_eq!(now, last);
        }
    }
}
