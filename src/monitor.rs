use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{JobArray, Progress, Result};

/// Shared flag a caller can set (from a signal handler, another thread, ...)
/// to stop a [`watch`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Sleep between polls.
    pub interval: Duration,
    /// Give up after this long; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// How long after submission an array that has never shown up in a
    /// listing is still assumed to be queued rather than finished.
    pub registration_grace: Duration,
    /// Consecutive failed polls tolerated before the error is returned.
    pub max_poll_failures: usize,
    pub cancel: CancelToken,
    /// Print a progress line to stderr after each poll.
    pub report: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            interval: Duration::from_secs(1),
            timeout: None,
            registration_grace: Duration::from_secs(10),
            max_poll_failures: 5,
            cancel: CancelToken::default(),
            report: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    Completed,
    TimedOut(Progress),
    Cancelled(Progress),
}

impl WatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, WatchOutcome::Completed)
    }
}

fn report(p: &Progress) {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{}\r", p);
    let _ = stderr.flush();
}

/// Poll `job` until every task has finished, the deadline passes or `cancel`
/// is set.  Cancellation and the deadline are checked once per interval.
pub fn watch(job: &mut JobArray, o: &WatchOptions) -> Result<WatchOutcome> {
    let deadline = o.timeout.map(|t| Instant::now() + t);
    let mut last = Progress::default();
    let mut failures = 0;

    let outcome = loop {
        if o.cancel.is_cancelled() {
            break WatchOutcome::Cancelled(last);
        }

        match job.update() {
            Ok(p) => {
                failures = 0;
                if o.report {
                    report(&p);
                }
                let drained = p.complete >= job.size();
                let registered =
                    p.observed || job.submitted_at().elapsed() >= o.registration_grace;
                if drained && registered {
                    break WatchOutcome::Completed;
                }
                if drained {
                    log::debug!("job array {} not listed yet", job.id());
                }
                last = p;
            }
            Err(e) => {
                failures += 1;
                if failures > o.max_poll_failures {
                    return Err(e);
                }
                log::warn!(
                    "polling job array {} failed ({}/{}): {}",
                    job.id(),
                    failures,
                    o.max_poll_failures,
                    e
                );
            }
        }

        if matches!(deadline, Some(d) if Instant::now() >= d) {
            break WatchOutcome::TimedOut(last);
        }
        std::thread::sleep(o.interval);
    };

    if o.report {
        eprintln!();
    }
    match &outcome {
        WatchOutcome::Completed => log::info!("job array {} complete", job.id()),
        WatchOutcome::TimedOut(_) => log::warn!("timed out waiting for job array {}", job.id()),
        WatchOutcome::Cancelled(_) => log::info!("stopped watching job array {}", job.id()),
    }
    Ok(outcome)
}
