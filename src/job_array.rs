use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use crate::protocol::{parse_listing, split_task_id};
use crate::{join_display, Error, IndexMap, Resources, Result, Scheduler};

static PENDING_CODES: phf::Set<&'static str> = phf::phf_set! { "PD" };

/// `CG` (completing) is still holding resources, so it counts as running.
static RUNNING_CODES: phf::Set<&'static str> = phf::phf_set! { "R", "CG" };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    Running,
    /// Listed, but with a code we do not know how to classify.
    Unknown,
}

impl TaskState {
    pub fn from_code(code: &str) -> Self {
        if PENDING_CODES.contains(code) {
            TaskState::Pending
        } else if RUNNING_CODES.contains(code) {
            TaskState::Running
        } else {
            TaskState::Unknown
        }
    }
}

/// One poll's worth of array state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Tasks no longer listed by the scheduler.
    pub complete: usize,
    pub pending: Vec<String>,
    pub running: Vec<String>,
    /// Listed tasks whose state code was not recognised, with that code.
    pub unrecognized: Vec<(String, String)>,
    /// Whether any listing of this array has ever contained a task.  Until
    /// then, `complete` cannot tell finished tasks from tasks the scheduler
    /// has not registered yet.
    pub observed: bool,
}

impl Progress {
    pub fn listed(&self) -> usize {
        self.pending.len() + self.running.len() + self.unrecognized.len()
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pending: {:04} | Running: {:04} | Complete: {:04}",
            self.pending.len(),
            self.running.len(),
            self.complete
        )?;
        if !self.unrecognized.is_empty() {
            write!(f, " | Other: {:04}", self.unrecognized.len())?;
        }
        Ok(())
    }
}

/// A submitted job array.
///
/// Holds no live status beyond whether the array has been seen in a listing;
/// every [`update`](JobArray::update) recomputes state from a fresh listing.
#[derive(Debug, Clone)]
pub struct JobArray {
    id: String,
    size: usize,
    resources: Arc<Resources>,
    scheduler: Scheduler,
    submitted_at: Instant,
    observed: bool,
}

impl JobArray {
    pub fn new(
        id: impl Into<String>,
        size: usize,
        resources: Arc<Resources>,
        scheduler: Scheduler,
    ) -> Self {
        JobArray {
            id: id.into(),
            size,
            resources,
            scheduler,
            submitted_at: Instant::now(),
            observed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn observed(&self) -> bool {
        self.observed
    }

    /// Poll the scheduler once.
    ///
    /// Tasks missing from the listing are counted as complete.  Unknown state
    /// codes and other inconsistencies are logged, never fatal.
    pub fn update(&mut self) -> Result<Progress> {
        let listing = self.scheduler.status(&self.id)?;
        let tasks = parse_listing(&listing).map_err(|e| Error::StatusParse(e.to_string()))?;
        let progress = self.classify(tasks);
        self.observed = progress.observed;
        Ok(progress)
    }

    fn classify(&self, tasks: IndexMap<String, String>) -> Progress {
        let mut p = Progress::default();

        for (task, code) in tasks {
            match split_task_id(&task) {
                Some((array, _)) if array != self.id => {
                    log::warn!("ignoring task {} listed for job array {}", task, self.id);
                    continue;
                }
                Some(_) => {}
                None => log::warn!("unexpected task id {:?} in listing for {}", task, self.id),
            }
            match TaskState::from_code(&code) {
                TaskState::Pending => p.pending.push(task),
                TaskState::Running => {
                    if code != "R" {
                        log::debug!("task {} is {}, counting it as running", task, code);
                    }
                    p.running.push(task)
                }
                TaskState::Unknown => p.unrecognized.push((task, code)),
            }
        }

        if !p.unrecognized.is_empty() {
            log::warn!(
                "job array {}: {} task(s) with unrecognized state: {}",
                self.id,
                p.unrecognized.len(),
                join_display(p.unrecognized.iter().map(|(t, c)| format!("{}={}", t, c)), ' ')
            );
        }

        let listed = p.listed();
        if listed > self.size {
            log::warn!(
                "job array {} lists {} tasks but only {} were submitted",
                self.id,
                listed,
                self.size
            );
        }
        p.complete = self.size.saturating_sub(listed);
        p.observed = self.observed || listed > 0;
        p
    }

    /// Cancel every task of the array.
    pub fn cancel(&self) -> Result<()> {
        self.scheduler.cancel(&self.id)
    }
}
