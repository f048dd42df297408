use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    CommandOutput, CommandRunner, Error, Invocation, JobArray, RenderedScript, Resources, Result,
    Scheduler, ScriptTemplate, TASK_ID_VAR,
};

/// A set of argument vectors to run through one shared script template.
#[derive(Debug, Clone)]
pub struct Batch {
    pub template: ScriptTemplate,
    pub resources: Arc<Resources>,
    pub vectors: Vec<Vec<String>>,
    /// Where to write the argument store; the working directory if `None`.
    pub store_dir: Option<PathBuf>,
}

/// Result of running one slot of a local batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTask {
    pub slot: usize,
    pub output: CommandOutput,
}

impl Batch {
    pub fn new(template: ScriptTemplate, resources: Resources, vectors: Vec<Vec<String>>) -> Self {
        Batch {
            template,
            resources: Arc::new(resources),
            vectors,
            store_dir: None,
        }
    }

    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    /// Write the argument store and render the script, `chunk` vectors per
    /// array task.
    pub fn prepare(&self, chunk: usize) -> Result<RenderedScript> {
        self.template.render(
            &self.vectors,
            &self.resources,
            chunk,
            self.store_dir.as_deref(),
        )
    }

    /// Submit an already rendered script.
    pub fn submit(&self, scheduler: &Scheduler, script: &RenderedScript) -> Result<JobArray> {
        if self.template.interpreter.is_local() {
            return Err(Error::LocalSubmission);
        }
        scheduler.submit(&script.text, self.resources.clone(), script.slots)
    }

    /// Render and submit in one go.
    pub fn run(&self, scheduler: &Scheduler, chunk: usize) -> Result<JobArray> {
        if self.template.interpreter.is_local() {
            return Err(Error::LocalSubmission);
        }
        let script = self.prepare(chunk)?;
        self.submit(scheduler, &script)
    }

    /// Run every slot of a local-mode script in turn with `sh`, setting the
    /// task id the way the scheduler would.
    pub fn run_local(&self, runner: &dyn CommandRunner, chunk: usize) -> Result<Vec<LocalTask>> {
        if !self.template.interpreter.is_local() {
            return Err(Error::NotLocal(self.template.interpreter.to_string()));
        }
        let script = self.prepare(chunk)?;
        let mut tasks = Vec::with_capacity(script.slots);
        for slot in 0..script.slots {
            let inv = Invocation::new("sh")
                .env(TASK_ID_VAR, slot.to_string())
                .stdin(script.text.as_str());
            let output = runner.run(&inv)?;
            if output.failed() {
                log::warn!("local task {} failed ({})", slot, output.status);
            }
            tasks.push(LocalTask { slot, output });
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::scripted;
    use crate::{Interpreter, ScriptedRunner, SystemRunner};

    fn batch(interpreter: Interpreter, n: usize, dir: &std::path::Path) -> Batch {
        let vectors = (0..n)
            .map(|i| vec!["--seed".to_string(), i.to_string()])
            .collect();
        Batch::new(
            ScriptTemplate::new(interpreter, "echo run"),
            Resources::default(),
            vectors,
        )
        .store_dir(dir)
    }

    #[test]
    fn run_submits_one_array() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let (s, runner) = scripted(ScriptedRunner::new().ok("Submitted batch job 4821\n"));
        let job = batch(Interpreter::Sh, 10, dir.path()).run(&s, 1)?;
        assert_eq!(job.id(), "4821");
        assert_eq!(job.size(), 10);
        assert_eq!(runner.calls()[0].args[0], "--array=0-9");
        Ok(())
    }

    #[test]
    fn chunking_shrinks_the_array() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let (s, runner) = scripted(ScriptedRunner::new().ok("Submitted batch job 12\n"));
        let job = batch(Interpreter::Bash, 12, dir.path()).run(&s, 4)?;
        assert_eq!(job.size(), 3);
        assert_eq!(runner.calls()[0].args[0], "--array=0-2");
        Ok(())
    }

    #[test]
    fn uneven_chunks_never_reach_the_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let (s, runner) = scripted(ScriptedRunner::new());
        let r = batch(Interpreter::Sh, 9, dir.path()).run(&s, 4);
        assert!(matches!(r, Err(Error::UnevenChunking { .. })));
        assert!(runner.calls().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn local_batches_are_not_submitted() {
        let dir = tempfile::tempdir().unwrap();
        let (s, _) = scripted(ScriptedRunner::new());
        let r = batch(Interpreter::Local, 2, dir.path()).run(&s, 1);
        assert!(matches!(r, Err(Error::LocalSubmission)));
    }

    #[test]
    fn batch_scripts_are_not_run_locally() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let r = batch(Interpreter::Bash, 2, dir.path()).run_local(&runner, 1);
        assert!(matches!(r, Err(Error::NotLocal(_))));
        assert!(runner.calls().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn local_run_reads_each_line() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let mut b = batch(Interpreter::Local, 4, dir.path());
        b.vectors.insert(1, vec![]);
        let tasks = b.run_local(&SystemRunner, 2)?;
        let out: Vec<_> = tasks.iter().map(|t| t.output.stdout.as_str()).collect();
        assert_eq!(
            out,
            vec![
                "run --seed 0\nrun --seed 1\n",
                "run --seed 2\nrun --seed 3\n"
            ]
        );
        assert!(tasks.iter().all(|t| !t.output.failed()));
        Ok(())
    }
}
