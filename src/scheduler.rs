use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::protocol::{self, parse_submission};
use crate::{
    CommandOutput, CommandRunner, Error, Invocation, JobArray, Resources, Result,
    SchedulerCommands, SystemRunner,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sbatch {
    Fake,
    Real,
}

impl Sbatch {
    pub fn binary(&self) -> &'static str {
        match self {
            Sbatch::Fake => "sbatch-fake",
            Sbatch::Real => "sbatch",
        }
    }
}

/// Whether a real `sbatch` is installed; falls back to `sbatch-fake`.
pub fn sbatch() -> Sbatch {
    static SBATCH: Lazy<Sbatch> = Lazy::new(|| {
        match std::process::Command::new("sbatch")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
        {
            Ok(_) => Sbatch::Real,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    log::warn!("sbatch was not found on this system, falling back to sbatch-fake.");
                } else {
                    log::warn!("unable to run sbatch ({}), falling back to sbatch-fake.", e);
                }
                Sbatch::Fake
            }
        }
    });
    *SBATCH
}

/// Handle on the external scheduler: which programs to run and how to run
/// them.  Cheap to clone; every [`JobArray`] keeps one for polling.
#[derive(Clone)]
pub struct Scheduler {
    commands: SchedulerCommands,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(commands: SchedulerCommands, runner: Arc<dyn CommandRunner>) -> Self {
        Scheduler { commands, runner }
    }

    /// The system's Slurm, or `sbatch-fake` if `sbatch` is not installed.
    pub fn system() -> Self {
        let commands = SchedulerCommands {
            submit: sbatch().binary().to_string(),
            ..SchedulerCommands::default()
        };
        Scheduler::new(commands, Arc::new(SystemRunner))
    }

    pub fn commands(&self) -> &SchedulerCommands {
        &self.commands
    }

    pub fn run(&self, inv: &Invocation) -> Result<CommandOutput> {
        self.runner.run(inv)
    }

    /// The submission command line for an array of `slots` tasks.
    pub fn submit_invocation(&self, script: &str, directives: &[String], slots: usize) -> Invocation {
        Invocation::new(&self.commands.submit)
            .arg(format!("--array=0-{}", slots.saturating_sub(1)))
            .args(directives.iter().cloned())
            .stdin(script)
    }

    /// Submit `script` as an array of `slots` tasks.
    ///
    /// Nothing is retried: a failed command is [`Error::SubmissionTransport`]
    /// and a reply without a job id is [`Error::SubmissionParse`], which keeps
    /// the script and raw output for diagnosis.
    pub fn submit(
        &self,
        script: &str,
        resources: Arc<Resources>,
        slots: usize,
    ) -> Result<JobArray> {
        if slots == 0 {
            return Err(Error::EmptyBatch);
        }
        let inv = self.submit_invocation(script, &resources.directives(), slots);
        log::debug!("submitting: {}", inv);

        let out = self.run(&inv)?;
        if out.failed() {
            return Err(Error::SubmissionTransport {
                command: inv.to_string(),
                status: out.status,
                stderr: out.stderr,
            });
        }
        if !out.stderr.trim().is_empty() {
            log::warn!("{}: {}", self.commands.submit, out.stderr.trim());
        }

        match parse_submission(&out.stdout) {
            Some(id) => {
                log::info!("submitted job array {} with {} tasks", id, slots);
                Ok(JobArray::new(id, slots, resources, self.clone()))
            }
            None => Err(Error::SubmissionParse {
                output: out.stdout,
                script: script.to_string(),
            }),
        }
    }

    pub fn status_invocation(&self, id: &str) -> Invocation {
        Invocation::new(&self.commands.status)
            .arg("-r")
            .arg("-j")
            .arg(id)
    }

    /// Fetch the raw status listing for array `id`.
    ///
    /// An array Slurm has already forgotten about yields an empty listing.
    pub fn status(&self, id: &str) -> Result<String> {
        let inv = self.status_invocation(id);
        let out = self.run(&inv)?;
        if out.failed() {
            if out.stderr.contains(protocol::INVALID_JOB_ID) {
                log::debug!("{} no longer known to the scheduler", id);
                return Ok(String::new());
            }
            return Err(Error::StatusTransport {
                command: inv.to_string(),
                status: out.status,
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }

    pub fn cancel(&self, id: &str) -> Result<()> {
        let inv = Invocation::new(&self.commands.cancel).arg(id);
        let out = self.run(&inv)?;
        if out.failed() {
            return Err(Error::CancelTransport {
                command: inv.to_string(),
                status: out.status,
                stderr: out.stderr,
            });
        }
        log::info!("cancelled job array {}", id);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn scripted(runner: crate::ScriptedRunner) -> (Scheduler, Arc<crate::ScriptedRunner>) {
    let runner = Arc::new(runner);
    let s = Scheduler::new(SchedulerCommands::default(), runner.clone());
    (s, runner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedRunner;

    #[test]
    fn submit_ten_tasks() -> Result<()> {
        let (s, runner) = scripted(ScriptedRunner::new().ok("Submitted batch job 4821\n"));
        let resources = Arc::new(Resources::default());
        let job = s.submit("#!/bin/sh\necho hi\n", resources.clone(), 10)?;
        assert_eq!(job.id(), "4821");
        assert_eq!(job.size(), 10);

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "sbatch");
        assert_eq!(calls[0].args[0], "--array=0-9");
        assert_eq!(&calls[0].args[1..], resources.directives().as_slice());
        assert_eq!(calls[0].stdin.as_deref(), Some("#!/bin/sh\necho hi\n"));
        Ok(())
    }

    #[test]
    fn transport_error_builds_nothing() {
        let (s, _) = scripted(ScriptedRunner::new().fail("sbatch: error: Batch job submission failed"));
        let r = s.submit("#!/bin/sh\n", Arc::new(Resources::default()), 3);
        match r {
            Err(e @ Error::SubmissionTransport { .. }) => assert!(!e.is_fatal()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let (s, _) = scripted(ScriptedRunner::new().missing("sbatch"));
        let r = s.submit("#!/bin/sh\n", Arc::new(Resources::default()), 3);
        assert!(matches!(r, Err(Error::Spawn { .. })));
    }

    #[test]
    fn unparseable_reply_keeps_context() {
        let (s, _) = scripted(ScriptedRunner::new().ok("something unexpected\n"));
        let r = s.submit("#!/bin/sh\nrun\n", Arc::new(Resources::default()), 2);
        match r {
            Err(Error::SubmissionParse { output, script }) => {
                assert_eq!(output, "something unexpected\n");
                assert_eq!(script, "#!/bin/sh\nrun\n");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn purged_array_has_empty_listing() -> Result<()> {
        let (s, runner) = scripted(
            ScriptedRunner::new()
                .fail("slurm_load_jobs error: Invalid job id specified\n")
                .fail("slurm_load_jobs error: Unable to contact slurm controller\n"),
        );
        assert_eq!(s.status("4821")?, "");
        assert!(matches!(s.status("4821"), Err(Error::StatusTransport { .. })));
        assert_eq!(runner.calls()[0].args, vec!["-r", "-j", "4821"]);
        Ok(())
    }

    #[test]
    fn cancel() -> Result<()> {
        let (s, runner) = scripted(ScriptedRunner::new().ok(""));
        s.cancel("4821")?;
        assert_eq!(runner.calls()[0].to_string(), "scancel 4821");
        Ok(())
    }

    #[test]
    fn failed_cancel_names_the_cancel_command() {
        let (s, _) = scripted(ScriptedRunner::new().fail("scancel: error: Kill job error\n"));
        let e = s.cancel("4821").unwrap_err();
        assert!(matches!(e, Error::CancelTransport { .. }));
        assert!(e.to_string().starts_with("cancel command `scancel 4821` failed"));
    }
}
