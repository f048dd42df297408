use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser};
use slurm_array::{
    watch, JobArray, Resources, ResourcesBuilder, Scheduler, WatchOptions, WatchOutcome,
};

#[derive(Parser, Debug, Clone)]
#[clap(about = "Submit and watch Slurm job arrays")]
enum ClArgs {
    /// Submit a job array, one task per argument vector
    #[clap(trailing_var_arg(true))]
    Submit {
        #[clap(flatten)]
        options: Options,
        /// COMMAND [::: ARGS...]...  (`::::` reads arguments from files, a
        /// trailing `+` zips a list with the previous one)
        #[clap(required(true), parse(from_str), allow_hyphen_values(true))]
        command: Vec<ArgumentToken>,
    },
    /// Poll a submitted job array until it finishes
    Watch {
        /// Job array ID as printed on submission
        id: String,
        /// Number of tasks in the array
        #[clap(short = 'n', long)]
        size: usize,
        #[clap(flatten)]
        watch: WatchArgs,
    },
    /// Show the state of every listed task once
    Status {
        id: String,
        /// Number of tasks in the array
        #[clap(short = 'n', long)]
        size: usize,
    },
    /// Cancel every task of a job array
    Cancel { id: String },
}

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// CPUs per task
    #[clap(short = 'c', long)]
    cpus: Option<usize>,
    /// Memory per task, e.g. 4G (a bare number is gigabytes)
    #[clap(short = 'm', long = "mem")]
    memory: Option<String>,
    /// Time limit per task, in Slurm's format (minutes, H:M:S, D-H:M:S, ...)
    #[clap(short = 't', long)]
    time: Option<String>,
    /// Quality of service
    #[clap(short = 'q', long)]
    qos: Option<String>,
    /// Generic resources, e.g. gpu:1
    #[clap(long)]
    gres: Option<String>,
    /// Additional sbatch option, KEY or KEY=VALUE (without the leading --)
    #[clap(short = 'D', long = "directive", multiple_occurrences(true))]
    directives: Vec<String>,
    /// sh, bash or local
    #[clap(short = 'I', long, default_value = "bash")]
    interpreter: String,
    /// Argument vectors run by each array task
    #[clap(short = 'k', long, default_value = "1")]
    chunk: usize,
    /// Environment module to load before running
    #[clap(long = "module", multiple_occurrences(true))]
    modules: Vec<String>,
    /// NAME=VALUE to export before running
    #[clap(short = 'e', long = "export", multiple_occurrences(true))]
    exports: Vec<String>,
    /// Flag appended to every call, after the task's own arguments
    #[clap(short = 'f', long = "flag", multiple_occurrences(true), allow_hyphen_values(true))]
    flags: Vec<String>,
    /// Directory for the argument file; must be visible from the compute nodes
    #[clap(long)]
    store_dir: Option<PathBuf>,
    /// Print the generated script and command line.
    #[clap(short = 'v')]
    show_script: bool,
    /// Watch the array after submitting it
    #[clap(short = 'w', long = "watch")]
    watch_after: bool,
    #[clap(flatten)]
    watch: WatchArgs,
}

#[derive(Clone, Debug, Args)]
pub struct WatchArgs {
    /// Seconds between status polls
    #[clap(long, default_value = "1")]
    interval: u64,
    /// Give up watching after this many seconds
    #[clap(long)]
    timeout: Option<u64>,
}

impl WatchArgs {
    fn options(&self) -> WatchOptions {
        WatchOptions {
            interval: Duration::from_secs(self.interval),
            timeout: self.timeout.map(Duration::from_secs),
            ..WatchOptions::default()
        }
    }
}

impl Options {
    fn resources(&self) -> Result<Resources> {
        let defaults = slurm_array::load_default_resources()
            .context("failed to load default resources")?;
        let mut b = match &defaults {
            Some(r) => ResourcesBuilder::from_resources(r),
            None => Resources::builder(),
        };
        if let Some(c) = self.cpus {
            b = b.cpus(c);
        }
        if let Some(m) = &self.memory {
            b = b.memory(m);
        }
        if let Some(t) = &self.time {
            b = b.time(t);
        }
        if let Some(q) = &self.qos {
            b = b.qos(q);
        }
        if let Some(g) = &self.gres {
            b = b.gres(g);
        }
        for d in &self.directives {
            let d = d.trim_start_matches('-');
            b = match d.split_once('=') {
                Some((k, v)) => b.directive(k, Some(v.to_string())),
                None => b.directive(d, None),
            };
        }
        Ok(b.build()?)
    }
}

fn watch_job(job: &mut JobArray, args: &WatchArgs) -> Result<()> {
    match watch(job, &args.options())? {
        WatchOutcome::Completed => Ok(()),
        WatchOutcome::TimedOut(p) => bail!("timed out waiting for job array {} ({})", job.id(), p),
        WatchOutcome::Cancelled(p) => bail!("stopped watching job array {} ({})", job.id(), p),
    }
}

fn print_status(job: &mut JobArray) -> Result<()> {
    use comfy_table::*;

    let p = job.update()?;
    let mut t = Table::new();
    t.add_row::<[&str; 2]>(["Task", "State"]);
    for task in &p.pending {
        t.add_row::<[&str; 2]>([task, "PD"]);
    }
    for task in &p.running {
        t.add_row::<[&str; 2]>([task, "R"]);
    }
    for (task, code) in &p.unrecognized {
        t.add_row::<[&str; 2]>([task, code]);
    }
    if p.listed() > 0 {
        println!("{}", &t);
    }
    println!("{}", p);
    Ok(())
}

fn parse_export(s: &str) -> Result<(&str, &str)> {
    s.split_once('=')
        .ok_or_else(|| anyhow!("exports must be NAME=VALUE, got {:?}", s))
}

pub use parse::*;
mod parse;

mod submit;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match ClArgs::parse() {
        ClArgs::Submit { options, command } => submit::main(options, command),
        ClArgs::Watch { id, size, watch } => {
            let mut job = JobArray::new(
                id,
                size,
                std::sync::Arc::new(Resources::default()),
                Scheduler::system(),
            );
            watch_job(&mut job, &watch)
        }
        ClArgs::Status { id, size } => {
            let mut job = JobArray::new(
                id,
                size,
                std::sync::Arc::new(Resources::default()),
                Scheduler::system(),
            );
            print_status(&mut job)
        }
        ClArgs::Cancel { id } => {
            Scheduler::system()
                .cancel(&id)
                .with_context(|| format!("failed to cancel {}", id))?;
            Ok(())
        }
    }
}
