//! Stand-in for `sbatch` on machines without Slurm.  Checks the batch script
//! and the array range, then answers the way `sbatch` does without running
//! anything.
use std::io::Read;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use clap::Parser;

#[derive(Parser)]
#[clap(trailing_var_arg(true), allow_hyphen_values(true))]
struct Args {
    #[clap(long, short = 'a')]
    array: Option<String>,

    #[clap(long, short = 'N')]
    nodes: Option<String>,

    #[clap(long, short = 'c')]
    cpus_per_task: Option<String>,

    #[clap(long)]
    mem: Option<String>,

    #[clap(long, short = 't')]
    time: Option<String>,

    #[clap(long, short = 'q')]
    qos: Option<String>,

    #[clap(long)]
    gres: Option<String>,

    #[clap(long, short = 'p')]
    partition: Option<String>,

    #[clap(long)]
    parsable: bool,

    /// Batch script, then its arguments.  Read from stdin when absent.
    /// Unrecognised options end up here too and are ignored.
    rest: Vec<String>,
}

fn get_fake_id() -> u128 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() % 10_000_000)
        .unwrap_or(1)
}

fn check_array(range: &str) -> Result<()> {
    let (start, end) = range
        .split_once('-')
        .context("expected an array range of the form START-END")?;
    let start: u64 = start.parse().context("bad array start")?;
    let end: u64 = end.parse().context("bad array end")?;
    if start > end {
        bail!("Invalid job array specification")
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(range) = &args.array {
        check_array(range)?;
    }

    let script = match args.rest.iter().find(|a| !a.starts_with('-')) {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {:?}", path))?,
        None => {
            let mut s = String::new();
            std::io::stdin()
                .read_to_string(&mut s)
                .context("failed to read batch script from stdin")?;
            s
        }
    };
    if script.is_empty() {
        bail!("Batch script is empty!")
    }
    if script.chars().all(char::is_whitespace) {
        bail!("Batch script contains only whitespace!")
    }
    if !script.starts_with("#!") {
        bail!("This does not look like a batch script.  The first line must start with #! followed by the path to an interpreter")
    }

    if args.parsable {
        println!("{}", get_fake_id());
    } else {
        println!("Submitted batch job {}", get_fake_id());
    }

    Ok(())
}
