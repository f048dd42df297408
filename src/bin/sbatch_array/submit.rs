use slurm_array::{
    Batch, Environment, Interpreter, RenderedScript, Sbatch, Scheduler, ScriptTemplate,
    SystemRunner,
};

use super::*;

fn environment(o: &Options) -> Result<Environment> {
    let mut env = Environment::new();
    for m in &o.modules {
        env = env.module(m);
    }
    for e in &o.exports {
        let (name, value) = parse_export(e)?;
        env = env.export(name, value)?;
    }
    Ok(env)
}

fn show_script(scheduler: &Scheduler, batch: &Batch, script: &RenderedScript) {
    let inv = scheduler.submit_invocation(&script.text, &batch.resources.directives(), script.slots);
    println!("# {:-^80}", " COMMAND ");
    println!("{}", inv);
    println!(
        "# {:-^80}",
        format!(" SCRIPT ({}) ", script.store.path().display())
    );
    print!("{}", script.text);
}

fn run_local(batch: &Batch, chunk: usize) -> Result<()> {
    let tasks = batch.run_local(&SystemRunner, chunk)?;
    let mut failed = 0;
    for t in &tasks {
        print!("{}", t.output.stdout);
        eprint!("{}", t.output.stderr);
        if t.output.failed() {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} of {} local tasks failed", failed, tasks.len())
    }
    Ok(())
}

pub fn main(options: Options, command: Vec<ArgumentToken>) -> Result<()> {
    let (function, lists) = parse_command(command)?;
    let vectors = lists
        .ok_or_else(|| anyhow!("At least one argument list (:::) is required"))?
        .expand();

    let interpreter: Interpreter = options.interpreter.parse()?;
    let template = ScriptTemplate::new(interpreter, function)
        .environment(environment(&options)?)
        .flags(options.flags.iter().cloned());

    let mut batch = Batch::new(template, options.resources()?, vectors);
    if let Some(dir) = &options.store_dir {
        batch = batch.store_dir(dir);
    }

    if interpreter.is_local() {
        return run_local(&batch, options.chunk);
    }

    let scheduler = Scheduler::system();
    let script = batch.prepare(options.chunk)?;
    if options.show_script {
        show_script(&scheduler, &batch, &script);
    }

    let mut job = batch.submit(&scheduler, &script).map_err(|e| match e {
        slurm_array::Error::SubmissionParse { output, script } => anyhow!(
            "failed to parse submission output:\n{}\n# script:\n{}",
            output,
            script
        ),
        e => e.into(),
    })?;
    eprintln!("Submitted job array {} ({} tasks)", job.id(), job.size());

    if options.watch_after {
        if slurm_array::sbatch() == Sbatch::Fake {
            log::warn!("submitted with sbatch-fake, nothing to watch");
        } else {
            watch_job(&mut job, &options.watch)?;
        }
    }
    Ok(())
}
