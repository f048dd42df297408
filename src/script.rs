use std::fmt::{Display, Write};
use std::path::Path;
use std::str::FromStr;

use regex::Regex;

use crate::{cores, store_lines, ArgumentStore, Error, Resources, Result};

/// Variable the scheduler sets to the task's index within the array.
pub const TASK_ID_VAR: &str = "SLURM_ARRAY_TASK_ID";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Interpreter {
    /// `#!/bin/sh`
    Sh,
    /// `#!/bin/bash`
    Bash,
    /// No shebang and no scheduler header; the caller runs the script itself
    /// with the task id set.
    Local,
}

impl Interpreter {
    pub fn shebang(&self) -> Option<&'static str> {
        match self {
            Interpreter::Sh => Some("#!/bin/sh"),
            Interpreter::Bash => Some("#!/bin/bash"),
            Interpreter::Local => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Interpreter::Local)
    }
}

impl FromStr for Interpreter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "sh" | "#!/bin/sh" => Ok(Interpreter::Sh),
            "bash" | "#!/bin/bash" => Ok(Interpreter::Bash),
            "local" => Ok(Interpreter::Local),
            other => Err(Error::UnsupportedInterpreter(other.to_string())),
        }
    }
}

impl Display for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Interpreter::Sh => "sh",
            Interpreter::Bash => "bash",
            Interpreter::Local => "local",
        })
    }
}

/// Environment modules to load and variables to export before the first task
/// runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    modules: Vec<String>,
    exports: Vec<(String, String)>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, m: impl Into<String>) -> Self {
        self.modules.push(m.into());
        self
    }

    /// `value` is written verbatim, so it may refer to other variables.
    pub fn export(mut self, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        lazy_static::lazy_static! {
            static ref NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
        }
        let name = name.into();
        if !NAME.is_match(&name) {
            return Err(Error::InvalidEnvironment(format!(
                "{:?} is not a valid variable name",
                name
            )));
        }
        self.exports.push((name, value.into()));
        Ok(self)
    }

    fn lines(&self) -> Vec<String> {
        let mut lines = vec![];
        if !self.modules.is_empty() {
            lines.push("module purge".to_string());
            lines.extend(self.modules.iter().map(|m| format!("module add {}", m)));
        }
        lines.extend(
            self.exports
                .iter()
                .map(|(k, v)| format!("export {}={}", k, v)),
        );
        lines
    }
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Number of array slots needed for `total` vectors, `chunk` per slot.
pub fn slot_count(total: usize, chunk: usize) -> Result<usize> {
    if total == 0 {
        return Err(Error::EmptyBatch);
    }
    if chunk == 0 || total % chunk != 0 {
        return Err(Error::UnevenChunking { total, chunk });
    }
    Ok(total / chunk)
}

/// A script rendered for submission, together with the argument store it
/// reads from.
#[derive(Debug, Clone)]
pub struct RenderedScript {
    pub text: String,
    pub store: ArgumentStore,
    pub slots: usize,
    pub chunk: usize,
}

/// The shape of every task's script: `function <task args...> <flags>`.
#[derive(Clone, Debug)]
pub struct ScriptTemplate {
    pub interpreter: Interpreter,
    pub environment: Environment,
    pub function: String,
    pub flags: Vec<String>,
}

impl ScriptTemplate {
    pub fn new(interpreter: Interpreter, function: impl Into<String>) -> Self {
        ScriptTemplate {
            interpreter,
            environment: Environment::default(),
            function: function.into(),
            flags: vec![],
        }
    }

    pub fn environment(mut self, env: Environment) -> Self {
        self.environment = env;
        self
    }

    pub fn flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Write the argument store and render the script that reads it.
    ///
    /// Chunking is validated before anything touches the filesystem.  The
    /// requested cpu count is published to [`cores`] once per call.
    pub fn render<V, S>(
        &self,
        vectors: &[V],
        resources: &Resources,
        chunk: usize,
        store_dir: Option<&Path>,
    ) -> Result<RenderedScript>
    where
        V: AsRef<[S]>,
        S: AsRef<str>,
    {
        let lines = store_lines(vectors);
        let slots = slot_count(lines.len(), chunk)?;
        let store = ArgumentStore::create(&lines, store_dir)?;
        cores::publish(resources.cpus());
        let text = self.render_text(&store, resources, chunk);
        log::debug!("rendered script:\n{}", text);
        Ok(RenderedScript {
            text,
            store,
            slots,
            chunk,
        })
    }

    /// Render against an existing store.  `chunk` lines are consumed per task.
    pub fn render_text(&self, store: &ArgumentStore, resources: &Resources, chunk: usize) -> String {
        let mut s = String::new();

        if let Some(shebang) = self.interpreter.shebang() {
            let _ = writeln!(s, "{}", shebang);
            for d in resources.directives() {
                let _ = writeln!(s, "#SBATCH {}", d);
            }
            for line in self.environment.lines() {
                let _ = writeln!(s, "{}", line);
            }
            let _ = writeln!(s, "export NUM_CORES={}", resources.cpus());
        }

        let path = shell_quote(&store.path().to_string_lossy());
        let flags = self.flags.join(" ");

        for slot in 0..chunk {
            let _ = writeln!(s, "IND=$(( ${} * {} + {} + 1 ))", TASK_ID_VAR, chunk, slot);
            let _ = writeln!(s, "ARGS=\"$(awk 'NR == n' n=\"$IND\" {})\"", path);

            let args = match self.interpreter {
                Interpreter::Bash => {
                    let _ = writeln!(s, "IFS=' ' read -r -a jobargs <<< \"$ARGS\"");
                    "\"${jobargs[@]}\""
                }
                Interpreter::Sh | Interpreter::Local => {
                    let _ = writeln!(s, "set -f");
                    let _ = writeln!(s, "set -- $ARGS");
                    let _ = writeln!(s, "set +f");
                    "\"$@\""
                }
            };

            let mut call = format!("{} {}", self.function, args);
            if !flags.is_empty() {
                call.push(' ');
                call.push_str(&flags);
            }
            let _ = writeln!(s, "{}", call);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svec;

    #[test]
    fn interpreters() {
        assert_eq!("sh".parse::<Interpreter>().unwrap(), Interpreter::Sh);
        assert_eq!("#!/bin/bash".parse::<Interpreter>().unwrap(), Interpreter::Bash);
        assert_eq!("local".parse::<Interpreter>().unwrap(), Interpreter::Local);
        let err = "zsh".parse::<Interpreter>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedInterpreter(ref s) if s == "zsh"));
        assert!(err.is_fatal());
    }

    #[test]
    fn slot_counts() {
        assert_eq!(slot_count(10, 1).unwrap(), 10);
        assert_eq!(slot_count(12, 4).unwrap(), 3);
        assert!(matches!(
            slot_count(9, 4),
            Err(Error::UnevenChunking { total: 9, chunk: 4 })
        ));
        assert!(matches!(slot_count(9, 0), Err(Error::UnevenChunking { .. })));
        assert!(matches!(slot_count(0, 1), Err(Error::EmptyBatch)));
    }

    #[test]
    fn environment_lines() -> Result<()> {
        let env = Environment::new()
            .module("singularity")
            .export("NAME", "world")?;
        assert_eq!(
            env.lines(),
            svec!["module purge", "module add singularity", "export NAME=world"]
        );
        assert!(Environment::new().export("1BAD", "x").is_err());
        assert!(Environment::new().lines().is_empty());
        Ok(())
    }

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn uneven_chunking_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let vectors: Vec<Vec<String>> = (0..9).map(|i| vec![i.to_string()]).collect();
        let t = ScriptTemplate::new(Interpreter::Sh, "echo");
        let r = t.render(&vectors, &Resources::default(), 4, Some(dir.path()));
        assert!(matches!(r, Err(Error::UnevenChunking { total: 9, chunk: 4 })));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn bash_script_layout() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let vectors: Vec<Vec<String>> = (0..4).map(|i| vec!["-n".to_string(), i.to_string()]).collect();
        let resources = Resources::builder().cpus(2).memory("4G").time("30").build()?;
        let t = ScriptTemplate::new(Interpreter::Bash, "python3 run.py")
            .environment(Environment::new().export("MODE", "fast")?)
            .flags(["--verbose"]);

        let r = t.render(&vectors, &resources, 2, Some(dir.path()))?;
        assert_eq!(r.slots, 2);
        assert_eq!(r.chunk, 2);
        assert_eq!(r.store.len(), 4);

        let lines: Vec<_> = r.text.lines().collect();
        assert_eq!(lines[0], "#!/bin/bash");
        assert_eq!(lines[1], "#SBATCH --nodes=1");
        assert!(lines.contains(&"#SBATCH --cpus-per-task=2"));
        assert!(lines.contains(&"export MODE=fast"));
        assert!(lines.contains(&"export NUM_CORES=2"));
        assert!(lines.contains(&"IND=$(( $SLURM_ARRAY_TASK_ID * 2 + 0 + 1 ))"));
        assert!(lines.contains(&"IND=$(( $SLURM_ARRAY_TASK_ID * 2 + 1 + 1 ))"));
        assert_eq!(
            lines
                .iter()
                .filter(|l| **l == "python3 run.py \"${jobargs[@]}\" --verbose")
                .count(),
            2
        );
        assert!(r.text.contains(&shell_quote(&r.store.path().to_string_lossy())));
        Ok(())
    }

    #[test]
    fn local_script_has_no_header() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let t = ScriptTemplate::new(Interpreter::Local, "echo")
            .environment(Environment::new().module("gcc"));
        let r = t.render(&[svec!["a"]], &Resources::default(), 1, Some(dir.path()))?;
        assert!(r.text.starts_with("IND="));
        assert!(!r.text.contains("#SBATCH"));
        assert!(!r.text.contains("module"));
        assert!(r.text.ends_with("echo \"$@\"\n"));
        Ok(())
    }
}
