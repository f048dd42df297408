use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Error, IndexMap, Result};

/// Preemptible QOS; jobs under it are submitted with `--requeue`.
pub const PREEMPTIBLE_QOS: &str = "use-everything";

/// Per-task resource request for a job array.
///
/// Built once through [`ResourcesBuilder`] (or deserialized, which goes through
/// the same validation) and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawResources", into = "RawResources")]
pub struct Resources {
    cpus: usize,
    memory: String,
    time: String,
    qos: Option<String>,
    gres: Option<String>,
    extra: IndexMap<String, Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawResources {
    cpus: Option<usize>,
    memory: Option<String>,
    time: Option<String>,
    qos: Option<String>,
    gres: Option<String>,
    extra: IndexMap<String, Option<String>>,
}

impl TryFrom<RawResources> for Resources {
    type Error = Error;

    fn try_from(r: RawResources) -> Result<Self> {
        let mut b = ResourcesBuilder::default();
        if let Some(cpus) = r.cpus {
            b = b.cpus(cpus);
        }
        if let Some(memory) = r.memory {
            b = b.memory(memory);
        }
        if let Some(time) = r.time {
            b = b.time(time);
        }
        b.qos = r.qos;
        b.gres = r.gres;
        b.extra = r.extra;
        b.build()
    }
}

impl From<Resources> for RawResources {
    fn from(r: Resources) -> Self {
        RawResources {
            cpus: Some(r.cpus),
            memory: Some(r.memory),
            time: Some(r.time),
            qos: r.qos,
            gres: r.gres,
            extra: r.extra,
        }
    }
}

impl Default for Resources {
    fn default() -> Self {
        Resources {
            cpus: 1,
            memory: "1G".to_string(),
            time: "10".to_string(),
            qos: None,
            gres: None,
            extra: IndexMap::new(),
        }
    }
}

impl Resources {
    pub fn builder() -> ResourcesBuilder {
        ResourcesBuilder::default()
    }

    pub fn cpus(&self) -> usize {
        self.cpus
    }

    pub fn memory(&self) -> &str {
        &self.memory
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn qos(&self) -> Option<&str> {
        self.qos.as_deref()
    }

    pub fn gres(&self) -> Option<&str> {
        self.gres.as_deref()
    }

    /// The `--key=value` options passed to the submission command, in a stable
    /// order.  The same list is written into the script header.
    pub fn directives(&self) -> Vec<String> {
        let mut d = vec![
            "--nodes=1".to_string(),
            format!("--cpus-per-task={}", self.cpus),
            format!("--mem={}", self.memory),
            format!("--time={}", self.time),
        ];
        if let Some(qos) = &self.qos {
            d.push(format!("--qos={}", qos));
            if qos == PREEMPTIBLE_QOS && !self.extra.contains_key("requeue") {
                d.push("--requeue".to_string());
            }
        }
        if let Some(gres) = &self.gres {
            d.push(format!("--gres={}", gres));
        }
        for (k, v) in &self.extra {
            match v {
                Some(v) => d.push(format!("--{}={}", k, v)),
                None => d.push(format!("--{}", k)),
            }
        }
        d
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourcesBuilder {
    cpus: Option<usize>,
    memory: Option<String>,
    time: Option<String>,
    qos: Option<String>,
    gres: Option<String>,
    extra: IndexMap<String, Option<String>>,
}

impl ResourcesBuilder {
    /// Start from an existing configuration, e.g. one loaded from the
    /// defaults file.
    pub fn from_resources(r: &Resources) -> Self {
        ResourcesBuilder {
            cpus: Some(r.cpus),
            memory: Some(r.memory.clone()),
            time: Some(r.time.clone()),
            qos: r.qos.clone(),
            gres: r.gres.clone(),
            extra: r.extra.clone(),
        }
    }

    pub fn cpus(mut self, n: usize) -> Self {
        self.cpus = Some(n);
        self
    }

    /// Memory per task, e.g. `4G` or `500M`.  A bare integer is in gigabytes.
    pub fn memory(mut self, m: impl Into<String>) -> Self {
        self.memory = Some(m.into());
        self
    }

    pub fn time(mut self, t: impl Into<String>) -> Self {
        self.time = Some(t.into());
        self
    }

    pub fn qos(mut self, q: impl Into<String>) -> Self {
        self.qos = Some(q.into());
        self
    }

    pub fn gres(mut self, g: impl Into<String>) -> Self {
        self.gres = Some(g.into());
        self
    }

    /// Additional `--key[=value]` directive.  Later values replace earlier ones.
    pub fn directive(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<Resources> {
        lazy_static::lazy_static! {
            static ref MEMORY: Regex = Regex::new(r"^(?P<n>\d+)(?P<unit>[KMGT])?$").unwrap();
            static ref DIRECTIVE_KEY: Regex = Regex::new(r"^[a-z][a-z0-9\-]*$").unwrap();
        }
        let defaults = Resources::default();
        let invalid = |msg: String| Err(Error::InvalidResources(msg));

        let cpus = self.cpus.unwrap_or(defaults.cpus);
        if cpus == 0 {
            return invalid("cpu count must be at least 1".into());
        }

        let memory = self.memory.unwrap_or(defaults.memory);
        let memory = match MEMORY.captures(&memory) {
            None => return invalid(format!("unable to parse memory ({})", memory)),
            Some(c) if c.name("unit").is_none() => format!("{}G", &c["n"]),
            Some(_) => memory,
        };

        let time = self.time.unwrap_or(defaults.time);
        if parse_time_limit(&time).is_none() {
            return invalid(format!("unable to parse time limit ({})", time));
        }

        for (name, val) in [("qos", &self.qos), ("gres", &self.gres)] {
            if matches!(val, Some(v) if v.trim().is_empty()) {
                return invalid(format!("{} must not be empty", name));
            }
        }

        for key in self.extra.keys() {
            if !DIRECTIVE_KEY.is_match(key) {
                return invalid(format!("bad directive name ({:?})", key));
            }
        }

        Ok(Resources {
            cpus,
            memory,
            time,
            qos: self.qos,
            gres: self.gres,
            extra: self.extra,
        })
    }
}

/// Parse a Slurm time limit into seconds.
///
/// Accepted: `M`, `M:S`, `H:M:S`, `D-H`, `D-H:M` and `D-H:M:S`.
pub fn parse_time_limit(s: &str) -> Option<u64> {
    lazy_static::lazy_static! {
        static ref WITH_DAYS: Regex =
            Regex::new(r"^(?P<days>\d+)-(?P<hours>\d+)(:(?P<mins>\d+)(:(?P<secs>\d+))?)?$")
                .unwrap();
        static ref WITHOUT_DAYS: Regex =
            Regex::new(r"^(?P<a>\d+)(:(?P<b>\d+)(:(?P<c>\d+))?)?$").unwrap();
    }
    let field = |c: &regex::Captures, n: &str| -> Option<u64> {
        match c.name(n) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };

    if let Some(c) = WITH_DAYS.captures(s) {
        let days = field(&c, "days")?;
        let hrs = field(&c, "hours")?;
        let min = field(&c, "mins")?;
        let secs = field(&c, "secs")?;
        let hrs = days.checked_mul(24)?.checked_add(hrs)?;
        return base60(&[hrs, min, secs]);
    }

    let c = WITHOUT_DAYS.captures(s)?;
    let (a, b, c3) = (field(&c, "a")?, field(&c, "b")?, field(&c, "c")?);
    match (c.name("b").is_some(), c.name("c").is_some()) {
        (false, _) => a.checked_mul(60),
        (true, false) => base60(&[a, b]),
        (true, true) => base60(&[a, b, c3]),
    }
}

/// `[h, m, s]` or `[m, s]` to seconds, `None` on overflow.
fn base60(fields: &[u64]) -> Option<u64> {
    fields
        .iter()
        .try_fold(0u64, |acc, &f| acc.checked_mul(60)?.checked_add(f))
}

pub fn config_directory() -> anyhow::Result<PathBuf> {
    use anyhow::Context;
    let mut p = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("unable to determine user config directory"))?;
    p.push("slurm-array");
    std::fs::create_dir_all(&p)
        .with_context(|| format!("failed to create slurm-array config subdirectory: {:?}", &p))?;
    Ok(p)
}

pub fn defaults_file() -> anyhow::Result<PathBuf> {
    let mut p = config_directory()?;
    p.push("defaults.json");
    Ok(p)
}

/// Load the user's default resources, if a defaults file exists.
pub fn load_default_resources() -> anyhow::Result<Option<Resources>> {
    let p = defaults_file()?;
    if p.exists() {
        read_json(p).map(Some)
    } else {
        Ok(None)
    }
}

pub fn read_json<T, P>(path: P) -> anyhow::Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    use anyhow::Context;
    let path = path.as_ref();
    let f = std::fs::File::open(path).with_context(|| format!("failed to read {:?}", path))?;
    serde_json::from_reader(f).with_context(|| format!("failed to deserialize {:?}", path))
}

/// Programs used to talk to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerCommands {
    pub submit: String,
    pub status: String,
    pub cancel: String,
}

impl Default for SchedulerCommands {
    fn default() -> Self {
        SchedulerCommands {
            submit: "sbatch".to_string(),
            status: "squeue".to_string(),
            cancel: "scancel".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_limit_parsing() {
        const M: u64 = 60;
        const H: u64 = 60 * M;
        const D: u64 = 24 * H;

        assert_eq!(parse_time_limit("10"), Some(10 * M));
        assert_eq!(parse_time_limit("10:30"), Some(10 * M + 30));
        assert_eq!(parse_time_limit("01:00:05"), Some(H + 5));
        assert_eq!(parse_time_limit("2-3"), Some(2 * D + 3 * H));
        assert_eq!(parse_time_limit("2-03:15"), Some(2 * D + 3 * H + 15 * M));
        assert_eq!(
            parse_time_limit("10-12:45:10"),
            Some(10 * D + 12 * H + 45 * M + 10)
        );

        assert_eq!(parse_time_limit(""), None);
        assert_eq!(parse_time_limit("1:2:3:4"), None);
        assert_eq!(parse_time_limit("-00:00:00"), None);
        assert_eq!(parse_time_limit("ten"), None);

        assert_eq!(parse_time_limit("999999999999999999"), None);
        assert_eq!(parse_time_limit("999999999999999999-00"), None);
        assert_eq!(parse_time_limit("1:18446744073709551615"), None);
        assert!(matches!(
            Resources::builder().time("999999999999999999").build(),
            Err(Error::InvalidResources(_))
        ));
    }

    #[test]
    fn builder_validates() {
        assert!(Resources::builder().cpus(0).build().is_err());
        assert!(Resources::builder().memory("lots").build().is_err());
        assert!(Resources::builder().time("soon").build().is_err());
        assert!(Resources::builder().qos(" ").build().is_err());
        assert!(Resources::builder()
            .directive("Bad Key", None)
            .build()
            .is_err());

        let r = Resources::builder().memory("4").build().unwrap();
        assert_eq!(r.memory(), "4G");
    }

    #[test]
    fn directive_order() -> Result<()> {
        let r = Resources::builder()
            .cpus(4)
            .memory("8G")
            .time("1-00:00:00")
            .qos("normal")
            .gres("gpu:1")
            .directive("partition", Some("short".into()))
            .directive("exclusive", None)
            .build()?;
        assert_eq!(
            r.directives(),
            vec![
                "--nodes=1",
                "--cpus-per-task=4",
                "--mem=8G",
                "--time=1-00:00:00",
                "--qos=normal",
                "--gres=gpu:1",
                "--partition=short",
                "--exclusive",
            ]
        );
        Ok(())
    }

    #[test]
    fn preemptible_qos_requeues() -> Result<()> {
        let r = Resources::builder().qos(PREEMPTIBLE_QOS).build()?;
        let d = r.directives();
        assert_eq!(d[4..], ["--qos=use-everything", "--requeue"]);

        let r = Resources::builder()
            .qos(PREEMPTIBLE_QOS)
            .directive("requeue", None)
            .build()?;
        assert_eq!(r.directives().iter().filter(|d| *d == "--requeue").count(), 1);
        Ok(())
    }

    #[test]
    fn deserialize_validates() {
        let r: Resources = serde_json::from_str(r#"{"cpus": 2, "memory": "2G"}"#).unwrap();
        assert_eq!(r.cpus(), 2);
        assert_eq!(r.time(), "10");

        assert!(serde_json::from_str::<Resources>(r#"{"cpus": 0}"#).is_err());
        assert!(serde_json::from_str::<Resources>(r#"{"cpu": 2}"#).is_err());
    }
}
