//! Parsers for the free-text output of the scheduler commands.
//!
//! Both grammars are deliberately small:
//!
//! * submission reply: the first line containing [`SUCCESS_MARKER`]; the job
//!   id is the first word following the marker on that line (federated
//!   clusters append ` on cluster <name>`).
//! * status listing: whitespace separated columns, the first non-empty line
//!   is a header, and the task id and state columns are found by name.
use regex::Regex;

use crate::IndexMap;

pub const SUCCESS_MARKER: &str = "Submitted batch job ";

pub const JOB_ID_COLUMN: &str = "JOBID";
pub const STATE_COLUMN: &str = "ST";

/// Message Slurm prints when asked about an array it has already purged.
pub const INVALID_JOB_ID: &str = "Invalid job id specified";

/// Extract the job id from a submission reply.
pub fn parse_submission(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|l| l.split_once(SUCCESS_MARKER))
        .find_map(|(_, rest)| rest.split_whitespace().next())
        .map(String::from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingError {
    MissingColumn(&'static str),
    ShortRow(String),
}

impl std::fmt::Display for ListingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingError::MissingColumn(c) => write!(f, "header has no {} column", c),
            ListingError::ShortRow(r) => write!(f, "row has too few fields: {:?}", r),
        }
    }
}

/// Parse a status listing into `task id -> state code`, in listing order.
///
/// An empty listing (no header at all) is an empty map.
pub fn parse_listing(output: &str) -> Result<IndexMap<String, String>, ListingError> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<_> = match lines.next() {
        Some(h) => h.split_whitespace().collect(),
        None => return Ok(IndexMap::new()),
    };

    let column = |name: &'static str| {
        header
            .iter()
            .position(|&c| c == name)
            .ok_or(ListingError::MissingColumn(name))
    };
    let id_col = column(JOB_ID_COLUMN)?;
    let state_col = column(STATE_COLUMN)?;

    let mut tasks = IndexMap::new();
    for line in lines {
        let fields: Vec<_> = line.split_whitespace().collect();
        match (fields.get(id_col), fields.get(state_col)) {
            (Some(id), Some(st)) => {
                tasks.insert(id.to_string(), st.to_string());
            }
            _ => return Err(ListingError::ShortRow(line.to_string())),
        }
    }
    Ok(tasks)
}

/// Split a task id of the form `<array id>_<index>`.
pub fn split_task_id(task: &str) -> Option<(&str, usize)> {
    lazy_static::lazy_static! {
        static ref TASK_ID: Regex = Regex::new(r"^(?P<array>\d+)_(?P<index>\d+)$").unwrap();
    }
    let c = TASK_ID.captures(task)?;
    let array = c.name("array")?.as_str();
    let index = c.name("index")?.as_str().parse().ok()?;
    Some((array, index))
}
