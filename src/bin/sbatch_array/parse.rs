use std::io::{BufRead, BufReader};
use std::path::Path;

use super::*;

/// One word of the `submit` command line.
///
/// Everything before the first separator is the function every task runs.
/// Each separator starts an argument list:
///
/// * `:::`  the following words are the list
/// * `::::` the following words are files, one list entry per line
/// * a trailing `+` pairs the list element-wise with the previous one instead
///   of taking the cartesian product
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgumentToken {
    Word(String),
    Sep { files: bool, zip: bool },
}

impl ArgumentToken {
    fn is_sep(&self) -> bool {
        matches!(self, ArgumentToken::Sep { .. })
    }
}

impl From<&str> for ArgumentToken {
    fn from(s: &str) -> Self {
        let (files, zip) = match s {
            ":::" => (false, false),
            ":::+" => (false, true),
            "::::" => (true, false),
            "::::+" => (true, true),
            s => return ArgumentToken::Word(s.to_string()),
        };
        ArgumentToken::Sep { files, zip }
    }
}

fn read_lines_from_file(path: impl AsRef<Path>, dest: &mut Vec<String>) -> Result<()> {
    let path = path.as_ref();
    let reader = std::fs::File::open(path)
        .map(BufReader::new)
        .with_context(|| format!("failed to read {:?}", path))?;

    for l in reader.lines() {
        dest.push(l.with_context(|| format!("failed to read {:?}", path))?);
    }
    Ok(())
}

/// Lists that advance together; the group is as long as its shortest list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ZipGroup {
    start: usize,
    end: usize,
    len: usize,
}

#[derive(Clone, Debug)]
pub struct ArgumentLists {
    groups: Vec<ZipGroup>,
    lists: Vec<Vec<String>>,
}

impl ArgumentLists {
    fn new(zip_with_previous: &[bool], lists: Vec<Vec<String>>) -> Self {
        debug_assert_eq!(zip_with_previous.len(), lists.len());
        let mut groups: Vec<ZipGroup> = vec![];
        for (k, (&zip, list)) in zip_with_previous.iter().zip(&lists).enumerate() {
            match groups.last_mut() {
                Some(g) if zip => {
                    g.end = k + 1;
                    g.len = g.len.min(list.len());
                }
                _ => groups.push(ZipGroup {
                    start: k,
                    end: k + 1,
                    len: list.len(),
                }),
            }
        }
        ArgumentLists { groups, lists }
    }

    /// Number of argument vectors this expands to.
    pub fn len(&self) -> usize {
        if self.groups.is_empty() {
            0
        } else {
            self.groups.iter().map(|g| g.len).product()
        }
    }

    /// All argument vectors, last list varying fastest.
    pub fn expand(&self) -> Vec<Vec<String>> {
        let n = self.len();
        let mut out = Vec::with_capacity(n);
        for mut k in 0..n {
            let mut picks = vec![0; self.groups.len()];
            for (pick, g) in picks.iter_mut().zip(&self.groups).rev() {
                *pick = k % g.len;
                k /= g.len;
            }
            let mut v = Vec::with_capacity(self.lists.len());
            for (&pick, g) in picks.iter().zip(&self.groups) {
                for list in &self.lists[g.start..g.end] {
                    v.push(list[pick].clone());
                }
            }
            out.push(v);
        }
        out
    }
}

/// Split the command line into the function and its argument lists.
pub fn parse_command(command: Vec<ArgumentToken>) -> Result<(String, Option<ArgumentLists>)> {
    let template_end = command
        .iter()
        .position(ArgumentToken::is_sep)
        .unwrap_or(command.len());

    let mut function = vec![];
    for t in &command[..template_end] {
        if let ArgumentToken::Word(w) = t {
            function.push(w.as_str());
        }
    }
    if function.is_empty() {
        bail!("no command given before the first argument list")
    }
    let function = function.join(" ");

    if template_end == command.len() {
        return Ok((function, None));
    }

    let mut zip_with_previous = vec![];
    let mut lists: Vec<Vec<String>> = vec![];
    for t in &command[template_end..] {
        match t {
            &ArgumentToken::Sep { files, zip } => {
                if lists.is_empty() && zip {
                    bail!("first argument list cannot be zipped with previous")
                }
                zip_with_previous.push((files, zip));
                lists.push(vec![]);
            }
            ArgumentToken::Word(w) => match (zip_with_previous.last(), lists.last_mut()) {
                (Some(&(true, _)), Some(list)) => read_lines_from_file(w, list)?,
                (Some(_), Some(list)) => list.push(w.clone()),
                _ => unreachable!("template_end points at a separator"),
            },
        }
    }

    let zip: Vec<bool> = zip_with_previous.into_iter().map(|(_, z)| z).collect();
    Ok((function, Some(ArgumentLists::new(&zip, lists))))
}
