use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Argument vectors written one per line to a file a batch task can address
/// by line number.
///
/// Line `i` (1-based) holds the `i-1`th non-empty vector, tokens joined by a
/// single space.  Tokens are not escaped, so a token with embedded whitespace
/// will be split apart again when the task reads its line.  The file is never
/// modified after creation and is deliberately left on disk: tasks may still
/// be reading it long after this process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentStore {
    path: PathBuf,
    len: usize,
}

/// Drop empty vectors and join the rest into store lines, preserving order.
pub fn store_lines<V, S>(vectors: &[V]) -> Vec<String>
where
    V: AsRef<[S]>,
    S: AsRef<str>,
{
    vectors
        .iter()
        .map(AsRef::as_ref)
        .filter(|v| !v.is_empty())
        .map(|v| {
            let mut line = String::new();
            for (k, tok) in v.iter().enumerate() {
                if k > 0 {
                    line.push(' ');
                }
                line.push_str(tok.as_ref());
            }
            line
        })
        .collect()
}

impl ArgumentStore {
    /// Write `lines` to a new, uniquely named file in `dir` (the current
    /// directory if `None`).
    ///
    /// The directory must be visible to the compute nodes, which is why the
    /// default is the working directory rather than a node-local temp dir.
    pub fn create(lines: &[String], dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(d) => d.to_path_buf(),
            None => std::env::current_dir().map_err(|e| Error::io(".", e))?,
        };

        let mut file = tempfile::Builder::new()
            .prefix(".slurm-array-")
            .suffix(".args")
            .tempfile_in(&dir)
            .map_err(|e| Error::io(&dir, e))?;

        {
            let f = file.as_file_mut();
            for line in lines {
                writeln!(f, "{}", line).map_err(|e| Error::io(&dir, e))?;
            }
            f.flush().map_err(|e| Error::io(&dir, e))?;
        }

        let (_, path) = file.keep().map_err(|e| Error::io(&dir, e.error))?;
        let path = path.canonicalize().map_err(|e| Error::io(&path, e))?;
        log::info!("wrote {} argument vectors to {}", lines.len(), path.display());

        Ok(ArgumentStore {
            path,
            len: lines.len(),
        })
    }

    /// Open an existing store, e.g. one created by another process.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let f = std::fs::File::open(&path).map_err(|e| Error::io(&path, e))?;
        let len = BufReader::new(f).lines().count();
        Ok(ArgumentStore { path, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read line `index` (1-based), split back into tokens.
    pub fn read(&self, index: usize) -> Result<Option<Vec<String>>> {
        if index == 0 {
            return Ok(None);
        }
        let f = std::fs::File::open(&self.path).map_err(|e| Error::io(&self.path, e))?;
        match BufReader::new(f).lines().nth(index - 1) {
            None => Ok(None),
            Some(line) => {
                let line = line.map_err(|e| Error::io(&self.path, e))?;
                Ok(Some(line.split_whitespace().map(String::from).collect()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svec;

    #[test]
    fn empty_vectors_do_not_shift_indices() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let vectors = vec![
            svec!["a", "1"],
            vec![],
            svec!["b", "2"],
            vec![],
            vec![],
            svec!["c"],
        ];
        let lines = store_lines(&vectors);
        assert_eq!(lines, svec!["a 1", "b 2", "c"]);

        let store = ArgumentStore::create(&lines, Some(dir.path()))?;
        assert_eq!(store.len(), 3);
        assert!(store.path().starts_with(dir.path().canonicalize().unwrap()));
        assert_eq!(store.read(1)?, Some(svec!["a", "1"]));
        assert_eq!(store.read(2)?, Some(svec!["b", "2"]));
        assert_eq!(store.read(3)?, Some(svec!["c"]));
        assert_eq!(store.read(4)?, None);
        assert_eq!(store.read(0)?, None);
        Ok(())
    }

    #[test]
    fn file_contents_are_plain_lines() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let store = ArgumentStore::create(&svec!["x y", "z"], Some(dir.path()))?;
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(text, "x y\nz\n");

        let reopened = ArgumentStore::open(store.path())?;
        assert_eq!(reopened.len(), 2);
        Ok(())
    }

    #[test]
    fn unique_names() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let a = ArgumentStore::create(&svec!["1"], Some(dir.path()))?;
        let b = ArgumentStore::create(&svec!["1"], Some(dir.path()))?;
        assert_ne!(a.path(), b.path());
        Ok(())
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let r = ArgumentStore::create(&svec!["1"], Some(&missing));
        assert!(matches!(r, Err(Error::Io { .. })));
    }
}
