//! Submit and track Slurm job arrays whose tasks each receive their own
//! argument vector.
//!
//! Argument vectors are written to an [`ArgumentStore`], one line per vector.
//! The rendered batch script ([`ScriptTemplate`]) computes a line number from
//! `$SLURM_ARRAY_TASK_ID` and reads its arguments from the store, so the
//! scheduler only ever has to hand a task its integer index.  [`Batch`] ties
//! the pieces together; [`watch`] polls the resulting [`JobArray`] until it
//! drains.
use std::fmt::Display;

pub use indexmap::IndexMap;

mod error;
pub use error::{Error, Result};

mod config;
pub use config::*;

pub mod cores;

mod command;
pub use command::*;

mod store;
pub use store::*;

mod script;
pub use script::*;

pub mod protocol;

mod scheduler;
pub use scheduler::*;

mod job_array;
pub use job_array::*;

mod monitor;
pub use monitor::*;

mod batch;
pub use batch::*;

pub fn join_display<T: Display>(items: impl IntoIterator<Item = T>, sep: char) -> String {
    use std::fmt::Write;
    let mut s = String::new();
    for (k, item) in items.into_iter().enumerate() {
        if k > 0 {
            s.push(sep);
        }
        let _ = write!(&mut s, "{}", item);
    }
    s
}

#[cfg(test)]
macro_rules! svec {
    ($($t:tt)*) => {
        [$($t)*].into_iter().map(String::from).collect::<Vec<_>>()
    };
}
#[cfg(test)]
pub(crate) use svec;
