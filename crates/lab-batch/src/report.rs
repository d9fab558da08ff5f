use crate::flags::{format_flag_val, Flags};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialRow {
    /// 1-based position in the trial list.
    pub trial: usize,
    pub flags: BTreeMap<String, String>,
}

/// Display-ready view of trial flags: a `#` column followed by every flag
/// name seen across the trials, in name order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialsTable {
    pub columns: Vec<String>,
    pub rows: Vec<TrialRow>,
}

pub fn trials_table<'a, I>(trials: I) -> TrialsTable
where
    I: IntoIterator<Item = &'a Flags>,
{
    let mut names = BTreeSet::new();
    let mut rows = Vec::new();
    for (i, flags) in trials.into_iter().enumerate() {
        let mut cells = BTreeMap::new();
        for (name, value) in flags {
            cells.insert(name.clone(), format_flag_val(value));
            names.insert(name.clone());
        }
        rows.push(TrialRow {
            trial: i + 1,
            flags: cells,
        });
    }
    TrialsTable {
        columns: names.into_iter().collect(),
        rows,
    }
}

impl TrialsTable {
    /// Left-aligned text table with a heading line. Missing values are blank.
    pub fn render(&self) -> String {
        let heading: Vec<String> = std::iter::once("#".to_string())
            .chain(self.columns.iter().cloned())
            .collect();
        let lines: Vec<Vec<String>> = std::iter::once(heading)
            .chain(self.rows.iter().map(|row| {
                std::iter::once(row.trial.to_string())
                    .chain(
                        self.columns
                            .iter()
                            .map(|col| row.flags.get(col).cloned().unwrap_or_default()),
                    )
                    .collect()
            }))
            .collect();
        let widths: Vec<usize> = (0..=self.columns.len())
            .map(|i| {
                lines
                    .iter()
                    .map(|cells| cells[i].chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let mut out = String::new();
        for cells in &lines {
            let line = cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
                .collect::<Vec<_>>()
                .join("  ");
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

pub fn write_trials<'a, W, I>(out: &mut W, trials: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a Flags>,
{
    out.write_all(trials_table(trials).render().as_bytes())
}

pub fn print_trials<'a, I>(trials: I) -> io::Result<()>
where
    I: IntoIterator<Item = &'a Flags>,
{
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    write_trials(&mut lock, trials)?;
    lock.flush()
}
