use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Position – a (row label, column label) cell address
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: String,
    pub col: u32,
}

impl Position {
    pub fn new(row: impl Into<String>, col: u32) -> Self {
        Self {
            row: row.into(),
            col,
        }
    }

    /// Parse a well name such as `A1` or `AB12`: a letter prefix followed by a number.
    pub fn from_well_name(name: &str) -> Option<Self> {
        let split = name.find(|c: char| !c.is_ascii_alphabetic())?;
        let (row, col) = name.split_at(split);
        if row.is_empty() {
            return None;
        }
        let col = col.parse::<u32>().ok()?;
        Some(Self::new(row, col))
    }

    /// The conventional well name, e.g. `B3`.
    pub fn well_name(&self) -> String {
        format!("{}{}", self.row, self.col)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

// ---------------------------------------------------------------------------
// Grid – ordered row and column labels
// ---------------------------------------------------------------------------

/// Shape and labelling of a 2-D layout. Cells are addressed row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    row_labels: Vec<String>,
    col_labels: Vec<u32>,
}

impl Default for Grid {
    /// A 96-well plate.
    fn default() -> Self {
        Self::new(8, 12)
    }
}

impl Grid {
    /// Grid with default labels: rows `A, B, ...` and columns `1, 2, ...`.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            row_labels: (0..rows).map(default_row_label).collect(),
            col_labels: (1..=cols as u32).collect(),
        }
    }

    pub fn with_labels(row_labels: Vec<String>, col_labels: Vec<u32>) -> Result<Self> {
        if row_labels.iter().collect::<BTreeSet<_>>().len() != row_labels.len() {
            return Err(Error::configuration(
                "row_labels",
                row_labels.join(","),
                "unique row labels",
            ));
        }
        if col_labels.iter().collect::<BTreeSet<_>>().len() != col_labels.len() {
            let joined: Vec<String> = col_labels.iter().map(u32::to_string).collect();
            return Err(Error::configuration(
                "col_labels",
                joined.join(","),
                "unique column labels",
            ));
        }
        // wells are keyed by name, so row "1" col 11 must not meet row "11" col 1
        let mut names = BTreeSet::new();
        for row in &row_labels {
            for col in &col_labels {
                let name = format!("{row}{col}");
                if !names.insert(name.clone()) {
                    return Err(Error::configuration(
                        "row_labels",
                        format!("{} (well name '{name}' occurs twice)", row_labels.join(",")),
                        "labels that give every cell a distinct well name",
                    ));
                }
            }
        }
        Ok(Self {
            row_labels,
            col_labels,
        })
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.row_labels.len(), self.col_labels.len())
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.row_labels.len() * self.col_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn col_labels(&self) -> &[u32] {
        &self.col_labels
    }

    pub fn contains(&self, position: &Position) -> bool {
        self.index_of(position).is_some()
    }

    /// Row-major linear index of a position.
    pub fn index_of(&self, position: &Position) -> Option<usize> {
        let i = self.row_labels.iter().position(|r| *r == position.row)?;
        let j = self.col_labels.iter().position(|c| *c == position.col)?;
        Some(i * self.col_labels.len() + j)
    }

    /// Unravel a row-major linear index into a position.
    pub fn position_at(&self, index: usize) -> Option<Position> {
        if index >= self.len() {
            return None;
        }
        let ncols = self.col_labels.len();
        Some(Position::new(
            self.row_labels[index / ncols].clone(),
            self.col_labels[index % ncols],
        ))
    }

    /// All positions in row-major order.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.row_labels.iter().flat_map(move |row| {
            self.col_labels
                .iter()
                .map(move |col| Position::new(row.clone(), *col))
        })
    }
}

/// `A..Z`, then `AA, AB, ...` for plates with more than 26 rows.
fn default_row_label(mut index: usize) -> String {
    let mut label = Vec::new();
    loop {
        label.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    label.reverse();
    String::from_utf8_lossy(&label).into_owned()
}

// ---------------------------------------------------------------------------
// GridTable – one value per cell
// ---------------------------------------------------------------------------

/// Grid-shaped table of results. Cells that no sample filled hold the table's
/// none value and are reported as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTable<T> {
    row_labels: Vec<String>,
    col_labels: Vec<u32>,
    cells: Vec<T>,
    filled: Vec<bool>,
}

impl<T: Clone> GridTable<T> {
    /// A table over `grid` where every cell holds `none_value`.
    pub fn filled_with(grid: &Grid, none_value: T) -> Self {
        Self {
            row_labels: grid.row_labels.clone(),
            col_labels: grid.col_labels.clone(),
            cells: vec![none_value; grid.len()],
            filled: vec![false; grid.len()],
        }
    }

    /// Drop leading and trailing rows and columns in which no cell was filled.
    pub fn drop_empty(self) -> Self {
        let (nrows, ncols) = self.shape();
        let row_used = |i: usize| (0..ncols).any(|j| self.filled[i * ncols + j]);
        let col_used = |j: usize| (0..nrows).any(|i| self.filled[i * ncols + j]);

        let rows: Vec<usize> = (0..nrows).filter(|&i| row_used(i)).collect();
        let cols: Vec<usize> = (0..ncols).filter(|&j| col_used(j)).collect();
        let (Some(&r0), Some(&r1), Some(&c0), Some(&c1)) =
            (rows.first(), rows.last(), cols.first(), cols.last())
        else {
            return Self {
                row_labels: Vec::new(),
                col_labels: Vec::new(),
                cells: Vec::new(),
                filled: Vec::new(),
            };
        };

        let mut cells = Vec::with_capacity((r1 - r0 + 1) * (c1 - c0 + 1));
        let mut filled = Vec::with_capacity(cells.capacity());
        for i in r0..=r1 {
            for j in c0..=c1 {
                cells.push(self.cells[i * ncols + j].clone());
                filled.push(self.filled[i * ncols + j]);
            }
        }
        Self {
            row_labels: self.row_labels[r0..=r1].to_vec(),
            col_labels: self.col_labels[c0..=c1].to_vec(),
            cells,
            filled,
        }
    }
}

impl<T> GridTable<T> {
    fn index_of(&self, row: &str, col: u32) -> Option<usize> {
        let i = self.row_labels.iter().position(|r| r == row)?;
        let j = self.col_labels.iter().position(|c| *c == col)?;
        Some(i * self.col_labels.len() + j)
    }

    /// Store a value and mark the cell as filled. Returns `false` for unknown positions.
    pub(crate) fn set(&mut self, position: &Position, value: T) -> bool {
        match self.index_of(&position.row, position.col) {
            Some(idx) => {
                self.cells[idx] = value;
                self.filled[idx] = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, row: &str, col: u32) -> Option<&T> {
        self.index_of(row, col).map(|idx| &self.cells[idx])
    }

    pub fn is_filled(&self, row: &str, col: u32) -> bool {
        self.index_of(row, col).is_some_and(|idx| self.filled[idx])
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.row_labels.len(), self.col_labels.len())
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn col_labels(&self) -> &[u32] {
        &self.col_labels
    }

    /// Rows of cells, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        self.cells.chunks(self.col_labels.len().max(1))
    }

    /// Cells with their positions, row-major.
    pub fn iter(&self) -> impl Iterator<Item = (Position, &T)> {
        let ncols = self.col_labels.len().max(1);
        self.cells.iter().enumerate().map(move |(idx, v)| {
            (
                Position::new(self.row_labels[idx / ncols].clone(), self.col_labels[idx % ncols]),
                v,
            )
        })
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> GridTable<U> {
        GridTable {
            row_labels: self.row_labels.clone(),
            col_labels: self.col_labels.clone(),
            cells: self.cells.iter().map(f).collect(),
            filled: self.filled.clone(),
        }
    }

    /// Render as an aligned text table using `cell` to format each value.
    pub fn render<F: Fn(&T) -> String>(&self, cell: F) -> String {
        let header: Vec<String> = self.col_labels.iter().map(u32::to_string).collect();
        let body: Vec<Vec<String>> = self.rows().map(|r| r.iter().map(&cell).collect()).collect();

        let label_width = self.row_labels.iter().map(String::len).max().unwrap_or(0);
        let mut widths: Vec<usize> = header.iter().map(String::len).collect();
        for row in &body {
            for (w, c) in widths.iter_mut().zip(row) {
                *w = (*w).max(c.len());
            }
        }

        let mut out = format!("{:label_width$}", "");
        for (h, w) in header.iter().zip(&widths) {
            out.push_str(&format!("  {h:>w$}"));
        }
        out.push('\n');
        for (label, row) in self.row_labels.iter().zip(&body) {
            out.push_str(&format!("{label:label_width$}"));
            for (c, w) in row.iter().zip(&widths) {
                out.push_str(&format!("  {c:>w$}"));
            }
            out.push('\n');
        }
        out
    }
}

impl<T: fmt::Display> GridTable<T> {
    /// Export as CSV: a header of column labels, then one record per row
    /// starting with the row label.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec![String::new()];
        header.extend(self.col_labels.iter().map(u32::to_string));
        writer.write_record(&header)?;
        for (label, row) in self.row_labels.iter().zip(self.rows()) {
            let mut record = vec![label.clone()];
            record.extend(row.iter().map(ToString::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl<T: fmt::Display> fmt::Display for GridTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(ToString::to_string))
    }
}
