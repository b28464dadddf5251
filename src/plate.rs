use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::apply::{ApplyOptions, ApplyTo, Outputs, Target};
use crate::config::SourceQuery;
use crate::data::model::MetadataValue;
use crate::error::{Error, Result};
use crate::grid::{Grid, GridTable, Position};
use crate::parsers::{assign_ids, IdParser};
use crate::sample::{Sample, SampleId, SampleReader};

/// How backing files are bound to wells.
#[derive(Debug)]
pub enum Assignments {
    /// Well ID → file.
    Explicit(BTreeMap<SampleId, PathBuf>),
    /// Resolve each file's well with an ID strategy.
    Parsed { sources: Vec<PathBuf>, parser: IdParser },
}

/// A dense plate: one sample per well, wells without a file included.
#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "R::Data: Serialize",
    deserialize = "R::Data: Deserialize<'de>"
))]
pub struct Plate<R: SampleReader> {
    id: String,
    grid: Grid,
    /// Row-major, `grid.len()` wells.
    wells: Vec<Sample<R>>,
    index: BTreeMap<SampleId, usize>,
    extracted: BTreeMap<String, GridTable<MetadataValue>>,
}

impl<R: SampleReader> std::fmt::Debug for Plate<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plate")
            .field("id", &self.id)
            .field("shape", &self.grid.shape())
            .field("extracted", &self.extracted.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<R: SampleReader> Plate<R> {
    /// Allocate one source-less well per cell, named after its position (`A1`, ...).
    pub fn new(id: impl Into<String>, grid: Grid) -> Self {
        let id = id.into();
        let mut wells = Vec::with_capacity(grid.len());
        let mut index = BTreeMap::new();
        for position in grid.positions() {
            let mut well = Sample::new(position.well_name());
            index.insert(well.id().to_string(), wells.len());
            well.set_position(&id, position);
            wells.push(well);
        }
        Self {
            id,
            grid,
            wells,
            index,
            extracted: BTreeMap::new(),
        }
    }

    pub fn from_sources(
        id: impl Into<String>,
        grid: Grid,
        sources: &[PathBuf],
        parser: &IdParser,
    ) -> Result<Self> {
        let mut plate = Self::new(id, grid);
        let assigned = assign_ids::<R>(sources, parser, Some(&plate.grid))?;
        plate.assign_sources(Assignments::Explicit(assigned))?;
        Ok(plate)
    }

    pub fn from_dir(
        id: impl Into<String>,
        grid: Grid,
        query: &SourceQuery,
        parser: &IdParser,
    ) -> Result<Self> {
        Self::from_sources(id, grid, &query.discover()?, parser)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Bind files to wells. Every well ID is checked before any well changes.
    pub fn assign_sources(&mut self, assignments: Assignments) -> Result<()> {
        let assignments = match assignments {
            Assignments::Explicit(map) => map,
            Assignments::Parsed { sources, parser } => {
                assign_ids::<R>(&sources, &parser, Some(&self.grid))?
            }
        };
        if let Some(unknown) = assignments.keys().find(|id| !self.index.contains_key(*id)) {
            return Err(Error::UnknownSample(unknown.clone()));
        }
        for (well_id, path) in &assignments {
            let i = self.index[well_id];
            self.wells[i].set_data_source(Some(path.clone()));
        }
        info!(
            "plate {}: {} of {} wells have data files",
            self.id,
            assignments.len(),
            self.wells.len()
        );
        Ok(())
    }

    // -- wells --

    /// All well IDs, row-major.
    pub fn well_ids(&self) -> Vec<SampleId> {
        self.wells.iter().map(|w| w.id().to_string()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Sample<R>> {
        self.index.get(id).map(|&i| &self.wells[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Sample<R>> {
        self.index.get(id).map(|&i| &mut self.wells[i])
    }

    pub fn well(&self, row: &str, col: u32) -> Option<&Sample<R>> {
        self.grid
            .index_of(&Position::new(row, col))
            .map(|i| &self.wells[i])
    }

    pub fn wells<S: AsRef<str>>(&self, ids: &[S]) -> Result<BTreeMap<SampleId, &Sample<R>>> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                self.get(id)
                    .map(|w| (id.to_string(), w))
                    .ok_or_else(|| Error::UnknownSample(id.to_string()))
            })
            .collect()
    }

    pub fn clear_well_data(&mut self, ids: Option<&[SampleId]>) -> Result<()> {
        match ids {
            None => self.wells.iter_mut().for_each(Sample::clear_data),
            Some(ids) => {
                for id in ids {
                    self.get_mut(id)
                        .ok_or_else(|| Error::UnknownSample(id.clone()))?
                        .clear_data();
                }
            }
        }
        Ok(())
    }

    /// Every well with its position, row-major.
    pub fn grid_cells(&self) -> impl Iterator<Item = (Position, &Sample<R>)> {
        self.grid.positions().zip(self.wells.iter())
    }

    // -- apply --

    /// Apply `f` to every well and store one table per name in `outputs`.
    ///
    /// `f` returns one value per output. Wells outside `opts.ids`, and wells
    /// with nothing to read, get `none_value` for every output. Tables replace
    /// earlier ones of the same name.
    pub fn apply<O, F>(
        &mut self,
        mut f: F,
        outputs: &[&str],
        none_value: MetadataValue,
        opts: &ApplyOptions,
    ) -> Result<()>
    where
        O: Into<Outputs>,
        F: FnMut(Target<'_, R>) -> O,
    {
        self.try_apply(
            |t| Ok::<O, std::convert::Infallible>(f(t)),
            outputs,
            none_value,
            opts,
        )
    }

    pub fn try_apply<O, E, F>(
        &mut self,
        mut f: F,
        outputs: &[&str],
        none_value: MetadataValue,
        opts: &ApplyOptions,
    ) -> Result<()>
    where
        O: Into<Outputs>,
        E: Into<anyhow::Error>,
        F: FnMut(Target<'_, R>) -> std::result::Result<O, E>,
    {
        let n = outputs.len();
        let selected: Option<BTreeSet<&str>> = opts
            .ids
            .as_ref()
            .map(|ids| ids.iter().map(String::as_str).collect());
        if let Some(selected) = &selected {
            if let Some(unknown) = selected.iter().find(|id| !self.index.contains_key(**id)) {
                return Err(Error::UnknownSample(unknown.to_string()));
            }
        }

        let mut tables: Vec<GridTable<MetadataValue>> = (0..n)
            .map(|_| GridTable::filled_with(&self.grid, none_value.clone()))
            .collect();
        let empty = Outputs::repeat(&none_value, n);
        let positions: Vec<Position> = self.grid.positions().collect();

        for (well, position) in self.wells.iter_mut().zip(&positions) {
            if selected.as_ref().is_some_and(|s| !s.contains(well.id())) {
                continue;
            }
            let Outputs(values) = well.try_apply(
                |t| f(t).map(Into::into),
                opts.target,
                empty.clone(),
                opts.persist,
            )?;
            if values.len() != n {
                return Err(Error::OutputArity {
                    expected: n,
                    got: values.len(),
                });
            }
            for (table, value) in tables.iter_mut().zip(values) {
                table.set(position, value);
            }
        }

        for (name, table) in outputs.iter().zip(tables) {
            if self.extracted.insert(name.to_string(), table).is_some() {
                warn!("plate {}: replacing extracted output '{name}'", self.id);
            }
        }
        Ok(())
    }

    /// Store one extracted table per metadata field.
    pub fn well_metadata(
        &mut self,
        fields: &[&str],
        none_value: MetadataValue,
        ids: Option<&[SampleId]>,
    ) -> Result<()> {
        let mut opts = ApplyOptions::new().target(ApplyTo::Sample);
        opts.ids = ids.map(<[SampleId]>::to_vec);
        self.try_apply(
            |t| -> Result<Outputs> {
                let Some(well) = t.sample() else {
                    return Ok(Outputs::repeat(&MetadataValue::Null, fields.len()));
                };
                let meta = well.meta_fields(fields)?;
                Ok(Outputs(
                    fields
                        .iter()
                        .map(|f| meta.get(*f).cloned().unwrap_or(MetadataValue::Null))
                        .collect(),
                ))
            },
            fields,
            none_value,
            &opts,
        )
    }

    pub fn extracted(&self, name: &str) -> Option<&GridTable<MetadataValue>> {
        self.extracted.get(name)
    }

    pub fn extracted_all(&self) -> &BTreeMap<String, GridTable<MetadataValue>> {
        &self.extracted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::testing::MockReader;

    fn plate() -> Plate<MockReader> {
        let a1 = MockReader::add_file("/pl/run_A1.dat", vec![1.0, 3.0], Some("A1"));
        let b3 = MockReader::add_file("/pl/run_B3.dat", vec![2.0, 4.0, 6.0], Some("B3"));
        Plate::from_sources("pl", Grid::new(2, 3), &[a1, b3], &IdParser::Name).unwrap()
    }

    fn stats(t: Target<'_, MockReader>) -> (f64, usize) {
        let d = t.data().map(Vec::as_slice).unwrap_or(&[]);
        (d.iter().sum::<f64>(), d.len())
    }

    #[test]
    fn dense_allocation() {
        let p = plate();
        assert_eq!(p.well_ids(), ["A1", "A2", "A3", "B1", "B2", "B3"]);
        assert!(p.well("A", 2).unwrap().data_source().is_none());
        assert!(p.well("B", 3).unwrap().data_source().is_some());
        assert_eq!(p.grid_cells().count(), 6);
        assert_eq!(p.get("B1").unwrap().position_in("pl"), Some(&Position::new("B", 1)));
    }

    #[test]
    fn two_outputs_fill_two_tables() {
        let mut p = plate();
        p.apply(stats, &["sum", "count"], MetadataValue::Null, &ApplyOptions::new())
            .unwrap();

        let sum = p.extracted("sum").unwrap();
        let count = p.extracted("count").unwrap();
        assert_eq!(sum.shape(), (2, 3));
        assert_eq!(count.shape(), (2, 3));
        assert_eq!(sum.get("A", 1), Some(&MetadataValue::Float(4.0)));
        assert_eq!(count.get("B", 3), Some(&MetadataValue::Integer(3)));
        assert_eq!(sum.get("A", 2), Some(&MetadataValue::Null));
        assert_eq!(count.get("B", 1), Some(&MetadataValue::Null));
    }

    #[test]
    fn cells_outside_ids_get_none_value() {
        let mut p = plate();
        p.apply(
            |t| t.data().map_or(0, Vec::len),
            &["n"],
            MetadataValue::Integer(-1),
            &ApplyOptions::new().ids(["B3", "A2"]),
        )
        .unwrap();
        let n = p.extracted("n").unwrap();
        assert_eq!(n.get("A", 1), Some(&MetadataValue::Integer(-1)));
        assert_eq!(n.get("B", 3), Some(&MetadataValue::Integer(3)));
        // selected, but no file
        assert_eq!(n.get("A", 2), Some(&MetadataValue::Integer(-1)));

        p.apply(|_| 7i64, &["n"], MetadataValue::Null, &ApplyOptions::new().ids(["A1"]))
            .unwrap();
        assert_eq!(p.extracted("n").unwrap().get("B", 3), Some(&MetadataValue::Null));
    }

    #[test]
    fn unknown_selected_well_is_rejected() {
        let mut p = plate();
        let err = p
            .apply(|_| 1i64, &["n"], MetadataValue::Null, &ApplyOptions::new().ids(["A1", "Z9"]))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSample(id) if id == "Z9"));
        assert!(p.extracted("n").is_none());
    }

    #[test]
    fn wrong_arity_is_an_error() {
        let mut p = plate();
        let err = p
            .apply(stats, &["only"], MetadataValue::Null, &ApplyOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::OutputArity { expected: 1, got: 2 }));
        assert!(p.extracted("only").is_none());
    }

    #[test]
    fn number_parser_unravels_into_wells() {
        let f = MockReader::add_file("/pl/plate.4.dat", vec![1.0], None);
        let p =
            Plate::<MockReader>::from_sources("n", Grid::new(2, 3), &[f.clone()], &IdParser::Number)
                .unwrap();
        assert_eq!(p.get("B2").unwrap().data_source(), Some(f.as_path()));
    }

    #[test]
    fn explicit_assignment_is_atomic() {
        let mut p = plate();
        let err = p
            .assign_sources(Assignments::Explicit(BTreeMap::from([
                ("A2".to_string(), PathBuf::from("/pl/x.dat")),
                ("Z1".to_string(), PathBuf::from("/pl/y.dat")),
            ])))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSample(id) if id == "Z1"));
        assert!(p.get("A2").unwrap().data_source().is_none());
    }

    #[test]
    fn metadata_tables() {
        let mut p = plate();
        p.well_metadata(&["$SRC", "$TOT"], MetadataValue::Null, None).unwrap();
        let src = p.extracted("$SRC").unwrap();
        assert_eq!(src.get("B", 3), Some(&MetadataValue::from("B3")));
        assert_eq!(src.get("A", 3), Some(&MetadataValue::Null));
        assert_eq!(
            p.extracted("$TOT").unwrap().get("A", 1),
            Some(&MetadataValue::Integer(2))
        );
    }

    #[test]
    fn clear_well_data_drops_cache() {
        let mut p = plate();
        p.apply(|_| 0i64, &["x"], MetadataValue::Null, &ApplyOptions::new().persist(true))
            .unwrap();
        assert!(p.get("A1").unwrap().is_data_loaded());
        p.clear_well_data(Some(&["A1".to_string()])).unwrap();
        assert!(!p.get("A1").unwrap().is_data_loaded());
        assert!(p.get("B3").unwrap().is_data_loaded());
        p.clear_well_data(None).unwrap();
        assert!(!p.get("B3").unwrap().is_data_loaded());
    }
}
