use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::path::PathBuf;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::apply::{ApplyOptions, ApplyOutput, OutputFormat, Target};
use crate::collection::SampleCollection;
use crate::config::SourceQuery;
use crate::data::filter::{Criteria, FilterState, FilterTarget, SampleAttr};
use crate::data::model::MetadataValue;
use crate::error::{Error, Result};
use crate::grid::{Grid, GridTable, Position};
use crate::parsers::{IdParser, PositionParser};
use crate::sample::{Sample, SampleId, SampleReader};

/// A sample collection in which every sample occupies one distinct grid cell.
///
/// Read access to the underlying [`SampleCollection`] goes through `Deref`;
/// every mutation goes through this type so positions stay consistent.
#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "R::Data: Serialize",
    deserialize = "R::Data: Deserialize<'de>"
))]
pub struct OrderedCollection<R: SampleReader> {
    collection: SampleCollection<R>,
    grid: Grid,
    positions: BTreeMap<SampleId, Position>,
}

impl<R: SampleReader> Clone for OrderedCollection<R> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            grid: self.grid.clone(),
            positions: self.positions.clone(),
        }
    }
}

impl<R: SampleReader> std::fmt::Debug for OrderedCollection<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedCollection")
            .field("id", &self.collection.id())
            .field("shape", &self.grid.shape())
            .field("positions", &self.positions)
            .finish()
    }
}

impl<R: SampleReader> Deref for OrderedCollection<R> {
    type Target = SampleCollection<R>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

impl<R: SampleReader> OrderedCollection<R> {
    /// Place `samples` on `grid` with `parser`. Fails unless every sample ends up
    /// with a position.
    pub fn new<I>(
        id: impl Into<String>,
        samples: I,
        grid: Grid,
        parser: &PositionParser,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Sample<R>>,
    {
        Self::from_collection(SampleCollection::from_samples(id, samples), grid, parser)
    }

    pub fn from_collection(
        collection: SampleCollection<R>,
        grid: Grid,
        parser: &PositionParser,
    ) -> Result<Self> {
        let mut ordered = Self {
            collection,
            grid,
            positions: BTreeMap::new(),
        };
        ordered.assign_positions(parser, None)?;
        if let Some(id) = ordered.ids().find(|id| !ordered.positions.contains_key(*id)) {
            return Err(Error::UnpositionedSample(id.to_string()));
        }
        Ok(ordered)
    }

    pub fn from_sources(
        id: impl Into<String>,
        sources: &[PathBuf],
        file_parser: &IdParser,
        grid: Grid,
        position_parser: &PositionParser,
    ) -> Result<Self> {
        let collection = SampleCollection::from_sources(id, sources, file_parser)?;
        Self::from_collection(collection, grid, position_parser)
    }

    pub fn from_dir(
        id: impl Into<String>,
        query: &SourceQuery,
        file_parser: &IdParser,
        grid: Grid,
        position_parser: &PositionParser,
    ) -> Result<Self> {
        Self::from_sources(id, &query.discover()?, file_parser, grid, position_parser)
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The ID → position index.
    pub fn positions(&self) -> &BTreeMap<SampleId, Position> {
        &self.positions
    }

    pub fn position_of(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn into_collection(self) -> SampleCollection<R> {
        self.collection
    }

    pub fn rename(&mut self, id: impl Into<String>) {
        self.collection.rename(id);
    }

    // -- positions --

    /// Validate `proposed` against the grid and the existing positions, then
    /// commit it. Any problem rejects the whole batch and changes nothing.
    pub fn set_positions(&mut self, proposed: BTreeMap<SampleId, Position>) -> Result<()> {
        for (id, position) in &proposed {
            if !self.collection.contains(id) {
                return Err(Error::UnknownSample(id.clone()));
            }
            if !self.grid.contains(position) {
                return Err(Error::PositionOutOfGrid {
                    id: id.clone(),
                    position: position.clone(),
                });
            }
        }

        let mut merged = self.positions.clone();
        merged.extend(proposed.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut occupant: BTreeMap<&Position, &SampleId> = BTreeMap::new();
        for (id, position) in &merged {
            if let Some(first) = occupant.insert(position, id) {
                return Err(Error::PositionConflict {
                    position: position.clone(),
                    first: first.clone(),
                    second: id.clone(),
                });
            }
        }

        let collection_id = self.collection.id().to_string();
        for (id, position) in proposed {
            if let Some(sample) = self.collection.get_mut(&id) {
                sample.set_position(&collection_id, position.clone());
            }
            self.positions.insert(id, position);
        }
        debug!("{}: {} positions assigned", collection_id, self.positions.len());
        Ok(())
    }

    /// Derive positions with `parser` for `ids` (all members by default) and
    /// commit them through [`OrderedCollection::set_positions`]. A mapping
    /// parser without `ids` proposes exactly its own entries.
    pub fn assign_positions(
        &mut self,
        parser: &PositionParser,
        ids: Option<&[SampleId]>,
    ) -> Result<()> {
        let proposed = match (parser, ids) {
            (PositionParser::Mapping(table), None) => table.clone(),
            _ => {
                let resolve = parser.resolver(&self.grid);
                let ids: Vec<SampleId> = match ids {
                    Some(ids) => ids.to_vec(),
                    None => self.collection.ids().map(str::to_string).collect(),
                };
                ids.into_iter()
                    .map(|id| resolve(id.as_str()).map(|p| (id, p)))
                    .collect::<Result<BTreeMap<_, _>>>()?
            }
        };
        self.set_positions(proposed)
    }

    // -- mapping mutations --

    /// Insert a sample at `position`, validated like any other assignment.
    /// A sample with the same ID is replaced and gives up its cell.
    pub fn insert(&mut self, sample: Sample<R>, position: Position) -> Result<Option<Sample<R>>> {
        let id = sample.id().to_string();
        let previous_position = self.positions.remove(&id);
        let previous = self.collection.insert(sample);
        match self.set_positions(BTreeMap::from([(id.clone(), position)])) {
            Ok(()) => Ok(previous),
            Err(e) => {
                match previous {
                    Some(old) => {
                        self.collection.insert(old);
                    }
                    None => {
                        self.collection.remove(&id);
                    }
                }
                if let Some(p) = previous_position {
                    self.positions.insert(id, p);
                }
                Err(e)
            }
        }
    }

    /// Remove a sample together with its position.
    pub fn remove(&mut self, id: &str) -> Option<Sample<R>> {
        self.positions.remove(id);
        let mut sample = self.collection.remove(id)?;
        sample.unset_position(self.collection.id());
        Some(sample)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Sample<R>> {
        self.collection.get_mut(id)
    }

    pub fn clear_sample_data(&mut self, ids: Option<&[SampleId]>) -> Result<()> {
        self.collection.clear_sample_data(ids)
    }

    pub fn clear_sample_meta(&mut self, ids: Option<&[SampleId]>) -> Result<()> {
        self.collection.clear_sample_meta(ids)
    }

    // -- apply --

    /// Apply `f` like [`SampleCollection::apply`], returning either the ID →
    /// result map or a grid table whose unfilled cells hold `none_value`.
    pub fn apply<T, F>(
        &mut self,
        mut f: F,
        none_value: T,
        opts: &ApplyOptions,
        format: OutputFormat,
    ) -> Result<ApplyOutput<T>>
    where
        T: Clone,
        F: FnMut(Target<'_, R>) -> T,
    {
        self.try_apply(
            |t| Ok::<T, std::convert::Infallible>(f(t)),
            none_value,
            opts,
            format,
        )
    }

    pub fn try_apply<T, E, F>(
        &mut self,
        f: F,
        none_value: T,
        opts: &ApplyOptions,
        format: OutputFormat,
    ) -> Result<ApplyOutput<T>>
    where
        T: Clone,
        F: FnMut(Target<'_, R>) -> std::result::Result<T, E>,
        E: Into<anyhow::Error>,
    {
        let results = self.collection.try_apply(f, none_value.clone(), opts)?;
        Ok(match format {
            OutputFormat::Map => ApplyOutput::Map(results),
            OutputFormat::Table => {
                let table = self.to_table(results, none_value);
                ApplyOutput::Table(if opts.drop_empty { table.drop_empty() } else { table })
            }
        })
    }

    fn to_table<T: Clone>(&self, results: BTreeMap<SampleId, T>, none_value: T) -> GridTable<T> {
        let mut table = GridTable::filled_with(&self.grid, none_value);
        for (id, value) in results {
            if let Some(position) = self.positions.get(&id) {
                table.set(position, value);
            }
        }
        table
    }

    // -- layout --

    /// Which sample occupies each cell.
    pub fn layout(&self) -> GridTable<Option<SampleId>> {
        let mut table = GridTable::filled_with(&self.grid, None);
        for (id, position) in &self.positions {
            table.set(position, Some(id.clone()));
        }
        table
    }

    /// The layout as text, empty cells left blank.
    pub fn print_layout(&self) -> String {
        self.layout().render(|cell| cell.clone().unwrap_or_default())
    }

    /// Every cell with its occupant, row-major over the grid labels.
    pub fn grid_cells(&self) -> impl Iterator<Item = (Position, Option<&Sample<R>>)> + '_ {
        let occupant: BTreeMap<&Position, &SampleId> =
            self.positions.iter().map(|(id, p)| (p, id)).collect();
        self.grid.positions().map(move |p| {
            let sample = occupant.get(&p).and_then(|id| self.collection.get(id));
            (p, sample)
        })
    }

    // -- filtering --

    fn subset(&self, ids: &BTreeSet<SampleId>, new_id: String) -> Result<Self> {
        let keys = Criteria::one_of(ids.iter().map(String::as_str));
        let filtered = self
            .collection
            .filter(&keys, &FilterTarget::Keys, Some(new_id.as_str()))?;
        let positions: BTreeMap<SampleId, Position> = self
            .positions
            .iter()
            .filter(|(id, _)| ids.contains(*id))
            .map(|(id, p)| (id.clone(), p.clone()))
            .collect();
        let mut derived = Self {
            collection: filtered,
            grid: self.grid.clone(),
            positions: BTreeMap::new(),
        };
        derived.set_positions(positions)?;
        Ok(derived)
    }

    /// Like [`SampleCollection::filter`]; the result keeps grid and positions.
    pub fn filter(
        &self,
        criteria: &Criteria<'_, R>,
        target: &FilterTarget,
        new_id: Option<&str>,
    ) -> Result<Self> {
        let ids = self.collection.select_ids(criteria, target)?;
        self.subset(&ids, self.collection.derived_id(new_id, "filtered"))
    }

    pub fn filter_by_key<S: AsRef<str>>(&self, keys: &[S], new_id: Option<&str>) -> Result<Self> {
        let criteria = Criteria::one_of(keys.iter().map(|k| k.as_ref()));
        self.filter(&criteria, &FilterTarget::Keys, new_id)
    }

    pub fn filter_by_ids<S: AsRef<str>>(&self, ids: &[S], new_id: Option<&str>) -> Result<Self> {
        let criteria = Criteria::one_of(ids.iter().map(|k| k.as_ref()));
        self.filter_by_attribute(&SampleAttr::Id, &criteria, new_id)
    }

    pub fn filter_by_attribute(
        &self,
        attr: &SampleAttr,
        criteria: &Criteria<'_, R>,
        new_id: Option<&str>,
    ) -> Result<Self> {
        let values = self.collection.attribute_values(attr)?;
        self.filter(criteria, &FilterTarget::Attribute(values), new_id)
    }

    /// Like [`SampleCollection::filter_by_meta`]; the result keeps grid and positions.
    pub fn filter_by_meta(&self, filters: &FilterState, new_id: Option<&str>) -> Result<Self> {
        let ids = self.collection.meta_ids(filters)?;
        self.subset(&ids, self.collection.derived_id(new_id, "filtered"))
    }

    /// Keep the samples in the given rows.
    pub fn filter_by_row<S: AsRef<str>>(&self, rows: &[S], new_id: Option<&str>) -> Result<Self> {
        let values = self
            .positions
            .iter()
            .map(|(id, p)| (id.clone(), MetadataValue::from(p.row.as_str())))
            .collect();
        let criteria = Criteria::one_of(rows.iter().map(|r| r.as_ref()));
        self.filter(&criteria, &FilterTarget::Attribute(values), new_id)
    }

    /// Keep the samples in the given columns.
    pub fn filter_by_col(&self, cols: &[u32], new_id: Option<&str>) -> Result<Self> {
        let values = self
            .positions
            .iter()
            .map(|(id, p)| (id.clone(), MetadataValue::Integer(p.col.into())))
            .collect();
        let criteria = Criteria::one_of(cols.iter().map(|c| MetadataValue::Integer((*c).into())));
        self.filter(&criteria, &FilterTarget::Attribute(values), new_id)
    }

    /// Like [`SampleCollection::transform`]; the result keeps grid and positions.
    pub fn transform<F>(&self, f: F, new_id: Option<&str>) -> Result<Self>
    where
        F: FnMut(&R::Data) -> R::Data,
    {
        let collection = self.collection.transform(f, new_id)?;
        let mut derived = Self {
            collection,
            grid: self.grid.clone(),
            positions: BTreeMap::new(),
        };
        derived.set_positions(self.positions.clone())?;
        info!("{}: transformed {} samples", derived.collection.id(), derived.len());
        Ok(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::ApplyTo;
    use crate::sample::testing::MockReader;

    fn plate() -> OrderedCollection<MockReader> {
        let a1 = MockReader::add_file("/o/exp_A1.dat", vec![1.0, 2.0], Some("A1"));
        let b3 = MockReader::add_file("/o/exp_B3.dat", vec![5.0], Some("B3"));
        OrderedCollection::from_sources(
            "p",
            &[a1, b3],
            &IdParser::Name,
            Grid::new(2, 3),
            &PositionParser::Name,
        )
        .unwrap()
    }

    fn count(t: Target<'_, MockReader>) -> usize {
        t.data().map_or(0, Vec::len)
    }

    #[test]
    fn name_strategy_scenario() {
        let p = plate();
        assert_eq!(p.ids().collect::<Vec<_>>(), ["A1", "B3"]);
        assert_eq!(p.position_of("A1"), Some(&Position::new("A", 1)));
        assert_eq!(p.position_of("B3"), Some(&Position::new("B", 3)));

        let layout = p.layout();
        assert_eq!(layout.shape(), (2, 3));
        assert_eq!(layout.get("A", 1), Some(&Some("A1".to_string())));
        assert_eq!(layout.get("B", 3), Some(&Some("B3".to_string())));
        let empty = layout.iter().filter(|(_, c)| c.is_none()).count();
        assert_eq!(empty, 4);

        assert_eq!(p.get("A1").unwrap().position_in("p"), Some(&Position::new("A", 1)));
    }

    #[test]
    fn conflicting_assignment_leaves_positions_unchanged() {
        let mut p = plate();
        let before = p.positions().clone();
        let err = p
            .set_positions(BTreeMap::from([("B3".to_string(), Position::new("A", 1))]))
            .unwrap_err();
        assert!(matches!(err, Error::PositionConflict { .. }));
        assert_eq!(p.positions(), &before);
        assert_eq!(p.get("B3").unwrap().position_in("p"), Some(&Position::new("B", 3)));
    }

    #[test]
    fn out_of_grid_rejects_whole_batch() {
        let mut p = plate();
        let before = p.positions().clone();
        let proposed = BTreeMap::from([
            ("A1".to_string(), Position::new("A", 2)),
            ("B3".to_string(), Position::new("C", 1)),
        ]);
        assert!(matches!(
            p.set_positions(proposed),
            Err(Error::PositionOutOfGrid { .. })
        ));
        assert_eq!(p.positions(), &before);
    }

    #[test]
    fn positions_stay_a_bijection() {
        let mut p = plate();
        // swapping two samples in one batch is not a collision
        p.set_positions(BTreeMap::from([
            ("A1".to_string(), Position::new("B", 3)),
            ("B3".to_string(), Position::new("A", 1)),
        ]))
        .unwrap();
        let cells: BTreeSet<&Position> = p.positions().values().collect();
        assert_eq!(cells.len(), p.positions().len());
        assert!(p.positions().values().all(|pos| p.grid().contains(pos)));
    }

    #[test]
    fn unpositioned_members_fail_construction() {
        let samples = vec![Sample::<MockReader>::new("A1"), Sample::new("x")];
        let mapping =
            PositionParser::Mapping(BTreeMap::from([("A1".to_string(), Position::new("A", 1))]));
        let err = OrderedCollection::new("o", samples, Grid::new(2, 2), &mapping).unwrap_err();
        assert!(matches!(err, Error::UnpositionedSample(id) if id == "x"));
    }

    #[test]
    fn number_positions_unravel_row_major() {
        let samples = (0..4).map(|i| Sample::<MockReader>::new(i.to_string()));
        let o = OrderedCollection::new("n", samples, Grid::new(2, 2), &PositionParser::Number)
            .unwrap();
        assert_eq!(o.position_of("2"), Some(&Position::new("B", 1)));
    }

    #[test]
    fn apply_as_table_and_map() {
        let mut p = plate();
        let table = p
            .apply(count, 0, &ApplyOptions::new(), OutputFormat::Table)
            .unwrap()
            .into_table()
            .unwrap();
        assert_eq!(table.shape(), (2, 3));
        assert_eq!(table.get("A", 1), Some(&2));
        assert_eq!(table.get("B", 3), Some(&1));
        assert_eq!(table.get("A", 3), Some(&0));

        let trimmed = p
            .apply(count, 0, &ApplyOptions::new().ids(["A1"]).drop_empty(true), OutputFormat::Table)
            .unwrap()
            .into_table()
            .unwrap();
        assert_eq!(trimmed.shape(), (1, 1));

        let map = p
            .apply(
                |t| t.sample().map(|s| s.id().len()).unwrap_or(0),
                0,
                &ApplyOptions::new().target(ApplyTo::Sample),
                OutputFormat::Map,
            )
            .unwrap()
            .into_map()
            .unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn row_and_column_filters() {
        let p = plate();
        let row_b = p.filter_by_row(&["B"], None).unwrap();
        assert_eq!(row_b.ids().collect::<Vec<_>>(), ["B3"]);
        assert_eq!(row_b.position_of("B3"), Some(&Position::new("B", 3)));
        assert_eq!(row_b.id(), "p.filtered");

        let col_1 = p.filter_by_col(&[1, 2], Some("left")).unwrap();
        assert_eq!(col_1.ids().collect::<Vec<_>>(), ["A1"]);
        assert_eq!(col_1.grid().shape(), (2, 3));
    }

    #[test]
    fn meta_filter_keeps_grid_and_positions() {
        let p = plate();
        let mut filters = FilterState::new();
        filters.insert("$TOT".into(), BTreeSet::from([MetadataValue::Integer(1)]));

        let single: OrderedCollection<MockReader> = p.filter_by_meta(&filters, None).unwrap();
        assert_eq!(single.ids().collect::<Vec<_>>(), ["B3"]);
        assert_eq!(single.id(), "p.filtered");
        assert_eq!(single.grid(), p.grid());
        assert_eq!(single.position_of("B3"), Some(&Position::new("B", 3)));
        assert_eq!(
            single.get("B3").unwrap().position_in("p.filtered"),
            Some(&Position::new("B", 3))
        );
        assert_eq!(single.layout().get("B", 3), Some(&Some("B3".to_string())));
    }

    #[test]
    fn insert_and_remove_keep_index_in_sync() {
        let mut p = plate();
        let err = p.insert(Sample::new("C9"), Position::new("A", 1)).unwrap_err();
        assert!(matches!(err, Error::PositionConflict { .. }));
        assert!(!p.contains("C9"));

        p.insert(Sample::new("C9"), Position::new("A", 2)).unwrap();
        assert_eq!(p.position_of("C9"), Some(&Position::new("A", 2)));

        let removed = p.remove("A1").unwrap();
        assert!(removed.position_in("p").is_none());
        assert!(p.position_of("A1").is_none());
        // the freed cell can be reused
        p.insert(Sample::new("D1"), Position::new("A", 1)).unwrap();
    }

    #[test]
    fn grid_cells_cover_every_cell_in_order() {
        let p = plate();
        let cells: Vec<(Position, Option<&str>)> = p
            .grid_cells()
            .map(|(pos, s)| (pos, s.map(|s| s.id())))
            .collect();
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0], (Position::new("A", 1), Some("A1")));
        assert_eq!(cells[1].1, None);
        assert_eq!(cells[5], (Position::new("B", 3), Some("B3")));
        assert!(p.print_layout().contains("B3"));
    }
}
