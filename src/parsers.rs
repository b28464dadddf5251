//! Strategies mapping backing files to sample IDs and sample IDs to grid positions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::grid::{Grid, Position};
use crate::sample::{Sample, SampleId, SampleReader};

// ---------------------------------------------------------------------------
// File → sample ID
// ---------------------------------------------------------------------------

/// How a backing file is mapped to a sample ID.
#[derive(Default)]
pub enum IdParser {
    /// Token after the last `_` and before the first `.` of the file name
    /// (`plate_A1.csv` → `A1`).
    #[default]
    Name,
    /// Integer token before the extension (`plate.023.csv` → 23). Grid
    /// containers unravel it row-major into a well name.
    Number,
    /// Identity field stored in the file's own metadata.
    Read,
    /// Explicit path → ID table.
    Mapping(BTreeMap<PathBuf, SampleId>),
    Callable(Box<dyn Fn(&Path) -> anyhow::Result<SampleId>>),
}

impl fmt::Debug for IdParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdParser::Name => f.write_str("Name"),
            IdParser::Number => f.write_str("Number"),
            IdParser::Read => f.write_str("Read"),
            IdParser::Mapping(m) => f.debug_tuple("Mapping").field(m).finish(),
            IdParser::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl FromStr for IdParser {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(IdParser::Name),
            "number" => Ok(IdParser::Number),
            "read" => Ok(IdParser::Read),
            other => Err(Error::configuration(
                "parser",
                other,
                "'name', 'number', 'read'",
            )),
        }
    }
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::UnparsableId {
            path: path.to_path_buf(),
            reason: "no UTF-8 file name".into(),
        })
}

fn id_from_name(path: &Path) -> Result<SampleId> {
    let name = file_name(path)?;
    let token = name
        .rsplit('_')
        .next()
        .and_then(|t| t.split('.').next())
        .unwrap_or("");
    if token.is_empty() {
        return Err(Error::UnparsableId {
            path: path.to_path_buf(),
            reason: format!("'{name}' has no ID token"),
        });
    }
    Ok(token.to_string())
}

fn index_from_number(path: &Path) -> Result<usize> {
    let name = file_name(path)?;
    let parts: Vec<&str> = name.split('.').collect();
    let token = match parts.len() {
        n if n >= 2 => parts[n - 2],
        _ => "",
    };
    token.parse::<usize>().map_err(|_| Error::UnparsableId {
        path: path.to_path_buf(),
        reason: format!("'{token}' is not a sample number"),
    })
}

impl IdParser {
    /// A uniform `path → ID` function for this strategy. With a grid, numbers
    /// are unravelled to well names; without one the number itself is the ID.
    pub fn resolver<'a, R: SampleReader + 'a>(
        &'a self,
        grid: Option<&'a Grid>,
    ) -> Box<dyn Fn(&Path) -> Result<SampleId> + 'a> {
        match self {
            IdParser::Name => Box::new(id_from_name),
            IdParser::Number => Box::new(move |path: &Path| {
                let index = index_from_number(path)?;
                match grid {
                    None => Ok(index.to_string()),
                    Some(grid) => grid
                        .position_at(index)
                        .map(|p| p.well_name())
                        .ok_or_else(|| Error::UnparsableId {
                            path: path.to_path_buf(),
                            reason: format!("sample number {index} is outside the grid"),
                        }),
                }
            }),
            IdParser::Read => Box::new(|path: &Path| {
                Sample::<R>::new("temporary")
                    .with_data_source(path)
                    .derive_identity_from_payload()
            }),
            IdParser::Mapping(table) => Box::new(move |path: &Path| {
                table.get(path).cloned().ok_or_else(|| Error::UnparsableId {
                    path: path.to_path_buf(),
                    reason: "not present in the ID mapping".into(),
                })
            }),
            IdParser::Callable(f) => Box::new(move |path: &Path| {
                f(path).map_err(|e| Error::UnparsableId {
                    path: path.to_path_buf(),
                    reason: format!("{e:#}"),
                })
            }),
        }
    }
}

/// Assign sample IDs to backing files. The first failure aborts the whole
/// batch. When two files resolve to the same ID the later one wins.
pub fn assign_ids<R: SampleReader>(
    sources: &[PathBuf],
    parser: &IdParser,
    grid: Option<&Grid>,
) -> Result<BTreeMap<SampleId, PathBuf>> {
    let resolve = parser.resolver::<R>(grid);
    let mut assigned = BTreeMap::new();
    for path in sources {
        let id = resolve(path)?;
        debug!("{path:?} -> {id}");
        if let Some(previous) = assigned.insert(id.clone(), path.clone()) {
            warn!("sample ID {id} parsed from both {previous:?} and {path:?}; keeping the latter");
        }
    }
    Ok(assigned)
}

// ---------------------------------------------------------------------------
// Sample ID → position
// ---------------------------------------------------------------------------

/// How a sample ID is mapped to a grid position.
#[derive(Default)]
pub enum PositionParser {
    /// Well names such as `A1` or `H12`.
    #[default]
    Name,
    /// The ID is a linear index, unravelled row-major over the grid.
    Number,
    Mapping(BTreeMap<SampleId, Position>),
    Callable(Box<dyn Fn(&str) -> anyhow::Result<Position>>),
}

impl fmt::Debug for PositionParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionParser::Name => f.write_str("Name"),
            PositionParser::Number => f.write_str("Number"),
            PositionParser::Mapping(m) => f.debug_tuple("Mapping").field(m).finish(),
            PositionParser::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl FromStr for PositionParser {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(PositionParser::Name),
            "number" => Ok(PositionParser::Number),
            other => Err(Error::configuration(
                "position_parser",
                other,
                "'name', 'number'",
            )),
        }
    }
}

impl PositionParser {
    /// A uniform `ID → position` function for this strategy.
    pub fn resolver<'a>(&'a self, grid: &'a Grid) -> Box<dyn Fn(&str) -> Result<Position> + 'a> {
        match self {
            PositionParser::Name => Box::new(|id: &str| {
                Position::from_well_name(id).ok_or_else(|| Error::UnparsablePosition {
                    id: id.to_string(),
                    reason: "expected a well name such as 'A1'".into(),
                })
            }),
            PositionParser::Number => Box::new(move |id: &str| {
                let index = id.parse::<usize>().map_err(|_| Error::UnparsablePosition {
                    id: id.to_string(),
                    reason: "expected a sample number".into(),
                })?;
                grid.position_at(index)
                    .ok_or_else(|| Error::UnparsablePosition {
                        id: id.to_string(),
                        reason: format!("index {index} is outside the {:?} grid", grid.shape()),
                    })
            }),
            PositionParser::Mapping(table) => Box::new(move |id: &str| {
                table.get(id).cloned().ok_or_else(|| Error::UnparsablePosition {
                    id: id.to_string(),
                    reason: "not present in the position mapping".into(),
                })
            }),
            PositionParser::Callable(f) => Box::new(move |id: &str| {
                f(id).map_err(|e| Error::UnparsablePosition {
                    id: id.to_string(),
                    reason: format!("{e:#}"),
                })
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::testing::MockReader;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn name_strategy_takes_last_token() {
        let ids = assign_ids::<MockReader>(
            &paths(&["/data/run_2_A1.dat", "/data/run_2_B3.dat"]),
            &IdParser::Name,
            None,
        )
        .unwrap();
        assert_eq!(ids.keys().collect::<Vec<_>>(), ["A1", "B3"]);
        assert_eq!(ids["B3"], PathBuf::from("/data/run_2_B3.dat"));
    }

    #[test]
    fn number_strategy_with_and_without_grid() {
        let files = paths(&["/d/plate.000.dat", "/d/plate.004.dat"]);
        let flat = assign_ids::<MockReader>(&files, &IdParser::Number, None).unwrap();
        assert!(flat.contains_key("0") && flat.contains_key("4"));

        let grid = Grid::new(2, 3);
        let wells = assign_ids::<MockReader>(&files, &IdParser::Number, Some(&grid)).unwrap();
        assert!(wells.contains_key("A1") && wells.contains_key("B2"));

        let outside =
            assign_ids::<MockReader>(&paths(&["/d/p.6.dat"]), &IdParser::Number, Some(&grid));
        assert!(matches!(outside, Err(Error::UnparsableId { .. })));
    }

    #[test]
    fn read_strategy_uses_embedded_identity() {
        let a = MockReader::add_file("/read/x.dat", vec![], Some("C4"));
        let b = MockReader::add_file("/read/y.dat", vec![], None);
        let ids = assign_ids::<MockReader>(&[a.clone()], &IdParser::Read, None).unwrap();
        assert_eq!(ids["C4"], a);

        let err = assign_ids::<MockReader>(&[a, b], &IdParser::Read, None).unwrap_err();
        assert!(matches!(err, Error::IdentityLookup { .. }));
    }

    #[test]
    fn collisions_keep_the_last_file() {
        let ids = assign_ids::<MockReader>(
            &paths(&["/a/x_A1.dat", "/b/y_A1.dat"]),
            &IdParser::Name,
            None,
        )
        .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids["A1"], PathBuf::from("/b/y_A1.dat"));
    }

    #[test]
    fn mapping_and_callable_strategies() {
        let mapping =
            IdParser::Mapping(BTreeMap::from([(PathBuf::from("/m/1.dat"), "s1".to_string())]));
        let ids = assign_ids::<MockReader>(&paths(&["/m/1.dat"]), &mapping, None).unwrap();
        assert!(ids.contains_key("s1"));
        assert!(assign_ids::<MockReader>(&paths(&["/m/2.dat"]), &mapping, None).is_err());

        let upper = IdParser::Callable(Box::new(|p: &Path| {
            Ok(p.file_stem().unwrap().to_string_lossy().to_uppercase())
        }));
        let ids = assign_ids::<MockReader>(&paths(&["/m/well_b2.dat"]), &upper, None).unwrap();
        assert!(ids.contains_key("WELL_B2"));
    }

    #[test]
    fn unknown_tags_are_configuration_errors() {
        assert!(matches!(
            "guess".parse::<IdParser>(),
            Err(Error::Configuration { parameter: "parser", .. })
        ));
        assert!(matches!(
            "read".parse::<PositionParser>(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn position_parsers() {
        let grid = Grid::new(8, 12);
        let name = PositionParser::Name;
        let resolve = name.resolver(&grid);
        assert_eq!(resolve("G12").unwrap(), Position::new("G", 12));
        assert!(resolve("twelve").is_err());

        let number = PositionParser::Number;
        let resolve = number.resolver(&grid);
        assert_eq!(resolve("13").unwrap(), Position::new("B", 2));
        assert!(resolve("96").is_err());
    }
}
