//! File discovery and JSON plate descriptions.

use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::collection::SampleCollection;
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::ordered::OrderedCollection;
use crate::parsers::{IdParser, PositionParser};
use crate::plate::Plate;
use crate::sample::SampleReader;

/// Which files in a directory back the samples of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuery {
    pub dir: PathBuf,
    /// Glob over file names, matched case-insensitively (`*.parquet`).
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Also search every subdirectory (`dir/**/pattern`).
    #[serde(default)]
    pub recursive: bool,
}

fn default_pattern() -> String {
    "*".to_string()
}

impl SourceQuery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pattern: default_pattern(),
            recursive: false,
        }
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Matching files, sorted by path. A missing directory is an I/O error.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} is not a directory", self.dir),
            )));
        }
        let root = glob::Pattern::escape(&self.dir.to_string_lossy());
        let full = if self.recursive {
            format!("{root}/**/{}", self.pattern)
        } else {
            format!("{root}/{}", self.pattern)
        };
        let options = glob::MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let matches = glob::glob_with(&full, options)
            .map_err(|e| Error::configuration("pattern", self.pattern.clone(), e.msg))?;

        let mut found = Vec::new();
        for entry in matches {
            let path = entry.map_err(glob::GlobError::into_error)?;
            if path.is_file() {
                found.push(path);
            }
        }
        found.sort();
        debug!("{} files match {:?}", found.len(), self);
        Ok(found)
    }
}

fn default_shape() -> (usize, usize) {
    (8, 12)
}

fn default_parser() -> String {
    "name".to_string()
}

/// A plate layout plus where its files live, as read from JSON:
///
/// ```json
/// {
///   "id": "run-7",
///   "shape": [8, 12],
///   "sources": { "dir": "data/run-7", "pattern": "*.parquet" },
///   "id_parser": "name",
///   "position_parser": "name"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateConfig {
    pub id: String,
    #[serde(default = "default_shape")]
    pub shape: (usize, usize),
    #[serde(default)]
    pub row_labels: Option<Vec<String>>,
    #[serde(default)]
    pub col_labels: Option<Vec<u32>>,
    pub sources: SourceQuery,
    #[serde(default = "default_parser")]
    pub id_parser: String,
    #[serde(default = "default_parser")]
    pub position_parser: String,
}

impl PlateConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let config = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        info!("loaded plate config '{}' from {path:?}", config.id);
        Ok(config)
    }

    /// The grid; explicit labels must agree with `shape`.
    pub fn grid(&self) -> Result<Grid> {
        let (rows, cols) = self.shape;
        let defaults = Grid::new(rows, cols);
        let row_labels = match &self.row_labels {
            Some(labels) if labels.len() != rows => {
                return Err(Error::configuration(
                    "row_labels",
                    format!("{} labels", labels.len()),
                    "one label per row of 'shape'",
                ))
            }
            Some(labels) => labels.clone(),
            None => defaults.row_labels().to_vec(),
        };
        let col_labels = match &self.col_labels {
            Some(labels) if labels.len() != cols => {
                return Err(Error::configuration(
                    "col_labels",
                    format!("{} labels", labels.len()),
                    "one label per column of 'shape'",
                ))
            }
            Some(labels) => labels.clone(),
            None => defaults.col_labels().to_vec(),
        };
        Grid::with_labels(row_labels, col_labels)
    }

    pub fn id_parser(&self) -> Result<IdParser> {
        self.id_parser.parse()
    }

    pub fn position_parser(&self) -> Result<PositionParser> {
        self.position_parser.parse()
    }

    pub fn build_collection<R: SampleReader>(&self) -> Result<SampleCollection<R>> {
        SampleCollection::from_dir(self.id.clone(), &self.sources, &self.id_parser()?)
    }

    pub fn build_ordered<R: SampleReader>(&self) -> Result<OrderedCollection<R>> {
        let grid = self.grid()?;
        OrderedCollection::from_dir(
            self.id.clone(),
            &self.sources,
            &self.id_parser()?,
            grid,
            &self.position_parser()?,
        )
    }

    pub fn build_plate<R: SampleReader>(&self) -> Result<Plate<R>> {
        Plate::from_dir(self.id.clone(), self.grid()?, &self.sources, &self.id_parser()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Position;

    #[test]
    fn discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_A2.csv", "a_A1.CSV", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c_B1.csv"), "").unwrap();

        let flat = SourceQuery::new(dir.path()).pattern("*.csv").discover().unwrap();
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a_A1.CSV", "b_A2.csv"]);

        let deep = SourceQuery::new(dir.path())
            .pattern("*.csv")
            .recursive(true)
            .discover()
            .unwrap();
        assert_eq!(deep.len(), 3);

        let wells = SourceQuery::new(dir.path()).pattern("?_A?.csv").discover().unwrap();
        assert_eq!(wells.len(), 2);

        // directories never count as sources
        assert_eq!(SourceQuery::new(dir.path()).discover().unwrap().len(), 3);
    }

    #[test]
    fn missing_directory_is_io_error() {
        let err = SourceQuery::new("/definitely/not/here").discover().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn malformed_pattern_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceQuery::new(dir.path()).pattern("[*.csv").discover().unwrap_err();
        assert!(matches!(err, Error::Configuration { parameter: "pattern", .. }));
    }

    #[test]
    fn config_defaults() {
        let config =
            PlateConfig::from_json_str(r#"{"id": "p1", "sources": {"dir": "/tmp/p1"}}"#).unwrap();
        assert_eq!(config.shape, (8, 12));
        assert!(matches!(config.id_parser().unwrap(), IdParser::Name));
        assert!(matches!(config.position_parser().unwrap(), PositionParser::Name));
        assert_eq!(config.grid().unwrap().shape(), (8, 12));
    }

    #[test]
    fn config_labels() {
        let config = PlateConfig::from_json_str(
            r#"{"id": "p", "shape": [2, 2], "row_labels": ["X", "Y"], "col_labels": [5, 6],
                "sources": {"dir": "/tmp"}, "position_parser": "number"}"#,
        )
        .unwrap();
        let grid = config.grid().unwrap();
        assert!(grid.contains(&Position::new("Y", 6)));
        assert!(!grid.contains(&Position::new("A", 1)));
        assert!(matches!(config.position_parser().unwrap(), PositionParser::Number));

        let bad = PlateConfig {
            row_labels: Some(vec!["X".into()]),
            ..config
        };
        assert!(matches!(
            bad.grid(),
            Err(Error::Configuration { parameter: "row_labels", .. })
        ));
    }

    #[test]
    fn bad_parser_tag_and_bad_json() {
        let config = PlateConfig::from_json_str(
            r#"{"id": "p", "sources": {"dir": "/tmp"}, "id_parser": "guess"}"#,
        )
        .unwrap();
        assert!(matches!(config.id_parser(), Err(Error::Configuration { .. })));
        assert!(matches!(PlateConfig::from_json_str("{"), Err(Error::Json(_))));
    }
}
