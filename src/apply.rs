//! Selectors and result shapes shared by the apply family of operations.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::data::model::MetadataValue;
use crate::error::Error;
use crate::grid::GridTable;
use crate::sample::{Sample, SampleId, SampleReader};

/// What an applied function receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApplyTo {
    /// The sample's payload, read on demand.
    #[default]
    Data,
    /// The sample object itself.
    Sample,
}

impl FromStr for ApplyTo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "data" => Ok(ApplyTo::Data),
            "sample" => Ok(ApplyTo::Sample),
            other => Err(Error::configuration("applyto", other, "'data', 'sample'")),
        }
    }
}

/// Argument handed to an applied function, matching the [`ApplyTo`] selector.
pub enum Target<'a, R: SampleReader> {
    Sample(&'a Sample<R>),
    Data(&'a R::Data),
}

impl<'a, R: SampleReader> Target<'a, R> {
    pub fn sample(&self) -> Option<&'a Sample<R>> {
        match self {
            Target::Sample(s) => Some(s),
            Target::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<&'a R::Data> {
        match self {
            Target::Data(d) => Some(d),
            Target::Sample(_) => None,
        }
    }
}

/// Options shared by every apply operation.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Samples to visit; `None` visits all of them.
    pub ids: Option<Vec<SampleId>>,
    pub target: ApplyTo,
    /// Keep payloads that had to be read to serve the call.
    pub persist: bool,
    /// Trim leading/trailing empty rows and columns of table output.
    pub drop_empty: bool,
}

impl ApplyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SampleId>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn target(mut self, target: ApplyTo) -> Self {
        self.target = target;
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn drop_empty(mut self, drop_empty: bool) -> Self {
        self.drop_empty = drop_empty;
        self
    }
}

/// Shape of the results returned by an ordered collection's apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// ID → result.
    Map,
    /// One cell per grid position.
    #[default]
    Table,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dict" | "map" => Ok(OutputFormat::Map),
            "dataframe" | "table" => Ok(OutputFormat::Table),
            other => Err(Error::configuration(
                "output_format",
                other,
                "'map', 'table'",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutput<T> {
    Map(BTreeMap<SampleId, T>),
    Table(GridTable<T>),
}

impl<T> ApplyOutput<T> {
    pub fn into_map(self) -> Option<BTreeMap<SampleId, T>> {
        match self {
            ApplyOutput::Map(m) => Some(m),
            ApplyOutput::Table(_) => None,
        }
    }

    pub fn into_table(self) -> Option<GridTable<T>> {
        match self {
            ApplyOutput::Table(t) => Some(t),
            ApplyOutput::Map(_) => None,
        }
    }
}

/// Values produced by one call of a multi-output function, in output order.
#[derive(Debug, Clone, PartialEq)]
pub struct Outputs(pub Vec<MetadataValue>);

impl Outputs {
    pub(crate) fn repeat(value: &MetadataValue, n: usize) -> Self {
        Outputs(vec![value.clone(); n])
    }
}

impl From<Vec<MetadataValue>> for Outputs {
    fn from(values: Vec<MetadataValue>) -> Self {
        Outputs(values)
    }
}

impl<A, B> From<(A, B)> for Outputs
where
    A: Into<MetadataValue>,
    B: Into<MetadataValue>,
{
    fn from((a, b): (A, B)) -> Self {
        Outputs(vec![a.into(), b.into()])
    }
}

impl<A, B, C> From<(A, B, C)> for Outputs
where
    A: Into<MetadataValue>,
    B: Into<MetadataValue>,
    C: Into<MetadataValue>,
{
    fn from((a, b, c): (A, B, C)) -> Self {
        Outputs(vec![a.into(), b.into(), c.into()])
    }
}

macro_rules! single_output {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Outputs {
                fn from(value: $t) -> Self {
                    Outputs(vec![value.into()])
                }
            }
        )*
    };
}

single_output!(MetadataValue, f64, i64, usize, bool, String, &str);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_parse_case_insensitively() {
        assert_eq!("Data".parse::<ApplyTo>().unwrap(), ApplyTo::Data);
        assert_eq!("sample".parse::<ApplyTo>().unwrap(), ApplyTo::Sample);
        assert!(matches!(
            "samples".parse::<ApplyTo>(),
            Err(Error::Configuration { parameter: "applyto", .. })
        ));
        assert_eq!("DataFrame".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("dict".parse::<OutputFormat>().unwrap(), OutputFormat::Map);
        assert!("list".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn outputs_from_values_and_tuples() {
        assert_eq!(Outputs::from(3.5).0, vec![MetadataValue::Float(3.5)]);
        assert_eq!(
            Outputs::from((1i64, "x")).0,
            vec![MetadataValue::Integer(1), MetadataValue::from("x")]
        );
    }
}
