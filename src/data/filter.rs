use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use super::model::{Meta, MetadataValue};
use crate::error::{Error, Result};
use crate::sample::{Sample, SampleId, SampleReader};

// ---------------------------------------------------------------------------
// What a filter looks at
// ---------------------------------------------------------------------------

/// What the filter criteria are evaluated against.
#[derive(Debug, Clone, Default)]
pub enum FilterTarget {
    #[default]
    Samples,
    Keys,
    /// The payload, read without caching it.
    Data,
    /// An externally supplied value per sample ID. IDs missing from the map
    /// are seen as `Null`.
    Attribute(BTreeMap<SampleId, MetadataValue>),
}

impl FromStr for FilterTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "samples" => Ok(FilterTarget::Samples),
            "keys" => Ok(FilterTarget::Keys),
            "data" => Ok(FilterTarget::Data),
            other => Err(Error::configuration(
                "applyto",
                other,
                "'samples', 'keys', 'data' or an attribute mapping",
            )),
        }
    }
}

/// The value a predicate is handed, one variant per [`FilterTarget`].
pub enum FilterSubject<'a, R: SampleReader> {
    Sample(&'a Sample<R>),
    Key(&'a str),
    /// `None` when the sample has no payload and no source.
    Data(Option<&'a R::Data>),
    Value(&'a MetadataValue),
}

// ---------------------------------------------------------------------------
// Criteria
// ---------------------------------------------------------------------------

pub enum Criteria<'f, R: SampleReader> {
    Predicate(Box<dyn Fn(&FilterSubject<'_, R>) -> bool + 'f>),
    /// Keep subjects whose key, sample ID or attribute value is in the set.
    OneOf(BTreeSet<MetadataValue>),
}

impl<'f, R: SampleReader> Criteria<'f, R> {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&FilterSubject<'_, R>) -> bool + 'f,
    {
        Criteria::Predicate(Box::new(f))
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<MetadataValue>,
    {
        Criteria::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub(crate) fn matches(&self, subject: &FilterSubject<'_, R>) -> bool {
        match self {
            Criteria::Predicate(f) => f(subject),
            Criteria::OneOf(values) => match subject {
                FilterSubject::Key(k) => values.contains(&MetadataValue::from(*k)),
                FilterSubject::Sample(s) => values.contains(&MetadataValue::from(s.id())),
                FilterSubject::Value(v) => values.contains(*v),
                FilterSubject::Data(_) => false,
            },
        }
    }
}

/// Sample attributes that can be turned into a per-ID value map for filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleAttr {
    Id,
    DataSource,
    MetaSource,
    /// A metadata keyword, read in meta-only mode when not cached.
    Meta(String),
}

impl SampleAttr {
    pub(crate) fn value_of<R: SampleReader>(&self, sample: &Sample<R>) -> Result<MetadataValue> {
        let path_value = |p: Option<&std::path::Path>| {
            p.map(|p| MetadataValue::from(p.to_string_lossy().into_owned()))
                .unwrap_or(MetadataValue::Null)
        };
        Ok(match self {
            SampleAttr::Id => MetadataValue::from(sample.id()),
            SampleAttr::DataSource => path_value(sample.data_source()),
            SampleAttr::MetaSource => path_value(sample.meta_source()),
            SampleAttr::Meta(field) => sample
                .meta_fields(&[field.as_str()])?
                .remove(field)
                .unwrap_or(MetadataValue::Null),
        })
    }
}

// ---------------------------------------------------------------------------
// Metadata value-set filter
// ---------------------------------------------------------------------------

/// Per-keyword selection state: maps keyword → set of accepted values.
pub type FilterState = BTreeMap<String, BTreeSet<MetadataValue>>;

/// Whether a sample's metadata passes all keyword filters.
///
/// * An empty selection for a keyword rejects everything.
/// * A missing keyword passes only when `Null` is selected.
pub fn meta_passes(meta: Option<&Meta>, filters: &FilterState) -> bool {
    filters.iter().all(|(key, selected)| {
        if selected.is_empty() {
            return false;
        }
        match meta.and_then(|m| m.get(key)) {
            Some(val) => selected.contains(val),
            None => selected.contains(&MetadataValue::Null),
        }
    })
}
