use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use log::info;
use serde::{Deserialize, Serialize};

use crate::apply::{ApplyOptions, Target};
use crate::config::SourceQuery;
use crate::data::filter::{
    meta_passes, Criteria, FilterState, FilterSubject, FilterTarget, SampleAttr,
};
use crate::data::model::{Meta, MetadataValue};
use crate::error::{Error, Result};
use crate::parsers::{assign_ids, IdParser};
use crate::sample::{Assign, Sample, SampleId, SampleReader};

/// A keyed set of samples of one kind.
#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "R::Data: Serialize",
    deserialize = "R::Data: Deserialize<'de>"
))]
pub struct SampleCollection<R: SampleReader> {
    id: String,
    members: BTreeMap<SampleId, Sample<R>>,
}

impl<R: SampleReader> Clone for SampleCollection<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            members: self.members.clone(),
        }
    }
}

impl<R: SampleReader> std::fmt::Debug for SampleCollection<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleCollection")
            .field("id", &self.id)
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<R: SampleReader> SampleCollection<R> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: BTreeMap::new(),
        }
    }

    /// Collect samples keyed by their IDs. A repeated ID replaces the earlier sample.
    pub fn from_samples<I>(id: impl Into<String>, samples: I) -> Self
    where
        I: IntoIterator<Item = Sample<R>>,
    {
        let mut collection = Self::new(id);
        for sample in samples {
            collection.insert(sample);
        }
        collection
    }

    /// One sample per resolved ID, backed by its file. Nothing is read unless
    /// the parser is [`IdParser::Read`].
    pub fn from_sources(
        id: impl Into<String>,
        sources: &[PathBuf],
        parser: &IdParser,
    ) -> Result<Self> {
        let ids = assign_ids::<R>(sources, parser, None)?;
        let collection = Self::from_samples(
            id,
            ids.into_iter()
                .map(|(sid, path)| Sample::new(sid).with_data_source(path)),
        );
        info!(
            "collection {}: {} samples from {} files",
            collection.id,
            collection.len(),
            sources.len()
        );
        Ok(collection)
    }

    pub fn from_dir(id: impl Into<String>, query: &SourceQuery, parser: &IdParser) -> Result<Self> {
        Self::from_sources(id, &query.discover()?, parser)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rename(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    // -- mapping contract --

    pub fn get(&self, id: &str) -> Option<&Sample<R>> {
        self.members.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Sample<R>> {
        self.members.get_mut(id)
    }

    /// Insert keyed by the sample's ID, returning any sample it replaced.
    pub fn insert(&mut self, sample: Sample<R>) -> Option<Sample<R>> {
        self.members.insert(sample.id().to_string(), sample)
    }

    pub fn remove(&mut self, id: &str) -> Option<Sample<R>> {
        self.members.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Sample<R>)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Requested IDs, or all of them; unknown IDs are an error.
    fn resolve_ids(&self, ids: Option<&[SampleId]>) -> Result<Vec<SampleId>> {
        match ids {
            None => Ok(self.members.keys().cloned().collect()),
            Some(ids) => ids
                .iter()
                .map(|id| {
                    if self.contains(id) {
                        Ok(id.clone())
                    } else {
                        Err(Error::UnknownSample(id.clone()))
                    }
                })
                .collect(),
        }
    }

    // -- apply --

    /// Apply `f` to each selected sample (or its payload) and collect ID → result.
    ///
    /// Samples with nothing to read yield `none_value`.
    pub fn apply<T, F>(
        &mut self,
        mut f: F,
        none_value: T,
        opts: &ApplyOptions,
    ) -> Result<BTreeMap<SampleId, T>>
    where
        T: Clone,
        F: FnMut(Target<'_, R>) -> T,
    {
        self.try_apply(
            |t| Ok::<T, std::convert::Infallible>(f(t)),
            none_value,
            opts,
        )
    }

    /// Like [`SampleCollection::apply`]; the first error returned by `f` aborts the scan.
    pub fn try_apply<T, E, F>(
        &mut self,
        mut f: F,
        none_value: T,
        opts: &ApplyOptions,
    ) -> Result<BTreeMap<SampleId, T>>
    where
        T: Clone,
        F: FnMut(Target<'_, R>) -> std::result::Result<T, E>,
        E: Into<anyhow::Error>,
    {
        let ids = self.resolve_ids(opts.ids.as_deref())?;
        let mut results = BTreeMap::new();
        for id in ids {
            let sample = self
                .members
                .get_mut(&id)
                .ok_or_else(|| Error::UnknownSample(id.clone()))?;
            let value = sample.try_apply(&mut f, opts.target, none_value.clone(), opts.persist)?;
            results.insert(id, value);
        }
        Ok(results)
    }

    pub fn clear_sample_data(&mut self, ids: Option<&[SampleId]>) -> Result<()> {
        for id in self.resolve_ids(ids)? {
            if let Some(sample) = self.members.get_mut(&id) {
                sample.clear_data();
            }
        }
        Ok(())
    }

    pub fn clear_sample_meta(&mut self, ids: Option<&[SampleId]>) -> Result<()> {
        for id in self.resolve_ids(ids)? {
            if let Some(sample) = self.members.get_mut(&id) {
                sample.clear_meta();
            }
        }
        Ok(())
    }

    /// Selected metadata fields of each sample.
    pub fn sample_metadata<S: AsRef<str>>(
        &self,
        fields: &[S],
        ids: Option<&[SampleId]>,
    ) -> Result<BTreeMap<SampleId, Meta>> {
        self.resolve_ids(ids)?
            .into_iter()
            .map(|id| {
                let meta = self.members[&id].meta_fields(fields)?;
                Ok((id, meta))
            })
            .collect()
    }

    // -- filtering --

    /// IDs of the members matching `criteria` evaluated on `target`.
    pub(crate) fn select_ids(
        &self,
        criteria: &Criteria<'_, R>,
        target: &FilterTarget,
    ) -> Result<BTreeSet<SampleId>> {
        let null = MetadataValue::Null;
        let mut selected = BTreeSet::new();
        for (id, sample) in &self.members {
            let keep = match target {
                FilterTarget::Samples => criteria.matches(&FilterSubject::Sample(sample)),
                FilterTarget::Keys => criteria.matches(&FilterSubject::Key(id)),
                FilterTarget::Data => {
                    let data = sample.get_data()?;
                    criteria.matches(&FilterSubject::Data(data.as_deref()))
                }
                FilterTarget::Attribute(values) => {
                    criteria.matches(&FilterSubject::Value(values.get(id).unwrap_or(&null)))
                }
            };
            if keep {
                selected.insert(id.clone());
            }
        }
        Ok(selected)
    }

    pub(crate) fn derived_id(&self, new_id: Option<&str>, suffix: &str) -> String {
        new_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.{suffix}", self.id))
    }

    fn subset(&self, ids: &BTreeSet<SampleId>, new_id: String) -> Self {
        Self {
            id: new_id,
            members: self
                .members
                .iter()
                .filter(|(k, _)| ids.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// A new collection holding the matching samples. Its ID defaults to
    /// `<id>.filtered`.
    pub fn filter(
        &self,
        criteria: &Criteria<'_, R>,
        target: &FilterTarget,
        new_id: Option<&str>,
    ) -> Result<Self> {
        let ids = self.select_ids(criteria, target)?;
        Ok(self.subset(&ids, self.derived_id(new_id, "filtered")))
    }

    pub fn filter_by_key<S: AsRef<str>>(&self, keys: &[S], new_id: Option<&str>) -> Result<Self> {
        let criteria = Criteria::one_of(keys.iter().map(|k| k.as_ref()));
        self.filter(&criteria, &FilterTarget::Keys, new_id)
    }

    /// Evaluate `criteria` on one attribute of every sample.
    pub fn filter_by_attribute(
        &self,
        attr: &SampleAttr,
        criteria: &Criteria<'_, R>,
        new_id: Option<&str>,
    ) -> Result<Self> {
        let values = self.attribute_values(attr)?;
        self.filter(criteria, &FilterTarget::Attribute(values), new_id)
    }

    pub(crate) fn attribute_values(
        &self,
        attr: &SampleAttr,
    ) -> Result<BTreeMap<SampleId, MetadataValue>> {
        self.members
            .iter()
            .map(|(id, s)| Ok((id.clone(), attr.value_of(s)?)))
            .collect()
    }

    /// Keep the samples whose own ID is listed.
    pub fn filter_by_ids<S: AsRef<str>>(&self, ids: &[S], new_id: Option<&str>) -> Result<Self> {
        let criteria = Criteria::one_of(ids.iter().map(|k| k.as_ref()));
        self.filter_by_attribute(&SampleAttr::Id, &criteria, new_id)
    }

    /// Keep the samples whose metadata passes every keyword selection.
    pub fn filter_by_meta(&self, filters: &FilterState, new_id: Option<&str>) -> Result<Self> {
        let ids = self.meta_ids(filters)?;
        Ok(self.subset(&ids, self.derived_id(new_id, "filtered")))
    }

    /// IDs of the members whose metadata passes `filters`.
    pub(crate) fn meta_ids(&self, filters: &FilterState) -> Result<BTreeSet<SampleId>> {
        let mut ids = BTreeSet::new();
        for (id, sample) in &self.members {
            if meta_passes(sample.get_meta()?.as_deref(), filters) {
                ids.insert(id.clone());
            }
        }
        Ok(ids)
    }

    // -- transforms --

    /// A new collection whose samples hold `f` applied to their payloads.
    /// Samples without a payload are carried over unchanged. Every
    /// transformed payload is held in memory. The ID defaults to
    /// `<id>.transformed`; `self` is left untouched.
    pub fn transform<F>(&self, mut f: F, new_id: Option<&str>) -> Result<Self>
    where
        F: FnMut(&R::Data) -> R::Data,
    {
        let mut members = BTreeMap::new();
        for (id, sample) in &self.members {
            let mut derived = sample.clone();
            if let Some(data) = sample.get_data()? {
                derived.set_data(Assign::Value(f(&data)))?;
            }
            members.insert(id.clone(), derived);
        }
        Ok(Self {
            id: self.derived_id(new_id, "transformed"),
            members,
        })
    }

    /// Transform, then give `self` the derived name while the returned
    /// collection keeps the name `self` had before the call.
    pub fn transform_renaming<F>(&mut self, f: F, new_id: Option<&str>) -> Result<Self>
    where
        F: FnMut(&R::Data) -> R::Data,
    {
        let mut derived = self.transform(f, new_id)?;
        let renamed = derived.id.clone();
        derived.id = std::mem::replace(&mut self.id, renamed);
        Ok(derived)
    }
}
