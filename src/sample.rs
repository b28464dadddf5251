use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::apply::{ApplyTo, Target};
use crate::data::model::{Meta, MetadataValue, Shaped};
use crate::error::{Error, Result};
use crate::grid::Position;

pub type SampleId = String;

// ---------------------------------------------------------------------------
// SampleReader – the payload reader contract
// ---------------------------------------------------------------------------

/// Turns backing files into payloads and metadata for one kind of sample.
///
/// Readers are stateless: a sample type is fully described by its reader,
/// and every container is generic over exactly one reader.
pub trait SampleReader {
    type Data: Clone;

    /// Read the full payload stored at `path`.
    fn read_data(path: &Path) -> anyhow::Result<Self::Data>;

    /// Read only the side table stored at `path`, without the payload.
    fn read_meta(path: &Path) -> anyhow::Result<Meta>;

    /// Metadata keyword holding the sample's identity (e.g. the well name).
    fn identity_field() -> &'static str {
        "$SRC"
    }
}

/// Either a value to store directly or a file to read it from.
#[derive(Debug, Clone)]
pub enum Assign<T> {
    Value(T),
    Source(PathBuf),
}

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// One measurement record whose payload and metadata are loaded on demand.
#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "R::Data: Serialize",
    deserialize = "R::Data: Deserialize<'de>"
))]
pub struct Sample<R: SampleReader> {
    id: SampleId,
    data_source: Option<PathBuf>,
    meta_source: Option<PathBuf>,
    data: Option<R::Data>,
    meta: Option<Meta>,
    /// Owning collection ID → position in that collection.
    positions: BTreeMap<String, Position>,
    #[serde(skip)]
    _reader: PhantomData<R>,
}

impl<R: SampleReader> Clone for Sample<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            data_source: self.data_source.clone(),
            meta_source: self.meta_source.clone(),
            data: self.data.clone(),
            meta: self.meta.clone(),
            positions: self.positions.clone(),
            _reader: PhantomData,
        }
    }
}

impl<R: SampleReader> fmt::Debug for Sample<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("id", &self.id)
            .field("data_source", &self.data_source)
            .field("meta_source", &self.meta_source)
            .field("data_loaded", &self.data.is_some())
            .field("meta_loaded", &self.meta.is_some())
            .field("positions", &self.positions)
            .finish()
    }
}

fn read_with<T>(path: &Path, read: fn(&Path) -> anyhow::Result<T>) -> Result<T> {
    debug!("reading {path:?}");
    read(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })
}

impl<R: SampleReader> Sample<R> {
    pub fn new(id: impl Into<SampleId>) -> Self {
        Self {
            id: id.into(),
            data_source: None,
            meta_source: None,
            data: None,
            meta: None,
            positions: BTreeMap::new(),
            _reader: PhantomData,
        }
    }

    pub fn with_data_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_source = Some(path.into());
        self
    }

    pub fn with_meta_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.meta_source = Some(path.into());
        self
    }

    pub fn with_data(mut self, data: R::Data) -> Self {
        self.data = Some(data);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data_source(&self) -> Option<&Path> {
        self.data_source.as_deref()
    }

    pub fn meta_source(&self) -> Option<&Path> {
        self.meta_source.as_deref()
    }

    /// Point the sample at a new data file. Any cached payload belonged to the
    /// old file and is dropped.
    pub fn set_data_source(&mut self, path: Option<PathBuf>) {
        self.data_source = path;
        self.data = None;
    }

    pub fn set_meta_source(&mut self, path: Option<PathBuf>) {
        self.meta_source = path;
        self.meta = None;
    }

    /// The cached payload, without touching the backing file.
    pub fn data(&self) -> Option<&R::Data> {
        self.data.as_ref()
    }

    /// The cached metadata, without touching the backing file.
    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    pub fn is_data_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Where the side table comes from: its own file, else the data file.
    fn meta_path(&self) -> Option<&Path> {
        self.meta_source.as_deref().or(self.data_source.as_deref())
    }

    // -- lazy access --

    /// The payload: cached if present, else read from the data source.
    /// `None` when there is neither. Never stores what it reads.
    pub fn get_data(&self) -> Result<Option<Cow<'_, R::Data>>> {
        if let Some(data) = &self.data {
            return Ok(Some(Cow::Borrowed(data)));
        }
        match &self.data_source {
            Some(path) => Ok(Some(Cow::Owned(read_with(path, R::read_data)?))),
            None => Ok(None),
        }
    }

    /// The metadata: cached if present, else read in meta-only mode.
    pub fn get_meta(&self) -> Result<Option<Cow<'_, Meta>>> {
        if let Some(meta) = &self.meta {
            return Ok(Some(Cow::Borrowed(meta)));
        }
        match self.meta_path() {
            Some(path) => Ok(Some(Cow::Owned(read_with(path, R::read_meta)?))),
            None => Ok(None),
        }
    }

    /// Store a payload, reading it immediately when given a source.
    pub fn set_data(&mut self, value: Assign<R::Data>) -> Result<()> {
        self.data = Some(match value {
            Assign::Value(data) => data,
            Assign::Source(path) => {
                let data = read_with(&path, R::read_data)?;
                self.data_source = Some(path);
                data
            }
        });
        Ok(())
    }

    pub fn set_meta(&mut self, value: Assign<Meta>) -> Result<()> {
        self.meta = Some(match value {
            Assign::Value(meta) => meta,
            Assign::Source(path) => {
                let meta = read_with(&path, R::read_meta)?;
                self.meta_source = Some(path);
                meta
            }
        });
        Ok(())
    }

    /// Eagerly read the payload from the data source, if it is not cached yet.
    pub fn load_data(&mut self) -> Result<()> {
        if self.data.is_none() {
            if let Some(path) = &self.data_source {
                self.data = Some(read_with(path, R::read_data)?);
            }
        }
        Ok(())
    }

    pub fn load_meta(&mut self) -> Result<()> {
        if self.meta.is_none() {
            if let Some(path) = self.meta_path().map(Path::to_path_buf) {
                self.meta = Some(read_with(&path, R::read_meta)?);
            }
        }
        Ok(())
    }

    pub fn clear_data(&mut self) {
        self.data = None;
    }

    pub fn clear_meta(&mut self) {
        self.meta = None;
    }

    /// Selected metadata fields; fields that are missing map to `Null`.
    pub fn meta_fields<S: AsRef<str>>(&self, fields: &[S]) -> Result<Meta> {
        let meta = self.get_meta()?;
        Ok(fields
            .iter()
            .map(|field| {
                let field = field.as_ref();
                let value = meta
                    .as_ref()
                    .and_then(|m| m.get(field).cloned())
                    .unwrap_or(MetadataValue::Null);
                (field.to_string(), value)
            })
            .collect())
    }

    /// Identity recorded inside the backing file (see [`SampleReader::identity_field`]).
    pub fn derive_identity_from_payload(&self) -> Result<SampleId> {
        let field = R::identity_field();
        let missing = || Error::IdentityLookup {
            field: field.to_string(),
            path: self.meta_path().map(Path::to_path_buf).unwrap_or_default(),
        };
        let meta = self.get_meta()?.ok_or_else(missing)?;
        match meta.get(field) {
            None | Some(MetadataValue::Null) => Err(missing()),
            Some(value) => Ok(value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string())),
        }
    }

    // -- positions --

    pub fn position_in(&self, collection_id: &str) -> Option<&Position> {
        self.positions.get(collection_id)
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub(crate) fn set_position(&mut self, collection_id: &str, position: Position) {
        self.positions.insert(collection_id.to_string(), position);
    }

    pub(crate) fn unset_position(&mut self, collection_id: &str) {
        self.positions.remove(collection_id);
    }

    // -- apply --

    /// Apply `f` to the sample or to its payload.
    ///
    /// With [`ApplyTo::Data`] and neither a cached payload nor a source,
    /// `none_value` is returned and `f` is not called. A payload read to serve
    /// the call is kept only when `persist` is set.
    pub fn apply<T, F>(&mut self, f: F, target: ApplyTo, none_value: T, persist: bool) -> Result<T>
    where
        F: FnOnce(Target<'_, R>) -> T,
    {
        self.try_apply(
            |t| Ok::<T, std::convert::Infallible>(f(t)),
            target,
            none_value,
            persist,
        )
    }

    /// Like [`Sample::apply`], for functions that can fail. Their errors are
    /// returned as [`Error::Callback`].
    pub fn try_apply<T, E, F>(
        &mut self,
        f: F,
        target: ApplyTo,
        none_value: T,
        persist: bool,
    ) -> Result<T>
    where
        F: FnOnce(Target<'_, R>) -> std::result::Result<T, E>,
        E: Into<anyhow::Error>,
    {
        let result = match target {
            ApplyTo::Sample => f(Target::Sample(&*self)),
            ApplyTo::Data => {
                if self.data.is_none() {
                    let Some(path) = self.data_source.clone() else {
                        return Ok(none_value);
                    };
                    let data = read_with(&path, R::read_data)?;
                    if !persist {
                        return f(Target::Data(&data)).map_err(|e| Error::Callback(e.into()));
                    }
                    self.data = Some(data);
                }
                match &self.data {
                    Some(data) => f(Target::Data(data)),
                    None => return Ok(none_value),
                }
            }
        };
        result.map_err(|e| Error::Callback(e.into()))
    }
}

impl<R> Sample<R>
where
    R: SampleReader,
    R::Data: Shaped,
{
    /// Shape of the cached payload, `None` if nothing is cached.
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.data.as_ref().map(Shaped::shape)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockReader;
    use super::*;

    type TestSample = Sample<MockReader>;

    #[test]
    fn get_data_falls_back_to_source_then_none() {
        let path = MockReader::add_file("/plate/s_A1.dat", vec![1.0, 2.0], Some("A1"));
        let sample = TestSample::new("A1").with_data_source(&path);
        assert_eq!(sample.get_data().unwrap().as_deref(), Some(&vec![1.0, 2.0]));
        assert!(!sample.is_data_loaded());

        let empty = TestSample::new("B1");
        assert!(empty.get_data().unwrap().is_none());
        assert!(empty.get_meta().unwrap().is_none());
    }

    #[test]
    fn cached_data_is_authoritative() {
        let path = MockReader::add_file("/plate/s_A2.dat", vec![1.0], None);
        let sample = TestSample::new("A2")
            .with_data_source(&path)
            .with_data(vec![9.0, 9.0]);
        let before = MockReader::data_reads();
        assert_eq!(sample.get_data().unwrap().as_deref(), Some(&vec![9.0, 9.0]));
        assert_eq!(MockReader::data_reads(), before);
    }

    #[test]
    fn persisting_apply_reads_once() {
        let path = MockReader::add_file("/plate/s_A3.dat", vec![1.0, 2.0, 3.0], None);
        let mut sample = TestSample::new("A3").with_data_source(&path);
        let before = MockReader::data_reads();

        fn len(t: Target<'_, MockReader>) -> usize {
            t.data().map_or(0, Vec::len)
        }
        let first = sample.apply(len, ApplyTo::Data, 0, true).unwrap();
        let second = sample.apply(len, ApplyTo::Data, 0, false).unwrap();
        assert_eq!(first, 3);
        assert_eq!(first, second);
        assert_eq!(MockReader::data_reads(), before + 1);
        assert!(sample.is_data_loaded());
    }

    #[test]
    fn non_persisting_apply_discards_payload() {
        let path = MockReader::add_file("/plate/s_A4.dat", vec![1.0], None);
        let mut sample = TestSample::new("A4").with_data_source(&path);
        let before = MockReader::data_reads();

        sample.apply(|_| (), ApplyTo::Data, (), false).unwrap();
        sample.apply(|_| (), ApplyTo::Data, (), false).unwrap();
        assert!(!sample.is_data_loaded());
        assert_eq!(MockReader::data_reads(), before + 2);
    }

    #[test]
    fn apply_without_data_returns_none_value_without_calling() {
        let mut sample = TestSample::new("C1");
        let mut called = false;
        let out = sample
            .apply(
                |_| {
                    called = true;
                    1
                },
                ApplyTo::Data,
                -1,
                false,
            )
            .unwrap();
        assert_eq!(out, -1);
        assert!(!called);

        let id = sample
            .apply(|t| t.sample().map(|s| s.id().to_string()), ApplyTo::Sample, None, false)
            .unwrap();
        assert_eq!(id.as_deref(), Some("C1"));
    }

    #[test]
    fn callback_errors_propagate() {
        let mut sample = TestSample::new("C2").with_data(vec![1.0]);
        let err = sample
            .try_apply(
                |_| Err::<(), _>(anyhow::anyhow!("bad channel")),
                ApplyTo::Data,
                (),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Callback(_)));
        assert_eq!(err.to_string(), "bad channel");
    }

    #[test]
    fn reader_errors_propagate() {
        let mut sample = TestSample::new("C3").with_data_source("/nowhere.dat");
        let err = sample.apply(|_| (), ApplyTo::Data, (), false).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn set_data_from_source_records_path() {
        let path = MockReader::add_file("/plate/s_D1.dat", vec![4.0], None);
        let mut sample = TestSample::new("D1");
        sample.set_data(Assign::Source(path.clone())).unwrap();
        assert_eq!(sample.data(), Some(&vec![4.0]));
        assert_eq!(sample.data_source(), Some(path.as_path()));

        sample.set_data(Assign::Value(vec![5.0])).unwrap();
        assert_eq!(sample.data(), Some(&vec![5.0]));
        sample.clear_data();
        assert_eq!(sample.get_data().unwrap().as_deref(), Some(&vec![4.0]));
    }

    #[test]
    fn meta_falls_back_to_data_file() {
        let path = MockReader::add_file("/plate/s_D2.dat", vec![1.0, 1.0], Some("D2"));
        let sample = TestSample::new("x").with_data_source(&path);
        let fields = sample.meta_fields(&["$SRC", "$DATE"]).unwrap();
        assert_eq!(fields["$SRC"], MetadataValue::from("D2"));
        assert_eq!(fields["$DATE"], MetadataValue::Null);
        assert_eq!(sample.derive_identity_from_payload().unwrap(), "D2");
    }

    #[test]
    fn identity_lookup_fails_without_field() {
        let path = MockReader::add_file("/plate/s_D3.dat", vec![], None);
        let sample = TestSample::new("x").with_data_source(&path);
        assert!(matches!(
            sample.derive_identity_from_payload(),
            Err(Error::IdentityLookup { .. })
        ));
    }
}
