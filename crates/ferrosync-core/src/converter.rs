//! Cross-schema conversion of sync objects
//!
//! When the two nodes store the same data under different shapes, an
//! [`ObjectConverter`] rewrites sync objects of a source type into a
//! destination type. Same-name fields of the same JSON kind are copied
//! automatically; everything else is left to an optional mapping delegate.

use crate::entity::{from_sync_object, kind_name, to_map, to_sync_object, SyncEntity};
use crate::exclusion::{ExclusionCache, ExclusionDirection};
use ferrosync_types::{Result, SyncIssue, SyncObject};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Converts sync objects of one wire type into another
pub trait SyncObjectConverter: Send + Sync {
    /// Wire type name this converter accepts
    fn source_type(&self) -> &str;

    /// Wire type name this converter produces
    fn destination_type(&self) -> &str;

    /// Check if `object` is handled by this converter
    fn can_convert(&self, object: &SyncObject) -> bool {
        object.type_name() == self.source_type()
    }

    /// Convert one object
    fn convert(&self, object: &SyncObject) -> Result<SyncObject>;

    /// Register the exclusions this converter adds to its source type
    fn register_exclusions(&self, cache: &ExclusionCache) -> Result<()>;
}

/// Bespoke field mapping run after the automatic copy
pub type MappingDelegate<S, D> = Arc<dyn Fn(&S, &mut D) + Send + Sync>;

/// Converter between two entity types
pub struct ObjectConverter<S, D> {
    cache: Arc<ExclusionCache>,
    excluded: HashSet<String>,
    source_exclusions: Vec<(ExclusionDirection, Vec<String>)>,
    mapping: Option<MappingDelegate<S, D>>,
    _marker: PhantomData<fn(S) -> D>,
}

impl<S, D> ObjectConverter<S, D>
where
    S: SyncEntity,
    D: SyncEntity + Default,
{
    /// Create a converter honoring the exclusions held by `cache`
    pub fn new(cache: Arc<ExclusionCache>) -> Self {
        Self {
            cache,
            excluded: HashSet::new(),
            source_exclusions: Vec::new(),
            mapping: None,
            _marker: PhantomData,
        }
    }

    /// Set the bespoke mapping delegate
    pub fn with_mapping<F>(mut self, mapping: F) -> Self
    where
        F: Fn(&S, &mut D) + Send + Sync + 'static,
    {
        self.mapping = Some(Arc::new(mapping));
        self
    }

    /// Never copy these source fields automatically
    pub fn with_excluded<I, T>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.excluded.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Exclusions added to the source type once the converter is activated
    pub fn with_source_exclusions<I, T>(mut self, direction: ExclusionDirection, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.source_exclusions
            .push((direction, fields.into_iter().map(Into::into).collect()));
        self
    }

    fn copy_fields(&self, source: Map<String, Value>) -> Result<D> {
        let excluded = self.cache.incoming::<D>()?;
        let mut target = to_map(&D::default())?;
        let mut copied = Vec::new();

        for (key, value) in source {
            if excluded.contains(&key) || self.excluded.contains(&key) {
                continue;
            }
            let Some(slot) = target.get_mut(&key) else {
                continue;
            };
            if slot.is_null() || kind_name(slot) == kind_name(&value) {
                *slot = value;
                copied.push(key);
            }
        }

        if let Ok(entity) = serde_json::from_value::<D>(Value::Object(target.clone())) {
            return Ok(entity);
        }

        // Drop fields whose values the destination cannot hold.
        let defaults = to_map(&D::default())?;
        for key in copied {
            let mut candidate = defaults.clone();
            if let Some(value) = target.get(&key) {
                candidate.insert(key.clone(), value.clone());
            }
            if serde_json::from_value::<D>(Value::Object(candidate)).is_err() {
                debug!("Leaving {}.{} at its default", D::TYPE_NAME, key);
                if let Some(default) = defaults.get(&key) {
                    target.insert(key, default.clone());
                }
            }
        }
        Ok(serde_json::from_value::<D>(Value::Object(target))?)
    }
}

impl<S, D> SyncObjectConverter for ObjectConverter<S, D>
where
    S: SyncEntity,
    D: SyncEntity + Default,
{
    fn source_type(&self) -> &str {
        S::TYPE_NAME
    }

    fn destination_type(&self) -> &str {
        D::TYPE_NAME
    }

    fn convert(&self, object: &SyncObject) -> Result<SyncObject> {
        if object.is_deleted() && object.data().is_empty() {
            return Ok(SyncObject::deleted(
                object.sync_id(),
                D::TYPE_NAME,
                object.modified_on(),
            ));
        }

        let source: S = from_sync_object(object)?;
        let mut destination = self.copy_fields(to_map(&source)?)?;
        destination.set_sync_id(object.sync_id());
        if let Some(mapping) = &self.mapping {
            mapping(&source, &mut destination);
        }

        let excluded = self.cache.outgoing::<D>()?;
        let converted = to_sync_object(&destination, object.status(), &excluded)?;
        Ok(SyncObject::new(
            object.sync_id(),
            D::TYPE_NAME,
            converted.data(),
            object.modified_on(),
            object.status(),
        ))
    }

    fn register_exclusions(&self, cache: &ExclusionCache) -> Result<()> {
        for (direction, fields) in &self.source_exclusions {
            cache.add_exclusions(S::TYPE_NAME, *direction, fields.iter().cloned())?;
        }
        Ok(())
    }
}

impl<S, D> fmt::Debug for ObjectConverter<S, D>
where
    S: SyncEntity,
    D: SyncEntity,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectConverter")
            .field("source", &S::TYPE_NAME)
            .field("destination", &D::TYPE_NAME)
            .field("excluded", &self.excluded)
            .field("has_mapping", &self.mapping.is_some())
            .finish()
    }
}

/// Converters applied at the boundary of a client
#[derive(Default, Clone)]
pub struct ConverterSet {
    incoming: Vec<Arc<dyn SyncObjectConverter>>,
    outgoing: Vec<Arc<dyn SyncObjectConverter>>,
}

impl ConverterSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a converter for objects arriving from the peer
    pub fn with_incoming(mut self, converter: impl SyncObjectConverter + 'static) -> Self {
        self.incoming.push(Arc::new(converter));
        self
    }

    /// Add a converter for objects sent to the peer
    pub fn with_outgoing(mut self, converter: impl SyncObjectConverter + 'static) -> Self {
        self.outgoing.push(Arc::new(converter));
        self
    }

    /// Check if no converter is registered
    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }

    /// Register the exclusions of every converter
    pub fn activate(&self, cache: &ExclusionCache) -> Result<()> {
        for converter in self.incoming.iter().chain(&self.outgoing) {
            converter.register_exclusions(cache)?;
            debug!(
                "Activated converter {} -> {}",
                converter.source_type(),
                converter.destination_type()
            );
        }
        Ok(())
    }

    /// Convert incoming objects; failures become `Unknown` issues
    pub fn convert_incoming(&self, objects: &[SyncObject]) -> (Vec<SyncObject>, Vec<SyncIssue>) {
        let mut converted = Vec::with_capacity(objects.len());
        let mut issues = Vec::new();

        for object in objects {
            match convert_with(&self.incoming, object) {
                Ok(object) => converted.push(object),
                Err(error) => {
                    warn!(
                        "Failed to convert {} {}: {}",
                        object.type_name(),
                        object.sync_id(),
                        error
                    );
                    issues.push(SyncIssue::unknown(object, error.to_string()));
                }
            }
        }

        (converted, issues)
    }

    /// Convert outgoing objects
    pub fn convert_outgoing(&self, objects: Vec<SyncObject>) -> Result<Vec<SyncObject>> {
        if self.outgoing.is_empty() {
            return Ok(objects);
        }
        objects
            .iter()
            .map(|object| convert_with(&self.outgoing, object))
            .collect()
    }

    /// Local type name behind a wire type produced by an outgoing converter
    pub fn local_type_for<'a>(&'a self, wire_type: &'a str) -> &'a str {
        self.outgoing
            .iter()
            .find(|c| c.destination_type() == wire_type)
            .map_or(wire_type, |c| c.source_type())
    }
}

impl fmt::Debug for ConverterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterSet")
            .field("incoming", &self.incoming.len())
            .field("outgoing", &self.outgoing.len())
            .finish()
    }
}

fn convert_with(
    converters: &[Arc<dyn SyncObjectConverter>],
    object: &SyncObject,
) -> Result<SyncObject> {
    match converters.iter().find(|c| c.can_convert(object)) {
        Some(converter) => converter.convert(object),
        None => Ok(object.clone()),
    }
}
