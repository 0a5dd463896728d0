//! Property store: typed, port-scoped block properties with dirty tracking.
//!
//! Properties live in an arena owned by the block and are addressed by
//! [`PropId`] handles, so resolvers hold indices rather than references into
//! a growing collection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::fmt;

use crate::error::{DdcError, DdcResult};

/// Sample rate, on input and output edges.
pub const PROP_KEY_SAMP_RATE: &str = "samp_rate";
/// Amplitude scaling, on input and output edges.
pub const PROP_KEY_SCALING: &str = "scaling";
/// Decimation factor (user scope).
pub const PROP_KEY_DECIM: &str = "decim";
/// Frequency shift in Hz (user scope).
pub const PROP_KEY_FREQ: &str = "freq";
/// Sample data type, on input and output edges.
pub const PROP_KEY_TYPE: &str = "type";

/// Complex signed 16-bit samples.
pub const IO_TYPE_SC16: &str = "sc16";

/// Where a property lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceType {
    /// Input edge of the block.
    InputEdge,
    /// Output edge of the block.
    OutputEdge,
    /// Set by the user, not attached to an edge.
    User,
}

/// Property scope: source type plus port/channel index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResSourceInfo {
    /// Which side of the block, or user scope.
    pub kind: SourceType,
    /// Port or channel index.
    pub instance: usize,
}

impl ResSourceInfo {
    /// Input edge of port `instance`.
    pub fn input(instance: usize) -> Self {
        Self {
            kind: SourceType::InputEdge,
            instance,
        }
    }

    /// Output edge of port `instance`.
    pub fn output(instance: usize) -> Self {
        Self {
            kind: SourceType::OutputEdge,
            instance,
        }
    }

    /// User scope of channel `instance`.
    pub fn user(instance: usize) -> Self {
        Self {
            kind: SourceType::User,
            instance,
        }
    }

    /// The opposite edge on the same port. User scope is its own inverse.
    pub fn invert_edge(self) -> Self {
        let kind = match self.kind {
            SourceType::InputEdge => SourceType::OutputEdge,
            SourceType::OutputEdge => SourceType::InputEdge,
            SourceType::User => SourceType::User,
        };
        Self { kind, ..self }
    }

    /// True for input and output edges.
    pub fn is_edge(&self) -> bool {
        self.kind != SourceType::User
    }
}

impl fmt::Display for ResSourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SourceType::InputEdge => "input",
            SourceType::OutputEdge => "output",
            SourceType::User => "user",
        };
        write!(f, "{}:{}", kind, self.instance)
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    /// Floating point value (rates, scaling, frequency).
    Double(f64),
    /// Integer value (decimation).
    Int(i64),
    /// String value (sample type).
    Str(String),
}

impl PropValue {
    /// Name of the carried type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropValue::Double(_) => "double",
            PropValue::Int(_) => "int",
            PropValue::Str(_) => "string",
        }
    }

    /// The carried double, if this is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// The carried integer, if this is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The carried string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        PropValue::Double(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Str(v.to_string())
    }
}

/// Stable handle to a property in a [`PropertyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropId(pub usize);

/// A single registered property.
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    scope: ResSourceInfo,
    value: PropValue,
    dirty: bool,
}

impl Property {
    /// Property key, e.g. `samp_rate`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Edge or user scope the property is attached to.
    pub fn scope(&self) -> ResSourceInfo {
        self.scope
    }

    /// Current value.
    pub fn value(&self) -> &PropValue {
        &self.value
    }

    /// Changed since the last resolution pass.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// `name@scope`, for diagnostics.
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.scope)
    }
}

/// Arena of block properties, keyed by `(name, scope)`.
#[derive(Debug, Clone, Default)]
pub struct PropertyStore {
    props: Vec<Property>,
    index: HashMap<(String, ResSourceInfo), PropId>,
}

impl PropertyStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new property. It starts out clean.
    pub fn register(
        &mut self,
        name: &str,
        scope: ResSourceInfo,
        value: impl Into<PropValue>,
    ) -> DdcResult<PropId> {
        let key = (name.to_string(), scope);
        if self.index.contains_key(&key) {
            return Err(DdcError::AlreadyRegistered {
                name: name.to_string(),
                scope: scope.to_string(),
            });
        }
        let id = PropId(self.props.len());
        self.props.push(Property {
            name: name.to_string(),
            scope,
            value: value.into(),
            dirty: false,
        });
        self.index.insert(key, id);
        Ok(id)
    }

    /// Look up the handle for `(name, scope)`.
    pub fn id(&self, name: &str, scope: ResSourceInfo) -> DdcResult<PropId> {
        self.index
            .get(&(name.to_string(), scope))
            .copied()
            .ok_or_else(|| DdcError::NotFound {
                name: name.to_string(),
                scope: scope.to_string(),
            })
    }

    /// Number of registered properties.
    pub fn len(&self) -> usize {
        self.props.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Property behind a handle.
    pub fn prop(&self, id: PropId) -> DdcResult<&Property> {
        self.props.get(id.0).ok_or_else(|| DdcError::NotFound {
            name: format!("#{}", id.0),
            scope: "store".to_string(),
        })
    }

    fn prop_mut(&mut self, id: PropId) -> DdcResult<&mut Property> {
        self.props.get_mut(id.0).ok_or_else(|| DdcError::NotFound {
            name: format!("#{}", id.0),
            scope: "store".to_string(),
        })
    }

    /// Current value of `id`.
    pub fn get(&self, id: PropId) -> DdcResult<&PropValue> {
        Ok(&self.prop(id)?.value)
    }

    /// Current value of a double property.
    pub fn get_f64(&self, id: PropId) -> DdcResult<f64> {
        let prop = self.prop(id)?;
        prop.value.as_f64().ok_or_else(|| mismatch(prop, "double"))
    }

    /// Current value of an integer property.
    pub fn get_i64(&self, id: PropId) -> DdcResult<i64> {
        let prop = self.prop(id)?;
        prop.value.as_i64().ok_or_else(|| mismatch(prop, "int"))
    }

    /// Current value of a string property.
    pub fn get_str(&self, id: PropId) -> DdcResult<&str> {
        let prop = self.prop(id)?;
        prop.value.as_str().ok_or_else(|| mismatch(prop, "string"))
    }

    /// Store `value` and mark the property dirty, whether or not it changed.
    pub fn set(&mut self, id: PropId, value: PropValue) -> DdcResult<()> {
        self.write(id, value)?;
        self.prop_mut(id)?.dirty = true;
        Ok(())
    }

    /// Store `value`; mark dirty only if it differs from the current value.
    /// Returns whether the value changed.
    pub fn update(&mut self, id: PropId, value: PropValue) -> DdcResult<bool> {
        let changed = self.write(id, value)?;
        if changed {
            self.prop_mut(id)?.dirty = true;
        }
        Ok(changed)
    }

    fn write(&mut self, id: PropId, value: PropValue) -> DdcResult<bool> {
        let prop = self.prop_mut(id)?;
        if std::mem::discriminant(&prop.value) != std::mem::discriminant(&value) {
            return Err(DdcError::TypeMismatch {
                name: prop.name.clone(),
                expected: prop.value.type_name(),
                actual: value.type_name(),
            });
        }
        let changed = prop.value != value;
        prop.value = value;
        Ok(changed)
    }

    /// Whether `id` changed since the last pass.
    pub fn is_dirty(&self, id: PropId) -> DdcResult<bool> {
        Ok(self.prop(id)?.dirty)
    }

    /// Mark dirty without touching the value.
    pub fn force_dirty(&mut self, id: PropId) -> DdcResult<()> {
        self.prop_mut(id)?.dirty = true;
        Ok(())
    }

    /// Handles of all dirty properties, in registration order.
    pub fn dirty_ids(&self) -> Vec<PropId> {
        self.props
            .iter()
            .enumerate()
            .filter(|(_, p)| p.dirty)
            .map(|(i, _)| PropId(i))
            .collect()
    }

    /// Clear the dirty flag of every property.
    pub fn clear_dirty(&mut self) {
        for prop in &mut self.props {
            prop.dirty = false;
        }
    }

    /// All properties with their handles, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (PropId, &Property)> {
        self.props.iter().enumerate().map(|(i, p)| (PropId(i), p))
    }
}

fn mismatch(prop: &Property, expected: &'static str) -> DdcError {
    DdcError::TypeMismatch {
        name: prop.name.clone(),
        expected,
        actual: prop.value.type_name(),
    }
}
