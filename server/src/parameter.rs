//! Typed sound-modifier parameters and the insertion-ordered parameter set.
//!
//! A parameter carries a name, a type tag, a current value, a default, and
//! optionally an inclusive range fixed at construction. Mutation goes
//! exclusively through [`Parameter::set_value`], which coerces the offered
//! value against the type tag, validates the range, and routes the change
//! through the pre/post event path when the owning modifier is attached to
//! a channel. Detached templates mutate silently.

use crate::events::{EventBus, PostEvent, PreEvent};
use shared::{ParameterDescriptor, ParameterType, ParameterValue};
use std::fmt;

/// Context linking a parameter to the channel its owning modifier serves.
/// Present only while the modifier is assigned to a channel; templates have
/// no attachment and therefore raise no events.
pub struct Attachment<'a> {
    pub channel: &'a str,
    pub modifier: &'a str,
    pub bus: &'a EventBus,
}

/// Validation failure for an offered parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// The offered value cannot be coerced to the parameter's type.
    TypeMismatch {
        parameter: String,
        expected: ParameterType,
        offered: ParameterType,
    },
    /// The coerced value violates the parameter's inclusive range.
    OutOfRange {
        parameter: String,
        offered: ParameterValue,
        min: ParameterValue,
        max: ParameterValue,
    },
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterError::TypeMismatch {
                parameter,
                expected,
                offered,
            } => write!(
                f,
                "parameter '{}' expects {:?}, got {:?}",
                parameter, expected, offered
            ),
            ParameterError::OutOfRange {
                parameter,
                offered,
                min,
                max,
            } => write!(
                f,
                "parameter '{}' value {} outside range [{}, {}]",
                parameter, offered, min, max
            ),
        }
    }
}

impl std::error::Error for ParameterError {}

/// Result of a validated set-value call.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    /// The coerced value equals the current value; nothing happened.
    Unchanged,
    /// A pre-event subscriber vetoed the change; the value is untouched.
    Vetoed,
    /// The value was committed; `old` is the replaced value.
    Updated { old: ParameterValue },
}

/// Coerces an offered value to the target type tag. Exact tag matches pass
/// through; lossless numeric widening is accepted; everything else is
/// rejected by returning `None`.
fn coerce(target: ParameterType, raw: &ParameterValue) -> Option<ParameterValue> {
    use ParameterValue as V;
    match (target, raw) {
        (ParameterType::Bool, V::Bool(v)) => Some(V::Bool(*v)),
        (ParameterType::Char, V::Char(v)) => Some(V::Char(*v)),
        (ParameterType::I8, V::I8(v)) => Some(V::I8(*v)),
        (ParameterType::I16, V::I8(v)) => Some(V::I16(*v as i16)),
        (ParameterType::I16, V::I16(v)) => Some(V::I16(*v)),
        (ParameterType::I32, V::I8(v)) => Some(V::I32(*v as i32)),
        (ParameterType::I32, V::I16(v)) => Some(V::I32(*v as i32)),
        (ParameterType::I32, V::I32(v)) => Some(V::I32(*v)),
        (ParameterType::I64, V::I8(v)) => Some(V::I64(*v as i64)),
        (ParameterType::I64, V::I16(v)) => Some(V::I64(*v as i64)),
        (ParameterType::I64, V::I32(v)) => Some(V::I64(*v as i64)),
        (ParameterType::I64, V::I64(v)) => Some(V::I64(*v)),
        (ParameterType::F32, V::F32(v)) => Some(V::F32(*v)),
        (ParameterType::F64, V::F32(v)) => Some(V::F64(*v as f64)),
        (ParameterType::F64, V::F64(v)) => Some(V::F64(*v)),
        _ => None,
    }
}

/// Same-tag less-or-equal comparison. Both sides are guaranteed to share a
/// tag after coercion and ranged construction.
fn value_le(a: &ParameterValue, b: &ParameterValue) -> bool {
    use ParameterValue as V;
    match (a, b) {
        (V::Bool(x), V::Bool(y)) => x <= y,
        (V::Char(x), V::Char(y)) => x <= y,
        (V::I8(x), V::I8(y)) => x <= y,
        (V::I16(x), V::I16(y)) => x <= y,
        (V::I32(x), V::I32(y)) => x <= y,
        (V::I64(x), V::I64(y)) => x <= y,
        (V::F32(x), V::F32(y)) => x <= y,
        (V::F64(x), V::F64(y)) => x <= y,
        _ => false,
    }
}

/// A named, typed, mutable value owned by a sound modifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    ty: ParameterType,
    value: ParameterValue,
    default_value: ParameterValue,
    range: Option<(ParameterValue, ParameterValue)>,
}

impl Parameter {
    /// Creates an unconstrained parameter. The type tag is taken from the
    /// default value; the current value starts at the default.
    pub fn new(name: impl Into<String>, default_value: ParameterValue) -> Self {
        Self {
            name: name.into(),
            ty: default_value.type_tag(),
            value: default_value.clone(),
            default_value,
            range: None,
        }
    }

    /// Creates a range-constrained parameter. `min`, `max`, and the default
    /// must share one type tag and satisfy `min <= default <= max`; the
    /// range is fixed for the parameter's lifetime.
    pub fn ranged(
        name: impl Into<String>,
        default_value: ParameterValue,
        min: ParameterValue,
        max: ParameterValue,
    ) -> Result<Self, ParameterError> {
        let name = name.into();
        let ty = default_value.type_tag();
        for bound in [&min, &max] {
            if bound.type_tag() != ty {
                return Err(ParameterError::TypeMismatch {
                    parameter: name,
                    expected: ty,
                    offered: bound.type_tag(),
                });
            }
        }
        if !value_le(&min, &default_value) || !value_le(&default_value, &max) {
            return Err(ParameterError::OutOfRange {
                parameter: name,
                offered: default_value,
                min,
                max,
            });
        }
        Ok(Self {
            name,
            ty,
            value: default_value.clone(),
            default_value,
            range: Some((min, max)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> ParameterType {
        self.ty
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn default_value(&self) -> &ParameterValue {
        &self.default_value
    }

    pub fn range(&self) -> Option<&(ParameterValue, ParameterValue)> {
        self.range.as_ref()
    }

    /// Validated value mutation.
    ///
    /// The offered value is coerced against the type tag and checked against
    /// the range; both failures abort before any notification. A coerced
    /// value equal to the current one is a no-op. When attached, the change
    /// raises a cancellable pre-event before the commit and a post-event
    /// carrying the old value after it; a veto leaves the value untouched.
    pub fn set_value(
        &mut self,
        raw: ParameterValue,
        attachment: Option<&Attachment<'_>>,
    ) -> Result<SetOutcome, ParameterError> {
        let coerced = coerce(self.ty, &raw).ok_or_else(|| ParameterError::TypeMismatch {
            parameter: self.name.clone(),
            expected: self.ty,
            offered: raw.type_tag(),
        })?;

        if let Some((min, max)) = &self.range {
            if !value_le(min, &coerced) || !value_le(&coerced, max) {
                return Err(ParameterError::OutOfRange {
                    parameter: self.name.clone(),
                    offered: coerced,
                    min: min.clone(),
                    max: max.clone(),
                });
            }
        }

        if coerced == self.value {
            return Ok(SetOutcome::Unchanged);
        }

        match attachment {
            Some(att) => {
                let pre = PreEvent::ParameterChange {
                    channel: att.channel.to_string(),
                    modifier: att.modifier.to_string(),
                    parameter: self.name.clone(),
                    requested: coerced.clone(),
                };
                if !att.bus.publish_pre(&pre) {
                    return Ok(SetOutcome::Vetoed);
                }
                let old = std::mem::replace(&mut self.value, coerced);
                att.bus.publish_post(&PostEvent::ParameterChanged {
                    channel: att.channel.to_string(),
                    modifier: att.modifier.to_string(),
                    parameter: self.name.clone(),
                    old: old.clone(),
                });
                Ok(SetOutcome::Updated { old })
            }
            None => {
                let old = std::mem::replace(&mut self.value, coerced);
                Ok(SetOutcome::Updated { old })
            }
        }
    }

    /// Wire representation for snapshots and persistence collaborators.
    pub fn descriptor(&self) -> ParameterDescriptor {
        ParameterDescriptor {
            name: self.name.clone(),
            ty: self.ty,
            default_value: self.default_value.clone(),
            value: self.value.clone(),
            range: self.range.clone(),
        }
    }
}

/// Insertion-ordered mapping from parameter name to parameter. Keys are
/// unique; inserting an existing name replaces the parameter in place so
/// the original position is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    parameters: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, parameter: Parameter) {
        match self
            .parameters
            .iter_mut()
            .find(|p| p.name() == parameter.name())
        {
            Some(existing) => *existing = parameter,
            None => self.parameters.push(parameter),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters.iter_mut().find(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn descriptors(&self) -> Vec<ParameterDescriptor> {
        self.parameters.iter().map(|p| p.descriptor()).collect()
    }

    /// Copies values from `other` for every name present in both sets,
    /// routed through the validated `set_value` path so vetoes and events
    /// still apply. Names present in only one set are ignored; no key is
    /// ever added or removed.
    pub fn update_from(
        &mut self,
        other: &ParameterSet,
        attachment: Option<&Attachment<'_>>,
    ) -> Result<(), ParameterError> {
        for source in other.iter() {
            if let Some(target) = self.get_mut(source.name()) {
                target.set_value(source.value().clone(), attachment)?;
            }
        }
        Ok(())
    }
}
