//! Sound modifiers: per-channel strategies computing how loud and how
//! balanced a transmitter sounds to a receiver.
//!
//! The variant catalog is a closed set ([`ModifierKind`]): the no-op
//! default, the linear-circular hearing radius, and the linear-ellipse
//! placeholder. All variants share the self-audition gate in
//! [`SoundModifier::calculate`] and the stereo balance helper; only the
//! attenuation formula differs per variant.

use crate::channel::Player;
use crate::events::EventBus;
use crate::parameter::{Attachment, Parameter, ParameterError, ParameterSet, SetOutcome};
use log::warn;
use shared::{ParameterValue, Vec3};
use std::collections::HashMap;
use std::fmt;

/// Name of the boolean parameter every modifier carries. When true, a
/// player transmitting in the channel also hears themselves.
pub const FEEDBACK_PARAMETER: &str = "Feedback";

/// Name of the built-in no-op modifier.
pub const DEFAULT_MODIFIER_NAME: &str = "default";

/// Immutable result of one volume calculation.
///
/// `global` is a signed attenuation offset applied to unit volume: `0.0`
/// means no attenuation, `-1.0` full silence at the hearing boundary.
/// Linear variants keep degrading past `-1.0` beyond their radius, so
/// downstream audio delivery clamps at silence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeResult {
    pub global: f32,
    pub left: f32,
    pub right: f32,
}

impl VolumeResult {
    /// Full volume, balanced stereo, no attenuation.
    pub const DEFAULT: VolumeResult = VolumeResult {
        global: 0.0,
        left: 1.0,
        right: 1.0,
    };

    /// Fully silent. Returned for self-audition with feedback disabled.
    pub const NONE: VolumeResult = VolumeResult {
        global: -1.0,
        left: 0.0,
        right: 0.0,
    };

    pub fn new(global: f32, left: f32, right: f32) -> Self {
        Self {
            global,
            left,
            right,
        }
    }
}

/// Left/right gains for a transmitter heard by a receiver, derived from the
/// signed bearing of the transmitter relative to the receiver's facing.
/// A source directly ahead or behind is balanced `(1, 1)`; a source fully
/// to one side silences the opposite ear. Shared by every spatial variant.
pub fn stereo_balance(receiver_pos: &Vec3, receiver_yaw: f32, transmitter_pos: &Vec3) -> (f32, f32) {
    let dx = transmitter_pos.x - receiver_pos.x;
    let dz = transmitter_pos.z - receiver_pos.z;
    if dx == 0.0 && dz == 0.0 {
        return (1.0, 1.0);
    }
    // Positive bearing = transmitter on the receiver's left (+z side at yaw 0)
    let bearing = dz.atan2(dx) - receiver_yaw;
    let pan = bearing.sin();
    ((1.0 + pan).min(1.0), (1.0 - pan).min(1.0))
}

/// The closed set of volume-calculation strategies.
#[derive(Debug, Clone, PartialEq)]
pub enum ModifierKind {
    /// No spatial behavior; every pair hears full volume.
    Default,
    /// Linear attenuation over a hearing radius. Volume degrades from full
    /// at distance 0 to silence at the radius boundary and keeps degrading
    /// past it.
    LinearCircular { radius: f32 },
    /// Asymmetric front/behind hearing distance modeled as an ellipse.
    /// The attenuation formula is not implemented yet; dispatch returns
    /// the default full-volume result.
    LinearEllipse { front: f32, behind: f32 },
}

/// A named volume-calculation strategy with its parameter set.
///
/// Identity is the name alone: two modifiers with the same name compare
/// equal regardless of parameter values, because the name is the catalog
/// key. `channel: None` marks a detached template (a catalog entry not yet
/// assigned to a channel); templates mutate silently.
#[derive(Debug, Clone)]
pub struct SoundModifier {
    name: String,
    kind: ModifierKind,
    parameters: ParameterSet,
    channel: Option<String>,
}

impl PartialEq for SoundModifier {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for SoundModifier {}

impl std::hash::Hash for SoundModifier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

fn base_parameters() -> ParameterSet {
    let mut parameters = ParameterSet::new();
    parameters.insert(Parameter::new(
        FEEDBACK_PARAMETER,
        ParameterValue::Bool(false),
    ));
    parameters
}

impl SoundModifier {
    /// The built-in no-op modifier.
    pub fn default_modifier() -> Self {
        Self {
            name: DEFAULT_MODIFIER_NAME.to_string(),
            kind: ModifierKind::Default,
            parameters: base_parameters(),
            channel: None,
        }
    }

    /// A linear-circular modifier with the given hearing radius. A negative
    /// radius behaves exactly like its absolute value; the name encodes the
    /// radius for catalog identity.
    pub fn linear_circular(radius: f32) -> Self {
        let radius = radius.abs().max(f32::EPSILON);
        Self {
            name: format!("LinearCircular_{}", radius),
            kind: ModifierKind::LinearCircular { radius },
            parameters: base_parameters(),
            channel: None,
        }
    }

    /// A linear-ellipse modifier with asymmetric front/behind hearing
    /// distances. Dispatch is a placeholder until the elliptical formula
    /// lands.
    pub fn linear_ellipse(front: f32, behind: f32) -> Self {
        let front = front.abs();
        let behind = behind.abs();
        Self {
            name: format!("LinearEllipse_{}_{}", front, behind),
            kind: ModifierKind::LinearEllipse { front, behind },
            parameters: base_parameters(),
            channel: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ModifierKind {
        &self.kind
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// The channel this modifier is assigned to, or `None` for templates.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Deep copy assigned to `channel`. The clone shares no mutable state
    /// with its origin; every parameter is rewired to the new instance.
    pub fn clone_for(&self, channel: &str) -> Self {
        let mut cloned = self.clone();
        cloned.channel = Some(channel.to_string());
        cloned
    }

    /// Renames the attachment after a channel rename.
    pub(crate) fn reattach(&mut self, channel: &str) {
        self.channel = Some(channel.to_string());
    }

    /// Whether a transmitting player hears their own voice in the channel.
    pub fn send_feedback(&self) -> bool {
        matches!(
            self.parameters.get(FEEDBACK_PARAMETER).map(Parameter::value),
            Some(ParameterValue::Bool(true))
        )
    }

    /// Convenience setter over the `"Feedback"` parameter.
    pub fn set_send_feedback(
        &mut self,
        enabled: bool,
        bus: Option<&EventBus>,
    ) -> Result<SetOutcome, ParameterError> {
        self.set_parameter(FEEDBACK_PARAMETER, ParameterValue::Bool(enabled), bus)
    }

    /// Validated parameter mutation, routed through the pre/post event path
    /// when this modifier is assigned to a channel and a bus is supplied.
    /// Unknown parameter names are ignored, matching bulk-update semantics.
    pub fn set_parameter(
        &mut self,
        name: &str,
        raw: ParameterValue,
        bus: Option<&EventBus>,
    ) -> Result<SetOutcome, ParameterError> {
        let channel = self.channel.as_deref();
        let modifier_name = self.name.as_str();
        let Some(parameter) = self.parameters.get_mut(name) else {
            warn!("Ignoring set for unknown parameter '{}'", name);
            return Ok(SetOutcome::Unchanged);
        };
        match (channel, bus) {
            (Some(channel), Some(bus)) => parameter.set_value(
                raw,
                Some(&Attachment {
                    channel,
                    modifier: modifier_name,
                    bus,
                }),
            ),
            _ => parameter.set_value(raw, None),
        }
    }

    /// Per-pair volume decision. Self-audition (transmitter == receiver) is
    /// gated here for every variant: feedback enabled delegates to the
    /// variant algorithm, feedback disabled is silent.
    pub fn calculate(&self, transmitter: &Player, receiver: &Player) -> VolumeResult {
        if transmitter.name == receiver.name && !self.send_feedback() {
            return VolumeResult::NONE;
        }
        self.dispatch(transmitter, receiver)
    }

    /// Variant-specific volume algorithm, independent of the self-audition
    /// gate.
    fn dispatch(&self, transmitter: &Player, receiver: &Player) -> VolumeResult {
        match self.kind {
            ModifierKind::Default => VolumeResult::DEFAULT,
            ModifierKind::LinearCircular { radius } => {
                let distance = transmitter.position.distance(&receiver.position);
                let slope = -1.0 / radius;
                let (left, right) = stereo_balance(
                    &receiver.position,
                    receiver.orientation.yaw,
                    &transmitter.position,
                );
                VolumeResult::new(slope * distance, left, right)
            }
            // Elliptical attenuation not implemented yet
            ModifierKind::LinearEllipse { .. } => VolumeResult::DEFAULT,
        }
    }
}

impl ModifierKind {
    /// Ellipse major axis: arithmetic mean of the front and behind hearing
    /// distances. Zero for non-ellipse variants.
    pub fn major_axis(&self) -> f32 {
        match self {
            ModifierKind::LinearEllipse { front, behind } => (front + behind) / 2.0,
            _ => 0.0,
        }
    }

    /// Ellipse minor axis: geometric mean of the front and behind hearing
    /// distances. Zero for non-ellipse variants.
    pub fn minor_axis(&self) -> f32 {
        match self {
            ModifierKind::LinearEllipse { front, behind } => (front * behind).sqrt(),
            _ => 0.0,
        }
    }
}

/// Fatal catalog misconfiguration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A template with this name is already registered.
    DuplicateModifier(String),
    /// No template with this name exists.
    UnknownModifier(String),
    /// Only detached templates may be registered.
    AttachedTemplate(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::DuplicateModifier(name) => {
                write!(f, "sound modifier '{}' is already registered", name)
            }
            ConfigurationError::UnknownModifier(name) => {
                write!(f, "no sound modifier named '{}' is registered", name)
            }
            ConfigurationError::AttachedTemplate(name) => {
                write!(f, "sound modifier '{}' is attached to a channel", name)
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Registry of detached modifier templates, keyed by name. Channels receive
/// deep clones of these entries, never the templates themselves.
pub struct ModifierCatalog {
    templates: HashMap<String, SoundModifier>,
}

impl Default for ModifierCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ModifierCatalog {
    /// A catalog pre-seeded with the default no-op modifier.
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        let default = SoundModifier::default_modifier();
        templates.insert(default.name().to_string(), default);
        Self { templates }
    }

    pub fn register(&mut self, template: SoundModifier) -> Result<(), ConfigurationError> {
        if template.channel().is_some() {
            return Err(ConfigurationError::AttachedTemplate(
                template.name().to_string(),
            ));
        }
        if self.templates.contains_key(template.name()) {
            return Err(ConfigurationError::DuplicateModifier(
                template.name().to_string(),
            ));
        }
        self.templates.insert(template.name().to_string(), template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SoundModifier> {
        self.templates.get(name)
    }

    /// Deep-clones the named template onto a channel.
    pub fn instantiate(
        &self,
        name: &str,
        channel: &str,
    ) -> Result<SoundModifier, ConfigurationError> {
        self.templates
            .get(name)
            .map(|template| template.clone_for(channel))
            .ok_or_else(|| ConfigurationError::UnknownModifier(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }
}
