//! Closed parameter set for grains.

use rand::{rngs::SmallRng, Rng};

// -------------------------------------------------------------------------------------------------

/// Addressable grain parameter names.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumCount,
)]
#[repr(u8)]
pub enum GrainParam {
    /// Read offset behind the traversal phasor at trigger time, in milliseconds.
    Delay,
    /// Playback rate multiplier.
    Rate,
    /// Rate ramp over the grain's lifetime.
    Glisson,
    /// Grain clock phase offset (0..1), used to spread grains across the clock period.
    Window,
    /// Grain amplitude.
    Amplitude,
    /// Fraction of the clock period the grain stays silent (0..1).
    Space,
    /// Position across a multi-window envelope buffer (0..1).
    EnvelopePosition,
    /// Probability of forward playback: 1 always forward, -1 always backward, 0 coin toss.
    Direction,
    /// Buffer-channel routing tag.
    Channel,
    /// Stream routing tag.
    Stream,
}

impl GrainParam {
    /// Whether a field is addressable for this parameter. Routing tags are plain integers and
    /// carry no random/offset semantics.
    pub fn supports_field(&self, field: ParamField) -> bool {
        match self {
            Self::Channel | Self::Stream => {
                matches!(field, ParamField::Base | ParamField::Value)
            }
            _ => true,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Which field of a parameter a set call addresses.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::VariantNames,
)]
#[repr(u8)]
pub enum ParamField {
    /// The persistent base value, picked up at the next grain trigger.
    Base,
    /// Scale of the random component added at each trigger.
    Random,
    /// Per-grain-index offset added at each trigger.
    Offset,
    /// Base and currently sampled value at once, taking effect immediately.
    Value,
}

// -------------------------------------------------------------------------------------------------

/// One addressable parameter: persistent base/random/offset fields plus the value sampled at
/// the most recent grain trigger.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct ParamValue {
    pub base: f32,
    pub random: f32,
    pub offset: f32,
    pub value: f32,
}

impl ParamValue {
    pub const fn with_base(base: f32) -> Self {
        Self {
            base,
            random: 0.0,
            offset: 0.0,
            value: base,
        }
    }

    pub fn set(&mut self, field: ParamField, value: f32) {
        match field {
            ParamField::Base => self.base = value,
            ParamField::Random => self.random = value,
            ParamField::Offset => self.offset = value,
            ParamField::Value => {
                self.base = value;
                self.value = value;
            }
        }
    }

    /// Sample a concrete value for a grain trigger.
    pub fn sample(&mut self, grain_index: usize, rng: &mut SmallRng) -> f32 {
        self.value = self.base + self.random * rng.random::<f32>() + self.offset * grain_index as f32;
        self.value
    }
}

// -------------------------------------------------------------------------------------------------

/// Full parameter table of one grain.
#[derive(Clone, Debug)]
pub(crate) struct GrainParams {
    pub delay: ParamValue,
    pub rate: ParamValue,
    pub glisson: ParamValue,
    pub window: ParamValue,
    pub amplitude: ParamValue,
    pub space: ParamValue,
    pub envelope_position: ParamValue,
    pub direction: ParamValue,
}

impl Default for GrainParams {
    fn default() -> Self {
        Self {
            delay: ParamValue::with_base(0.0),
            rate: ParamValue::with_base(1.0),
            glisson: ParamValue::with_base(0.0),
            window: ParamValue::with_base(0.0),
            amplitude: ParamValue::with_base(1.0),
            space: ParamValue::with_base(0.0),
            envelope_position: ParamValue::with_base(0.0),
            direction: ParamValue::with_base(1.0),
        }
    }
}

impl GrainParams {
    /// Exhaustive dispatch from a parameter name to its storage. Routing tags (`Channel`,
    /// `Stream`) live outside this table and are handled by the grain itself.
    pub fn get(&self, param: GrainParam) -> Option<&ParamValue> {
        match param {
            GrainParam::Delay => Some(&self.delay),
            GrainParam::Rate => Some(&self.rate),
            GrainParam::Glisson => Some(&self.glisson),
            GrainParam::Window => Some(&self.window),
            GrainParam::Amplitude => Some(&self.amplitude),
            GrainParam::Space => Some(&self.space),
            GrainParam::EnvelopePosition => Some(&self.envelope_position),
            GrainParam::Direction => Some(&self.direction),
            GrainParam::Channel | GrainParam::Stream => None,
        }
    }

    pub fn get_mut(&mut self, param: GrainParam) -> Option<&mut ParamValue> {
        match param {
            GrainParam::Delay => Some(&mut self.delay),
            GrainParam::Rate => Some(&mut self.rate),
            GrainParam::Glisson => Some(&mut self.glisson),
            GrainParam::Window => Some(&mut self.window),
            GrainParam::Amplitude => Some(&mut self.amplitude),
            GrainParam::Space => Some(&mut self.space),
            GrainParam::EnvelopePosition => Some(&mut self.envelope_position),
            GrainParam::Direction => Some(&mut self.direction),
            GrainParam::Channel | GrainParam::Stream => None,
        }
    }
}

// -------------------------------------------------------------------------------------------------
