#![doc = include_str!("../README.md")]

// private mods (partly re-exported)
mod buffer;
mod error;
mod grain;
mod utils;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use buffer::{BufferKind, BufferLock, BufferRef, BufferStore, SampleBuffer};

pub use grain::{Grain, GrainParam, ParamField};

pub use voice::{
    GrainVoice, GrainVoiceHandle, GrainVoiceOptions, InputGroup, OutputPlane, VoiceMessage,
    INTERNAL_BLOCK,
};
