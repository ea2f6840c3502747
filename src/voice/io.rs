//! Per-block I/O layout: input group bases and the fixed grain output plane grid.

use strum::EnumCount;

// -------------------------------------------------------------------------------------------------

/// Logical input signal groups, in inlet order.
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
    strum::FromRepr,
)]
#[repr(u8)]
pub enum InputGroup {
    /// Per-grain trigger phasor. A backwards wrap starts a new grain.
    GrainClock,
    /// Playhead through the source buffer, latched at each trigger.
    TraversalPhasor,
    /// Playback rate modulation.
    FrequencyMod,
    /// Amplitude modulation.
    AmplitudeMod,
}

/// Output planes, in channel-layout order. Each plane spans `max_grains` consecutive channels,
/// so grain `g` owns channel `plane * max_grains + g` of every plane.
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
    strum::FromRepr,
)]
#[repr(u8)]
pub enum OutputPlane {
    /// Rendered grain audio.
    Output,
    /// 1 while the grain is sounding, else 0.
    State,
    /// Envelope progress through the current grain (0..1).
    Progress,
    /// Normalized source position latched at the grain's trigger.
    Playhead,
    /// Amplitude applied to the source signal.
    Amplitude,
    /// Envelope value applied to the source signal.
    Envelope,
    /// The grain's buffer-channel tag.
    BufferChannel,
    /// The grain's stream tag.
    StreamChannel,
}

// -------------------------------------------------------------------------------------------------

/// Block-scoped, read-only descriptor of the voice's channel layout, computed once per process
/// call before any grain runs.
#[derive(Clone, Copy, Debug)]
pub(crate) struct IoConfig {
    pub block_size: usize,
    pub sample_rate: u32,
    pub live_mode: bool,
    max_grains: usize,
    input_bases: [usize; InputGroup::COUNT],
    input_chans: [usize; InputGroup::COUNT],
}

impl IoConfig {
    pub fn new(
        block_size: usize,
        sample_rate: u32,
        live_mode: bool,
        max_grains: usize,
        input_chans: [usize; InputGroup::COUNT],
    ) -> Self {
        // input groups are packed back to back in inlet order
        let mut input_bases = [0; InputGroup::COUNT];
        let mut offset = 0;
        for (base, count) in input_bases.iter_mut().zip(input_chans) {
            *base = offset;
            offset += count;
        }
        Self {
            block_size,
            sample_rate,
            live_mode,
            max_grains,
            input_bases,
            input_chans,
        }
    }

    /// Total number of input channels across all groups.
    pub fn input_channel_count(&self) -> usize {
        self.input_chans.iter().sum()
    }

    /// Total number of output channels: one channel per grain on every plane.
    pub fn output_channel_count(&self) -> usize {
        OutputPlane::COUNT * self.max_grains
    }

    /// Instantaneous input channel for one grain. Grains outnumbering a group's physical
    /// channels multiplex round-robin onto them.
    pub fn input_channel(&self, group: InputGroup, grain_index: usize) -> usize {
        let group = group as usize;
        self.input_bases[group] + grain_index % self.input_chans[group].max(1)
    }

    /// Output channel of one plane for one grain.
    pub fn output_channel(&self, plane: OutputPlane, grain_index: usize) -> usize {
        debug_assert!(grain_index < self.max_grains);
        plane as usize * self.max_grains + grain_index
    }
}

// -------------------------------------------------------------------------------------------------

/// Input channels resolved for one grain, so the per-sample loop indexes without recomputation.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GrainChannels {
    pub grain_clock: usize,
    pub traversal_phasor: usize,
    pub fm: usize,
    pub am: usize,
}

impl GrainChannels {
    pub fn new(io: &IoConfig, grain_index: usize) -> Self {
        Self {
            grain_clock: io.input_channel(InputGroup::GrainClock, grain_index),
            traversal_phasor: io.input_channel(InputGroup::TraversalPhasor, grain_index),
            fm: io.input_channel(InputGroup::FrequencyMod, grain_index),
            am: io.input_channel(InputGroup::AmplitudeMod, grain_index),
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_group_bases_are_running_sums() {
        let io = IoConfig::new(64, 44100, false, 8, [2, 1, 3, 2]);
        assert_eq!(io.input_channel(InputGroup::GrainClock, 0), 0);
        assert_eq!(io.input_channel(InputGroup::TraversalPhasor, 0), 2);
        assert_eq!(io.input_channel(InputGroup::FrequencyMod, 0), 3);
        assert_eq!(io.input_channel(InputGroup::AmplitudeMod, 0), 6);
        assert_eq!(io.input_channel_count(), 8);
    }

    #[test]
    fn grains_wrap_onto_physical_input_channels() {
        let channel_count = 3;
        let io = IoConfig::new(64, 44100, false, 8, [channel_count, 1, 1, 1]);
        for grain_index in 0..8 {
            assert_eq!(
                io.input_channel(InputGroup::GrainClock, grain_index),
                grain_index % channel_count
            );
        }
    }

    #[test]
    fn output_plane_bases_are_multiples_of_max_grains() {
        let max_grains = 6;
        let io = IoConfig::new(64, 44100, false, max_grains, [1, 1, 1, 1]);
        assert_eq!(io.output_channel_count(), 8 * max_grains);
        for plane_index in 0..OutputPlane::COUNT {
            let plane = OutputPlane::from_repr(plane_index as u8).unwrap();
            let base = io.output_channel(plane, 0);
            assert_eq!(base % max_grains, 0);
            assert_eq!(base, plane_index * max_grains);
            for grain_index in 0..max_grains {
                assert_eq!(io.output_channel(plane, grain_index), base + grain_index);
            }
        }
    }
}
