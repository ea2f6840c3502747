//! A single grain: clock-driven, windowed playback of a source buffer fragment.

use std::sync::Arc;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use strum::EnumCount;

use crate::{
    buffer::{BufferKind, BufferRef, BufferStore, BufferView},
    utils::{nearest_table_value, read_interpolated, wrap_frame_position, wrap_phase},
    voice::{
        io::{GrainChannels, IoConfig, OutputPlane},
        INTERNAL_BLOCK,
    },
};

// -------------------------------------------------------------------------------------------------

mod param;

pub use param::{GrainParam, ParamField};
pub(crate) use param::GrainParams;

// -------------------------------------------------------------------------------------------------

/// Upper bound for the sampled Space parameter, keeping a sliver of the clock period active.
const MAX_SPACE: f32 = 0.95;

// -------------------------------------------------------------------------------------------------

/// One unit of granular playback.
///
/// A grain owns its parameter set, routing tags and references to the five buffer roles it
/// reads. Its playback state advances only inside [`GrainVoice::process`](crate::GrainVoice),
/// exactly one block at a time; parameter changes apply immediately and are picked up by the
/// next trigger.
pub struct Grain {
    pub(crate) buffers: GrainBuffers,
    pub(crate) play: GrainPlayback,
}

impl Grain {
    pub(crate) fn new(index: usize, store: Arc<BufferStore>) -> Self {
        Self {
            buffers: GrainBuffers::new(store),
            play: GrainPlayback::new(index),
        }
    }

    /// The grain's pool index, immutable after construction.
    pub fn index(&self) -> usize {
        self.play.index
    }

    /// Stream routing tag (0 = unset).
    pub fn stream(&self) -> usize {
        self.play.stream
    }

    /// Buffer-channel routing tag (0 = unset). Also selects the source channel the grain reads.
    pub fn channel(&self) -> usize {
        self.play.bchan
    }

    /// Apply a parameter change. Repeated identical calls are idempotent; fields unsupported
    /// by the addressed parameter are ignored.
    pub fn set_param(&mut self, value: f32, param: GrainParam, field: ParamField) {
        if !param.supports_field(field) {
            return;
        }
        match param {
            GrainParam::Channel => self.play.bchan = value.max(0.0) as usize,
            GrainParam::Stream => self.play.stream = value.max(0.0) as usize,
            _ => {
                if let Some(target) = self.play.params.get_mut(param) {
                    target.set(field, value);
                }
            }
        }
    }

    /// The currently sampled value of a parameter.
    pub fn param(&self, param: GrainParam) -> f32 {
        match param {
            GrainParam::Channel => self.play.bchan as f32,
            GrainParam::Stream => self.play.stream as f32,
            _ => self
                .play
                .params
                .get(param)
                .map(|value| value.value)
                .unwrap_or_default(),
        }
    }

    /// One of the grain's buffer references.
    pub fn buffer(&self, kind: BufferKind) -> &BufferRef {
        self.buffers.get(kind)
    }

    /// Mutable buffer reference access, used to (re)bind buffer names.
    pub fn buffer_mut(&mut self, kind: BufferKind) -> &mut BufferRef {
        self.buffers.get_mut(kind)
    }
}

// -------------------------------------------------------------------------------------------------

/// The per-role buffer references owned by one grain.
///
/// Kept apart from the playback state so the drive loop can hold buffer locks while the
/// playback state is borrowed mutably.
pub(crate) struct GrainBuffers {
    refs: [BufferRef; BufferKind::COUNT],
}

impl GrainBuffers {
    fn new(store: Arc<BufferStore>) -> Self {
        Self {
            refs: std::array::from_fn(|_| BufferRef::new(Arc::clone(&store))),
        }
    }

    pub fn get(&self, kind: BufferKind) -> &BufferRef {
        &self.refs[kind as usize]
    }

    pub fn get_mut(&mut self, kind: BufferKind) -> &mut BufferRef {
        &mut self.refs[kind as usize]
    }
}

// -------------------------------------------------------------------------------------------------

/// Clock tracking, trigger-sampled parameter state and the block DSP of one grain.
pub(crate) struct GrainPlayback {
    index: usize,
    stream: usize,
    bchan: usize,
    params: GrainParams,
    rng: SmallRng,
    // clock trigger tracking
    clock_primed: bool,
    previous_clock: f32,
    // state sampled at the most recent trigger
    active: bool,
    source_position: f64,
    source_start: f32,
    rate: f32,
    glisson: f32,
    amplitude: f32,
    space: f32,
    envelope_position: f32,
    direction: f32,
    window_offset: f32,
}

impl GrainPlayback {
    fn new(index: usize) -> Self {
        Self {
            index,
            stream: 0,
            bchan: 0,
            params: GrainParams::default(),
            rng: SmallRng::seed_from_u64(index as u64 + 1),
            clock_primed: false,
            previous_clock: 0.0,
            active: false,
            source_position: 0.0,
            source_start: 0.0,
            rate: 1.0,
            glisson: 0.0,
            amplitude: 1.0,
            space: 0.0,
            envelope_position: 0.0,
            direction: 1.0,
            window_offset: 0.0,
        }
    }

    /// Render one block into this grain's output-plane channels and advance all phase state.
    ///
    /// The caller keeps all buffer views locked for the duration of the call. An invalid
    /// source or envelope arrives as the one-frame silent fallback, so the grain still runs
    /// and emits silence instead of skipping.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn process(
        &mut self,
        io: &IoConfig,
        channels: &GrainChannels,
        input: &[&[f32]],
        output: &mut [&mut [f32]],
        source: &BufferView,
        envelope: &BufferView,
        rate_table: &BufferView,
        window_table: &BufferView,
    ) {
        debug_assert!(io.block_size >= INTERNAL_BLOCK);

        let clock_input = input[channels.grain_clock];
        let traversal_input = input[channels.traversal_phasor];
        let fm_input = input[channels.fm];
        let am_input = input[channels.am];

        let out_output = io.output_channel(OutputPlane::Output, self.index);
        let out_state = io.output_channel(OutputPlane::State, self.index);
        let out_progress = io.output_channel(OutputPlane::Progress, self.index);
        let out_playhead = io.output_channel(OutputPlane::Playhead, self.index);
        let out_amplitude = io.output_channel(OutputPlane::Amplitude, self.index);
        let out_envelope = io.output_channel(OutputPlane::Envelope, self.index);
        let out_buffer_channel = io.output_channel(OutputPlane::BufferChannel, self.index);
        let out_stream_channel = io.output_channel(OutputPlane::StreamChannel, self.index);

        // a bound window table overrides the window parameter as clock offset
        if window_table.valid {
            let frame = self.index % window_table.frame_count;
            self.window_offset = window_table.data[frame * window_table.channel_count];
        }

        let source_channel = self.bchan % source.channel_count.max(1);
        let rate_scale = source.sample_rate as f64 / io.sample_rate.max(1) as f64;

        let mut frame = 0;
        while frame < io.block_size {
            let chunk_end = (frame + INTERNAL_BLOCK).min(io.block_size);

            // frequency/amplitude modulation is sampled at the internal control rate and is
            // bipolar around the parameter value, so a silent input is neutral
            let rate_mod = (1.0 + fm_input[frame] as f64).max(0.0);
            let amp_mod = (1.0 + am_input[frame]).max(0.0);

            for i in frame..chunk_end {
                let clock = wrap_phase(clock_input[i] + self.window_offset);
                if self.clock_primed && clock < self.previous_clock {
                    self.trigger(traversal_input[i], source, rate_table);
                }
                self.previous_clock = clock;
                self.clock_primed = true;

                if !self.active {
                    // silent until the first trigger; outputs stay cleared
                    continue;
                }

                // the grain sounds in the leading part of its clock period only
                let active_span = 1.0 - self.space;
                let sounding = clock < active_span;
                let progress = if sounding { clock / active_span } else { 0.0 };

                let envelope_value = if sounding {
                    self.read_envelope(envelope, progress)
                } else {
                    0.0
                };
                let amplitude = if source.valid {
                    self.amplitude * amp_mod
                } else {
                    0.0
                };
                let sample = if sounding {
                    read_interpolated(
                        source.data,
                        source.frame_count,
                        source.channel_count,
                        source_channel,
                        self.source_position,
                    )
                } else {
                    0.0
                };

                if sounding {
                    let rate = self.rate as f64 * (1.0 + self.glisson as f64 * progress as f64);
                    let step = rate * rate_mod * rate_scale * self.direction as f64;
                    self.source_position =
                        wrap_frame_position(self.source_position + step, source.frame_count);
                }

                output[out_output][i] = sample * envelope_value * amplitude;
                output[out_state][i] = if sounding { 1.0 } else { 0.0 };
                output[out_progress][i] = progress;
                output[out_playhead][i] = self.source_start;
                output[out_amplitude][i] = amplitude;
                output[out_envelope][i] = envelope_value;
                output[out_buffer_channel][i] = self.bchan as f32;
                output[out_stream_channel][i] = self.stream as f32;
            }
            frame = chunk_end;
        }
    }

    /// Start a new grain: resample all trigger-scoped parameters and latch the source start
    /// position from the traversal phasor.
    fn trigger(&mut self, traversal: f32, source: &BufferView, rate_table: &BufferView) {
        let index = self.index;
        let rng = &mut self.rng;

        let delay_ms = self.params.delay.sample(index, rng).max(0.0);
        let mut rate = self.params.rate.sample(index, rng);
        if rate_table.valid {
            rate = nearest_table_value(rate_table.data, rate);
        }
        self.rate = rate;
        self.glisson = self.params.glisson.sample(index, rng);
        self.amplitude = self.params.amplitude.sample(index, rng).max(0.0);
        self.space = self.params.space.sample(index, rng).clamp(0.0, MAX_SPACE);
        self.envelope_position = wrap_phase(self.params.envelope_position.sample(index, rng));
        self.window_offset = wrap_phase(self.params.window.sample(index, rng));

        let forward_chance =
            (self.params.direction.sample(index, rng).clamp(-1.0, 1.0) + 1.0) * 0.5;
        self.direction = if rng.random::<f32>() < forward_chance {
            1.0
        } else {
            -1.0
        };

        let delay_frames = delay_ms as f64 / 1000.0 * source.sample_rate as f64;
        let start = wrap_phase(traversal) as f64 * source.frame_count as f64 - delay_frames;
        self.source_position = wrap_frame_position(start, source.frame_count);
        self.source_start = (self.source_position / source.frame_count as f64) as f32;
        self.active = true;
    }

    /// Envelope lookup at normalized grain progress. Multi-channel envelope buffers hold one
    /// window per channel; the EnvelopePosition parameter crossfades between adjacent windows.
    fn read_envelope(&self, envelope: &BufferView, progress: f32) -> f32 {
        let frames = envelope.frame_count;
        let position = wrap_frame_position(progress as f64 * frames as f64, frames);
        if envelope.channel_count <= 1 {
            return read_interpolated(envelope.data, frames, 1, 0, position);
        }
        let spread = self.envelope_position * (envelope.channel_count - 1) as f32;
        let lower = (spread as usize).min(envelope.channel_count - 1);
        let upper = (lower + 1).min(envelope.channel_count - 1);
        let fraction = spread - lower as f32;
        let a = read_interpolated(envelope.data, frames, envelope.channel_count, lower, position);
        if upper == lower {
            return a;
        }
        let b = read_interpolated(envelope.data, frames, envelope.channel_count, upper, position);
        a * (1.0 - fraction) + b * fraction
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::io::{GrainChannels, IoConfig};

    const SAMPLE_RATE: u32 = 44100;
    const BLOCK: usize = 64;

    fn io() -> IoConfig {
        IoConfig::new(BLOCK, SAMPLE_RATE, false, 1, [1, 1, 1, 1])
    }

    fn channels() -> GrainChannels {
        GrainChannels {
            grain_clock: 0,
            traversal_phasor: 1,
            fm: 2,
            am: 3,
        }
    }

    fn view(data: &[f32]) -> BufferView<'_> {
        BufferView {
            data,
            frame_count: data.len(),
            channel_count: 1,
            sample_rate: SAMPLE_RATE,
            valid: true,
        }
    }

    /// Clock ramp wrapping once, at frame 32.
    fn wrapping_clock() -> Vec<f32> {
        (0..BLOCK).map(|i| (i as f32 / 32.0).fract()).collect()
    }

    fn run(
        play: &mut GrainPlayback,
        clock: &[f32],
        traversal: &[f32],
        source: &BufferView,
        envelope: &BufferView,
    ) -> Vec<Vec<f32>> {
        let silence = vec![0.0; BLOCK];
        let inputs: Vec<&[f32]> = vec![clock, traversal, &silence, &silence];
        let mut output = vec![vec![0.0f32; BLOCK]; 8];
        let mut output_refs: Vec<&mut [f32]> =
            output.iter_mut().map(|channel| channel.as_mut_slice()).collect();
        play.process(
            &io(),
            &channels(),
            &inputs,
            &mut output_refs,
            source,
            envelope,
            &BufferView::empty(SAMPLE_RATE),
            &BufferView::empty(SAMPLE_RATE),
        );
        output
    }

    #[test]
    fn silent_until_first_trigger() {
        let mut play = GrainPlayback::new(0);
        let clock: Vec<f32> = (0..BLOCK).map(|i| i as f32 / 128.0).collect(); // never wraps
        let traversal = vec![0.0; BLOCK];
        let source_data = vec![0.5; 128];
        let envelope_data = vec![1.0; 64];
        let output = run(
            &mut play,
            &clock,
            &traversal,
            &view(&source_data),
            &view(&envelope_data),
        );
        for channel in &output {
            assert!(channel.iter().all(|sample| *sample == 0.0));
        }
    }

    #[test]
    fn clock_wrap_triggers_playback() {
        let mut play = GrainPlayback::new(0);
        let clock = wrapping_clock();
        let traversal = vec![0.0; BLOCK];
        let source_data = vec![0.5; 128];
        let envelope_data = vec![1.0; 64];
        let output = run(
            &mut play,
            &clock,
            &traversal,
            &view(&source_data),
            &view(&envelope_data),
        );

        // silent up to the wrap, playing from there on
        assert!(output[0][..32].iter().all(|sample| *sample == 0.0));
        for i in 32..BLOCK {
            assert!((output[0][i] - 0.5).abs() < 1e-3, "frame {i}: {}", output[0][i]);
            assert_eq!(output[1][i], 1.0); // state
            assert!((output[5][i] - 1.0).abs() < 1e-3); // envelope
        }
        // progress ramps up across the grain
        assert!(output[2][40] > output[2][33]);
    }

    #[test]
    fn invalid_source_zeroes_output_and_amplitude() {
        let mut play = GrainPlayback::new(0);
        let clock = wrapping_clock();
        let traversal = vec![0.0; BLOCK];
        let envelope_data = vec![1.0; 64];
        let output = run(
            &mut play,
            &clock,
            &traversal,
            &BufferView::empty(SAMPLE_RATE),
            &view(&envelope_data),
        );

        assert!(output[0].iter().all(|sample| *sample == 0.0)); // output plane
        assert!(output[4].iter().all(|sample| *sample == 0.0)); // amplitude plane
        assert_eq!(output[1][40], 1.0); // the grain still runs and reports state
    }

    #[test]
    fn space_gates_the_clock_period() {
        let mut play = GrainPlayback::new(0);
        play.params.space.set(ParamField::Value, 0.5);
        let clock = wrapping_clock();
        let traversal = vec![0.0; BLOCK];
        let source_data = vec![0.5; 128];
        let envelope_data = vec![1.0; 64];
        let output = run(
            &mut play,
            &clock,
            &traversal,
            &view(&source_data),
            &view(&envelope_data),
        );

        // after the trigger at 32, the clock passes 0.5 at frame 48
        for i in 32..48 {
            assert_eq!(output[1][i], 1.0, "frame {i}");
        }
        for i in 48..BLOCK {
            assert_eq!(output[1][i], 0.0, "frame {i}");
            assert_eq!(output[0][i], 0.0, "frame {i}");
        }
    }

    #[test]
    fn direction_reverses_source_playback() {
        let source_data: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let envelope_data = vec![1.0; 64];
        let clock = wrapping_clock();
        let traversal = vec![0.5; BLOCK];

        let mut forward = GrainPlayback::new(0);
        forward.params.direction.set(ParamField::Value, 1.0);
        let forward_out = run(
            &mut forward,
            &clock,
            &traversal,
            &view(&source_data),
            &view(&envelope_data),
        );
        assert!(forward_out[0][40] > forward_out[0][33]);

        let mut backward = GrainPlayback::new(0);
        backward.params.direction.set(ParamField::Value, -1.0);
        let backward_out = run(
            &mut backward,
            &clock,
            &traversal,
            &view(&source_data),
            &view(&envelope_data),
        );
        assert!(backward_out[0][40] < backward_out[0][33]);

        // both latch the same normalized start position
        assert!((forward_out[3][40] - 0.5).abs() < 1e-3);
        assert!((backward_out[3][40] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn rate_table_snaps_sampled_rates() {
        let mut play = GrainPlayback::new(0);
        play.params.rate.set(ParamField::Value, 1.3);
        let source_data = vec![0.0; 128];
        let rate_data = [0.5, 1.0, 2.0];
        play.trigger(0.0, &view(&source_data), &view(&rate_data));
        assert_eq!(play.rate, 1.0);

        play.params.rate.set(ParamField::Value, 1.8);
        play.trigger(0.0, &view(&source_data), &view(&rate_data));
        assert_eq!(play.rate, 2.0);

        // without a table the sampled rate passes through
        play.trigger(0.0, &view(&source_data), &BufferView::empty(SAMPLE_RATE));
        assert_eq!(play.rate, 1.8);
    }

    #[test]
    fn envelope_position_crossfades_windows() {
        let mut play = GrainPlayback::new(0);
        // two concatenated windows: channel 0 all zeros, channel 1 all ones
        let envelope_data: Vec<f32> = (0..64).flat_map(|_| [0.0, 1.0]).collect();
        let envelope = BufferView {
            data: &envelope_data,
            frame_count: 64,
            channel_count: 2,
            sample_rate: SAMPLE_RATE,
            valid: true,
        };

        play.envelope_position = 0.0;
        assert!((play.read_envelope(&envelope, 0.5) - 0.0).abs() < 1e-6);
        play.envelope_position = 1.0;
        assert!((play.read_envelope(&envelope, 0.5) - 1.0).abs() < 1e-6);
        play.envelope_position = 0.5;
        assert!((play.read_envelope(&envelope, 0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn delay_offsets_the_latched_start() {
        let mut play = GrainPlayback::new(0);
        let frames = SAMPLE_RATE as usize; // one second of source
        let source_data = vec![0.0; frames];
        play.params.delay.set(ParamField::Value, 250.0); // ms
        play.trigger(0.5, &view(&source_data), &BufferView::empty(SAMPLE_RATE));
        assert!((play.source_start - 0.25).abs() < 1e-3);
    }
}
