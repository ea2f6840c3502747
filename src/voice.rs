//! The per-voice grain pool: block-synchronous drive loop, reconfiguration and message routing.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use strum::EnumCount;

use crate::{
    buffer::{BufferKind, BufferStore, BufferView},
    grain::{Grain, GrainParam, ParamField},
    Error,
};

// -------------------------------------------------------------------------------------------------

pub(crate) mod io;
mod messages;

use io::{GrainChannels, IoConfig};
use messages::MESSAGE_QUEUE_SIZE;

pub use io::{InputGroup, OutputPlane};
pub use messages::{GrainVoiceHandle, VoiceMessage};

// -------------------------------------------------------------------------------------------------

/// Fixed granularity at which grain DSP advances, independent of the host's block size.
/// Host blocks smaller than this render as silence for the whole voice.
pub const INTERNAL_BLOCK: usize = 16;

// -------------------------------------------------------------------------------------------------

/// Options for constructing a [`GrainVoice`].
#[derive(Debug, Clone)]
pub struct GrainVoiceOptions {
    /// Number of grains in the pool. The voice asks the host for `8 * grain_count` output
    /// channels.
    pub grain_count: usize,
    /// Name of the source sample buffer initially bound to every grain. May be empty or name
    /// a buffer that does not exist yet; grains degrade to silence until it resolves.
    pub sample_buffer: String,
    /// Name of the envelope buffer initially bound to every grain.
    pub envelope_buffer: String,
    /// Granulate the live capture (delay) buffer instead of the sample buffer.
    pub live_mode: bool,
}

impl Default for GrainVoiceOptions {
    fn default() -> Self {
        Self {
            grain_count: 8,
            sample_buffer: String::new(),
            envelope_buffer: String::new(),
            live_mode: false,
        }
    }
}

impl GrainVoiceOptions {
    pub fn grain_count(mut self, grain_count: usize) -> Self {
        self.grain_count = grain_count;
        self
    }

    pub fn sample_buffer(mut self, name: &str) -> Self {
        self.sample_buffer = name.to_string();
        self
    }

    pub fn envelope_buffer(mut self, name: &str) -> Self {
        self.envelope_buffer = name.to_string();
        self
    }

    pub fn live_mode(mut self, live_mode: bool) -> Self {
        self.live_mode = live_mode;
        self
    }

    /// Validate all options. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if self.grain_count == 0 {
            return Err(Error::ParameterError(
                "grain count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// One granular synthesis voice: a fixed pool of grains driven once per audio block.
///
/// The audio thread owns the voice and calls [`process`](Self::process); everything else
/// reaches it either through a [`GrainVoiceHandle`] (lock-free, applied at the next block
/// boundary) or through the direct methods below when the host serializes access itself.
/// [`reinit`](Self::reinit) and [`process`](Self::process) both take `&mut self`, so the two
/// can never overlap.
pub struct GrainVoice {
    store: Arc<BufferStore>,
    grains: Vec<Grain>,
    active_grains: usize,
    input_chans: [usize; InputGroup::COUNT],
    target: usize,
    channel_target: usize,
    stream_target: usize,
    live_mode: bool,
    sample_rate: u32,
    default_sample_name: String,
    default_envelope_name: String,
    message_queue: Arc<ArrayQueue<VoiceMessage>>,
}

impl GrainVoice {
    pub fn new(
        store: Arc<BufferStore>,
        sample_rate: u32,
        options: GrainVoiceOptions,
    ) -> Result<Self, Error> {
        options.validate()?;
        let mut voice = Self {
            store,
            grains: Vec::new(),
            active_grains: 0,
            input_chans: [1; InputGroup::COUNT],
            target: 0,
            channel_target: 0,
            stream_target: 0,
            live_mode: options.live_mode,
            sample_rate,
            default_sample_name: options.sample_buffer,
            default_envelope_name: options.envelope_buffer,
            message_queue: Arc::new(ArrayQueue::new(MESSAGE_QUEUE_SIZE)),
        };
        voice.reinit(options.grain_count)?;
        Ok(voice)
    }

    /// Create a control-side handle for this voice. Handles are cheap to clone and can be
    /// used from any thread.
    pub fn handle(&self) -> GrainVoiceHandle {
        GrainVoiceHandle::new(Arc::clone(&self.message_queue))
    }

    /// Size of the grain pool.
    pub fn max_grains(&self) -> usize {
        self.grains.len()
    }

    /// Number of grains processed each block.
    pub fn active_grains(&self) -> usize {
        self.active_grains
    }

    /// Change the number of processed grains. The remaining pool keeps emitting cleared
    /// silence on its output channels.
    pub fn set_active_grains(&mut self, count: usize) {
        self.active_grains = count.min(self.max_grains());
    }

    pub fn live_mode(&self) -> bool {
        self.live_mode
    }

    pub fn set_live_mode(&mut self, live_mode: bool) {
        self.live_mode = live_mode;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    /// One grain of the pool.
    pub fn grain(&self, index: usize) -> Option<&Grain> {
        self.grains.get(index)
    }

    /// Mutable access to one grain of the pool.
    pub fn grain_mut(&mut self, index: usize) -> Option<&mut Grain> {
        self.grains.get_mut(index)
    }

    // --- channel negotiation -------------------------------------------------------------------

    /// Number of multichannel output channels this voice needs from the host: one channel per
    /// grain on each [`OutputPlane`].
    pub fn output_channel_count(&self) -> usize {
        OutputPlane::COUNT * self.max_grains()
    }

    /// Total number of input channels across all input groups.
    pub fn input_channel_count(&self) -> usize {
        self.input_chans.iter().sum()
    }

    /// Record how many channels the host wired into one input group. A count of zero is
    /// coerced to one to keep the round-robin channel wrap well defined.
    pub fn set_input_channel_count(&mut self, group: InputGroup, count: usize) {
        self.input_chans[group as usize] = count.max(1);
    }

    /// The recorded channel count of one input group.
    pub fn input_group_channels(&self, group: InputGroup) -> usize {
        self.input_chans[group as usize]
    }

    // --- lifecycle -----------------------------------------------------------------------------

    /// Tear down the pool and allocate a fresh one of `grain_count` grains.
    ///
    /// This is a full reallocation: grains mid-flight lose their phase state, and every grain
    /// gets fresh buffer references bound to the construction-time default names. All grains
    /// become active.
    pub fn reinit(&mut self, grain_count: usize) -> Result<(), Error> {
        if grain_count == 0 {
            return Err(Error::ParameterError(
                "grain count must be at least 1".to_string(),
            ));
        }
        self.cleanup();

        let mut grains = Vec::new();
        grains.try_reserve_exact(grain_count)?;

        let sample_name = self.default_sample_name.clone();
        let envelope_name = self.default_envelope_name.clone();
        for index in 0..grain_count {
            let mut grain = Grain::new(index, Arc::clone(&self.store));
            grain.buffer_mut(BufferKind::Sample).set(&sample_name);
            grain.buffer_mut(BufferKind::Envelope).set(&envelope_name);
            grains.push(grain);
        }
        self.grains = grains;
        self.active_grains = grain_count;

        log::debug!("grain voice reinitialized with {grain_count} grains");
        Ok(())
    }

    /// Drop all grains and release their buffer references. Idempotent;
    /// [`reinit`](Self::reinit) calls this implicitly.
    pub fn cleanup(&mut self) {
        self.grains.clear();
        self.active_grains = 0;
    }

    // --- audio ---------------------------------------------------------------------------------

    /// Render one block.
    ///
    /// `input` holds the four input groups' channels packed back to back in [`InputGroup`]
    /// order, sized as negotiated via [`set_input_channel_count`](Self::set_input_channel_count).
    /// `output` holds exactly [`output_channel_count`](Self::output_channel_count) channels in
    /// [`OutputPlane`] order. All output channels are cleared first; blocks smaller than
    /// [`INTERNAL_BLOCK`] stay silent.
    pub fn process(&mut self, input: &[&[f32]], output: &mut [&mut [f32]]) {
        self.process_messages();

        // clear the entire output region first - stale samples would otherwise leak into
        // channels owned by inactive grains
        let mut block_size = usize::MAX;
        for channel in output.iter_mut() {
            channel.fill(0.0);
            block_size = block_size.min(channel.len());
        }

        if output.len() < self.output_channel_count() {
            log::warn!(
                "host wired {} output channels, but this voice needs {}",
                output.len(),
                self.output_channel_count()
            );
            return;
        }
        if input.len() < self.input_channel_count() {
            log::warn!(
                "host wired {} input channels, but this voice needs {}",
                input.len(),
                self.input_channel_count()
            );
            return;
        }
        for channel in input.iter().take(self.input_channel_count()) {
            block_size = block_size.min(channel.len());
        }
        if block_size < INTERNAL_BLOCK {
            // the whole block stays at the pre-cleared silence
            return;
        }

        let io = IoConfig::new(
            block_size,
            self.sample_rate,
            self.live_mode,
            self.max_grains(),
            self.input_chans,
        );
        let source_kind = if io.live_mode {
            BufferKind::Delay
        } else {
            BufferKind::Sample
        };
        let sample_rate = self.sample_rate;

        for grain_index in 0..self.active_grains.min(self.grains.len()) {
            let grain_channels = GrainChannels::new(&io, grain_index);
            let Grain { buffers, play } = &mut self.grains[grain_index];

            // locks must span the entire process call: the underlying storage may be swapped
            // by the control thread the moment they are released
            let source_lock = buffers.get(source_kind).lock();
            let envelope_lock = buffers.get(BufferKind::Envelope).lock();
            let rate_lock = buffers.get(BufferKind::Rate).lock();
            let window_lock = buffers.get(BufferKind::Window).lock();

            let source = BufferView::from_lock(source_lock.as_ref(), sample_rate);
            let envelope = BufferView::from_lock(envelope_lock.as_ref(), sample_rate);
            let rate_table = BufferView::from_lock(rate_lock.as_ref(), sample_rate);
            let window_table = BufferView::from_lock(window_lock.as_ref(), sample_rate);

            play.process(
                &io,
                &grain_channels,
                input,
                output,
                &source,
                &envelope,
                &rate_table,
                &window_table,
            );
        }
    }

    fn process_messages(&mut self) {
        while let Some(message) = self.message_queue.pop() {
            match message {
                VoiceMessage::Param {
                    value,
                    param,
                    field,
                } => {
                    if let Err(err) = self.grain_message(value, param, field) {
                        log::warn!("ignoring voice parameter message: {err}");
                    }
                }
                VoiceMessage::Target(target) => self.target = target,
                VoiceMessage::ChannelTarget(target) => self.channel_target = target,
                VoiceMessage::StreamTarget(target) => self.stream_target = target,
                VoiceMessage::BufferName { kind, name } => {
                    self.buffer_ref_message(name.as_str(), kind);
                }
                VoiceMessage::BufferRefresh { kind } => self.buffer_refresh(kind),
                VoiceMessage::ActiveGrains(count) => self.set_active_grains(count),
            }
        }
    }

    // --- message routing -----------------------------------------------------------------------

    /// Address a single grain (1-based) with subsequent messages. 0 broadcasts.
    pub fn set_target(&mut self, target: usize) {
        self.target = target;
    }

    /// Address all grains with a matching buffer-channel tag (1-based). 0 disables.
    pub fn set_channel_target(&mut self, target: usize) {
        self.channel_target = target;
    }

    /// Address all grains with a matching stream tag (1-based). 0 disables.
    pub fn set_stream_target(&mut self, target: usize) {
        self.stream_target = target;
    }

    /// Route a parameter change to the grains selected by the current targeting state.
    pub fn grain_message(
        &mut self,
        value: f32,
        param: GrainParam,
        field: ParamField,
    ) -> Result<(), Error> {
        if !param.supports_field(field) {
            return Err(Error::ParameterError(format!(
                "parameter '{param}' has no '{field}' field"
            )));
        }
        self.for_each_targeted_grain(|grain| grain.set_param(value, param, field));
        Ok(())
    }

    /// Rebind one buffer role on the targeted grains. The binding is force-refreshed
    /// (cleared, then set), so reassigning the same name still reloads the buffer. An empty
    /// name is ignored.
    pub fn buffer_ref_message(&mut self, name: &str, kind: BufferKind) {
        if name.is_empty() {
            return;
        }
        self.for_each_targeted_grain(|grain| {
            let buffer = grain.buffer_mut(kind);
            buffer.set("");
            buffer.set(name);
        });
    }

    /// Force all grains' bindings of one buffer role to re-resolve from the store.
    pub fn buffer_refresh(&mut self, kind: BufferKind) {
        for grain in &mut self.grains {
            grain.buffer_mut(kind).refresh();
        }
    }

    /// Apply a change to the targeted grains. Stream targets win over channel targets, which
    /// win over the grain index target; with no target set, the change broadcasts. Targets are
    /// 1-based; index targets at or above the pool size are dropped, not clamped.
    fn for_each_targeted_grain(&mut self, mut apply: impl FnMut(&mut Grain)) {
        if self.stream_target > 0 {
            for grain in &mut self.grains {
                if grain.stream() + 1 == self.stream_target {
                    apply(grain);
                }
            }
            return;
        }
        if self.channel_target > 0 {
            for grain in &mut self.grains {
                if grain.channel() + 1 == self.channel_target {
                    apply(grain);
                }
            }
            return;
        }
        if self.target > 0 {
            if self.target >= self.grains.len() {
                log::debug!("dropping message for out-of-range grain target {}", self.target);
                return;
            }
            apply(&mut self.grains[self.target - 1]);
            return;
        }
        for grain in &mut self.grains {
            apply(grain);
        }
    }
}

// -------------------------------------------------------------------------------------------------
