//! Control-thread messaging into a running voice.

use std::sync::{Arc, Mutex};

use basedrop::{Collector, Handle, Owned};
use crossbeam_queue::ArrayQueue;

use crate::{
    buffer::BufferKind,
    grain::{GrainParam, ParamField},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Capacity of a voice's control message queue.
pub(crate) const MESSAGE_QUEUE_SIZE: usize = 1024;

// -------------------------------------------------------------------------------------------------

/// Control messages consumed by [`GrainVoice`](crate::GrainVoice) at the start of each block.
///
/// Messages mutate grain state between blocks only, so a parameter change may apply one block
/// late but is never observed torn by a running process call.
pub enum VoiceMessage {
    /// Route a parameter change through the targeting router.
    Param {
        value: f32,
        param: GrainParam,
        field: ParamField,
    },
    /// Select a single grain (1-based) for subsequent messages. 0 broadcasts.
    Target(usize),
    /// Select a buffer-channel tag group (1-based) for subsequent messages. 0 disables.
    ChannelTarget(usize),
    /// Select a stream tag group (1-based) for subsequent messages. 0 disables.
    StreamTarget(usize),
    /// Rebind a buffer role of the targeted grains to a named store entry.
    BufferName { kind: BufferKind, name: Owned<String> },
    /// Force all grains' bindings of a buffer role to re-resolve.
    BufferRefresh { kind: BufferKind },
    /// Change the number of processed grains (clamped to the pool size).
    ActiveGrains(usize),
}

// -------------------------------------------------------------------------------------------------

/// Cloneable control-side sender for a [`GrainVoice`](crate::GrainVoice).
///
/// Messages are delivered through a bounded lock-free queue and applied by the audio thread at
/// the next block boundary. Heap payloads travel as [`Owned`] values, so the audio thread never
/// frees their memory; it is reclaimed here on subsequent sends.
pub struct GrainVoiceHandle {
    queue: Arc<ArrayQueue<VoiceMessage>>,
    collector: Arc<Mutex<Collector>>,
    collector_handle: Handle,
}

impl Clone for GrainVoiceHandle {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            collector: Arc::clone(&self.collector),
            collector_handle: self.collector_handle.clone(),
        }
    }
}

impl GrainVoiceHandle {
    pub(crate) fn new(queue: Arc<ArrayQueue<VoiceMessage>>) -> Self {
        let collector = Collector::new();
        let collector_handle = collector.handle();
        Self {
            queue,
            collector: Arc::new(Mutex::new(collector)),
            collector_handle,
        }
    }

    /// Send a parameter change, routed by the voice's current targeting state.
    pub fn set_parameter(
        &self,
        value: f32,
        param: GrainParam,
        field: ParamField,
    ) -> Result<(), Error> {
        self.send(VoiceMessage::Param {
            value,
            param,
            field,
        })
    }

    /// Address a single grain (1-based) with subsequent messages. 0 broadcasts.
    pub fn set_target(&self, target: usize) -> Result<(), Error> {
        self.send(VoiceMessage::Target(target))
    }

    /// Address a buffer-channel tag group (1-based) with subsequent messages. 0 disables.
    pub fn set_channel_target(&self, target: usize) -> Result<(), Error> {
        self.send(VoiceMessage::ChannelTarget(target))
    }

    /// Address a stream tag group (1-based) with subsequent messages. 0 disables.
    pub fn set_stream_target(&self, target: usize) -> Result<(), Error> {
        self.send(VoiceMessage::StreamTarget(target))
    }

    /// Rebind a buffer role of the targeted grains to a named store entry.
    pub fn set_buffer(&self, kind: BufferKind, name: &str) -> Result<(), Error> {
        let name = Owned::new(&self.collector_handle, name.to_string());
        self.send(VoiceMessage::BufferName { kind, name })
    }

    /// Force all grains' bindings of a buffer role to re-resolve from the store.
    pub fn refresh_buffer(&self, kind: BufferKind) -> Result<(), Error> {
        self.send(VoiceMessage::BufferRefresh { kind })
    }

    /// Change the number of processed grains.
    pub fn set_active_grains(&self, count: usize) -> Result<(), Error> {
        self.send(VoiceMessage::ActiveGrains(count))
    }

    fn send(&self, message: VoiceMessage) -> Result<(), Error> {
        // reclaim payloads the audio thread has dropped since the last send
        if let Ok(mut collector) = self.collector.lock() {
            collector.collect();
        }
        self.queue
            .push(message)
            .map_err(|_| Error::SendError("voice message queue is full".to_string()))
    }
}
