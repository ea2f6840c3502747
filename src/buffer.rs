//! Host-owned, named sample buffers and the renamable per-grain references that read them.

use std::{
    ops::Deref,
    sync::{Arc, RwLock, RwLockReadGuard},
};

use dashmap::DashMap;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// The buffer roles a grain reads from.
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
pub enum BufferKind {
    /// Source audio that grains play fragments of.
    Sample,
    /// Amplitude window applied over a grain's lifetime.
    Envelope,
    /// Live-input capture buffer, used as the grain source in live mode.
    Delay,
    /// Optional table of per-grain clock offsets.
    Window,
    /// Optional table of playback rates that triggered grains snap to.
    Rate,
}

// -------------------------------------------------------------------------------------------------

/// Interleaved audio or control data stored in a [`BufferStore`].
///
/// An empty buffer is the "not valid" state: references resolve to it while a named buffer is
/// absent, and readers fall back to silence.
#[derive(Debug, Default, Clone)]
pub struct SampleBuffer {
    data: Vec<f32>,
    channel_count: usize,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Create a buffer from interleaved data.
    pub fn new(data: Vec<f32>, channel_count: usize, sample_rate: u32) -> Self {
        debug_assert!(channel_count > 0, "Buffers need at least one channel");
        debug_assert!(
            data.len() % channel_count == 0,
            "Interleaved data must hold whole frames"
        );
        Self {
            data,
            channel_count,
            sample_rate,
        }
    }

    /// Whether this buffer holds any readable frames.
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty() && self.channel_count > 0
    }

    pub fn frame_count(&self) -> usize {
        if self.channel_count > 0 {
            self.data.len() / self.channel_count
        } else {
            0
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable sample access for host-side recording or reloading.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

// -------------------------------------------------------------------------------------------------

type BufferSlot = Arc<RwLock<SampleBuffer>>;

/// Registry of named sample buffers, standing in for the host's buffer storage.
///
/// The store owns all sample data. The control thread creates, reloads, resizes and removes
/// entries at any time; the audio thread only ever reads through [`BufferRef`] locks.
#[derive(Debug, Default)]
pub struct BufferStore {
    buffers: DashMap<String, BufferSlot>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or reload a named buffer. Reloading writes into the existing slot, so bound
    /// references observe the new content without a refresh.
    pub fn insert(&self, name: &str, buffer: SampleBuffer) {
        if let Some(slot) = self.buffers.get(name) {
            match slot.write() {
                Ok(mut locked) => *locked = buffer,
                Err(err) => *err.into_inner() = buffer,
            }
            return;
        }
        self.buffers
            .insert(name.to_string(), Arc::new(RwLock::new(buffer)));
    }

    /// Remove a named buffer. The slot's content is cleared first, so references still bound
    /// to it degrade to the silent fallback instead of reading stale data.
    pub fn remove(&self, name: &str) -> bool {
        if let Some((_, slot)) = self.buffers.remove(name) {
            match slot.write() {
                Ok(mut locked) => *locked = SampleBuffer::default(),
                Err(err) => *err.into_inner() = SampleBuffer::default(),
            }
            true
        } else {
            false
        }
    }

    /// Rename a buffer, keeping its content. References bound to the old name keep reading
    /// the same storage until they are rebound or refreshed.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
        if to.is_empty() {
            return Err(Error::ParameterError(
                "buffer names must not be empty".to_string(),
            ));
        }
        let (_, slot) = self
            .buffers
            .remove(from)
            .ok_or_else(|| Error::BufferNotFound(from.to_string()))?;
        self.buffers.insert(to.to_string(), slot);
        Ok(())
    }

    /// Resolve a name to its shared slot.
    pub(crate) fn get(&self, name: &str) -> Option<BufferSlot> {
        self.buffers.get(name).map(|slot| Arc::clone(&slot))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

// -------------------------------------------------------------------------------------------------

/// A renamable reference to a named buffer in a [`BufferStore`].
///
/// Grains hold one of these per [`BufferKind`] role. The referenced storage stays owned by the
/// store; the reference only pins the slot and locks it for the duration of a read. Binding
/// resolves the name at set time, so a name bound before the buffer exists stays unresolved
/// until [`BufferRef::refresh`] re-resolves it.
#[derive(Debug)]
pub struct BufferRef {
    store: Arc<BufferStore>,
    name: Option<String>,
    slot: Option<BufferSlot>,
}

impl BufferRef {
    pub(crate) fn new(store: Arc<BufferStore>) -> Self {
        Self {
            store,
            name: None,
            slot: None,
        }
    }

    /// The currently bound buffer name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Bind to a buffer name, resolving it from the store. An empty name unbinds.
    pub fn set(&mut self, name: &str) {
        if name.is_empty() {
            self.name = None;
            self.slot = None;
            return;
        }
        self.name = Some(name.to_string());
        self.slot = self.store.get(name);
        if self.slot.is_none() {
            log::debug!("Buffer '{name}' is not present in the store - will resolve on refresh");
        }
    }

    /// Re-resolve the current name, picking up buffers created or replaced since the last bind.
    pub fn refresh(&mut self) {
        if let Some(name) = self.name.take() {
            self.slot = None;
            self.set(&name);
        }
    }

    /// Lock the referenced buffer for reading.
    ///
    /// Returns `None` when unresolved. The guard must stay alive for the entire read: the
    /// underlying storage may be swapped by the control thread the moment it is released.
    pub fn lock(&self) -> Option<BufferLock<'_>> {
        let slot = self.slot.as_ref()?;
        // a poisoned slot reads as-is; sample data stays structurally intact across panics
        let guard = match slot.read() {
            Ok(guard) => guard,
            Err(err) => err.into_inner(),
        };
        Some(BufferLock { guard })
    }
}

// -------------------------------------------------------------------------------------------------

/// Scoped read lock on a referenced [`SampleBuffer`].
pub struct BufferLock<'a> {
    guard: RwLockReadGuard<'a, SampleBuffer>,
}

impl Deref for BufferLock<'_> {
    type Target = SampleBuffer;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

// -------------------------------------------------------------------------------------------------

/// One silent frame, substituted for absent or invalid buffers.
static SILENT_FRAME: [f32; 1] = [0.0];

/// Borrowed, validated view of sample data, extracted from a held [`BufferLock`].
///
/// Falls back to a single silent frame when the buffer is absent or empty, so grain processing
/// never needs to special-case missing buffers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BufferView<'a> {
    pub data: &'a [f32],
    pub frame_count: usize,
    pub channel_count: usize,
    pub sample_rate: u32,
    pub valid: bool,
}

impl<'a> BufferView<'a> {
    pub fn from_lock(lock: Option<&'a BufferLock<'_>>, fallback_rate: u32) -> Self {
        match lock {
            Some(lock) if lock.is_valid() => Self {
                data: lock.data(),
                frame_count: lock.frame_count(),
                channel_count: lock.channel_count(),
                sample_rate: lock.sample_rate(),
                valid: true,
            },
            _ => Self::empty(fallback_rate),
        }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Self {
            data: &SILENT_FRAME,
            frame_count: 1,
            channel_count: 1,
            sample_rate,
            valid: false,
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_buffer(value: f32, frames: usize) -> SampleBuffer {
        SampleBuffer::new(vec![value; frames], 1, 44100)
    }

    #[test]
    fn store_insert_and_resolve() {
        let store = Arc::new(BufferStore::new());
        store.insert("pad", test_buffer(0.5, 16));
        assert!(store.contains("pad"));

        let mut buffer_ref = BufferRef::new(Arc::clone(&store));
        buffer_ref.set("pad");
        let lock = buffer_ref.lock().expect("Bound buffer should lock");
        assert!(lock.is_valid());
        assert_eq!(lock.frame_count(), 16);
        assert_eq!(lock.data()[0], 0.5);
    }

    #[test]
    fn reload_is_visible_through_bound_refs() {
        let store = Arc::new(BufferStore::new());
        store.insert("pad", test_buffer(0.5, 16));

        let mut buffer_ref = BufferRef::new(Arc::clone(&store));
        buffer_ref.set("pad");

        // reload with different content and size, without rebinding
        store.insert("pad", test_buffer(-1.0, 4));
        let lock = buffer_ref.lock().expect("Bound buffer should lock");
        assert_eq!(lock.frame_count(), 4);
        assert_eq!(lock.data()[0], -1.0);
    }

    #[test]
    fn remove_invalidates_bound_refs() {
        let store = Arc::new(BufferStore::new());
        store.insert("pad", test_buffer(0.5, 16));

        let mut buffer_ref = BufferRef::new(Arc::clone(&store));
        buffer_ref.set("pad");
        assert!(store.remove("pad"));
        assert!(!store.remove("pad"));

        let lock = buffer_ref.lock().expect("Slot is still pinned");
        assert!(!lock.is_valid());
        let view = BufferView::from_lock(Some(&lock), 44100);
        assert!(!view.valid);
        assert_eq!(view.data, &[0.0]);
    }

    #[test]
    fn late_created_buffers_resolve_on_refresh() {
        let store = Arc::new(BufferStore::new());
        let mut buffer_ref = BufferRef::new(Arc::clone(&store));

        buffer_ref.set("later");
        assert!(buffer_ref.lock().is_none());

        store.insert("later", test_buffer(1.0, 8));
        assert!(buffer_ref.lock().is_none());

        buffer_ref.refresh();
        assert!(buffer_ref.lock().is_some());
        assert_eq!(buffer_ref.name(), Some("later"));
    }

    #[test]
    fn rename_keeps_content_until_refresh() {
        let store = Arc::new(BufferStore::new());
        store.insert("pad", test_buffer(0.5, 16));

        let mut buffer_ref = BufferRef::new(Arc::clone(&store));
        buffer_ref.set("pad");

        store.rename("pad", "strings").unwrap();
        assert!(!store.contains("pad"));
        assert!(store.contains("strings"));

        // still pinned to the same storage, so reads keep working
        assert_eq!(buffer_ref.lock().unwrap().data()[0], 0.5);

        // a refresh of the stale name unbinds
        buffer_ref.refresh();
        assert!(buffer_ref.lock().is_none());

        buffer_ref.set("strings");
        assert_eq!(buffer_ref.lock().unwrap().data()[0], 0.5);

        assert!(store.rename("missing", "anything").is_err());
        assert!(store.rename("strings", "").is_err());
    }

    #[test]
    fn empty_name_unbinds() {
        let store = Arc::new(BufferStore::new());
        store.insert("pad", test_buffer(0.5, 16));

        let mut buffer_ref = BufferRef::new(Arc::clone(&store));
        buffer_ref.set("pad");
        buffer_ref.set("");
        assert!(buffer_ref.name().is_none());
        assert!(buffer_ref.lock().is_none());
    }

    #[test]
    fn view_fallback() {
        let view = BufferView::from_lock(None, 48000);
        assert!(!view.valid);
        assert_eq!(view.frame_count, 1);
        assert_eq!(view.channel_count, 1);
        assert_eq!(view.sample_rate, 48000);
    }
}
