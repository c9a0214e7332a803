//! Audio ingestion bridge
//!
//! A narrow side-channel through which exactly one authorized client at a
//! time feeds sample frames into the audio pipeline. Ownership is held by
//! the active stream handle; frames from any other client id are silently
//! ignored, which resolves the single-writer hazard without locking the
//! hot path against the whole hub.

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Buf, Bytes};
use tokio::sync::Mutex;

use crate::protocol::PCM16_MAX;

/// Callback invoked with each accepted frame, wired to the audio pipeline
/// by whoever activates the stream.
pub type FrameCallback = Box<dyn Fn(&[f32]) + Send + Sync>;

/// The single active web-audio stream.
pub struct AudioStreamHandle {
    /// Owning client identifier; frames from anyone else are dropped.
    pub client: String,

    /// Most recent decoded sample buffer.
    pub data: Vec<f32>,

    active: bool,
    callback: Option<FrameCallback>,
}

impl AudioStreamHandle {
    fn new(client: String, callback: Option<FrameCallback>) -> Self {
        Self {
            client,
            data: Vec::new(),
            active: true,
            callback,
        }
    }

    fn accept(&mut self, samples: Vec<f32>) {
        self.data = samples;
        if self.active {
            if let Some(callback) = &self.callback {
                callback(&self.data);
            }
        }
    }
}

impl std::fmt::Debug for AudioStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStreamHandle")
            .field("client", &self.client)
            .field("samples", &self.data.len())
            .field("active", &self.active)
            .finish()
    }
}

/// Process-wide audio ingestion state.
#[derive(Debug, Default)]
pub struct AudioBridge {
    /// At most one active stream at a time.
    active: Mutex<Option<AudioStreamHandle>>,

    /// Clients that have announced a web-audio stream.
    announced: Mutex<HashSet<String>>,
}

impl AudioBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a client's `audio_stream_start` announcement. Returns false
    /// if the client already announced.
    pub async fn announce(&self, client: &str) -> bool {
        let mut announced = self.announced.lock().await;
        if !announced.insert(client.to_string()) {
            tracing::warn!(client, "Web audio client already exists");
            return false;
        }
        tracing::info!(client, "Web audio stream opened");
        true
    }

    /// Record a client's `audio_stream_stop`.
    pub async fn retire(&self, client: &str) {
        let mut announced = self.announced.lock().await;
        announced.remove(client);
        tracing::info!(client, "Web audio stream closed");
    }

    pub async fn is_announced(&self, client: &str) -> bool {
        self.announced.lock().await.contains(client)
    }

    /// Make `client` the owner of the audio side-channel, displacing any
    /// previous owner. Called by the audio subsystem when it selects a
    /// web-audio source.
    pub async fn activate(&self, client: &str, callback: Option<FrameCallback>) {
        let mut active = self.active.lock().await;
        *active = Some(AudioStreamHandle::new(client.to_string(), callback));
        tracing::info!(client, "Audio stream activated");
    }

    /// Release the side-channel.
    pub async fn deactivate(&self) {
        let mut active = self.active.lock().await;
        *active = None;
    }

    /// Submit a decoded frame on behalf of `client`.
    ///
    /// Ignored when no stream is active or when `client` is not the owner.
    pub async fn submit(&self, client: &str, samples: Vec<f32>) {
        let mut active = self.active.lock().await;
        match active.as_mut() {
            Some(handle) if handle.client == client => handle.accept(samples),
            _ => {}
        }
    }

    /// Most recent accepted sample buffer, if a stream is active.
    pub async fn latest(&self) -> Option<Vec<f32>> {
        let active = self.active.lock().await;
        active.as_ref().map(|handle| handle.data.clone())
    }
}

/// Decode a base64-encoded block of little-endian signed 16-bit PCM into
/// normalized floats.
///
/// Positive samples divide by 32767 and negative ones by 32768, preserving
/// the asymmetry of the i16 range so full scale maps to exactly ±1.0.
pub fn decode_pcm16(encoded: &str) -> Result<Vec<f32>, base64::DecodeError> {
    let raw = BASE64.decode(encoded)?;
    let mut buf = Bytes::from(raw);

    let mut samples = Vec::with_capacity(buf.remaining() / 2);
    while buf.remaining() >= 2 {
        let value = buf.get_i16_le();
        let normalized = if value >= 0 {
            f32::from(value) / PCM16_MAX
        } else {
            f32::from(value) / (PCM16_MAX + 1.0)
        };
        samples.push(normalized);
    }

    Ok(samples)
}
