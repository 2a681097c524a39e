//! GOP cache for priming egress links
//!
//! When an egress link (re)connects mid-stream the destination needs:
//! 1. The stream metadata and sequence headers (decoder configuration)
//! 2. The most recent keyframe
//! 3. Every frame since that keyframe
//!
//! Without these a destination would sit on a black picture until the next
//! keyframe, which can be several seconds away.

use std::collections::VecDeque;

use super::frame::{FrameType, MediaFrame};

/// Default cache budget (4MB)
pub const DEFAULT_GOP_CACHE_SIZE: usize = 4 * 1024 * 1024;

/// Latest decoder configuration seen on the stream
#[derive(Debug, Default)]
struct Headers {
    metadata: Option<MediaFrame>,
    video: Option<MediaFrame>,
    audio: Option<MediaFrame>,
}

impl Headers {
    /// Slot a header frame belongs in, if it is one
    fn slot(&mut self, frame: &MediaFrame) -> Option<&mut Option<MediaFrame>> {
        match frame.frame_type {
            FrameType::Metadata => Some(&mut self.metadata),
            FrameType::Video if frame.is_header => Some(&mut self.video),
            FrameType::Audio if frame.is_header => Some(&mut self.audio),
            _ => None,
        }
    }

    /// Replay order: metadata, video, audio
    fn iter(&self) -> impl Iterator<Item = &MediaFrame> {
        [&self.metadata, &self.video, &self.audio]
            .into_iter()
            .flatten()
    }
}

/// Headers plus the current group of pictures
#[derive(Debug)]
pub struct GopBuffer {
    headers: Headers,
    /// Whether frames are buffered at all; headers are always kept
    buffering: bool,
    budget: usize,
    buffered_bytes: usize,
    /// Frames since the last keyframe, audio interleaved
    frames: VecDeque<MediaFrame>,
    /// Set once `frames` starts on a keyframe
    anchored: bool,
}

impl GopBuffer {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_GOP_CACHE_SIZE)
    }

    pub fn with_max_size(budget: usize) -> Self {
        Self {
            headers: Headers::default(),
            buffering: true,
            budget,
            buffered_bytes: 0,
            frames: VecDeque::new(),
            anchored: false,
        }
    }

    /// Headers only: links start at the next keyframe
    pub fn headers_only() -> Self {
        Self {
            buffering: false,
            ..Self::with_max_size(0)
        }
    }

    /// Record a frame that was just ingested
    pub fn observe(&mut self, frame: &MediaFrame) {
        if let Some(slot) = self.headers.slot(frame) {
            *slot = Some(frame.clone());
            return;
        }
        if !self.buffering {
            return;
        }

        if frame.frame_type == FrameType::Video && frame.is_keyframe {
            self.drop_gop();
            self.anchored = true;
        }
        // Nothing before the first keyframe is decodable on its own
        if self.anchored {
            self.append(frame.clone());
        }
    }

    fn append(&mut self, frame: MediaFrame) {
        let size = frame.size();
        // The front frame is the anchoring keyframe; evicting it leaves an
        // undecodable GOP.
        if self.buffered_bytes + size > self.budget {
            tracing::debug!(
                buffered = self.buffered_bytes,
                incoming = size,
                budget = self.budget,
                "GOP exceeds cache budget, dropped until next keyframe"
            );
            self.drop_gop();
            return;
        }

        self.buffered_bytes += size;
        self.frames.push_back(frame);
    }

    /// Forget the buffered GOP, keeping headers
    pub fn drop_gop(&mut self) {
        self.frames.clear();
        self.buffered_bytes = 0;
        self.anchored = false;
    }

    /// Forget everything, headers included
    pub fn reset(&mut self) {
        self.drop_gop();
        self.headers = Headers::default();
    }

    /// Frames a freshly connected link should receive before live data:
    /// metadata, video header, audio header, then the buffered GOP.
    pub fn catchup(&self) -> Vec<MediaFrame> {
        self.headers
            .iter()
            .chain(self.frames.iter())
            .cloned()
            .collect()
    }

    /// Whether the buffered frames start on a keyframe
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Buffered frame bytes (headers excluded)
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Timestamp span of buffered frames in milliseconds
    pub fn span_ms(&self) -> Option<u32> {
        let first = self.frames.front()?.timestamp;
        let last = self.frames.back()?.timestamp;
        Some(last.saturating_sub(first))
    }
}

impl Default for GopBuffer {
    fn default() -> Self {
        Self::new()
    }
}
