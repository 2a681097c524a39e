//! Media frames flowing from ingest to egress

use bytes::Bytes;

use super::flv::{FlvTag, FlvTagType};

/// Type of media frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Video,
    Audio,
    /// Script data (onMetaData)
    Metadata,
}

/// A frame pushed by the media engine and fanned out to every egress link
///
/// Cheap to clone: the payload is reference counted, so each link's queue
/// shares one allocation.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub frame_type: FrameType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// FLV tag body
    pub data: Bytes,
    /// Whether this is a keyframe (video only)
    pub is_keyframe: bool,
    /// Whether this is a decoder configuration record
    pub is_header: bool,
}

impl MediaFrame {
    pub fn video(timestamp: u32, data: Bytes, is_keyframe: bool, is_header: bool) -> Self {
        Self {
            frame_type: FrameType::Video,
            timestamp,
            data,
            is_keyframe,
            is_header,
        }
    }

    pub fn audio(timestamp: u32, data: Bytes, is_header: bool) -> Self {
        Self {
            frame_type: FrameType::Audio,
            timestamp,
            data,
            is_keyframe: false,
            is_header,
        }
    }

    pub fn metadata(data: Bytes) -> Self {
        Self {
            frame_type: FrameType::Metadata,
            timestamp: 0,
            data,
            is_keyframe: false,
            is_header: false,
        }
    }

    /// Classify an FLV tag body coming from the media engine
    pub fn from_flv_tag(tag: &FlvTag) -> Self {
        match tag.tag_type {
            FlvTagType::Video => Self::video(
                tag.timestamp,
                tag.data.clone(),
                tag.is_keyframe(),
                tag.is_sequence_header(),
            ),
            FlvTagType::Audio => {
                Self::audio(tag.timestamp, tag.data.clone(), tag.is_sequence_header())
            }
            FlvTagType::Script => Self::metadata(tag.data.clone()),
        }
    }

    pub fn to_flv_tag(&self) -> FlvTag {
        match self.frame_type {
            FrameType::Video => FlvTag::video(self.timestamp, self.data.clone()),
            FrameType::Audio => FlvTag::audio(self.timestamp, self.data.clone()),
            FrameType::Metadata => FlvTag::script(self.timestamp, self.data.clone()),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
