//! FLV tag classification and serialization
//!
//! Media engines hand frames over as FLV tag bodies (the payload of an RTMP
//! audio/video/data message). The relay only looks at the first two bytes of
//! a body to tell keyframes and sequence headers apart, and serializes whole
//! tags when an egress connection speaks raw FLV.
//!
//! FLV file layout written by [`encode_file_header`] and [`FlvTag::encode_into`]:
//! ```text
//! +-----------+------------+------------------------------------+---------------+
//! | Header(9) | PrevSize(4)| Type(1) Size(3) TS(3+1) SID(3) Data| PrevSize(4) ...
//! +-----------+------------+------------------------------------+---------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the FLV file header, excluding the first previous-tag-size field
pub const FLV_HEADER_SIZE: usize = 9;

/// Size of an FLV tag header
pub const FLV_TAG_HEADER_SIZE: usize = 11;

/// Largest body the 24-bit data size field can describe
pub const FLV_MAX_BODY_SIZE: usize = 0x00FF_FFFF;

/// Tag body too large for an FLV tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("FLV tag body of {0} bytes exceeds the 24-bit size field")]
pub struct TagTooLarge(pub usize);

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    /// Tag type code as written in the tag header
    pub fn code(&self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }
}

/// Frame type nibbles that start a decodable picture (keyframe and the
/// server-generated keyframe)
const KEYFRAME_NIBBLES: [u8; 2] = [1, 4];

/// Video codec ids whose second body byte is a packet type: AVC, HEVC, AV1.
/// The last two are Enhanced RTMP extensions.
const PACKET_TYPE_CODECS: [u8; 3] = [7, 12, 13];

/// Sound format nibble for AAC
const SOUND_FORMAT_AAC: u8 = 10;

/// Packet type byte marking a decoder configuration record
const PACKET_SEQUENCE_HEADER: u8 = 0;

/// A single FLV tag: type, timestamp and body
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body (including codec headers)
    pub data: Bytes,
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Video, timestamp, data)
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Audio, timestamp, data)
    }

    pub fn script(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Script, timestamp, data)
    }

    /// First body byte, if any
    fn lead(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn is_keyframe(&self) -> bool {
        self.tag_type == FlvTagType::Video
            && self
                .lead()
                .is_some_and(|b| KEYFRAME_NIBBLES.contains(&(b >> 4)))
    }

    /// Decoder configuration record (AVC/HEVC/AV1 sequence header or AAC
    /// AudioSpecificConfig)
    pub fn is_sequence_header(&self) -> bool {
        let (Some(&lead), Some(&packet)) = (self.data.first(), self.data.get(1)) else {
            return false;
        };
        if packet != PACKET_SEQUENCE_HEADER {
            return false;
        }
        match self.tag_type {
            FlvTagType::Video => PACKET_TYPE_CODECS.contains(&(lead & 0x0F)),
            FlvTagType::Audio => lead >> 4 == SOUND_FORMAT_AAC,
            FlvTagType::Script => false,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes this tag occupies on the wire, trailer included
    pub fn encoded_len(&self) -> usize {
        FLV_TAG_HEADER_SIZE + self.data.len() + 4
    }

    /// Append the tag header, body and previous-tag-size trailer to `buf`
    ///
    /// `buf` is left untouched when the body does not fit the 24-bit size
    /// field.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), TagTooLarge> {
        let body_len = self.data.len();
        if body_len > FLV_MAX_BODY_SIZE {
            return Err(TagTooLarge(body_len));
        }
        buf.reserve(self.encoded_len());

        buf.put_u8(self.tag_type.code());
        put_u24(buf, body_len as u32);
        put_u24(buf, self.timestamp & 0x00FF_FFFF);
        buf.put_u8((self.timestamp >> 24) as u8);
        put_u24(buf, 0); // stream id, always 0
        buf.put_slice(&self.data);
        buf.put_u32((FLV_TAG_HEADER_SIZE + body_len) as u32);
        Ok(())
    }
}

/// FLV file header followed by the leading zero previous-tag-size
pub fn encode_file_header(has_audio: bool, has_video: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(FLV_HEADER_SIZE + 4);
    buf.put_slice(b"FLV");
    buf.put_u8(1);
    let mut flags = 0u8;
    if has_audio {
        flags |= 0x04;
    }
    if has_video {
        flags |= 0x01;
    }
    buf.put_u8(flags);
    buf.put_u32(FLV_HEADER_SIZE as u32);
    buf.put_u32(0);
    buf.freeze()
}

fn put_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_nibbles() {
        let cases: [(u8, bool); 5] = [
            (0x17, true),
            (0x47, true),
            (0x27, false),
            (0x37, false),
            (0x00, false),
        ];
        for (lead, expected) in cases {
            let tag = FlvTag::video(0, Bytes::copy_from_slice(&[lead, 0x01]));
            assert_eq!(tag.is_keyframe(), expected, "lead byte {lead:#04x}");
        }

        // Audio never counts as a keyframe, whatever the first byte says
        let audio = FlvTag::audio(0, Bytes::from_static(&[0x1F, 0x01]));
        assert!(!audio.is_keyframe());
    }

    #[test]
    fn test_hevc_and_av1_sequence_headers() {
        let hevc = FlvTag::video(0, Bytes::from_static(&[0x1C, 0x00, 0x00]));
        assert!(hevc.is_sequence_header());
        let av1 = FlvTag::video(0, Bytes::from_static(&[0x1D, 0x00]));
        assert!(av1.is_sequence_header());
        let script = FlvTag::script(0, Bytes::from_static(&[0x02, 0x00]));
        assert!(!script.is_sequence_header());
    }

    #[test]
    fn test_sequence_headers() {
        let avc = FlvTag::video(0, Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00]));
        assert!(avc.is_sequence_header());
        assert!(avc.is_keyframe());

        let avc_nalu = FlvTag::video(0, Bytes::from_static(&[0x17, 0x01, 0x00, 0x00, 0x00]));
        assert!(!avc_nalu.is_sequence_header());

        // VP6 has no packet type byte
        let vp6 = FlvTag::video(0, Bytes::from_static(&[0x14, 0x00]));
        assert!(!vp6.is_sequence_header());

        let aac = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(aac.is_sequence_header());

        let aac_raw = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x01, 0x21]));
        assert!(!aac_raw.is_sequence_header());

        let mp3 = FlvTag::audio(0, Bytes::from_static(&[0x2F, 0x00]));
        assert!(!mp3.is_sequence_header());
    }

    #[test]
    fn test_short_and_empty_bodies() {
        let empty = FlvTag::video(0, Bytes::new());
        assert_eq!(empty.size(), 0);
        assert!(!empty.is_keyframe());
        assert!(!empty.is_sequence_header());

        // One byte is enough for frame type but not for a packet type
        let short = FlvTag::video(0, Bytes::from_static(&[0x17]));
        assert!(short.is_keyframe());
        assert!(!short.is_sequence_header());
    }

    #[test]
    fn test_file_header() {
        let header = encode_file_header(true, true);
        assert_eq!(
            &header[..],
            &[b'F', b'L', b'V', 1, 0x05, 0, 0, 0, 9, 0, 0, 0, 0]
        );

        let video_only = encode_file_header(false, true);
        assert_eq!(video_only[4], 0x01);
    }

    #[test]
    fn test_encode_tag_layout() {
        let tag = FlvTag::video(0x0123_4567, Bytes::from_static(&[0x17, 0x01, 0xAA]));
        let mut buf = BytesMut::new();
        tag.encode_into(&mut buf).unwrap();

        assert_eq!(buf.len(), tag.encoded_len());
        assert_eq!(buf[0], 9);
        // Data size
        assert_eq!(&buf[1..4], &[0, 0, 3]);
        // Lower 24 bits of timestamp then the extended byte
        assert_eq!(&buf[4..7], &[0x23, 0x45, 0x67]);
        assert_eq!(buf[7], 0x01);
        // Stream id
        assert_eq!(&buf[8..11], &[0, 0, 0]);
        assert_eq!(&buf[11..14], &[0x17, 0x01, 0xAA]);
        // Previous tag size = 11 + 3
        assert_eq!(&buf[14..18], &[0, 0, 0, 14]);
    }

    #[test]
    fn test_oversized_body_is_rejected() {
        let at_limit = FlvTag::video(0, Bytes::from(vec![0u8; FLV_MAX_BODY_SIZE]));
        let mut buf = BytesMut::new();
        at_limit.encode_into(&mut buf).unwrap();
        assert_eq!(&buf[1..4], &[0xFF, 0xFF, 0xFF]);

        let oversized = FlvTag::video(0, Bytes::from(vec![0u8; FLV_MAX_BODY_SIZE + 1]));
        let mut buf = BytesMut::new();
        assert_eq!(
            oversized.encode_into(&mut buf),
            Err(TagTooLarge(FLV_MAX_BODY_SIZE + 1))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_tag_type_codes() {
        for tag_type in [FlvTagType::Audio, FlvTagType::Video, FlvTagType::Script] {
            assert_eq!(FlvTagType::from_code(tag_type.code()), Some(tag_type));
        }
        assert_eq!(FlvTagType::from_code(1), None);
    }
}
