//! Media handling for the relay
//!
//! This module provides:
//! - FLV tag classification and serialization
//! - The [`MediaFrame`] unit that is fanned out to egress links
//! - GOP caching so links that connect mid-stream start on a keyframe

pub mod flv;
pub mod frame;
pub mod gop;

pub use flv::{FlvTag, FlvTagType};
pub use frame::{FrameType, MediaFrame};
pub use gop::GopBuffer;
