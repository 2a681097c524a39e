//! FLV-over-TCP egress
//!
//! Writes the relayed stream as a plain FLV byte stream over TCP. RTMP
//! handshake and chunking belong to the external media engine; this
//! connector is meant for FLV ingest sidecars such as
//! `ffmpeg -f flv -listen 1 -i tcp://0.0.0.0:1935 …` that re-publish to the
//! final platform.

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::destination::Protocol;
use crate::media::flv::encode_file_header;
use crate::media::MediaFrame;

use super::{EgressConnector, EgressError, EgressSink, EgressTarget};

/// Connector that speaks raw FLV to `rtmp://` / `rtmps://` destinations
#[derive(Debug, Clone)]
pub struct FlvTcpConnector {
    /// Disable Nagle's algorithm
    pub tcp_nodelay: bool,
    /// Userspace write buffer size
    pub write_buffer_size: usize,
}

impl Default for FlvTcpConnector {
    fn default() -> Self {
        Self {
            tcp_nodelay: true, // Important for low latency
            write_buffer_size: 64 * 1024,
        }
    }
}

impl FlvTcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "rtmp" => Some(1935),
        "rtmps" => Some(443),
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

#[async_trait]
impl EgressConnector for FlvTcpConnector {
    async fn connect(&self, target: &EgressTarget) -> Result<Box<dyn EgressSink>, EgressError> {
        let protocol = target.destination.protocol;
        if protocol != Protocol::Rtmp {
            return Err(EgressError::UnsupportedProtocol(protocol));
        }

        let host = target
            .url
            .host_str()
            .ok_or_else(|| EgressError::InvalidTarget(format!("{} has no host", target.url)))?;
        let port = target
            .url
            .port()
            .or_else(|| default_port(target.url.scheme()))
            .ok_or_else(|| EgressError::InvalidTarget(format!("{} has no port", target.url)))?;

        let stream = TcpStream::connect((host, port)).await?;
        if self.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        tracing::debug!(
            stream = %target.stream_key,
            destination = %target.destination.id,
            host = host,
            port = port,
            "FLV egress connected"
        );

        Ok(Box::new(FlvTcpSink {
            writer: BufWriter::with_capacity(self.write_buffer_size, stream),
            header_sent: false,
            scratch: BytesMut::with_capacity(64 * 1024),
        }))
    }
}

/// Connected FLV byte stream
pub struct FlvTcpSink {
    writer: BufWriter<TcpStream>,
    header_sent: bool,
    scratch: BytesMut,
}

#[async_trait]
impl EgressSink for FlvTcpSink {
    async fn send(&mut self, frame: &MediaFrame) -> Result<(), EgressError> {
        self.scratch.clear();
        frame.to_flv_tag().encode_into(&mut self.scratch)?;

        if !self.header_sent {
            self.writer
                .write_all(&encode_file_header(true, true))
                .await?;
            self.header_sent = true;
        }

        self.writer.write_all(&self.scratch).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EgressError> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
