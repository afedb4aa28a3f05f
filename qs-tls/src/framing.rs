//! Length-prefixed record framing
//!
//! Each record travels as `[u32 big-endian length][record]`. The prefix is
//! produced and consumed by `LengthDelimitedCodec`, which also guarantees
//! exact-size reads: a frame is only yielded once all of its bytes arrived.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::{QsTlsError, Result};
use crate::message::Message;
use crate::record;
use crate::types::SessionKey;

/// Size of the record length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest record accepted from the wire
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Read half of a record stream
pub type RecordReader<R> = FramedRead<R, RecordCodec>;

/// Write half of a record stream
pub type RecordWriter<W> = FramedWrite<W, RecordCodec>;

/// Length-prefix codec that reports a stream ending mid-record as `UnexpectedEof`
#[derive(Debug)]
pub struct RecordCodec {
    inner: LengthDelimitedCodec,
}

impl RecordCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(LENGTH_PREFIX_LEN)
                .big_endian()
                .max_frame_length(MAX_RECORD_LEN)
                .new_codec(),
        }
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RecordCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        self.inner.decode(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended with {} bytes of a partial record", src.len()),
            )),
        }
    }
}

impl Encoder<Bytes> for RecordCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> io::Result<()> {
        self.inner.encode(item, dst)
    }
}

pub fn record_reader<R: AsyncRead>(inner: R) -> RecordReader<R> {
    FramedRead::new(inner, RecordCodec::new())
}

pub fn record_writer<W: AsyncWrite>(inner: W) -> RecordWriter<W> {
    FramedWrite::new(inner, RecordCodec::new())
}

/// Encode a message into a record that fits in one frame
///
/// Nothing is written, so a failure here leaves the stream untouched.
pub fn seal_record(key: &SessionKey, message: &Message) -> Result<Bytes> {
    let encoded = record::encode(key, message)?;
    if encoded.len() > MAX_RECORD_LEN {
        return Err(QsTlsError::Format(format!(
            "record of {} bytes exceeds the {} byte limit",
            encoded.len(),
            MAX_RECORD_LEN
        )));
    }
    Ok(Bytes::from(encoded))
}

/// Write one sealed record with its length prefix and flush it
///
/// Returns the number of record bytes written (excluding the prefix).
pub async fn write_record<W>(writer: &mut RecordWriter<W>, sealed: Bytes) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let len = sealed.len();
    writer.send(sealed).await?;
    Ok(len)
}

/// Encode a message and write it with its length prefix
pub async fn send_record<W>(
    writer: &mut RecordWriter<W>,
    key: &SessionKey,
    message: &Message,
) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let sealed = seal_record(key, message)?;
    write_record(writer, sealed).await
}

/// Flush pending records and shut down the write half
pub async fn close_writer<W>(writer: &mut RecordWriter<W>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    SinkExt::<Bytes>::close(writer).await?;
    Ok(())
}

/// Read one length-prefixed record, returning its raw bytes
pub async fn recv_frame<R>(reader: &mut RecordReader<R>) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    match reader.next().await {
        Some(Ok(frame)) if frame.is_empty() => {
            Err(QsTlsError::Format("invalid record length 0".to_string()))
        }
        Some(Ok(frame)) => Ok(frame.freeze()),
        Some(Err(e)) => Err(map_read_error(e)),
        None => Err(QsTlsError::ConnectionClosed),
    }
}

/// Read one record and decode it into a message
pub async fn recv_record<R>(reader: &mut RecordReader<R>, key: &SessionKey) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let frame = recv_frame(reader).await?;
    record::decode(key, &frame)
}

fn map_read_error(e: io::Error) -> QsTlsError {
    match e.kind() {
        // Stream ended with a partial length prefix or record buffered.
        io::ErrorKind::UnexpectedEof => QsTlsError::ConnectionClosed,
        // Oversized length prefix.
        io::ErrorKind::InvalidData => QsTlsError::Format(e.to_string()),
        _ => QsTlsError::Io(e),
    }
}
