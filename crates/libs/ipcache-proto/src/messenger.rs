use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
    ReadHalf, WriteHalf,
};
use tokio::time::Instant;

use crate::codec::{self, FRAME_HEADER_LEN};
use crate::error::{MessengerError, ProtocolError};
use crate::message::Message;

/// Framed, buffered message transport over one authenticated stream.
///
/// Read and write deadlines are independent and absolute. A deadline applies
/// to every operation that starts before it is changed or cleared; an
/// operation already in flight keeps the deadline it started with.
pub struct Messenger<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl<S> Messenger<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// Encodes and flushes `msg`. Returns once the bytes reach the transport,
    /// not once the peer has read them.
    pub async fn send(&mut self, msg: &Message) -> Result<(), MessengerError> {
        self.send_counting(msg).await.map(|_| ())
    }

    /// Like [`Messenger::send`], also reporting how many bytes sat in the
    /// write buffer when the flush began.
    pub async fn send_counting(&mut self, msg: &Message) -> Result<usize, MessengerError> {
        let frame = codec::encode(msg)?;
        let deadline = self.write_deadline;
        with_deadline(deadline, "write", async {
            self.writer.write_all(&frame).await?;
            let buffered = self.writer.buffer().len();
            self.writer.flush().await?;
            Ok(buffered)
        })
        .await
    }

    /// Blocks until one full message is decoded, the peer closes the stream
    /// or the read deadline fires.
    pub async fn receive(&mut self) -> Result<Message, MessengerError> {
        let deadline = self.read_deadline;
        with_deadline(deadline, "read", self.read_frame()).await
    }

    async fn read_frame(&mut self) -> Result<Message, MessengerError> {
        match self.reader.fill_buf().await {
            Ok(buf) if buf.is_empty() => return Err(MessengerError::Closed),
            Ok(_) => {}
            // TLS peers that drop TCP without close_notify surface here.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(MessengerError::Closed)
            }
            Err(err) => return Err(err.into()),
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        self.reader.read_exact(&mut header).await.map_err(mid_frame)?;
        let len = codec::body_len(header)?;
        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).await.map_err(mid_frame)?;
        Ok(codec::decode_body(&body)?)
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_deadline = Some(Instant::now() + timeout);
    }

    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_deadline = Some(Instant::now() + timeout);
    }

    /// Arms both deadlines `timeout` from now.
    pub fn set_timeout(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        self.read_deadline = Some(deadline);
        self.write_deadline = Some(deadline);
    }

    /// `None` clears the read deadline.
    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
    }

    /// `None` clears the write deadline.
    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline;
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.read_deadline
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        self.write_deadline
    }

    /// Flushes pending bytes and closes the write side of the stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

async fn with_deadline<T, F>(
    deadline: Option<Instant>,
    operation: &'static str,
    fut: F,
) -> Result<T, MessengerError>
where
    F: Future<Output = Result<T, MessengerError>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| MessengerError::Timeout { operation })?,
        None => fut.await,
    }
}

fn mid_frame(err: io::Error) -> MessengerError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::Truncated("stream ended mid-frame").into()
    } else {
        err.into()
    }
}
