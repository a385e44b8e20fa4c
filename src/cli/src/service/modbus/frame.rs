use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_modbus::Address;

use super::connection::ReadError;
use super::register::{Table, Word};

// NOTE: transaction id (2) + protocol id (2) + length (2)
pub(crate) const MBAP_PREFIX_LEN: usize = 6;

// NOTE: unit id (1) + max pdu (253)
pub(crate) const MAX_MBAP_LENGTH: u16 = 254;

pub(crate) const REQUEST_LEN: usize = 12;

const EXCEPTION_FLAG: u8 = 0x80;

impl Table {
  pub(crate) fn function_code(self) -> u8 {
    match self {
      Table::Coil => 0x01,
      Table::Discrete => 0x02,
      Table::Holding => 0x03,
      Table::Input => 0x04,
    }
  }
}

pub(crate) fn exception_name(code: u8) -> &'static str {
  match code {
    0x01 => "Illegal function",
    0x02 => "Illegal data address",
    0x03 => "Illegal data value",
    0x04 => "Server device failure",
    0x05 => "Acknowledge",
    0x06 => "Server device busy",
    0x08 => "Memory parity error",
    0x0A => "Gateway path unavailable",
    0x0B => "Gateway target device failed to respond",
    _ => "Unknown exception",
  }
}

/// Single register or single bit read.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub(crate) struct Request {
  pub(crate) transaction: u16,
  pub(crate) unit: u8,
  pub(crate) table: Table,
  pub(crate) offset: Address,
}

impl Request {
  pub(crate) fn encode(&self) -> [u8; REQUEST_LEN] {
    let mut frame = [0u8; REQUEST_LEN];
    frame[0..2].copy_from_slice(&self.transaction.to_be_bytes());
    // NOTE: protocol id stays zero
    frame[4..6].copy_from_slice(&6u16.to_be_bytes());
    frame[6] = self.unit;
    frame[7] = self.table.function_code();
    frame[8..10].copy_from_slice(&self.offset.to_be_bytes());
    frame[10..12].copy_from_slice(&1u16.to_be_bytes());
    frame
  }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub(crate) struct Header {
  pub(crate) transaction: u16,
  pub(crate) protocol: u16,
  pub(crate) length: u16,
}

impl Header {
  pub(crate) fn decode(prefix: &[u8]) -> Option<Self> {
    if prefix.len() < MBAP_PREFIX_LEN {
      return None;
    }

    Some(Self {
      transaction: u16::from_be_bytes([prefix[0], prefix[1]]),
      protocol: u16::from_be_bytes([prefix[2], prefix[3]]),
      length: u16::from_be_bytes([prefix[4], prefix[5]]),
    })
  }
}

/// Splits one complete frame off the front of `buffer`.
///
/// Returns `Ok(None)` until the whole frame declared by the MBAP length has
/// arrived. A header that can never be valid clears the buffer because there
/// is no way to find the next frame boundary after it.
pub(crate) fn split_frame(
  buffer: &mut Vec<u8>,
) -> Result<Option<(Header, Vec<u8>)>, ReadError> {
  let header = match Header::decode(buffer) {
    Some(header) => header,
    None => return Ok(None),
  };

  if header.protocol != 0 {
    buffer.clear();
    return Err(ReadError::MalformedResponse(format!(
      "protocol id {} is not modbus",
      header.protocol
    )));
  }

  if header.length == 0 || header.length > MAX_MBAP_LENGTH {
    buffer.clear();
    return Err(ReadError::MalformedResponse(format!(
      "invalid frame length {}",
      header.length
    )));
  }

  let end = MBAP_PREFIX_LEN + header.length as usize;
  if buffer.len() < end {
    return Ok(None);
  }

  let body = buffer[MBAP_PREFIX_LEN..end].to_vec();
  buffer.drain(..end);

  Ok(Some((header, body)))
}

/// Decodes the unit id and pdu of a response to `request`.
pub(crate) fn decode_body(
  request: &Request,
  body: &[u8],
) -> Result<Word, ReadError> {
  let function = match body.get(1) {
    Some(function) => *function,
    None => {
      return Err(ReadError::MalformedResponse(
        "response is missing the function code".to_owned(),
      ))
    }
  };
  let expected = request.table.function_code();

  if body[0] != request.unit {
    return Err(ReadError::MalformedResponse(format!(
      "unit {} while waiting for unit {}",
      body[0], request.unit
    )));
  }

  if function & EXCEPTION_FLAG != 0 {
    if function & !EXCEPTION_FLAG != expected {
      return Err(ReadError::MalformedResponse(format!(
        "exception for function 0x{:02X} while waiting for 0x{:02X}",
        function & !EXCEPTION_FLAG,
        expected
      )));
    }

    return match body.get(2) {
      Some(code) => Err(ReadError::Protocol(format!(
        "Modbus exception 0x{:02X} ({}) for function 0x{:02X}",
        code,
        exception_name(*code),
        expected
      ))),
      None => Err(ReadError::MalformedResponse(
        "exception response is missing the exception code".to_owned(),
      )),
    };
  }

  if function != expected {
    return Err(ReadError::MalformedResponse(format!(
      "function 0x{:02X} while waiting for 0x{:02X}",
      function, expected
    )));
  }

  let count = match body.get(2) {
    Some(0) | None => return Err(ReadError::EmptyResponse),
    Some(count) => *count as usize,
  };
  let data = &body[3..];
  if data.len() < count {
    return Err(ReadError::MalformedResponse(format!(
      "byte count {} exceeds the {} bytes received",
      count,
      data.len()
    )));
  }

  if request.table.is_bit() {
    Ok(Word::Bit(data[0] & 0x01 != 0))
  } else if count < 2 {
    Err(ReadError::MalformedResponse(format!(
      "byte count {} is too small for a register",
      count
    )))
  } else {
    Ok(Word::Register(u16::from_be_bytes([data[0], data[1]])))
  }
}

/// Raw MBAP client over any byte stream.
///
/// Received bytes are kept in an internal buffer so a read cancelled by the
/// timeout never desynchronizes framing for the next request.
#[derive(Debug)]
pub(crate) struct FrameClient<TStream> {
  stream: TStream,
  unit: u8,
  transaction: u16,
  timeout: std::time::Duration,
  buffer: Vec<u8>,
}

impl<TStream: AsyncRead + AsyncWrite + Unpin + Send> FrameClient<TStream> {
  pub(crate) fn new(
    stream: TStream,
    unit: u8,
    timeout: std::time::Duration,
  ) -> Self {
    Self {
      stream,
      unit,
      transaction: 0,
      timeout,
      buffer: Vec::with_capacity(256),
    }
  }

  pub(crate) async fn read(
    &mut self,
    table: Table,
    offset: Address,
  ) -> Result<Word, ReadError> {
    self.transaction = self.transaction.wrapping_add(1);
    let request = Request {
      transaction: self.transaction,
      unit: self.unit,
      table,
      offset,
    };

    let timeout = self.timeout;
    match tokio::time::timeout(timeout, self.exchange(&request)).await {
      Ok(result) => result,
      Err(_) => Err(ReadError::Timeout(timeout.as_millis() as u64)),
    }
  }

  pub(crate) async fn shutdown(&mut self) -> std::io::Result<()> {
    self.stream.shutdown().await
  }

  async fn exchange(&mut self, request: &Request) -> Result<Word, ReadError> {
    tracing::trace!("Sending {:?}", request);
    self
      .stream
      .write_all(&request.encode())
      .await
      .map_err(ReadError::Transport)?;
    self.stream.flush().await.map_err(ReadError::Transport)?;

    loop {
      let (header, body) = self.next_frame().await?;
      if header.transaction != request.transaction {
        // NOTE: late answer to a request that already timed out
        tracing::trace!(
          "Discarding stale frame {} while waiting for {}",
          header.transaction,
          request.transaction
        );
        continue;
      }

      return decode_body(request, &body);
    }
  }

  async fn next_frame(&mut self) -> Result<(Header, Vec<u8>), ReadError> {
    let mut chunk = [0u8; 256];
    loop {
      if let Some(frame) = split_frame(&mut self.buffer)? {
        return Ok(frame);
      }

      let read = self
        .stream
        .read(&mut chunk)
        .await
        .map_err(ReadError::Transport)?;
      if read == 0 {
        return Err(ReadError::Transport(std::io::Error::new(
          std::io::ErrorKind::UnexpectedEof,
          "connection closed by peer",
        )));
      }
      self.buffer.extend_from_slice(&chunk[..read]);
    }
  }
}
