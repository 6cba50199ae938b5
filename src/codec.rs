// Custom codec for the MPD line protocol
// Handles `key: value` fields, `binary: <count>` raw payloads and the
// terminal `OK` / `ACK [<code>@<index>] {<command>} <message>` lines.

use bytes::{BufMut, Bytes, BytesMut};
use lazy_static::lazy_static;
use regex::Regex;
use tokio_util::codec::{Decoder, Encoder};

lazy_static! {
    static ref ACK_RE: Regex = Regex::new(r"^ACK \[(\d+)@(\d+)\] \{(.*?)\} (.+)$").unwrap();
}

/// One decoded unit of a daemon response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    /// An ordinary `key: value` field line.
    Field { key: String, value: String },
    /// The raw payload announced by a preceding `binary: <count>` line.
    /// The payload is not line-delimited and may itself contain newlines.
    Binary(Bytes),
    /// Terminal success line.
    Ok,
    /// Terminal error line with the decoded ACK fields.
    Ack {
        code: u32,
        command_index: u32,
        command: String,
        message: String,
    },
}

pub struct MpdCodec {
    // Current parsing state
    state: MpdCodecState,
}

enum MpdCodecState {
    // Reading newline-terminated protocol lines
    ReadingLine,
    // A `binary: <count>` line announced a raw payload of this size
    ReadingBinary { expected_size: usize },
}

impl Default for MpdCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MpdCodec {
    pub fn new() -> Self {
        Self {
            state: MpdCodecState::ReadingLine,
        }
    }
}

impl Decoder for MpdCodec {
    type Item = ResponseFrame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match &mut self.state {
                MpdCodecState::ReadingLine => {
                    // Look for a newline to delimit the next line
                    let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') else {
                        return Ok(None);
                    };

                    // Extract the line (including the newline)
                    let line = buf.split_to(newline_pos + 1);
                    let line = std::str::from_utf8(&line[..line.len() - 1]).map_err(|_| {
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "Invalid UTF-8 in response line",
                        )
                    })?;

                    if line == "OK" {
                        return Ok(Some(ResponseFrame::Ok));
                    }

                    if let Some(caps) = ACK_RE.captures(line) {
                        let code = caps[1].parse::<u32>().map_err(|_| {
                            std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                format!("Invalid error code in ACK line: {}", line),
                            )
                        })?;
                        let command_index = caps[2].parse::<u32>().map_err(|_| {
                            std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                format!("Invalid command index in ACK line: {}", line),
                            )
                        })?;
                        return Ok(Some(ResponseFrame::Ack {
                            code,
                            command_index,
                            command: caps[3].to_string(),
                            message: caps[4].to_string(),
                        }));
                    }

                    let Some((key, value)) = line.split_once(": ") else {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("Expected `key: value` line, got: {}", line),
                        ));
                    };

                    if key == "binary" {
                        let expected_size = value.trim().parse::<usize>().map_err(|_| {
                            std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                format!("Invalid binary length: {}", value),
                            )
                        })?;
                        self.state = MpdCodecState::ReadingBinary { expected_size };

                        // Continue loop to handle the payload immediately
                        continue;
                    }

                    return Ok(Some(ResponseFrame::Field {
                        key: key.to_string(),
                        value: value.to_string(),
                    }));
                }

                MpdCodecState::ReadingBinary { expected_size } => {
                    // Wait for the full payload
                    if buf.len() < *expected_size {
                        return Ok(None);
                    }

                    let payload = buf.split_to(*expected_size).freeze();

                    // Field parsing resumes after the payload
                    self.state = MpdCodecState::ReadingLine;

                    return Ok(Some(ResponseFrame::Binary(payload)));
                }
            }
        }
    }
}

// Commands are plain newline-terminated text
impl Encoder<&str> for MpdCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.put(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
