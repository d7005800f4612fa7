//! Serial console line input
//!
//! Turns the raw byte stream of the operator's serial port into completed
//! lines. Editing is deliberately minimal: printable ASCII is accepted,
//! backspace/delete removes the last character, CR or LF ends the line and
//! every other byte is dropped.

use embedded_io_async::{Read, Write};
use heapless::String;
use thiserror_no_std::Error;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;
const MASK_GLYPH: &[u8] = b"*";
const ERASE: &[u8] = b"\x08 \x08";
const NEWLINE: &[u8] = b"\r\n";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("serial read failed")]
    Read,
    #[error("serial write failed")]
    Write,
    #[error("serial input closed")]
    EndOfInput,
}

/// Bytes to drop at the start of the next line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Nothing,
    /// The previous line ended on CR; drop the LF of a CRLF pair.
    LineFeed,
    /// The previous line filled up; drop the Enter the operator typed after it.
    Terminator,
}

/// Operator console over an async serial port.
pub struct Console<IO> {
    io: IO,
    pending: Pending,
}

impl<IO> Console<IO>
where
    IO: Read + Write,
{
    pub fn new(io: IO) -> Self {
        Self {
            io,
            pending: Pending::Nothing,
        }
    }

    pub fn get_ref(&self) -> &IO {
        &self.io
    }

    pub fn into_inner(self) -> IO {
        self.io
    }

    pub async fn write_str(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.write_bytes(text.as_bytes()).await
    }

    pub async fn write_line(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.write_bytes(text.as_bytes()).await?;
        self.write_bytes(NEWLINE).await
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ConsoleError> {
        self.io.write_all(bytes).await.map_err(|_| ConsoleError::Write)?;
        self.io.flush().await.map_err(|_| ConsoleError::Write)
    }

    async fn read_byte(&mut self) -> Result<u8, ConsoleError> {
        let mut byte = [0u8; 1];
        loop {
            let n = self.io.read(&mut byte).await.map_err(|_| ConsoleError::Read)?;
            if n == 0 {
                return Err(ConsoleError::EndOfInput);
            }

            let pending = core::mem::replace(&mut self.pending, Pending::Nothing);
            match (pending, byte[0]) {
                (Pending::LineFeed, b'\n') => continue,
                (Pending::Terminator, b'\r') => {
                    self.pending = Pending::LineFeed;
                    continue;
                }
                (Pending::Terminator, b'\n') => continue,
                (_, b) => return Ok(b),
            }
        }
    }

    /// Print `prompt` and read one line of at most `N` characters.
    ///
    /// Returns when CR or LF arrives, or as soon as `N` characters have been
    /// accepted. With `mask` set, each accepted character is echoed as `*`.
    /// Awaiting the serial port is the only suspension point.
    pub async fn read_line<const N: usize>(
        &mut self,
        prompt: &str,
        mask: bool,
    ) -> Result<String<N>, ConsoleError> {
        self.write_str(prompt).await?;

        let mut line = String::<N>::new();
        while line.len() < N {
            match self.read_byte().await? {
                b'\r' => {
                    self.pending = Pending::LineFeed;
                    self.write_bytes(NEWLINE).await?;
                    return Ok(line);
                }
                b'\n' => {
                    self.write_bytes(NEWLINE).await?;
                    return Ok(line);
                }
                BACKSPACE | DELETE => {
                    if line.pop().is_some() {
                        self.write_bytes(ERASE).await?;
                    }
                }
                b @ 0x20..=0x7e => {
                    // Checked by the loop condition
                    let _ = line.push(b as char);
                    if mask {
                        self.write_bytes(MASK_GLYPH).await?;
                    } else {
                        self.write_bytes(&[b]).await?;
                    }
                }
                _ => {}
            }
        }

        self.pending = Pending::Terminator;
        self.write_bytes(NEWLINE).await?;
        Ok(line)
    }
}
