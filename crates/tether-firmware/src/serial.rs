//! UART0 as the operator console

use core::fmt;

use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use esp_hal::Async;
use esp_hal::uart::Uart;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    Rx,
    Tx,
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rx => f.write_str("UART receive error"),
            Self::Tx => f.write_str("UART transmit error"),
        }
    }
}

impl core::error::Error for SerialError {}

impl embedded_io_async::Error for SerialError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Async UART exposed through the `embedded-io-async` traits the console uses.
pub struct UartSerial {
    uart: Uart<'static, Async>,
}

impl UartSerial {
    pub fn new(uart: Uart<'static, Async>) -> Self {
        Self { uart }
    }
}

impl ErrorType for UartSerial {
    type Error = SerialError;
}

impl Read for UartSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.uart.read_async(buf).await.map_err(|_| SerialError::Rx)
    }
}

impl Write for UartSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.uart.write_async(buf).await.map_err(|_| SerialError::Tx)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.uart.flush_async().await.map_err(|_| SerialError::Tx)
    }
}
