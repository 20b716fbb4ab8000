//! Line oriented byte transports for talking to the analyzer.
//!
//! The instrument speaks SCPI over either a raw TCP socket or a serial line.
//! Both are addressed with VISA style resource strings:
//!
//! - `TCPIP::10.10.10.155::5025::SOCKET`
//! - `ASRL/dev/ttyUSB0::INSTR`

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_until};
use nom::character::complete::digit1;
use nom::combinator::{all_consuming, map_res, opt, verify};
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;
use tracing::debug;

/// Longest reply accepted without a terminator before the buffer is dropped.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Line terminator for both directions on socket and serial resources.
pub const LINE_TERMINATION: u8 = b'\n';

/// A synchronous, half-duplex line transport.
pub trait Transport {
    /// Sends one command line. The terminator is appended by the transport.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Reads one line, without its terminator. A read that times out before a
    /// full line arrives is an error; bytes received so far are kept for the
    /// next call.
    fn read_line(&mut self) -> io::Result<String>;

    /// Discards anything buffered but not yet read.
    fn clear(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        (**self).write_line(line)
    }

    fn read_line(&mut self) -> io::Result<String> {
        (**self).read_line()
    }

    fn clear(&mut self) -> io::Result<()> {
        (**self).clear()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Wraps any byte stream with line framing.
pub struct LineTransport<S> {
    stream: S,
    termination: u8,
    pending: Vec<u8>,
}

impl<S: Read + Write> LineTransport<S> {
    pub fn new(stream: S) -> Self {
        LineTransport {
            stream,
            termination: LINE_TERMINATION,
            pending: Vec::new(),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == self.termination)?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        let text = String::from_utf8_lossy(&line[..end]);
        Some(text.trim_end_matches('\r').to_owned())
    }
}

impl<S: Read + Write> Transport for LineTransport<S> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(&[self.termination])?;
        self.stream.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut buf = [0u8; 512];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            match self.stream.read(&mut buf)? {
                0 => return Err(io::ErrorKind::UnexpectedEof.into()),
                n => self.pending.extend_from_slice(&buf[..n]),
            }
            if self.pending.len() > MAX_LINE_LENGTH {
                let received = self.pending.len();
                self.pending.clear();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("no line terminator in {} bytes", received),
                ));
            }
        }
    }

    fn clear(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.stream.flush()
    }
}

/// A parsed VISA resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisaAddress {
    Socket { host: String, port: u16 },
    Serial { device: String },
}

impl fmt::Display for VisaAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VisaAddress::Socket { host, port } => write!(f, "TCPIP::{}::{}::SOCKET", host, port),
            VisaAddress::Serial { device } => write!(f, "ASRL{}::INSTR", device),
        }
    }
}

fn socket_resource(input: &str) -> IResult<&str, VisaAddress> {
    let (input, _) = terminated(preceded(tag_no_case("TCPIP"), opt(digit1)), tag("::"))(input)?;
    let (input, (host, _, port, _)) = tuple((
        verify(take_until("::"), |h: &str| !h.is_empty()),
        tag("::"),
        map_res(digit1, str::parse::<u16>),
        preceded(tag("::"), tag_no_case("SOCKET")),
    ))(input)?;
    Ok((
        input,
        VisaAddress::Socket {
            host: host.to_owned(),
            port,
        },
    ))
}

fn serial_resource(input: &str) -> IResult<&str, VisaAddress> {
    let (input, device) = preceded(
        tag_no_case("ASRL"),
        verify(take_until("::"), |d: &str| !d.is_empty()),
    )(input)?;
    let (input, _) = preceded(tag("::"), tag_no_case("INSTR"))(input)?;
    Ok((
        input,
        VisaAddress::Serial {
            device: device.to_owned(),
        },
    ))
}

impl std::str::FromStr for VisaAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        all_consuming(alt((socket_resource, serial_resource)))(s.trim())
            .map(|(_, address)| address)
            .map_err(|_| format!("unsupported resource string {:?}", s))
    }
}

/// Settings used when opening a transport.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub read_timeout: Duration,
    pub serial_baud: u32,
}

/// Opens the transport named by `address`.
pub fn open(address: &VisaAddress, options: &OpenOptions) -> io::Result<Box<dyn Transport>> {
    match address {
        VisaAddress::Socket { host, port } => {
            let target = (host.as_str(), *port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;
            debug!(%target, "opening socket");
            let stream = TcpStream::connect_timeout(&target, options.read_timeout)?;
            stream.set_read_timeout(Some(options.read_timeout))?;
            stream.set_nodelay(true)?;
            Ok(Box::new(LineTransport::new(stream)))
        }
        VisaAddress::Serial { device } => {
            debug!(device = %device, baud = options.serial_baud, "opening serial port");
            let port = serialport::new(device.as_str(), options.serial_baud)
                .timeout(options.read_timeout)
                .open()
                .map_err(io::Error::from)?;
            Ok(Box::new(LineTransport::new(port)))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory duplex stream: reads come from `input`, writes go to `output`.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_socket_address() {
        let address: VisaAddress = "TCPIP::10.10.10.155::5025::SOCKET".parse().unwrap();
        assert_eq!(
            address,
            VisaAddress::Socket {
                host: "10.10.10.155".to_owned(),
                port: 5025
            }
        );
        assert_eq!(address.to_string(), "TCPIP::10.10.10.155::5025::SOCKET");

        let numbered: VisaAddress = "tcpip0::vna.lab::5025::socket".parse().unwrap();
        assert!(matches!(numbered, VisaAddress::Socket { port: 5025, .. }));
    }

    #[test]
    fn test_parse_serial_address() {
        let address: VisaAddress = "ASRL/dev/ttyUSB0::INSTR".parse().unwrap();
        assert_eq!(
            address,
            VisaAddress::Serial {
                device: "/dev/ttyUSB0".to_owned()
            }
        );
    }

    #[test]
    fn test_reject_unsupported_address() {
        assert!("TCPIP::10.0.0.1::inst0::INSTR".parse::<VisaAddress>().is_err());
        assert!("USB0::0x2A8D::0x5C18::MY1234::INSTR".parse::<VisaAddress>().is_err());
        assert!("TCPIP::::5025::SOCKET".parse::<VisaAddress>().is_err());
        assert!("TCPIP::host::99999::SOCKET".parse::<VisaAddress>().is_err());
    }

    #[test]
    fn test_line_framing() {
        let stream = Duplex {
            input: Cursor::new(b"1\r\nKeysight,N9917A\n".to_vec()),
            output: Vec::new(),
        };
        let mut transport = LineTransport::new(stream);
        transport.write_line("*IDN?").unwrap();
        assert_eq!(transport.stream.output, b"*IDN?\n");
        assert_eq!(transport.read_line().unwrap(), "1");
        assert_eq!(transport.read_line().unwrap(), "Keysight,N9917A");
        assert_eq!(
            transport.read_line().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_partial_line_is_kept() {
        let stream = Duplex {
            input: Cursor::new(b"+1".to_vec()),
            output: Vec::new(),
        };
        let mut transport = LineTransport::new(stream);
        assert!(transport.read_line().is_err());
        transport.stream.input = Cursor::new(b"\n".to_vec());
        assert_eq!(transport.read_line().unwrap(), "+1");
    }

    #[test]
    fn test_unterminated_reply_is_capped() {
        let mut input = vec![b'x'; MAX_LINE_LENGTH + 4096];
        input.extend_from_slice(b"\n1\n");
        let stream = Duplex {
            input: Cursor::new(input),
            output: Vec::new(),
        };
        let mut transport = LineTransport::new(stream);
        assert_eq!(
            transport.read_line().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
        assert!(transport.pending.is_empty());
    }
}
