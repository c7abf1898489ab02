//! Blocking client and the line-based shell built on it.

use std::io::{BufRead, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};

use crate::types::Result;

use super::transport::{Package, Transport};

const PROMPT: &str = ":> ";

/// Connection to a server.
pub struct Client {
    transport: Transport<TcpStream>,
}

impl Client {
    /// Connects to `addr`.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self {
            transport: Transport::new(stream),
        })
    }

    /// Sends one statement and waits for its reply.
    pub fn execute(&mut self, sql: &str) -> Result<Package> {
        self.transport.send(&Package::Data(sql.as_bytes().to_vec()))?;
        match self.transport.receive()? {
            Some(reply) => Ok(reply),
            None => Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
        }
    }

    /// Ends the session.
    pub fn close(mut self) -> Result<()> {
        self.transport.send(&Package::Data(b"exit".to_vec()))
    }
}

/// Reads statements from `input` line by line, prints each reply to
/// `output`, and stops at end of input or `exit`/`quit`.
pub fn run_shell(mut client: Client, input: impl BufRead, mut output: impl Write) -> Result<()> {
    write!(output, "{PROMPT}")?;
    output.flush()?;
    for line in input.lines() {
        let line = line?;
        let sql = line.trim();
        if sql.eq_ignore_ascii_case("exit") || sql.eq_ignore_ascii_case("quit") {
            break;
        }
        if !sql.is_empty() {
            match client.execute(sql)? {
                Package::Data(out) => writeln!(output, "{}", String::from_utf8_lossy(&out))?,
                Package::Error(msg) => writeln!(output, "error: {msg}")?,
            }
        }
        write!(output, "{PROMPT}")?;
        output.flush()?;
    }
    client.close()
}
