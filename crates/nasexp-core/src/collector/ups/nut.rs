//! Minimal Network UPS Tools (upsd) client.
//!
//! Implements the handful of read-only commands the UPS probe needs over the
//! line-based NUT protocol:
//!
//! ```text
//! LIST UPS              -> BEGIN LIST UPS / UPS <name> "<desc>" / END LIST UPS
//! LIST VAR <ups>        -> BEGIN LIST VAR <ups> / VAR <ups> <var> "<value>" / END LIST VAR <ups>
//! GET TYPE <ups> <var>  -> TYPE <ups> <var> <type>...
//! GET DESC <ups> <var>  -> DESC <ups> <var> "<description>"
//! LOGOUT                -> OK Goodbye
//! ```
//!
//! Any `ERR <code>` reply is surfaced as an `io::Error` of kind `Other`.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

/// Default upsd endpoint.
pub const DEFAULT_NUT_ADDRESS: &str = "127.0.0.1:3493";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A UPS announced by `LIST UPS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsInfo {
    pub name: String,
    pub description: String,
}

/// An open upsd conversation.
pub trait NutSession: Send {
    fn list_ups(&mut self) -> io::Result<Vec<UpsInfo>>;

    /// Variable name and raw value pairs.
    fn list_vars(&mut self, ups: &str) -> io::Result<Vec<(String, String)>>;

    /// Type words such as `NUMBER` or `RW STRING:64`.
    fn var_type(&mut self, ups: &str, var: &str) -> io::Result<String>;

    fn var_description(&mut self, ups: &str, var: &str) -> io::Result<String>;

    fn logout(&mut self) -> io::Result<()>;
}

/// Opens sessions. Separate from the session so reconnects are testable.
pub trait NutConnector: Send {
    fn connect(&self) -> io::Result<Box<dyn NutSession>>;
}

/// Connects to upsd over TCP.
#[derive(Debug, Clone)]
pub struct TcpNutConnector {
    address: String,
}

impl TcpNutConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl NutConnector for TcpNutConnector {
    fn connect(&self) -> io::Result<Box<dyn NutSession>> {
        let mut last_err = None;
        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    debug!(address = %addr, "connected to upsd");
                    return Ok(Box::new(NutClient::new(stream)?));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no address resolved for {}", self.address),
            )
        }))
    }
}

/// NUT protocol client over a TCP stream.
pub struct NutClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl NutClient {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn send(&mut self, command: &str) -> io::Result<()> {
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upsd closed the connection",
            ));
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if let Some(code) = line.strip_prefix("ERR ") {
            return Err(io::Error::other(format!("upsd error: {}", code)));
        }
        Ok(line)
    }

    /// Sends a one-line query and returns the tokens of its reply,
    /// checking that the reply echoes `expect` as its leading words.
    fn query(&mut self, command: &str, expect: &[&str]) -> io::Result<Vec<String>> {
        self.send(command)?;
        let tokens = split_tokens(&self.read_line()?)?;
        if tokens.len() < expect.len() || tokens.iter().zip(expect).any(|(t, e)| t != e) {
            return Err(protocol_error(command, &tokens));
        }
        Ok(tokens[expect.len()..].to_vec())
    }

    /// Runs a `LIST` command and returns the token lists between BEGIN and END.
    fn list(&mut self, what: &str) -> io::Result<Vec<Vec<String>>> {
        let command = format!("LIST {}", what);
        self.send(&command)?;

        let begin = format!("BEGIN {}", command);
        let end = format!("END {}", command);
        let first = self.read_line()?;
        if first != begin {
            return Err(protocol_error(&command, &[first]));
        }

        let mut rows = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == end {
                return Ok(rows);
            }
            rows.push(split_tokens(&line)?);
        }
    }
}

fn protocol_error(command: &str, reply: &[String]) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected reply to {}: {:?}", command, reply.join(" ")),
    )
}

impl NutSession for NutClient {
    fn list_ups(&mut self) -> io::Result<Vec<UpsInfo>> {
        self.list("UPS")?
            .into_iter()
            .map(|row| match row.as_slice() {
                [kind, name, description, ..] if kind == "UPS" => Ok(UpsInfo {
                    name: name.clone(),
                    description: description.clone(),
                }),
                _ => Err(protocol_error("LIST UPS", &row)),
            })
            .collect()
    }

    fn list_vars(&mut self, ups: &str) -> io::Result<Vec<(String, String)>> {
        self.list(&format!("VAR {}", quote(ups)))?
            .into_iter()
            .map(|row| match row.as_slice() {
                [kind, _, var, value, ..] if kind == "VAR" => Ok((var.clone(), value.clone())),
                _ => Err(protocol_error("LIST VAR", &row)),
            })
            .collect()
    }

    fn var_type(&mut self, ups: &str, var: &str) -> io::Result<String> {
        let command = format!("GET TYPE {} {}", quote(ups), var);
        let rest = self.query(&command, &["TYPE", ups, var])?;
        Ok(rest.join(" "))
    }

    fn var_description(&mut self, ups: &str, var: &str) -> io::Result<String> {
        let command = format!("GET DESC {} {}", quote(ups), var);
        let rest = self.query(&command, &["DESC", ups, var])?;
        Ok(rest.into_iter().next().unwrap_or_default())
    }

    fn logout(&mut self) -> io::Result<()> {
        self.send("LOGOUT")?;
        // Best effort: upsd replies "OK Goodbye" and closes.
        let _ = self.read_line();
        Ok(())
    }
}

/// Quotes an argument if it contains whitespace or quotes.
fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        return arg.to_string();
    }
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Splits a reply line into words, honoring double quotes and backslash escapes.
pub fn split_tokens(line: &str) -> io::Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut token = String::new();
        if c == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped) => token.push(escaped),
                        None => break,
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => token.push(c),
                }
            }
            if !closed {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unterminated quote in {:?}", line),
                ));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}
