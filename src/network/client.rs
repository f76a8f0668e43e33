//! Blocking client
//!
//! One request in flight at a time over a single TCP stream.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{EmberError, Result};
use crate::protocol::{read_response, write_command, Command, Response, Status};

/// Client for an EmberKV server
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Client {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| EmberError::Network(format!("connect failed: {}", e)))?;
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
        })
    }

    /// Apply the same timeout to reads and writes
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        self.writer.get_ref().set_write_timeout(timeout)?;
        Ok(())
    }

    /// Send a command and wait for its response
    pub fn request(&mut self, command: &Command) -> Result<Response> {
        write_command(&mut self.writer, command)?;
        read_response(&mut self.reader)
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let response = self.request(&Command::Get { key: key.to_vec() })?;
        match response.status {
            Status::Ok => Ok(Some(response.payload.unwrap_or_default())),
            Status::NotFound => Ok(None),
            Status::Error => Err(server_error(&response)),
        }
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let response = self.request(&Command::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        expect_ok(&response).map(|_| ())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let response = self.request(&Command::Delete { key: key.to_vec() })?;
        expect_ok(&response).map(|_| ())
    }

    pub fn ping(&mut self) -> Result<()> {
        let response = self.request(&Command::Ping)?;
        expect_ok(&response).map(|_| ())
    }

    /// Returns the server's summary of the cycle
    pub fn compact(&mut self) -> Result<String> {
        let response = self.request(&Command::Compact)?;
        let payload = expect_ok(&response)?;
        Ok(String::from_utf8_lossy(payload).into_owned())
    }
}

fn expect_ok(response: &Response) -> Result<&[u8]> {
    match response.status {
        Status::Ok => Ok(response.payload.as_deref().unwrap_or(&[])),
        Status::NotFound => Err(EmberError::Protocol(
            "unexpected NOT_FOUND response".to_string(),
        )),
        Status::Error => Err(server_error(response)),
    }
}

fn server_error(response: &Response) -> EmberError {
    EmberError::Network(format!(
        "server error: {}",
        response.error_message().unwrap_or_default()
    ))
}
