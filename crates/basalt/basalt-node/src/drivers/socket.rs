//! UDP datagram endpoint.
//!
//! One datagram carries one formatted batch. The socket is non-blocking
//! and its descriptor feeds the owning path's poll set; `reverse()`
//! swaps the local and remote addresses for pipe-style testing.

use basalt_config::ConfigError;
use basalt_format::Format;
use basalt_icc::SampleBox;
use serde::Deserialize;
use serde_json::Value;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::NodeError;
use crate::node::{DriverContext, NodeDriver};

#[derive(Debug, Deserialize)]
struct SocketConfig {
    local: String,
    #[serde(default)]
    remote: Option<String>,
    #[serde(default = "defaults::format")]
    format: Value,
}

mod defaults {
    pub fn format() -> serde_json::Value {
        serde_json::Value::String("villas.binary".into())
    }
}

pub struct SocketDriver {
    local: String,
    remote: Option<String>,
    format_cfg: Value,

    formatter: Option<Box<dyn Format>>,
    socket: Option<UdpSocket>,
    remote_addr: Option<SocketAddr>,
    buf: Vec<u8>,
}

impl SocketDriver {
    pub fn new() -> Self {
        Self {
            local: String::new(),
            remote: None,
            format_cfg: defaults::format(),
            formatter: None,
            socket: None,
            remote_addr: None,
            buf: Vec::new(),
        }
    }
}

impl Default for SocketDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDriver for SocketDriver {
    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: SocketConfig = basalt_config::from_value(cfg)?;
        self.local = cfg.local;
        self.remote = cfg.remote;
        self.format_cfg = cfg.format;
        Ok(())
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.local.is_empty() {
            return Err(ConfigError::Missing("local"));
        }
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), NodeError> {
        // One datagram worth of scratch.
        self.buf = vec![0u8; 65536];
        Ok(())
    }

    fn start(&mut self, ctx: &DriverContext) -> Result<(), NodeError> {
        self.formatter = Some(
            basalt_format::lookup(&self.format_cfg, ctx.in_signals.clone())
                .map_err(|e| NodeError::driver(e.to_string()))?,
        );

        let socket = UdpSocket::bind(&self.local)?;
        socket.set_nonblocking(true)?;
        self.socket = Some(socket);

        self.remote_addr = match &self.remote {
            Some(remote) => Some(
                remote
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| NodeError::driver(format!("cannot resolve '{remote}'")))?,
            ),
            None => None,
        };

        Ok(())
    }

    fn stop(&mut self) -> Result<(), NodeError> {
        self.socket = None;
        self.remote_addr = None;
        Ok(())
    }

    fn read(&mut self, smps: &mut [SampleBox]) -> Result<usize, NodeError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(NodeError::driver("socket not started"));
        };
        let Some(formatter) = self.formatter.as_ref() else {
            return Err(NodeError::driver("socket not started"));
        };

        match socket.recv_from(&mut self.buf) {
            Ok((len, _peer)) => {
                let (n, _rbytes) = formatter.sscan(&self.buf[..len], smps)?;
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, smps: &[SampleBox]) -> Result<usize, NodeError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(NodeError::driver("socket not started"));
        };
        let Some(formatter) = self.formatter.as_ref() else {
            return Err(NodeError::driver("socket not started"));
        };
        let Some(remote) = self.remote_addr else {
            return Err(NodeError::driver("socket has no remote address"));
        };

        let (count, wbytes) = loop {
            match formatter.sprint(&mut self.buf, smps) {
                Ok(r) => break r,
                Err(basalt_format::FormatError::Overrun) => {
                    let grown = self.buf.len() * 2;
                    self.buf.resize(grown, 0);
                }
                Err(e) => return Err(e.into()),
            }
        };

        socket.send_to(&self.buf[..wbytes], remote)?;
        Ok(count)
    }

    fn poll_fds(&self) -> Vec<RawFd> {
        match &self.socket {
            Some(socket) => vec![socket.as_raw_fd()],
            None => Vec::new(),
        }
    }

    fn reverse(&mut self) -> Result<(), NodeError> {
        let Some(remote) = self.remote.take() else {
            return Err(NodeError::driver("reverse needs a remote address"));
        };
        self.remote = Some(std::mem::replace(&mut self.local, remote));
        Ok(())
    }
}
