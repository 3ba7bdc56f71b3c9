//! Belt relay drivers.
//!
//! The conveyor is switched through a smart plug: relay on = belt running.
//! `SmartPlugBelt` speaks the TP-Link local protocol (TCP port 9999, 4-byte
//! big-endian length prefix, autokey XOR cipher). `StubBelt` is an
//! in-memory double with scriptable failures; clones share state so tests
//! can inspect calls after handing the driver to the machine.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const SMART_PLUG_PORT: u16 = 9999;

/// Initial autokey byte of the plug cipher.
const CIPHER_SEED: u8 = 171;
/// Upper bound on a sane reply, the plug sends small JSON.
const MAX_REPLY_BYTES: u32 = 1 << 20;

const CMD_RELAY_ON: &str = r#"{"system":{"set_relay_state":{"state":1}}}"#;
const CMD_RELAY_OFF: &str = r#"{"system":{"set_relay_state":{"state":0}}}"#;
const CMD_SYSINFO: &str = r#"{"system":{"get_sysinfo":{}}}"#;

/// Last commanded relay state as the driver knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeltState {
    Running,
    Stopped,
    Unknown,
}

impl fmt::Display for BeltState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeltState::Running => write!(f, "running"),
            BeltState::Stopped => write!(f, "stopped"),
            BeltState::Unknown => write!(f, "unknown"),
        }
    }
}

impl Default for BeltState {
    fn default() -> Self {
        BeltState::Unknown
    }
}

/// Boundary trait for the conveyor actuator.
pub trait BeltDrive: Send {
    fn name(&self) -> &str;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Cached result of the last start/stop; never a network call.
    fn cached_state(&self) -> BeltState;
    /// Ask the device for its actual state. Tooling and startup only.
    fn probe(&mut self) -> Result<BeltState> {
        Ok(self.cached_state())
    }
}

/// Autokey XOR: each ciphertext byte keys the next.
fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = CIPHER_SEED;
    plain
        .iter()
        .map(|&b| {
            let c = key ^ b;
            key = c;
            c
        })
        .collect()
}

fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = CIPHER_SEED;
    cipher
        .iter()
        .map(|&c| {
            let p = key ^ c;
            key = c;
            p
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RelayReply {
    system: RelaySystem,
}

#[derive(Debug, Deserialize)]
struct RelaySystem {
    set_relay_state: ErrCode,
}

#[derive(Debug, Deserialize)]
struct ErrCode {
    err_code: i32,
}

#[derive(Debug, Deserialize)]
struct SysinfoReply {
    system: SysinfoSystem,
}

#[derive(Debug, Deserialize)]
struct SysinfoSystem {
    get_sysinfo: Sysinfo,
}

#[derive(Debug, Deserialize)]
struct Sysinfo {
    err_code: i32,
    relay_state: u8,
    alias: Option<String>,
}

/// TP-Link style smart plug switching the conveyor supply.
pub struct SmartPlugBelt {
    host: String,
    port: u16,
    timeout: Duration,
    state: BeltState,
    name: String,
}

impl SmartPlugBelt {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            state: BeltState::Unknown,
            name: format!("plug://{}:{}", host, port),
        }
    }

    fn roundtrip(&self, command: &str) -> Result<Vec<u8>> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("resolve plug host {}", self.host))?
            .next()
            .ok_or_else(|| anyhow!("plug host {} resolved to no address", self.host))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)
            .with_context(|| format!("connect to plug {}", addr))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .context("set plug read timeout")?;
        stream
            .set_write_timeout(Some(self.timeout))
            .context("set plug write timeout")?;

        let payload = encrypt(command.as_bytes());
        stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .context("send plug length prefix")?;
        stream.write_all(&payload).context("send plug command")?;

        let mut len_bytes = [0u8; 4];
        stream
            .read_exact(&mut len_bytes)
            .context("read plug reply length")?;
        let len = u32::from_be_bytes(len_bytes);
        if len == 0 || len > MAX_REPLY_BYTES {
            return Err(anyhow!("implausible plug reply length {}", len));
        }
        let mut cipher = vec![0u8; len as usize];
        stream
            .read_exact(&mut cipher)
            .context("read plug reply body")?;
        Ok(decrypt(&cipher))
    }

    fn set_relay(&mut self, on: bool) -> Result<()> {
        let command = if on { CMD_RELAY_ON } else { CMD_RELAY_OFF };
        let reply = self.roundtrip(command)?;
        let parsed: RelayReply =
            serde_json::from_slice(&reply).context("malformed plug relay reply")?;
        let err = parsed.system.set_relay_state.err_code;
        if err != 0 {
            self.state = BeltState::Unknown;
            return Err(anyhow!("plug rejected relay command, err_code {}", err));
        }
        self.state = if on {
            BeltState::Running
        } else {
            BeltState::Stopped
        };
        Ok(())
    }
}

impl BeltDrive for SmartPlugBelt {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        self.set_relay(true)
    }

    fn stop(&mut self) -> Result<()> {
        self.set_relay(false)
    }

    fn cached_state(&self) -> BeltState {
        self.state
    }

    fn probe(&mut self) -> Result<BeltState> {
        let reply = self.roundtrip(CMD_SYSINFO)?;
        let parsed: SysinfoReply =
            serde_json::from_slice(&reply).context("malformed plug sysinfo reply")?;
        let info = parsed.system.get_sysinfo;
        if info.err_code != 0 {
            return Err(anyhow!("plug sysinfo failed, err_code {}", info.err_code));
        }
        if let Some(alias) = &info.alias {
            log::debug!("plug {} reports alias {:?}", self.name, alias);
        }
        self.state = if info.relay_state == 1 {
            BeltState::Running
        } else {
            BeltState::Stopped
        };
        Ok(self.state)
    }
}

#[derive(Debug, Default)]
struct StubBeltInner {
    state: BeltState,
    starts: usize,
    stops: usize,
    fail_starts: usize,
    fail_stops: usize,
}

/// In-memory belt double. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct StubBelt {
    inner: Arc<Mutex<StubBeltInner>>,
}

impl StubBelt {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubBeltInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `n` stop calls fail.
    pub fn fail_next_stops(&self, n: usize) {
        self.lock().fail_stops = n;
    }

    /// Make the next `n` start calls fail.
    pub fn fail_next_starts(&self, n: usize) {
        self.lock().fail_starts = n;
    }

    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.lock().stops
    }
}

impl BeltDrive for StubBelt {
    fn name(&self) -> &str {
        "stub://belt"
    }

    fn start(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.starts += 1;
        if inner.fail_starts > 0 {
            inner.fail_starts -= 1;
            inner.state = BeltState::Unknown;
            return Err(anyhow!("stub belt start failure"));
        }
        inner.state = BeltState::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.stops += 1;
        if inner.fail_stops > 0 {
            inner.fail_stops -= 1;
            inner.state = BeltState::Unknown;
            return Err(anyhow!("stub belt stop failure"));
        }
        inner.state = BeltState::Stopped;
        Ok(())
    }

    fn cached_state(&self) -> BeltState {
        self.lock().state
    }
}
