//! Output targets for JSON-line log records.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::LogLevel;

/// File writer that rotates by size, keeping a fixed number of backups.
///
/// Backups are named `<path>.1` (newest) to `<path>.<backups>` (oldest). Rotation
/// happens before a write that would push the active file past `max_bytes`, so a
/// record is never split across files.
#[derive(Debug)]
pub struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: Option<File>,
    written: u64,
}

impl RotatingFileWriter {
    /// Open (or create) `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory or file cannot be created.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backups,
            file: Some(file),
            written,
        })
    }

    /// Path of the active file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        if self.backups == 0 {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.file = Some(file);
            self.written = 0;
            return Ok(());
        }
        let oldest = self.backup_path(self.backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;
        self.file = Some(open_append(&self.path)?);
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let incoming = buf.len() as u64;
        if self.written > 0 && self.written + incoming > self.max_bytes {
            self.rotate()?;
        }
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => {
                self.file = Some(open_append(&self.path)?);
                self.file
                    .as_mut()
                    .ok_or_else(|| io::Error::other("log file unavailable"))?
            }
        };
        file.write_all(buf)?;
        self.written += incoming;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.as_mut().map_or(Ok(()), Write::flush)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Sends each record as one RFC 5424 datagram to a syslog collector over UDP.
///
/// The header carries the priority derived from the facility and the record
/// level; the timestamp and hostname are left nil because the JSON body already
/// holds them. Delivery is fire-and-forget.
#[derive(Debug)]
pub struct SyslogWriter {
    socket: UdpSocket,
    collector: SocketAddr,
    facility: u8,
    app_name: &'static str,
    proc_id: u32,
}

impl SyslogWriter {
    /// Resolve `host:port` and bind an ephemeral local socket of the same family.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the address does not resolve or no socket can be bound.
    pub fn connect(host: &str, port: u16, facility: u8) -> io::Result<Self> {
        let collector = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("syslog host `{host}` did not resolve"))
        })?;
        let local: SocketAddr = if collector.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        Ok(Self {
            socket,
            collector,
            facility,
            app_name: env!("CARGO_PKG_NAME"),
            proc_id: std::process::id(),
        })
    }

    /// Address records are sent to.
    #[must_use]
    pub const fn collector(&self) -> SocketAddr {
        self.collector
    }

    /// Send one record body.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the socket.
    pub fn send(&self, level: LogLevel, body: &[u8]) -> io::Result<()> {
        let body = body.strip_suffix(b"\n").unwrap_or(body);
        let mut datagram = format!(
            "<{}>1 - - {} {} - - ",
            priority(self.facility, level),
            self.app_name,
            self.proc_id
        )
        .into_bytes();
        datagram.extend_from_slice(body);
        self.socket.send_to(&datagram, self.collector).map(|_| ())
    }
}

/// `facility * 8 + severity`, with severities from RFC 5424.
#[must_use]
pub const fn priority(facility: u8, level: LogLevel) -> u8 {
    let severity = match level {
        LogLevel::Error => 3,
        LogLevel::Warn => 4,
        LogLevel::Info => 6,
        LogLevel::Debug | LogLevel::Trace => 7,
    };
    facility * 8 + severity
}

/// Shared in-memory buffer. Clones see the same bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// Written lines, without terminators.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
