//! TCP cache transfer.
//!
//! The side holding a cache connects and pushes: an ASCII header of four
//! newline-terminated lines (`NVCACHE_TRANSFER`, game id, game name,
//! payload size) followed by the raw bytes in 64 KiB chunks. The
//! receiving side runs a listener with a non-blocking accept; once a
//! connection arrives, the stream itself is read in blocking mode.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::path::{Path, PathBuf};

use socket2::{Domain, Protocol, Socket, Type};

use nvshader_core::{NvError, Result};

/// First header line of every transfer stream.
pub const TRANSFER_MAGIC: &str = "NVCACHE_TRANSFER";

/// Copy chunk size.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Parsed transfer header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub game_id: String,
    pub game_name: String,
    pub size_bytes: u64,
}

/// A cache received from a peer, persisted to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCache {
    pub header: TransferHeader,
    /// Where the payload was written.
    pub path: PathBuf,
}

/// Push the file at `path` to a peer's transfer listener.
///
/// Returns the number of payload bytes sent.
pub fn send_cache(
    addr: SocketAddr,
    path: &Path,
    game_id: &str,
    game_name: &str,
) -> Result<u64> {
    let size = std::fs::metadata(path)?.len();
    let stream = TcpStream::connect(addr).map_err(|err| NvError::ConnectFailed {
        addr: addr.to_string(),
        source: err,
    })?;
    let mut writer = BufWriter::new(stream);

    let header = format!("{TRANSFER_MAGIC}\n{game_id}\n{game_name}\n{size}\n");
    writer
        .write_all(header.as_bytes())
        .map_err(NvError::SendFailed)?;

    let mut reader = File::open(path)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).map_err(NvError::SendFailed)?;
        sent += n as u64;
    }
    writer.flush().map_err(NvError::SendFailed)?;

    tracing::info!(addr = %addr, game_id, bytes = sent, "cache sent");
    Ok(sent)
}

/// Read one transfer stream: four header lines, then exactly
/// `size_bytes` of payload, written into `dest_dir`.
pub fn receive_cache(stream: TcpStream, dest_dir: &Path) -> Result<ReceivedCache> {
    let mut reader = BufReader::new(stream);
    let header = read_header(&mut reader)?;

    std::fs::create_dir_all(dest_dir)?;
    let path = dest_dir.join(received_filename(&header.game_id));
    let mut out = BufWriter::new(File::create(&path)?);

    let mut remaining = header.size_bytes;
    let mut buf = vec![0u8; CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            return Err(NvError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "transfer stream ended before the announced size",
            )));
        }
        out.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    out.flush()?;

    tracing::info!(game_id = %header.game_id, bytes = header.size_bytes, path = %path.display(), "cache received");
    Ok(ReceivedCache { header, path })
}

/// Receives caches pushed by peers.
pub struct TransferListener {
    listener: TcpListener,
    dest_dir: PathBuf,
}

impl TransferListener {
    /// Bind the transfer port (with address reuse) and store payloads
    /// into `dest_dir`.
    pub fn bind(port: u16, dest_dir: impl Into<PathBuf>) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(NvError::SocketCreateFailed)?;
        socket
            .set_reuse_address(true)
            .map_err(NvError::SocketCreateFailed)?;
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket.bind(&addr.into()).map_err(NvError::BindFailed)?;
        socket.listen(8).map_err(NvError::ListenFailed)?;
        socket
            .set_nonblocking(true)
            .map_err(NvError::SocketCreateFailed)?;

        Ok(Self {
            listener: socket.into(),
            dest_dir: dest_dir.into(),
        })
    }

    /// The bound local address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and read one pending transfer without blocking.
    ///
    /// Returns `Ok(None)` when no connection is waiting. A connection
    /// that fails mid-stream is logged and reported as `None`; the
    /// listener stays usable.
    pub fn poll(&mut self) -> Result<Option<ReceivedCache>> {
        let (stream, from) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) => return Err(NvError::Io(err)),
        };
        tracing::debug!(from = %from, "incoming transfer");

        // The accepted stream inherits non-blocking mode; reads of the
        // body are done blocking.
        stream.set_nonblocking(false)?;
        match receive_cache(stream, &self.dest_dir) {
            Ok(received) => Ok(Some(received)),
            Err(err) => {
                tracing::warn!(from = %from, error = %err, "transfer failed");
                Ok(None)
            }
        }
    }
}

fn read_header(reader: &mut impl std::io::BufRead) -> Result<TransferHeader> {
    let mut lines = Vec::with_capacity(4);
    for _ in 0..4 {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Err(NvError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "transfer stream ended inside the header",
            )));
        }
        lines.push(line.trim_end_matches('\n').to_string());
    }

    if lines[0] != TRANSFER_MAGIC {
        return Err(NvError::InvalidManifest(format!(
            "bad transfer magic: {}",
            lines[0]
        )));
    }
    let size_bytes = lines[3]
        .parse()
        .map_err(|_| NvError::InvalidManifest(format!("bad transfer size: {}", lines[3])))?;

    Ok(TransferHeader {
        game_id: lines[1].clone(),
        game_name: lines[2].clone(),
        size_bytes,
    })
}

// Game ids contain `:`; keep received filenames flat and shell-safe.
fn received_filename(game_id: &str) -> String {
    let safe: String = game_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}.foz")
}
