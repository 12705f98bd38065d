/// Wire protocol: an 8-byte big-endian length, then exactly that many bytes
/// of file content. One file per connection.
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpListener;

/// Errors that can occur during a transfer.
#[derive(Debug)]
pub enum TransferError {
    /// Failed to open the file being sent.
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to create the destination file.
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The peer closed the connection before sending the full length prefix.
    ShortHeader,
    /// Fewer content bytes arrived (or were read) than the prefix announced.
    ShortBody { expected: u64, transferred: u64 },
    /// Failed to read or write the connection or file.
    Io { source: std::io::Error },
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Open { path, source } => {
                write!(f, "failed to open {}: {}", path.display(), source)
            }
            TransferError::Create { path, source } => {
                write!(f, "failed to create {}: {}", path.display(), source)
            }
            TransferError::ShortHeader => write!(f, "connection closed inside length header"),
            TransferError::ShortBody {
                expected,
                transferred,
            } => write!(
                f,
                "transfer ended early: {} of {} bytes",
                transferred, expected
            ),
            TransferError::Io { source } => write!(f, "I/O error during transfer: {}", source),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Open { source, .. } => Some(source),
            TransferError::Create { source, .. } => Some(source),
            TransferError::Io { source } => Some(source),
            TransferError::ShortHeader | TransferError::ShortBody { .. } => None,
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Io { source: e }
    }
}

/// Write the length prefix and content of the file at `path` to `conn`.
///
/// Returns the number of content bytes sent.
pub async fn send<W>(conn: &mut W, path: &Path) -> Result<u64, TransferError>
where
    W: AsyncWrite + Unpin,
{
    let file = File::open(path).await.map_err(|e| TransferError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    let size = file.metadata().await?.len();

    conn.write_all(&size.to_be_bytes()).await?;
    let sent = tokio::io::copy(&mut file.take(size), conn).await?;
    conn.flush().await?;

    if sent < size {
        return Err(TransferError::ShortBody {
            expected: size,
            transferred: sent,
        });
    }
    tracing::info!(bytes = sent, path = %path.display(), "file sent");
    Ok(sent)
}

/// Read one length-prefixed file from `conn` into `path`, truncating it.
///
/// Returns the number of content bytes written.
pub async fn receive<R>(conn: &mut R, path: &Path) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    match conn.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransferError::ShortHeader);
        }
        Err(e) => return Err(e.into()),
    }
    let size = u64::from_be_bytes(header);
    tracing::debug!(size, "length header received");

    let file = File::create(path).await.map_err(|e| TransferError::Create {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut dst = BufWriter::new(file);
    let received = tokio::io::copy(&mut (&mut *conn).take(size), &mut dst).await?;
    dst.flush().await?;

    if received < size {
        return Err(TransferError::ShortBody {
            expected: size,
            transferred: received,
        });
    }
    tracing::info!(bytes = received, path = %path.display(), "file received");
    Ok(received)
}

/// Delay before retrying a failed accept.
///
/// Returns `initial * 2^consecutive`, capped at `max`.
pub fn accept_backoff(initial: Duration, consecutive: u32, max: Duration) -> Duration {
    let shift = 1u32.checked_shl(consecutive).unwrap_or(u32::MAX);
    initial.saturating_mul(shift).min(max)
}

const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Accept connections one at a time, writing each received file to `out`,
/// until `shutdown` completes.
///
/// A failed transfer is logged and the server keeps accepting.
pub async fn serve<F>(listener: TcpListener, out: &Path, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut consecutive_errors = 0u32;

    loop {
        tracing::info!("waiting for connection");
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((mut stream, peer)) => {
                    consecutive_errors = 0;
                    tracing::info!(%peer, "connected");
                    if let Err(e) = receive(&mut stream, out).await {
                        tracing::warn!(%peer, error = %e, "receive failed");
                    }
                }
                Err(e) => {
                    let delay = accept_backoff(
                        ACCEPT_BACKOFF_INITIAL,
                        consecutive_errors,
                        ACCEPT_BACKOFF_MAX,
                    );
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "accept failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            },
        }
    }
}
