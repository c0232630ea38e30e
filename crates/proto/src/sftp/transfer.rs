//! Composite client operations.
//!
//! Directory listing and chunked file transfer built from the request
//! primitives on [`SftpClient`]. Transfers are strictly sequential: one READ
//! or WRITE in flight per transfer, each bounded by the client's block
//! limits. Dropping a transfer future cancels it at the next request.

use super::client::{SftpClient, SftpHandle};
use super::logging;
use super::types::{NameEntry, OpenFlags};
use bytes::Bytes;
use sftpws_platform::SftpWsResult;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Progress of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes moved so far
    pub transferred: u64,
    /// Expected total, when known
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Returns the completed fraction in `0.0..=1.0`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.transferred as f64 / total as f64),
            None => None,
        }
    }
}

impl SftpClient {
    /// Closes `handle` after `result`. A close failure only surfaces when
    /// the operation itself succeeded.
    async fn finish<T>(&self, handle: &SftpHandle, result: SftpWsResult<T>) -> SftpWsResult<T> {
        match result {
            Ok(value) => {
                self.close(handle).await?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.close(handle).await;
                Err(e)
            }
        }
    }

    /// Lists every entry of a remote directory.
    pub async fn list(&self, path: &str) -> SftpWsResult<Vec<NameEntry>> {
        let handle = self.opendir(path).await?;
        let result = async {
            let mut entries = Vec::new();
            while let Some(batch) = self.readdir(&handle).await? {
                entries.extend(batch);
            }
            Ok(entries)
        }
        .await;
        self.finish(&handle, result).await
    }

    /// Downloads a remote file into `writer`. Returns the bytes written.
    pub async fn download<W, P>(
        &self,
        path: &str,
        writer: &mut W,
        mut progress: P,
    ) -> SftpWsResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
        P: FnMut(TransferProgress),
    {
        let handle = self.open(path, OpenFlags::READ, None).await?;
        let result = async {
            let total = self.fstat(&handle).await?.size;
            let mut position = 0u64;

            while total.map_or(true, |size| position < size) {
                let mut length = self.config().max_read_block_length;
                if let Some(size) = total {
                    length = length.min((size - position).min(u32::MAX as u64) as u32);
                }

                let data = self.read(&handle, position, length).await?;
                if data.is_empty() {
                    break;
                }
                writer.write_all(&data).await?;
                position += data.len() as u64;

                logging::transfer_progress(path, position, total);
                progress(TransferProgress {
                    transferred: position,
                    total,
                });
            }

            writer.flush().await?;
            Ok(position)
        }
        .await;
        self.finish(&handle, result).await
    }

    /// Reads a whole remote file into memory.
    pub async fn read_file(&self, path: &str) -> SftpWsResult<Bytes> {
        let mut buf = Vec::new();
        self.download(path, &mut buf, |_| {}).await?;
        Ok(Bytes::from(buf))
    }

    /// Uploads `reader` to a remote file. Returns the bytes written.
    ///
    /// With `append` the upload starts at the current remote size, otherwise
    /// the remote file is truncated. `total` is only used for progress
    /// reporting.
    pub async fn upload<R, P>(
        &self,
        reader: &mut R,
        path: &str,
        total: Option<u64>,
        append: bool,
        mut progress: P,
    ) -> SftpWsResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        P: FnMut(TransferProgress),
    {
        let flags = if append {
            OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::APPEND
        } else {
            OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC
        };

        let handle = self.open(path, flags, None).await?;
        let result = async {
            let mut position = if append {
                self.fstat(&handle).await?.size.unwrap_or(0)
            } else {
                0
            };
            let mut transferred = 0u64;
            let mut buf = vec![0u8; self.config().max_write_block_length as usize];

            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                self.write(&handle, position, &buf[..n]).await?;
                position += n as u64;
                transferred += n as u64;

                logging::transfer_progress(path, transferred, total);
                progress(TransferProgress { transferred, total });
            }
            Ok(transferred)
        }
        .await;
        self.finish(&handle, result).await
    }

    /// Replaces a remote file with `data`.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> SftpWsResult<u64> {
        let mut reader = data;
        self.upload(&mut reader, path, Some(data.len() as u64), false, |_| {})
            .await
    }
}
