//! Server and client configuration.

use sftpws_platform::{SftpWsError, SftpWsResult};

/// Default cap on the bytes returned by one READ.
pub const DEFAULT_MAX_READ_LENGTH: u32 = 256 * 1024;

/// Default cap on the bytes sent in one WRITE.
pub const DEFAULT_MAX_WRITE_LENGTH: u32 = 32 * 1024;

/// Server configuration, applied per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpServerConfig {
    /// Real directory that clients see as `/`
    pub virtual_root: String,
    /// Refuse every mutating request
    pub read_only: bool,
    /// Upper bound for the length of a single READ reply
    pub max_read_length: u32,
}

impl Default for SftpServerConfig {
    fn default() -> Self {
        Self {
            virtual_root: "/".to_string(),
            read_only: false,
            max_read_length: DEFAULT_MAX_READ_LENGTH,
        }
    }
}

impl SftpServerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the virtual root.
    pub fn with_virtual_root(mut self, root: impl Into<String>) -> Self {
        self.virtual_root = root.into();
        self
    }

    /// Enables or disables read-only mode.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the maximum READ length.
    pub fn with_max_read_length(mut self, length: u32) -> Self {
        self.max_read_length = length;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> SftpWsResult<()> {
        if !self.virtual_root.starts_with('/') {
            return Err(SftpWsError::Config(format!(
                "virtual_root must be an absolute path, got '{}'",
                self.virtual_root
            )));
        }
        if self.max_read_length == 0 {
            return Err(SftpWsError::Config(
                "max_read_length must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Client configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SftpClientConfig {
    /// Reads longer than this are clamped
    pub max_read_block_length: u32,
    /// Writes longer than this are refused
    pub max_write_block_length: u32,
}

impl Default for SftpClientConfig {
    fn default() -> Self {
        Self {
            max_read_block_length: DEFAULT_MAX_READ_LENGTH,
            max_write_block_length: DEFAULT_MAX_WRITE_LENGTH,
        }
    }
}

impl SftpClientConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum read block length.
    pub fn with_max_read_block_length(mut self, length: u32) -> Self {
        self.max_read_block_length = length;
        self
    }

    /// Sets the maximum write block length.
    pub fn with_max_write_block_length(mut self, length: u32) -> Self {
        self.max_write_block_length = length;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> SftpWsResult<()> {
        if self.max_read_block_length == 0 {
            return Err(SftpWsError::Config(
                "max_read_block_length must be greater than zero".into(),
            ));
        }
        if self.max_write_block_length == 0 {
            return Err(SftpWsError::Config(
                "max_write_block_length must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
