//! Error taxonomy for the toolkit core.
//!
//! `ActError` is the single tagged error type shared by the connection, shell-protocol,
//! archive, and upload layers. Variants are grouped by the taxonomy's categories so retry
//! and exit-code logic can pattern-match on kind rather than string content.

#[derive(Debug, Clone)]
pub enum MkdirError {
    ExistsAsFile(std::path::PathBuf),
    SftpError(std::path::PathBuf, String),
}

impl std::fmt::Display for MkdirError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MkdirError::ExistsAsFile(p) => {
                write!(f, "path exists as a file, expected a directory: {}", display_path(p))
            }
            MkdirError::SftpError(p, msg) => {
                write!(f, "failed to create remote directory {}: {}", display_path(p), msg)
            }
        }
    }
}

impl std::error::Error for MkdirError {}

fn display_path(p: &std::path::Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

/// The toolkit's single tagged error type. Variants are grouped by category.
#[derive(Debug, Clone)]
pub enum ActError {
    // --- Validation ---
    InvalidSlot(u32),
    UnsupportedExtension(String),
    MissingFile(String),
    InvalidDipEntry(String),

    // --- Authentication ---
    CredentialsMissing(String),
    AddressBookEntryIncomplete(String),

    // --- Transient network / connection ---
    ConnectFailed(String, String),
    HandshakeFailed(String, String),
    AuthFailed(String),
    ChannelLost(&'static str),
    ReconnectExhausted(&'static str, u32),
    ReconnectDisabled(&'static str),

    // --- SFTP / IO ---
    Sftp(String),
    Mkdir(MkdirError),
    Io(String),

    // --- Per-file upload failure ---
    UploadFailed(String, String),

    // --- Manifest / archive ---
    ManifestEmbedFailed(String),
    ArchiveExtractFailed(String),
    DipParseFailed(String),

    // --- Protocol (shell command pattern match failure) ---
    Protocol(String, String),

    Other(String),
}

impl std::fmt::Display for ActError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ActError::*;
        match self {
            InvalidSlot(s) => write!(f, "slot must be in [1,10], got {}", s),
            UnsupportedExtension(ext) => {
                write!(f, "unsupported program package extension: {}", ext)
            }
            MissingFile(p) => write!(f, "file not found: {}", p),
            InvalidDipEntry(msg) => write!(f, "invalid .dip entry: {}", msg),
            CredentialsMissing(who) => {
                write!(f, "no credentials for '{}' and no matching address-book entry", who)
            }
            AddressBookEntryIncomplete(alias) => {
                write!(f, "address-book entry '{}' is missing credentials", alias)
            }
            ConnectFailed(host, detail) => write!(f, "failed to connect to {}: {}", host, detail),
            HandshakeFailed(host, detail) => {
                write!(f, "SSH handshake with {} failed: {}", host, detail)
            }
            AuthFailed(host) => write!(f, "authentication failed for {}", host),
            ChannelLost(channel) => write!(f, "{} channel lost connection", channel),
            ReconnectExhausted(channel, attempts) => {
                write!(f, "{} channel failed to reconnect after {} attempt(s)", channel, attempts)
            }
            ReconnectDisabled(channel) => {
                write!(f, "{} channel connect failed and reconnection is disabled", channel)
            }
            Sftp(msg) => write!(f, "SFTP error: {}", msg),
            Mkdir(e) => write!(f, "{}", e),
            Io(msg) => write!(f, "I/O error: {}", msg),
            UploadFailed(path, detail) => write!(f, "upload failed for {}: {}", path, detail),
            ManifestEmbedFailed(msg) => write!(f, "failed to embed hash manifest: {}", msg),
            ArchiveExtractFailed(msg) => write!(f, "failed to extract archive: {}", msg),
            DipParseFailed(msg) => write!(f, "failed to parse .dip file: {}", msg),
            Protocol(command, output_tail) => {
                write!(f, "device did not confirm '{}' (last output: {})", command, output_tail)
            }
            Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ActError {}

impl From<MkdirError> for ActError {
    fn from(e: MkdirError) -> Self {
        ActError::Mkdir(e)
    }
}

impl From<std::io::Error> for ActError {
    fn from(e: std::io::Error) -> Self {
        ActError::Io(e.to_string())
    }
}

impl ActError {
    /// Whether a failure of this kind is retriable before any transfer bytes have moved
    /// (connection/handshake-class failures).
    pub fn is_retriable_pre_transfer(&self) -> bool {
        matches!(self, ActError::ConnectFailed(..) | ActError::HandshakeFailed(..) | ActError::ChannelLost(_) | ActError::Sftp(_))
    }

    /// Whether a failure observed mid-transfer should trigger the worker's
    /// session-reset-and-retry path rather than an immediate hard failure.
    pub fn is_retriable_during_transfer(&self) -> bool {
        match self {
            ActError::ChannelLost(_) | ActError::Sftp(_) | ActError::Io(_) => true,
            ActError::UploadFailed(_, detail) => {
                let d = detail.to_lowercase();
                d.contains("connection reset")
                    || d.contains("broken pipe")
                    || d.contains("connection aborted")
                    || d.contains("eof")
            }
            _ => false,
        }
    }

    /// Maps the error onto the toolkit's normative process exit codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            ActError::CredentialsMissing(_) => 101,
            ActError::AddressBookEntryIncomplete(_) => 102,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, ActError>;
