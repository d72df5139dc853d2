use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::WalletdError;
use crate::vault::VaultRecord;

/// Durable storage medium for the single vault record (external
/// collaborator; the browser-storage adapter implements this in the real
/// host).
pub trait VaultBackend: Send + Sync {
    fn load(&self) -> Result<Option<VaultRecord>, WalletdError>;
    fn store(&self, record: &VaultRecord) -> Result<(), WalletdError>;
}

/// File-backed implementation: one JSON document, written atomically via a
/// temp file and rename.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl VaultBackend for FileBackend {
    fn load(&self) -> Result<Option<VaultRecord>, WalletdError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WalletdError::Internal(format!("vault read: {e}"))),
        };
        let record = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| WalletdError::Internal(format!("vault parse: {e}")))?;
        Ok(Some(record))
    }

    fn store(&self, record: &VaultRecord) -> Result<(), WalletdError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| WalletdError::Internal(format!("vault mkdir: {e}")))?;
            }
        }

        let temp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&temp_path)
                .map_err(|e| WalletdError::Internal(format!("vault create: {e}")))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, record)
                .map_err(|e| WalletdError::Internal(format!("vault serialize: {e}")))?;
            writer
                .flush()
                .map_err(|e| WalletdError::Internal(format!("vault flush: {e}")))?;
        }

        fs::rename(&temp_path, &self.path)
            .map_err(|e| WalletdError::Internal(format!("vault rename: {e}")))
    }
}

/// In-memory implementation for tests.
pub struct MemoryBackend {
    record: Mutex<Option<VaultRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            record: Mutex::new(None),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultBackend for MemoryBackend {
    fn load(&self) -> Result<Option<VaultRecord>, WalletdError> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn store(&self, record: &VaultRecord) -> Result<(), WalletdError> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        Ok(())
    }
}
