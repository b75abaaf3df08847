use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use walletgen::{ProgressSink, SinkError};

/// Prints status lines to stderr and copies delivered archives to `out_dir`.
pub struct ConsoleSink {
    out_dir: PathBuf,
    delivered: Mutex<Vec<PathBuf>>,
}

impl ConsoleSink {
    pub fn new(out_dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered(&self) -> Vec<PathBuf> {
        match self.delivered.lock() {
            Ok(files) => files.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for ConsoleSink {
    fn update(&self, _job_id: &str, text: &str) -> Result<(), SinkError> {
        eprintln!("{}", text);
        Ok(())
    }

    fn deliver_file(&self, _job_id: &str, path: &Path, caption: &str) -> Result<(), SinkError> {
        let name = path
            .file_name()
            .ok_or_else(|| SinkError::Unavailable(format!("no file name in {}", path.display())))?;
        let dest = self.out_dir.join(name);
        fs::copy(path, &dest).map_err(|e| SinkError::Delivery {
            path: dest.clone(),
            source: e,
        })?;
        eprintln!("{} -> {}", caption, dest.display());

        match self.delivered.lock() {
            Ok(mut files) => files.push(dest),
            Err(poisoned) => poisoned.into_inner().push(dest),
        }
        Ok(())
    }
}
