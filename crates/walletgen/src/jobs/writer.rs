//! Chunked CSV output and ZIP packaging.

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::chain::Chain;
use crate::derive::WalletInfo;
use crate::error::StorageError;

pub const CSV_HEADER: &str = "index,chain,address,derivation_path,mnemonic";

const ZIP_COMPRESSION_LEVEL: i64 = 6;

/// One open CSV chunk file.
pub struct CsvChunk {
    path: PathBuf,
    out: BufWriter<File>,
    rows: u64,
}

impl CsvChunk {
    /// Creates `wallets_<CHAIN>_<first>_<last>.csv` in `dir` and writes the header.
    pub fn create(dir: &Path, chain: Chain, first: u64, len: u64) -> Result<Self, StorageError> {
        let last = first + len.saturating_sub(1);
        let path = dir.join(format!("wallets_{}_{}_{}.csv", chain.symbol(), first, last));
        let file = File::create(&path).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        let mut chunk = Self {
            path,
            out: BufWriter::new(file),
            rows: 0,
        };
        chunk.write_line(format_args!("{}\n", CSV_HEADER))?;
        Ok(chunk)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn write_row(&mut self, index: u64, wallet: &WalletInfo) -> Result<(), StorageError> {
        self.write_line(format_args!(
            "{},{},{},{},{}\n",
            index,
            wallet.chain.symbol(),
            csv_field(&wallet.address),
            csv_field(&wallet.derivation_path),
            csv_field(&wallet.mnemonic),
        ))?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes and closes the file, returning its path and data row count.
    pub fn finish(mut self) -> Result<(PathBuf, u64), StorageError> {
        self.out
            .flush()
            .and_then(|_| self.out.get_ref().sync_all())
            .map_err(|e| StorageError::WriteFile {
                path: self.path.clone(),
                source: e,
            })?;
        Ok((self.path, self.rows))
    }

    fn write_line(&mut self, line: std::fmt::Arguments<'_>) -> Result<(), StorageError> {
        self.out
            .write_fmt(line)
            .map_err(|e| StorageError::WriteFile {
                path: self.path.clone(),
                source: e,
            })
    }
}

/// Quotes a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Packs `csvs` into `backup_<CHAIN>_<NNN>.zip` archives of `per_archive` files each.
///
/// Entries are stored under their bare file names. Any failure aborts the
/// whole packaging step.
pub fn package_archives(
    work_dir: &Path,
    chain: Chain,
    csvs: &[PathBuf],
    per_archive: usize,
) -> Result<Vec<PathBuf>, StorageError> {
    let per_archive = per_archive.max(1);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(ZIP_COMPRESSION_LEVEL));

    let mut archives = Vec::with_capacity(csvs.len().div_ceil(per_archive));
    for (n, group) in csvs.chunks(per_archive).enumerate() {
        let path = work_dir.join(format!("backup_{}_{:03}.zip", chain.symbol(), n + 1));
        write_archive(&path, group, options)?;
        log::debug!("Packed {} CSV file(s) into {}", group.len(), path.display());
        archives.push(path);
    }
    Ok(archives)
}

fn write_archive(
    path: &Path,
    files: &[PathBuf],
    options: SimpleFileOptions,
) -> Result<(), StorageError> {
    let archive_err = |source| StorageError::Archive {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for csv in files {
        let name = csv
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| StorageError::ReadFile {
                path: csv.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "file name is not UTF-8"),
            })?;
        zip.start_file(name, options).map_err(archive_err)?;
        let mut src = fs::File::open(csv).map_err(|e| StorageError::ReadFile {
            path: csv.clone(),
            source: e,
        })?;
        io::copy(&mut src, &mut zip).map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let mut out = zip.finish().map_err(archive_err)?;
    out.flush().map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}
