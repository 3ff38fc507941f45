//! Archive layering: tar, then optional gzip, then optional encryption.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};

use crate::core::TransferStage;

use super::crypto::{DecryptReader, EncryptWriter};

pub const METADATA_ENTRY: &str = "metadata.json";
pub const ASSET_METADATA_DIR: &str = "assets/metadata";
pub const ASSET_UPLOADS_DIR: &str = "assets/uploads";

/// Directory of a stage inside the archive.
pub fn stage_dir(stage: TransferStage) -> &'static str {
    match stage {
        TransferStage::Schemas => "schemas",
        TransferStage::Entities => "entities",
        TransferStage::Links => "links",
        TransferStage::Configuration => "configuration",
        TransferStage::Media => "assets",
    }
}

/// Path of the `index`-th JSONL entry of a stage (1-based).
pub fn jsonl_entry(stage: TransferStage, index: u32) -> String {
    let dir = stage_dir(stage);
    format!("{}/{}_{:05}.jsonl", dir, dir, index)
}

/// `<base>.tar[.gz][.enc]`
pub fn archive_file_name(base: &Path, compress: bool, encrypt: bool) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".tar");
    if compress {
        name.push(".gz");
    }
    if encrypt {
        name.push(".enc");
    }
    PathBuf::from(name)
}

/// Compression and encryption flags implied by a file name.
pub fn detect_format(path: &Path) -> (bool, bool) {
    let name = path.to_string_lossy();
    let encrypted = name.ends_with(".enc");
    let stem = name.trim_end_matches(".enc");
    let compressed = stem.ends_with(".gz");
    (compressed, encrypted)
}

/// A write layer that must be finalized explicitly.
pub trait FinishWrite: Write + Send {
    fn finish_layers(self: Box<Self>) -> io::Result<()>;
}

impl FinishWrite for BufWriter<File> {
    fn finish_layers(self: Box<Self>) -> io::Result<()> {
        let file = (*self).into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

impl FinishWrite for GzEncoder<Box<dyn FinishWrite>> {
    fn finish_layers(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.finish_layers()
    }
}

impl FinishWrite for EncryptWriter<Box<dyn FinishWrite>> {
    fn finish_layers(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.finish_layers()
    }
}

pub type ArchiveBuilder = Builder<Box<dyn FinishWrite>>;

/// Create `path` (which must not exist) and wrap it in the requested layers.
pub fn create_archive(path: &Path, compress: bool, key: Option<&str>) -> io::Result<ArchiveBuilder> {
    let file = File::options().write(true).create_new(true).open(path)?;
    let mut writer: Box<dyn FinishWrite> = Box::new(BufWriter::new(file));
    if let Some(key) = key {
        writer = Box::new(EncryptWriter::new(writer, key)?);
    }
    if compress {
        writer = Box::new(GzEncoder::new(writer, Compression::default()));
    }
    Ok(Builder::new(writer))
}

/// Append a regular file entry. Long paths use GNU extension headers.
pub fn append_entry<W: Write>(builder: &mut Builder<W>, path: &str, data: &[u8]) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_size(data.len() as u64);
    builder.append_data(&mut header, path, data)
}

/// Finish the tar stream and every layer below it.
pub fn finish_archive(builder: ArchiveBuilder) -> io::Result<()> {
    builder.into_inner()?.finish_layers()
}

/// Open an archive for reading through the layers implied by the flags.
pub fn open_archive(
    path: &Path,
    compressed: bool,
    key: Option<&str>,
) -> io::Result<tar::Archive<Box<dyn Read + Send>>> {
    let file = File::open(path)?;
    let mut reader: Box<dyn Read + Send> = Box::new(BufReader::new(file));
    if let Some(key) = key {
        reader = Box::new(DecryptReader::new(reader, key)?);
    }
    if compressed {
        reader = Box::new(GzDecoder::new(reader));
    }
    Ok(tar::Archive::new(reader))
}

/// Entry path with forward slashes.
pub fn entry_path<R: Read>(entry: &tar::Entry<'_, R>) -> io::Result<String> {
    Ok(entry.path()?.to_string_lossy().replace('\\', "/"))
}
