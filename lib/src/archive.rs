//! Jar reading and writing

use crate::Result;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// One file inside an archive
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> ArchiveEntry {
        ArchiveEntry {
            name: name.into(),
            data,
        }
    }

    pub fn is_class(&self) -> bool {
        self.name.ends_with(".class")
    }
}

/// Read every file entry (directories are skipped) in archive order
pub fn read_archive(path: &Path) -> Result<Vec<ArchiveEntry>> {
    read_entries(File::open(path)?)
}

pub fn read_entries<R: Read + Seek>(reader: R) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut entries = Vec::with_capacity(archive.len());
    for idx in 0..archive.len() {
        let mut file = archive.by_index(idx)?;
        if file.is_dir() {
            continue;
        }
        let mut data = vec![];
        file.read_to_end(&mut data)?;
        entries.push(ArchiveEntry::new(file.name(), data));
    }
    Ok(entries)
}

/// Writes output archives, skipping repeated entry names
pub struct ArchiveWriter<W: Write + Seek> {
    writer: ZipWriter<W>,
    written: HashSet<String>,
}

impl ArchiveWriter<File> {
    pub fn create(path: &Path) -> Result<ArchiveWriter<File>> {
        Ok(ArchiveWriter::new(File::create(path)?))
    }
}

impl ArchiveWriter<NamedTempFile> {
    /// Archive written to a temporary file in the directory of `path`
    ///
    /// Nothing shows up at `path` until [`Self::persist`] succeeds. Dropping the writer before
    /// that deletes the temporary file.
    pub fn create_beside(path: &Path) -> Result<ArchiveWriter<NamedTempFile>> {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        Ok(ArchiveWriter::new(NamedTempFile::new_in(directory)?))
    }

    /// Finish the archive and move it to `path`, replacing whatever is there
    pub fn persist(self, path: &Path) -> Result<()> {
        let file = self.finish()?;
        file.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl<W: Write + Seek> ArchiveWriter<W> {
    pub fn new(inner: W) -> ArchiveWriter<W> {
        ArchiveWriter {
            writer: ZipWriter::new(inner),
            written: HashSet::new(),
        }
    }

    /// Add an entry
    ///
    /// Returns `false` (and writes nothing) if an entry with the same name was already written.
    pub fn add(&mut self, name: &str, data: &[u8]) -> Result<bool> {
        if !self.written.insert(name.to_owned()) {
            log::warn!("Duplicate entry: {}", name);
            return Ok(false);
        }
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.writer.start_file(name, options)?;
        self.writer.write_all(data)?;
        Ok(true)
    }

    /// Copy every entry of another archive into this one
    pub fn merge(&mut self, path: &Path) -> Result<()> {
        log::info!("Extracting jar: {}", path.display());
        for entry in read_archive(path)? {
            self.add(&entry.name, &entry.data)?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<W> {
        Ok(self.writer.finish()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn duplicates_are_skipped() {
        let mut writer = ArchiveWriter::new(Cursor::new(vec![]));
        assert!(writer.add("a/B.class", &[1, 2, 3]).unwrap());
        assert!(writer.add("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n").unwrap());
        assert!(!writer.add("a/B.class", &[9]).unwrap());
        let bytes = writer.finish().unwrap().into_inner();

        let entries = read_entries(Cursor::new(bytes)).unwrap();
        assert_eq!(
            entries,
            vec![
                ArchiveEntry::new("a/B.class", vec![1, 2, 3]),
                ArchiveEntry::new("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec()),
            ]
        );
        assert!(entries[0].is_class());
    }

    #[test]
    fn output_appears_only_when_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jar");

        let mut abandoned = ArchiveWriter::create_beside(&output).unwrap();
        abandoned.add("a/B.class", &[1]).unwrap();
        drop(abandoned);
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let mut writer = ArchiveWriter::create_beside(&output).unwrap();
        writer.add("a/B.class", &[1]).unwrap();
        writer.persist(&output).unwrap();
        assert_eq!(read_archive(&output).unwrap().len(), 1);
    }
}
