//! Incremental archive encoder.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::Manifest;

pub const MANIFEST_PATH: &str = "manifest.json";

type Compressor = zstd::stream::write::Encoder<'static, Vec<u8>>;

/// Builds a `tar.zst` archive one entry at a time.
///
/// Compressed output accumulates in an internal buffer that the caller
/// drains with [`ArchiveWriter::take_chunk`] after each entry, so memory use
/// is bounded by the largest entry rather than by the archive.
pub struct ArchiveWriter {
    builder: tar::Builder<Compressor>,
    mtime: u64,
    entries: usize,
}

impl ArchiveWriter {
    /// `exported_at` becomes the mtime of every entry.
    pub fn new(compression_level: i32, exported_at: DateTime<Utc>) -> Result<Self> {
        let encoder = zstd::stream::write::Encoder::new(Vec::new(), compression_level)
            .map_err(|e| Error::Format(format!("Zstd encoder creation failed: {}", e)))?;
        let mut builder = tar::Builder::new(encoder);
        builder.mode(tar::HeaderMode::Deterministic);
        Ok(Self {
            builder,
            mtime: exported_at.timestamp().max(0) as u64,
            entries: 0,
        })
    }

    /// Write the manifest. Must be the first entry.
    pub fn append_manifest(&mut self, manifest: &Manifest) -> Result<()> {
        if self.entries != 0 {
            return Err(Error::Format(
                "manifest.json must be the first archive entry".to_string(),
            ));
        }
        let json = serde_json::to_vec_pretty(manifest)?;
        self.append(MANIFEST_PATH, &json)
    }

    /// Append a regular file entry.
    pub fn append(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);

        // append_data writes a long-name extension when the path does not fit
        self.builder
            .append_data(&mut header, path, data)
            .map_err(|e| Error::Format(format!("Archive append failed for {}: {}", path, e)))?;
        self.entries += 1;
        Ok(())
    }

    /// Compressed bytes produced since the last call. May be empty.
    pub fn take_chunk(&mut self) -> Bytes {
        Bytes::from(std::mem::take(self.builder.get_mut().get_mut()))
    }

    /// Write the tar trailer, end the zstd frame and return the remaining bytes.
    pub fn finish(self) -> Result<Bytes> {
        let encoder = self
            .builder
            .into_inner()
            .map_err(|e| Error::Format(format!("Archive finalization failed: {}", e)))?;
        let tail = encoder
            .finish()
            .map_err(|e| Error::Format(format!("Zstd finalization failed: {}", e)))?;
        Ok(Bytes::from(tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn unpack(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let decoder = zstd::stream::read::Decoder::new(bytes).unwrap();
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().to_string();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (path, data)
            })
            .collect()
    }

    #[test]
    fn test_chunks_concatenate_to_valid_archive() {
        let mut writer = ArchiveWriter::new(3, Utc::now()).unwrap();
        let mut out = Vec::new();

        writer
            .append_manifest(&Manifest::new("test", Utc::now()))
            .unwrap();
        out.extend_from_slice(&writer.take_chunk());
        writer.append("data/people.json", b"[]").unwrap();
        out.extend_from_slice(&writer.take_chunk());
        writer
            .append("photos/p1/portrait.jpg", &[0xffu8; 4096])
            .unwrap();
        out.extend_from_slice(&writer.take_chunk());
        out.extend_from_slice(&writer.finish().unwrap());

        let entries = unpack(&out);
        let paths: Vec<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec!["manifest.json", "data/people.json", "photos/p1/portrait.jpg"]
        );
        assert_eq!(entries[2].1.len(), 4096);
    }

    #[test]
    fn test_manifest_must_come_first() {
        let mut writer = ArchiveWriter::new(3, Utc::now()).unwrap();
        writer.append("data/people.json", b"[]").unwrap();
        let err = writer
            .append_manifest(&Manifest::new("test", Utc::now()))
            .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_long_photo_names_survive() {
        let name = format!("{}.jpg", "n".repeat(150));
        let path = format!("photos/person-with-a-long-id/{}", name);
        let mut writer = ArchiveWriter::new(1, Utc::now()).unwrap();
        writer.append(&path, b"x").unwrap();
        let bytes = writer.finish().unwrap();

        let entries = unpack(&bytes);
        assert_eq!(entries[0].0, path);
    }
}
