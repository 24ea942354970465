//! Bounded, path-checked archive decoder.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read};
use std::path::{Component, Path};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use heirloom_storage::{sanitize_component, StoragePath};
use serde_json::Value;
use tracing::{debug, warn};

use super::writer::MANIFEST_PATH;
use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::model::{sha256_hex, Collection, Dataset, Manifest, SUPPORTED_SCHEMA_VERSIONS};

/// Size ceilings enforced while decoding.
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    /// Compressed bytes accepted from the input stream.
    pub max_archive_bytes: u64,
    /// Decompressed bytes accepted from the tar stream.
    pub max_unpacked_bytes: u64,
}

impl From<&ArchiveConfig> for DecodeLimits {
    fn from(config: &ArchiveConfig) -> Self {
        Self {
            max_archive_bytes: config.max_archive_bytes,
            max_unpacked_bytes: config.max_unpacked_bytes,
        }
    }
}

impl Default for DecodeLimits {
    fn default() -> Self {
        DecodeLimits::from(&ArchiveConfig::default())
    }
}

/// A photo entry, `photos/<person_id>/<filename>`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoAsset {
    pub person_id: String,
    pub filename: String,
    pub data: Bytes,
}

impl PhotoAsset {
    pub fn archive_path(&self) -> String {
        format!("photos/{}/{}", self.person_id, self.filename)
    }

    pub fn storage_path(&self) -> StoragePath {
        StoragePath::photo(self.person_id.clone(), self.filename.clone())
    }

    pub fn sha256(&self) -> String {
        sha256_hex(&self.data)
    }
}

/// Everything a decoded archive contains.
#[derive(Debug, Clone)]
pub struct ParsedArchive {
    pub manifest: Manifest,
    pub dataset: Dataset,
    /// Sorted by archive path.
    pub photos: Vec<PhotoAsset>,
    /// Size of the compressed input.
    pub archive_bytes: u64,
}

/// Read a byte stream (bounded by `limits.max_archive_bytes`) and decode it.
///
/// Reading stops as soon as the ceiling is crossed, so an oversized upload
/// is never buffered in full.
pub async fn decode<S, E>(stream: S, limits: DecodeLimits) -> Result<ParsedArchive>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: Into<Error>,
{
    let raw = read_limited(stream, limits.max_archive_bytes).await?;
    tokio::task::spawn_blocking(move || decode_bytes(&raw, limits))
        .await
        .map_err(|e| Error::Format(format!("Archive decoder task failed: {}", e)))?
}

async fn read_limited<S, E>(stream: S, max_bytes: u64) -> Result<Bytes>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: Into<Error>,
{
    futures::pin_mut!(stream);
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| -> Error { e.into() })?;
        if (buf.len() + chunk.len()) as u64 > max_bytes {
            return Err(Error::Format(format!(
                "Archive exceeds the maximum size of {} bytes",
                max_bytes
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Decode an archive that is already in memory.
pub fn decode_bytes(raw: &[u8], limits: DecodeLimits) -> Result<ParsedArchive> {
    if raw.len() as u64 > limits.max_archive_bytes {
        return Err(Error::Format(format!(
            "Archive exceeds the maximum size of {} bytes",
            limits.max_archive_bytes
        )));
    }

    let decoder = zstd::stream::read::Decoder::with_buffer(raw)
        .map_err(|e| Error::Format(format!("Zstd decoder creation failed: {}", e)))?;
    let mut archive = tar::Archive::new(CappedReader::new(decoder, limits.max_unpacked_bytes));

    let mut manifest: Option<Manifest> = None;
    let mut data_files: BTreeMap<Collection, Vec<u8>> = BTreeMap::new();
    let mut photos: BTreeMap<String, PhotoAsset> = BTreeMap::new();

    let entries = archive
        .entries()
        .map_err(|e| Error::Format(format!("Cannot read archive entries: {}", e)))?;

    for (index, entry) in entries.enumerate() {
        let mut entry =
            entry.map_err(|e| Error::Format(format!("Archive entry read failed: {}", e)))?;
        let path = checked_entry_path(&entry.path_bytes())?;
        let entry_type = entry.header().entry_type();

        if index == 0 && path != MANIFEST_PATH {
            return Err(Error::Format(
                "manifest.json is missing or not the first entry".to_string(),
            ));
        }
        if entry_type.is_dir() {
            continue;
        }
        if !entry_type.is_file() {
            return Err(Error::Format(format!(
                "Unsupported entry type {:?} for {}",
                entry_type, path
            )));
        }
        if entry.size() > limits.max_unpacked_bytes {
            return Err(Error::Format(format!(
                "Entry {} exceeds the maximum unpacked size of {} bytes",
                path, limits.max_unpacked_bytes
            )));
        }

        if path == MANIFEST_PATH {
            if manifest.is_some() {
                return Err(Error::Format("Duplicate manifest.json entry".to_string()));
            }
            let data = read_entry(&mut entry, &path)?;
            manifest = Some(parse_manifest(&data)?);
        } else if let Some(collection) = Collection::from_data_path(&path) {
            let data = read_entry(&mut entry, &path)?;
            if data_files.insert(collection, data).is_some() {
                return Err(Error::Format(format!("Duplicate archive entry {}", path)));
            }
        } else if let Some(rest) = path.strip_prefix("photos/") {
            let (person_id, filename) = photo_components(rest, &path)?;
            let data = read_entry(&mut entry, &path)?;
            let asset = PhotoAsset {
                person_id,
                filename,
                data: Bytes::from(data),
            };
            if photos.insert(path.clone(), asset).is_some() {
                return Err(Error::Format(format!("Duplicate archive entry {}", path)));
            }
        } else {
            warn!(entry = %path, "Skipping unknown archive entry");
        }
    }

    let manifest = manifest
        .ok_or_else(|| Error::Format("manifest.json is missing".to_string()))?;
    verify_checksums(&manifest, &data_files)?;

    let mut dataset = Dataset::default();
    for collection in Collection::ALL {
        match data_files.get(&collection) {
            Some(data) => dataset
                .set_collection_json(collection, data)
                .map_err(|e| {
                    Error::Format(format!("{} is not valid: {}", collection.data_path(), e))
                })?,
            None if collection.is_optional() => {}
            None => {
                return Err(Error::Format(format!(
                    "{} is missing",
                    collection.data_path()
                )))
            }
        }
    }

    debug!(
        entries = data_files.len() + photos.len() + 1,
        photos = photos.len(),
        "Decoded archive"
    );

    Ok(ParsedArchive {
        manifest,
        dataset,
        photos: photos.into_values().collect(),
        archive_bytes: raw.len() as u64,
    })
}

/// Parse `manifest.json`, checking the schema version before the rest of
/// the structure so a newer archive reports a version error rather than a
/// shape mismatch.
fn parse_manifest(data: &[u8]) -> Result<Manifest> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| Error::Format(format!("manifest.json is not valid JSON: {}", e)))?;
    let found = value
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Format("manifest.json has no schemaVersion".to_string()))?;
    if !SUPPORTED_SCHEMA_VERSIONS
        .iter()
        .any(|v| u64::from(*v) == found)
    {
        return Err(Error::Version {
            found,
            supported: SUPPORTED_SCHEMA_VERSIONS.to_vec(),
        });
    }
    serde_json::from_value(value)
        .map_err(|e| Error::Format(format!("manifest.json is malformed: {}", e)))
}

/// Every data file needs a matching checksum, and every checksum a file.
fn verify_checksums(manifest: &Manifest, data_files: &BTreeMap<Collection, Vec<u8>>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for (collection, data) in data_files {
        let key = collection.data_path();
        let expected = manifest
            .checksums
            .get(&key)
            .ok_or_else(|| Error::Format(format!("No checksum recorded for {}", key)))?;
        if *expected != sha256_hex(data) {
            return Err(Error::Format(format!("Checksum mismatch for {}", key)));
        }
        seen.insert(key);
    }
    if let Some(missing) = manifest.checksums.keys().find(|k| !seen.contains(*k)) {
        return Err(Error::Format(format!(
            "{} is listed in the manifest but missing from the archive",
            missing
        )));
    }
    Ok(())
}

/// Reject anything that is not a plain relative path of normal components.
fn checked_entry_path(raw: &[u8]) -> Result<String> {
    let path = std::str::from_utf8(raw)
        .map_err(|_| Error::Format("Archive entry path is not valid UTF-8".to_string()))?;
    if path.is_empty() || path.contains('\\') || path.contains('\0') {
        return Err(Error::Format(format!("Unsafe archive entry path {:?}", path)));
    }
    let unsafe_component = Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if unsafe_component || path.starts_with('/') {
        return Err(Error::Format(format!("Unsafe archive entry path {:?}", path)));
    }
    Ok(path.trim_end_matches('/').to_string())
}

/// `rest` is the part after `photos/`; it must be exactly `<person>/<file>`.
fn photo_components(rest: &str, path: &str) -> Result<(String, String)> {
    let mut parts = rest.split('/');
    let (person_id, filename) = match (parts.next(), parts.next(), parts.next()) {
        (Some(person_id), Some(filename), None) => (person_id, filename),
        _ => {
            return Err(Error::Format(format!(
                "Photo entry {} is not photos/<personId>/<filename>",
                path
            )))
        }
    };
    for component in [person_id, filename] {
        sanitize_component(component)
            .map_err(|e| Error::Format(format!("Unsafe photo entry {}: {}", path, e)))?;
    }
    Ok((person_id.to_string(), filename.to_string()))
}

fn read_entry<R: Read>(entry: &mut R, path: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| Error::Format(format!("Reading {} failed: {}", path, e)))?;
    Ok(data)
}

/// Fails reads once more than `limit` bytes have come out of `inner`.
struct CappedReader<R> {
    inner: R,
    remaining: u64,
    limit: u64,
}

impl<R> CappedReader<R> {
    fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
            limit,
        }
    }
}

impl<R: Read> Read for CappedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n as u64 > self.remaining {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("decompressed archive exceeds {} bytes", self.limit),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}
