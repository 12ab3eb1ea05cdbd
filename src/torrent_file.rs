use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::error::Result;

/// Minimal bencode value tree, just enough to emit a well-formed `.torrent`
/// file. Dictionary keys are kept in a `BTreeMap` since bencode requires
/// keys sorted by raw byte value for the encoding to be canonical — two
/// implementations encoding the same info dict must produce the same
/// info-hash.
enum BValue {
    Bytes(Vec<u8>),
    Int(i64),
    List(Vec<BValue>),
    Dict(BTreeMap<Vec<u8>, BValue>),
}

impl BValue {
    fn string(s: &str) -> Self {
        BValue::Bytes(s.as_bytes().to_vec())
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            BValue::Bytes(bytes) => {
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(bytes);
            }
            BValue::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            BValue::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode(out);
                }
                out.push(b'e');
            }
            BValue::Dict(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    out.extend_from_slice(key.len().to_string().as_bytes());
                    out.push(b':');
                    out.extend_from_slice(key);
                    value.encode(out);
                }
                out.push(b'e');
            }
        }
    }
}

struct DiscoveredFile {
    relative_path: Vec<String>,
    length: u64,
    absolute_path: PathBuf,
}

/// Creates a trackerless `.torrent` file at `output_path` covering every
/// regular file under `source_dir` (§4.H step 5). Returns the 40-hex SHA-1
/// info-hash used throughout the catalog and BEP44 payloads (§6);
/// announce list is intentionally empty since the DHT is the sole
/// discovery path (§6).
pub fn create_torrent(
    source_dir: &Path,
    output_path: &Path,
    name: &str,
    piece_length: u32,
) -> Result<String> {
    let mut files = Vec::new();
    collect_files(source_dir, source_dir, &mut files)?;
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let pieces = hash_pieces(&files, piece_length as usize)?;

    let mut info = BTreeMap::new();
    info.insert(b"name".to_vec(), BValue::string(name));
    info.insert(b"piece length".to_vec(), BValue::Int(piece_length as i64));
    info.insert(b"pieces".to_vec(), BValue::Bytes(pieces));

    let file_entries: Vec<BValue> = files
        .iter()
        .map(|f| {
            let mut entry = BTreeMap::new();
            entry.insert(b"length".to_vec(), BValue::Int(f.length as i64));
            entry.insert(
                b"path".to_vec(),
                BValue::List(f.relative_path.iter().map(|p| BValue::string(p)).collect()),
            );
            BValue::Dict(entry)
        })
        .collect();
    info.insert(b"files".to_vec(), BValue::List(file_entries));

    let info_value = BValue::Dict(info);
    let mut info_bytes = Vec::new();
    info_value.encode(&mut info_bytes);
    let infohash = format!("{:x}", Sha1::digest(&info_bytes));

    let mut torrent = BTreeMap::new();
    torrent.insert(b"info".to_vec(), info_value);
    torrent.insert(b"encoding".to_vec(), BValue::string("UTF-8"));

    let mut torrent_bytes = Vec::new();
    BValue::Dict(torrent).encode(&mut torrent_bytes);

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output_path, &torrent_bytes)?;

    Ok(infohash)
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<DiscoveredFile>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else {
            if file_name == "silmaril-manifest.json" {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(DiscoveredFile {
                relative_path: relative,
                length: entry.metadata()?.len(),
                absolute_path: path,
            });
        }
    }
    Ok(())
}

fn hash_pieces(files: &[DiscoveredFile], piece_length: usize) -> Result<Vec<u8>> {
    let mut pieces = Vec::new();
    let mut buffer = vec![0u8; piece_length];
    let mut filled = 0usize;

    for file in files {
        let mut handle = std::fs::File::open(&file.absolute_path)?;
        loop {
            let read = handle.read(&mut buffer[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
            if filled == piece_length {
                pieces.extend_from_slice(Sha1::digest(&buffer[..filled]).as_slice());
                filled = 0;
            }
        }
    }
    if filled > 0 {
        pieces.extend_from_slice(Sha1::digest(&buffer[..filled]).as_slice());
    }

    Ok(pieces)
}
