//! NumPy `.npz` archives: a zip of `.npy` v1.0 arrays, one per key.

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};

use camino::Utf8Path;
use half::f16;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::domain::Compression;
use crate::error::HicbandError;
use crate::fs_util;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

/// A one-dimensional array borrowed for a single write.
#[derive(Debug, Clone, Copy)]
pub enum ArrayData<'a> {
    F16(&'a [f16]),
    I64(&'a [i64]),
}

impl ArrayData<'_> {
    pub fn descr(&self) -> &'static str {
        match self {
            ArrayData::F16(_) => "<f2",
            ArrayData::I64(_) => "<i8",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::F16(values) => values.len(),
            ArrayData::I64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn byte_len(&self) -> usize {
        match self {
            ArrayData::F16(values) => values.len() * 2,
            ArrayData::I64(values) => values.len() * 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NamedArray<'a> {
    pub name: String,
    pub data: ArrayData<'a>,
}

impl<'a> NamedArray<'a> {
    pub fn new(name: impl Into<String>, data: ArrayData<'a>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Writes keyed arrays to one file. Each call either produces the complete
/// file or leaves the destination untouched.
pub trait ArchiveWriter {
    fn write(&self, path: &Utf8Path, arrays: &[NamedArray<'_>]) -> Result<(), HicbandError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NpzWriter {
    compression: Compression,
}

impl NpzWriter {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }
}

impl ArchiveWriter for NpzWriter {
    fn write(&self, path: &Utf8Path, arrays: &[NamedArray<'_>]) -> Result<(), HicbandError> {
        let write_err = |reason: String| HicbandError::ArchiveWrite {
            path: path.to_string(),
            reason,
        };

        let mut names = HashSet::new();
        if let Some(dup) = arrays.iter().find(|a| !names.insert(a.name.as_str())) {
            return Err(write_err(format!("duplicate key {}", dup.name)));
        }

        let method = match self.compression {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        };

        fs_util::write_atomic(path, |file| {
            let mut zip = ZipWriter::new(file);
            for array in arrays {
                let header = npy_header(array.data.descr(), array.data.len());
                let large = header.len() + array.data.byte_len() > u32::MAX as usize;
                let options = SimpleFileOptions::default()
                    .compression_method(method)
                    .large_file(large);
                zip.start_file(format!("{}.npy", array.name), options)
                    .map_err(|err| err.to_string())?;
                zip.write_all(&header).map_err(|err| err.to_string())?;
                write_values(&mut zip, array.data).map_err(|err| err.to_string())?;
            }
            zip.finish().map_err(|err| err.to_string())?;
            Ok(())
        })
        .map_err(write_err)
    }
}

/// `.npy` v1.0 header for a little-endian 1-D array, padded so the data
/// starts on a 64-byte boundary.
pub fn npy_header(descr: &str, len: usize) -> Vec<u8> {
    let dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': ({len},), }}");
    let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut header = Vec::with_capacity(unpadded + padding);
    header.extend_from_slice(NPY_MAGIC);
    header.extend_from_slice(&[1, 0]);
    header.extend_from_slice(&(header_len as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header.extend(std::iter::repeat_n(b' ', padding));
    header.push(b'\n');
    header
}

fn write_values<W: Write>(out: &mut W, data: ArrayData<'_>) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(data.byte_len().min(1 << 16));
    let mut flush = |buf: &mut Vec<u8>, force: bool| -> std::io::Result<()> {
        if force || buf.len() >= 1 << 16 {
            out.write_all(buf)?;
            buf.clear();
        }
        Ok(())
    };
    match data {
        ArrayData::F16(values) => {
            for value in values {
                buf.extend_from_slice(&value.to_le_bytes());
                flush(&mut buf, false)?;
            }
        }
        ArrayData::I64(values) => {
            for value in values {
                buf.extend_from_slice(&value.to_le_bytes());
                flush(&mut buf, false)?;
            }
        }
    }
    flush(&mut buf, true)
}

/// An array read back from an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyEntry {
    pub name: String,
    pub descr: String,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl NpyEntry {
    pub fn to_f16(&self) -> Option<Vec<f16>> {
        if self.descr != "<f2" {
            return None;
        }
        Some(
            self.data
                .chunks_exact(2)
                .map(|chunk| f16::from_le_bytes([chunk[0], chunk[1]]))
                .collect(),
        )
    }

    pub fn to_i64(&self) -> Option<Vec<i64>> {
        if self.descr != "<i8" {
            return None;
        }
        Some(
            self.data
                .chunks_exact(8)
                .map(|chunk| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    i64::from_le_bytes(bytes)
                })
                .collect(),
        )
    }
}

/// Reads every array of an `.npz` archive, in archive order.
pub fn read_npz(path: &Utf8Path) -> Result<Vec<NpyEntry>, HicbandError> {
    let fs_err = |reason: String| HicbandError::Filesystem(format!("{path}: {reason}"));
    let file = fs::File::open(path.as_std_path()).map_err(|err| fs_err(err.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|err| fs_err(err.to_string()))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| fs_err(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|err| fs_err(err.to_string()))?;
        let key = name.strip_suffix(".npy").unwrap_or(&name).to_string();
        entries.push(parse_npy(key, &bytes).map_err(fs_err)?);
    }
    Ok(entries)
}

fn parse_npy(name: String, bytes: &[u8]) -> Result<NpyEntry, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(format!("{name}: not an .npy array"));
    }
    let (header_len, dict_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        version => return Err(format!("{name}: unsupported .npy version {version}")),
    };
    let data_start = dict_start + header_len;
    let dict = bytes
        .get(dict_start..data_start)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .ok_or_else(|| format!("{name}: truncated header"))?;

    let descr = dict_value(dict, "'descr':")
        .map(|v| v.trim_matches('\'').to_string())
        .ok_or_else(|| format!("{name}: header has no descr"))?;
    let shape_raw = dict
        .split_once("'shape':")
        .and_then(|(_, rest)| rest.split_once('(').map(|(_, tail)| tail))
        .and_then(|tail| tail.split_once(')').map(|(inner, _)| inner))
        .ok_or_else(|| format!("{name}: header has no shape"))?;
    let shape = shape_raw
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.parse::<usize>().map_err(|_| format!("{name}: bad shape")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NpyEntry {
        name,
        descr,
        shape,
        data: bytes[data_start..].to_vec(),
    })
}

fn dict_value<'a>(dict: &'a str, key: &str) -> Option<&'a str> {
    let (_, rest) = dict.split_once(key)?;
    let rest = rest.trim_start();
    let end = rest.find(',')?;
    Some(rest[..end].trim())
}
