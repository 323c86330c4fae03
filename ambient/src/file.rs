//! Ambient File
//!
//! Layout, all integers little endian:
//!
//! ```text
//! magic     8 bytes  "RSAMBv1\n"
//! count     u64
//! records   count x { cell: 3 x i32, face: u8, irradiance: 3 x f64, samples: u32 }
//! checksum  u64      FNV-1a of everything above
//! ```

use super::record::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use itertools::Itertools;
use rtcore::color::Rgb;
use rtcore::error::{Result, RtError};
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// File magic number.
pub const AMBIENT_MAGIC: &[u8; 8] = b"RSAMBv1\n";

/// Encoded size of one record.
const RECORD_SIZE: usize = 13 + 24 + 4;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Returns the 64-bit FNV-1a hash of `bytes`.
///
/// * `bytes` - Data to hash.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

/// Serializes records in key order.
///
/// * `records` - The records.
pub fn encode_records<'a, I>(records: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a AmbientKey, &'a AmbientRecord)>,
{
    let sorted = records.into_iter().sorted_by_key(|(k, _)| **k).collect::<Vec<_>>();
    let mut buf = Vec::with_capacity(16 + sorted.len() * RECORD_SIZE + 8);
    buf.extend_from_slice(AMBIENT_MAGIC);

    // Writes to a Vec cannot fail.
    let _ = buf.write_u64::<LittleEndian>(sorted.len() as u64);
    for (key, rec) in sorted {
        buf.extend_from_slice(&key.to_bytes());
        for v in rec.irradiance.to_array() {
            let _ = buf.write_f64::<LittleEndian>(v);
        }
        let _ = buf.write_u32::<LittleEndian>(rec.samples);
    }
    let sum = fnv1a(&buf);
    let _ = buf.write_u64::<LittleEndian>(sum);
    buf
}

/// Parses an ambient file image. Any inconsistency rejects the whole file.
///
/// * `bytes` - File contents.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<(AmbientKey, AmbientRecord)>> {
    let corrupt = |what: &str| RtError::Format(format!("corrupt ambient file: {what}"));

    if bytes.len() < AMBIENT_MAGIC.len() + 16 || &bytes[..AMBIENT_MAGIC.len()] != AMBIENT_MAGIC {
        return Err(corrupt("bad magic number"));
    }
    let (body, tail) = bytes.split_at(bytes.len() - 8);
    let stored = Cursor::new(tail)
        .read_u64::<LittleEndian>()
        .map_err(|_| corrupt("truncated"))?;
    if stored != fnv1a(body) {
        return Err(corrupt("checksum mismatch"));
    }

    let mut rd = Cursor::new(&body[AMBIENT_MAGIC.len()..]);
    let count = rd.read_u64::<LittleEndian>().map_err(|_| corrupt("truncated"))? as usize;
    if body.len() - AMBIENT_MAGIC.len() - 8 != count.saturating_mul(RECORD_SIZE) {
        return Err(corrupt("record count mismatch"));
    }

    let read = |rd: &mut Cursor<&[u8]>| -> io::Result<(AmbientKey, AmbientRecord)> {
        let cell = [
            rd.read_i32::<LittleEndian>()?,
            rd.read_i32::<LittleEndian>()?,
            rd.read_i32::<LittleEndian>()?,
        ];
        let face = rd.read_u8()?;
        let r = rd.read_f64::<LittleEndian>()?;
        let g = rd.read_f64::<LittleEndian>()?;
        let b = rd.read_f64::<LittleEndian>()?;
        let samples = rd.read_u32::<LittleEndian>()?;
        Ok((AmbientKey { cell, face }, AmbientRecord::new(Rgb::new(r, g, b), samples)))
    };
    (0..count)
        .map(|_| read(&mut rd).map_err(|_| corrupt("truncated record")))
        .collect()
}

/// Reads an ambient file. Returns `None` if it does not exist.
///
/// * `path` - The file.
pub fn read_ambient_file(path: &Path) -> Result<Option<Vec<(AmbientKey, AmbientRecord)>>> {
    let mut bytes = Vec::new();
    match fs::File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut bytes)
                .map_err(|e| RtError::system(&format!("cannot read ambient file {}", path.display()), e))?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RtError::system(
                &format!("cannot open ambient file {}", path.display()),
                e,
            ))
        }
    }
    if bytes.is_empty() {
        return Ok(Some(Vec::new()));
    }
    decode_records(&bytes).map(Some)
}

/// Replaces the ambient file atomically: the image is written to a temporary
/// file in the same directory, synced, then renamed over `path`.
///
/// * `path`  - The file.
/// * `image` - Encoded contents.
pub fn write_ambient_file(path: &Path, image: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let ctx = |what: &str| format!("cannot {what} ambient file {}", path.display());

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| RtError::system(&ctx("create"), e))?;
    tmp.write_all(image).map_err(|e| RtError::system(&ctx("write"), e))?;
    tmp.as_file().sync_all().map_err(|e| RtError::system(&ctx("sync"), e))?;
    tmp.persist(path)
        .map_err(|e| RtError::system(&ctx("replace"), e.error))?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<(AmbientKey, AmbientRecord)> {
        vec![
            (
                AmbientKey { cell: [3, -1, 0], face: 2 },
                AmbientRecord::new(Rgb::new(0.1, 0.2, 0.3), 7),
            ),
            (
                AmbientKey { cell: [-5, 0, 9], face: 5 },
                AmbientRecord::new(Rgb::grey(1.5), 64),
            ),
        ]
    }

    #[test]
    fn fnv_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn file_round_trip_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amb.dat");
        let recs = sample();
        write_ambient_file(&path, &encode_records(recs.iter().map(|(k, r)| (k, r)))).unwrap();

        let back = read_ambient_file(&path).unwrap().unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0], recs[1]);
        assert_eq!(back[1], recs[0]);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_ambient_file(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn truncated_or_flipped_is_rejected() {
        let recs = sample();
        let image = encode_records(recs.iter().map(|(k, r)| (k, r)));

        let truncated = &image[..image.len() - 3];
        assert!(matches!(decode_records(truncated), Err(RtError::Format(_))));

        let mut flipped = image.clone();
        flipped[20] ^= 0x40;
        assert!(matches!(decode_records(&flipped), Err(RtError::Format(_))));

        assert!(matches!(decode_records(b"garbage"), Err(RtError::Format(_))));
        assert_eq!(decode_records(&image).unwrap().len(), 2);
    }
}
