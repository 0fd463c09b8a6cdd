//! Framed ledger file format
//!
//! Layout, all integers big-endian:
//! - magic `SLDG`, format version `u16`, record count `u64`
//! - per record in append order: payload length `u32`, then the payload
//!
//! A payload is the record's fields in fixed order: fingerprint (32 bytes),
//! parent count `u32` and each parent (32 bytes), genotype digest (32 bytes),
//! generation `u32`, breeder length `u32` and UTF-8 bytes, creation time as
//! `i64` milliseconds, difficulty `u8`, nonce `u64`.
//!
//! Digests are stored raw, so any change to a stored digest still decodes
//! and is caught by the ledger audit as a hash mismatch. Decoding checks
//! structure only.

use crate::hash::{Fingerprint, GenotypeDigest, DIGEST_LEN};
use crate::ledger::{BreedingEventRecord, RecordCandidate};
use chrono::{DateTime, Utc};
use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 4] = b"SLDG";
pub const FORMAT_VERSION: u16 = 1;

/// Frames larger than this are treated as corruption rather than allocated
const MAX_FRAME_LEN: u32 = 1 << 20;

/// Structural problems with a ledger file
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a ledger file (bad magic)")]
    BadMagic,

    #[error("unsupported ledger format version {0}")]
    UnsupportedVersion(u16),

    #[error("file truncated inside frame {index}")]
    Truncated { index: u64 },

    #[error("header promises {expected} records, file has {found}")]
    CountMismatch { expected: u64, found: u64 },

    #[error("frame {index} is {len} bytes, larger than the {max} byte limit")]
    Oversized { index: u64, len: u32, max: u32 },

    #[error("frame {index} is malformed: {what}")]
    Malformed { index: u64, what: &'static str },

    #[error("record {0} does not fit in a frame")]
    Unencodable(Fingerprint),
}

/// Write the header and one frame per record
pub fn encode<W: Write>(mut out: W, records: &[BreedingEventRecord]) -> Result<(), FrameError> {
    out.write_all(MAGIC)?;
    out.write_all(&FORMAT_VERSION.to_be_bytes())?;
    out.write_all(&(records.len() as u64).to_be_bytes())?;
    let mut payload = Vec::new();
    for record in records {
        payload.clear();
        encode_record(&mut payload, record)?;
        out.write_all(&(payload.len() as u32).to_be_bytes())?;
        out.write_all(&payload)?;
    }
    out.flush()?;
    Ok(())
}

/// Encode into an in-memory buffer
pub fn encode_to_vec(records: &[BreedingEventRecord]) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    encode(&mut buf, records)?;
    Ok(buf)
}

fn encode_record(buf: &mut Vec<u8>, record: &BreedingEventRecord) -> Result<(), FrameError> {
    let unencodable = || FrameError::Unencodable(record.fingerprint());
    let parent_count = u32::try_from(record.parents().len()).map_err(|_| unencodable())?;
    let breeder = record.breeder().as_bytes();
    let breeder_len = u32::try_from(breeder.len()).map_err(|_| unencodable())?;

    buf.extend_from_slice(record.fingerprint().as_bytes());
    buf.extend_from_slice(&parent_count.to_be_bytes());
    for parent in record.parents() {
        buf.extend_from_slice(parent.as_bytes());
    }
    buf.extend_from_slice(record.genotype().as_bytes());
    buf.extend_from_slice(&record.generation().to_be_bytes());
    buf.extend_from_slice(&breeder_len.to_be_bytes());
    buf.extend_from_slice(breeder);
    buf.extend_from_slice(&record.created_at().timestamp_millis().to_be_bytes());
    buf.push(record.difficulty());
    buf.extend_from_slice(&record.nonce().to_be_bytes());

    if buf.len() > MAX_FRAME_LEN as usize {
        return Err(unencodable());
    }
    Ok(())
}

impl FrameError {
    /// Damage inside a recognised ledger file, as opposed to a file that is
    /// not a ledger at all or could not be read
    pub fn is_damage(&self) -> bool {
        matches!(
            self,
            FrameError::Truncated { .. }
                | FrameError::CountMismatch { .. }
                | FrameError::Oversized { .. }
                | FrameError::Malformed { .. }
        )
    }
}

/// Records recovered from a ledger file, plus the damage that stopped decoding
#[derive(Debug)]
pub struct Salvage {
    /// Every record before the first damaged frame, in append order
    pub records: Vec<BreedingEventRecord>,
    pub damage: Option<FrameError>,
}

/// Read a complete ledger file back into records in append order
pub fn decode<R: Read>(input: R) -> Result<Vec<BreedingEventRecord>, FrameError> {
    let salvage = decode_salvage(input)?;
    match salvage.damage {
        Some(damage) => Err(damage),
        None => Ok(salvage.records),
    }
}

/// Decode as far as the file allows
///
/// Only a missing or foreign header and I/O failures are errors; damage
/// further in is reported alongside the records read before it.
pub fn decode_salvage<R: Read>(mut input: R) -> Result<Salvage, FrameError> {
    let mut magic = [0u8; 4];
    read_exact_or(&mut input, &mut magic, FrameError::BadMagic)?;
    if &magic != MAGIC {
        return Err(FrameError::BadMagic);
    }

    let mut version = [0u8; 2];
    read_exact_or(&mut input, &mut version, FrameError::BadMagic)?;
    let version = u16::from_be_bytes(version);
    if version != FORMAT_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }

    let mut records = Vec::new();
    let mut count = [0u8; 8];
    if let Err(e) = read_exact_or(&mut input, &mut count, FrameError::Truncated { index: 0 }) {
        return damaged(records, e);
    }
    let expected = u64::from_be_bytes(count);

    let mut index = 0u64;
    loop {
        match read_frame(&mut input, index) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => break,
            Err(e) => return damaged(records, e),
        }
        index += 1;
    }

    let damage = (index != expected).then_some(FrameError::CountMismatch {
        expected,
        found: index,
    });
    Ok(Salvage { records, damage })
}

fn damaged(records: Vec<BreedingEventRecord>, error: FrameError) -> Result<Salvage, FrameError> {
    if error.is_damage() {
        Ok(Salvage {
            records,
            damage: Some(error),
        })
    } else {
        Err(error)
    }
}

/// Next frame, or `None` at a clean end of file
fn read_frame<R: Read>(input: &mut R, index: u64) -> Result<Option<BreedingEventRecord>, FrameError> {
    let mut len = [0u8; 4];
    match read_partial(input, &mut len)? {
        0 => return Ok(None),
        4 => {}
        _ => return Err(FrameError::Truncated { index }),
    }
    let len = u32::from_be_bytes(len);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized {
            index,
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len as usize];
    read_exact_or(input, &mut payload, FrameError::Truncated { index })?;
    decode_record(&payload)
        .map(Some)
        .map_err(|what| FrameError::Malformed { index, what })
}

/// Field reader over one frame payload
struct Fields<'a> {
    buf: &'a [u8],
}

impl<'a> Fields<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], &'static str> {
        if self.buf.len() < n {
            return Err(what);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], &'static str> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, &'static str> {
        self.array(what).map(u32::from_be_bytes)
    }
}

fn decode_record(payload: &[u8]) -> Result<BreedingEventRecord, &'static str> {
    let mut fields = Fields { buf: payload };

    let fingerprint = Fingerprint(fields.array::<DIGEST_LEN>("fingerprint")?);
    let parent_count = fields.u32("parent count")? as usize;
    if parent_count > fields.buf.len() / DIGEST_LEN {
        return Err("parent count exceeds frame");
    }
    let mut parents = Vec::with_capacity(parent_count);
    for _ in 0..parent_count {
        parents.push(Fingerprint(fields.array::<DIGEST_LEN>("parent")?));
    }
    let genotype = GenotypeDigest(fields.array::<DIGEST_LEN>("genotype")?);
    let generation = fields.u32("generation")?;
    let breeder_len = fields.u32("breeder length")? as usize;
    let breeder = std::str::from_utf8(fields.take(breeder_len, "breeder")?)
        .map_err(|_| "breeder is not UTF-8")?
        .to_string();
    let millis = i64::from_be_bytes(fields.array("created_at")?);
    let created_at = DateTime::<Utc>::from_timestamp_millis(millis).ok_or("created_at out of range")?;
    let [difficulty] = fields.array::<1>("difficulty")?;
    let nonce = u64::from_be_bytes(fields.array("nonce")?);
    if !fields.buf.is_empty() {
        return Err("trailing bytes");
    }

    // built directly: admission rules are the audit's job, not the decoder's
    let candidate = RecordCandidate {
        parents,
        genotype,
        generation,
        breeder,
        created_at,
        difficulty,
    };
    Ok(BreedingEventRecord::seal(candidate, nonce, fingerprint))
}

fn read_exact_or<R: Read>(input: &mut R, buf: &mut [u8], short: FrameError) -> Result<(), FrameError> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(short),
        Err(e) => Err(FrameError::Io(e)),
    }
}

/// Fill as much of `buf` as the input has; returns bytes read
fn read_partial<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize, FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Fingerprint, GenotypeDigest};
    use crate::ledger::RecordCandidate;

    fn records() -> Vec<BreedingEventRecord> {
        let a = BreedingEventRecord::seal(
            RecordCandidate::genesis(GenotypeDigest::of(b"a"), "alice", 0),
            1,
            Fingerprint([1; 32]),
        );
        let b = BreedingEventRecord::seal(
            RecordCandidate::genesis(GenotypeDigest::of(b"b"), "bob", 0),
            2,
            Fingerprint([2; 32]),
        );
        vec![a, b]
    }

    #[test]
    fn test_preserves_append_order() {
        let records = records();
        let bytes = encode_to_vec(&records).unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(decode(bytes.as_slice()).unwrap(), records);
    }

    #[test]
    fn test_empty_ledger() {
        let bytes = encode_to_vec(&[]).unwrap();
        assert_eq!(bytes.len(), 4 + 2 + 8);
        assert!(decode(bytes.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode_to_vec(&records()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(bytes.as_slice()), Err(FrameError::BadMagic)));
    }

    #[test]
    fn test_unknown_version() {
        let mut bytes = encode_to_vec(&records()).unwrap();
        bytes[5] = 9;
        assert!(matches!(
            decode(bytes.as_slice()),
            Err(FrameError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_truncated_mid_frame() {
        let bytes = encode_to_vec(&records()).unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            decode(cut),
            Err(FrameError::Truncated { index: 1 })
        ));
    }

    #[test]
    fn test_truncated_at_frame_boundary() {
        let records = records();
        let full = encode_to_vec(&records).unwrap();
        let first_only = encode_to_vec(&records[..1]).unwrap();
        // keep the original header (count = 2) but only the first frame
        let mut cut = full[..14].to_vec();
        cut.extend_from_slice(&first_only[14..]);
        assert!(matches!(
            decode(cut.as_slice()),
            Err(FrameError::CountMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn test_parent_count_past_frame_end() {
        let mut bytes = encode_to_vec(&records()).unwrap();
        // header 14, frame length 4, fingerprint 32: first byte of the parent count
        bytes[14 + 4 + 32] = 0xff;
        assert!(matches!(
            decode(bytes.as_slice()),
            Err(FrameError::Malformed { index: 0, .. })
        ));
    }

    #[test]
    fn test_digests_are_stored_raw() {
        let records = records();
        let bytes = encode_to_vec(&records).unwrap();
        assert_eq!(&bytes[18..50], records[0].fingerprint().as_bytes());

        // any value in the fingerprint bytes decodes; validity is the audit's call
        let mut flipped = bytes.clone();
        flipped[18] ^= 0x20;
        let decoded = decode(flipped.as_slice()).unwrap();
        assert_ne!(decoded[0].fingerprint(), records[0].fingerprint());
        assert_eq!(decoded[0].candidate(), records[0].candidate());
    }

    #[test]
    fn test_created_at_survives_roundtrip() {
        let records = records();
        let decoded = decode(encode_to_vec(&records).unwrap().as_slice()).unwrap();
        assert_eq!(decoded[1].created_at(), records[1].created_at());
        assert_eq!(decoded[1].breeder(), "bob");
        assert_eq!(decoded[1].nonce(), 2);
    }

    #[test]
    fn test_salvage_keeps_records_before_damage() {
        let records = records();
        let bytes = encode_to_vec(&records).unwrap();
        let salvage = decode_salvage(&bytes[..bytes.len() - 3]).unwrap();
        assert_eq!(salvage.records, records[..1]);
        assert!(matches!(salvage.damage, Some(FrameError::Truncated { index: 1 })));

        let salvage = decode_salvage(bytes.as_slice()).unwrap();
        assert_eq!(salvage.records, records);
        assert!(salvage.damage.is_none());
    }

    #[test]
    fn test_salvage_still_rejects_foreign_files() {
        assert!(matches!(decode_salvage(&b"PK\x03\x04 not a ledger"[..]), Err(FrameError::BadMagic)));
        assert!(matches!(decode_salvage(&b"SL"[..]), Err(FrameError::BadMagic)));
    }
}
