use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode a single record as `[len][bincode][crc32]`.
fn encode_frame<E: Serialize>(writer: &mut impl Write, record: &E) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of `E` records.
///
/// Frame: `[u32 LE: len][bincode: E][u32 LE: crc32(payload)]`.
/// A torn or corrupt tail (crash mid-write) ends replay; everything
/// before it is kept.
pub struct Wal<E> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    _record: PhantomData<fn(E)>,
}

impl<E: Serialize + DeserializeOwned> Wal<E> {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            _record: PhantomData,
        })
    }

    /// Append one record and fsync. Production code batches with
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, record: &E) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record without flushing. Not durable until `flush_sync`.
    pub fn append_buffered(&mut self, record: &E) -> io::Result<()> {
        encode_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a compacted snapshot next to the log and fsync it.
    pub fn write_compact_file(path: &Path, records: &[E]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::tmp_path(path))?);
        for record in records {
            encode_frame(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replay every intact record. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<E>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut payload)? || !read_full(&mut reader, &mut crc_buf)? {
                tracing::warn!(
                    "WAL {}: torn record after {} entries, discarding tail",
                    path.display(),
                    records.len()
                );
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(
                    "WAL {}: checksum mismatch after {} entries, discarding tail",
                    path.display(),
                    records.len()
                );
                break;
            }
            match bincode::deserialize::<E>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("WAL {}: undecodable record: {e}", path.display());
                    break;
                }
            }
        }

        Ok(records)
    }
}
