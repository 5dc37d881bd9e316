use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame layout: `[u32 le: payload len][bincode payload][u32 le: crc32 of payload]`.
fn write_frame(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Reads exactly `buf.len()` bytes. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of reading a journal back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// A torn or corrupt frame was found; everything from it on was ignored.
    pub damaged_tail: bool,
}

/// Append-only event journal for the booking store.
///
/// Writers stage frames with [`Journal::stage`] and make a whole batch
/// durable with one [`Journal::commit`].
pub struct Journal {
    out: BufWriter<File>,
    path: PathBuf,
    since_snapshot: u64,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            since_snapshot: 0,
        })
    }

    pub fn stage(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.out, event)?;
        self.since_snapshot += 1;
        Ok(())
    }

    /// Flushes staged frames and fsyncs.
    pub fn commit(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.stage(event)?;
        self.commit()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn since_snapshot(&self) -> u64 {
        self.since_snapshot
    }

    fn snapshot_path(path: &Path) -> PathBuf {
        path.with_extension("journal.next")
    }

    /// Writes a snapshot next to the journal. Slow; run without holding the
    /// journal.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(Self::snapshot_path(path))?);
        for event in events {
            write_frame(&mut out, event)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Renames the snapshot over the journal and reopens it for appends.
    /// Nothing may be appended between `write_snapshot` and this call.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        self.out.flush()?;
        fs::rename(Self::snapshot_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.out = BufWriter::new(file);
        self.since_snapshot = 0;
        Ok(())
    }

    /// Reads every intact frame. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut payload)? || !read_full(&mut reader, &mut crc_buf)? {
                replay.damaged_tail = true;
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                replay.damaged_tail = true;
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => {
                    replay.damaged_tail = true;
                    break;
                }
            }
        }

        Ok(replay)
    }
}
