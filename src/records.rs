//! Observation records and their fixed-width binary file format.
//!
//! One record is 16 bytes, little-endian, no header:
//!   user: u32 | item: u32 | date: u32 | score: f32
//! Ids are 1-based. A file whose length is not a multiple of 16 is rejected
//! as a whole; nothing is partially loaded.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{ModelError, Result};

pub const RECORD_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub user: u32,
    pub item: u32,
    pub date: u32,
    pub score: f32,
}

impl Record {
    pub fn new(user: u32, item: u32, date: u32, score: f32) -> Self {
        Self {
            user,
            item,
            date,
            score,
        }
    }

    fn decode(buf: &[u8]) -> Self {
        let word = |at: usize| [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
        Self {
            user: u32::from_le_bytes(word(0)),
            item: u32::from_le_bytes(word(4)),
            date: u32::from_le_bytes(word(8)),
            score: f32::from_le_bytes(word(12)),
        }
    }

    fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.user.to_le_bytes());
        out[4..8].copy_from_slice(&self.item.to_le_bytes());
        out[8..12].copy_from_slice(&self.date.to_le_bytes());
        out[12..16].copy_from_slice(&self.score.to_le_bytes());
        out
    }
}

/// Immutable, ordered collection of observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStore {
    records: Vec<Record>,
}

impl RecordStore {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % RECORD_SIZE != 0 {
            return Err(ModelError::MalformedRecordFile {
                path: Default::default(),
                len: bytes.len() as u64,
            });
        }
        let records = bytes.chunks_exact(RECORD_SIZE).map(Record::decode).collect();
        Ok(Self { records })
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len % RECORD_SIZE as u64 != 0 {
            return Err(ModelError::MalformedRecordFile {
                path: path.to_path_buf(),
                len,
            });
        }
        let mut bytes = Vec::with_capacity(len as usize);
        BufReader::new(file).read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes).map_err(|_| ModelError::MalformedRecordFile {
            path: path.to_path_buf(),
            len: bytes.len() as u64,
        })
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for record in &self.records {
            writer.write_all(&record.encode())?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn as_slice(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Largest user id, i.e. the number of user columns needed.
    pub fn max_user(&self) -> usize {
        self.records.iter().map(|r| r.user as usize).max().unwrap_or(0)
    }

    pub fn max_item(&self) -> usize {
        self.records.iter().map(|r| r.item as usize).max().unwrap_or(0)
    }

    /// Checks ids and dates against the date domain; scores must lie in [0, 5].
    pub fn validate(&self, max_date: u32) -> Result<()> {
        for (index, r) in self.records.iter().enumerate() {
            if r.user == 0 || r.item == 0 {
                return Err(ModelError::invalid_record(index, "ids are 1-based"));
            }
            if r.date == 0 || r.date > max_date {
                return Err(ModelError::invalid_record(
                    index,
                    format!("date {} outside [1, {}]", r.date, max_date),
                ));
            }
            if !(0.0..=5.0).contains(&r.score) {
                return Err(ModelError::invalid_record(
                    index,
                    format!("score {} outside [0, 5]", r.score),
                ));
            }
        }
        Ok(())
    }
}

impl std::ops::Index<usize> for RecordStore {
    type Output = Record;

    fn index(&self, index: usize) -> &Record {
        &self.records[index]
    }
}

impl<'a> IntoIterator for &'a RecordStore {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl From<Vec<Record>> for RecordStore {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}
