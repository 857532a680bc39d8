use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde_json::Value;

use crate::db::{self, Db};

const BATCH_SIZE: usize = 100;

/// Destination of imported packets.
pub trait PacketSink {
    fn clear(&mut self) -> db::Result<()>;
    fn insert_batch(&mut self, batch: &[Value]) -> db::Result<usize>;
}

impl PacketSink for Db {
    fn clear(&mut self) -> db::Result<()> {
        self.clear_raw_messages()
    }

    fn insert_batch(&mut self, batch: &[Value]) -> db::Result<usize> {
        self.insert_raw_messages(batch)
    }
}

/// Packets parsed from a JSON Lines file plus the line numbers that were not JSON.
#[derive(Debug, Default)]
pub struct Packets {
    pub values: Vec<Value>,
    pub skipped: Vec<usize>,
}

pub fn parse_lines(reader: impl BufRead) -> Result<Packets> {
    let mut packets = Packets::default();

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.with_context(|| format!("reading line {line_number}"))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(value) => packets.values.push(value),
            Err(e) => {
                warn!("skipping line {line_number}: invalid JSON ({e})");
                packets.skipped.push(line_number);
            }
        }
    }

    Ok(packets)
}

pub fn read_file(path: &Path) -> Result<Packets> {
    if !path.exists() {
        bail!("JSONL file not found: {}", path.display());
    }

    info!("reading {}", path.display());
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_lines(BufReader::new(file))
}

/// Writes `packets` in transactions of `BATCH_SIZE`, optionally emptying the
/// table first. Returns the number of inserted rows.
pub fn store(sink: &mut impl PacketSink, packets: &Packets, replace: bool) -> Result<usize> {
    if replace {
        info!("truncating messages_raw");
        sink.clear()?;
    }

    let mut inserted = 0;
    for batch in packets.values.chunks(BATCH_SIZE) {
        inserted += sink.insert_batch(batch)?;
        info!("inserted {inserted} rows...");
    }

    Ok(inserted)
}
