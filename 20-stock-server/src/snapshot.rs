//! Text snapshot of the ledger.
//!
//! One record per line, `"<id> <available> <unit_price>"`, single spaces,
//! ascending id order. Read once at startup and written once at shutdown.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};

use crate::ledger::{InventoryRecord, Ledger};

/// Reads the snapshot at `path` into a fresh ledger.
///
/// A missing file is an error: the server refuses to start without a prior
/// snapshot.
pub fn load(path: &Path) -> Result<Ledger> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read stock snapshot {}", path.display()))?;
    parse(&contents).with_context(|| format!("invalid stock snapshot {}", path.display()))
}

pub fn parse(contents: &str) -> Result<Ledger> {
    let mut ledger = Ledger::new();
    for (index, line) in contents.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [id, available, unit_price] = fields[..] else {
            bail!(
                "line {line_no}: expected 3 fields, found {}",
                fields.len()
            );
        };

        let id: i64 = id
            .parse()
            .with_context(|| format!("line {line_no}: invalid id '{id}'"))?;
        let available: u64 = available
            .parse()
            .with_context(|| format!("line {line_no}: invalid stock count '{available}'"))?;
        let unit_price: i64 = unit_price
            .parse()
            .with_context(|| format!("line {line_no}: invalid price '{unit_price}'"))?;

        ledger
            .insert(id, available, unit_price)
            .map_err(|err| anyhow!("line {line_no}: {err}"))?;
    }
    Ok(ledger)
}

pub fn render(ledger: &Ledger) -> String {
    let mut out = String::new();
    for record in ledger.iter() {
        push_record(&mut out, record);
    }
    out
}

pub(crate) fn push_record(out: &mut String, record: &InventoryRecord) {
    use std::fmt::Write as _;
    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "{} {} {}",
        record.id, record.available, record.unit_price
    );
}

/// Writes `ledger` to `path`, replacing whatever was there.
///
/// The records go to a sibling temporary file first which is then renamed
/// over the target, so an interrupted write never leaves a half-written
/// snapshot behind.
pub fn save(ledger: &Ledger, path: &Path) -> Result<()> {
    let tmp = temp_path(path);
    {
        let file = File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(render(ledger).as_bytes())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        let file = writer
            .into_inner()
            .map_err(|err| err.into_error())
            .with_context(|| format!("failed to flush {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace stock snapshot {}", path.display()))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "stock.txt".into());
    name.push(".tmp");
    path.with_file_name(name)
}
