// src/persist.rs
//
// Versioned binary container for shields.
//
// Layout (little-endian):
//
//   magic            b"GSHD"
//   format_version   u16
//   flags            u16   bit 0 = converged
//   dimensions       u32
//   num_actions      u32
//   per axis         granularity f64, lower f64, upper f64, size u64
//   per action       name_len u16, name bytes (UTF-8)
//   passes           u64
//   cell_count       u64   product of the axis sizes
//   per cell         tag u8 (0 = unclassified, 1 = classified), mask u32
//   sha256           32 bytes over everything above
//
// Writing and reading stream through a hashing adapter, so no copy of the
// whole file is held in memory.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::actions::{ActionSet, MAX_ACTIONS};
use crate::error::{Result, ShieldError};
use crate::grid::{CellLabel, Grid};
use crate::shield::{Completeness, Shield};

pub const MAGIC: [u8; 4] = *b"GSHD";

/// Current container version. Bump when the layout changes.
pub const FORMAT_VERSION: u16 = 1;

const FLAG_CONVERGED: u16 = 1;
const TAG_UNCLASSIFIED: u8 = 0;
const TAG_CLASSIFIED: u8 = 1;
const MAX_DIMENSIONS: u32 = 64;
const DIGEST_LEN: usize = 32;
/// Upper bound on the label buffer reserved before any cell is read.
const INITIAL_RESERVE: usize = 1 << 20;

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Serialize `shield` to `writer`.
pub fn write_shield<W: Write>(shield: &Shield, writer: W) -> Result<()> {
    let grid = shield.grid();
    let mut w = HashingWriter {
        inner: BufWriter::new(writer),
        hasher: Sha256::new(),
    };

    w.write_all(&MAGIC)?;
    w.write_all(&FORMAT_VERSION.to_le_bytes())?;
    let flags = if shield.is_converged() {
        FLAG_CONVERGED
    } else {
        0
    };
    w.write_all(&flags.to_le_bytes())?;
    w.write_all(&(grid.dimensions() as u32).to_le_bytes())?;
    w.write_all(&(shield.num_actions() as u32).to_le_bytes())?;

    for axis in 0..grid.dimensions() {
        w.write_all(&grid.granularity()[axis].to_le_bytes())?;
        w.write_all(&grid.bounds().lower[axis].to_le_bytes())?;
        w.write_all(&grid.bounds().upper[axis].to_le_bytes())?;
        w.write_all(&(grid.size()[axis] as u64).to_le_bytes())?;
    }
    for name in shield.action_names() {
        w.write_all(&(name.len() as u16).to_le_bytes())?;
        w.write_all(name.as_bytes())?;
    }

    w.write_all(&shield.passes().to_le_bytes())?;
    w.write_all(&(grid.len() as u64).to_le_bytes())?;
    for label in grid.labels() {
        let (tag, mask) = match label {
            CellLabel::Classified(set) => (TAG_CLASSIFIED, set.bits()),
            CellLabel::Unclassified | CellLabel::Outside => (TAG_UNCLASSIFIED, 0),
        };
        w.write_all(&[tag])?;
        w.write_all(&mask.to_le_bytes())?;
    }

    let digest = w.hasher.finalize();
    let mut inner = w.inner;
    inner.write_all(&digest)?;
    inner.flush()?;
    Ok(())
}

/// Deserialize a shield written by `write_shield`.
///
/// Truncated, malformed or checksum-failing input is `CorruptData`; a
/// different container version is `UnsupportedFormat`.
pub fn read_shield<R: Read>(reader: R) -> Result<Shield> {
    let mut r = HashingReader {
        inner: BufReader::new(reader),
        hasher: Sha256::new(),
    };

    let magic: [u8; 4] = read_array(&mut r, "magic")?;
    if magic != MAGIC {
        return Err(ShieldError::CorruptData(format!(
            "bad magic {magic:?}, not a shield file"
        )));
    }
    let version = u16::from_le_bytes(read_array(&mut r, "format version")?);
    if version != FORMAT_VERSION {
        return Err(ShieldError::UnsupportedFormat {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    let flags = u16::from_le_bytes(read_array(&mut r, "flags")?);
    if flags & !FLAG_CONVERGED != 0 {
        return Err(ShieldError::CorruptData(format!(
            "unknown flag bits {flags:#06x}"
        )));
    }

    let dims = u32::from_le_bytes(read_array(&mut r, "dimensions")?);
    if dims == 0 || dims > MAX_DIMENSIONS {
        return Err(ShieldError::CorruptData(format!(
            "implausible dimensionality {dims}"
        )));
    }
    let num_actions = u32::from_le_bytes(read_array(&mut r, "action count")?) as usize;
    if num_actions == 0 || num_actions > MAX_ACTIONS {
        return Err(ShieldError::CorruptData(format!(
            "implausible action count {num_actions}"
        )));
    }

    let dims = dims as usize;
    let mut granularity = Vec::with_capacity(dims);
    let mut lower = Vec::with_capacity(dims);
    let mut upper = Vec::with_capacity(dims);
    let mut size = Vec::with_capacity(dims);
    for _ in 0..dims {
        granularity.push(f64::from_le_bytes(read_array(&mut r, "granularity")?));
        lower.push(f64::from_le_bytes(read_array(&mut r, "lower bound")?));
        upper.push(f64::from_le_bytes(read_array(&mut r, "upper bound")?));
        let n = u64::from_le_bytes(read_array(&mut r, "axis size")?);
        size.push(usize::try_from(n).map_err(|_| {
            ShieldError::CorruptData(format!("axis size {n} does not fit in memory"))
        })?);
    }

    let mut action_names = Vec::with_capacity(num_actions);
    for i in 0..num_actions {
        let len = u16::from_le_bytes(read_array(&mut r, "action name length")?) as usize;
        let mut bytes = vec![0u8; len];
        read_exact(&mut r, &mut bytes, "action name")?;
        let name = String::from_utf8(bytes).map_err(|_| {
            ShieldError::CorruptData(format!("action name {i} is not valid UTF-8"))
        })?;
        action_names.push(name);
    }

    let passes = u64::from_le_bytes(read_array(&mut r, "pass count")?);
    let cell_count = u64::from_le_bytes(read_array(&mut r, "cell count")?);
    let expected = size
        .iter()
        .try_fold(1u64, |acc, n| acc.checked_mul(*n as u64))
        .ok_or_else(|| ShieldError::CorruptData("axis sizes overflow".to_string()))?;
    if cell_count != expected {
        return Err(ShieldError::CorruptData(format!(
            "cell count {cell_count} does not match axis sizes {size:?}"
        )));
    }
    let cell_count = usize::try_from(cell_count)
        .map_err(|_| ShieldError::CorruptData("cell count exceeds address space".to_string()))?;

    let all = ActionSet::all(num_actions);
    let mut labels = Vec::new();
    labels
        .try_reserve_exact(cell_count.min(INITIAL_RESERVE))
        .map_err(|_| ShieldError::CorruptData("cannot allocate label buffer".to_string()))?;
    for i in 0..cell_count {
        let [tag, m0, m1, m2, m3]: [u8; 5] = read_array(&mut r, "cell label")?;
        let mask = u32::from_le_bytes([m0, m1, m2, m3]);
        let label = match tag {
            TAG_UNCLASSIFIED if mask == 0 => CellLabel::Unclassified,
            TAG_CLASSIFIED if ActionSet::from_bits(mask).is_subset(all) => {
                CellLabel::Classified(ActionSet::from_bits(mask))
            }
            _ => {
                return Err(ShieldError::CorruptData(format!(
                    "cell {i} has tag {tag} and mask {mask:#x}"
                )))
            }
        };
        labels.push(label);
    }

    let computed = r.hasher.finalize();
    let mut stored = [0u8; DIGEST_LEN];
    read_exact(&mut r.inner, &mut stored, "checksum")?;
    if computed.as_slice() != stored {
        return Err(ShieldError::CorruptData("checksum mismatch".to_string()));
    }
    expect_eof(&mut r.inner)?;

    let grid = Grid::from_parts(granularity, lower, upper, size, labels)
        .map_err(|e| ShieldError::CorruptData(e.to_string()))?;
    let completeness = if flags & FLAG_CONVERGED != 0 {
        Completeness::Converged
    } else {
        Completeness::Incomplete
    };
    Shield::new(grid, action_names, completeness, passes)
        .map_err(|e| ShieldError::CorruptData(e.to_string()))
}

/// Write `shield` to `path` atomically (temporary sibling file, then
/// rename).
pub fn save_shield(shield: &Shield, path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let temp_name = format!(
        ".tmp_{}_{}",
        std::process::id(),
        path.file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default()
    );
    let temp_path = parent.join(temp_name);

    let mut file = File::create(&temp_path)?;
    let written = write_shield(shield, &mut file).and_then(|()| Ok(file.sync_all()?));
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    fs::rename(&temp_path, path)?;

    info!(
        path = %path.display(),
        cells = shield.grid().len(),
        "shield saved"
    );
    Ok(())
}

pub fn load_shield(path: &Path) -> Result<Shield> {
    let file = File::open(path)?;
    let shield = read_shield(file)?;
    debug!(path = %path.display(), cells = shield.grid().len(), "shield loaded");
    Ok(shield)
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            ShieldError::CorruptData(format!("truncated while reading {what}"))
        }
        _ => ShieldError::Io(e),
    })
}

/// The checksum is the last thing in a container.
fn expect_eof<R: Read>(r: &mut R) -> Result<()> {
    let mut extra = [0u8; 1];
    loop {
        match r.read(&mut extra) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                return Err(ShieldError::CorruptData(
                    "trailing bytes after checksum".to_string(),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ShieldError::Io(e)),
        }
    }
}

fn read_array<const N: usize, R: Read>(r: &mut R, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    read_exact(r, &mut buf, what)?;
    Ok(buf)
}
