//! Binary container round trips and rejection of damaged files.

use std::fs;

use gridshield::{
    load_shield, read_shield, save_shield, write_shield, ActionSet, CellId, Completeness, Grid,
    Shield, ShieldError, FORMAT_VERSION,
};
use tempfile::tempdir;

/// A 1-D shield with `cells` cells and a mix of label kinds.
fn shield_with_cells(cells: usize) -> Shield {
    let mut grid = Grid::new(vec![0.5], vec![-1.0], vec![-1.0 + 0.5 * cells as f64]).unwrap();
    assert_eq!(grid.len(), cells);
    for i in 0..cells {
        match i % 4 {
            0 => {} // left unclassified
            1 => grid.set_actions(CellId(i), ActionSet::EMPTY),
            2 => grid.set_actions(CellId(i), ActionSet::all(3)),
            _ => grid.set_actions(CellId(i), ActionSet::single(i % 3)),
        }
    }
    Shield::new(
        grid,
        vec!["accelerate".into(), "coast".into(), "brake".into()],
        Completeness::Converged,
        cells as u64,
    )
    .unwrap()
}

fn encode(shield: &Shield) -> Vec<u8> {
    let mut buf = Vec::new();
    write_shield(shield, &mut buf).unwrap();
    buf
}

#[test]
fn round_trip_small_medium_large() {
    for cells in [1, 100, 10_000] {
        let shield = shield_with_cells(cells);
        let bytes = encode(&shield);
        let back = read_shield(bytes.as_slice()).unwrap();
        assert_eq!(back, shield, "{cells} cells");
        // Re-encoding the decoded shield is byte-identical.
        assert_eq!(encode(&back), bytes, "{cells} cells");
    }
}

#[test]
fn multi_dimensional_round_trip() {
    let mut grid = Grid::new(vec![0.1, 2.0, 0.3], vec![0.0, -4.0, 1.0], vec![1.0, 4.0, 2.2]).unwrap();
    let cells: Vec<CellId> = grid.cells().collect();
    for cell in cells {
        grid.set_actions(cell, ActionSet::from_bits((cell.0 * 7 % 4) as u32));
    }
    let shield = Shield::new(grid, vec!["x".into(), "y".into()], Completeness::Incomplete, 9).unwrap();
    let back = read_shield(encode(&shield).as_slice()).unwrap();
    assert_eq!(back, shield);
    assert!(!back.is_converged());
}

#[test]
fn save_and_load_through_the_filesystem() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cruise.gshd");
    let shield = shield_with_cells(100);

    save_shield(&shield, &path).unwrap();
    assert_eq!(load_shield(&path).unwrap(), shield);

    // Overwriting keeps a single, complete file.
    let other = shield_with_cells(10);
    save_shield(&other, &path).unwrap();
    assert_eq!(load_shield(&path).unwrap(), other);
    let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn every_truncation_is_rejected() {
    let bytes = encode(&shield_with_cells(8));
    for cut in 0..bytes.len() {
        match read_shield(&bytes[..cut]) {
            Err(ShieldError::CorruptData(_)) => {}
            other => panic!("truncation at {cut} gave {other:?}"),
        }
    }

    let mut padded = bytes;
    padded.extend_from_slice(b"GARBAGE");
    assert!(matches!(
        read_shield(padded.as_slice()),
        Err(ShieldError::CorruptData(_))
    ));
}

#[test]
fn any_flipped_byte_is_detected() {
    let bytes = encode(&shield_with_cells(8));
    // Skip the magic and version, which have their own errors.
    for i in 8..bytes.len() {
        let mut damaged = bytes.clone();
        damaged[i] ^= 0x40;
        assert!(
            read_shield(damaged.as_slice()).is_err(),
            "flip at byte {i} went unnoticed"
        );
    }
}

#[test]
fn header_errors_are_specific() {
    let bytes = encode(&shield_with_cells(4));

    let mut wrong_magic = bytes.clone();
    wrong_magic[..4].copy_from_slice(b"PNG\0");
    assert!(matches!(
        read_shield(wrong_magic.as_slice()),
        Err(ShieldError::CorruptData(_))
    ));

    let mut newer = bytes;
    newer[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
    match read_shield(newer.as_slice()) {
        Err(ShieldError::UnsupportedFormat { found, expected }) => {
            assert_eq!(found, FORMAT_VERSION + 1);
            assert_eq!(expected, FORMAT_VERSION);
        }
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        load_shield(&dir.path().join("absent.gshd")),
        Err(ShieldError::Io(_))
    ));
}
