// src/compile.rs
//
// Flattened lookup form of a shield.
//
// `CompiledShield` keeps one u32 mask per cell and the per-axis geometry
// needed to index it with plain arithmetic. It backs runtime enforcement
// and can be emitted as a self-contained C99 source file for runtimes that
// cannot link this crate.

use std::io::Write;

use crate::actions::ActionSet;
use crate::error::{Result, ShieldError};
use crate::shield::{Completeness, Shield};

/// Masks per line in emitted C tables.
const MASKS_PER_LINE: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledShield {
    granularity: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    size: Vec<usize>,
    strides: Vec<usize>,
    masks: Vec<u32>,
    action_names: Vec<String>,
    completeness: Completeness,
}

impl CompiledShield {
    /// Unclassified cells compile to an empty mask.
    pub fn from_shield(shield: &Shield) -> Self {
        let grid = shield.grid();
        Self {
            granularity: grid.granularity().to_vec(),
            lower: grid.bounds().lower.clone(),
            upper: grid.bounds().upper.clone(),
            size: grid.size().to_vec(),
            strides: grid.strides().to_vec(),
            masks: grid.labels().iter().map(|l| l.allowed().bits()).collect(),
            action_names: shield.action_names().to_vec(),
            completeness: shield.completeness(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.granularity.len()
    }

    pub fn num_actions(&self) -> usize {
        self.action_names.len()
    }

    pub fn num_cells(&self) -> usize {
        self.masks.len()
    }

    pub fn action_names(&self) -> &[String] {
        &self.action_names
    }

    pub fn completeness(&self) -> Completeness {
        self.completeness
    }

    pub fn masks(&self) -> &[u32] {
        &self.masks
    }

    /// Flat index of the cell holding `state`, `None` outside the domain.
    /// Agrees with `Grid::cell_of`.
    #[inline]
    pub fn cell_index(&self, state: &[f64]) -> Option<usize> {
        if state.len() != self.dimensions() {
            return None;
        }
        let mut flat = 0usize;
        for (axis, &x) in state.iter().enumerate() {
            let lo = self.lower[axis];
            if !x.is_finite() || x < lo || x >= self.upper[axis] {
                return None;
            }
            let k = (((x - lo) / self.granularity[axis]).floor() as usize).min(self.size[axis] - 1);
            flat += k * self.strides[axis];
        }
        Some(flat)
    }

    /// Flat index after clamping each axis into the domain.
    #[inline]
    pub fn clamped_index(&self, state: &[f64]) -> Result<usize> {
        if state.len() != self.dimensions() {
            return Err(ShieldError::InvalidState(format!(
                "expected {} coordinates, got {}",
                self.dimensions(),
                state.len()
            )));
        }
        let mut flat = 0usize;
        for (axis, &x) in state.iter().enumerate() {
            if !x.is_finite() {
                return Err(ShieldError::InvalidState(format!(
                    "coordinate {axis} is not finite ({x})"
                )));
            }
            let t = ((x - self.lower[axis]) / self.granularity[axis]).floor();
            let k = if t <= 0.0 {
                0
            } else {
                (t as usize).min(self.size[axis] - 1)
            };
            flat += k * self.strides[axis];
        }
        Ok(flat)
    }

    /// Allowed actions at `state`; empty outside the domain.
    #[inline]
    pub fn allowed(&self, state: &[f64]) -> ActionSet {
        self.cell_index(state)
            .map(|i| ActionSet::from_bits(self.masks[i]))
            .unwrap_or(ActionSet::EMPTY)
    }

    #[inline]
    pub(crate) fn mask_at(&self, index: usize) -> ActionSet {
        ActionSet::from_bits(self.masks[index])
    }
}

/// Write a C99 translation unit exposing the shield as static tables.
///
/// Generated symbols, for `prefix = "shield"`:
///
/// ```text
/// SHIELD_DIMENSIONS, SHIELD_NUM_ACTIONS, SHIELD_NUM_CELLS
/// long shield_cell_index(const double *state);      /* -1 when outside */
/// uint32_t shield_allowed(const double *state);     /* 0 when outside */
/// int shield_is_allowed(const double *state, int action);
/// ```
pub fn emit_c_table<W: Write>(compiled: &CompiledShield, prefix: &str, mut out: W) -> Result<()> {
    if !is_c_identifier(prefix) {
        return Err(ShieldError::InvalidSymbol(prefix.to_string()));
    }
    let upper = prefix.to_ascii_uppercase();
    let dims = compiled.dimensions();

    writeln!(out, "/* Generated by gridshield. Do not edit. */")?;
    if compiled.completeness == Completeness::Incomplete {
        writeln!(
            out,
            "/* WARNING: synthesis stopped before a fixed point; labels are a finite-horizon guarantee. */"
        )?;
    }
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out)?;
    writeln!(out, "#define {upper}_DIMENSIONS {dims}")?;
    writeln!(out, "#define {upper}_NUM_ACTIONS {}", compiled.num_actions())?;
    writeln!(out, "#define {upper}_NUM_CELLS {}", compiled.num_cells())?;
    writeln!(out)?;

    writeln!(
        out,
        "const char *const {prefix}_action_names[{upper}_NUM_ACTIONS] = {{{}}};",
        compiled
            .action_names
            .iter()
            .map(|n| c_string_literal(n))
            .collect::<Vec<_>>()
            .join(", ")
    )?;
    write_double_array(&mut out, prefix, "granularity", &upper, &compiled.granularity)?;
    write_double_array(&mut out, prefix, "lower", &upper, &compiled.lower)?;
    write_double_array(&mut out, prefix, "upper", &upper, &compiled.upper)?;
    write_long_array(&mut out, prefix, "size", &upper, &compiled.size)?;
    write_long_array(&mut out, prefix, "stride", &upper, &compiled.strides)?;
    writeln!(out)?;

    writeln!(
        out,
        "static const uint32_t {prefix}_masks[{upper}_NUM_CELLS] = {{"
    )?;
    for chunk in compiled.masks.chunks(MASKS_PER_LINE) {
        let line = chunk
            .iter()
            .map(|m| format!("0x{m:08x}u"))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "    {line},")?;
    }
    writeln!(out, "}};")?;
    writeln!(out)?;

    write!(
        out,
        "\
long {prefix}_cell_index(const double *state)
{{
    long index = 0;
    for (int axis = 0; axis < {upper}_DIMENSIONS; ++axis) {{
        double x = state[axis];
        if (!(x >= {prefix}_lower[axis] && x < {prefix}_upper[axis])) {{
            return -1;
        }}
        long k = (long)((x - {prefix}_lower[axis]) / {prefix}_granularity[axis]);
        if (k >= {prefix}_size[axis]) {{
            k = {prefix}_size[axis] - 1;
        }}
        index += k * {prefix}_stride[axis];
    }}
    return index;
}}

uint32_t {prefix}_allowed(const double *state)
{{
    long index = {prefix}_cell_index(state);
    return index < 0 ? 0u : {prefix}_masks[index];
}}

int {prefix}_is_allowed(const double *state, int action)
{{
    if (action < 0 || action >= {upper}_NUM_ACTIONS) {{
        return 0;
    }}
    return (int)(({prefix}_allowed(state) >> action) & 1u);
}}
"
    )?;
    out.flush()?;
    Ok(())
}

fn write_double_array<W: Write>(
    out: &mut W,
    prefix: &str,
    name: &str,
    upper: &str,
    values: &[f64],
) -> Result<()> {
    // `{:e}` prints the shortest representation that round-trips.
    let body = values
        .iter()
        .map(|v| format!("{v:e}"))
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(
        out,
        "static const double {prefix}_{name}[{upper}_DIMENSIONS] = {{{body}}};"
    )?;
    Ok(())
}

fn write_long_array<W: Write>(
    out: &mut W,
    prefix: &str,
    name: &str,
    upper: &str,
    values: &[usize],
) -> Result<()> {
    let body = values
        .iter()
        .map(|v| format!("{v}L"))
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(
        out,
        "static const long {prefix}_{name}[{upper}_DIMENSIONS] = {{{body}}};"
    )?;
    Ok(())
}

pub(crate) fn is_c_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn c_string_literal(s: &str) -> String {
    let mut lit = String::with_capacity(s.len() + 2);
    lit.push('"');
    for b in s.bytes() {
        match b {
            b'"' => lit.push_str("\\\""),
            b'\\' => lit.push_str("\\\\"),
            0x20..=0x7e => lit.push(b as char),
            _ => lit.push_str(&format!("\\{b:03o}")),
        }
    }
    lit.push('"');
    lit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellId, CellRef, Grid};

    fn shield() -> Shield {
        let mut grid = Grid::new(vec![1.0, 0.5], vec![0.0, -1.0], vec![3.0, 1.0]).unwrap();
        for (i, cell) in grid.cells().collect::<Vec<_>>().into_iter().enumerate() {
            grid.set_actions(cell, ActionSet::from_bits((i % 4) as u32));
        }
        Shield::new(
            grid,
            vec!["left".into(), "right \"fast\"".into()],
            Completeness::Converged,
            2,
        )
        .unwrap()
    }

    #[test]
    fn lookup_agrees_with_grid() {
        let shield = shield();
        let compiled = CompiledShield::from_shield(&shield);
        let probes = [
            vec![0.0, -1.0],
            vec![2.999, 0.999],
            vec![1.5, 0.25],
            vec![3.0, 0.0],
            vec![-0.1, 0.0],
            vec![1.0, f64::NAN],
        ];
        for p in &probes {
            let expected = match shield.grid().cell_of(p) {
                CellRef::Inside(CellId(i)) => Some(i),
                CellRef::Outside => None,
            };
            assert_eq!(compiled.cell_index(p), expected, "probe {p:?}");
            assert_eq!(compiled.allowed(p), shield.allowed_at(p));
        }
        assert_eq!(compiled.clamped_index(&[9.0, 9.0]).unwrap(), compiled.num_cells() - 1);
        assert!(compiled.clamped_index(&[f64::INFINITY, 0.0]).is_err());
    }

    #[test]
    fn emits_expected_symbols() {
        let compiled = CompiledShield::from_shield(&shield());
        let mut buf = Vec::new();
        emit_c_table(&compiled, "acc", &mut buf).unwrap();
        let src = String::from_utf8(buf).unwrap();

        assert!(src.contains("#define ACC_DIMENSIONS 2"));
        assert!(src.contains("#define ACC_NUM_ACTIONS 2"));
        assert!(src.contains("#define ACC_NUM_CELLS 12"));
        assert!(src.contains("long acc_cell_index(const double *state)"));
        assert!(src.contains("uint32_t acc_allowed(const double *state)"));
        assert!(src.contains("int acc_is_allowed(const double *state, int action)"));
        assert!(src.contains("static const double acc_granularity[ACC_DIMENSIONS] = {1e0, 5e-1};"));
        assert!(src.contains("\"right \\\"fast\\\"\""));
        assert!(src.contains("0x00000003u"));
        assert!(!src.contains("WARNING"));
    }

    #[test]
    fn rejects_bad_prefix() {
        let compiled = CompiledShield::from_shield(&shield());
        for prefix in ["", "1abc", "has-dash", "sp ace"] {
            assert!(matches!(
                emit_c_table(&compiled, prefix, Vec::<u8>::new()),
                Err(ShieldError::InvalidSymbol(_))
            ));
        }
    }
}
