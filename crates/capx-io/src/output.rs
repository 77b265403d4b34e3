//! Capacitance matrix and geometry output: text, CSV, and JSON matrix
//! emitters, diagonal-dominance/off-diagonal-sign sanity checks, and a
//! FastCap-style panel list dump for inspection.

use std::collections::BTreeMap;
use std::io::Write;

use serde::Serialize;

use capx_core::{ConductorRegistry, ElementId, Panel, Tree};

use crate::error::Error;

/// Print the capacitance matrix as aligned columns, one row per line, with
/// a header row of conductor names — the plain-text analogue of the
/// original tool's `OutputCapMtx`.
pub fn write_matrix_text(
    w: &mut impl Write,
    labels: &[String],
    matrix: &[Vec<f64>],
) -> Result<(), Error> {
    writeln!(w, "{}", labels.join("\t"))?;
    for (row, label) in matrix.iter().zip(labels) {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.6e}")).collect();
        writeln!(w, "{label}\t{}", cells.join("\t"))?;
    }
    Ok(())
}

/// Print the capacitance matrix as CSV, header row first.
pub fn write_matrix_csv(
    w: &mut impl Write,
    labels: &[String],
    matrix: &[Vec<f64>],
) -> Result<(), Error> {
    writeln!(w, ",{}", labels.join(","))?;
    for (row, label) in matrix.iter().zip(labels) {
        let cells: Vec<String> = row.iter().map(f64::to_string).collect();
        writeln!(w, "{label},{}", cells.join(","))?;
    }
    Ok(())
}

#[derive(Serialize)]
struct MatrixJson<'a> {
    labels: &'a [String],
    matrix: &'a [Vec<f64>],
}

/// Machine-readable sibling output, one JSON object with the row/column
/// labels and the matrix itself.
pub fn write_matrix_json(
    w: &mut impl Write,
    labels: &[String],
    matrix: &[Vec<f64>],
) -> Result<(), Error> {
    let doc = MatrixJson { labels, matrix };
    serde_json::to_writer_pretty(&mut *w, &doc).map_err(std::io::Error::from)?;
    writeln!(w)?;
    Ok(())
}

/// Diagonal dominance check (testable property 5): every row's diagonal
/// entry should be at least as large as the sum of the magnitudes of its
/// off-diagonal entries, which holds for a physically well-posed
/// capacitance matrix. Violations are reported as warning strings rather
/// than treated as failures, since a poorly converged GMRES solve can
/// produce a matrix that is merely close to, not exactly, dominant.
#[must_use]
pub fn check_diagonal_dominance(labels: &[String], matrix: &[Vec<f64>]) -> Vec<String> {
    let mut warnings = Vec::new();
    for (i, row) in matrix.iter().enumerate() {
        let off_diag_sum: f64 = row.iter().enumerate().filter(|&(j, _)| j != i).map(|(_, v)| v.abs()).sum();
        if row[i] < off_diag_sum {
            warnings.push(format!(
                "row {} ({}) is not diagonally dominant: diagonal {:.6e}, off-diagonal sum {:.6e}",
                i,
                labels.get(i).map_or("?", String::as_str),
                row[i],
                off_diag_sum,
            ));
        }
    }
    warnings
}

/// Off-diagonal sign check (testable property 6): every off-diagonal entry
/// of a real-permittivity capacitance matrix must be non-positive (driving
/// one conductor to unit potential can only draw charge away from, never
/// push charge onto, another grounded conductor).
#[must_use]
pub fn check_off_diagonal_sign(labels: &[String], matrix: &[Vec<f64>]) -> Vec<String> {
    let mut warnings = Vec::new();
    for (i, row) in matrix.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            if i != j && v > 0.0 {
                warnings.push(format!(
                    "entry ({}, {}) ({} -> {}) is positive ({:.6e}): expected non-positive off-diagonal",
                    i,
                    j,
                    labels.get(i).map_or("?", String::as_str),
                    labels.get(j).map_or("?", String::as_str),
                    v,
                ));
            }
        }
    }
    warnings
}

/// Dump every conductor's leaf panels as a flat FastCap-style panel list,
/// one `T`/`S` directive per leaf, grouped under a conductor title comment.
/// An approximation of the original tool's `OutputFastCapFile`/
/// `OutputPanelTree`, useful for visual inspection of a refined mesh rather
/// than as a re-parseable deck (refined leaves have no stable on-disk name).
pub fn dump_geometry(
    w: &mut impl Write,
    tree: &Tree,
    registry: &ConductorRegistry,
    leaves_by_group: &BTreeMap<u32, Vec<ElementId>>,
) -> Result<(), Error> {
    writeln!(w, "0 refined geometry dump")?;
    for conductor in registry.iter() {
        let Some(leaves) = leaves_by_group.get(&conductor.group) else { continue };
        writeln!(w, "* conductor {} ({} leaves)", conductor.name, leaves.len())?;
        for &id in leaves {
            let elem = tree.get(id);
            match elem.panel {
                Some(Panel::Triangle3D(t)) => {
                    let v = t.vertices;
                    writeln!(
                        w,
                        "T {} {:e} {:e} {:e} {:e} {:e} {:e} {:e} {:e} {:e}",
                        conductor.name,
                        v[0].x, v[0].y, v[0].z,
                        v[1].x, v[1].y, v[1].z,
                        v[2].x, v[2].y, v[2].z,
                    )?;
                }
                Some(Panel::Segment2D(s)) => {
                    let v = s.vertices;
                    writeln!(
                        w,
                        "S {} {:e} {:e} {:e} {:e}",
                        conductor.name, v[0].x, v[0].y, v[1].x, v[1].y,
                    )?;
                }
                None => {}
            }
        }
    }
    writeln!(w, "E")?;
    Ok(())
}
