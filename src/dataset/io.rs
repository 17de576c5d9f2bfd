use anyhow::{Context, Result, bail};
use ndarray::Array1;
use ndarray_npy::{NpzReader, NpzWriter, read_npy};
use std::fs::File;
use std::path::Path;

use super::{ColumnValues, Dataset};
use crate::clustering::Clusters;

/// Cells read as missing in numeric columns.
const MISSING: [&str; 4] = ["", "NA", "NaN", "nan"];

fn is_missing(cell: &str) -> bool {
    MISSING.contains(&cell.trim())
}

/// Int if every present cell parses as an integer, Float if every present
/// cell parses as a number, Text otherwise.
fn infer_column(cells: Vec<String>) -> ColumnValues {
    let present = || cells.iter().map(|c| c.trim()).filter(|c| !MISSING.contains(c));
    if present().all(|c| c.parse::<i64>().is_ok()) {
        return ColumnValues::Int(
            cells
                .iter()
                .map(|c| if is_missing(c) { None } else { c.trim().parse().ok() })
                .collect(),
        );
    }
    if present().all(|c| c.parse::<f64>().is_ok()) {
        return ColumnValues::Float(
            cells
                .iter()
                .map(|c| if is_missing(c) { None } else { c.trim().parse().ok() })
                .collect(),
        );
    }
    ColumnValues::Text(
        cells
            .into_iter()
            .map(|c| if c.is_empty() { None } else { Some(c) })
            .collect(),
    )
}

pub fn read_csv(path: impl AsRef<Path>) -> Result<Dataset> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("open {}", path.display()))?;
    let headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("read header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (row, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("{}: record {}", path.display(), row + 1))?;
        if record.len() != headers.len() {
            bail!(
                "{}: record {} has {} fields, header has {}",
                path.display(),
                row + 1,
                record.len(),
                headers.len()
            );
        }
        for (col, cell) in record.iter().enumerate() {
            cells[col].push(cell.to_string());
        }
    }

    let mut data = Dataset::new();
    for (name, column) in headers.into_iter().zip(cells) {
        data.insert(name, infer_column(column))?;
    }
    Ok(data)
}

pub fn write_csv(path: impl AsRef<Path>, data: &Dataset) -> Result<()> {
    let path = path.as_ref();
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    wtr.write_record(data.column_names())?;
    for row in 0..data.n_rows() {
        wtr.write_record(data.columns().iter().map(|c| c.values.render(row)))?;
    }
    wtr.flush().with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn read_labels_npz(path: &Path) -> Result<Array1<i64>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut npz = NpzReader::new(f).context("read npz")?;
    let names = npz.names().context("list npz entries")?;
    let name = ["clusters.npy", "clusters"]
        .into_iter()
        .find(|n| names.iter().any(|x| x == n))
        .with_context(|| format!("{}: no `clusters` array", path.display()))?;
    let arr: Array1<i64> = npz.by_name(name).with_context(|| format!("missing {name}"))?;
    Ok(arr)
}

/// Per-row integer cluster labels from a `.npy` file or the `clusters`
/// array of an `.npz` archive.
pub fn read_cluster_labels(path: impl AsRef<Path>) -> Result<Clusters> {
    let path = path.as_ref();
    let labels: Array1<i64> = match path.extension().and_then(|e| e.to_str()) {
        Some("npz") => read_labels_npz(path)?,
        _ => read_npy(path).with_context(|| format!("read {}", path.display()))?,
    };
    Ok(Clusters::from_labels(&labels.to_vec()))
}

/// Every split column as int64 and every distance column as float64.
pub fn write_splits_npz(path: impl AsRef<Path>, data: &Dataset, columns: &[String]) -> Result<()> {
    let path = path.as_ref();
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut npz = NpzWriter::new(f);

    for name in columns {
        let col = data
            .column(name)
            .with_context(|| format!("no column {name:?} to export"))?;
        match &col.values {
            ColumnValues::Int(v) => {
                let arr = Array1::from_iter(v.iter().map(|x| x.unwrap_or(-1)));
                npz.add_array(format!("{name}.npy"), &arr)?;
            }
            ColumnValues::Float(v) => {
                let arr = Array1::from_iter(v.iter().map(|x| x.unwrap_or(f64::NAN)));
                npz.add_array(format!("{name}.npy"), &arr)?;
            }
            ColumnValues::Text(_) => bail!("column {name:?} is text and cannot be exported to npz"),
        }
    }

    npz.finish()?;
    Ok(())
}
