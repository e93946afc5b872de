use crate::{
    coords::{Coordinate, MarkerFormat, MarkerSet},
    error::{CellError, CellResult},
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves the marker input to an ordered list of files. A directory yields
/// its `.csv` files sorted by file name; a file path is taken as-is.
pub fn discover(input: &Path) -> CellResult<Vec<PathBuf>> {
    if !input.is_dir() {
        if !input.exists() {
            return Err(CellError::io(
                input,
                std::io::Error::new(std::io::ErrorKind::NotFound, "marker path does not exist"),
            ));
        }
        return Ok(vec![input.to_path_buf()]);
    }

    let entries = std::fs::read_dir(input).map_err(|e| CellError::io(input, e))?;
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CellError::io(input, e))?;
        let path = entry.path();
        if path.is_file() && MarkerFormat::from_path(&path) == Some(MarkerFormat::Csv) {
            found.push(path);
        }
    }
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("discovered {} marker files in {}", found.len(), input.display());
    Ok(found)
}

pub fn parse(path: &Path) -> CellResult<MarkerSet> {
    let format = MarkerFormat::from_path(path).ok_or_else(|| {
        CellError::parse(path, "unsupported marker file extension (expected .csv or .xml)")
    })?;
    let raw = std::fs::read_to_string(path).map_err(|e| CellError::io(path, e))?;
    let coordinates = match format {
        MarkerFormat::Csv => parse_csv(path, &raw)?,
        MarkerFormat::Xml => parse_xml(path, &raw)?,
    };
    Ok(MarkerSet::new(path, format, coordinates))
}

/// Headerless `row,col,slice` rows. Decimal values are truncated toward zero.
pub fn parse_csv(path: &Path, raw: &str) -> CellResult<Vec<Coordinate>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());

    let mut out = Vec::new();
    for (row_no, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| CellError::parse(path, format!("CSV row {row_no}: {e}")))?;
        if record.len() != 3 {
            return Err(CellError::parse(
                path,
                format!("CSV row {row_no}: expected 3 fields, found {}", record.len()),
            ));
        }
        let mut fields = [0i64; 3];
        for (j, tok) in record.iter().enumerate() {
            fields[j] = parse_truncated(tok).ok_or_else(|| {
                CellError::parse(
                    path,
                    format!("CSV row {row_no}, field {j}: '{tok}' is not a number"),
                )
            })?;
        }
        out.push(Coordinate::new(fields[0], fields[1], fields[2]));
    }
    Ok(out)
}

/// `MarkerX`/`MarkerY`/`MarkerZ` element lists paired by position.
pub fn parse_xml(path: &Path, raw: &str) -> CellResult<Vec<Coordinate>> {
    let doc = roxmltree::Document::parse(raw)
        .map_err(|e| CellError::parse(path, format!("XML: {e}")))?;

    let xs = tag_values(path, &doc, "MarkerX")?;
    let ys = tag_values(path, &doc, "MarkerY")?;
    let zs = tag_values(path, &doc, "MarkerZ")?;

    if xs.len() != ys.len() || xs.len() != zs.len() {
        return Err(CellError::parse(
            path,
            format!(
                "marker tag lists differ in length: MarkerX={} MarkerY={} MarkerZ={}",
                xs.len(),
                ys.len(),
                zs.len()
            ),
        ));
    }

    Ok(xs
        .into_iter()
        .zip(ys)
        .zip(zs)
        .map(|((x, y), z)| Coordinate::new(x, y, z))
        .collect())
}

fn tag_values(path: &Path, doc: &roxmltree::Document<'_>, tag: &str) -> CellResult<Vec<i64>> {
    doc.descendants()
        .filter(|n| n.has_tag_name(tag))
        .enumerate()
        .map(|(i, node)| {
            let text = node.text().map(str::trim).unwrap_or("");
            text.parse::<i64>().map_err(|_| {
                CellError::parse(path, format!("{tag}[{i}]: '{text}' is not an integer"))
            })
        })
        .collect()
}

fn parse_truncated(tok: &str) -> Option<i64> {
    if let Ok(v) = tok.parse::<i64>() {
        return Some(v);
    }
    let v = tok.parse::<f64>().ok()?;
    if !v.is_finite() || v.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(v.trunc() as i64)
}

