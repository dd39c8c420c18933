//! Minimal NumPy `.npy` support for two-dimensional little-endian `f8` arrays.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail, ensure};
use ndarray::Array2;

const MAGIC: &[u8] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;

pub fn write_npy(path: &Path, array: &Array2<f64>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, encode(array))
        .with_context(|| format!("Failed to write array file: {}", path.display()))
}

pub fn read_npy(path: &Path) -> Result<Array2<f64>> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read array file: {}", path.display()))?;
    decode(&bytes).with_context(|| format!("Invalid array file: {}", path.display()))
}

pub fn encode(array: &Array2<f64>) -> Vec<u8> {
    let (rows, cols) = array.dim();
    let mut header =
        format!("{{'descr': '<f8', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");
    // magic + version + u16 length + header + '\n'
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(unpadded + padding + rows * cols * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in array.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Array2<f64>> {
    ensure!(
        bytes.len() >= MAGIC.len() + 4 && &bytes[..MAGIC.len()] == MAGIC,
        "missing NPY magic"
    );
    let major = bytes[MAGIC.len()];
    let (header_len, header_start) = match major {
        1 => {
            let len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
            (len, 10)
        }
        2 | 3 => {
            ensure!(bytes.len() >= 12, "truncated NPY header");
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
            (len, 12)
        }
        other => bail!("unsupported NPY version {other}"),
    };
    let data_start = header_start + header_len;
    ensure!(bytes.len() >= data_start, "truncated NPY header");
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .context("NPY header is not UTF-8")?;

    let descr = header_value(header, "descr")?;
    ensure!(
        descr.trim_matches(|c| c == '\'' || c == '"') == "<f8",
        "unsupported dtype {descr}, expected '<f8'"
    );
    ensure!(
        header_value(header, "fortran_order")? == "False",
        "Fortran-ordered arrays are not supported"
    );
    let (rows, cols) = parse_shape(header_value(header, "shape")?)?;

    let payload = &bytes[data_start..];
    ensure!(
        payload.len() == rows * cols * 8,
        "payload holds {} byte(s), expected {}",
        payload.len(),
        rows * cols * 8
    );
    let values = payload
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect();
    Array2::from_shape_vec((rows, cols), values).context("NPY shape mismatch")
}

fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let needle = format!("'{key}':");
    let start = header
        .find(&needle)
        .ok_or_else(|| anyhow!("NPY header missing '{key}'"))?
        + needle.len();
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find(',')
    }
    .ok_or_else(|| anyhow!("NPY header value for '{key}' is unterminated"))?;
    Ok(rest[..end].trim())
}

fn parse_shape(raw: &str) -> Result<(usize, usize)> {
    let inner = raw.trim_start_matches('(').trim_end_matches(')');
    let dims: Vec<usize> = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| anyhow!("invalid shape {raw}")))
        .collect::<Result<_>>()?;
    match dims.as_slice() {
        [rows, cols] => Ok((*rows, *cols)),
        [len] => Ok((*len, 1)),
        _ => bail!("expected a 1-D or 2-D shape, found {raw}"),
    }
}
