//! Readers and writers for hMetis hypergraphs and the line-per-vertex
//! auxiliary files (fixed blocks, communities, placement, groups, solutions).

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::warn;

use crate::error::{PartitionError, Result};
use crate::hypergraph::{Hypergraph, Matrix};

/// Reads an hMetis file with one-dimensional weights.
pub fn read_hmetis(path: impl AsRef<Path>) -> Result<Hypergraph> {
    read_hmetis_with_dims(path, 1, 1)
}

/// Reads an hMetis file whose weight lines carry `vertex_dimensions` and
/// `hyperedge_dimensions` values.
pub fn read_hmetis_with_dims(
    path: impl AsRef<Path>,
    vertex_dimensions: usize,
    hyperedge_dimensions: usize,
) -> Result<Hypergraph> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    parse_hmetis(path, &text, vertex_dimensions, hyperedge_dimensions)
}

/// Lines that carry data, numbered from 1 as in the file.
fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('%'))
}

fn parse_tokens<T: FromStr>(file: &Path, line_no: usize, line: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse().map_err(|_| PartitionError::Parse {
                file: file.to_path_buf(),
                line: line_no,
                msg: format!("cannot parse `{tok}`"),
            })
        })
        .collect()
}

fn parse_error(file: &Path, line: usize, msg: impl Into<String>) -> PartitionError {
    PartitionError::Parse {
        file: file.to_path_buf(),
        line,
        msg: msg.into(),
    }
}

pub(crate) fn parse_hmetis(
    file: &Path,
    text: &str,
    vertex_dimensions: usize,
    hyperedge_dimensions: usize,
) -> Result<Hypergraph> {
    let mut lines = data_lines(text);
    let (header_no, header) = lines
        .next()
        .ok_or_else(|| parse_error(file, 1, "missing header"))?;
    let header: Vec<usize> = parse_tokens(file, header_no, header)?;
    let (num_hyperedges, num_vertices, fmt) = match header[..] {
        [e, v] => (e, v, 0),
        [e, v, fmt] => (e, v, fmt),
        _ => return Err(parse_error(file, header_no, "expected `hyperedges vertices [fmt]`")),
    };
    let edge_weighted = fmt % 10 == 1;
    let vertex_weighted = fmt >= 10;

    let mut hyperedges = Vec::with_capacity(num_hyperedges);
    let mut hyperedge_weights = Vec::with_capacity(num_hyperedges);
    for e in 0..num_hyperedges {
        let (line_no, line) = lines
            .next()
            .ok_or_else(|| parse_error(file, header_no, format!("expected {num_hyperedges} hyperedges, found {e}")))?;
        let mut tokens = line.split_whitespace();
        let weights = if edge_weighted {
            let head: Vec<&str> = tokens.by_ref().take(hyperedge_dimensions).collect();
            parse_tokens(file, line_no, &head.join(" "))?
        } else {
            vec![1.0; hyperedge_dimensions]
        };
        let rest: Vec<&str> = tokens.collect();
        let ids: Vec<usize> = parse_tokens(file, line_no, &rest.join(" "))?;
        if ids.contains(&0) {
            return Err(parse_error(file, line_no, "vertex ids are 1-indexed"));
        }
        hyperedges.push(ids.into_iter().map(|v| v - 1).collect::<Vec<usize>>());
        hyperedge_weights.push(weights);
    }

    let vertex_weights: Matrix<f32> = if vertex_weighted {
        (0..num_vertices)
            .map(|v| {
                let (line_no, line) = lines.next().ok_or_else(|| {
                    parse_error(file, header_no, format!("expected {num_vertices} vertex weights, found {v}"))
                })?;
                let w: Vec<f32> = parse_tokens(file, line_no, line)?;
                if w.len() != vertex_dimensions {
                    return Err(parse_error(
                        file,
                        line_no,
                        format!("expected {vertex_dimensions} weights, found {}", w.len()),
                    ));
                }
                Ok(w)
            })
            .collect::<Result<_>>()?
    } else {
        vec![vec![1.0; vertex_dimensions]; num_vertices]
    };

    Hypergraph::new(vertex_weights, hyperedges, hyperedge_weights)
}

pub fn write_hmetis(path: impl AsRef<Path>, hg: &Hypergraph) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(out, "{} {} 11", hg.num_hyperedges(), hg.num_vertices())?;
    for e in 0..hg.num_hyperedges() {
        let weights = hg.hyperedge_weights(e).iter().map(f32::to_string);
        let pins = hg.vertices(e).iter().map(|v| (v + 1).to_string());
        writeln!(out, "{}", weights.chain(pins).collect::<Vec<_>>().join(" "))?;
    }
    for v in 0..hg.num_vertices() {
        let weights: Vec<String> = hg.vertex_weights(v).iter().map(f32::to_string).collect();
        writeln!(out, "{}", weights.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

/// One value per line. A file that does not parse, or has the wrong number
/// of lines, is discarded with a warning.
fn read_per_vertex<T: FromStr>(path: &Path, what: &str, num_vertices: usize) -> Result<Option<Vec<T>>> {
    let text = fs::read_to_string(path)?;
    let mut values = Vec::with_capacity(num_vertices);
    for (line_no, line) in data_lines(&text) {
        match line.parse() {
            Ok(value) => values.push(value),
            Err(_) => {
                warn!("discarding {what} file {}: bad value on line {line_no}", path.display());
                return Ok(None);
            }
        }
    }
    if values.len() != num_vertices {
        warn!(
            "discarding {what} file {}: {} entries for {num_vertices} vertices",
            path.display(),
            values.len()
        );
        return Ok(None);
    }
    Ok(Some(values))
}

/// Fixed block of every vertex, `-1` for free ones.
pub fn read_fixed(path: impl AsRef<Path>, num_vertices: usize) -> Result<Option<Vec<i32>>> {
    read_per_vertex(path.as_ref(), "fixed", num_vertices)
}

pub fn read_community(path: impl AsRef<Path>, num_vertices: usize) -> Result<Option<Vec<usize>>> {
    read_per_vertex(path.as_ref(), "community", num_vertices)
}

pub fn read_placement(path: impl AsRef<Path>, num_vertices: usize) -> Result<Option<Matrix<f32>>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut placement = Vec::with_capacity(num_vertices);
    for (line_no, line) in data_lines(&text) {
        match parse_tokens::<f32>(path, line_no, line) {
            Ok(loc) => placement.push(loc),
            Err(err) => {
                warn!("discarding placement file: {err}");
                return Ok(None);
            }
        }
    }
    if placement.len() != num_vertices {
        warn!(
            "discarding placement file {}: {} entries for {num_vertices} vertices",
            path.display(),
            placement.len()
        );
        return Ok(None);
    }
    Ok(Some(placement))
}

/// Groups of 1-indexed vertex ids, one group per line. Ids out of range are
/// dropped with a warning.
pub fn read_groups(path: impl AsRef<Path>, num_vertices: usize) -> Result<Vec<Vec<usize>>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut groups = vec![];
    for (line_no, line) in data_lines(&text) {
        let ids: Vec<usize> = match parse_tokens(path, line_no, line) {
            Ok(ids) => ids,
            Err(err) => {
                warn!("skipping group: {err}");
                continue;
            }
        };
        let group: Vec<usize> = ids
            .into_iter()
            .filter(|&id| {
                let ok = id >= 1 && id <= num_vertices;
                if !ok {
                    warn!("{}:{line_no}: ignoring vertex {id}", path.display());
                }
                ok
            })
            .map(|id| id - 1)
            .collect();
        if group.len() > 1 {
            groups.push(group);
        }
    }
    Ok(groups)
}

/// One block id per line, in vertex order.
pub fn write_solution(path: impl AsRef<Path>, solution: &[usize]) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for block in solution {
        writeln!(out, "{block}")?;
    }
    out.flush()?;
    Ok(())
}

/// `<hypergraph>.part.<K>`
pub fn solution_path(hgraph_path: impl AsRef<Path>, num_parts: usize) -> PathBuf {
    let mut name = hgraph_path.as_ref().as_os_str().to_owned();
    name.push(format!(".part.{num_parts}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hpart-{}-{name}", std::process::id()))
    }

    #[test]
    fn parses_plain_hmetis() {
        let text = "% comment\n3 4\n1 2\n2 3 4\n\n4 1\n";
        let h = parse_hmetis(Path::new("t.hgr"), text, 1, 1).unwrap();
        assert_eq!(h.num_vertices(), 4);
        assert_eq!(h.num_hyperedges(), 3);
        assert_eq!(h.vertices(1), &[1, 2, 3]);
        assert_eq!(h.vertices(2), &[3, 0]);
        assert_eq!(h.hyperedge_weights(0), &[1.0]);
        assert!(h.is_consistent());
    }

    #[test]
    fn parses_weighted_hmetis() {
        let text = "2 3 11\n5 1 2\n0.5 2 3\n1\n2\n3\n";
        let h = parse_hmetis(Path::new("t.hgr"), text, 1, 1).unwrap();
        assert_eq!(h.hyperedge_weights(0), &[5.0]);
        assert_eq!(h.hyperedge_weights(1), &[0.5]);
        assert_eq!(h.vertex_weights(2), &[3.0]);

        let text = "1 2 11\n1 2 1 2\n1 1\n2 2\n";
        let h = parse_hmetis(Path::new("t.hgr"), text, 2, 2).unwrap();
        assert_eq!(h.hyperedge_weights(0), &[1.0, 2.0]);
        assert_eq!(h.vertices(0), &[0, 1]);
        assert_eq!(h.vertex_weights(1), &[2.0, 2.0]);
    }

    #[test]
    fn rejects_malformed_hmetis() {
        let file = Path::new("bad.hgr");
        let missing = parse_hmetis(file, "3 4\n1 2\n", 1, 1).unwrap_err();
        assert!(matches!(missing, PartitionError::Parse { line: 1, .. }));
        let zero = parse_hmetis(file, "1 2\n0 1\n", 1, 1).unwrap_err();
        assert!(matches!(zero, PartitionError::Parse { line: 2, .. }));
        let junk = parse_hmetis(file, "1 2\n1 x\n", 1, 1).unwrap_err();
        assert!(matches!(junk, PartitionError::Parse { line: 2, .. }));
        let range = parse_hmetis(file, "1 2\n1 3\n", 1, 1).unwrap_err();
        assert!(matches!(range, PartitionError::VertexOutOfRange { vertex: 2, .. }));
    }

    #[test]
    fn hmetis_round_trip() {
        let text = "2 3 11\n5 1 2\n0.5 2 3\n1\n2\n3\n";
        let h = parse_hmetis(Path::new("t.hgr"), text, 1, 1).unwrap();
        let path = scratch("round-trip.hgr");
        write_hmetis(&path, &h).unwrap();
        let back = read_hmetis(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn auxiliary_files() {
        let path = scratch("fixed");
        fs::write(&path, "-1\n1\n0\n").unwrap();
        assert_eq!(read_fixed(&path, 3).unwrap(), Some(vec![-1, 1, 0]));
        assert_eq!(read_fixed(&path, 4).unwrap(), None);
        assert_eq!(read_community(&path, 3).unwrap(), None);

        fs::write(&path, "0.5 1\n2 3\n").unwrap();
        assert_eq!(read_placement(&path, 2).unwrap(), Some(vec![vec![0.5, 1.0], vec![2.0, 3.0]]));

        fs::write(&path, "1 2\n3 9 4\n5\n").unwrap();
        assert_eq!(read_groups(&path, 5).unwrap(), vec![vec![0, 1], vec![2, 3]]);
        fs::remove_file(&path).unwrap();

        assert!(matches!(read_fixed(&path, 3), Err(PartitionError::Io(_))));
    }

    #[test]
    fn solution_files() {
        assert_eq!(solution_path("ibm01.hgr", 4), PathBuf::from("ibm01.hgr.part.4"));
        let path = scratch("solution");
        write_solution(&path, &[0, 1, 1]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0\n1\n1\n");
        fs::remove_file(&path).unwrap();
    }
}
