//! Node topology file.
//!
//! Line-oriented text, `#` starts a comment line. Each line is
//!
//! ```text
//! name x y z [rho]
//! ```
//!
//! giving a node's position in meters and the optional obstacle density
//! around it. Entries are assigned to nodes in file order.

use anyhow::Context;
use std::fs;
use std::path::Path;

use super::{LineError, content_lines, parse_number};
use crate::simulation::geometry::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct TopologyEntry {
    pub name: String,
    pub position: Position,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    entries: Vec<TopologyEntry>,
}

impl Topology {
    /// Parse topology text. Malformed lines are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for (number, line) in content_lines(text) {
            match parse_line(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("Skipping topology line {}: {} ({:?})", number, e, line),
            }
        }
        Topology { entries }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read topology file: {}", path.display()))?;
        let topology = Self::parse(&text);
        log::info!("Loaded {} node positions from {}", topology.len(), path.display());
        Ok(topology)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TopologyEntry] {
        &self.entries
    }

    /// Position of the node at `index` in file order.
    pub fn position(&self, index: usize) -> Option<&Position> {
        self.entries.get(index).map(|e| &e.position)
    }
}

fn parse_line(line: &str) -> Result<TopologyEntry, LineError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if !(4..=5).contains(&tokens.len()) {
        return Err(LineError::FieldCount {
            expected: "4 or 5",
            found: tokens.len(),
        });
    }
    let x = parse_number(tokens[1])?;
    let y = parse_number(tokens[2])?;
    let z = parse_number(tokens[3])?;
    let rho = match tokens.get(4) {
        Some(token) => parse_number(token)?,
        None => 0.0,
    };
    Ok(TopologyEntry {
        name: tokens[0].to_string(),
        position: Position::with_density(x, y, z, rho),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positions_with_and_without_density() {
        let t = Topology::parse("# office floor\nnode0 0 0 0\nnode1 3.5 -2 1 0.25\n\n");
        assert_eq!(t.len(), 2);
        assert_eq!(t.entries()[0].name, "node0");
        assert_eq!(t.position(0), Some(&Position::new(0.0, 0.0, 0.0)));
        assert_eq!(t.position(1), Some(&Position::with_density(3.5, -2.0, 1.0, 0.25)));
        assert_eq!(t.position(2), None);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let t = Topology::parse("a 1 2\nb 1 2 x\nc 1 2 3 4 5\nd 1 2 3\n");
        assert_eq!(t.len(), 1);
        assert_eq!(t.entries()[0].name, "d");
    }

    #[test]
    fn line_errors_describe_the_problem() {
        assert_eq!(
            parse_line("a 1 2"),
            Err(LineError::FieldCount { expected: "4 or 5", found: 3 })
        );
        assert_eq!(
            parse_line("a 1 two 3"),
            Err(LineError::InvalidNumber { token: "two".to_string() })
        );
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Topology::load(Path::new("/nonexistent/topology.txt")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/topology.txt"));
    }
}
