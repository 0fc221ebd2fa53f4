//! .btch hierarchy output.
//!
//! Text format, line oriented:
//!
//! Header:
//!   BTCH <version> <n_nodes> <period> <n_input_edges>
//!
//! One line per removed directed edge (written when its incident node is
//! contracted, each edge exactly once):
//!   E <from> <to> <n_original_edges> <n_slices> {<q> <cost>:<prob>,...} ...
//!
//! where `<q>` is the 15-minute slot index of the slice's interval start.
//!
//! One line per node after ordering completes:
//!   L <node> <level>

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::graph::{NodeId, OrderEdgeData};
use crate::hist_cost::HistCost;
use crate::histogram::Histogram;

const VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("btch output: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink for finalized hierarchy data. `write_edge` is invoked once per
/// removed directed edge before the node removal completes; order across
/// edges is unspecified.
pub trait HierarchyWriter {
    fn write_edge(&mut self, from: NodeId, to: NodeId, data: &OrderEdgeData) -> Result<(), WriteError>;
    fn write_level_info(&mut self, node_to_level: &[u32]) -> Result<(), WriteError>;
    fn close(&mut self) -> Result<(), WriteError>;
}

/// Buffered text writer for `.btch` files.
pub struct BtchOutputFile {
    writer: BufWriter<File>,
    n_edges_written: u64,
}

impl BtchOutputFile {
    pub fn create<P: AsRef<Path>>(
        path: P,
        n_nodes: usize,
        period: u32,
        n_input_edges: usize,
    ) -> Result<Self, WriteError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "BTCH {} {} {} {}", VERSION, n_nodes, period, n_input_edges)?;
        Ok(BtchOutputFile { writer, n_edges_written: 0 })
    }

    pub fn n_edges_written(&self) -> u64 {
        self.n_edges_written
    }

    fn write_histogram(&mut self, h: &Histogram) -> Result<(), WriteError> {
        write!(self.writer, " {{{}", h.interval().quarter_index())?;
        let mut first = true;
        for (cost, prob) in h.buckets() {
            let sep = if first { ' ' } else { ',' };
            write!(self.writer, "{}{}:{}", sep, cost, prob)?;
            first = false;
        }
        write!(self.writer, "}}")?;
        Ok(())
    }
}

impl HierarchyWriter for BtchOutputFile {
    fn write_edge(&mut self, from: NodeId, to: NodeId, data: &OrderEdgeData) -> Result<(), WriteError> {
        write!(
            self.writer,
            "E {} {} {} {}",
            from,
            to,
            data.n_original_edges(),
            data.cost().size()
        )?;
        for h in data.cost().histograms() {
            self.write_histogram(h)?;
        }
        writeln!(self.writer)?;
        self.n_edges_written += 1;
        Ok(())
    }

    fn write_level_info(&mut self, node_to_level: &[u32]) -> Result<(), WriteError> {
        for (node, level) in node_to_level.iter().enumerate() {
            writeln!(self.writer, "L {} {}", node, level)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriteError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Edge record captured by `MemoryWriter`.
#[derive(Debug, Clone)]
pub struct WrittenEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub cost: HistCost,
    pub n_original_edges: u32,
    pub via: Vec<NodeId>,
}

/// In-memory sink for tests and programmatic consumers.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    pub edges: Vec<WrittenEdge>,
    pub levels: Vec<u32>,
    pub closed: bool,
}

impl HierarchyWriter for MemoryWriter {
    fn write_edge(&mut self, from: NodeId, to: NodeId, data: &OrderEdgeData) -> Result<(), WriteError> {
        self.edges.push(WrittenEdge {
            from,
            to,
            cost: data.cost().clone(),
            n_original_edges: data.n_original_edges(),
            via: data.shortcuts().iter().map(|s| s.via).collect(),
        });
        Ok(())
    }

    fn write_level_info(&mut self, node_to_level: &[u32]) -> Result<(), WriteError> {
        self.levels = node_to_level.to_vec();
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriteError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OrderEdgeData;

    #[test]
    fn test_btch_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.btch");

        let mut out = BtchOutputFile::create(&path, 2, 86_400, 1).unwrap();
        let data = OrderEdgeData::new(HistCost::constant(5), 1);
        out.write_edge(0, 1, &data).unwrap();
        out.write_level_info(&[1, 0]).unwrap();
        out.close().unwrap();
        assert_eq!(out.n_edges_written(), 1);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "BTCH 2 2 86400 1");
        assert_eq!(lines[1], "E 0 1 1 1 {0 5:100}");
        assert_eq!(lines[2], "L 0 1");
        assert_eq!(lines[3], "L 1 0");
    }

    #[test]
    fn test_memory_writer_records_everything() {
        let mut w = MemoryWriter::default();
        let data = OrderEdgeData::new(HistCost::constant(9), 3);
        w.write_edge(4, 7, &data).unwrap();
        w.write_level_info(&[0]).unwrap();
        w.close().unwrap();

        assert_eq!(w.edges.len(), 1);
        assert_eq!(w.edges[0].from, 4);
        assert_eq!(w.edges[0].n_original_edges, 3);
        assert!(w.closed);
    }
}
