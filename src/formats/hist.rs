//! Measurement input format.
//!
//! Text, one block per edge:
//!
//!   # <edge_id> <source> <target> <avg_cost>
//!   {
//!   <location> <traversal_time> <HH:MM:SS> <day_of_week>
//!   ...
//!   }
//!
//! The measurement block is optional. Day of week is 0 (Monday) through
//! 6 (Sunday); 5 and 6 are the weekend. A malformed measurement line
//! discards the whole block for that edge (warned, not fatal): the edge
//! falls back to a constant histogram built from the average cost, as if it
//! had zero measurements.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::warn;
use thiserror::Error;

use crate::graph::NodeId;
use crate::hist_cost::HistCost;
use crate::histogram::{AlgebraError, Histogram};
use crate::interval::{DaySchedule, TimeInterval, TimeOfDay, QUARTER_SLOTS, SECONDS_PER_QUARTER};

#[derive(Debug, Error)]
pub enum HistFormatError {
    #[error("measurement input: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: malformed edge header")]
    MalformedHeader { line: usize },

    #[error(transparent)]
    Algebra(#[from] AlgebraError),
}

/// Which partition of the day the histograms cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeType {
    /// One histogram for the whole day.
    AllData,
    /// Five weekday peak/off-peak intervals plus one weekend slice.
    Peak,
    /// 96 weekday quarter-hours plus 96 weekend quarter-hours.
    Days,
}

/// One GPS-derived traversal of an edge.
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    pub location: u32,
    pub traversal_time: u32,
    pub time: TimeOfDay,
    pub day_of_week: u8,
}

impl Measurement {
    pub fn is_weekend(&self) -> bool {
        self.day_of_week >= 5
    }
}

/// An input edge with its aggregated time-dependent cost.
#[derive(Debug)]
pub struct EdgeRecord {
    pub edge_id: u32,
    pub source: NodeId,
    pub target: NodeId,
    pub cost: HistCost,
}

/// Read and aggregate every edge in the input file.
pub fn read_edges<P: AsRef<Path>>(
    path: P,
    time_type: TimeType,
    schedule: &DaySchedule,
) -> Result<Vec<EdgeRecord>, HistFormatError> {
    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;

    let mut edges = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if !line.starts_with('#') {
            i += 1;
            continue;
        }

        let (edge_id, source, target, avg_cost) =
            parse_header(line).ok_or(HistFormatError::MalformedHeader { line: i + 1 })?;
        i += 1;

        let mut measurements = Vec::new();
        if i < lines.len() && lines[i].trim() == "{" {
            i += 1;
            let mut discarded = false;
            loop {
                if i >= lines.len() {
                    warn!("edge {}: unterminated measurement block", edge_id);
                    discarded = true;
                    break;
                }
                let l = lines[i].trim();
                i += 1;
                if l == "}" {
                    break;
                }
                if discarded || l.is_empty() {
                    continue;
                }
                match parse_measurement(l) {
                    Some(m) => measurements.push(m),
                    None => {
                        warn!(
                            "edge {}: unparsable measurement at line {}, discarding the set",
                            edge_id, i
                        );
                        discarded = true;
                    }
                }
            }
            if discarded {
                measurements.clear();
            }
        }

        let avg = avg_cost.round() as u32;
        let cost = build_cost(&measurements, avg, time_type, schedule)?;
        edges.push(EdgeRecord { edge_id, source, target, cost });
    }

    Ok(edges)
}

fn parse_header(line: &str) -> Option<(u32, NodeId, NodeId, f64)> {
    let mut tokens = line.trim_start_matches('#').split_whitespace();
    let edge_id = tokens.next()?.parse().ok()?;
    let source = tokens.next()?.parse().ok()?;
    let target = tokens.next()?.parse().ok()?;
    let avg_cost = tokens.next()?.parse().ok()?;
    Some((edge_id, source, target, avg_cost))
}

fn parse_measurement(line: &str) -> Option<Measurement> {
    let mut tokens = line.split_whitespace();
    let location = tokens.next()?.parse().ok()?;
    let traversal_time = tokens.next()?.parse().ok()?;
    let time = parse_clock(tokens.next()?)?;
    let day_of_week: u8 = tokens.next()?.parse().ok()?;
    if day_of_week > 6 {
        return None;
    }
    Some(Measurement { location, traversal_time, time, day_of_week })
}

fn parse_clock(text: &str) -> Option<TimeOfDay> {
    let mut parts = text.split(':');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || h > 23 || m > 59 || s > 59 {
        return None;
    }
    Some(h * 3600 + m * 60 + s)
}

/// Aggregate measurements into the partition `time_type` prescribes. Empty
/// partitions fall back to a constant histogram at the average cost.
fn build_cost(
    measurements: &[Measurement],
    avg: u32,
    time_type: TimeType,
    schedule: &DaySchedule,
) -> Result<HistCost, AlgebraError> {
    match time_type {
        TimeType::AllData => {
            let h = histogram_or_fallback(measurements.iter(), TimeInterval::all_day(), avg)?;
            Ok(HistCost::from_histogram(h))
        }

        TimeType::Peak => {
            let mut histograms = Vec::with_capacity(6);
            for interval in schedule.peak_intervals() {
                let slice = measurements
                    .iter()
                    .filter(|m| !m.is_weekend() && interval.contains(m.time));
                histograms.push(histogram_or_fallback(slice, interval, avg)?);
            }
            let weekend = measurements.iter().filter(|m| m.is_weekend());
            histograms.push(histogram_or_fallback(weekend, TimeInterval::all_day(), avg)?);
            Ok(HistCost::from_histograms(histograms))
        }

        TimeType::Days => {
            let mut histograms = Vec::with_capacity(2 * QUARTER_SLOTS as usize);
            for weekend in [false, true] {
                for slot in 0..QUARTER_SLOTS {
                    let interval = schedule.quarter_interval(slot);
                    let slice = measurements.iter().filter(|m| {
                        m.is_weekend() == weekend && m.time / SECONDS_PER_QUARTER == slot
                    });
                    histograms.push(histogram_or_fallback(slice, interval, avg)?);
                }
            }
            Ok(HistCost::from_histograms(histograms))
        }
    }
}

fn histogram_or_fallback<'a>(
    measurements: impl Iterator<Item = &'a Measurement>,
    interval: TimeInterval,
    avg: u32,
) -> Result<Histogram, AlgebraError> {
    let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
    for m in measurements {
        *counts.entry(m.traversal_time).or_insert(0) += 1;
    }
    if counts.is_empty() {
        return Ok(Histogram::constant(interval, avg));
    }
    Histogram::from_measurement_counts(interval, &counts)
}
