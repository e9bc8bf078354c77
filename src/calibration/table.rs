//! Calibration table file access.
//!
//! The table is tab-delimited text, one row per calibrated point, ordered by
//! (temperature, channel, ascending voltage). Runtime consumers filter rows
//! by temperature target and channel and interpolate the front-end offset
//! linearly between the two nearest bracketing voltage targets.

use std::path::Path;

use crate::error::{DetectorError, Result};
use crate::protocol::commands::Channel;

/// Header row of a calibration table file.
pub const TABLE_HEADER: &str =
    "temperature_target\ttemperature\tchannel\tvoltage_target\tvoltage\tfe_offset";

/// One calibrated point.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationEntry {
    pub temperature_target: f64,
    pub temperature: f64,
    pub channel: Channel,
    pub voltage_target: f64,
    pub voltage: f64,
    pub fe_offset: u32,
}

/// A parsed calibration table.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    entries: Vec<CalibrationEntry>,
}

impl CalibrationTable {
    /// Load a table from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse table text (header row plus data rows).
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content.lines();
        match lines.next() {
            Some(header) if header.trim_end() == TABLE_HEADER => {}
            other => {
                return Err(DetectorError::InvalidArgument(format!(
                    "not a calibration table, unexpected header {other:?}"
                )));
            }
        }

        let mut entries = Vec::new();
        for (number, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 6 {
                return Err(DetectorError::InvalidArgument(format!(
                    "row {}: expected 6 fields, got {}",
                    number + 2,
                    fields.len()
                )));
            }
            let parse_f64 = |s: &str| {
                s.parse::<f64>().map_err(|_| {
                    DetectorError::InvalidArgument(format!("row {}: bad number {s:?}", number + 2))
                })
            };
            entries.push(CalibrationEntry {
                temperature_target: parse_f64(fields[0])?,
                temperature: parse_f64(fields[1])?,
                channel: Channel::from_name(fields[2])?,
                voltage_target: parse_f64(fields[3])?,
                voltage: parse_f64(fields[4])?,
                fe_offset: fields[5].parse().map_err(|_| {
                    DetectorError::InvalidArgument(format!(
                        "row {}: bad offset {:?}",
                        number + 2,
                        fields[5]
                    ))
                })?,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CalibrationEntry] {
        &self.entries
    }

    /// Interpolated front-end offset for the requested operating point.
    ///
    /// Rows are filtered by temperature target and channel; the offset is
    /// interpolated linearly between the two voltage targets bracketing the
    /// requested voltage, clamping to the edge values outside the covered
    /// range. Returns `None` when no rows match the filter.
    pub fn frontend_offset(
        &self,
        temperature_target: f64,
        channel: Channel,
        voltage: f64,
    ) -> Option<f64> {
        let mut rows: Vec<&CalibrationEntry> = self
            .entries
            .iter()
            .filter(|e| {
                (e.temperature_target - temperature_target).abs() < 0.005 && e.channel == channel
            })
            .collect();
        if rows.is_empty() {
            return None;
        }
        rows.sort_by(|a, b| a.voltage_target.partial_cmp(&b.voltage_target).unwrap());

        let first = rows.first().unwrap();
        if voltage <= first.voltage_target {
            return Some(first.fe_offset as f64);
        }
        let last = rows.last().unwrap();
        if voltage >= last.voltage_target {
            return Some(last.fe_offset as f64);
        }

        for window in rows.windows(2) {
            let (a, b) = (window[0], window[1]);
            if voltage >= a.voltage_target && voltage <= b.voltage_target {
                let ratio = (voltage - a.voltage_target) / (b.voltage_target - a.voltage_target);
                return Some(a.fe_offset as f64 + ratio * (b.fe_offset as f64 - a.fe_offset as f64));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CalibrationTable {
        let content = format!(
            "{TABLE_HEADER}\n\
             25.00\t25.03\tGREEN\t30.00\t30.00\t663\n\
             25.00\t24.98\tGREEN\t31.00\t31.00\t680\n\
             25.00\t25.01\tGREEN\t32.00\t32.01\t699\n\
             25.00\t25.00\tRED\t30.00\t30.00\t650\n"
        );
        CalibrationTable::parse(&content).unwrap()
    }

    #[test]
    fn test_parse_rows() {
        let table = table();
        assert_eq!(table.entries().len(), 4);
        assert_eq!(table.entries()[0].channel, Channel::Green);
        assert_eq!(table.entries()[0].fe_offset, 663);
    }

    #[test]
    fn test_exact_and_interpolated_lookup() {
        let table = table();
        assert_eq!(table.frontend_offset(25.0, Channel::Green, 30.0), Some(663.0));
        // Halfway between 31 V (680) and 32 V (699).
        let mid = table.frontend_offset(25.0, Channel::Green, 31.5).unwrap();
        assert!((mid - 689.5).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_clamps_outside_range() {
        let table = table();
        assert_eq!(table.frontend_offset(25.0, Channel::Green, 20.0), Some(663.0));
        assert_eq!(table.frontend_offset(25.0, Channel::Green, 40.0), Some(699.0));
    }

    #[test]
    fn test_lookup_filters_temperature_and_channel() {
        let table = table();
        assert_eq!(table.frontend_offset(25.0, Channel::Red, 30.0), Some(650.0));
        assert_eq!(table.frontend_offset(25.0, Channel::Blue, 30.0), None);
        assert_eq!(table.frontend_offset(10.0, Channel::Green, 30.0), None);
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(CalibrationTable::parse("bogus\n").is_err());
        let missing_field = format!("{TABLE_HEADER}\n25.00\t25.00\tGREEN\t30.00\t663\n");
        assert!(CalibrationTable::parse(&missing_field).is_err());
        let bad_channel = format!("{TABLE_HEADER}\n25.00\t25.00\tCYAN\t30.00\t30.00\t663\n");
        assert!(CalibrationTable::parse(&bad_channel).is_err());
    }
}
