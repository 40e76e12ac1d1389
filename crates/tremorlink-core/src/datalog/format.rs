//! Export formats
//!
//! Builds export filenames and writes recordings as CSV.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::{RecordMode, RecordedSample};
use crate::api::ProcessingParameters;

/// Normalization applied by the presentation layer before streaming. Only
/// used to label exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalizationMethod {
    #[default]
    #[serde(rename = "RobustIQR")]
    RobustIqr,
    GlobalMinMax,
}

impl NormalizationMethod {
    pub fn tag(&self) -> &'static str {
        match self {
            NormalizationMethod::RobustIqr => "RobustIQR",
            NormalizationMethod::GlobalMinMax => "GlobalMinMax",
        }
    }
}

/// Everything an export filename encodes
#[derive(Debug, Clone)]
pub struct ExportMetadata {
    /// Name of the source recording; its extension is dropped
    pub source_file: Option<String>,
    pub parameters: ProcessingParameters,
    pub normalization: NormalizationMethod,
    pub mode: RecordMode,
}

/// `{base}_G{G}_Kp{Kp}_Kd{Kd}_alpha{alpha}_{method}_{mode}_{timestamp}.csv`
///
/// Parameters carry one decimal; the timestamp is UTC with `:` and `.`
/// replaced by `-`, truncated to seconds.
pub fn export_filename(meta: &ExportMetadata, now: DateTime<Utc>) -> String {
    let base = meta
        .source_file
        .as_deref()
        .map(strip_extension)
        .filter(|b| !b.is_empty())
        .unwrap_or("unknown");
    let p = &meta.parameters;

    format!(
        "{}_G{:.1}_Kp{:.1}_Kd{:.1}_alpha{:.1}_{}_{}_{}.csv",
        base,
        p.gain,
        p.kp,
        p.kd,
        p.alpha,
        meta.normalization.tag(),
        meta.mode.tag(),
        now.format("%Y-%m-%dT%H-%M-%S")
    )
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if !name[dot + 1..].contains('/') => &name[..dot],
        _ => name,
    }
}

/// Write recorded samples to a CSV file: a `time` column followed by the
/// union of every recorded field. Missing values are left empty.
pub fn write_csv<P: AsRef<Path>>(path: P, samples: &[RecordedSample]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let columns: BTreeSet<&str> = samples
        .iter()
        .flat_map(|s| s.values.keys().map(|k| k.as_str()))
        .collect();

    write!(writer, "time")?;
    for column in &columns {
        write!(writer, ",{}", csv_field(column))?;
    }
    writeln!(writer)?;

    for sample in samples {
        write!(writer, "{}", sample.time)?;
        for column in &columns {
            match sample.values.get(*column) {
                Some(value) => write!(writer, ",{}", value)?,
                None => write!(writer, ",")?,
            }
        }
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}

/// Quote a cell holding a delimiter, quote or line break (RFC 4180)
fn csv_field(cell: &str) -> Cow<'_, str> {
    if cell.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", cell.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn meta(source_file: Option<&str>) -> ExportMetadata {
        ExportMetadata {
            source_file: source_file.map(String::from),
            parameters: ProcessingParameters::default(),
            normalization: NormalizationMethod::RobustIqr,
            mode: RecordMode::AllSignals,
        }
    }

    #[test]
    fn test_export_filename() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 9, 15, 42).unwrap();
        assert_eq!(
            export_filename(&meta(Some("patient_07.csv")), now),
            "patient_07_G1.0_Kp1.0_Kd0.2_alpha1.0_RobustIQR_all_signals_2025-03-04T09-15-42.csv"
        );
    }

    #[test]
    fn test_export_filename_without_source() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut meta = meta(None);
        meta.normalization = NormalizationMethod::GlobalMinMax;
        meta.mode = RecordMode::SingleSignal;
        assert_eq!(
            export_filename(&meta, now),
            "unknown_G1.0_Kp1.0_Kd0.2_alpha1.0_GlobalMinMax_single_signal_2025-01-01T00-00-00.csv"
        );
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("a.b.csv"), "a.b");
        assert_eq!(strip_extension("plain"), "plain");
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let samples = vec![
            RecordedSample::new(0.0).with_value("torque", 1.5).with_value("tremor", 2.0),
            RecordedSample::new(0.01).with_value("torque", 1.25),
        ];
        write_csv(&path, &samples).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "time,torque,tremor\n0,1.5,2\n0.01,1.25,\n");
    }

    #[test]
    fn test_write_csv_quotes_header_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quoted.csv");
        let samples = vec![RecordedSample::new(0.5)
            .with_value("a,b", 1.0)
            .with_value("say \"hi\"", 2.0)
            .with_value("plain", 3.0)];
        write_csv(&path, &samples).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "time,\"a,b\",plain,\"say \"\"hi\"\"\"\n0.5,1,3,2\n");
    }

    #[test]
    fn test_csv_field() {
        assert_eq!(csv_field("torque"), "torque");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }
}
