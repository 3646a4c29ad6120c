use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::embeddings::EncodeReport;
use crate::core::similarity::SimilarityRecord;
use crate::core::source::ItemFailure;
use crate::error::Result;
use crate::state::OutputFormat;

/// Ranked similarity table for one folder, ready for a downstream deduplication stage
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SimilarityReport {
    /// When the report was produced (RFC 3339 format).
    pub generated_at: String,
    /// The folder that was scanned.
    pub folder: PathBuf,
    /// Model used to compute the embeddings.
    pub model: String,
    /// Number of images that were successfully encoded.
    pub image_count: usize,
    /// Scored pairs, sorted by descending similarity.
    pub pairs: Vec<SimilarityRecord>,
    /// Images left out of the table, with the reason.
    pub failures: Vec<ItemFailure>,
}

impl SimilarityReport {
    /// Assemble a report from an encoding run and its scored pairs.
    pub fn new<P: AsRef<Path>>(
        folder: P,
        model: impl Into<String>,
        encoded: &EncodeReport,
        pairs: Vec<SimilarityRecord>,
    ) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            folder: folder.as_ref().to_path_buf(),
            model: model.into(),
            image_count: encoded.len(),
            pairs,
            failures: encoded.failures.clone(),
        }
    }

    /// Serializes the report to a pretty-printed JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserializes a `SimilarityReport` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        Ok(serde_json::from_str(json_str)?)
    }

    /// Writes the pairs as CSV with an `Image1,Image2,Similarity` header.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["Image1", "Image2", "Similarity"])?;
        for pair in &self.pairs {
            let score = format!("{:.2}", pair.similarity);
            wtr.write_record([pair.name1.as_str(), pair.name2.as_str(), score.as_str()])?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Writes the pairs as an aligned text table, followed by any skipped images.
    pub fn write_table<W: Write>(&self, mut writer: W) -> Result<()> {
        let width1 = column_width("Image1", self.pairs.iter().map(|p| p.name1.as_str()));
        let width2 = column_width("Image2", self.pairs.iter().map(|p| p.name2.as_str()));

        writeln!(writer, "{:<width1$}  {:<width2$}  {:>10}", "Image1", "Image2", "Similarity")?;
        for pair in &self.pairs {
            writeln!(
                writer,
                "{:<width1$}  {:<width2$}  {:>10.2}",
                pair.name1, pair.name2, pair.similarity
            )?;
        }

        if !self.failures.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Skipped {} image(s):", self.failures.len())?;
            for failure in &self.failures {
                writeln!(
                    writer,
                    "  {} ({:?}): {}",
                    failure.path.display(),
                    failure.stage,
                    failure.reason
                )?;
            }
        }
        Ok(())
    }

    /// Writes the report in the requested format.
    pub fn write<W: Write>(&self, format: OutputFormat, mut writer: W) -> Result<()> {
        match format {
            OutputFormat::Table => self.write_table(writer),
            OutputFormat::Csv => self.write_csv(writer),
            OutputFormat::Json => {
                writeln!(writer, "{}", self.to_json()?)?;
                Ok(())
            }
        }
    }
}

fn column_width<'a>(header: &str, values: impl Iterator<Item = &'a str>) -> usize {
    values.map(|v| v.chars().count()).fold(header.len(), usize::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::FailureStage;

    fn sample() -> SimilarityReport {
        SimilarityReport {
            generated_at: Utc::now().to_rfc3339(),
            folder: PathBuf::from("media/input"),
            model: "ViT-B-16-plus-240/laion400m_e32".to_string(),
            image_count: 3,
            pairs: vec![
                SimilarityRecord { name1: "beach".into(), name2: "beach_copy".into(), similarity: 100.0 },
                SimilarityRecord { name1: "beach".into(), name2: "dog".into(), similarity: 41.5 },
                SimilarityRecord { name1: "beach_copy".into(), name2: "dog".into(), similarity: -3.25 },
            ],
            failures: vec![ItemFailure {
                identity: "corrupt".into(),
                path: PathBuf::from("media/input/corrupt.jpg"),
                stage: FailureStage::Decode,
                reason: "invalid JPEG".into(),
            }],
        }
    }

    #[test]
    fn test_report_json_roundtrip() {
        let report = sample();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"stage\": \"decode\""));

        let deserialized = SimilarityReport::from_json(&json).unwrap();
        assert_eq!(deserialized, report);
    }

    #[test]
    fn test_report_csv() {
        let mut out = Vec::new();
        sample().write_csv(&mut out).unwrap();
        let csv = String::from_utf8(out).unwrap();
        assert_eq!(
            csv,
            "Image1,Image2,Similarity\n\
             beach,beach_copy,100.00\n\
             beach,dog,41.50\n\
             beach_copy,dog,-3.25\n"
        );
    }

    #[test]
    fn test_report_table() {
        let mut out = Vec::new();
        sample().write(OutputFormat::Table, &mut out).unwrap();
        let table = String::from_utf8(out).unwrap();
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines[0], "Image1      Image2      Similarity");
        assert_eq!(lines[1], "beach       beach_copy      100.00");
        assert!(table.contains("Skipped 1 image(s):"));
        assert!(table.contains("corrupt.jpg (Decode): invalid JPEG"));
    }
}
