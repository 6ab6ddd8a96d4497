// src/export.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use crate::calendar::Period;
use crate::consolidation::ConsolidatedRow;
use crate::model::{AbsenceType, TripCode, TripZone};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV buffer could not be flushed: {0}")]
    Buffer(String),
}

/// Where a generated payroll file lives and how to verify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub file_name: String,
    pub row_count: usize,
    pub sha256: String,
}

/// Produces the payroll file handed to the external payroll tool.
pub trait ArtifactGenerator: Send + Sync {
    fn generate(
        &self,
        tenant: &str,
        period: Period,
        rows: &[ConsolidatedRow],
    ) -> Result<ArtifactRef, ExportError>;
}

// --- CSV Generator ---

pub struct CsvArtifactGenerator {
    export_dir: PathBuf,
}

impl CsvArtifactGenerator {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    fn header() -> Vec<String> {
        let mut header: Vec<String> = [
            "employee_id",
            "employee_name",
            "days_worked",
            "normal_hours",
            "overtime_25_hours",
            "overtime_50_hours",
            "weather_loss_hours",
            "absence_days",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(AbsenceType::ALL.iter().map(|a| format!("absence_{}", a.as_str())));
        header.push("meal_count".to_string());
        header.push("trip_days".to_string());
        header.extend(TripZone::ALL.iter().map(|z| format!("trip_zone_{}", z.code())));
        header.push("worksites".to_string());
        header
    }

    fn record(row: &ConsolidatedRow) -> Vec<String> {
        let mut record = vec![
            row.employee_id.clone(),
            row.employee_name.clone(),
            row.days_worked.to_string(),
            row.normal_hours.to_string(),
            row.overtime_25_hours.to_string(),
            row.overtime_50_hours.to_string(),
            row.weather_loss_hours.to_string(),
            row.absence_days.to_string(),
        ];
        record.extend(AbsenceType::ALL.iter().map(|a| {
            row.absence_hours
                .get(a)
                .copied()
                .unwrap_or(Decimal::ZERO)
                .to_string()
        }));
        record.push(row.meal_count.to_string());
        record.push(row.trip_days.to_string());
        record.extend(TripZone::ALL.iter().map(|z| {
            row.trip_codes
                .get(&TripCode::Zone(*z))
                .copied()
                .unwrap_or(0)
                .to_string()
        }));
        record.push(row.worksites.iter().cloned().collect::<Vec<_>>().join("|"));
        record
    }

    /// Encodes rows into CSV bytes, one line per employee.
    pub fn render(rows: &[ConsolidatedRow]) -> Result<Vec<u8>, ExportError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(Self::header())?;
        for row in rows {
            writer.write_record(Self::record(row))?;
        }
        writer
            .into_inner()
            .map_err(|e| ExportError::Buffer(e.to_string()))
    }
}

impl ArtifactGenerator for CsvArtifactGenerator {
    fn generate(
        &self,
        tenant: &str,
        period: Period,
        rows: &[ConsolidatedRow],
    ) -> Result<ArtifactRef, ExportError> {
        let bytes = Self::render(rows)?;
        let digest = hex::encode(Sha256::digest(&bytes));
        let file_name = format!("payroll_{}_{}.csv", tenant, period);

        std::fs::create_dir_all(&self.export_dir)?;
        std::fs::write(self.export_dir.join(&file_name), &bytes)?;
        info!(
            "Wrote payroll artifact {} ({} rows, sha256={})",
            file_name,
            rows.len(),
            digest
        );
        Ok(ArtifactRef {
            file_name,
            row_count: rows.len(),
            sha256: digest,
        })
    }
}
