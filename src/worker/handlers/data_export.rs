use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::models::job::{Job, JobType};
use crate::models::payloads::{DataExportPayload, DataExportResult};
use crate::worker::registry::{HandlerError, JobHandler};

/// Simulated data export: fabricates rows for the requested query and writes
/// them to disk as CSV or JSON.
pub struct DataExportHandler;

#[async_trait]
impl JobHandler for DataExportHandler {
    fn job_types(&self) -> &[JobType] {
        &[JobType::DataExport]
    }

    async fn process(
        &self,
        cancel: &CancellationToken,
        job: &Job,
    ) -> Result<serde_json::Value, HandlerError> {
        let payload: DataExportPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(JobType::DataExport, e))?;

        tracing::info!(
            job_id = %job.id,
            query = %payload.query,
            export_type = %payload.export_type,
            "exporting data"
        );

        // Data fetch.
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(3)) => {}
            _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
        }

        let rows = generate_mock_rows(&payload.query);

        let output_path = if payload.output_path.is_empty() {
            std::env::temp_dir()
                .join(format!("taskflow_export_{}", job.id))
                .to_string_lossy()
                .into_owned()
        } else {
            payload.output_path.clone()
        };

        if let Some(parent) = PathBuf::from(&output_path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HandlerError::Failed(format!("failed to create output directory: {e}")))?;
        }

        let file_path = match payload.export_type.as_str() {
            "csv" => export_csv(&rows, &output_path).await?,
            "json" => export_json(&rows, &output_path).await?,
            // Spreadsheet output is written as CSV.
            "xlsx" => export_csv(&rows, &format!("{output_path}.csv")).await?,
            other => {
                return Err(HandlerError::Failed(format!(
                    "unsupported export type: {other}"
                )))
            }
        };

        let file_size = tokio::fs::metadata(&file_path)
            .await
            .map(|m| m.len() as i64)
            .map_err(|e| HandlerError::Failed(format!("failed to stat export file: {e}")))?;

        tracing::info!(
            job_id = %job.id,
            file_path = %file_path,
            row_count = rows.len(),
            file_size,
            "export complete"
        );

        let result = DataExportResult {
            file_path,
            file_size,
            row_count: rows.len(),
            format: payload.export_type,
        };

        Ok(serde_json::to_value(result)?)
    }
}

fn generate_mock_rows(query: &str) -> Vec<serde_json::Map<String, serde_json::Value>> {
    let mut rng = rand::thread_rng();
    let row_count: usize = rng.gen_range(100..1000);
    let query = query.to_lowercase();

    (0..row_count)
        .map(|i| {
            let mut row = serde_json::Map::new();
            row.insert("id".into(), (i + 1).into());
            row.insert("name".into(), format!("Record {}", i + 1).into());
            row.insert("value".into(), (rng.gen::<f64>() * 1000.0).into());
            row.insert(
                "created_at".into(),
                (Utc::now() - chrono::Duration::days(rng.gen_range(0..365)))
                    .format("%Y-%m-%d")
                    .to_string()
                    .into(),
            );
            row.insert(
                "status".into(),
                ["active", "inactive", "pending"][rng.gen_range(0..3)].into(),
            );

            if query.contains("user") {
                row.insert("email".into(), format!("user{}@example.com", i + 1).into());
                row.insert("age".into(), rng.gen_range(18u32..68).into());
            }
            if query.contains("order") {
                row.insert("amount".into(), (rng.gen::<f64>() * 500.0).into());
                row.insert(
                    "product".into(),
                    format!("Product {}", rng.gen_range(1u8..11)).into(),
                );
            }

            row
        })
        .collect()
}

async fn export_csv(
    rows: &[serde_json::Map<String, serde_json::Value>],
    output_path: &str,
) -> Result<String, HandlerError> {
    let path = if output_path.ends_with(".csv") {
        output_path.to_string()
    } else {
        format!("{output_path}.csv")
    };

    let Some(first) = rows.first() else {
        tokio::fs::write(&path, "")
            .await
            .map_err(|e| HandlerError::Failed(format!("failed to write export: {e}")))?;
        return Ok(path);
    };

    let headers: Vec<&String> = first.keys().collect();
    let mut contents = headers
        .iter()
        .map(|h| h.as_str())
        .collect::<Vec<_>>()
        .join(",");
    contents.push('\n');

    for row in rows {
        let line = headers
            .iter()
            .map(|header| match row.get(*header) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => String::new(),
            })
            .collect::<Vec<_>>()
            .join(",");
        contents.push_str(&line);
        contents.push('\n');
    }

    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| HandlerError::Failed(format!("failed to write export: {e}")))?;

    Ok(path)
}

async fn export_json(
    rows: &[serde_json::Map<String, serde_json::Value>],
    output_path: &str,
) -> Result<String, HandlerError> {
    let path = if output_path.ends_with(".json") {
        output_path.to_string()
    } else {
        format!("{output_path}.json")
    };

    let document = serde_json::json!({
        "data": rows,
        "total": rows.len(),
        "exported_at": Utc::now().to_rfc3339(),
    });
    let contents = serde_json::to_vec_pretty(&document)?;

    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| HandlerError::Failed(format!("failed to write export: {e}")))?;

    Ok(path)
}
