//! CSV export format, fixed column order:
//! `Image_Path_or_URL,Is_Valid,Confidence,Detected_By,Bounding_Box,Error,Timestamp,Batch_ID`

use crate::model::{Batch, BatchResult, Verdict};

pub fn render(batch: &Batch) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record([
        "Image_Path_or_URL",
        "Is_Valid",
        "Confidence",
        "Detected_By",
        "Bounding_Box",
        "Error",
        "Timestamp",
        "Batch_ID",
    ])?;

    for result in &batch.results {
        writer.write_record(row_for(result, &batch.id))?;
    }

    writer.flush()?;
    Ok(String::from_utf8(writer.into_inner()?)?)
}

fn row_for(result: &BatchResult, batch_id: &str) -> [String; 8] {
    let is_valid = match result.is_valid {
        Verdict::Valid => "valid",
        Verdict::Invalid => "invalid",
    };
    let bbox = result
        .bbox
        .map(|[x1, y1, x2, y2]| format!("[{x1},{y1},{x2},{y2}]"))
        .unwrap_or_default();

    [
        result.input.clone(),
        is_valid.to_string(),
        result.confidence.map(|c| c.to_string()).unwrap_or_default(),
        result.detected_by.clone().unwrap_or_default(),
        bbox,
        result.error.clone().unwrap_or_default(),
        result.timestamp.to_rfc3339(),
        batch_id.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BatchStatus;

    #[test]
    fn renders_header_and_rows_in_result_order() {
        let mut batch = Batch::new("b1".into());
        batch.status = BatchStatus::Completed;
        batch.results.push(BatchResult::success("u1".into(), 0.9, "m1".into(), Some([1, 2, 3, 4])));
        batch.results.push(BatchResult::invalid("u2".into(), None));

        let csv = render(&batch).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Image_Path_or_URL,Is_Valid,Confidence,Detected_By,Bounding_Box,Error,Timestamp,Batch_ID"
        );
        let row1 = lines.next().unwrap();
        assert!(row1.starts_with("u1,valid,0.9,m1,\"[1,2,3,4]\""));
        let row2 = lines.next().unwrap();
        assert!(row2.starts_with("u2,invalid,,,,"));
    }
}
