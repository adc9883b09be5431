//! Optional upload of run results to S3.

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tracing::{debug, info};

/// Result files uploaded when present, with their content types.
const RESULT_FILES: &[(&str, &str)] = &[
    ("speeds.json", "application/json"),
    ("failed_sections.json", "application/json"),
    ("run_stats.csv", "text/csv"),
];

/// Object key for a result file under `prefix`.
pub fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{prefix}/{file_name}")
    }
}

/// Uploads bytes to an S3 bucket with the given content type.
pub async fn write_bytes_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    body: Vec<u8>,
    content_type: &str,
) -> Result<()> {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type(content_type)
        .send()
        .await?;

    Ok(())
}

/// Uploads every result file found in `results_dir` to `bucket` under
/// `prefix`. Credentials and region come from the AWS environment.
#[tracing::instrument(skip(results_dir), fields(results_dir = %results_dir.display()))]
pub async fn publish_results(bucket: &str, prefix: &str, results_dir: &Path) -> Result<usize> {
    let config = aws_config::load_from_env().await;
    let client = aws_sdk_s3::Client::new(&config);

    let mut uploaded = 0;
    for (file_name, content_type) in RESULT_FILES {
        let path = results_dir.join(file_name);
        if !path.exists() {
            debug!(file = file_name, "Result file missing, not uploading");
            continue;
        }
        let body = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let key = object_key(prefix, file_name);
        write_bytes_to_s3(&client, bucket, &key, body, content_type)
            .await
            .with_context(|| format!("uploading s3://{bucket}/{key}"))?;
        info!(bucket, key = %key, "Uploaded result file");
        uploaded += 1;
    }

    Ok(uploaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("", "speeds.json"), "speeds.json");
        assert_eq!(object_key("road_speeds/", "speeds.json"), "road_speeds/speeds.json");
        assert_eq!(object_key("/a/b/", "run_stats.csv"), "a/b/run_stats.csv");
    }
}
