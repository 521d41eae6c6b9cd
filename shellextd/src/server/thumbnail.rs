use shellext_integrations::protocol::ThumbnailSize;

use crate::folders::SyncFolder;
use crate::journal::ShareStateRecord;
use crate::server::error::QueryError;

/// Fetches a server-rendered preview for `record`.
///
/// Only image bodies are returned; anything else the server sends (error
/// pages, placeholders served as HTML) is rejected.
pub async fn fetch_thumbnail(
    folder: &SyncFolder,
    record: &ShareStateRecord,
    size: ThumbnailSize,
) -> Result<Vec<u8>, QueryError> {
    let file_id = record
        .numeric_file_id()
        .ok_or_else(|| QueryError::InvalidRecord(record.path.clone()))?;
    let width = dimension(size.width)?;
    let height = dimension(size.height)?;

    let preview = folder.client().fetch_preview(file_id, width, height).await?;
    if !preview.is_image() {
        return Err(QueryError::UnexpectedContentType(preview.content_type));
    }
    Ok(preview.bytes)
}

fn dimension(value: i64) -> Result<u32, QueryError> {
    u32::try_from(value)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| QueryError::InvalidRequest(format!("invalid thumbnail dimension {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_must_be_positive_u32() {
        assert_eq!(dimension(256).unwrap(), 256);
        assert!(dimension(0).is_err());
        assert!(dimension(-4).is_err());
        assert!(dimension(i64::from(u32::MAX) + 1).is_err());
    }
}
