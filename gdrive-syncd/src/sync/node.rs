use gdrive_core::{CSV_MIME, DriveFile, FOLDER_MIME, SPREADSHEET_MIME};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    /// Native document that must be exported to CSV before transfer.
    Document,
    /// Stored CSV file fetched byte for byte.
    PlainFile,
    Other,
}

impl NodeKind {
    pub fn from_mime(mime_type: &str) -> Self {
        match mime_type {
            FOLDER_MIME => NodeKind::Folder,
            SPREADSHEET_MIME => NodeKind::Document,
            CSV_MIME => NodeKind::PlainFile,
            _ => NodeKind::Other,
        }
    }

    pub fn is_transferable(self) -> bool {
        matches!(self, NodeKind::Document | NodeKind::PlainFile)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub mime_type: String,
    pub size_hint: Option<u64>,
    pub modified_at: Option<OffsetDateTime>,
}

impl RemoteNode {
    pub fn from_drive(file: DriveFile) -> Self {
        let modified_at = match parse_modified(file.modified_time.as_deref()) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    file = %file.name,
                    value = ?file.modified_time,
                    error = %err,
                    "ignoring unparseable modifiedTime"
                );
                None
            }
        };
        Self {
            size_hint: file.size_hint(),
            kind: NodeKind::from_mime(&file.mime_type),
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            modified_at,
        }
    }
}

fn parse_modified(value: Option<&str>) -> Result<Option<OffsetDateTime>, time::error::Parse> {
    let Some(value) = value else {
        return Ok(None);
    };
    Ok(Some(OffsetDateTime::parse(value, &Rfc3339)?))
}
