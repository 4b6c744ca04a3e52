use std::path::Path;

use anyhow::{Context, Result};

/// Document formats accepted for ingestion. PDF is the primary upload
/// format; plain text is kept for fixtures and bulk imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFormat {
    Pdf,
    PlainText,
}

impl SupportedFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "md" => Some(Self::PlainText),
            _ => None,
        }
    }
}

pub fn extract_text(path: &Path, format: SupportedFormat) -> Result<String> {
    match format {
        SupportedFormat::Pdf => pdf_extract::extract_text(path)
            .with_context(|| format!("Failed to extract PDF text: {}", path.display())),
        SupportedFormat::PlainText => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read text file: {}", path.display())),
    }
}
