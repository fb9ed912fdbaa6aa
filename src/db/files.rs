use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use super::DbError;

const SUFFIX_LEN: usize = 10;
const MAX_STEM_LEN: usize = 100;
const FALLBACK_STEM: &str = "attachment";

/// Attachment content wrapped as a file object before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile<'a> {
    pub id: String,
    pub original_name: String,
    pub storage_name: String,
    pub content: &'a [u8],
}

impl<'a> StoredFile<'a> {
    pub fn from_bytes(content: &'a [u8], name: &str, max_size: u64) -> Result<Self, DbError> {
        let size = content.len() as u64;
        if size > max_size {
            return Err(DbError::FileTooLarge {
                name: name.to_string(),
                size,
                max: max_size,
            });
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            original_name: name.to_string(),
            storage_name: storage_name(name),
            content,
        })
    }

    pub fn size(&self) -> i64 {
        self.content.len() as i64
    }
}

fn unsafe_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\w\.\-\+=#]+").expect("static regex compiles"))
}

/// `report (final).pdf` becomes `report_final_<suffix>.pdf`.
pub fn storage_name(original: &str) -> String {
    let path = Path::new(original.trim());
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| unsafe_chars().replace_all(ext, "").to_ascii_lowercase())
        .filter(|ext| !ext.is_empty());
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();

    let mut sanitized = unsafe_chars()
        .replace_all(stem, "_")
        .trim_matches(|c| c == '_' || c == '.')
        .to_string();
    if sanitized.is_empty() {
        sanitized = FALLBACK_STEM.to_string();
    }
    if sanitized.chars().count() > MAX_STEM_LEN {
        sanitized = sanitized.chars().take(MAX_STEM_LEN).collect();
    }

    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect();

    match extension {
        Some(ext) => format!("{sanitized}_{suffix}.{ext}"),
        None => format!("{sanitized}_{suffix}"),
    }
}
