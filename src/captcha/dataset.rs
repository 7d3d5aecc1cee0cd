//! Fingerprint dataset lookups
//!
//! Captcha resolution is a lookup against a precomputed fingerprint dataset,
//! not a classifier: every known tile image is identified by a short path
//! segment of its background-image URL, catalogued per challenge category in
//! a flat text file. Read-only at runtime.

use std::collections::HashMap;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use tracing::warn;

/// Challenge instruction text -> dataset category (file stem).
/// Instruction texts not in this table are unsupported challenge types.
static CATEGORY_TABLE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("Отметьте изображения с девушками", "girls"),
        ("Отметьте изображения с дорожными знаками", "road_signs"),
        ("Отметьте изображения с животными", "animals"),
        ("Отметьте изображения с машинами", "cars"),
        ("Отметьте изображения с мотоциклами", "motorcycles"),
        ("Отметьте изображения с цветами", "flowers"),
    ])
});

/// Extract the fingerprint segment from a tile's inline style: the
/// third-from-last path component of the `url(...)` background reference.
pub fn image_segment(style: &str) -> Option<String> {
    let start = style.find("url(")? + 4;
    let rest = &style[start..];
    let end = rest.find(')')?;
    let url = rest[..end].trim_matches(|c| c == '"' || c == '\'');
    let segments: Vec<&str> = url.split('/').collect();
    if segments.len() < 3 {
        return None;
    }
    Some(segments[segments.len() - 3].to_string())
}

/// Per-category fingerprint files (`<dir>/<category>.txt`).
pub struct FingerprintDataset {
    dir: PathBuf,
}

impl FingerprintDataset {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Map a challenge instruction text to its dataset category.
    pub fn category_for(instruction: &str) -> Option<&'static str> {
        CATEGORY_TABLE.get(instruction).copied()
    }

    /// Plain-text containment check against the category's dataset file.
    /// A missing or unreadable file means no match, never an error.
    pub fn contains(&self, category: &str, segment: &str) -> bool {
        let path = self.dir.join(format!("{}.txt", category));
        match std::fs::read_to_string(&path) {
            Ok(content) => content.contains(segment),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to read dataset file {}: {}", path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dataset_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "profitcentr-jumper-test-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_category_for_known_instructions() {
        assert_eq!(
            FingerprintDataset::category_for("Отметьте изображения с девушками"),
            Some("girls")
        );
        assert_eq!(
            FingerprintDataset::category_for("Отметьте изображения с цветами"),
            Some("flowers")
        );
    }

    #[test]
    fn test_category_for_unknown_instruction() {
        assert_eq!(FingerprintDataset::category_for("Select all buses"), None);
        assert_eq!(FingerprintDataset::category_for(""), None);
    }

    #[test]
    fn test_image_segment_third_from_last() {
        let style = "background-image: url(https://cdn.example.com/img/abc123/42/tile.png);";
        assert_eq!(image_segment(style), Some("abc123".to_string()));
    }

    #[test]
    fn test_image_segment_quoted_url() {
        let style = "background-image: url('https://cdn.example.com/img/xyz/7/t.png')";
        assert_eq!(image_segment(style), Some("xyz".to_string()));
    }

    #[test]
    fn test_image_segment_malformed() {
        assert_eq!(image_segment("color: red;"), None);
        assert_eq!(image_segment("background-image: url(short)"), None);
    }

    #[test]
    fn test_contains_checks_dataset_file() {
        let dir = temp_dataset_dir("contains");
        std::fs::write(dir.join("girls.txt"), "abc\ndef\nghi\n").unwrap();

        let dataset = FingerprintDataset::new(&dir);
        assert!(dataset.contains("girls", "abc"));
        assert!(dataset.contains("girls", "def"));
        assert!(!dataset.contains("girls", "xyz"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_contains_missing_file_is_no_match() {
        let dir = temp_dataset_dir("missing");
        let dataset = FingerprintDataset::new(&dir);
        assert!(!dataset.contains("animals", "abc"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
