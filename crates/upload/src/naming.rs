//! Remote folder and file naming.
//!
//! A folder is named `{date}_{time}_{label}`, e.g.
//! `2024-03-05_14-07_Toyota_Camry`. Two inspections with the same label
//! started within the same minute get the same folder name and share the
//! remote folder; directory creation is idempotent, so this is not an error.

use carcheck_state::MediaKind;
use time::OffsetDateTime;

/// Longest label portion of a folder name, in characters.
pub const MAX_LABEL_CHARS: usize = 30;
/// Substituted for labels with nothing left after sanitizing.
pub const DEFAULT_LABEL: &str = "Inspection";

/// Reduce a free-text label to a folder-name-safe fragment.
///
/// Letters and numerals of any script, `-` and `_` are kept, and everything
/// else except whitespace is dropped. Whitespace runs of any kind collapse to
/// one separator before the result is cut to [`MAX_LABEL_CHARS`] characters,
/// so a cut never leaves a trailing `_`. An empty result becomes
/// [`DEFAULT_LABEL`].
///
/// ```
/// use carcheck_upload::naming::sanitize_label;
///
/// assert_eq!(sanitize_label("  Toyota   Camry! "), "Toyota_Camry");
/// assert_eq!(sanitize_label("Лада Веста"), "Лада_Веста");
/// assert_eq!(sanitize_label("  @@@ "), "Inspection");
/// ```
pub fn sanitize_label(label: &str) -> String {
    let kept: String =
        label.chars().filter(|&c| c.is_alphanumeric() || c.is_whitespace() || c == '-' || c == '_').collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_LABEL_CHARS).collect();
    let sanitized = truncated.trim_end().replace(' ', "_");
    if sanitized.is_empty() { DEFAULT_LABEL.to_string() } else { sanitized }
}

/// `YYYY-MM-DD_HH-MM_{label}` in the offset `at` carries.
pub fn folder_name(label: &str, at: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}_{:02}-{:02}_{}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        sanitize_label(label)
    )
}

/// `photo_001.jpg` for the first photo. `index` is 1-based; indices beyond
/// 999 widen rather than wrap.
pub fn photo_file_name(index: usize) -> String {
    format!("photo_{index:03}.jpg")
}

/// `video_001.mp4` for the first video. `index` is 1-based.
pub fn video_file_name(index: usize) -> String {
    format!("video_{index:03}.mp4")
}

pub fn file_name(kind: MediaKind, index: usize) -> String {
    match kind {
        MediaKind::Photo => photo_file_name(index),
        MediaKind::Video => video_file_name(index),
    }
}
