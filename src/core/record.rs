use super::error::{Result, SignError};
use super::id::SignId;
use serde::{Deserialize, Serialize};

pub const MAX_LINES: usize = 4;
pub const MAX_LINE_LENGTH: usize = 32;

const PREVIEW_LEN: usize = 30;

/// Text color as an RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);

    fn from_components(r: i64, g: i64, b: i64) -> Self {
        let clamp = |c: i64| c.clamp(0, 255) as u8;
        Rgb(clamp(r), clamp(g), clamp(b))
    }
}

/// Who placed a sign: a stable user id plus the display name at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    pub id: String,
    pub name: String,
}

impl Owner {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A positioned multi-line sign.
///
/// Lines are always exactly [`MAX_LINES`] long and each is at most
/// [`MAX_LINE_LENGTH`] characters; every mutator enforces this, so
/// [`SignRecord::has_text`] can be derived on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RecordFile", into = "RecordFile")]
pub struct SignRecord {
    id: SignId,
    lines: [String; MAX_LINES],
    color: Rgb,
    glowing: bool,
    owner: Option<Owner>,
}

impl SignRecord {
    pub fn new(id: SignId) -> Self {
        Self {
            id,
            lines: Default::default(),
            color: Rgb::BLACK,
            glowing: false,
            owner: None,
        }
    }

    pub fn with_owner(id: SignId, owner: Owner) -> Self {
        let mut record = Self::new(id);
        record.owner = Some(owner);
        record
    }

    pub fn id(&self) -> &SignId {
        &self.id
    }

    /// Replaces the id. Only the store does this, when it has to re-derive a
    /// missing or colliding id.
    pub(crate) fn set_id(&mut self, id: SignId) {
        self.id = id;
    }

    pub fn lines(&self) -> &[String; MAX_LINES] {
        &self.lines
    }

    /// The line at `index`, or `""` when the index is out of range.
    pub fn line(&self, index: usize) -> &str {
        self.lines.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn set_line(&mut self, index: usize, text: &str) -> Result<()> {
        let slot = self.lines.get_mut(index).ok_or(SignError::LineOutOfRange {
            index,
            max: MAX_LINES - 1,
        })?;
        *slot = truncate_line(text);
        Ok(())
    }

    /// Replaces every line; missing entries become empty, extra ones are ignored.
    pub fn set_lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut incoming = lines.into_iter();
        for slot in self.lines.iter_mut() {
            *slot = incoming
                .next()
                .map(|line| truncate_line(line.as_ref()))
                .unwrap_or_default();
        }
    }

    pub fn clear(&mut self) {
        self.lines = Default::default();
    }

    pub fn has_text(&self) -> bool {
        self.lines.iter().any(|line| !line.is_empty())
    }

    /// Non-empty lines, top to bottom. This is what gets displayed.
    pub fn non_empty_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|line| !line.is_empty())
            .cloned()
            .collect()
    }

    pub fn all_text(&self) -> String {
        self.non_empty_lines().join("\n")
    }

    /// One-line summary for listings.
    pub fn preview(&self) -> String {
        let joined = self.non_empty_lines().join(" | ");
        if joined.is_empty() {
            return "(empty)".to_string();
        }
        if joined.chars().count() > PREVIEW_LEN {
            let cut: String = joined.chars().take(PREVIEW_LEN - 3).collect();
            return format!("{}...", cut);
        }
        joined
    }

    pub fn color(&self) -> Rgb {
        self.color
    }

    pub fn set_color(&mut self, color: Rgb) {
        self.color = color;
    }

    pub fn glowing(&self) -> bool {
        self.glowing
    }

    pub fn set_glowing(&mut self, glowing: bool) {
        self.glowing = glowing;
    }

    pub fn owner(&self) -> Option<&Owner> {
        self.owner.as_ref()
    }

    /// Sets the owner if none is recorded yet. Returns whether it was set.
    pub fn assign_owner(&mut self, owner: Owner) -> bool {
        if self.owner.is_some() {
            return false;
        }
        self.owner = Some(owner);
        true
    }
}

fn truncate_line(text: &str) -> String {
    match text.char_indices().nth(MAX_LINE_LENGTH) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

// ============================================================================
// On-disk shape
// ============================================================================

/// Field layout of one record in the signs file. Every field is optional so
/// records written by older versions still load.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RecordFile {
    lines: Vec<Option<String>>,
    #[serde(rename = "colorR")]
    color_r: i64,
    #[serde(rename = "colorG")]
    color_g: i64,
    #[serde(rename = "colorB")]
    color_b: i64,
    glowing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_name: Option<String>,
    sign_id: Option<String>,
}

impl From<RecordFile> for SignRecord {
    fn from(file: RecordFile) -> Self {
        let mut record = SignRecord::new(SignId::new(file.sign_id.unwrap_or_default()));
        record.set_lines(
            file.lines
                .into_iter()
                .map(|line| line.unwrap_or_default()),
        );
        record.color = Rgb::from_components(file.color_r, file.color_g, file.color_b);
        record.glowing = file.glowing;
        record.owner = file
            .owner_id
            .map(|id| Owner::new(id, file.owner_name.unwrap_or_default()));
        record
    }
}

impl From<SignRecord> for RecordFile {
    fn from(record: SignRecord) -> Self {
        let Rgb(r, g, b) = record.color;
        let (owner_id, owner_name) = match record.owner {
            Some(owner) => (Some(owner.id), Some(owner.name)),
            None => (None, None),
        };
        Self {
            lines: record.lines.into_iter().map(Some).collect(),
            color_r: i64::from(r),
            color_g: i64::from(g),
            color_b: i64::from(b),
            glowing: record.glowing,
            owner_id,
            owner_name,
            sign_id: Some(record.id.as_str().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SignRecord {
        SignRecord::new(SignId::from("abcd1234"))
    }

    #[test]
    fn test_new_record_has_no_text() {
        let rec = record();
        assert!(!rec.has_text());
        assert_eq!(rec.lines().len(), MAX_LINES);
        assert_eq!(rec.preview(), "(empty)");
    }

    #[test]
    fn test_truncation() {
        let mut rec = record();
        let exact = "x".repeat(MAX_LINE_LENGTH);
        rec.set_line(0, &exact).unwrap();
        assert_eq!(rec.line(0), exact);

        let long = format!("{}tail", "y".repeat(MAX_LINE_LENGTH));
        rec.set_line(1, &long).unwrap();
        assert_eq!(rec.line(1), "y".repeat(MAX_LINE_LENGTH));

        let before = rec.clone();
        let stored = rec.line(1).to_string();
        rec.set_line(1, &stored).unwrap();
        assert_eq!(rec, before);
    }

    #[test]
    fn test_truncation_counts_characters() {
        let mut rec = record();
        let wide = "é".repeat(MAX_LINE_LENGTH + 5);
        rec.set_line(0, &wide).unwrap();
        assert_eq!(rec.line(0).chars().count(), MAX_LINE_LENGTH);
    }

    #[test]
    fn test_out_of_range_line_is_rejected_without_change() {
        let mut rec = record();
        let before = rec.clone();
        let err = rec.set_line(MAX_LINES, "nope").unwrap_err();
        assert!(matches!(err, SignError::LineOutOfRange { index: 4, .. }));
        assert_eq!(rec, before);
        assert_eq!(rec.line(17), "");
    }

    #[test]
    fn test_has_text_tracks_every_mutation() {
        let mut rec = record();
        rec.set_line(2, "hello").unwrap();
        assert!(rec.has_text());
        rec.set_line(2, "").unwrap();
        assert!(!rec.has_text());
        rec.set_lines(["", "", "", "x"]);
        assert!(rec.has_text());
        rec.clear();
        assert!(!rec.has_text());
    }

    #[test]
    fn test_set_lines_pads_and_ignores_extra() {
        let mut rec = record();
        rec.set_lines(["a", "b"]);
        assert_eq!(rec.lines(), &["a", "b", "", ""].map(String::from));
        rec.set_lines(["1", "2", "3", "4", "5"]);
        assert_eq!(rec.line(3), "4");
    }

    #[test]
    fn test_preview_and_all_text() {
        let mut rec = record();
        rec.set_lines(["Hi", "", "There", ""]);
        assert_eq!(rec.all_text(), "Hi\nThere");
        assert_eq!(rec.preview(), "Hi | There");

        rec.set_lines(["a".repeat(20), "b".repeat(20)]);
        let preview = rec.preview();
        assert_eq!(preview.chars().count(), PREVIEW_LEN);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_owner_is_set_once() {
        let mut rec = SignRecord::with_owner(SignId::generate(), Owner::new("u1", "Alice"));
        assert!(!rec.assign_owner(Owner::new("u2", "Bob")));
        assert_eq!(rec.owner().unwrap().name, "Alice");
    }

    #[test]
    fn test_json_field_names() {
        let mut rec = SignRecord::with_owner(SignId::from("id1"), Owner::new("u1", "Alice"));
        rec.set_lines(["Hi"]);
        rec.set_color(Rgb(10, 20, 30));
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["lines"], serde_json::json!(["Hi", "", "", ""]));
        assert_eq!(value["colorR"], 10);
        assert_eq!(value["colorB"], 30);
        assert_eq!(value["ownerId"], "u1");
        assert_eq!(value["ownerName"], "Alice");
        assert_eq!(value["signId"], "id1");
    }

    #[test]
    fn test_old_records_load_with_defaults() {
        let rec: SignRecord =
            serde_json::from_str(r#"{"lines": ["Hello", null], "colorR": 300}"#).unwrap();
        assert_eq!(rec.line(0), "Hello");
        assert_eq!(rec.line(1), "");
        assert_eq!(rec.color(), Rgb(255, 0, 0));
        assert!(rec.id().is_empty());
        assert!(rec.owner().is_none());
        assert!(!rec.glowing());
    }
}
