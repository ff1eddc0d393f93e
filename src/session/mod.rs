//! Per-user sign editing: a user types one line at a time until all lines
//! are filled or they say `done`.

use crate::core::{MAX_LINES, SignRecord, SpatialKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One message typed by an editing user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditInput {
    Done,
    Cancel,
    Line(String),
}

impl EditInput {
    /// `done`, `cancel` and `skip` (an empty line) are recognised in any
    /// case, with or without a leading slash. Anything else is line text.
    pub fn parse(message: &str) -> Self {
        let command = message.trim();
        let command = command.strip_prefix('/').unwrap_or(command);
        if command.eq_ignore_ascii_case("done") {
            EditInput::Done
        } else if command.eq_ignore_ascii_case("cancel") {
            EditInput::Cancel
        } else if command.eq_ignore_ascii_case("skip") {
            EditInput::Line(String::new())
        } else {
            EditInput::Line(message.to_string())
        }
    }
}

/// A sign being written. `draft` only reaches the store when the session
/// is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct EditSession {
    key: SpatialKey,
    draft: SignRecord,
    current_line: usize,
    created: bool,
    started_at: DateTime<Utc>,
}

impl EditSession {
    pub fn new(key: SpatialKey, draft: SignRecord, created: bool) -> Self {
        Self {
            key,
            draft,
            current_line: 0,
            created,
            started_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &SpatialKey {
        &self.key
    }

    pub fn draft(&self) -> &SignRecord {
        &self.draft
    }

    pub fn into_draft(self) -> SignRecord {
        self.draft
    }

    /// Whether the sign was placed by this session rather than reopened.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn lines_remaining(&self) -> usize {
        MAX_LINES - self.current_line
    }

    /// 1-based.
    pub fn current_line_number(&self) -> usize {
        self.current_line + 1
    }

    fn add_line(&mut self, text: &str) -> bool {
        if self.draft.set_line(self.current_line, text).is_ok() {
            self.current_line += 1;
        }
        self.current_line < MAX_LINES
    }
}

/// Editing sessions keyed by user id.
#[derive(Debug, Default)]
pub struct EditSessions {
    sessions: Mutex<HashMap<String, EditSession>>,
}

impl EditSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, EditSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts editing, replacing any session `user` already had. Returns the
    /// replaced session.
    pub fn start(&self, user: &str, session: EditSession) -> Option<EditSession> {
        self.sessions().insert(user.to_string(), session)
    }

    pub fn get(&self, user: &str) -> Option<EditSession> {
        self.sessions().get(user).cloned()
    }

    pub fn end(&self, user: &str) -> Option<EditSession> {
        self.sessions().remove(user)
    }

    pub fn is_editing(&self, user: &str) -> bool {
        self.sessions().contains_key(user)
    }

    /// Writes the next line of the draft. Returns whether more lines remain;
    /// false also when `user` is not editing.
    pub fn add_line(&self, user: &str, text: &str) -> bool {
        self.sessions()
            .get_mut(user)
            .is_some_and(|session| session.add_line(text))
    }

    /// 0 when `user` is not editing.
    pub fn lines_remaining(&self, user: &str) -> usize {
        self.sessions().get(user).map_or(0, EditSession::lines_remaining)
    }

    /// 1-based; 0 when `user` is not editing.
    pub fn current_line_number(&self, user: &str) -> usize {
        self.sessions()
            .get(user)
            .map_or(0, EditSession::current_line_number)
    }

    /// Users currently editing the sign at `key`.
    pub fn editors_of(&self, key: &SpatialKey) -> Vec<String> {
        self.sessions()
            .iter()
            .filter(|(_, session)| session.key() == key)
            .map(|(user, _)| user.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SignId;

    fn session() -> EditSession {
        EditSession::new(
            SpatialKey::new("w", 1, 2, 3),
            SignRecord::new(SignId::from("abc")),
            true,
        )
    }

    #[test]
    fn test_lines_fill_in_order() {
        let sessions = EditSessions::new();
        sessions.start("u1", session());
        assert_eq!(sessions.current_line_number("u1"), 1);
        assert_eq!(sessions.lines_remaining("u1"), 4);

        assert!(sessions.add_line("u1", "one"));
        assert!(sessions.add_line("u1", ""));
        assert!(sessions.add_line("u1", "three"));
        assert_eq!(sessions.current_line_number("u1"), 4);
        assert!(!sessions.add_line("u1", "four"));
        assert!(!sessions.add_line("u1", "ignored"));
        assert_eq!(sessions.lines_remaining("u1"), 0);

        let finished = sessions.end("u1").unwrap();
        assert_eq!(finished.draft().lines(), &["one", "", "three", "four"]);
        assert!(!sessions.is_editing("u1"));
    }

    #[test]
    fn test_unknown_user_is_a_no_op() {
        let sessions = EditSessions::new();
        assert!(!sessions.add_line("ghost", "text"));
        assert_eq!(sessions.lines_remaining("ghost"), 0);
        assert_eq!(sessions.current_line_number("ghost"), 0);
        assert!(sessions.end("ghost").is_none());
    }

    #[test]
    fn test_restart_replaces_session() {
        let sessions = EditSessions::new();
        sessions.start("u1", session());
        sessions.add_line("u1", "x");

        let replaced = sessions.start("u1", session());
        assert_eq!(replaced.unwrap().current_line_number(), 2);
        assert_eq!(sessions.current_line_number("u1"), 1);
        assert_eq!(sessions.editors_of(&SpatialKey::new("w", 1, 2, 3)), vec!["u1"]);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(EditInput::parse("DONE"), EditInput::Done);
        assert_eq!(EditInput::parse("/cancel"), EditInput::Cancel);
        assert_eq!(EditInput::parse("Skip"), EditInput::Line(String::new()));
        assert_eq!(EditInput::parse("done deal"), EditInput::Line("done deal".into()));
    }
}
