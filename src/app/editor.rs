use std::collections::VecDeque;

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

const MAX_UNDO: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    text: String,
    cursor: usize,
}

/// Text buffer for the note being edited. The cursor is a byte offset that always sits
/// on a grapheme boundary.
#[derive(Debug, Clone)]
pub struct Editor {
    title: String,
    text: String,
    cursor: usize,
    /// Content as last written, used to tell whether Esc needs to save.
    saved: String,
    goal_column: Option<usize>,
    undo: VecDeque<Snapshot>,
    redo: Vec<Snapshot>,
}

impl Editor {
    pub fn open(title: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        Self {
            title: title.into(),
            cursor: text.len(),
            saved: text.clone(),
            text,
            goal_column: None,
            undo: VecDeque::new(),
            redo: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_dirty(&self) -> bool {
        self.text != self.saved
    }

    pub fn mark_saved(&mut self) {
        self.saved.clone_from(&self.text);
    }

    /// Records `content` as written, for saves of a snapshot taken before later typing.
    pub fn mark_saved_content(&mut self, content: &str) {
        content.clone_into(&mut self.saved);
    }

    /// Row and display column of the cursor, for placing the terminal caret.
    pub fn cursor_position(&self) -> (usize, usize) {
        let before = &self.text[..self.cursor];
        let row = before.matches('\n').count();
        let start = line_start(&self.text, self.cursor);
        (row, self.text[start..self.cursor].width())
    }

    pub fn insert_char(&mut self, ch: char) -> bool {
        self.checkpoint();
        self.text.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
        self.goal_column = None;
        true
    }

    pub fn insert_newline(&mut self) -> bool {
        self.insert_char('\n')
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.checkpoint();
        let prev = prev_boundary(&self.text, self.cursor);
        self.text.replace_range(prev..self.cursor, "");
        self.cursor = prev;
        self.goal_column = None;
        true
    }

    pub fn delete(&mut self) -> bool {
        let next = next_boundary(&self.text, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.checkpoint();
        self.text.replace_range(self.cursor..next, "");
        self.goal_column = None;
        true
    }

    pub fn move_left(&mut self) -> bool {
        self.jump(prev_boundary(&self.text, self.cursor))
    }

    pub fn move_right(&mut self) -> bool {
        self.jump(next_boundary(&self.text, self.cursor))
    }

    pub fn move_home(&mut self) -> bool {
        self.jump(line_start(&self.text, self.cursor))
    }

    pub fn move_end(&mut self) -> bool {
        self.jump(line_end(&self.text, self.cursor))
    }

    pub fn move_up(&mut self) -> bool {
        let start = line_start(&self.text, self.cursor);
        if start == 0 {
            return self.jump(0);
        }
        let column = self.column();
        let target = offset_at_column(&self.text, line_start(&self.text, start - 1), column);
        self.jump_keeping_column(target, column)
    }

    pub fn move_down(&mut self) -> bool {
        let end = line_end(&self.text, self.cursor);
        if end == self.text.len() {
            return self.jump(end);
        }
        let column = self.column();
        let target = offset_at_column(&self.text, end + 1, column);
        self.jump_keeping_column(target, column)
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo.pop_back() else {
            return false;
        };
        let current = self.swap_in(previous);
        self.redo.push(current);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.redo.pop() else {
            return false;
        };
        let current = self.swap_in(next);
        self.undo.push_back(current);
        true
    }

    fn checkpoint(&mut self) {
        self.redo.clear();
        self.undo.push_back(Snapshot {
            text: self.text.clone(),
            cursor: self.cursor,
        });
        if self.undo.len() > MAX_UNDO {
            self.undo.pop_front();
        }
    }

    fn swap_in(&mut self, snapshot: Snapshot) -> Snapshot {
        let current = Snapshot {
            text: std::mem::replace(&mut self.text, snapshot.text),
            cursor: self.cursor,
        };
        self.cursor = snapshot.cursor.min(self.text.len());
        self.goal_column = None;
        current
    }

    fn column(&self) -> usize {
        self.goal_column.unwrap_or_else(|| {
            let start = line_start(&self.text, self.cursor);
            self.text[start..self.cursor].graphemes(true).count()
        })
    }

    fn jump(&mut self, target: usize) -> bool {
        self.goal_column = None;
        let moved = target != self.cursor;
        self.cursor = target;
        moved
    }

    fn jump_keeping_column(&mut self, target: usize, column: usize) -> bool {
        let moved = self.jump(target);
        self.goal_column = Some(column);
        moved
    }
}

fn prev_boundary(text: &str, cursor: usize) -> usize {
    text[..cursor]
        .grapheme_indices(true)
        .next_back()
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn next_boundary(text: &str, cursor: usize) -> usize {
    text[cursor..]
        .graphemes(true)
        .next()
        .map(|grapheme| cursor + grapheme.len())
        .unwrap_or(cursor)
}

fn line_start(text: &str, cursor: usize) -> usize {
    text[..cursor].rfind('\n').map(|idx| idx + 1).unwrap_or(0)
}

fn line_end(text: &str, cursor: usize) -> usize {
    text[cursor..]
        .find('\n')
        .map(|idx| cursor + idx)
        .unwrap_or(text.len())
}

fn offset_at_column(text: &str, start: usize, column: usize) -> usize {
    let end = line_end(text, start);
    text[start..end]
        .grapheme_indices(true)
        .nth(column)
        .map(|(idx, _)| start + idx)
        .unwrap_or(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_restores_text_and_cursor() {
        let mut editor = Editor::open("Plan", "ab");
        editor.move_left();
        editor.insert_char('x');
        assert_eq!(editor.text(), "axb");
        assert!(editor.is_dirty());

        assert!(editor.undo());
        assert_eq!((editor.text(), editor.cursor()), ("ab", 1));
        assert!(!editor.is_dirty());
        assert!(editor.redo());
        assert_eq!(editor.text(), "axb");
        assert!(!editor.redo());
    }

    #[test]
    fn vertical_moves_keep_the_goal_column() {
        let mut editor = Editor::open("Plan", "abcdef\nx\nabcdef");
        editor.move_up();
        editor.move_up();
        editor.move_home();
        for _ in 0..4 {
            editor.move_right();
        }
        assert!(editor.move_down());
        assert_eq!(editor.cursor_position(), (1, 1));
        assert!(editor.move_down());
        assert_eq!(editor.cursor_position(), (2, 4));
    }

    #[test]
    fn graphemes_are_edited_whole() {
        let mut editor = Editor::open("Plan", "e\u{301}!");
        editor.move_left();
        assert!(editor.backspace());
        assert_eq!(editor.text(), "!");
        assert!(!editor.backspace());
    }

    #[test]
    fn saving_clears_dirty_flag() {
        let mut editor = Editor::open("Plan", "");
        editor.insert_char('a');
        editor.mark_saved();
        assert!(!editor.is_dirty());
        assert!(editor.undo());
        assert!(editor.is_dirty());
    }

    #[test]
    fn saving_an_older_snapshot_keeps_later_typing_dirty() {
        let mut editor = Editor::open("Plan", "");
        editor.insert_char('a');
        editor.mark_saved_content("a");
        assert!(!editor.is_dirty());
        editor.insert_char('b');
        editor.mark_saved_content("a");
        assert!(editor.is_dirty());
    }
}
