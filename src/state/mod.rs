//! What the UI believes about the notes: the list, the selection and the replies it is
//! still waiting on. Nothing here blocks; replies are applied by [`NoteState::poll`].

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::ipc::{BridgeClient, BridgeError, Channel, PendingReply};
use crate::storage::{now_millis, Note, NoteInfo};

const SETTLE_STEP: Duration = Duration::from_millis(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("{0} is already in progress")]
    Busy(Channel),
    #[error("no note is selected")]
    NothingSelected,
    #[error("replies still pending after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Unselected,
    Loading { index: usize, title: String },
    Ready { index: usize, note: Note },
}

impl Selection {
    pub fn index(&self) -> Option<usize> {
        match self {
            Selection::Unselected => None,
            Selection::Loading { index, .. } | Selection::Ready { index, .. } => Some(*index),
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Selection::Unselected => None,
            Selection::Loading { title, .. } => Some(title),
            Selection::Ready { note, .. } => Some(note.title()),
        }
    }

    fn set_index(&mut self, new_index: usize) {
        if let Selection::Loading { index, .. } | Selection::Ready { index, .. } = self {
            *index = new_index;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    Loaded { count: usize },
    Opened { title: String },
    Saved { title: String },
    Created { title: String },
    CreateCancelled,
    Deleted { title: String },
    DeleteCancelled { title: String },
    Failed { op: Channel, message: String },
}

struct PendingSave {
    title: String,
    content: String,
    reply: PendingReply<()>,
}

enum Mutation {
    Create(PendingReply<Option<String>>),
    Delete {
        title: String,
        reply: PendingReply<bool>,
    },
}

enum Outcome {
    Created(Option<String>),
    Deleted(bool),
}

impl Mutation {
    fn channel(&self) -> Channel {
        match self {
            Mutation::Create(reply) => reply.channel(),
            Mutation::Delete { reply, .. } => reply.channel(),
        }
    }
}

pub struct NoteState {
    notes: Vec<NoteInfo>,
    selection: Selection,
    listing: Option<PendingReply<Vec<NoteInfo>>>,
    reading: Option<(String, PendingReply<String>)>,
    saves: VecDeque<PendingSave>,
    mutation: Option<Mutation>,
}

impl Default for NoteState {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteState {
    pub fn new() -> Self {
        Self {
            notes: Vec::new(),
            selection: Selection::Unselected,
            listing: None,
            reading: None,
            saves: VecDeque::new(),
            mutation: None,
        }
    }

    pub fn notes(&self) -> &[NoteInfo] {
        &self.notes
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selection.index()
    }

    /// `None` without a selection; an empty placeholder while the content is loading.
    pub fn selected_note(&self) -> Option<Note> {
        match &self.selection {
            Selection::Unselected => None,
            Selection::Loading { .. } => Some(Note {
                info: NoteInfo {
                    title: String::new(),
                    last_edit_time: now_millis(),
                },
                content: String::new(),
            }),
            Selection::Ready { note, .. } => Some(note.clone()),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.listing.is_none()
            && self.reading.is_none()
            && self.saves.is_empty()
            && self.mutation.is_none()
    }

    pub fn is_busy(&self) -> bool {
        self.mutation.is_some()
    }

    pub fn load(&mut self, client: &BridgeClient) -> Result<(), StateError> {
        self.listing = Some(client.get_notes()?);
        Ok(())
    }

    pub fn select(&mut self, client: &BridgeClient, index: Option<usize>) -> Result<(), StateError> {
        let Some(index) = index.filter(|index| *index < self.notes.len()) else {
            self.clear_selection();
            return Ok(());
        };
        let title = self.notes[index].title.clone();
        if self.selection.title() == Some(title.as_str()) {
            self.selection.set_index(index);
            return Ok(());
        }
        // Dropping the previous reply is what discards a stale read.
        self.reading = Some((title.clone(), client.read_note(&title)?));
        self.selection = Selection::Loading { index, title };
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.reading = None;
        self.selection = Selection::Unselected;
    }

    /// Writes `content` to the selected note.
    pub fn save(&mut self, client: &BridgeClient, content: &str) -> Result<(), StateError> {
        let Selection::Ready { note, .. } = &self.selection else {
            return Err(StateError::NothingSelected);
        };
        let title = note.title().to_string();
        self.save_as(client, &title, content)
    }

    pub fn save_as(
        &mut self,
        client: &BridgeClient,
        title: &str,
        content: &str,
    ) -> Result<(), StateError> {
        let reply = client.write_note(title, content)?;
        self.saves.push_back(PendingSave {
            title: title.to_string(),
            content: content.to_string(),
            reply,
        });
        Ok(())
    }

    pub fn create(&mut self, client: &BridgeClient) -> Result<(), StateError> {
        if let Some(mutation) = &self.mutation {
            return Err(StateError::Busy(mutation.channel()));
        }
        self.mutation = Some(Mutation::Create(client.create_note()?));
        Ok(())
    }

    pub fn delete_selected(&mut self, client: &BridgeClient) -> Result<(), StateError> {
        if let Some(mutation) = &self.mutation {
            return Err(StateError::Busy(mutation.channel()));
        }
        let title = self
            .selection
            .title()
            .ok_or(StateError::NothingSelected)?
            .to_string();
        let reply = client.delete_note(&title)?;
        self.mutation = Some(Mutation::Delete { title, reply });
        Ok(())
    }

    /// Applies every reply that has arrived so far.
    pub fn poll(&mut self, client: &BridgeClient) -> Vec<StateEvent> {
        let mut events = Vec::new();
        self.poll_listing(&mut events);
        self.poll_saves(&mut events);
        self.poll_mutation(client, &mut events);
        self.poll_reading(&mut events);
        events
    }

    /// Polls until nothing is pending. For the CLI and tests; the TUI polls from its tick.
    pub fn settle(
        &mut self,
        client: &BridgeClient,
        timeout: Duration,
    ) -> Result<Vec<StateEvent>, StateError> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        loop {
            events.extend(self.poll(client));
            if self.is_idle() {
                return Ok(events);
            }
            if Instant::now() >= deadline {
                return Err(StateError::Timeout(timeout));
            }
            thread::sleep(SETTLE_STEP);
        }
    }

    fn poll_listing(&mut self, events: &mut Vec<StateEvent>) {
        let Some(result) = self.listing.as_ref().and_then(PendingReply::try_take) else {
            return;
        };
        self.listing = None;
        match result {
            Ok(mut notes) => {
                sort_newest_first(&mut notes);
                self.notes = notes;
                self.follow_selection();
                events.push(StateEvent::Loaded {
                    count: self.notes.len(),
                });
            }
            Err(err) => events.push(failed(Channel::GetNotes, &err)),
        }
    }

    fn poll_saves(&mut self, events: &mut Vec<StateEvent>) {
        while let Some(result) = self.saves.front().and_then(|save| save.reply.try_take()) {
            let Some(save) = self.saves.pop_front() else {
                break;
            };
            match result {
                Ok(()) => {
                    self.apply_save(&save.title, save.content);
                    events.push(StateEvent::Saved { title: save.title });
                }
                Err(err) => events.push(failed(Channel::WriteNote, &err)),
            }
        }
    }

    fn poll_mutation(&mut self, client: &BridgeClient, events: &mut Vec<StateEvent>) {
        let result = match &self.mutation {
            Some(Mutation::Create(reply)) => reply
                .try_take()
                .map(|result| result.map(Outcome::Created)),
            Some(Mutation::Delete { reply, .. }) => reply
                .try_take()
                .map(|result| result.map(Outcome::Deleted)),
            None => None,
        };
        let Some(result) = result else {
            return;
        };
        let Some(mutation) = self.mutation.take() else {
            return;
        };

        match (mutation, result) {
            (Mutation::Create(_), Ok(Outcome::Created(Some(title)))) => {
                self.notes.retain(|note| note.title != title);
                self.notes.insert(
                    0,
                    NoteInfo {
                        title: title.clone(),
                        last_edit_time: now_millis(),
                    },
                );
                // The list shifted; the old index may now point elsewhere.
                self.clear_selection();
                if let Err(err) = self.select(client, Some(0)) {
                    events.push(failed(Channel::ReadNote, &err));
                }
                events.push(StateEvent::Created { title });
            }
            (Mutation::Create(_), Ok(Outcome::Created(None))) => events.push(StateEvent::CreateCancelled),
            (Mutation::Delete { title, .. }, Ok(Outcome::Deleted(true))) => {
                self.notes.retain(|note| note.title != title);
                if self.selection.title() == Some(title.as_str()) {
                    self.clear_selection();
                } else {
                    self.follow_selection();
                }
                events.push(StateEvent::Deleted { title });
            }
            (Mutation::Delete { title, .. }, Ok(Outcome::Deleted(false))) => {
                events.push(StateEvent::DeleteCancelled { title });
            }
            (mutation, Err(err)) => events.push(failed(mutation.channel(), &err)),
            (mutation, Ok(_)) => {
                tracing::error!(channel = %mutation.channel(), "mismatched mutation reply");
            }
        }
    }

    fn poll_reading(&mut self, events: &mut Vec<StateEvent>) {
        let Some(result) = self
            .reading
            .as_ref()
            .and_then(|(_, reply)| reply.try_take())
        else {
            return;
        };
        let Some((title, _)) = self.reading.take() else {
            return;
        };
        let index = match &self.selection {
            Selection::Loading {
                index,
                title: selected,
            } if *selected == title => *index,
            _ => {
                tracing::debug!(%title, "discarding read for a superseded selection");
                return;
            }
        };

        match result {
            Ok(content) => {
                let info = self.notes.get(index).cloned().unwrap_or(NoteInfo {
                    title: title.clone(),
                    last_edit_time: now_millis(),
                });
                self.selection = Selection::Ready {
                    index,
                    note: Note { info, content },
                };
                events.push(StateEvent::Opened { title });
            }
            Err(err) => {
                self.selection = Selection::Unselected;
                events.push(failed(Channel::ReadNote, &err));
            }
        }
    }

    fn apply_save(&mut self, title: &str, content: String) {
        let now = now_millis();
        if let Some(entry) = self.notes.iter_mut().find(|note| note.title == title) {
            entry.last_edit_time = now;
        }
        if let Selection::Ready { note, .. } = &mut self.selection {
            if note.title() == title {
                note.info.last_edit_time = now;
                note.content = content;
            }
        }
        sort_newest_first(&mut self.notes);
        self.follow_selection();
    }

    /// Moves the selection index to wherever its note now sits.
    fn follow_selection(&mut self) {
        let Some(title) = self.selection.title() else {
            return;
        };
        match self.notes.iter().position(|note| note.title == title) {
            Some(index) => self.selection.set_index(index),
            None => self.clear_selection(),
        }
    }
}

fn sort_newest_first(notes: &mut [NoteInfo]) {
    notes.sort_by(|a, b| b.last_edit_time.cmp(&a.last_edit_time));
}

fn failed(op: Channel, err: &dyn std::fmt::Display) -> StateEvent {
    tracing::error!(%op, error = %err, "note operation failed");
    StateEvent::Failed {
        op,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use assert_matches::assert_matches;
    use tempfile::TempDir;

    use crate::config::NotesOptions;
    use crate::host::dialogs::ScriptedDialogs;
    use crate::host::{HostBuilder, Spawned};
    use crate::storage::NoteStore;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        temp: TempDir,
        store: NoteStore,
        dialogs: ScriptedDialogs,
        spawned: Spawned,
        state: NoteState,
    }

    impl Fixture {
        fn new() -> anyhow::Result<Self> {
            let temp = TempDir::new()?;
            let store = NoteStore::open(&NotesOptions {
                root_dir: temp.path().join("notes"),
                ..NotesOptions::default()
            })?;
            let dialogs = ScriptedDialogs::new();
            let spawned = HostBuilder::new(store.clone(), Box::new(dialogs.clone())).spawn()?;
            let mut state = NoteState::new();
            state.load(&spawned.client)?;
            state.settle(&spawned.client, WAIT)?;
            Ok(Self {
                temp,
                store,
                dialogs,
                spawned,
                state,
            })
        }

        fn settle(&mut self) -> anyhow::Result<Vec<StateEvent>> {
            Ok(self.state.settle(&self.spawned.client, WAIT)?)
        }

        fn titles(&self) -> Vec<&str> {
            self.state.notes().iter().map(|n| n.title.as_str()).collect()
        }

        fn create(&mut self, title: &str) -> anyhow::Result<Vec<StateEvent>> {
            self.dialogs
                .push_save_path(Some(self.store.root().join(format!("{title}.md"))));
            self.state.create(&self.spawned.client)?;
            self.settle()
        }
    }

    fn assert_sorted(notes: &[NoteInfo]) {
        assert!(notes
            .windows(2)
            .all(|pair| pair[0].last_edit_time >= pair[1].last_edit_time));
    }

    #[test]
    fn selecting_loads_content_lazily() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        assert_eq!(fx.titles(), vec!["Welcome"]);

        fx.state.select(&fx.spawned.client, Some(0))?;
        assert_matches!(fx.state.selection(), Selection::Loading { index: 0, .. });
        assert_eq!(fx.state.selected_note().map(|n| n.content), Some(String::new()));

        let events = fx.settle()?;
        assert_eq!(events, vec![StateEvent::Opened { title: "Welcome".into() }]);
        let note = fx.state.selected_note().expect("ready");
        assert_eq!(note.content, fx.store.read_note("Welcome")?);
        Ok(())
    }

    #[test]
    fn created_note_lands_at_the_top_and_is_selected() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        let before = now_millis();
        let events = fx.create("Groceries")?;

        assert!(events.contains(&StateEvent::Created {
            title: "Groceries".into()
        }));
        assert_eq!(fx.titles(), vec!["Groceries", "Welcome"]);
        assert!(fx.state.notes()[0].last_edit_time >= before);
        assert!(fx.state.notes()[0].last_edit_time <= now_millis());
        assert_matches!(fx.state.selection(), Selection::Ready { index: 0, note } if note.title() == "Groceries");
        assert!(fx.store.root().join("Groceries.md").exists());
        Ok(())
    }

    #[test]
    fn recreating_an_existing_title_does_not_duplicate_it() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        fx.create("Welcome")?;
        assert_eq!(fx.titles(), vec!["Welcome"]);
        Ok(())
    }

    #[test]
    fn cancelled_create_and_delete_leave_state_alone() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        fx.state.select(&fx.spawned.client, Some(0))?;
        fx.settle()?;
        let before = (fx.state.notes().to_vec(), fx.state.selection().clone());

        fx.state.create(&fx.spawned.client)?;
        assert_eq!(fx.settle()?, vec![StateEvent::CreateCancelled]);
        fx.state.delete_selected(&fx.spawned.client)?;
        assert_eq!(
            fx.settle()?,
            vec![StateEvent::DeleteCancelled {
                title: "Welcome".into()
            }]
        );

        assert_eq!((fx.state.notes().to_vec(), fx.state.selection().clone()), before);
        Ok(())
    }

    #[test]
    fn rejected_location_is_treated_as_cancel() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        let outside = fx.temp.path().join("elsewhere").join("Escape.md");
        fx.dialogs.push_save_path(Some(outside.clone()));
        fx.state.create(&fx.spawned.client)?;
        assert_eq!(fx.settle()?, vec![StateEvent::CreateCancelled]);
        assert!(!outside.exists());
        assert_eq!(fx.dialogs.messages().len(), 1);
        Ok(())
    }

    #[test]
    fn deleting_the_selected_note_clears_selection() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        fx.create("Scratch")?;
        fx.dialogs.push_confirm(true);
        fx.state.delete_selected(&fx.spawned.client)?;
        let events = fx.settle()?;

        assert_eq!(events, vec![StateEvent::Deleted { title: "Scratch".into() }]);
        assert_eq!(fx.titles(), vec!["Welcome"]);
        assert_eq!(fx.state.selection(), &Selection::Unselected);
        assert_eq!(fx.state.delete_selected(&fx.spawned.client), Err(StateError::NothingSelected));
        Ok(())
    }

    #[test]
    fn saving_resorts_and_selection_follows() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        fx.create("Plan")?;
        assert_eq!(fx.titles(), vec!["Plan", "Welcome"]);

        thread::sleep(Duration::from_millis(5));
        fx.state.select(&fx.spawned.client, Some(1))?;
        fx.settle()?;
        fx.state.save(&fx.spawned.client, "# Hi")?;
        let events = fx.settle()?;

        assert_eq!(events, vec![StateEvent::Saved { title: "Welcome".into() }]);
        assert_eq!(fx.titles(), vec!["Welcome", "Plan"]);
        assert_sorted(fx.state.notes());
        assert_matches!(fx.state.selection(), Selection::Ready { index: 0, note } if note.content == "# Hi");
        assert_eq!(fx.store.read_note("Welcome")?, "# Hi");
        Ok(())
    }

    #[test]
    fn only_one_create_or_delete_at_a_time() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        fx.state.select(&fx.spawned.client, Some(0))?;
        fx.state.create(&fx.spawned.client)?;
        assert_eq!(
            fx.state.create(&fx.spawned.client),
            Err(StateError::Busy(Channel::CreateNote))
        );
        assert_eq!(
            fx.state.delete_selected(&fx.spawned.client),
            Err(StateError::Busy(Channel::CreateNote))
        );
        fx.settle()?;
        assert!(!fx.state.is_busy());
        Ok(())
    }

    #[test]
    fn superseded_read_is_discarded() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        fx.create("Second")?;
        fx.state
            .save_as(&fx.spawned.client, "Second", "second body")?;
        fx.settle()?;

        fx.state.select(&fx.spawned.client, Some(1))?;
        fx.state.select(&fx.spawned.client, Some(0))?;
        let events = fx.settle()?;

        assert_eq!(events, vec![StateEvent::Opened { title: "Second".into() }]);
        assert_matches!(fx.state.selection(), Selection::Ready { index: 0, note } if note.content == "second body");
        Ok(())
    }

    #[test]
    fn failed_read_surfaces_and_unselects() -> anyhow::Result<()> {
        let mut fx = Fixture::new()?;
        fs::remove_file(fx.store.root().join("Welcome.md"))?;
        fx.state.select(&fx.spawned.client, Some(0))?;
        let events = fx.settle()?;

        assert_matches!(
            events.as_slice(),
            [StateEvent::Failed { op: Channel::ReadNote, .. }]
        );
        assert_eq!(fx.state.selection(), &Selection::Unselected);
        Ok(())
    }
}
