use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePrompt {
    pub title: String,
    pub default_path: PathBuf,
    pub button_label: String,
    pub extension: String,
}

/// Two-button confirmation; the cancel button is the default answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub title: String,
    pub message: String,
    pub confirm_label: String,
    pub cancel_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBox {
    pub level: MessageLevel,
    pub title: String,
    pub message: String,
}

/// Modal prompts owned by the host. Every method blocks until the user answers.
pub trait HostDialogs: Send {
    /// `None` when the user cancels.
    fn save_path(&mut self, prompt: &SavePrompt) -> Option<PathBuf>;
    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool;
    fn message(&mut self, message: &MessageBox);
}

/// Answers queued up front; an empty queue cancels. Clones share state so a test can
/// keep a handle after moving the dialogs into the host.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDialogs {
    inner: Arc<Mutex<Script>>,
}

#[derive(Debug, Default)]
struct Script {
    save_paths: VecDeque<Option<PathBuf>>,
    confirms: VecDeque<bool>,
    messages: Vec<MessageBox>,
    prompts_seen: usize,
}

impl ScriptedDialogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_path_next(self, answer: Option<PathBuf>) -> Self {
        self.inner.lock().save_paths.push_back(answer);
        self
    }

    pub fn confirm_next(self, answer: bool) -> Self {
        self.inner.lock().confirms.push_back(answer);
        self
    }

    pub fn push_save_path(&self, answer: Option<PathBuf>) {
        self.inner.lock().save_paths.push_back(answer);
    }

    pub fn push_confirm(&self, answer: bool) {
        self.inner.lock().confirms.push_back(answer);
    }

    pub fn messages(&self) -> Vec<MessageBox> {
        self.inner.lock().messages.clone()
    }

    pub fn prompts_seen(&self) -> usize {
        self.inner.lock().prompts_seen
    }
}

impl HostDialogs for ScriptedDialogs {
    fn save_path(&mut self, _prompt: &SavePrompt) -> Option<PathBuf> {
        let mut script = self.inner.lock();
        script.prompts_seen += 1;
        script.save_paths.pop_front().flatten()
    }

    fn confirm(&mut self, _prompt: &ConfirmPrompt) -> bool {
        let mut script = self.inner.lock();
        script.prompts_seen += 1;
        script.confirms.pop_front().unwrap_or(false)
    }

    fn message(&mut self, message: &MessageBox) {
        self.inner.lock().messages.push(message.clone());
    }
}

/// Line-based prompts on stderr/stdin for the non-interactive subcommands.
#[derive(Debug, Default)]
pub struct ConsoleDialogs;

impl ConsoleDialogs {
    fn ask(question: &str) -> Option<String> {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{question}");
        let _ = stderr.flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl HostDialogs for ConsoleDialogs {
    fn save_path(&mut self, prompt: &SavePrompt) -> Option<PathBuf> {
        let answer = Self::ask(&format!(
            "{} [{}] (empty line for default, '-' to cancel): ",
            prompt.title,
            prompt.default_path.display()
        ))?;
        match answer.as_str() {
            "-" => None,
            "" => Some(prompt.default_path.clone()),
            path => Some(PathBuf::from(path)),
        }
    }

    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool {
        let answer = Self::ask(&format!("{} [y/N]: ", prompt.message));
        matches!(answer.as_deref(), Some("y") | Some("Y") | Some("yes"))
    }

    fn message(&mut self, message: &MessageBox) {
        eprintln!("{}: {}", message.title, message.message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogKind {
    SavePath(SavePrompt),
    Confirm(ConfirmPrompt),
    Message(MessageBox),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogAnswer {
    Path(Option<PathBuf>),
    Confirmed(bool),
    Dismissed,
}

/// A prompt waiting on the UI. Dropping it without answering cancels.
#[derive(Debug)]
pub struct DialogRequest {
    pub kind: DialogKind,
    reply: Sender<DialogAnswer>,
}

impl DialogRequest {
    pub fn answer(self, answer: DialogAnswer) {
        if self.reply.send(answer).is_err() {
            tracing::warn!("host stopped waiting for dialog answer");
        }
    }
}

/// Forwards prompts to whichever thread drains the paired receiver (the terminal UI).
pub struct RelayDialogs {
    requests: Sender<DialogRequest>,
}

impl RelayDialogs {
    pub fn new() -> (Self, Receiver<DialogRequest>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { requests: tx }, rx)
    }

    fn ask(&self, kind: DialogKind) -> Option<DialogAnswer> {
        let (reply, answer) = bounded(1);
        if self.requests.send(DialogRequest { kind, reply }).is_err() {
            tracing::warn!("dialog relay has no listener, treating prompt as cancelled");
            return None;
        }
        answer.recv().ok()
    }
}

impl HostDialogs for RelayDialogs {
    fn save_path(&mut self, prompt: &SavePrompt) -> Option<PathBuf> {
        match self.ask(DialogKind::SavePath(prompt.clone())) {
            Some(DialogAnswer::Path(path)) => path,
            _ => None,
        }
    }

    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool {
        matches!(
            self.ask(DialogKind::Confirm(prompt.clone())),
            Some(DialogAnswer::Confirmed(true))
        )
    }

    fn message(&mut self, message: &MessageBox) {
        let _ = self.ask(DialogKind::Message(message.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn confirm_prompt() -> ConfirmPrompt {
        ConfirmPrompt {
            title: "Delete note".into(),
            message: "Sure?".into(),
            confirm_label: "Delete".into(),
            cancel_label: "Cancel".into(),
        }
    }

    #[test]
    fn scripted_dialogs_default_to_cancel() {
        let mut dialogs = ScriptedDialogs::new().confirm_next(true);
        assert!(dialogs.confirm(&confirm_prompt()));
        assert!(!dialogs.confirm(&confirm_prompt()));
        assert_eq!(dialogs.prompts_seen(), 2);
    }

    #[test]
    fn relay_round_trips_answers_through_the_ui_side() {
        let (mut relay, requests) = RelayDialogs::new();
        let ui = thread::spawn(move || {
            let request = requests.recv().expect("prompt relayed");
            assert!(matches!(request.kind, DialogKind::Confirm(_)));
            request.answer(DialogAnswer::Confirmed(true));
        });
        assert!(relay.confirm(&confirm_prompt()));
        ui.join().expect("ui thread");
    }

    #[test]
    fn dropped_request_counts_as_cancel() {
        let (mut relay, requests) = RelayDialogs::new();
        let ui = thread::spawn(move || {
            drop(requests.recv().expect("prompt relayed"));
        });
        assert!(!relay.confirm(&confirm_prompt()));
        ui.join().expect("ui thread");
    }
}
