//! The privileged side of the application. It owns the note store, the dialogs and the
//! windows, runs on its own thread and only ever sees the UI through [`Envelope`]s.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::config::AppConfig;
use crate::ipc::{
    BridgeClient, BridgeError, Command, Direction, Envelope, HostMessage, Inbound, PushEvent,
    Request, Response, WindowEvents,
};
use crate::storage::NoteStore;

pub mod dialogs;
pub mod performance;
pub mod windows;

use self::dialogs::HostDialogs;
use self::performance::PerformanceMonitor;
use self::windows::{Shell, SystemShell, WindowManager};

pub struct HostBuilder {
    store: NoteStore,
    dialogs: Box<dyn HostDialogs>,
    shell: Box<dyn Shell>,
    monitor: Option<(PerformanceMonitor, Duration)>,
    version: String,
}

impl HostBuilder {
    pub fn new(store: NoteStore, dialogs: Box<dyn HostDialogs>) -> Self {
        Self {
            store,
            dialogs,
            shell: Box::new(SystemShell),
            monitor: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn from_config(config: &AppConfig, dialogs: Box<dyn HostDialogs>) -> Result<Self> {
        let store = NoteStore::open(&config.notes).with_context(|| {
            format!("opening notes directory {}", config.notes.root_dir.display())
        })?;
        let mut builder = Self::new(store, dialogs);
        if config.performance.enabled {
            builder = builder.monitor(
                PerformanceMonitor::from_config(&config.performance),
                config.performance.interval(),
            );
        }
        Ok(builder)
    }

    pub fn shell(mut self, shell: Box<dyn Shell>) -> Self {
        self.shell = shell;
        self
    }

    pub fn monitor(mut self, monitor: PerformanceMonitor, interval: Duration) -> Self {
        self.monitor = Some((monitor, interval));
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Builds the host without a thread; callers drive it through [`HostProcess::handle`].
    pub fn build(self) -> (HostProcess, Receiver<PushEvent>, Receiver<PushEvent>) {
        let (main_tx, main_rx) = crossbeam_channel::unbounded();
        let (secondary_tx, secondary_rx) = crossbeam_channel::unbounded();
        let host = self.build_with(main_tx, secondary_tx);
        (host, main_rx, secondary_rx)
    }

    pub fn spawn(self) -> Result<Spawned> {
        let (main_tx, main_rx) = crossbeam_channel::unbounded();
        let (secondary_tx, secondary_rx) = crossbeam_channel::unbounded();
        let (outbox, inbox) = crossbeam_channel::unbounded();
        let host = self.build_with(main_tx, secondary_tx);

        let thread = thread::Builder::new()
            .name("notedesk-host".to_string())
            .spawn(move || host.run(inbox))
            .context("spawning host thread")?;

        Ok(Spawned {
            client: BridgeClient::new(outbox.clone(), WindowEvents::new(main_rx)),
            secondary: WindowEvents::new(secondary_rx),
            host: HostHandle {
                outbox,
                thread: Some(thread),
            },
        })
    }

    fn build_with(self, main: Sender<PushEvent>, secondary: Sender<PushEvent>) -> HostProcess {
        let (monitor, interval) = match self.monitor {
            Some((monitor, interval)) => (Some(monitor), interval),
            None => (None, Duration::ZERO),
        };
        HostProcess {
            store: self.store,
            dialogs: self.dialogs,
            windows: WindowManager::new(main, secondary, self.shell),
            monitor,
            interval,
            version: self.version,
        }
    }
}

/// Everything the UI side gets back from [`HostBuilder::spawn`].
pub struct Spawned {
    pub client: BridgeClient,
    pub secondary: WindowEvents,
    pub host: HostHandle,
}

pub struct HostHandle {
    outbox: Sender<HostMessage>,
    thread: Option<JoinHandle<()>>,
}

impl HostHandle {
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.outbox.send(HostMessage::Shutdown);
        if thread.join().is_err() {
            tracing::error!("host thread panicked");
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct HostProcess {
    store: NoteStore,
    dialogs: Box<dyn HostDialogs>,
    windows: WindowManager,
    monitor: Option<PerformanceMonitor>,
    interval: Duration,
    version: String,
}

impl HostProcess {
    pub fn store(&self) -> &NoteStore {
        &self.store
    }

    pub fn windows(&self) -> &WindowManager {
        &self.windows
    }

    /// Serves one envelope. Requests yield `Some(response)`, commands yield `None`.
    pub fn handle(&mut self, envelope: &Envelope) -> Result<Option<Response>, BridgeError> {
        match Inbound::decode(envelope)? {
            Inbound::Invoke(request) => self.handle_request(request).map(Some),
            Inbound::Send(command) => {
                self.handle_command(command);
                Ok(None)
            }
        }
    }

    /// Pushes the startup messages the main window expects once it has loaded.
    pub fn announce(&self) {
        self.windows
            .post_main(PushEvent::MainProcessMessage(local_timestamp()));
        self.windows
            .post_main(PushEvent::UpdateMessage(format!("V.{}", self.version)));
    }

    pub fn on_tick(&mut self) {
        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };
        let (snapshot, alerts) = monitor.tick();
        self.windows.post_main(PushEvent::PerformanceData(snapshot));
        for alert in alerts {
            self.windows.post_main(PushEvent::PerformanceAlert(alert));
        }
    }

    fn run(mut self, inbox: Receiver<HostMessage>) {
        tracing::info!(root = %self.store.root().display(), "host started");
        self.announce();
        let ticker = if self.monitor.is_some() {
            crossbeam_channel::tick(self.interval)
        } else {
            crossbeam_channel::never()
        };

        loop {
            crossbeam_channel::select! {
                recv(inbox) -> message => match message {
                    Ok(HostMessage::Invoke { envelope, reply }) => {
                        let result = self.invoke(&envelope);
                        if reply.send(result).is_err() {
                            tracing::debug!(channel = %envelope.channel, "caller dropped reply");
                        }
                    }
                    Ok(HostMessage::Send { envelope }) => self.send(&envelope),
                    Ok(HostMessage::Shutdown) | Err(_) => break,
                },
                recv(ticker) -> _ => self.on_tick(),
            }
        }
        tracing::info!("host stopped");
    }

    fn invoke(&mut self, envelope: &Envelope) -> Result<Response, BridgeError> {
        match Inbound::decode_as(envelope, Direction::Invoke) {
            Ok(Inbound::Invoke(request)) => self.handle_request(request),
            Ok(Inbound::Send(command)) => Err(BridgeError::WrongDirection {
                channel: command.channel(),
                expected: Direction::Invoke,
                actual: Direction::Send,
            }),
            Err(err) => {
                tracing::warn!(%err, channel = %envelope.channel, "rejected request");
                Err(err)
            }
        }
    }

    fn send(&mut self, envelope: &Envelope) {
        match Inbound::decode_as(envelope, Direction::Send) {
            Ok(Inbound::Send(command)) => self.handle_command(command),
            Ok(Inbound::Invoke(request)) => {
                tracing::warn!(channel = %request.channel(), "request sent without a reply slot");
            }
            Err(err) => tracing::warn!(%err, channel = %envelope.channel, "rejected command"),
        }
    }

    fn handle_request(&mut self, request: Request) -> Result<Response, BridgeError> {
        let channel = request.channel();
        tracing::debug!(%channel, "serving request");
        let result = match request {
            Request::GetNotes => self.store.list_notes().map(Response::Notes),
            Request::ReadNote { title } => self.store.read_note(&title).map(Response::Content),
            Request::WriteNote { title, content } => self
                .store
                .write_note(&title, &content)
                .map(|()| Response::Written),
            Request::CreateNote => self
                .store
                .create_note(self.dialogs.as_mut())
                .map(Response::Created),
            Request::DeleteNote { title } => self
                .store
                .delete_note(&title, self.dialogs.as_mut())
                .map(Response::Deleted),
            Request::GetDeviceInfo => Ok(Response::Device(self.store.device_info())),
            Request::OpenDevTool => {
                self.windows.open_dev_tools();
                Ok(Response::DevToolsOpened)
            }
        };
        result.map_err(|err| {
            tracing::error!(%channel, error = %err, "request failed");
            BridgeError::from_store(channel, &err)
        })
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::OpenUrl { url } => {
                self.windows.open_url_window(&url);
            }
            Command::OpenExternalUrl { url } => {
                self.windows.open_external(&url);
            }
            Command::OpenSecondaryWindow { note } => {
                self.windows.open_secondary(note);
            }
        }
    }
}

fn local_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use assert_matches::assert_matches;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::config::NotesOptions;
    use crate::host::dialogs::ScriptedDialogs;
    use crate::host::performance::{
        AlertThresholds, AppCpu, AppMemory, PerformanceSnapshot, PerformanceSource, SystemCpu,
        SystemMemory,
    };
    use crate::host::windows::tests::RecordingShell;
    use crate::storage::{Note, NoteInfo, StoreErrorKind};

    const WAIT: Duration = Duration::from_secs(5);

    fn store(temp: &TempDir) -> anyhow::Result<NoteStore> {
        let options = NotesOptions {
            root_dir: temp.path().join("NoteMarkdown"),
            ..NotesOptions::default()
        };
        Ok(NoteStore::open(&options)?)
    }

    struct BusyMachine;

    impl PerformanceSource for BusyMachine {
        fn sample(&mut self) -> PerformanceSnapshot {
            PerformanceSnapshot {
                system_memory: SystemMemory {
                    total: 100,
                    free: 1,
                    used: 99,
                },
                system_cpu: SystemCpu {
                    average_usage: 20.0,
                },
                app_memory: AppMemory {
                    rss: 1,
                    virtual_memory: 2,
                },
                app_cpu: AppCpu { usage: 0.5 },
            }
        }
    }

    #[test]
    fn scenario_from_empty_store_to_empty_list() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let dialogs = ScriptedDialogs::new();
        let spawned = HostBuilder::new(store(&temp)?, Box::new(dialogs.clone())).spawn()?;
        let client = &spawned.client;

        let notes = client.get_notes()?.wait_timeout(WAIT)?;
        let titles: Vec<_> = notes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Welcome"]);

        assert_eq!(client.create_note()?.wait_timeout(WAIT)?, None);
        assert_eq!(client.get_notes()?.wait_timeout(WAIT)?.len(), 1);

        client.write_note("Welcome", "# Hi")?.wait_timeout(WAIT)?;
        assert_eq!(client.read_note("Welcome")?.wait_timeout(WAIT)?, "# Hi");

        dialogs.push_confirm(true);
        assert!(client.delete_note("Welcome")?.wait_timeout(WAIT)?);
        assert!(client.get_notes()?.wait_timeout(WAIT)?.is_empty());
        assert_eq!(dialogs.prompts_seen(), 2);

        spawned.host.shutdown();
        Ok(())
    }

    #[test]
    fn disallowed_channel_never_reaches_the_store() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = store(&temp)?;
        let root = store.root().to_path_buf();
        let dialogs = ScriptedDialogs::new().confirm_next(true);
        let (mut host, _main, _secondary) =
            HostBuilder::new(store, Box::new(dialogs.clone())).build();

        let err = host
            .handle(&Envelope::new("removeNote", vec![json!("Welcome")]))
            .unwrap_err();
        assert_eq!(err, BridgeError::ChannelNotAllowed("removeNote".into()));
        let err = host
            .handle(&Envelope::new("performance-alert", vec![]))
            .unwrap_err();
        assert_matches!(err, BridgeError::WrongDirection { .. });

        assert!(fs::read_dir(&root)?.next().is_none());
        assert_eq!(dialogs.prompts_seen(), 0);
        Ok(())
    }

    #[test]
    fn store_failures_come_back_tagged() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let (mut host, _main, _secondary) =
            HostBuilder::new(store(&temp)?, Box::new(ScriptedDialogs::new())).build();

        let err = host
            .handle(&Envelope::new("readNote", vec![json!("Missing")]))
            .unwrap_err();
        assert_matches!(
            err,
            BridgeError::Store {
                kind: StoreErrorKind::NotFound,
                ..
            }
        );
        let err = host
            .handle(&Envelope::new("writeNote", vec![json!("../x"), json!("")]))
            .unwrap_err();
        assert_matches!(
            err,
            BridgeError::Store {
                kind: StoreErrorKind::InvalidTitle,
                ..
            }
        );
        Ok(())
    }

    #[test]
    fn raw_envelopes_answer_with_script_values() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = store(&temp)?;
        let target = store.root().join("Draft.md");
        let dialogs = ScriptedDialogs::new().save_path_next(Some(target));
        let (mut host, _main, _secondary) = HostBuilder::new(store, Box::new(dialogs)).build();

        let created = host
            .handle(&Envelope::new("createNote", vec![]))?
            .map(Response::into_value);
        assert_eq!(created, Some(json!("Draft")));
        let cancelled = host
            .handle(&Envelope::new("createNote", vec![]))?
            .map(Response::into_value);
        assert_eq!(cancelled, Some(json!(false)));
        let device = host
            .handle(&Envelope::new("getDeviceInfo", vec![]))?
            .map(Response::into_value);
        assert_eq!(device, Some(json!({ "platform": std::env::consts::OS })));
        Ok(())
    }

    #[test]
    fn commands_drive_windows_and_shell() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let shell = RecordingShell::default();
        let opened = shell.opened.clone();
        let (mut host, _main, secondary) =
            HostBuilder::new(store(&temp)?, Box::new(ScriptedDialogs::new()))
                .shell(Box::new(shell))
                .build();

        let note = Note {
            info: NoteInfo {
                title: "Plan".into(),
                last_edit_time: 1,
            },
            content: "# Plan".into(),
        };
        let reply = host.handle(
            &Command::OpenSecondaryWindow { note: note.clone() }.to_envelope(),
        )?;
        assert_eq!(reply, None);
        assert!(host.windows().is_secondary_open());
        assert_eq!(
            secondary.try_recv().ok(),
            Some(PushEvent::SecondaryWindowData(note))
        );

        host.handle(&Envelope::new("openExternalUrl", vec![json!("https://docs.rs")]))?;
        host.handle(&Envelope::new("openExternalUrl", vec![json!("file:///etc/passwd")]))?;
        assert_eq!(*opened.lock(), vec!["https://docs.rs".to_string()]);

        assert_eq!(
            host.handle(&Envelope::new("openDevTool", vec![]))?,
            Some(Response::DevToolsOpened)
        );
        assert!(host.windows().dev_tools_open());
        Ok(())
    }

    #[test]
    fn spawned_host_announces_and_streams_performance() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let monitor = PerformanceMonitor::new(
            Box::new(BusyMachine),
            AlertThresholds {
                memory_percent: 90.0,
                cpu_percent: 85.0,
            },
        );
        let mut spawned = HostBuilder::new(store(&temp)?, Box::new(ScriptedDialogs::new()))
            .monitor(monitor, Duration::from_millis(10))
            .version("9.9.9")
            .spawn()?;
        let events = spawned.client.events_mut();
        for channel in [
            "main-process-message",
            "onUpdateMessage",
            "performance-data",
            "performance-alert",
        ] {
            events.on(channel)?;
        }

        assert_matches!(
            events.recv_timeout(WAIT),
            Some(PushEvent::MainProcessMessage(_))
        );
        assert_eq!(
            events.recv_timeout(WAIT),
            Some(PushEvent::UpdateMessage("V.9.9.9".into()))
        );
        assert_matches!(
            events.recv_timeout(WAIT),
            Some(PushEvent::PerformanceData(_))
        );
        assert_matches!(
            events.recv_timeout(WAIT),
            Some(PushEvent::PerformanceAlert(alert)) if alert.message.contains("memory")
        );
        Ok(())
    }
}
