use std::fmt::Write as _;
use std::io::{self, IsTerminal, Read};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use strum::IntoEnumIterator;

use crate::app::{format_edit_time, App};
use crate::config::AppConfig;
use crate::host::dialogs::{ConsoleDialogs, HostDialogs, ScriptedDialogs};
use crate::host::{HostBuilder, HostHandle, Spawned};
use crate::ipc::{BridgeClient, Channel};
use crate::storage::{validate_title, NoteInfo};

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Note title (file name without `.md`)
    pub title: String,
}

#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// Note title (file name without `.md`)
    pub title: String,
    /// Provide the note body inline. If omitted, reads from stdin.
    #[arg(long)]
    pub body: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct NewArgs {
    /// Answer the save prompt with this title instead of asking
    #[arg(long)]
    pub title: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Note title (file name without `.md`)
    pub title: String,
    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

pub fn run_tui(config: Arc<AppConfig>) -> Result<()> {
    let mut app = App::new(config)?;
    app.run()
}

/// A host on its own thread for the length of one subcommand.
struct Session {
    client: BridgeClient,
    host: HostHandle,
}

impl Session {
    fn start(config: &AppConfig, dialogs: Box<dyn HostDialogs>) -> Result<Self> {
        let Spawned { client, host, .. } = HostBuilder::from_config(config, dialogs)?
            .spawn()
            .context("starting host process")?;
        Ok(Self { client, host })
    }

    fn finish(self) {
        self.host.shutdown();
    }
}

pub fn list_notes(config: &AppConfig) -> Result<()> {
    let session = Session::start(config, Box::new(ConsoleDialogs))?;
    let output = run_list(&session.client);
    session.finish();
    print!("{}", output?);
    Ok(())
}

pub fn read_note(config: &AppConfig, args: ReadArgs) -> Result<()> {
    let session = Session::start(config, Box::new(ConsoleDialogs))?;
    let content = run_read(&session.client, &args.title);
    session.finish();
    print!("{}", content?);
    Ok(())
}

pub fn write_note(config: &AppConfig, args: WriteArgs) -> Result<()> {
    let body = match args.body {
        Some(body) => body,
        None => read_stdin()?.unwrap_or_default(),
    };
    let session = Session::start(config, Box::new(ConsoleDialogs))?;
    let result = run_write(&session.client, &args.title, &body);
    session.finish();
    println!("{}", result?);
    Ok(())
}

pub fn new_note(config: &AppConfig, args: NewArgs) -> Result<()> {
    let dialogs: Box<dyn HostDialogs> = match args.title {
        Some(title) => {
            let title = title.trim();
            validate_title(title).context("invalid note title")?;
            let path = config.notes.root_dir.join(format!("{title}.md"));
            Box::new(ScriptedDialogs::new().save_path_next(Some(path)))
        }
        None => Box::new(ConsoleDialogs),
    };
    let session = Session::start(config, dialogs)?;
    let result = run_new(&session.client);
    session.finish();
    println!("{}", result?);
    Ok(())
}

pub fn delete_note(config: &AppConfig, args: DeleteArgs) -> Result<()> {
    let dialogs: Box<dyn HostDialogs> = if args.yes {
        Box::new(ScriptedDialogs::new().confirm_next(true))
    } else {
        Box::new(ConsoleDialogs)
    };
    let session = Session::start(config, dialogs)?;
    let result = run_delete(&session.client, &args.title);
    session.finish();
    println!("{}", result?);
    Ok(())
}

pub fn device_info(config: &AppConfig) -> Result<()> {
    let session = Session::start(config, Box::new(ConsoleDialogs))?;
    let device = session.client.device_info().and_then(|reply| reply.wait_timeout(REPLY_TIMEOUT));
    session.finish();
    println!("platform: {}", device.context("requesting device info")?.platform);
    Ok(())
}

pub fn channel_listing() -> String {
    let mut out = String::new();
    for channel in Channel::iter() {
        let _ = writeln!(&mut out, "{:<28}{}", channel.name(), channel.direction());
    }
    out
}

fn run_list(client: &BridgeClient) -> Result<String> {
    let notes = client
        .get_notes()?
        .wait_timeout(REPLY_TIMEOUT)
        .context("listing notes")?;
    Ok(format_note_list(&notes))
}

fn format_note_list(notes: &[NoteInfo]) -> String {
    if notes.is_empty() {
        return "No notes yet.\n".to_string();
    }
    let mut out = String::new();
    for note in notes {
        let _ = writeln!(&mut out, "{}", note.title);
        let _ = writeln!(
            &mut out,
            "    updated {}",
            format_edit_time(note.last_edit_time)
        );
    }
    out
}

fn run_read(client: &BridgeClient, title: &str) -> Result<String> {
    client
        .read_note(title)?
        .wait_timeout(REPLY_TIMEOUT)
        .with_context(|| format!("reading note {title:?}"))
}

fn run_write(client: &BridgeClient, title: &str, body: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        bail!("note title cannot be empty");
    }
    client
        .write_note(title, body)?
        .wait_timeout(REPLY_TIMEOUT)
        .with_context(|| format!("writing note {title:?}"))?;
    Ok(format!("Saved \"{title}\" ({} bytes)", body.len()))
}

/// Dialog-backed operations wait without a deadline: the user may be typing.
fn run_new(client: &BridgeClient) -> Result<String> {
    let created = client.create_note()?.wait().context("creating note")?;
    Ok(match created {
        Some(title) => format!("Created \"{title}\""),
        None => "No note created".to_string(),
    })
}

fn run_delete(client: &BridgeClient, title: &str) -> Result<String> {
    let deleted = client
        .delete_note(title)?
        .wait()
        .with_context(|| format!("deleting note {title:?}"))?;
    Ok(if deleted {
        format!("Deleted \"{title}\"")
    } else {
        "Delete canceled".to_string()
    })
}

fn read_stdin() -> Result<Option<String>> {
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading note body from stdin")?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigPaths;
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    fn setup_config() -> TestResult<(TempDir, AppConfig)> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        let mut config = AppConfig::for_paths(&paths);
        config.performance.enabled = false;
        Ok((temp, config))
    }

    #[test]
    fn cli_list_seeds_welcome_note() -> TestResult {
        let (_temp, config) = setup_config()?;
        let session = Session::start(&config, Box::new(ScriptedDialogs::new()))?;
        let output = run_list(&session.client)?;
        session.finish();

        assert!(output.starts_with("Welcome\n    updated "), "{output}");
        Ok(())
    }

    #[test]
    fn cli_write_then_read_round_trips_through_host() -> TestResult {
        let (_temp, config) = setup_config()?;
        let session = Session::start(&config, Box::new(ScriptedDialogs::new()))?;

        let saved = run_write(&session.client, " Groceries ", "- milk\n- eggs")?;
        assert_eq!(saved, "Saved \"Groceries\" (13 bytes)");
        assert_eq!(run_read(&session.client, "Groceries")?, "- milk\n- eggs");
        assert!(config.notes.root_dir.join("Groceries.md").is_file());

        let err = run_read(&session.client, "Missing").unwrap_err();
        assert!(format!("{err:#}").contains("Missing"), "{err:#}");
        session.finish();
        Ok(())
    }

    #[test]
    fn cli_new_and_delete_follow_scripted_answers() -> TestResult {
        let (_temp, config) = setup_config()?;
        let dialogs = ScriptedDialogs::new()
            .save_path_next(Some(config.notes.root_dir.join("Ideas.md")))
            .confirm_next(false)
            .confirm_next(true);
        let session = Session::start(&config, Box::new(dialogs.clone()))?;

        assert_eq!(run_new(&session.client)?, "Created \"Ideas\"");
        assert_eq!(run_new(&session.client)?, "No note created");
        assert_eq!(run_delete(&session.client, "Ideas")?, "Delete canceled");
        assert!(config.notes.root_dir.join("Ideas.md").is_file());
        assert_eq!(run_delete(&session.client, "Ideas")?, "Deleted \"Ideas\"");
        assert!(!config.notes.root_dir.join("Ideas.md").exists());
        session.finish();

        assert_eq!(dialogs.prompts_seen(), 4);
        Ok(())
    }

    #[test]
    fn cli_write_rejects_blank_title() -> TestResult {
        let (_temp, config) = setup_config()?;
        let session = Session::start(&config, Box::new(ScriptedDialogs::new()))?;
        assert!(run_write(&session.client, "   ", "body").is_err());
        session.finish();
        Ok(())
    }

    #[test]
    fn channel_listing_names_every_direction() {
        let listing = channel_listing();
        assert_eq!(listing.lines().count(), Channel::iter().count());
        insta::assert_snapshot!(listing.lines().next().unwrap_or_default(), @"getNotes                    invoke");
        assert!(listing.contains("openExternalUrl             send"));
        assert!(listing.contains("performance-alert           push"));
    }
}
