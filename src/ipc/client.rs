use std::collections::HashSet;
use std::marker::PhantomData;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde_json::Value;

use super::{
    BridgeError, Channel, Command, Direction, Envelope, HostMessage, Inbound, PushEvent, Request,
    Response,
};
use crate::storage::{DeviceInfo, NoteInfo};

/// The UI side of the bridge. It never touches the host directly; everything it asks for
/// leaves as an [`Envelope`].
pub struct BridgeClient {
    outbox: Sender<HostMessage>,
    events: WindowEvents,
}

impl BridgeClient {
    pub(crate) fn new(outbox: Sender<HostMessage>, events: WindowEvents) -> Self {
        Self { outbox, events }
    }

    pub fn invoke(&self, request: Request) -> Result<PendingReply<Response>, BridgeError> {
        self.dispatch(request.channel(), request.to_envelope())
    }

    /// Untyped entry point: `channel` must name an invoke channel on the allow-list and
    /// `args` must decode for it, otherwise nothing is sent.
    pub fn invoke_raw(
        &self,
        channel: &str,
        args: Vec<Value>,
    ) -> Result<PendingReply<Response>, BridgeError> {
        let envelope = Envelope::new(channel, args);
        match Inbound::decode_as(&envelope, Direction::Invoke)? {
            Inbound::Invoke(request) => self.dispatch(request.channel(), envelope),
            Inbound::Send(command) => Err(BridgeError::WrongDirection {
                channel: command.channel(),
                expected: Direction::Invoke,
                actual: Direction::Send,
            }),
        }
    }

    pub fn send(&self, command: Command) -> Result<(), BridgeError> {
        self.outbox
            .send(HostMessage::Send {
                envelope: command.to_envelope(),
            })
            .map_err(|_| BridgeError::Disconnected)
    }

    pub fn send_raw(&self, channel: &str, args: Vec<Value>) -> Result<(), BridgeError> {
        let envelope = Envelope::new(channel, args);
        match Inbound::decode_as(&envelope, Direction::Send)? {
            Inbound::Send(_) => self
                .outbox
                .send(HostMessage::Send { envelope })
                .map_err(|_| BridgeError::Disconnected),
            Inbound::Invoke(request) => Err(BridgeError::WrongDirection {
                channel: request.channel(),
                expected: Direction::Send,
                actual: Direction::Invoke,
            }),
        }
    }

    pub fn get_notes(&self) -> Result<PendingReply<Vec<NoteInfo>>, BridgeError> {
        Ok(self.invoke(Request::GetNotes)?.map(|response| match response {
            Response::Notes(notes) => Some(notes),
            _ => None,
        }))
    }

    pub fn read_note(&self, title: &str) -> Result<PendingReply<String>, BridgeError> {
        let request = Request::ReadNote {
            title: title.to_string(),
        };
        Ok(self.invoke(request)?.map(|response| match response {
            Response::Content(content) => Some(content),
            _ => None,
        }))
    }

    pub fn write_note(&self, title: &str, content: &str) -> Result<PendingReply<()>, BridgeError> {
        let request = Request::WriteNote {
            title: title.to_string(),
            content: content.to_string(),
        };
        Ok(self.invoke(request)?.map(|response| match response {
            Response::Written => Some(()),
            _ => None,
        }))
    }

    pub fn create_note(&self) -> Result<PendingReply<Option<String>>, BridgeError> {
        Ok(self
            .invoke(Request::CreateNote)?
            .map(|response| match response {
                Response::Created(title) => Some(title),
                _ => None,
            }))
    }

    pub fn delete_note(&self, title: &str) -> Result<PendingReply<bool>, BridgeError> {
        let request = Request::DeleteNote {
            title: title.to_string(),
        };
        Ok(self.invoke(request)?.map(|response| match response {
            Response::Deleted(deleted) => Some(deleted),
            _ => None,
        }))
    }

    pub fn device_info(&self) -> Result<PendingReply<DeviceInfo>, BridgeError> {
        Ok(self
            .invoke(Request::GetDeviceInfo)?
            .map(|response| match response {
                Response::Device(device) => Some(device),
                _ => None,
            }))
    }

    pub fn open_dev_tool(&self) -> Result<PendingReply<()>, BridgeError> {
        Ok(self
            .invoke(Request::OpenDevTool)?
            .map(|response| match response {
                Response::DevToolsOpened => Some(()),
                _ => None,
            }))
    }

    pub fn on(&mut self, channel: &str) -> Result<Channel, BridgeError> {
        self.events.on(channel)
    }

    pub fn off(&mut self, channel: &str) -> Result<Channel, BridgeError> {
        self.events.off(channel)
    }

    pub fn drain_events(&self) -> Vec<PushEvent> {
        self.events.drain()
    }

    pub fn events(&self) -> &WindowEvents {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut WindowEvents {
        &mut self.events
    }

    fn dispatch(
        &self,
        channel: Channel,
        envelope: Envelope,
    ) -> Result<PendingReply<Response>, BridgeError> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.outbox
            .send(HostMessage::Invoke { envelope, reply })
            .map_err(|_| BridgeError::Disconnected)?;
        Ok(PendingReply::new(channel, rx))
    }
}

/// A reply that may not have arrived yet. Poll it with [`PendingReply::try_take`] from a
/// tick loop, or block on it with [`PendingReply::wait`].
#[derive(Debug)]
pub struct PendingReply<T> {
    channel: Channel,
    rx: Receiver<Result<Response, BridgeError>>,
    extract: fn(Response) -> Option<T>,
    _marker: PhantomData<fn() -> T>,
}

impl PendingReply<Response> {
    fn new(channel: Channel, rx: Receiver<Result<Response, BridgeError>>) -> Self {
        Self {
            channel,
            rx,
            extract: Some,
            _marker: PhantomData,
        }
    }

    fn map<U>(self, extract: fn(Response) -> Option<U>) -> PendingReply<U> {
        PendingReply {
            channel: self.channel,
            rx: self.rx,
            extract,
            _marker: PhantomData,
        }
    }
}

impl<T> PendingReply<T> {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// `None` while the host is still working on it.
    pub fn try_take(&self) -> Option<Result<T, BridgeError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(self.finish(result)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(BridgeError::Disconnected)),
        }
    }

    pub fn wait(self) -> Result<T, BridgeError> {
        match self.rx.recv() {
            Ok(result) => self.finish(result),
            Err(_) => Err(BridgeError::Disconnected),
        }
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<T, BridgeError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => self.finish(result),
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::Timeout {
                channel: self.channel,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Disconnected),
        }
    }

    fn finish(&self, result: Result<Response, BridgeError>) -> Result<T, BridgeError> {
        let response = result?;
        (self.extract)(response).ok_or(BridgeError::UnexpectedResponse {
            channel: self.channel,
        })
    }
}

/// Push events addressed to one window, filtered by the channels it listens on.
pub struct WindowEvents {
    rx: Receiver<PushEvent>,
    subscriptions: HashSet<Channel>,
}

impl WindowEvents {
    pub(crate) fn new(rx: Receiver<PushEvent>) -> Self {
        Self {
            rx,
            subscriptions: HashSet::new(),
        }
    }

    pub fn on(&mut self, channel: &str) -> Result<Channel, BridgeError> {
        let channel = Channel::parse(channel)?.expect(Direction::Push)?;
        self.subscriptions.insert(channel);
        Ok(channel)
    }

    pub fn off(&mut self, channel: &str) -> Result<Channel, BridgeError> {
        let channel = Channel::parse(channel)?.expect(Direction::Push)?;
        self.subscriptions.remove(&channel);
        Ok(channel)
    }

    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.subscriptions.contains(&channel)
    }

    /// Everything queued so far; events on channels nobody listens to are dropped.
    pub fn drain(&self) -> Vec<PushEvent> {
        self.rx
            .try_iter()
            .filter(|event| self.subscriptions.contains(&event.channel()))
            .collect()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<PushEvent> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) if self.subscriptions.contains(&event.channel()) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn subscriptions_only_accept_push_channels() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut events = WindowEvents::new(rx);
        assert_eq!(events.on("performance-data"), Ok(Channel::PerformanceData));
        assert_matches!(
            events.on("getNotes"),
            Err(BridgeError::WrongDirection { .. })
        );
        assert_eq!(
            events.on("some-data"),
            Err(BridgeError::ChannelNotAllowed("some-data".into()))
        );
    }

    #[test]
    fn unsubscribed_events_are_dropped() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut events = WindowEvents::new(rx);
        events.on("onUpdateMessage").expect("allowed");
        tx.send(PushEvent::MainProcessMessage("boot".into()))
            .expect("send");
        tx.send(PushEvent::UpdateMessage("V.1".into())).expect("send");

        assert_eq!(events.drain(), vec![PushEvent::UpdateMessage("V.1".into())]);
        events.off("onUpdateMessage").expect("allowed");
        tx.send(PushEvent::UpdateMessage("V.2".into())).expect("send");
        assert!(events.drain().is_empty());
    }

    #[test]
    fn raw_invoke_rejects_before_sending() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (_events_tx, events_rx) = crossbeam_channel::unbounded();
        let client = BridgeClient::new(tx, WindowEvents::new(events_rx));

        assert_eq!(
            client.invoke_raw("rm -rf", vec![]).unwrap_err(),
            BridgeError::ChannelNotAllowed("rm -rf".into())
        );
        assert_matches!(
            client.invoke_raw("openUrl", vec![serde_json::json!("https://example.com")]),
            Err(BridgeError::WrongDirection { .. })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn raw_send_reports_send_as_expected_direction() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (_events_tx, events_rx) = crossbeam_channel::unbounded();
        let client = BridgeClient::new(tx, WindowEvents::new(events_rx));

        assert_eq!(
            client.send_raw("performance-data", vec![]).unwrap_err(),
            BridgeError::WrongDirection {
                channel: Channel::PerformanceData,
                expected: Direction::Send,
                actual: Direction::Push,
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
