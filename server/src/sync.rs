//! Synchronization of authoritative state with the external controller.
//!
//! Outbound: a post-event subscription serializes channel/player/modifier
//! mutations into protocol messages and queues them on the controller
//! connection. Individual parameter edits are not forwarded; the controller
//! sees parameter state inside the full snapshot carried by `AddChannel`.
//!
//! Inbound: every request is classified against a fixed allow-list before
//! the server's request handler sees it. Refused requests are answered with
//! `PermissionRefused` and never produce side effects; handler failures are
//! serialized into error answers rather than closing the connection.

use crate::channel::ServerState;
use crate::events::{EventBus, PostEvent, SubscriptionId};
use log::{info, warn};
use shared::{
    read_frame, write_frame, Answer, AnswerBody, Frame, Message, Request, RequestBody,
    RequestCategory,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Request categories an external controller may issue. This list is the
/// sole access-control boundary for the controller and is checked before
/// any handler side effect.
pub const ALLOWED_CATEGORIES: [RequestCategory; 9] = [
    RequestCategory::ServerInfo,
    RequestCategory::ServerJoin,
    RequestCategory::Player,
    RequestCategory::PlayerMute,
    RequestCategory::PlayerDeafen,
    RequestCategory::Channels,
    RequestCategory::SoundModifier,
    RequestCategory::PlayerKick,
    RequestCategory::PlayerPosition,
];

pub fn is_allowed(category: RequestCategory) -> bool {
    ALLOWED_CATEGORIES.contains(&category)
}

/// The controller connection's write side: frames are queued on an
/// unbounded channel and drained by a dedicated writer task, so event
/// handlers never block on socket I/O.
///
/// Once disposed, sends silently skip. Loss notification and in-flight
/// event delivery race; the disposed check resolves that race in favor of
/// dropping the frame.
pub struct Connection {
    outbound: mpsc::UnboundedSender<Frame>,
    disposed: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(write_half: OwnedWriteHalf) -> Arc<Self> {
        let (outbound, mut queue) = mpsc::unbounded_channel::<Frame>();
        let disposed = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&disposed);
        tokio::spawn(async move {
            let mut writer = write_half;
            while let Some(frame) = queue.recv().await {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!("Failed to write to controller: {}", e);
                    flag.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        Arc::new(Self { outbound, disposed })
    }

    /// Queues a frame unless the connection is disposed.
    pub fn send(&self, frame: Frame) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        // A closed queue means the writer already exited; nothing to do
        let _ = self.outbound.send(frame);
    }

    /// Marks the connection disposed. Idempotent; queued frames after this
    /// point are discarded by the writer task.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// The server's command surface as the controller reaches it.
pub trait RequestHandler: Send {
    fn handle(&mut self, request: &Request) -> AnswerBody;
}

/// Maps a post-event to its outbound protocol message, if the event is
/// mirrored to the controller at all.
pub fn message_for(event: &PostEvent) -> Option<Message> {
    match event {
        PostEvent::ChannelAdded { channel } => Some(Message::AddChannel {
            name: channel.name.clone(),
            modifier: channel.modifier.clone(),
            parameters: channel.parameters.clone(),
        }),
        PostEvent::ChannelRemoved { name } => Some(Message::RemoveChannel { name: name.clone() }),
        PostEvent::ChannelRenamed { old_name, new_name } => Some(Message::RenameChannel {
            old_name: old_name.clone(),
            new_name: new_name.clone(),
        }),
        PostEvent::PlayerJoined { channel, player } => Some(Message::AddPlayer {
            channel: channel.clone(),
            player: player.clone(),
        }),
        PostEvent::PlayerLeft { channel, player } => Some(Message::RemovePlayer {
            channel: channel.clone(),
            player: player.clone(),
        }),
        PostEvent::ModifierChanged { channel, modifier } => Some(Message::SetModifier {
            channel: channel.clone(),
            modifier: modifier.clone(),
        }),
        // Parameter edits ride along inside full-channel snapshots only
        PostEvent::ParameterChanged { .. } => None,
    }
}

/// One attached controller: an outbound event mirror plus the inbound
/// request gate, bound to a single connection for its whole life.
pub struct SyncClient {
    connection: Arc<Connection>,
    subscription: SubscriptionId,
    bus: Arc<EventBus>,
}

impl SyncClient {
    /// Wires a freshly accepted controller stream to the server: subscribes
    /// the outbound mirror on the bus and spawns the inbound read loop.
    pub fn attach(
        bus: Arc<EventBus>,
        stream: TcpStream,
        handler: Arc<Mutex<dyn RequestHandler>>,
    ) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let connection = Connection::new(write_half);

        let mirror = Arc::clone(&connection);
        let subscription = bus.subscribe_post(move |event| {
            if let Some(message) = message_for(event) {
                mirror.send(Frame::Push(message));
            }
        });

        let client = Arc::new(Self {
            connection,
            subscription,
            bus,
        });

        let reader_client = Arc::clone(&client);
        tokio::spawn(async move {
            let mut reader = read_half;
            loop {
                match read_frame(&mut reader).await {
                    Ok(Frame::Request(request)) => {
                        let body = Self::answer_for(&request, &handler);
                        reader_client
                            .connection
                            .send(Frame::Answer(Answer {
                                id: request.id,
                                body,
                            }));
                    }
                    Ok(_) => {
                        warn!("Ignoring non-request frame from controller");
                    }
                    Err(e) => {
                        info!("Controller connection closed: {}", e);
                        break;
                    }
                }
            }
            reader_client.dispose();
        });

        client
    }

    fn answer_for(request: &Request, handler: &Arc<Mutex<dyn RequestHandler>>) -> AnswerBody {
        if !is_allowed(request.body.category()) {
            return AnswerBody::PermissionRefused;
        }
        match handler.lock() {
            Ok(mut handler) => handler.handle(request),
            Err(_) => AnswerBody::Error {
                reason: "request handler unavailable".to_string(),
            },
        }
    }

    /// Disposes the connection and revokes the bus subscription. After this
    /// no event for this server instance touches the connection.
    pub fn dispose(&self) {
        self.connection.dispose();
        self.bus.unsubscribe(self.subscription);
    }

    pub fn is_disposed(&self) -> bool {
        self.connection.is_disposed()
    }
}

/// Default request handler dispatching the allow-listed categories into the
/// authoritative server state. Registry failures are serialized into error
/// answers and propagated unchanged to the requester.
pub struct StateRequestHandler {
    state: Arc<Mutex<ServerState>>,
}

impl StateRequestHandler {
    pub fn new(state: Arc<Mutex<ServerState>>) -> Self {
        Self { state }
    }
}

impl RequestHandler for StateRequestHandler {
    fn handle(&mut self, request: &Request) -> AnswerBody {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => {
                return AnswerBody::Error {
                    reason: "server state unavailable".to_string(),
                }
            }
        };

        match &request.body {
            RequestBody::ServerInfo => AnswerBody::ServerInfo {
                name: state.name().to_string(),
                channels: state.channel_count() as u32,
                players: state.player_count() as u32,
            },
            RequestBody::ServerJoin { player } => match state.register_player(player) {
                Ok(()) => AnswerBody::Done,
                Err(e) => AnswerBody::Error {
                    reason: e.to_string(),
                },
            },
            RequestBody::PlayerInfo { player } => match state.player(player) {
                Some(info) => AnswerBody::Player {
                    player: info.name.clone(),
                    muted: info.muted,
                    deafened: info.deafened,
                    position: info.position,
                    orientation: info.orientation,
                },
                None => AnswerBody::Error {
                    reason: format!("'{}' is not registered", player),
                },
            },
            RequestBody::PlayerMute { player, mute } => match state.set_muted(player, *mute) {
                Ok(()) => AnswerBody::Done,
                Err(e) => AnswerBody::Error {
                    reason: e.to_string(),
                },
            },
            RequestBody::PlayerDeafen { player, deafen } => {
                match state.set_deafened(player, *deafen) {
                    Ok(()) => AnswerBody::Done,
                    Err(e) => AnswerBody::Error {
                        reason: e.to_string(),
                    },
                }
            }
            RequestBody::ChannelList => AnswerBody::Channels {
                channels: state.channel_infos(),
            },
            RequestBody::SetSoundModifier { channel, modifier } => {
                match state.set_modifier(channel, modifier) {
                    Ok(_) => AnswerBody::Done,
                    Err(e) => AnswerBody::Error {
                        reason: e.to_string(),
                    },
                }
            }
            RequestBody::PlayerKick { channel, player } => match state.kick(channel, player) {
                Ok(_) => AnswerBody::Done,
                Err(e) => AnswerBody::Error {
                    reason: e.to_string(),
                },
            },
            RequestBody::PlayerPosition {
                player,
                position,
                orientation,
            } => match state.set_position(player, *position, *orientation) {
                Ok(()) => AnswerBody::Done,
                Err(e) => AnswerBody::Error {
                    reason: e.to_string(),
                },
            },
            // Never reachable through the gate; answered for completeness
            RequestBody::ServerShutdown | RequestBody::PlayerBan { .. } => AnswerBody::Error {
                reason: "unsupported request".to_string(),
            },
        }
    }
}
