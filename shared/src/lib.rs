//! Wire protocol and spatial math shared between the voice-chat server and
//! the external game-engine controller.
//!
//! Every logical message exchanged with the controller is a serde enum
//! serialized with bincode. TCP carries no record boundaries, so frames are
//! prefixed with a little-endian u32 body length (see [`write_frame`] /
//! [`read_frame`]).

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body. Channel snapshots are small; anything
/// larger than this is a corrupt or hostile length prefix.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// 3D position of a player in world units.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance between two positions.
    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Facing of a player, in radians. Yaw 0 looks along +x, positive yaw turns
/// toward +z. Only yaw participates in stereo balance; pitch is carried for
/// the transport collaborators.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Orientation {
    pub yaw: f32,
    pub pitch: f32,
}

impl Orientation {
    pub fn new(yaw: f32, pitch: f32) -> Self {
        Self { yaw, pitch }
    }
}

/// Tag identifying the primitive type a parameter holds. The set is closed:
/// values outside it are rejected at coercion time.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

/// A typed parameter value, one variant per [`ParameterType`] tag.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl ParameterValue {
    pub fn type_tag(&self) -> ParameterType {
        match self {
            ParameterValue::Bool(_) => ParameterType::Bool,
            ParameterValue::Char(_) => ParameterType::Char,
            ParameterValue::I8(_) => ParameterType::I8,
            ParameterValue::I16(_) => ParameterType::I16,
            ParameterValue::I32(_) => ParameterType::I32,
            ParameterValue::I64(_) => ParameterType::I64,
            ParameterValue::F32(_) => ParameterType::F32,
            ParameterValue::F64(_) => ParameterType::F64,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::Char(v) => write!(f, "{}", v),
            ParameterValue::I8(v) => write!(f, "{}", v),
            ParameterValue::I16(v) => write!(f, "{}", v),
            ParameterValue::I32(v) => write!(f, "{}", v),
            ParameterValue::I64(v) => write!(f, "{}", v),
            ParameterValue::F32(v) => write!(f, "{}", v),
            ParameterValue::F64(v) => write!(f, "{}", v),
        }
    }
}

/// Wire representation of one sound-modifier parameter: name, type tag,
/// default value, current value, and inclusive bounds when range-constrained.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub ty: ParameterType,
    pub default_value: ParameterValue,
    pub value: ParameterValue,
    pub range: Option<(ParameterValue, ParameterValue)>,
}

/// Summary of one channel, used by channel-list answers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelInfo {
    pub name: String,
    pub modifier: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub players: Vec<String>,
}

/// Unsolicited server-to-controller push mirroring an authoritative state
/// mutation. `AddChannel` carries a full snapshot, not a diff.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Message {
    AddChannel {
        name: String,
        modifier: String,
        parameters: Vec<ParameterDescriptor>,
    },
    RemoveChannel {
        name: String,
    },
    RenameChannel {
        old_name: String,
        new_name: String,
    },
    AddPlayer {
        channel: String,
        player: String,
    },
    RemovePlayer {
        channel: String,
        player: String,
    },
    SetModifier {
        channel: String,
        modifier: String,
    },
}

/// Coarse category of a controller request, used by the server's allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCategory {
    ServerInfo,
    ServerJoin,
    Player,
    PlayerMute,
    PlayerDeafen,
    Channels,
    SoundModifier,
    PlayerKick,
    PlayerPosition,
    ServerShutdown,
    PlayerBan,
}

/// Body of a controller-to-server request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum RequestBody {
    ServerInfo,
    ServerJoin {
        player: String,
    },
    PlayerInfo {
        player: String,
    },
    PlayerMute {
        player: String,
        mute: bool,
    },
    PlayerDeafen {
        player: String,
        deafen: bool,
    },
    ChannelList,
    SetSoundModifier {
        channel: String,
        modifier: String,
    },
    PlayerKick {
        channel: String,
        player: String,
    },
    PlayerPosition {
        player: String,
        position: Vec3,
        orientation: Orientation,
    },
    ServerShutdown,
    PlayerBan {
        player: String,
    },
}

impl RequestBody {
    pub fn category(&self) -> RequestCategory {
        match self {
            RequestBody::ServerInfo => RequestCategory::ServerInfo,
            RequestBody::ServerJoin { .. } => RequestCategory::ServerJoin,
            RequestBody::PlayerInfo { .. } => RequestCategory::Player,
            RequestBody::PlayerMute { .. } => RequestCategory::PlayerMute,
            RequestBody::PlayerDeafen { .. } => RequestCategory::PlayerDeafen,
            RequestBody::ChannelList => RequestCategory::Channels,
            RequestBody::SetSoundModifier { .. } => RequestCategory::SoundModifier,
            RequestBody::PlayerKick { .. } => RequestCategory::PlayerKick,
            RequestBody::PlayerPosition { .. } => RequestCategory::PlayerPosition,
            RequestBody::ServerShutdown => RequestCategory::ServerShutdown,
            RequestBody::PlayerBan { .. } => RequestCategory::PlayerBan,
        }
    }
}

/// A controller request. The id is echoed back in the matching [`Answer`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Request {
    pub id: u32,
    pub body: RequestBody,
}

/// Body of a server answer to a controller request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum AnswerBody {
    Done,
    ServerInfo {
        name: String,
        channels: u32,
        players: u32,
    },
    Channels {
        channels: Vec<ChannelInfo>,
    },
    Player {
        player: String,
        muted: bool,
        deafened: bool,
        position: Vec3,
        orientation: Orientation,
    },
    Error {
        reason: String,
    },
    PermissionRefused,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Answer {
    pub id: u32,
    pub body: AnswerBody,
}

/// Envelope for everything that travels on the controller connection.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Frame {
    Push(Message),
    Request(Request),
    Answer(Answer),
}

/// Writes one length-prefixed frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    let body =
        bincode::serialize(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Reads one length-prefixed frame from the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Frame> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    bincode::deserialize(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_distance() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 4.0, 0.0);
        assert_approx_eq!(a.distance(&b), 5.0, 1e-6);
        assert_approx_eq!(b.distance(&a), 5.0, 1e-6);
        assert_approx_eq!(a.distance(&a), 0.0, 1e-6);
    }

    #[test]
    fn test_distance_three_axes() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(3.0, 4.0, 5.0);
        assert_approx_eq!(a.distance(&b), (12.0f32).sqrt(), 1e-5);
    }

    #[test]
    fn test_value_type_tags() {
        assert_eq!(ParameterValue::Bool(true).type_tag(), ParameterType::Bool);
        assert_eq!(ParameterValue::Char('x').type_tag(), ParameterType::Char);
        assert_eq!(ParameterValue::I8(1).type_tag(), ParameterType::I8);
        assert_eq!(ParameterValue::I16(1).type_tag(), ParameterType::I16);
        assert_eq!(ParameterValue::I32(1).type_tag(), ParameterType::I32);
        assert_eq!(ParameterValue::I64(1).type_tag(), ParameterType::I64);
        assert_eq!(ParameterValue::F32(1.0).type_tag(), ParameterType::F32);
        assert_eq!(ParameterValue::F64(1.0).type_tag(), ParameterType::F64);
    }

    #[test]
    fn test_request_categories() {
        assert_eq!(
            RequestBody::ServerInfo.category(),
            RequestCategory::ServerInfo
        );
        assert_eq!(
            RequestBody::ChannelList.category(),
            RequestCategory::Channels
        );
        assert_eq!(
            RequestBody::PlayerKick {
                channel: "Lobby".to_string(),
                player: "alice".to_string(),
            }
            .category(),
            RequestCategory::PlayerKick
        );
        assert_eq!(
            RequestBody::ServerShutdown.category(),
            RequestCategory::ServerShutdown
        );
    }

    #[test]
    fn test_message_serialization() {
        let message = Message::AddChannel {
            name: "Lobby".to_string(),
            modifier: "default".to_string(),
            parameters: vec![ParameterDescriptor {
                name: "Feedback".to_string(),
                ty: ParameterType::Bool,
                default_value: ParameterValue::Bool(false),
                value: ParameterValue::Bool(false),
                range: None,
            }],
        };

        let serialized = bincode::serialize(&message).unwrap();
        let deserialized: Message = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Message::AddChannel {
                name,
                modifier,
                parameters,
            } => {
                assert_eq!(name, "Lobby");
                assert_eq!(modifier, "default");
                assert_eq!(parameters.len(), 1);
                assert_eq!(parameters[0].name, "Feedback");
                assert_eq!(parameters[0].ty, ParameterType::Bool);
            }
            _ => panic!("Wrong message type after deserialization"),
        }
    }

    #[tokio::test]
    async fn test_frame_roundtrip_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let frame = Frame::Request(Request {
            id: 7,
            body: RequestBody::PlayerMute {
                player: "alice".to_string(),
                mute: true,
            },
        });

        write_frame(&mut client, &frame).await.unwrap();
        let received = read_frame(&mut server).await.unwrap();

        match received {
            Frame::Request(request) => {
                assert_eq!(request.id, 7);
                match request.body {
                    RequestBody::PlayerMute { player, mute } => {
                        assert_eq!(player, "alice");
                        assert!(mute);
                    }
                    _ => panic!("Wrong request body after roundtrip"),
                }
            }
            _ => panic!("Wrong frame type after roundtrip"),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // A length prefix past the limit must be rejected before any read
        let bogus_len = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        AsyncWriteExt::write_all(&mut client, &bogus_len).await.unwrap();

        let result = read_frame(&mut server).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_truncated_frame_fails() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let frame = Frame::Push(Message::RemoveChannel {
            name: "Lobby".to_string(),
        });
        let body = bincode::serialize(&frame).unwrap();

        // Claim more bytes than are sent, then close the write side
        AsyncWriteExt::write_all(&mut client, &(body.len() as u32 + 8).to_le_bytes())
            .await
            .unwrap();
        AsyncWriteExt::write_all(&mut client, &body).await.unwrap();
        drop(client);

        let result = read_frame(&mut server).await;
        assert!(result.is_err());
    }
}
