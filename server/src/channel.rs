//! Channels, players, and the authoritative mutation surface.
//!
//! Full registry bookkeeping (persistence, administration) belongs to outer
//! collaborators; this module carries the part the core depends on: every
//! mutation runs pre-event -> veto check -> commit -> post-event, and no
//! component writes channel or parameter state outside these paths.

use crate::events::{ChannelSnapshot, EventBus, PostEvent, PreEvent};
use crate::modifier::{ModifierCatalog, SoundModifier, VolumeResult};
use crate::parameter::{ParameterError, SetOutcome};
use log::info;
use shared::{ChannelInfo, Orientation, Vec3};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A connected player as the core sees them: identity, spatial state, and
/// the transport-facing mute/deafen flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub name: String,
    pub position: Vec3,
    pub orientation: Orientation,
    pub muted: bool,
    pub deafened: bool,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: Vec3::default(),
            orientation: Orientation::default(),
            muted: false,
            deafened: false,
        }
    }
}

/// A named audio room owning exactly one active sound modifier and a roster
/// of player names.
#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    modifier: SoundModifier,
    players: Vec<String>,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modifier(&self) -> &SoundModifier {
        &self.modifier
    }

    pub fn players(&self) -> &[String] {
        &self.players
    }

    pub(crate) fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            name: self.name.clone(),
            modifier: self.modifier.name().to_string(),
            parameters: self.modifier.parameters().descriptors(),
        }
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            name: self.name.clone(),
            modifier: self.modifier.name().to_string(),
            parameters: self.modifier.parameters().descriptors(),
            players: self.players.clone(),
        }
    }
}

/// Opaque registry failure, propagated unchanged to requesters.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    AlreadyExists(String),
    NotRegistered(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyExists(name) => write!(f, "'{}' already exists", name),
            RegistryError::NotRegistered(name) => write!(f, "'{}' is not registered", name),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Failure of a parameter mutation routed through the server state.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerError {
    Registry(RegistryError),
    Parameter(ParameterError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Registry(e) => e.fmt(f),
            ServerError::Parameter(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<RegistryError> for ServerError {
    fn from(e: RegistryError) -> Self {
        ServerError::Registry(e)
    }
}

impl From<ParameterError> for ServerError {
    fn from(e: ParameterError) -> Self {
        ServerError::Parameter(e)
    }
}

/// Whether a mutation committed or was vetoed by a pre-event subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Applied,
    Vetoed,
}

/// Authoritative server state: channels, registered players, and the
/// modifier catalog, wired to one event bus.
pub struct ServerState {
    name: String,
    channels: HashMap<String, Channel>,
    players: HashMap<String, Player>,
    catalog: ModifierCatalog,
    bus: Arc<EventBus>,
}

impl ServerState {
    pub fn new(name: impl Into<String>, catalog: ModifierCatalog, bus: Arc<EventBus>) -> Self {
        Self {
            name: name.into(),
            channels: HashMap::new(),
            players: HashMap::new(),
            catalog,
            bus,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.get(name)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn channel_infos(&self) -> Vec<ChannelInfo> {
        self.channels.values().map(Channel::info).collect()
    }

    /// Registers a player with the server. Players join channel rosters
    /// separately through [`ServerState::add_player_to_channel`].
    pub fn register_player(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.players.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        self.players.insert(name.to_string(), Player::new(name));
        info!("Player {} joined the server", name);
        Ok(())
    }

    /// Removes a player from the server and from any channel roster they
    /// occupy, raising the roster events.
    pub fn unregister_player(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.players.remove(name).is_none() {
            return Err(RegistryError::NotRegistered(name.to_string()));
        }
        let rosters: Vec<String> = self
            .channels
            .values()
            .filter(|c| c.players.iter().any(|p| p == name))
            .map(|c| c.name.clone())
            .collect();
        for channel in rosters {
            let _ = self.remove_player_from_channel(&channel, name);
        }
        info!("Player {} left the server", name);
        Ok(())
    }

    /// Creates a channel with a modifier cloned from the named catalog
    /// template. The post-event carries a full channel snapshot.
    pub fn add_channel(
        &mut self,
        name: &str,
        modifier_template: &str,
    ) -> Result<Mutation, RegistryError> {
        if self.channels.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        // Validation precedes the pre-event: an unknown template aborts
        // before any notification
        let modifier = self
            .catalog
            .instantiate(modifier_template, name)
            .map_err(|_| RegistryError::NotRegistered(modifier_template.to_string()))?;

        let pre = PreEvent::ChannelAdd {
            name: name.to_string(),
        };
        if !self.bus.publish_pre(&pre) {
            return Ok(Mutation::Vetoed);
        }

        let channel = Channel {
            name: name.to_string(),
            modifier,
            players: Vec::new(),
        };
        let snapshot = channel.snapshot();
        self.channels.insert(name.to_string(), channel);
        info!("Added channel {} ({})", name, modifier_template);
        self.bus
            .publish_post(&PostEvent::ChannelAdded { channel: snapshot });
        Ok(Mutation::Applied)
    }

    pub fn remove_channel(&mut self, name: &str) -> Result<Mutation, RegistryError> {
        if !self.channels.contains_key(name) {
            return Err(RegistryError::NotRegistered(name.to_string()));
        }
        let pre = PreEvent::ChannelRemove {
            name: name.to_string(),
        };
        if !self.bus.publish_pre(&pre) {
            return Ok(Mutation::Vetoed);
        }
        self.channels.remove(name);
        info!("Removed channel {}", name);
        self.bus.publish_post(&PostEvent::ChannelRemoved {
            name: name.to_string(),
        });
        Ok(Mutation::Applied)
    }

    pub fn rename_channel(&mut self, old_name: &str, new_name: &str) -> Result<Mutation, RegistryError> {
        if !self.channels.contains_key(old_name) {
            return Err(RegistryError::NotRegistered(old_name.to_string()));
        }
        if self.channels.contains_key(new_name) {
            return Err(RegistryError::AlreadyExists(new_name.to_string()));
        }
        let pre = PreEvent::ChannelRename {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        };
        if !self.bus.publish_pre(&pre) {
            return Ok(Mutation::Vetoed);
        }
        if let Some(mut channel) = self.channels.remove(old_name) {
            channel.name = new_name.to_string();
            channel.modifier.reattach(new_name);
            self.channels.insert(new_name.to_string(), channel);
        }
        info!("Renamed channel {} to {}", old_name, new_name);
        self.bus.publish_post(&PostEvent::ChannelRenamed {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        });
        Ok(Mutation::Applied)
    }

    pub fn add_player_to_channel(
        &mut self,
        channel_name: &str,
        player: &str,
    ) -> Result<Mutation, RegistryError> {
        if !self.players.contains_key(player) {
            return Err(RegistryError::NotRegistered(player.to_string()));
        }
        let channel = self
            .channels
            .get(channel_name)
            .ok_or_else(|| RegistryError::NotRegistered(channel_name.to_string()))?;
        if channel.players.iter().any(|p| p == player) {
            return Err(RegistryError::AlreadyExists(player.to_string()));
        }

        let pre = PreEvent::PlayerJoin {
            channel: channel_name.to_string(),
            player: player.to_string(),
        };
        if !self.bus.publish_pre(&pre) {
            return Ok(Mutation::Vetoed);
        }
        if let Some(channel) = self.channels.get_mut(channel_name) {
            channel.players.push(player.to_string());
        }
        info!("Player {} joined channel {}", player, channel_name);
        self.bus.publish_post(&PostEvent::PlayerJoined {
            channel: channel_name.to_string(),
            player: player.to_string(),
        });
        Ok(Mutation::Applied)
    }

    pub fn remove_player_from_channel(
        &mut self,
        channel_name: &str,
        player: &str,
    ) -> Result<Mutation, RegistryError> {
        let channel = self
            .channels
            .get(channel_name)
            .ok_or_else(|| RegistryError::NotRegistered(channel_name.to_string()))?;
        if !channel.players.iter().any(|p| p == player) {
            return Err(RegistryError::NotRegistered(player.to_string()));
        }

        let pre = PreEvent::PlayerLeave {
            channel: channel_name.to_string(),
            player: player.to_string(),
        };
        if !self.bus.publish_pre(&pre) {
            return Ok(Mutation::Vetoed);
        }
        if let Some(channel) = self.channels.get_mut(channel_name) {
            channel.players.retain(|p| p != player);
        }
        info!("Player {} left channel {}", player, channel_name);
        self.bus.publish_post(&PostEvent::PlayerLeft {
            channel: channel_name.to_string(),
            player: player.to_string(),
        });
        Ok(Mutation::Applied)
    }

    /// Replaces a channel's modifier with a fresh clone of the named
    /// catalog template. The previous modifier instance is destroyed.
    pub fn set_modifier(
        &mut self,
        channel_name: &str,
        modifier_template: &str,
    ) -> Result<Mutation, RegistryError> {
        if !self.channels.contains_key(channel_name) {
            return Err(RegistryError::NotRegistered(channel_name.to_string()));
        }
        let modifier = self
            .catalog
            .instantiate(modifier_template, channel_name)
            .map_err(|_| RegistryError::NotRegistered(modifier_template.to_string()))?;

        let pre = PreEvent::ModifierChange {
            channel: channel_name.to_string(),
            modifier: modifier_template.to_string(),
        };
        if !self.bus.publish_pre(&pre) {
            return Ok(Mutation::Vetoed);
        }
        if let Some(channel) = self.channels.get_mut(channel_name) {
            channel.modifier = modifier;
        }
        info!("Channel {} now uses modifier {}", channel_name, modifier_template);
        self.bus.publish_post(&PostEvent::ModifierChanged {
            channel: channel_name.to_string(),
            modifier: modifier_template.to_string(),
        });
        Ok(Mutation::Applied)
    }

    /// Validated parameter mutation on a channel's active modifier; the
    /// modifier is attached, so the change rides the pre/post event path.
    pub fn set_parameter(
        &mut self,
        channel_name: &str,
        parameter: &str,
        value: shared::ParameterValue,
    ) -> Result<SetOutcome, ServerError> {
        let bus = Arc::clone(&self.bus);
        let channel = self
            .channels
            .get_mut(channel_name)
            .ok_or_else(|| RegistryError::NotRegistered(channel_name.to_string()))?;
        if channel.modifier.parameters().get(parameter).is_none() {
            return Err(RegistryError::NotRegistered(parameter.to_string()).into());
        }
        Ok(channel
            .modifier
            .set_parameter(parameter, value, Some(bus.as_ref()))?)
    }

    pub fn set_muted(&mut self, player: &str, muted: bool) -> Result<(), RegistryError> {
        let player_state = self
            .players
            .get_mut(player)
            .ok_or_else(|| RegistryError::NotRegistered(player.to_string()))?;
        player_state.muted = muted;
        Ok(())
    }

    pub fn set_deafened(&mut self, player: &str, deafened: bool) -> Result<(), RegistryError> {
        let player_state = self
            .players
            .get_mut(player)
            .ok_or_else(|| RegistryError::NotRegistered(player.to_string()))?;
        player_state.deafened = deafened;
        Ok(())
    }

    pub fn set_position(
        &mut self,
        player: &str,
        position: Vec3,
        orientation: Orientation,
    ) -> Result<(), RegistryError> {
        let player_state = self
            .players
            .get_mut(player)
            .ok_or_else(|| RegistryError::NotRegistered(player.to_string()))?;
        player_state.position = position;
        player_state.orientation = orientation;
        Ok(())
    }

    /// Kicks a player out of a channel roster. The roster-leave events fire
    /// as for a voluntary leave; the player stays registered.
    pub fn kick(&mut self, channel_name: &str, player: &str) -> Result<Mutation, RegistryError> {
        let outcome = self.remove_player_from_channel(channel_name, player)?;
        if outcome == Mutation::Applied {
            info!("Player {} kicked from channel {}", player, channel_name);
        }
        Ok(outcome)
    }

    /// The channel modifier's volume decision for one transmitter/receiver
    /// pair of registered players.
    pub fn volume(
        &self,
        channel_name: &str,
        transmitter: &str,
        receiver: &str,
    ) -> Result<VolumeResult, RegistryError> {
        let channel = self
            .channels
            .get(channel_name)
            .ok_or_else(|| RegistryError::NotRegistered(channel_name.to_string()))?;
        let transmitter = self
            .players
            .get(transmitter)
            .ok_or_else(|| RegistryError::NotRegistered(transmitter.to_string()))?;
        let receiver = self
            .players
            .get(receiver)
            .ok_or_else(|| RegistryError::NotRegistered(receiver.to_string()))?;
        Ok(channel.modifier.calculate(transmitter, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::DEFAULT_MODIFIER_NAME;
    use shared::ParameterValue;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn state() -> ServerState {
        ServerState::new(
            "test-server",
            ModifierCatalog::new(),
            Arc::new(EventBus::new()),
        )
    }

    fn state_with_circular() -> ServerState {
        let mut catalog = ModifierCatalog::new();
        catalog
            .register(SoundModifier::linear_circular(50.0))
            .unwrap();
        ServerState::new("test-server", catalog, Arc::new(EventBus::new()))
    }

    #[test]
    fn test_add_channel_snapshot_event() {
        let state = state();
        let snapshots = Arc::new(Mutex::new(Vec::new()));

        let observed = Arc::clone(&snapshots);
        state.bus().subscribe_post(move |event| {
            if let PostEvent::ChannelAdded { channel } = event {
                observed.lock().unwrap().push(channel.clone());
            }
        });

        let mut state = state;
        assert_eq!(
            state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap(),
            Mutation::Applied
        );

        let snapshots = snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "Lobby");
        assert_eq!(snapshots[0].modifier, "default");
        assert_eq!(snapshots[0].parameters.len(), 1);
        assert_eq!(snapshots[0].parameters[0].name, "Feedback");
    }

    #[test]
    fn test_add_duplicate_channel_rejected_before_events() {
        let mut state = state();
        let pre_count = Arc::new(AtomicU32::new(0));
        let observed = Arc::clone(&pre_count);
        state.bus().subscribe_pre(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
            true
        });

        state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap();
        assert_eq!(
            state.add_channel("Lobby", DEFAULT_MODIFIER_NAME),
            Err(RegistryError::AlreadyExists("Lobby".to_string()))
        );
        // Only the successful add consulted subscribers
        assert_eq!(pre_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_template_aborts_before_events() {
        let mut state = state();
        let pre_count = Arc::new(AtomicU32::new(0));
        let observed = Arc::clone(&pre_count);
        state.bus().subscribe_pre(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(state.add_channel("Lobby", "NoSuchModifier").is_err());
        assert_eq!(pre_count.load(Ordering::SeqCst), 0);
        assert_eq!(state.channel_count(), 0);
    }

    #[test]
    fn test_veto_prevents_channel_add() {
        let mut state = state();
        state
            .bus()
            .subscribe_pre(|event| !matches!(event, PreEvent::ChannelAdd { .. }));

        assert_eq!(
            state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap(),
            Mutation::Vetoed
        );
        assert_eq!(state.channel_count(), 0);
    }

    #[test]
    fn test_rename_channel_keeps_attachment() {
        let mut state = state();
        state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap();
        state.rename_channel("Lobby", "Hall").unwrap();

        assert!(state.channel("Lobby").is_none());
        let hall = state.channel("Hall").unwrap();
        assert_eq!(hall.modifier().channel(), Some("Hall"));
    }

    #[test]
    fn test_rename_to_existing_name_rejected() {
        let mut state = state();
        state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap();
        state.add_channel("Hall", DEFAULT_MODIFIER_NAME).unwrap();
        assert_eq!(
            state.rename_channel("Lobby", "Hall"),
            Err(RegistryError::AlreadyExists("Hall".to_string()))
        );
    }

    #[test]
    fn test_roster_membership() {
        let mut state = state();
        state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap();
        state.register_player("alice").unwrap();

        state.add_player_to_channel("Lobby", "alice").unwrap();
        assert_eq!(state.channel("Lobby").unwrap().players(), ["alice"]);

        // Double join is a registry error
        assert_eq!(
            state.add_player_to_channel("Lobby", "alice"),
            Err(RegistryError::AlreadyExists("alice".to_string()))
        );

        state.remove_player_from_channel("Lobby", "alice").unwrap();
        assert!(state.channel("Lobby").unwrap().players().is_empty());

        // Unregistered players cannot join
        assert_eq!(
            state.add_player_to_channel("Lobby", "ghost"),
            Err(RegistryError::NotRegistered("ghost".to_string()))
        );
    }

    #[test]
    fn test_unregister_clears_rosters() {
        let mut state = state();
        state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap();
        state.register_player("alice").unwrap();
        state.add_player_to_channel("Lobby", "alice").unwrap();

        let left = Arc::new(AtomicU32::new(0));
        let observed = Arc::clone(&left);
        state.bus().subscribe_post(move |event| {
            if matches!(event, PostEvent::PlayerLeft { .. }) {
                observed.fetch_add(1, Ordering::SeqCst);
            }
        });

        state.unregister_player("alice").unwrap();
        assert!(state.channel("Lobby").unwrap().players().is_empty());
        assert_eq!(left.load(Ordering::SeqCst), 1);
        assert!(state.player("alice").is_none());
    }

    #[test]
    fn test_set_modifier_replaces_instance() {
        let mut state = state_with_circular();
        state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap();

        let changed = Arc::new(AtomicU32::new(0));
        let observed = Arc::clone(&changed);
        state.bus().subscribe_post(move |event| {
            if let PostEvent::ModifierChanged { channel, modifier } = event {
                assert_eq!(channel, "Lobby");
                assert_eq!(modifier, "LinearCircular_50");
                observed.fetch_add(1, Ordering::SeqCst);
            }
        });

        state.set_modifier("Lobby", "LinearCircular_50").unwrap();
        let lobby = state.channel("Lobby").unwrap();
        assert_eq!(lobby.modifier().name(), "LinearCircular_50");
        assert_eq!(lobby.modifier().channel(), Some("Lobby"));
        assert_eq!(changed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_parameter_routes_through_events() {
        let mut state = state();
        state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap();

        let changed = Arc::new(AtomicU32::new(0));
        let observed = Arc::clone(&changed);
        state.bus().subscribe_post(move |event| {
            if let PostEvent::ParameterChanged {
                parameter, old, ..
            } = event
            {
                assert_eq!(parameter, "Feedback");
                assert_eq!(old, &ParameterValue::Bool(false));
                observed.fetch_add(1, Ordering::SeqCst);
            }
        });

        let outcome = state
            .set_parameter("Lobby", "Feedback", ParameterValue::Bool(true))
            .unwrap();
        assert!(matches!(outcome, SetOutcome::Updated { .. }));
        assert!(state.channel("Lobby").unwrap().modifier().send_feedback());
        assert_eq!(changed.load(Ordering::SeqCst), 1);

        // Unknown parameter is an opaque registry failure
        assert!(matches!(
            state.set_parameter("Lobby", "NoSuch", ParameterValue::Bool(true)),
            Err(ServerError::Registry(RegistryError::NotRegistered(_)))
        ));
    }

    #[test]
    fn test_volume_uses_channel_modifier() {
        let mut state = state_with_circular();
        state.add_channel("Arena", "LinearCircular_50").unwrap();
        state.register_player("alice").unwrap();
        state.register_player("bob").unwrap();
        state
            .set_position("alice", Vec3::new(50.0, 0.0, 0.0), Orientation::default())
            .unwrap();

        let result = state.volume("Arena", "alice", "bob").unwrap();
        assert!((result.global - -1.0).abs() < 1e-6);

        // Self-audition silenced with feedback off
        let own = state.volume("Arena", "alice", "alice").unwrap();
        assert_eq!(own, VolumeResult::NONE);
    }

    #[test]
    fn test_mute_deafen_kick() {
        let mut state = state();
        state.add_channel("Lobby", DEFAULT_MODIFIER_NAME).unwrap();
        state.register_player("alice").unwrap();
        state.add_player_to_channel("Lobby", "alice").unwrap();

        state.set_muted("alice", true).unwrap();
        state.set_deafened("alice", true).unwrap();
        let alice = state.player("alice").unwrap();
        assert!(alice.muted);
        assert!(alice.deafened);

        state.kick("Lobby", "alice").unwrap();
        assert!(state.channel("Lobby").unwrap().players().is_empty());
        // Kicked players stay registered with the server
        assert!(state.player("alice").is_some());
    }
}
