//! # Voice-Chat Server Core
//!
//! This library implements the server half of a channel-based real-time
//! voice-chat service. Players join channels; each channel applies a sound
//! modifier computing, per transmitter/receiver pair, how loud and how
//! balanced the transmitter's voice should sound to the receiver. An
//! external controlling process (a game engine instance) can attach over a
//! dedicated TCP connection to observe and influence this state.
//!
//! ## Core Responsibilities
//!
//! ### Typed Parameter Model
//! Sound modifiers are configured through named, typed, optionally
//! range-bounded parameters. Every mutation goes through one validated
//! setter path: coercion against the type tag, range check, and then the
//! pre/post event sequence when the owning modifier is assigned to a
//! channel. Detached templates mutate silently.
//!
//! ### Volume Calculation
//! The modifier catalog is a closed set of variants behind one calculation
//! interface: the no-op default, the linear-circular hearing radius, and
//! the linear-ellipse placeholder. All variants share the self-audition
//! gate and the stereo balance helper.
//!
//! ### Event-Sourced Synchronization
//! Every authoritative mutation (channel, player, modifier, parameter)
//! raises a cancellable pre-event and, once committed, an informational
//! post-event on an injectable per-instance bus. The synchronization
//! client mirrors the relevant post-events to the controller as incremental
//! protocol messages and gates inbound controller requests against a fixed
//! permission allow-list before they reach the server's command surface.
//!
//! ### Gated Connection Acceptance
//! The controller acceptor admits at most one external connection per
//! open/close cycle. After the first accept it parks until explicitly
//! released; shutdown is idempotent and safe to race with an in-flight
//! accept.
//!
//! ## Module Organization
//!
//! - [`parameter`]: typed parameters, validated coercion, parameter sets
//! - [`modifier`]: volume results, modifier variants, the template catalog
//! - [`events`]: the pre/post mutation event bus
//! - [`channel`]: channels, players, and the authoritative mutation surface
//! - [`sync`]: the controller synchronization client and request gate
//! - [`acceptor`]: the gated single-connection acceptor
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::acceptor::ControllerAcceptor;
//! use server::channel::ServerState;
//! use server::events::EventBus;
//! use server::modifier::{ModifierCatalog, SoundModifier};
//! use server::sync::{RequestHandler, StateRequestHandler, SyncClient};
//! use std::sync::{Arc, Mutex};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Arc::new(EventBus::new());
//!     let mut catalog = ModifierCatalog::new();
//!     catalog.register(SoundModifier::linear_circular(50.0))?;
//!
//!     let state = Arc::new(Mutex::new(ServerState::new(
//!         "my-server",
//!         catalog,
//!         Arc::clone(&bus),
//!     )));
//!     let handler: Arc<Mutex<dyn RequestHandler>> =
//!         Arc::new(Mutex::new(StateRequestHandler::new(Arc::clone(&state))));
//!
//!     let (acceptor, mut controllers) = ControllerAcceptor::open("127.0.0.1:28960").await?;
//!     if let Some(stream) = controllers.recv().await {
//!         let _client = SyncClient::attach(Arc::clone(&bus), stream, handler);
//!         // ... state mutations are now mirrored to the controller
//!     }
//!
//!     acceptor.close().await;
//!     Ok(())
//! }
//! ```

pub mod acceptor;
pub mod channel;
pub mod events;
pub mod modifier;
pub mod parameter;
pub mod sync;
