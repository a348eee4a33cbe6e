//! Cannon-ctl is the control core of a camera guided targeting turret.
//!
//! It is recommended to familiarize yourself with the following crates before working on it:
//! * [Tokio](https://docs.rs/tokio/latest/tokio)
//! * [Image](https://docs.rs/image/latest/image)
//! * [Bincode](https://docs.rs/bincode/latest/bincode)
//!
//! The turret is driven by a single remote operator client over a length prefixed TCP protocol.
//! Every connection gets a [session::Session] that runs three async tasks: one reads frames from
//! the client, one feeds camera frames through the detector into the engagement sequencer and one
//! streams annotated video back.
//!
//! All of those tasks share one [turret::Turret] behind a [tokio::sync::Mutex]. The turret owns
//! the composite state word, the actuators and the engagement context, and every handler on it
//! takes `&mut self`. Handlers never talk to the socket directly, they queue what they want sent
//! into an [outbox::Outbox] which is delivered once the lock has been released.

/// The composite status word: one base mode plus independent actuator flags.
pub mod state;
/// The physical edge of the turret: gpio pins, servos and the status display.
pub mod hardware;
/// The actuator gate. The only code allowed to change actuator flags.
pub mod actuators;
/// The turret record and its guarded state transitions.
pub mod turret;
/// Manual jog, fire and mode commands from the operator.
pub mod commands;
/// The autonomous multi-target engagement sequencer.
pub mod engagement;
/// Outbound queues filled under the turret lock and delivered after it.
pub mod outbox;
/// The detector collaborator and its switchable strategies.
pub mod detector;
/// The camera collaborator.
pub mod camera;
/// Durable pixel offset correction.
pub mod calibration;
/// The wire protocol spoken with the operator client.
pub mod network;
/// Per connection activities and their teardown.
pub mod session;
/// Frame overlays, frame rate and JPEG encoding for the video stream.
pub mod video;
/// The accept loop.
pub mod server;
/// A simulated range standing in for the turret hardware, camera and detector.
pub mod sim;
