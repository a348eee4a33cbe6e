/// Frame header codec and the typed messages exchanged with the operator client
pub mod protocol;
/// The write half of a session socket behind the network-write lock
pub mod link;

/// The port the turret listens on for its operator client
pub const TURRET_PORT: u16 = 5000;
