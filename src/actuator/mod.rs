mod mqtt;

pub use mqtt::{spawn_supervisor, Actuator, ActuatorSession, ConnectionState};
