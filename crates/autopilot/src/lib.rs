//! Autopilot boundary: the consumed MAVLink stack and the local telemetry
//! feed.
//!
//! The wire carries symbolic mode names; numeric custom-mode IDs exist only
//! here, where commands are translated into MAVLink messages.

pub mod feed;
pub mod link;

use thiserror::Error;
use tracing::info;
use types::{DroneCommand, FlightMode};

pub use feed::{FeedConfig, TelemetryFeed};
pub use link::MavlinkAutopilot;

#[derive(Error, Debug)]
pub enum AutopilotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("mode {0:?} cannot be commanded")]
    UnsupportedMode(FlightMode),
    #[error("mavlink send failed: {0}")]
    Send(String),
}

/// Command surface toward the flight controller.
pub trait Autopilot: Send {
    fn set_mode(&mut self, mode: FlightMode) -> Result<(), AutopilotError>;
    fn move_to(&mut self, lat: f64, lon: f64, alt_rel_m: f64) -> Result<(), AutopilotError>;
    fn arm(&mut self) -> Result<(), AutopilotError>;
    fn takeoff(&mut self, alt_rel_m: f64) -> Result<(), AutopilotError>;

    /// Stop-follow maps to loiter at the current position.
    fn loiter(&mut self) -> Result<(), AutopilotError> {
        self.set_mode(FlightMode::Loiter)
    }
}

/// Execute one command envelope against the autopilot.
pub fn execute_command(
    autopilot: &mut dyn Autopilot,
    command: &DroneCommand,
) -> Result<(), AutopilotError> {
    match command {
        DroneCommand::SetFlightMode { mode } => autopilot.set_mode(*mode),
        DroneCommand::MoveToLocation { location } => {
            autopilot.move_to(location.lat, location.lon, location.alt)
        }
        DroneCommand::StopFollowing => autopilot.loiter(),
        DroneCommand::SetFollowDistance { distance } => {
            // Follow spacing is applied on the GCS side; acknowledged here so
            // the envelope stays part of the contract.
            info!(distance, "follow distance noted");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Location;

    #[derive(Default)]
    struct RecordingAutopilot {
        calls: Vec<String>,
    }

    impl Autopilot for RecordingAutopilot {
        fn set_mode(&mut self, mode: FlightMode) -> Result<(), AutopilotError> {
            if mode.custom_mode().is_none() {
                return Err(AutopilotError::UnsupportedMode(mode));
            }
            self.calls.push(format!("set_mode {}", mode.name()));
            Ok(())
        }

        fn move_to(&mut self, lat: f64, lon: f64, alt: f64) -> Result<(), AutopilotError> {
            self.calls.push(format!("move_to {lat} {lon} {alt}"));
            Ok(())
        }

        fn arm(&mut self) -> Result<(), AutopilotError> {
            self.calls.push("arm".to_string());
            Ok(())
        }

        fn takeoff(&mut self, alt: f64) -> Result<(), AutopilotError> {
            self.calls.push(format!("takeoff {alt}"));
            Ok(())
        }
    }

    #[test]
    fn test_set_flight_mode_dispatch() {
        let mut ap = RecordingAutopilot::default();
        execute_command(
            &mut ap,
            &DroneCommand::SetFlightMode {
                mode: FlightMode::Guided,
            },
        )
        .unwrap();
        assert_eq!(ap.calls, vec!["set_mode GUIDED"]);
    }

    #[test]
    fn test_move_to_location_dispatch() {
        let mut ap = RecordingAutopilot::default();
        execute_command(
            &mut ap,
            &DroneCommand::MoveToLocation {
                location: Location {
                    lat: 51.0,
                    lon: -114.0,
                    alt: 15.0,
                },
            },
        )
        .unwrap();
        assert_eq!(ap.calls, vec!["move_to 51 -114 15"]);
    }

    #[test]
    fn test_stop_following_maps_to_loiter() {
        let mut ap = RecordingAutopilot::default();
        execute_command(&mut ap, &DroneCommand::StopFollowing).unwrap();
        assert_eq!(ap.calls, vec!["set_mode LOITER"]);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut ap = RecordingAutopilot::default();
        let result = execute_command(
            &mut ap,
            &DroneCommand::SetFlightMode {
                mode: FlightMode::Unknown,
            },
        );
        assert!(matches!(result, Err(AutopilotError::UnsupportedMode(_))));
    }

    #[test]
    fn test_set_follow_distance_is_acknowledged() {
        let mut ap = RecordingAutopilot::default();
        execute_command(&mut ap, &DroneCommand::SetFollowDistance { distance: 25.0 }).unwrap();
        assert!(ap.calls.is_empty());
    }

    #[test]
    fn test_arm_then_takeoff_sequence() {
        let mut ap = RecordingAutopilot::default();
        ap.set_mode(FlightMode::Guided).unwrap();
        ap.arm().unwrap();
        ap.takeoff(15.0).unwrap();
        assert_eq!(ap.calls, vec!["set_mode GUIDED", "arm", "takeoff 15"]);
    }
}
