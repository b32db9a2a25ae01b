//! MAVLink connection wrapper (ArduCopter, common dialect).

use mavlink::common::{
    MavCmd, MavFrame, MavMessage, MavModeFlag, PositionTargetTypemask, COMMAND_LONG_DATA,
    SET_POSITION_TARGET_GLOBAL_INT_DATA,
};
use mavlink::{MavConnection, MavHeader};
use tracing::{debug, info};
use types::FlightMode;

use crate::{Autopilot, AutopilotError};

/// Position-only target: velocity, acceleration, yaw and yaw-rate ignored.
const POSITION_ONLY_MASK: u16 = 0b0000_1101_1111_1000;

/// Live MAVLink link to the flight controller.
pub struct MavlinkAutopilot {
    connection: Box<dyn MavConnection<MavMessage> + Send + Sync>,
    header: MavHeader,
    target_system: u8,
    target_component: u8,
}

impl MavlinkAutopilot {
    /// Connect (e.g. `udpout:127.0.0.1:5006`) and wait for the first
    /// heartbeat to learn the target system.
    pub fn connect(address: &str) -> Result<Self, AutopilotError> {
        info!(address, "connecting to autopilot");
        let connection = mavlink::connect::<MavMessage>(address)
            .map_err(|e| AutopilotError::Send(e.to_string()))?;

        let (target_system, target_component) = loop {
            match connection.recv() {
                Ok((header, MavMessage::HEARTBEAT(_))) => {
                    info!(
                        system = header.system_id,
                        component = header.component_id,
                        "autopilot heartbeat"
                    );
                    break (header.system_id, header.component_id);
                }
                Ok(_) => continue,
                Err(e) => return Err(AutopilotError::Send(e.to_string())),
            }
        };

        Ok(Self {
            connection,
            header: MavHeader {
                system_id: 255,
                component_id: 0,
                sequence: 0,
            },
            target_system,
            target_component,
        })
    }

    fn send(&mut self, message: &MavMessage) -> Result<(), AutopilotError> {
        self.header.sequence = self.header.sequence.wrapping_add(1);
        self.connection
            .send(&self.header, message)
            .map(|_| ())
            .map_err(|e| AutopilotError::Send(e.to_string()))
    }

    fn command_long(&mut self, command: MavCmd, params: [f32; 7]) -> Result<(), AutopilotError> {
        let message = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system: self.target_system,
            target_component: self.target_component,
            confirmation: 0,
        });
        self.send(&message)
    }
}

impl Autopilot for MavlinkAutopilot {
    fn set_mode(&mut self, mode: FlightMode) -> Result<(), AutopilotError> {
        let custom_mode = mode
            .custom_mode()
            .ok_or(AutopilotError::UnsupportedMode(mode))?;
        debug!(mode = mode.name(), custom_mode, "set mode");
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [
                MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
                custom_mode as f32,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
            ],
        )
    }

    fn move_to(&mut self, lat: f64, lon: f64, alt_rel_m: f64) -> Result<(), AutopilotError> {
        debug!(lat, lon, alt_rel_m, "move to location");
        let message = MavMessage::SET_POSITION_TARGET_GLOBAL_INT(
            SET_POSITION_TARGET_GLOBAL_INT_DATA {
                time_boot_ms: 10,
                target_system: self.target_system,
                target_component: self.target_component,
                coordinate_frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
                type_mask: PositionTargetTypemask::from_bits_truncate(POSITION_ONLY_MASK),
                lat_int: (lat * 1e7) as i32,
                lon_int: (lon * 1e7) as i32,
                alt: alt_rel_m as f32,
                vx: 0.0,
                vy: 0.0,
                vz: 0.0,
                afx: 0.0,
                afy: 0.0,
                afz: 0.0,
                yaw: 0.0,
                yaw_rate: 0.0,
            },
        );
        self.send(&message)
    }

    fn arm(&mut self) -> Result<(), AutopilotError> {
        debug!("arm");
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn takeoff(&mut self, alt_rel_m: f64) -> Result<(), AutopilotError> {
        debug!(alt_rel_m, "takeoff");
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, alt_rel_m as f32],
        )
    }
}
