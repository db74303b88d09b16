use anyhow::{Context, Result};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavState, MavType, COMMAND_LONG_DATA,
        HEARTBEAT_DATA,
    },
    MavConnection, MavHeader,
};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::info;

use crate::MavIds;

/// Shared MAVLink connection to the autopilot. `recv` is used by exactly one
/// blocking reader, `send_*` from anywhere.
pub struct FcLink {
    conn: Box<dyn MavConnection<MavMessage> + Send + Sync>,
    ids: MavIds,
    seq: AtomicU8,
}

impl FcLink {
    pub fn open(address: &str, ids: MavIds) -> Result<Self> {
        // quick validate device
        if let Some((dev, baud)) = parse_serial(address) {
            let _ = tokio_serial::new(dev, baud)
                .open()
                .with_context(|| format!("open fc serial device {}", dev))?;
        }

        let conn = mavlink::connect::<MavMessage>(address)
            .with_context(|| format!("mavlink connect {}", address))?;

        Ok(Self { conn, ids, seq: AtomicU8::new(0) })
    }

    pub fn ids(&self) -> MavIds {
        self.ids
    }

    /// Blocks until the next message.
    pub fn recv(&self) -> Result<(MavHeader, MavMessage)> {
        self.conn.recv().map_err(|e| anyhow::anyhow!("mavlink recv: {:?}", e))
    }

    pub fn send_heartbeat(&self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(MavMessage::HEARTBEAT(hb))
    }

    pub fn cmd_set_mode(&self, custom_mode: u32) -> Result<()> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.ids.target_sys,
            target_component: self.ids.target_comp,
            command: MavCmd::MAV_CMD_DO_SET_MODE,
            confirmation: 0,
            param1: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
            param2: custom_mode as f32,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        };
        info!("FC: sending DO_SET_MODE custom_mode={}", custom_mode);
        self.send(MavMessage::COMMAND_LONG(cmd))
    }

    fn send(&self, msg: MavMessage) -> Result<()> {
        let hdr = MavHeader {
            system_id: self.ids.sys_id,
            component_id: self.ids.comp_id,
            sequence: self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1),
        };
        self.conn
            .send(&hdr, &msg)
            .map_err(|e| anyhow::anyhow!("mavlink send: {:?}", e))?;
        Ok(())
    }
}

/// `serial:/dev/ttyUSB0:57600` -> (`/dev/ttyUSB0`, 57600)
pub fn parse_serial(address: &str) -> Option<(&str, u32)> {
    let rest = address.strip_prefix("serial:")?;
    let (dev, baud) = rest.rsplit_once(':')?;
    Some((dev, baud.parse().ok()?))
}

pub fn serial_address(dev: &str, baud: u32) -> String {
    format!("serial:{}:{}", dev, baud)
}

/// The vehicle this supervisor is built for: an ArduPilot quadrotor.
pub fn is_autopilot_heartbeat(hb: &HEARTBEAT_DATA) -> bool {
    hb.mavtype == MavType::MAV_TYPE_QUADROTOR
        && hb.autopilot == MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA
}

pub fn is_gcs_heartbeat(hb: &HEARTBEAT_DATA) -> bool {
    hb.mavtype == MavType::MAV_TYPE_GCS
}
