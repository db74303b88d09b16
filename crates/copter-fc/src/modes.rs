//! ArduCopter flight modes (HEARTBEAT `custom_mode` numbers).

const COPTER_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (5, "LOITER"),
    (6, "RTL"),
    (7, "CIRCLE"),
    (9, "LAND"),
    (11, "DRIFT"),
    (13, "SPORT"),
    (14, "FLIP"),
    (15, "AUTOTUNE"),
    (16, "POSHOLD"),
    (17, "BRAKE"),
    (18, "THROW"),
    (19, "AVOID_ADSB"),
    (20, "GUIDED_NOGPS"),
    (21, "SMART_RTL"),
    (22, "FLOWHOLD"),
    (23, "FOLLOW"),
    (24, "ZIGZAG"),
    (25, "SYSTEMID"),
    (26, "AUTOROTATE"),
    (27, "AUTO_RTL"),
];

pub fn mode_name(custom_mode: u32) -> Option<&'static str> {
    COPTER_MODES.iter().find(|(n, _)| *n == custom_mode).map(|(_, s)| *s)
}

pub fn mode_number(name: &str) -> Option<u32> {
    COPTER_MODES
        .iter()
        .find(|(_, s)| s.eq_ignore_ascii_case(name.trim()))
        .map(|(n, _)| *n)
}
