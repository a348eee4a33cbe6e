use std::fmt;

/// Turret is inert, nothing may move or fire
pub const SAFE: u32 = 0x01;
/// Passcode accepted, manual jogging allowed
pub const PREARMED: u32 = 0x02;
/// Autonomous engagement of the firing order
pub const ENGAGE_AUTO: u32 = 0x04;
/// Operator driven firing
pub const ARMED_MANUAL: u32 = 0x08;

pub const ARMED: u32 = 0x10;
pub const FIRING: u32 = 0x20;
pub const LASER_ON: u32 = 0x40;
pub const CALIB_ON: u32 = 0x80;

/// The low nibble of the word holds the base mode
pub const BASE_MODE_MASK: u32 = SAFE | PREARMED | ENGAGE_AUTO | ARMED_MANUAL;
pub const FLAG_MASK: u32 = ARMED | FIRING | LASER_ON | CALIB_ON;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BaseMode {
    Safe,
    Prearmed,
    EngageAuto,
    ArmedManual,
}

impl BaseMode {
    pub fn bits(self) -> u32 {
        match self {
            BaseMode::Safe => SAFE,
            BaseMode::Prearmed => PREARMED,
            BaseMode::EngageAuto => ENGAGE_AUTO,
            BaseMode::ArmedManual => ARMED_MANUAL,
        }
    }
    /// Decodes a base-mode field, anything but exactly one known mode is `None`
    pub fn from_bits(bits: u32) -> Option<BaseMode> {
        match bits & BASE_MODE_MASK {
            SAFE => Some(BaseMode::Safe),
            PREARMED => Some(BaseMode::Prearmed),
            ENGAGE_AUTO => Some(BaseMode::EngageAuto),
            ARMED_MANUAL => Some(BaseMode::ArmedManual),
            _ => None,
        }
    }
    /// Text shown on the status panel
    pub fn label(self) -> &'static str {
        match self {
            BaseMode::Safe => "SAFE",
            BaseMode::Prearmed => "PREARMED",
            BaseMode::EngageAuto => "ENGAGE AUTO",
            BaseMode::ArmedManual => "ARMED_MANUAL",
        }
    }
}

impl fmt::Display for BaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The composite status word: one base mode combined with independent actuator flags.
///
/// Words arriving from the wire may carry any bit pattern, so the base mode
/// is decoded on demand rather than assumed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SystemState(u32);

impl SystemState {
    pub const UNKNOWN: SystemState = SystemState(0);

    pub fn new(mode: BaseMode, flags: u32) -> SystemState {
        SystemState(mode.bits() | (flags & FLAG_MASK))
    }
    pub fn from_raw(raw: u32) -> SystemState {
        SystemState(raw)
    }
    pub fn raw(self) -> u32 {
        self.0
    }
    pub fn base_mode(self) -> Option<BaseMode> {
        BaseMode::from_bits(self.0)
    }
    pub fn is(self, mode: BaseMode) -> bool {
        self.base_mode() == Some(mode)
    }
    pub fn flags(self) -> u32 {
        self.0 & FLAG_MASK
    }
    pub fn has(self, flag: u32) -> bool {
        self.0 & flag == flag
    }
    /// Replaces the base-mode field, flags are left untouched
    pub fn with_base(self, mode: BaseMode) -> SystemState {
        SystemState((self.0 & !BASE_MODE_MASK) | mode.bits())
    }
    pub fn with_flag(self, flag: u32, on: bool) -> SystemState {
        if on {
            SystemState(self.0 | flag)
        } else {
            SystemState(self.0 & !flag)
        }
    }
}

impl fmt::Debug for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base_mode() {
            Some(mode) => write!(f, "{}", mode)?,
            None => write!(f, "UNKNOWN({:#x})", self.0 & BASE_MODE_MASK)?,
        }
        for (flag, name) in [(ARMED, "ARMED"), (FIRING, "FIRING"), (LASER_ON, "LASER"), (CALIB_ON, "CALIB")] {
            if self.has(flag) {
                write!(f, "|{}", name)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
