//! Register definitions and transaction encodings for the ADS1298 chip.

use crate::types::ConfigError;

// Register Addresses
pub const REG_ID_ADDR    : u8 = 0x00;
pub const CONFIG1_ADDR   : u8 = 0x01;
pub const CONFIG2_ADDR   : u8 = 0x02;
pub const CONFIG3_ADDR   : u8 = 0x03;
pub const LOFF_ADDR      : u8 = 0x04;
pub const CH1SET_ADDR    : u8 = 0x05;
pub const BIAS_SENSP_ADDR: u8 = 0x0D;
pub const BIAS_SENSN_ADDR: u8 = 0x0E;
pub const LOFF_SENSP_ADDR: u8 = 0x0F;
pub const LOFF_SENSN_ADDR: u8 = 0x10;
pub const LOFF_FLIP_ADDR : u8 = 0x11;
pub const CONFIG4_ADDR   : u8 = 0x17;
pub const WCT1_ADDR      : u8 = 0x18;
pub const WCT2_ADDR      : u8 = 0x19;

// ADS1298 Commands
pub const CMD_WAKEUP: u8 = 0x02;
pub const CMD_STANDBY: u8 = 0x04;
pub const CMD_RESET: u8 = 0x06;
pub const CMD_START: u8 = 0x08;
pub const CMD_STOP: u8 = 0x0A;
pub const CMD_RDATAC: u8 = 0x10;
pub const CMD_SDATAC: u8 = 0x11;
pub const CMD_RDATA: u8 = 0x12;

// Register access opcodes, OR'ed with the register address
pub const RREG: u8 = 0x20;
pub const WREG: u8 = 0x40;

// Baseline applied before every mode change
pub const CONFIG1_BASE: u8 = 0x80;      // HR mode, daisy-chain off
pub const CONFIG2_IDLE: u8 = 0xC0;
pub const CONFIG3_IDLE: u8 = 0x48;
pub const CHN_INPUT_SHORTED: u8 = 0x01;
pub const BIAS_SENS_OFF: u8 = 0x00;

// ExG mode
pub const CONFIG2_EXG: u8 = 0x00;
pub const CHN_EXG_GAIN_12: u8 = 0x60;   // gain 12, normal electrode input
pub const BIAS_SENSP_EXG: u8 = 0xFF;
pub const BIAS_SENSN_EXG: u8 = 0x01;
pub const WCT1_EXG: u8 = 0x0A;          // WCTA enabled, routed to channel 2 positive
pub const CONFIG3_BIAS_DRIVE: u8 = 0xEC;

// Lead-off detection
pub const LOFF_ENABLE: u8 = 0x93;
pub const LOFF_SENS_ENABLE: u8 = 0xFF;
pub const CONFIG4_LOFF_ENABLE: u8 = 0x02;
pub const LOFF_DISABLE: u8 = 0x00;

// Test-signal mode
pub const CONFIG2_TEST: u8 = 0x11;      // internal test signal
pub const CONFIG3_TEST: u8 = 0xC0;      // internal reference buffer on
pub const CHN_TEST_SIGNAL: u8 = 0x05;

// ID register masks
pub const ID_FAMILY_MASK: u8 = 0xE0;
pub const ID_FAMILY_ADS129X: u8 = 0x80;
pub const ID_RESERVED_MASK: u8 = 0x18;
pub const ID_RESERVED_VALUE: u8 = 0x10;
pub const ID_CHANNELS_MASK: u8 = 0x03;
pub const ID_CHANNELS_ADS1298: u8 = 0x02;

/// Human readable register names for diagnostics.
pub fn register_name(addr: u8) -> &'static str {
    match addr {
        REG_ID_ADDR => "ID",
        CONFIG1_ADDR => "CONFIG1",
        CONFIG2_ADDR => "CONFIG2",
        CONFIG3_ADDR => "CONFIG3",
        LOFF_ADDR => "LOFF",
        0x05..=0x0C => ["CH1SET", "CH2SET", "CH3SET", "CH4SET", "CH5SET", "CH6SET", "CH7SET", "CH8SET"]
            [(addr - CH1SET_ADDR) as usize],
        BIAS_SENSP_ADDR => "BIAS_SENSP",
        BIAS_SENSN_ADDR => "BIAS_SENSN",
        LOFF_SENSP_ADDR => "LOFF_SENSP",
        LOFF_SENSN_ADDR => "LOFF_SENSN",
        LOFF_FLIP_ADDR => "LOFF_FLIP",
        0x12 => "LOFF_STATP",
        0x13 => "LOFF_STATN",
        0x14 => "GPIO",
        0x15 => "PACE",
        0x16 => "RESP",
        CONFIG4_ADDR => "CONFIG4",
        WCT1_ADDR => "WCT1",
        WCT2_ADDR => "WCT2",
        _ => "Unknown",
    }
}

/// CONFIG1 value for a sampling rate.
pub fn sampling_rate_to_config1(rate: u32) -> Result<u8, ConfigError> {
    let bits = match rate {
        500 => 0b110,
        1000 => 0b101,
        2000 => 0b100,
        4000 => 0b011,
        _ => return Err(ConfigError::UnsupportedSamplingRate(rate)),
    };
    Ok(CONFIG1_BASE | bits)
}

/// Bias sense mask covering the active channels.
pub fn channel_mask(channel_count: u8) -> u8 {
    ((1u16 << channel_count.min(8)) - 1) as u8
}

/// Which identity check an ID register value fails, if any.
pub fn check_device_id(id: u8) -> Result<(), &'static str> {
    if id & ID_RESERVED_MASK != ID_RESERVED_VALUE {
        return Err("reserved bits don't match");
    }
    if id & ID_FAMILY_MASK != ID_FAMILY_ADS129X {
        return Err("not an ADS129x device family");
    }
    if id & ID_CHANNELS_MASK != ID_CHANNELS_ADS1298 {
        return Err("not an ADS1298 device");
    }
    Ok(())
}

/// WREG transaction for one register.
pub fn encode_write_single(register: u8, value: u8) -> [u8; 3] {
    [register | WREG, 0x00, value]
}

/// WREG transaction for `values.len()` contiguous registers starting at `base`.
pub fn encode_write_multiple(base: u8, values: &[u8]) -> Result<Vec<u8>, ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::EmptyRegisterWrite);
    }
    let mut buffer = Vec::with_capacity(2 + values.len());
    buffer.push(base | WREG);
    buffer.push((values.len() - 1) as u8);
    buffer.extend_from_slice(values);
    Ok(buffer)
}

/// RREG transaction for one register; the value comes back in the third byte.
pub fn encode_read_single(register: u8) -> [u8; 3] {
    [register | RREG, 0x00, 0x00]
}
