//! Register values, the base configuration table, and the unit conversions
//! between human quantities (MHz, dBm, bit/s) and register codes.

use crate::registers::Register;

/// Crystal oscillator frequency, Hz.
pub const RF69_FXOSC: u32 = 32_000_000;

/// Frequency synthesizer step size, Hz (FXOSC / 2^19).
pub const RF69_FSTEP: f64 = RF69_FXOSC as f64 / 524_288.0;

/// Chip identity reported by the Version register.
pub const RF69_CHIP_VERSION: u8 = 0x24;

/// Hardware FIFO depth in bytes.
pub const RF69_FIFO_SIZE: usize = 66;

/// Largest payload accepted by `send`; longer payloads are truncated.
pub const RF69_MAX_PAYLOAD_LEN: usize = 60;

// IrqFlags1 / IrqFlags2 status bits.
pub const RF_IRQFLAGS1_MODEREADY: u8 = 0x80;
pub const RF_IRQFLAGS2_PAYLOADREADY: u8 = 0x04;
pub const RF_IRQFLAGS2_PACKETSENT: u8 = 0x08;

// PaLevel amplifier-select and output-power bits.
pub const RF_PALEVEL_PA0_ON: u8 = 0x80;
pub const RF_PALEVEL_PA1_ON: u8 = 0x40;
pub const RF_PALEVEL_PA2_ON: u8 = 0x20;
pub const RF_PALEVEL_OUTPUTPOWER_11111: u8 = 0x1F;

// Over-current protection.
pub const RF_OCP_ON: u8 = 0x1A;
pub const RF_OCP_OFF: u8 = 0x0F;

// High-power boost test registers. The boost values are only valid while
// the chip is physically transmitting.
pub const RF_TESTPA1_NORMAL: u8 = 0x55;
pub const RF_TESTPA1_BOOST: u8 = 0x5D;
pub const RF_TESTPA2_NORMAL: u8 = 0x70;
pub const RF_TESTPA2_BOOST: u8 = 0x7C;

// SyncConfig bits.
pub const RF_SYNC_ON: u8 = 0x80;
pub const RF_SYNC_FIFOFILL_MANUAL: u8 = 0x40;

// PacketConfig2 bits.
pub const RF_PACKET2_AES_ON: u8 = 0x01;

/// 16-bit bit-rate divider: FXOSC / bit rate, rounded to nearest.
pub const fn bitrate_code(bit_rate: u32) -> u16 {
    ((RF69_FXOSC + bit_rate / 2) / bit_rate) as u16
}

/// 16-bit frequency-deviation code: deviation / FSTEP, rounded to nearest.
pub const fn fdev_code(deviation_hz: u32) -> u16 {
    let fxosc = RF69_FXOSC as u64;
    ((deviation_hz as u64 * 524_288 + fxosc / 2) / fxosc) as u16
}

const BITRATE_4800: u16 = bitrate_code(4_800);
const FDEV_5000: u16 = fdev_code(5_000);

/// Fixed register profile applied at initialization: packet mode, FSK
/// without shaping, 4.8 kbit/s, 5 kHz deviation, 10.4 kHz channel filter,
/// variable-length packets with CRC, FIFO-driven transmit start, automatic
/// receive restart, and the boost registers parked at their normal values.
///
/// The chip must be in standby (the post-reset state) while this table is
/// written.
pub const BASE_CONFIG: [(Register, u8); 20] = [
    (Register::DataModul, 0x00),
    (Register::BitrateMsb, (BITRATE_4800 >> 8) as u8),
    (Register::BitrateLsb, BITRATE_4800 as u8),
    (Register::FdevMsb, (FDEV_5000 >> 8) as u8),
    (Register::FdevLsb, FDEV_5000 as u8),
    (Register::Lna, 0x88),
    (Register::RxBw, 0x55),
    (Register::AfcBw, 0x8B),
    (Register::PreambleMsb, 0x00),
    (Register::PreambleLsb, 0x04),
    (Register::SyncConfig, 0x88),
    (Register::SyncValue1, 0x2D),
    (Register::SyncValue2, 0xD4),
    (Register::PacketConfig1, 0x90),
    (Register::PayloadLength, RF69_FIFO_SIZE as u8),
    (Register::FifoThresh, 0x8F),
    (Register::PacketConfig2, 0x02),
    (Register::TestDagc, ContinuousDagc::ImprovedLowBeta0 as u8),
    (Register::TestPa1, RF_TESTPA1_NORMAL),
    (Register::TestPa2, RF_TESTPA2_NORMAL),
];

/// Converts a carrier frequency in MHz to the 24-bit Frf register word.
///
/// The quotient is truncated toward zero, so both ends of a link derive
/// the same word from the same request; the error stays below one
/// synthesizer step (~61 Hz).
pub fn frf_from_mhz(freq_mhz: f32) -> u32 {
    (freq_mhz as f64 * 1_000_000.0 / RF69_FSTEP) as u32
}

/// Converts a 24-bit Frf register word back to MHz.
pub fn mhz_from_frf(frf: u32) -> f32 {
    (frf as f64 * RF69_FSTEP / 1_000_000.0) as f32
}

/// Converts a raw RssiValue register reading to dBm.
pub fn rssi_dbm(raw: u8) -> i16 {
    -((raw / 2) as i16)
}

/// Continuous DAGC modes written to the TestDagc register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ContinuousDagc {
    Normal = 0x00,
    ImprovedLowBeta1 = 0x20,
    ImprovedLowBeta0 = 0x30,
}

/// Sync word detection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncConfiguration {
    /// Fill the FIFO only when the sync pattern has been matched.
    FifoFillAuto { sync_tolerance: u8 },
    /// Fill the FIFO unconditionally.
    FifoFillManual { sync_tolerance: u8 },
}

impl SyncConfiguration {
    /// The SyncConfig register byte for this configuration and sync word
    /// length. Tolerance is capped at the 3-bit field maximum.
    pub(crate) fn value(self, sync_word_len: u8) -> u8 {
        let size = (sync_word_len - 1) << 3;
        match self {
            SyncConfiguration::FifoFillAuto { sync_tolerance } => {
                RF_SYNC_ON | size | sync_tolerance.min(7)
            }
            SyncConfiguration::FifoFillManual { sync_tolerance } => {
                RF_SYNC_ON | RF_SYNC_FIFOFILL_MANUAL | size | sync_tolerance.min(7)
            }
        }
    }
}

/// Power-amplifier configuration derived from a requested output power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxPower {
    /// PaLevel register value.
    pub pa_level: u8,
    /// Ocp register value.
    pub ocp: u8,
    /// Whether the boost registers must bracket the transmit window.
    pub boost: bool,
    /// The output power actually configured, after clamping.
    pub dbm: i8,
}

/// Encodes a requested output power for the selected amplifier path.
///
/// High-power modules (RFM69HW/HCW) drive PA1+PA2 and accept -2..=20 dBm;
/// the top tier (>= 18 dBm) additionally turns over-current protection off
/// and arms the transmit-window boost. Standard modules drive PA0, which
/// tops out at +13 dBm.
pub fn encode_tx_power(dbm: i8, high_power: bool) -> TxPower {
    if high_power {
        let dbm = dbm.clamp(-2, 20);
        if dbm >= 18 {
            TxPower {
                pa_level: RF_PALEVEL_PA1_ON
                    | RF_PALEVEL_PA2_ON
                    | ((dbm + 11) as u8 & RF_PALEVEL_OUTPUTPOWER_11111),
                ocp: RF_OCP_OFF,
                boost: true,
                dbm,
            }
        } else {
            TxPower {
                pa_level: RF_PALEVEL_PA1_ON
                    | RF_PALEVEL_PA2_ON
                    | ((dbm + 14) as u8 & RF_PALEVEL_OUTPUTPOWER_11111),
                ocp: RF_OCP_ON,
                boost: false,
                dbm,
            }
        }
    } else {
        let dbm = dbm.clamp(-2, 13);
        TxPower {
            pa_level: RF_PALEVEL_PA0_ON
                | ((dbm + 18) as u8 & RF_PALEVEL_OUTPUTPOWER_11111),
            ocp: RF_OCP_ON,
            boost: false,
            dbm,
        }
    }
}

/// Recovers the configured output power from a PaLevel byte and the
/// amplifier path it was encoded for.
pub fn decode_tx_power(pa_level: u8, high_power: bool, boost: bool) -> i8 {
    let output_power = (pa_level & RF_PALEVEL_OUTPUTPOWER_11111) as i8;
    if high_power {
        if boost {
            output_power - 11
        } else {
            output_power - 14
        }
    } else {
        output_power - 18
    }
}
