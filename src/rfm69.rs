//! RFM69 radio driver.
//!
//! A blocking driver for RFM69 series FSK packet radio modules, built on
//! the `embedded-hal` SPI, GPIO and delay traits.

use crate::read_write::ReadWrite;
use crate::registers::Register;
use crate::settings::{
    encode_tx_power, frf_from_mhz, mhz_from_frf, rssi_dbm, SyncConfiguration, BASE_CONFIG,
    RF69_CHIP_VERSION, RF69_FIFO_SIZE, RF69_MAX_PAYLOAD_LEN, RF_IRQFLAGS1_MODEREADY,
    RF_IRQFLAGS2_PACKETSENT, RF_IRQFLAGS2_PAYLOADREADY, RF_PACKET2_AES_ON, RF_TESTPA1_BOOST,
    RF_TESTPA1_NORMAL, RF_TESTPA2_BOOST, RF_TESTPA2_NORMAL,
};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use heapless::Vec;
use log::{debug, error, warn};

/// Errors that can occur when interacting with the RFM69 module.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rfm69Error {
    /// Failed to drive the reset pin.
    ResetError,
    /// An SPI write transaction failed.
    SpiWriteError,
    /// An SPI read transaction failed.
    SpiReadError,
    /// The version register did not identify an RFM69. Carries the byte
    /// that was read; 0x00 and 0xFF point at wiring rather than firmware.
    UnexpectedIdentity(u8),
    /// Invalid configuration provided.
    ConfigurationError,
    /// The chip did not report packet sent within the transmit deadline.
    SendTimeout,
}

/// Operating mode of the RFM69 module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rfm69Mode {
    /// Sleep mode - lowest power consumption.
    Sleep = 0x00,
    /// Standby mode - ready to transmit or receive.
    Standby = 0x04,
    /// Frequency synthesizer mode.
    Fs = 0x08,
    /// Transmit mode.
    Tx = 0x0C,
    /// Receive mode.
    Rx = 0x10,
}

/// Configuration for initializing the RFM69 module.
#[derive(Clone)]
pub struct Rfm69Config {
    /// Carrier frequency in MHz.
    pub frequency_mhz: f32,
    /// Transmit power in dBm.
    pub tx_power: i8,
    /// Whether the module is a high power variant (RFM69HW/HCW).
    pub is_high_power: bool,
    /// Sync word detection configuration.
    pub sync_configuration: SyncConfiguration,
    /// Sync words, of which the first `sync_word_len` are used.
    pub sync_words: [u8; 8],
    /// Number of sync words to program (1 to 8).
    pub sync_word_len: usize,
    /// Preamble length in bytes.
    pub preamble_length: u16,
    /// Optional 16-byte AES key. `None` disables hardware encryption.
    pub encryption_key: Option<[u8; 16]>,
}

impl Default for Rfm69Config {
    fn default() -> Self {
        Self {
            frequency_mhz: 433.0,
            tx_power: 20,
            is_high_power: true,
            sync_configuration: SyncConfiguration::FifoFillAuto { sync_tolerance: 0 },
            sync_words: [0x2D, 0xD4, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            sync_word_len: 2,
            preamble_length: 4,
            encryption_key: None,
        }
    }
}

/// A received frame together with the signal strength measured for it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReceivedPacket {
    /// Payload bytes, without the length prefix.
    pub payload: Vec<u8, RF69_FIFO_SIZE>,
    /// RSSI sampled while the frame was still in the FIFO, in dBm.
    pub rssi_dbm: i16,
}

/// RFM69 radio driver instance.
///
/// Generic over the SPI device, reset pin and delay provider. The handle
/// owns the chip exclusively and tracks its operating mode, the configured
/// transmit power and the signal strength of the last received frame.
pub struct Rfm69<SPI, RESET, D> {
    spi: SPI,
    reset_pin: RESET,
    delay: D,
    tx_power: i8,
    is_high_power: bool,
    boost: bool,
    current_mode: Rfm69Mode,
    last_rssi: i16,
}

impl<SPI, RESET, D> Rfm69<SPI, RESET, D>
where
    SPI: ReadWrite,
    RESET: OutputPin,
    D: DelayNs,
{
    /// Creates a new RFM69 driver instance.
    ///
    /// # Arguments
    ///
    /// * `spi` - SPI device for communication with the module
    /// * `reset_pin` - GPIO pin connected to the module's reset line
    /// * `delay` - Delay provider for timing requirements
    #[must_use]
    pub fn new(spi: SPI, reset_pin: RESET, delay: D) -> Self {
        Rfm69 {
            spi,
            reset_pin,
            delay,
            tx_power: 13,
            is_high_power: true,
            boost: false,
            current_mode: Rfm69Mode::Standby,
            last_rssi: 0,
        }
    }

    /// Performs a hardware reset of the module.
    ///
    /// The reset line is pulsed high for 100 microseconds, then the chip
    /// gets 5 milliseconds to come back up in standby.
    fn reset(&mut self) -> Result<(), Rfm69Error> {
        self.reset_pin
            .set_high()
            .map_err(|_| Rfm69Error::ResetError)?;
        self.delay.delay_us(100);
        self.reset_pin
            .set_low()
            .map_err(|_| Rfm69Error::ResetError)?;
        self.delay.delay_ms(5);
        self.current_mode = Rfm69Mode::Standby;
        Ok(())
    }

    /// Initializes the module with the default configuration.
    ///
    /// Resets the chip, verifies its identity and programs the 4.8 kbps
    /// FSK packet profile at 433 MHz with +20 dBm transmit power. Use
    /// [`init_with_config`](Self::init_with_config) to override any of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the chip cannot be reset, fails the identity
    /// check or does not accept its configuration over SPI.
    pub fn init(&mut self) -> Result<(), Rfm69Error> {
        self.init_with_config(Rfm69Config::default())
    }

    /// Initializes the module with a custom configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Radio configuration to apply
    ///
    /// # Errors
    ///
    /// Returns an error if the chip cannot be reset, fails the identity
    /// check or does not accept its configuration over SPI.
    pub fn init_with_config(&mut self, config: Rfm69Config) -> Result<(), Rfm69Error> {
        // Give the supply time to stabilise before pulsing reset.
        self.delay.delay_ms(10);
        self.reset()?;
        self.identify()?;

        self.is_high_power = config.is_high_power;

        self.apply_base_config()?;
        self.set_sync_words(
            config.sync_configuration,
            &config.sync_words[..config.sync_word_len],
        )?;
        self.set_preamble_length(config.preamble_length)?;
        self.set_encryption_key(config.encryption_key.as_ref())?;
        self.set_tx_power(config.tx_power)?;
        self.set_frequency(config.frequency_mhz)?;

        self.set_mode(Rfm69Mode::Standby)
    }

    /// Confirms an RFM69 is present by reading its version register.
    ///
    /// # Errors
    ///
    /// Returns [`Rfm69Error::UnexpectedIdentity`] with the byte read when
    /// the chip does not answer 0x24. All-zeros and all-ones answers are
    /// the classic dead-bus signatures and are logged as such.
    pub fn identify(&mut self) -> Result<(), Rfm69Error> {
        let version = self.read_register(Register::Version)?;
        debug!("RFM69 version register: 0x{:02X}", version);
        match version {
            RF69_CHIP_VERSION => Ok(()),
            0x00 => {
                error!("version register read 0x00: MISO stuck low or chip unpowered");
                Err(Rfm69Error::UnexpectedIdentity(version))
            }
            0xFF => {
                error!("version register read 0xFF: MISO floating, check wiring");
                Err(Rfm69Error::UnexpectedIdentity(version))
            }
            _ => Err(Rfm69Error::UnexpectedIdentity(version)),
        }
    }

    /// Reads the silicon revision from the version register.
    pub fn read_revision(&mut self) -> Result<u8, Rfm69Error> {
        self.read_register(Register::Version)
    }

    /// Writes the packet-mode base configuration table.
    ///
    /// Every register is read back after writing; a mismatch is logged but
    /// does not abort the sequence.
    fn apply_base_config(&mut self) -> Result<(), Rfm69Error> {
        for (register, value) in BASE_CONFIG {
            self.write_register_checked(register, value)?;
        }
        Ok(())
    }

    /// Sets the sync words and their detection configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Whether sync detection gates FIFO fill automatically
    /// * `sync_words` - 1 to 8 sync bytes, sent most significant first
    ///
    /// # Errors
    ///
    /// Returns [`Rfm69Error::ConfigurationError`] unless 1 to 8 sync words
    /// are given.
    pub fn set_sync_words(
        &mut self,
        config: SyncConfiguration,
        sync_words: &[u8],
    ) -> Result<(), Rfm69Error> {
        if sync_words.is_empty() || sync_words.len() > 8 {
            return Err(Rfm69Error::ConfigurationError);
        }

        // One burst covers SyncConfig and all eight value registers, so
        // stale bytes beyond the configured length are cleared as well.
        let mut buffer = [0u8; 9];
        buffer[0] = config.value(sync_words.len() as u8);
        buffer[1..1 + sync_words.len()].copy_from_slice(sync_words);
        self.write_many(Register::SyncConfig, &buffer)
    }

    /// Sets the preamble length in bytes.
    pub fn set_preamble_length(&mut self, length: u16) -> Result<(), Rfm69Error> {
        let buffer = [(length >> 8) as u8, length as u8];
        self.write_many(Register::PreambleMsb, &buffer)
    }

    /// Programs or clears the hardware AES key.
    ///
    /// With a key installed the packet engine transparently encrypts on
    /// transmit and decrypts on receive; both ends of the link must share
    /// the key. Pass `None` to fall back to plaintext frames.
    pub fn set_encryption_key(&mut self, key: Option<&[u8; 16]>) -> Result<(), Rfm69Error> {
        let mut packet_config = self.read_register(Register::PacketConfig2)?;
        match key {
            Some(key) => {
                self.write_many(Register::AesKey1, key)?;
                packet_config |= RF_PACKET2_AES_ON;
            }
            None => packet_config &= !RF_PACKET2_AES_ON,
        }
        self.write_register(Register::PacketConfig2, packet_config)
    }

    /// Sets the carrier frequency.
    ///
    /// The 24-bit synthesizer word is truncated toward zero, which places
    /// the carrier at most one synthesizer step (roughly 61 Hz) below the
    /// request. Both ends of a link compute the same word from the same
    /// request, so the offset cancels out. The registers are read back and
    /// the achieved frequency logged for diagnostics.
    ///
    /// # Arguments
    ///
    /// * `freq_mhz` - Target frequency in MHz (e.g. 433.0, 868.0, 915.0)
    pub fn set_frequency(&mut self, freq_mhz: f32) -> Result<(), Rfm69Error> {
        let frf = frf_from_mhz(freq_mhz);
        let buffer = [
            ((frf >> 16) & 0xFF) as u8,
            ((frf >> 8) & 0xFF) as u8,
            (frf & 0xFF) as u8,
        ];
        self.write_many(Register::FrfMsb, &buffer)?;

        let mut read_back = [0u8; 3];
        self.read_many(Register::FrfMsb, &mut read_back)?;
        if read_back != buffer {
            warn!(
                "frequency registers read back {:?} after writing {:?}",
                read_back, buffer
            );
        }
        let achieved = mhz_from_frf(
            (read_back[0] as u32) << 16 | (read_back[1] as u32) << 8 | read_back[2] as u32,
        );
        debug!("carrier set to {} MHz", achieved);
        Ok(())
    }

    /// Reads back the achieved carrier frequency in MHz.
    pub fn frequency(&mut self) -> Result<f32, Rfm69Error> {
        let mut frf = [0u8; 3];
        self.read_many(Register::FrfMsb, &mut frf)?;
        Ok(mhz_from_frf(
            (frf[0] as u32) << 16 | (frf[1] as u32) << 8 | frf[2] as u32,
        ))
    }

    /// Sets the transmit power level.
    ///
    /// # Arguments
    ///
    /// * `tx_power` - Power level in dBm
    ///   - High power modules (RFM69HW/HCW): -2 to +20 dBm
    ///   - Standard modules: -2 to +13 dBm
    ///
    /// Out-of-range requests are clamped. The top high-power tier (+18 dBm
    /// and up) turns over-current protection off and arms the boost
    /// registers, which [`set_mode`](Self::set_mode) then switches around
    /// each transmit window.
    pub fn set_tx_power(&mut self, tx_power: i8) -> Result<(), Rfm69Error> {
        let power = encode_tx_power(tx_power, self.is_high_power);
        self.write_register(Register::Ocp, power.ocp)?;
        self.write_register(Register::PaLevel, power.pa_level)?;
        self.tx_power = power.dbm;
        self.boost = power.boost;
        debug!("transmit power set to {} dBm", power.dbm);
        Ok(())
    }

    /// Switches the operating mode.
    ///
    /// A no-op when the target equals the current mode. With the top power
    /// tier armed, the boost registers are restored before leaving transmit
    /// and engaged after entering it, so boost never outlives the transmit
    /// window. The transition is complete once the chip reports mode ready;
    /// if that takes longer than a second the failure is logged and the
    /// requested mode recorded anyway, keeping the driver usable.
    pub fn set_mode(&mut self, mode: Rfm69Mode) -> Result<(), Rfm69Error> {
        const MODE_READY_TIMEOUT_MS: u32 = 1_000;

        if self.current_mode == mode {
            return Ok(());
        }

        // The output stage must never stay boosted outside transmit.
        if self.boost && self.current_mode == Rfm69Mode::Tx {
            self.write_register(Register::TestPa1, RF_TESTPA1_NORMAL)?;
            self.write_register(Register::TestPa2, RF_TESTPA2_NORMAL)?;
        }

        let mut op_mode = self.read_register(Register::OpMode)?;
        op_mode &= !0x1C;
        op_mode |= mode as u8 & 0x1C;
        self.write_register(Register::OpMode, op_mode)?;

        if self.boost && mode == Rfm69Mode::Tx {
            self.write_register(Register::TestPa1, RF_TESTPA1_BOOST)?;
            self.write_register(Register::TestPa2, RF_TESTPA2_BOOST)?;
        }

        let mut waited_ms = 0u32;
        while self.read_register(Register::IrqFlags1)? & RF_IRQFLAGS1_MODEREADY == 0 {
            if waited_ms >= MODE_READY_TIMEOUT_MS {
                error!(
                    "mode ready not asserted within {} ms of entering {:?}",
                    MODE_READY_TIMEOUT_MS, mode
                );
                break;
            }
            self.delay.delay_ms(1);
            waited_ms += 1;
        }

        self.current_mode = mode;
        Ok(())
    }

    /// Sends a data packet.
    ///
    /// Payloads longer than 60 bytes are truncated with a warning; the
    /// length prefix plus payload must leave the packet engine headroom in
    /// the 66-byte FIFO. The radio is back in standby when this returns,
    /// whether or not the transmission completed.
    ///
    /// # Arguments
    ///
    /// * `payload` - Data to transmit
    ///
    /// # Errors
    ///
    /// Returns [`Rfm69Error::SendTimeout`] if the chip does not report
    /// packet sent within 2 seconds; the caller may simply retry.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), Rfm69Error> {
        const SEND_TIMEOUT_MS: u32 = 2_000;
        const STANDBY_SETTLE_MS: u32 = 10;

        let payload = if payload.len() > RF69_MAX_PAYLOAD_LEN {
            warn!(
                "truncating {} byte payload to {}",
                payload.len(),
                RF69_MAX_PAYLOAD_LEN
            );
            &payload[..RF69_MAX_PAYLOAD_LEN]
        } else {
            payload
        };

        self.set_mode(Rfm69Mode::Standby)?;
        self.delay.delay_ms(STANDBY_SETTLE_MS);

        // Length-prefixed frame, loaded in one burst.
        let mut buffer = [0u8; RF69_MAX_PAYLOAD_LEN + 1];
        buffer[0] = payload.len() as u8;
        buffer[1..1 + payload.len()].copy_from_slice(payload);
        self.write_many(Register::Fifo, &buffer[..1 + payload.len()])?;

        self.set_mode(Rfm69Mode::Tx)?;

        let mut waited_ms = 0u32;
        while self.read_register(Register::IrqFlags2)? & RF_IRQFLAGS2_PACKETSENT == 0 {
            if waited_ms >= SEND_TIMEOUT_MS {
                error!("packet sent flag not asserted within {} ms", SEND_TIMEOUT_MS);
                self.set_mode(Rfm69Mode::Standby)?;
                return Err(Rfm69Error::SendTimeout);
            }
            self.delay.delay_ms(1);
            waited_ms += 1;
        }

        self.set_mode(Rfm69Mode::Standby)
    }

    /// Listens for one packet.
    ///
    /// Polls payload ready every 10 ms until a frame arrives or
    /// `timeout_ms` elapses, then returns the radio to standby. RSSI is
    /// sampled before the FIFO is drained so it reflects the returned
    /// frame. Frames with an impossible length byte are flushed by cycling
    /// the receiver and do not end the wait.
    ///
    /// # Arguments
    ///
    /// * `timeout_ms` - How long to listen before giving up
    ///
    /// Returns `Ok(None)` when nothing arrived in time; an empty channel
    /// is an ordinary outcome, not an error.
    pub fn receive(&mut self, timeout_ms: u32) -> Result<Option<ReceivedPacket>, Rfm69Error> {
        const POLL_INTERVAL_MS: u32 = 10;

        self.set_mode(Rfm69Mode::Rx)?;

        let mut elapsed_ms = 0u32;
        loop {
            if self.read_register(Register::IrqFlags2)? & RF_IRQFLAGS2_PAYLOADREADY != 0 {
                let rssi = self.rssi()?;
                match self.read_fifo_frame()? {
                    Some(payload) => {
                        self.last_rssi = rssi;
                        self.set_mode(Rfm69Mode::Standby)?;
                        return Ok(Some(ReceivedPacket {
                            payload,
                            rssi_dbm: rssi,
                        }));
                    }
                    None => {
                        // Flush the FIFO and keep listening.
                        self.set_mode(Rfm69Mode::Standby)?;
                        self.set_mode(Rfm69Mode::Rx)?;
                    }
                }
            }

            if elapsed_ms >= timeout_ms {
                self.set_mode(Rfm69Mode::Standby)?;
                return Ok(None);
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
            elapsed_ms += POLL_INTERVAL_MS;
        }
    }

    /// Drains one length-prefixed frame from the FIFO.
    ///
    /// Returns `None` for frames whose length byte cannot be trusted. The
    /// length prefix is stripped.
    fn read_fifo_frame(&mut self) -> Result<Option<Vec<u8, RF69_FIFO_SIZE>>, Rfm69Error> {
        let length = self.read_register(Register::Fifo)? as usize;
        if length == 0 || length > RF69_FIFO_SIZE {
            warn!("discarding frame with length byte {}", length);
            return Ok(None);
        }

        let mut buffer = [0u8; RF69_FIFO_SIZE];
        self.read_many(Register::Fifo, &mut buffer[..length])?;
        Ok(Vec::from_slice(&buffer[..length]).ok())
    }

    /// Reads the current RSSI in dBm.
    ///
    /// Only meaningful while the receiver is running.
    pub fn rssi(&mut self) -> Result<i16, Rfm69Error> {
        let raw = self.read_register(Register::RssiValue)?;
        Ok(rssi_dbm(raw))
    }

    /// RSSI measured for the most recently received packet, in dBm.
    #[must_use]
    pub fn last_rssi(&self) -> i16 {
        self.last_rssi
    }

    /// Reads the internal temperature sensor.
    ///
    /// Returns the temperature in degrees Celsius. The sensor is
    /// uncalibrated and intended for relative measurements.
    pub fn read_temperature(&mut self) -> Result<f32, Rfm69Error> {
        const TEMP_MEASURE_START: u8 = 0x08;
        const TEMP_MEASURE_RUNNING: u8 = 0x04;

        self.write_register(Register::Temp1, TEMP_MEASURE_START)?;

        let mut waited_ms = 0u32;
        while self.read_register(Register::Temp1)? & TEMP_MEASURE_RUNNING != 0 {
            if waited_ms >= 100 {
                warn!("temperature measurement did not finish");
                break;
            }
            self.delay.delay_ms(10);
            waited_ms += 10;
        }

        let temp = self.read_register(Register::Temp2)?;
        Ok(166.0 - temp as f32)
    }

    /// Reads every documented register for a diagnostic dump.
    ///
    /// Returns (address, value) pairs covering 0x01 to 0x4F plus the test
    /// registers. The FIFO sits at 0x00 and is deliberately skipped.
    pub fn read_all_registers(&mut self) -> Result<[(u8, u8); 84], Rfm69Error> {
        let mut registers = [0u8; 79];
        self.read_many(Register::OpMode, &mut registers)?;

        let mut mapped = [(0u8, 0u8); 84];
        for (index, &value) in registers.iter().enumerate() {
            mapped[index] = (index as u8 + 1, value);
        }

        mapped[79] = (
            Register::TestLna.addr(),
            self.read_register(Register::TestLna)?,
        );
        mapped[80] = (
            Register::TestPa1.addr(),
            self.read_register(Register::TestPa1)?,
        );
        mapped[81] = (
            Register::TestPa2.addr(),
            self.read_register(Register::TestPa2)?,
        );
        mapped[82] = (
            Register::TestDagc.addr(),
            self.read_register(Register::TestDagc)?,
        );
        mapped[83] = (
            Register::TestAfc.addr(),
            self.read_register(Register::TestAfc)?,
        );

        Ok(mapped)
    }

    /// Returns the current operating mode as tracked by the driver.
    #[must_use]
    pub fn current_mode(&self) -> Rfm69Mode {
        self.current_mode
    }

    /// Returns the configured transmit power in dBm, after clamping.
    #[must_use]
    pub fn tx_power(&self) -> i8 {
        self.tx_power
    }

    /// Returns whether the driver was configured for a high power module.
    #[must_use]
    pub fn is_high_power(&self) -> bool {
        self.is_high_power
    }

    /// Puts the chip to sleep and releases the owned peripherals.
    ///
    /// The sleep transition is best effort: with a failing bus it cannot
    /// happen, and the peripherals are handed back regardless.
    pub fn release(mut self) -> (SPI, RESET, D) {
        if self.set_mode(Rfm69Mode::Sleep).is_err() {
            error!("could not put the radio to sleep on release");
        }
        (self.spi, self.reset_pin, self.delay)
    }

    /// Writes a register and reads it back, logging any mismatch.
    ///
    /// Mismatches are never fatal; some bits legitimately read differently
    /// than written.
    fn write_register_checked(&mut self, register: Register, value: u8) -> Result<(), Rfm69Error> {
        self.write_register(register, value)?;
        let read_back = self.read_register(register)?;
        if read_back != value {
            warn!(
                "register 0x{:02X} wrote 0x{:02X} but read back 0x{:02X}",
                register.addr(),
                value,
                read_back
            );
        }
        Ok(())
    }

    fn write_register(&mut self, register: Register, value: u8) -> Result<(), Rfm69Error> {
        self.write_many(register, &[value])
    }

    fn read_register(&mut self, register: Register) -> Result<u8, Rfm69Error> {
        let mut buffer = [0u8; 1];
        self.read_many(register, &mut buffer)?;
        Ok(buffer[0])
    }

    fn write_many(&mut self, register: Register, values: &[u8]) -> Result<(), Rfm69Error> {
        self.spi
            .write_many(register, values)
            .map_err(|_| Rfm69Error::SpiWriteError)
    }

    fn read_many(&mut self, register: Register, buffer: &mut [u8]) -> Result<(), Rfm69Error> {
        self.spi
            .read_many(register, buffer)
            .map_err(|_| Rfm69Error::SpiReadError)
    }
}
