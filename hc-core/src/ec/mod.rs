//! Embedded controller access
//!
//! Two addressing schemes are supported and never mixed:
//!
//! - **Direct registers** on the ACPI EC port pair (`0x66` status/command,
//!   `0x62` data) with the IBF/OBF handshake.
//! - **Indirect RAM** through a Super-I/O style index/data pair: the 16-bit
//!   address is written high byte (`0x11`) then low byte (`0x10`), and the
//!   value moves through sub-index `0x12`.
//!
//! Every transaction holds the channel lock from the first byte to the last.
//! A handshake that never completes is logged and the transaction carries on;
//! only a failing port device is reported as an error.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::constants::{ec as ec_const, paths};
use crate::Result;
use hc_error::HcError;

#[cfg(test)]
pub(crate) mod sim;

/// Byte-wide x86 port I/O
#[cfg_attr(test, mockall::automock)]
pub trait PortIo: Send {
    fn inb(&mut self, port: u16) -> io::Result<u8>;
    fn outb(&mut self, port: u16, value: u8) -> io::Result<()>;
}

/// Port I/O through `/dev/port` (requires root)
#[derive(Debug)]
pub struct DevPort {
    file: File,
}

impl DevPort {
    pub fn open() -> Result<Self> {
        Self::open_path(Path::new(paths::DEV_PORT))
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| HcError::transient(path, e))?;
        debug!(path = %path.display(), "Opened port device");
        Ok(Self { file })
    }
}

impl PortIo for DevPort {
    fn inb(&mut self, port: u16) -> io::Result<u8> {
        self.file.seek(SeekFrom::Start(u64::from(port)))?;
        let mut buf = [0u8; 1];
        self.file.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn outb(&mut self, port: u16, value: u8) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(u64::from(port)))?;
        self.file.write_all(&[value])
    }
}

/// Handshake timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcTiming {
    pub poll_interval_ms: u64,
    pub retries: u32,
}

impl Default for EcTiming {
    fn default() -> Self {
        Self {
            poll_interval_ms: ec_const::POLL_INTERVAL_MS,
            retries: ec_const::POLL_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Handshake {
    InputEmpty,
    OutputFull,
}

impl Handshake {
    fn satisfied(self, status: u8) -> bool {
        match self {
            Handshake::InputEmpty => status & ec_const::STATUS_IBF == 0,
            Handshake::OutputFull => status & ec_const::STATUS_OBF != 0,
        }
    }

    fn condition(self) -> &'static str {
        match self {
            Handshake::InputEmpty => "IBF clear",
            Handshake::OutputFull => "OBF set",
        }
    }
}

fn port_error(e: io::Error) -> HcError {
    HcError::transient(PathBuf::from(paths::DEV_PORT), e)
}

/// Serialized access to the embedded controller
pub struct EcChannel {
    io: Mutex<Box<dyn PortIo>>,
    timing: EcTiming,
}

impl EcChannel {
    pub fn new(io: Box<dyn PortIo>, timing: EcTiming) -> Self {
        Self { io: Mutex::new(io), timing }
    }

    /// Open the production channel over `/dev/port`
    pub fn open(timing: EcTiming) -> Result<Self> {
        Ok(Self::new(Box::new(DevPort::open()?), timing))
    }

    /// Read one direct EC register
    pub fn read(&self, addr: u8) -> Result<u8> {
        let mut io = self.io.lock();
        self.read_locked(&mut **io, addr)
    }

    /// Write one direct EC register
    pub fn write(&self, addr: u8, value: u8) -> Result<()> {
        let mut io = self.io.lock();
        self.wait(&mut **io, Handshake::InputEmpty)?;
        io.outb(ec_const::CMD_PORT, ec_const::CMD_WRITE).map_err(port_error)?;
        self.wait(&mut **io, Handshake::InputEmpty)?;
        io.outb(ec_const::DATA_PORT, addr).map_err(port_error)?;
        self.wait(&mut **io, Handshake::InputEmpty)?;
        io.outb(ec_const::DATA_PORT, value).map_err(port_error)?;
        trace!(addr, value, "EC write");
        Ok(())
    }

    /// Big-endian integer over `len` consecutive registers starting at `addr`
    pub fn read_long(&self, addr: u8, len: u8) -> Result<u32> {
        check_len(len)?;
        let mut io = self.io.lock();
        let mut value = 0u32;
        for i in 0..len {
            let byte = self.read_locked(&mut **io, addr.wrapping_add(i))?;
            value = (value << 8) | u32::from(byte);
        }
        Ok(value)
    }

    /// Read one byte of EC RAM through an index/data port pair
    pub fn ram_read(&self, idx_port: u16, data_port: u16, addr: u16) -> Result<u8> {
        let mut io = self.io.lock();
        ram_read_locked(&mut **io, idx_port, data_port, addr)
    }

    /// Write one byte of EC RAM through an index/data port pair
    pub fn ram_write(&self, idx_port: u16, data_port: u16, addr: u16, value: u8) -> Result<()> {
        let mut io = self.io.lock();
        ram_select(&mut **io, idx_port, data_port, addr)?;
        ram_step(&mut **io, idx_port, data_port, ec_const::ram::DATA, value)?;
        trace!(addr, value, "EC RAM write");
        Ok(())
    }

    /// Big-endian integer over `len` consecutive RAM bytes
    pub fn ram_read_long(&self, idx_port: u16, data_port: u16, addr: u16, len: u8) -> Result<u32> {
        check_len(len)?;
        let mut io = self.io.lock();
        let mut value = 0u32;
        for i in 0..u16::from(len) {
            let byte = ram_read_locked(&mut **io, idx_port, data_port, addr.wrapping_add(i))?;
            value = (value << 8) | u32::from(byte);
        }
        Ok(value)
    }

    fn read_locked(&self, io: &mut dyn PortIo, addr: u8) -> Result<u8> {
        self.wait(io, Handshake::InputEmpty)?;
        io.outb(ec_const::CMD_PORT, ec_const::CMD_READ).map_err(port_error)?;
        self.wait(io, Handshake::InputEmpty)?;
        io.outb(ec_const::DATA_PORT, addr).map_err(port_error)?;
        self.wait(io, Handshake::OutputFull)?;
        let value = io.inb(ec_const::DATA_PORT).map_err(port_error)?;
        trace!(addr, value, "EC read");
        Ok(value)
    }

    /// Poll the status port until `handshake` holds or the retry budget runs out
    fn wait(&self, io: &mut dyn PortIo, handshake: Handshake) -> Result<()> {
        let interval = Duration::from_millis(self.timing.poll_interval_ms);
        for _ in 0..self.timing.retries {
            let status = io.inb(ec_const::CMD_PORT).map_err(port_error)?;
            if handshake.satisfied(status) {
                return Ok(());
            }
            thread::sleep(interval);
        }
        let timeout = HcError::ProtocolTimeout {
            port: ec_const::CMD_PORT,
            condition: handshake.condition(),
        };
        warn!(error = %timeout, "Continuing EC transaction best-effort");
        Ok(())
    }
}

fn check_len(len: u8) -> Result<()> {
    if (1..=4).contains(&len) {
        Ok(())
    } else {
        Err(HcError::invalid("EC read length", len))
    }
}

fn ram_step(io: &mut dyn PortIo, idx_port: u16, data_port: u16, sub: u8, value: u8) -> Result<()> {
    io.outb(idx_port, ec_const::ram::SELECT_INDEX).map_err(port_error)?;
    io.outb(data_port, sub).map_err(port_error)?;
    io.outb(idx_port, ec_const::ram::SELECT_DATA).map_err(port_error)?;
    io.outb(data_port, value).map_err(port_error)
}

fn ram_select(io: &mut dyn PortIo, idx_port: u16, data_port: u16, addr: u16) -> Result<()> {
    let [high, low] = addr.to_be_bytes();
    ram_step(io, idx_port, data_port, ec_const::ram::ADDR_HIGH, high)?;
    ram_step(io, idx_port, data_port, ec_const::ram::ADDR_LOW, low)
}

fn ram_read_locked(io: &mut dyn PortIo, idx_port: u16, data_port: u16, addr: u16) -> Result<u8> {
    ram_select(io, idx_port, data_port, addr)?;
    io.outb(idx_port, ec_const::ram::SELECT_INDEX).map_err(port_error)?;
    io.outb(data_port, ec_const::ram::DATA).map_err(port_error)?;
    io.outb(idx_port, ec_const::ram::SELECT_DATA).map_err(port_error)?;
    io.inb(data_port).map_err(port_error)
}

#[cfg(test)]
mod tests {
    use super::sim::SimulatedEc;
    use super::*;
    use mockall::predicate::eq;
    use std::time::Instant;

    const IDX: u16 = 0x4E;
    const DATA: u16 = 0x4F;

    fn fast() -> EcTiming {
        EcTiming { poll_interval_ms: 1, retries: 10 }
    }

    #[test]
    fn test_direct_write_then_read() {
        let sim = SimulatedEc::new(IDX, DATA);
        let ec = EcChannel::new(Box::new(sim.clone()), fast());

        ec.write(0x4A, 0x80).unwrap();
        assert_eq!(sim.register(0x4A), 0x80);
        assert_eq!(ec.read(0x4A).unwrap(), 0x80);
    }

    #[test]
    fn test_read_long_is_big_endian() {
        let sim = SimulatedEc::new(IDX, DATA);
        sim.set_register(0x76, 0x12);
        sim.set_register(0x77, 0x34);
        let ec = EcChannel::new(Box::new(sim), fast());

        assert_eq!(ec.read_long(0x76, 2).unwrap(), 0x1234);
        assert!(matches!(ec.read_long(0x76, 0), Err(HcError::InvalidRange { .. })));
        assert!(matches!(ec.read_long(0x76, 5), Err(HcError::InvalidRange { .. })));
    }

    #[test]
    fn test_ram_roundtrip() {
        let sim = SimulatedEc::new(IDX, DATA);
        let ec = EcChannel::new(Box::new(sim.clone()), fast());

        ec.ram_write(IDX, DATA, 0x1809, 0x5A).unwrap();
        assert_eq!(sim.ram(0x1809), 0x5A);
        assert_eq!(ec.ram_read(IDX, DATA, 0x1809).unwrap(), 0x5A);
        assert_eq!(ec.ram_read(IDX, DATA, 0x0918).unwrap(), 0);
    }

    #[test]
    fn test_ram_read_long() {
        let sim = SimulatedEc::new(IDX, DATA);
        sim.set_ram(0x0218, 0x0B);
        sim.set_ram(0x0219, 0xB8);
        let ec = EcChannel::new(Box::new(sim), fast());
        assert_eq!(ec.ram_read_long(IDX, DATA, 0x0218, 2).unwrap(), 3000);
    }

    #[test]
    fn test_ram_write_byte_sequence() {
        let mut io = MockPortIo::new();
        let mut seq = mockall::Sequence::new();
        let expected: [(u16, u8); 12] = [
            (IDX, 0x2E), (DATA, 0x11), (IDX, 0x2F), (DATA, 0x18),
            (IDX, 0x2E), (DATA, 0x10), (IDX, 0x2F), (DATA, 0x09),
            (IDX, 0x2E), (DATA, 0x12), (IDX, 0x2F), (DATA, 0x5A),
        ];
        for (port, value) in expected {
            io.expect_outb()
                .with(eq(port), eq(value))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }
        let ec = EcChannel::new(Box::new(io), fast());
        ec.ram_write(IDX, DATA, 0x1809, 0x5A).unwrap();
    }

    #[test]
    fn test_stuck_input_buffer_is_bounded() {
        let mut io = MockPortIo::new();
        io.expect_inb()
            .with(eq(ec_const::CMD_PORT))
            .times(30)
            .returning(|_| Ok(ec_const::STATUS_IBF));
        io.expect_outb().times(3).returning(|_, _| Ok(()));
        let ec = EcChannel::new(Box::new(io), fast());

        let start = Instant::now();
        assert!(ec.write(0x4A, 1).is_ok());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_output_never_ready_still_reads() {
        let mut io = MockPortIo::new();
        io.expect_inb()
            .with(eq(ec_const::CMD_PORT))
            .times(12)
            .returning(|_| Ok(0x00));
        io.expect_inb()
            .with(eq(ec_const::DATA_PORT))
            .times(1)
            .returning(|_| Ok(0x42));
        io.expect_outb().times(2).returning(|_, _| Ok(()));
        let ec = EcChannel::new(Box::new(io), fast());

        let start = Instant::now();
        assert_eq!(ec.read(0x10).unwrap(), 0x42);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_port_failure_is_transient_io() {
        let mut io = MockPortIo::new();
        io.expect_inb()
            .returning(|_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")));
        let ec = EcChannel::new(Box::new(io), fast());
        assert!(matches!(ec.read(0x10), Err(HcError::TransientIo { .. })));
    }

    #[test]
    fn test_dev_port_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = DevPort::open_path(&dir.path().join("port"));
        assert!(matches!(result, Err(HcError::TransientIo { .. })));
    }

    #[test]
    fn test_dev_port_offsets() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("port");
        std::fs::write(&path, vec![0u8; 0x100]).unwrap();
        let mut port = DevPort::open_path(&path).unwrap();

        port.outb(0x62, 0xAB).unwrap();
        assert_eq!(port.inb(0x62).unwrap(), 0xAB);
        assert_eq!(port.inb(0x66).unwrap(), 0);
        assert_eq!(std::fs::read(&path).unwrap()[0x62], 0xAB);
    }
}
