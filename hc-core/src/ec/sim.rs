//! Simulated embedded controller for tests
//!
//! Models the direct register handshake (command, address, data) and the
//! indirect RAM index/data protocol closely enough that a wrong byte order
//! lands in the wrong cell.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use super::PortIo;
use crate::constants::ec as ec_const;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Direct {
    Idle,
    ReadAddr,
    WriteAddr,
    WriteData(u8),
    ReadReady(u8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Indirect {
    Idle,
    SubIndex,
    Value,
}

#[derive(Debug)]
struct SimState {
    registers: [u8; 256],
    ram: HashMap<u16, u8>,
    direct: Direct,
    indirect: Indirect,
    sub_index: u8,
    high: u8,
    low: u8,
}

/// Cloneable handle; clones share the same EC
#[derive(Debug, Clone)]
pub(crate) struct SimulatedEc {
    idx_port: u16,
    data_port: u16,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedEc {
    pub(crate) fn new(idx_port: u16, data_port: u16) -> Self {
        Self {
            idx_port,
            data_port,
            state: Arc::new(Mutex::new(SimState {
                registers: [0; 256],
                ram: HashMap::new(),
                direct: Direct::Idle,
                indirect: Indirect::Idle,
                sub_index: 0,
                high: 0,
                low: 0,
            })),
        }
    }

    pub(crate) fn register(&self, addr: u8) -> u8 {
        self.state.lock().registers[usize::from(addr)]
    }

    pub(crate) fn set_register(&self, addr: u8, value: u8) {
        self.state.lock().registers[usize::from(addr)] = value;
    }

    pub(crate) fn ram(&self, addr: u16) -> u8 {
        self.state.lock().ram.get(&addr).copied().unwrap_or(0)
    }

    pub(crate) fn set_ram(&self, addr: u16, value: u8) {
        self.state.lock().ram.insert(addr, value);
    }
}

impl SimState {
    fn ram_addr(&self) -> u16 {
        u16::from_be_bytes([self.high, self.low])
    }
}

impl PortIo for SimulatedEc {
    fn inb(&mut self, port: u16) -> io::Result<u8> {
        let mut s = self.state.lock();
        if port == ec_const::CMD_PORT {
            let obf = matches!(s.direct, Direct::ReadReady(_));
            return Ok(if obf { ec_const::STATUS_OBF } else { 0 });
        }
        if port == ec_const::DATA_PORT {
            if let Direct::ReadReady(value) = s.direct {
                s.direct = Direct::Idle;
                return Ok(value);
            }
            return Ok(0);
        }
        if port == self.data_port && s.indirect == Indirect::Value && s.sub_index == ec_const::ram::DATA {
            s.indirect = Indirect::Idle;
            let addr = s.ram_addr();
            return Ok(s.ram.get(&addr).copied().unwrap_or(0));
        }
        Ok(0xFF)
    }

    fn outb(&mut self, port: u16, value: u8) -> io::Result<()> {
        let mut s = self.state.lock();
        if port == ec_const::CMD_PORT {
            s.direct = match value {
                ec_const::CMD_READ => Direct::ReadAddr,
                ec_const::CMD_WRITE => Direct::WriteAddr,
                _ => Direct::Idle,
            };
        } else if port == ec_const::DATA_PORT {
            s.direct = match s.direct {
                Direct::ReadAddr => Direct::ReadReady(s.registers[usize::from(value)]),
                Direct::WriteAddr => Direct::WriteData(value),
                Direct::WriteData(addr) => {
                    s.registers[usize::from(addr)] = value;
                    Direct::Idle
                }
                other => other,
            };
        } else if port == self.idx_port {
            s.indirect = match value {
                ec_const::ram::SELECT_INDEX => Indirect::SubIndex,
                ec_const::ram::SELECT_DATA => Indirect::Value,
                _ => Indirect::Idle,
            };
        } else if port == self.data_port {
            match s.indirect {
                Indirect::SubIndex => s.sub_index = value,
                Indirect::Value => match s.sub_index {
                    ec_const::ram::ADDR_HIGH => s.high = value,
                    ec_const::ram::ADDR_LOW => s.low = value,
                    ec_const::ram::DATA => {
                        let addr = s.ram_addr();
                        s.ram.insert(addr, value);
                    }
                    _ => {}
                },
                Indirect::Idle => {}
            }
            s.indirect = Indirect::Idle;
        }
        Ok(())
    }
}
