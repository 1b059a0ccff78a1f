// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! The cartridge controller: header parsing and bank-switched ROM/RAM access.

use core::fmt;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// Cartridge header field offsets.
#[allow(missing_docs)]
pub mod consts {
	pub const ROM_GAME_TITLE_START: usize = 0x0134;
	pub const ROM_GAME_TITLE_END: usize = 0x0143;
	pub const ROM_CARTRIDGE_TYPE: usize = 0x0147;
	pub const ROM_SIZE_CODE: usize = 0x0148;
	pub const RAM_SIZE_CODE: usize = 0x0149;

	pub const ROM_BANK_SIZE: usize = 0x4000;
	pub const RAM_BANK_SIZE: usize = 0x2000;
}

use consts::*;

/// Errors that can occur while loading a cartridge image.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
	/// The image is smaller than a single ROM bank.
	TooSmall(usize),
	/// The cartridge type byte does not match a supported mapper.
	UnsupportedMapperCode(u8),
}

impl fmt::Display for LoadError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			LoadError::TooSmall(len) => write!(f, "ROM image too small: {} bytes", len),
			LoadError::UnsupportedMapperCode(code) => {
				write!(f, "unsupported cartridge type: 0x{:02x}", code)
			}
		}
	}
}

impl fmt::Debug for LoadError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		(self as &dyn fmt::Display).fmt(f)
	}
}

/// Which bank-switching scheme the cartridge implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperKind {
	/// No mapper: a single fixed 32KB ROM, optionally with unbanked RAM.
	NoMapper,
	/// Memory bank controller 1: up to 2MB ROM / 32KB RAM.
	Mbc1,
}

impl MapperKind {
	/// Resolve the mapper kind from the cartridge-type header byte.
	pub fn from_header_byte(byte: u8) -> Result<Self, LoadError> {
		match byte {
			0x00 | 0x08 | 0x09 => Ok(MapperKind::NoMapper),
			0x01 | 0x02 | 0x03 => Ok(MapperKind::Mbc1),
			other => Err(LoadError::UnsupportedMapperCode(other)),
		}
	}
}

/// Mutable bank-switching state, specific to [`MapperKind::Mbc1`].
#[derive(Debug, Clone, Copy, Default)]
struct Mbc1State {
	ram_enabled: bool,
	/// 5-bit ROM bank register (never allowed to settle on 0).
	rom_bank: u8,
	/// 2-bit RAM-bank/upper-ROM-bank register.
	bank2: u8,
	/// `true` selects the "RAM banking" mode, `false` the "ROM banking" mode.
	ram_banking_mode: bool,
}

impl Mbc1State {
	fn rom_bank_index(&self, rom_banks: usize) -> usize {
		let mut bank = self.rom_bank as usize;
		if !self.ram_banking_mode {
			bank |= (self.bank2 as usize) << 5;
		}
		bank % rom_banks.max(1)
	}

	fn ram_bank_index(&self) -> usize {
		if self.ram_banking_mode {
			self.bank2 as usize
		} else {
			0
		}
	}
}

/// The game cartridge: owns the ROM image and (if present) battery/volatile
/// save RAM, and implements the active mapper's bank-switching behavior.
pub struct Cartridge {
	rom: Vec<u8>,
	ram: Vec<u8>,
	mapper: MapperKind,
	mbc1: Mbc1State,
}

impl Cartridge {
	/// Parses a raw ROM image and constructs a cartridge with freshly
	/// zeroed save RAM sized per the header's RAM-size code.
	pub fn load(rom: Vec<u8>) -> Result<Self, LoadError> {
		if rom.len() < ROM_BANK_SIZE {
			return Err(LoadError::TooSmall(rom.len()));
		}

		let mapper = MapperKind::from_header_byte(rom[ROM_CARTRIDGE_TYPE])?;
		let ram_size = ram_size_bytes(rom[RAM_SIZE_CODE]);

		Ok(Cartridge {
			rom,
			ram: alloc::vec![0u8; ram_size],
			mapper,
			mbc1: Mbc1State::default(),
		})
	}

	/// The game's title, as stored (NUL-padded) in the cartridge header.
	pub fn title(&self) -> &[u8] {
		&self.rom[ROM_GAME_TITLE_START..=ROM_GAME_TITLE_END]
	}

	/// The number of 16KB ROM banks in the image.
	pub fn rom_banks(&self) -> usize {
		self.rom.len() / ROM_BANK_SIZE
	}

	/// A read-only view of the save RAM, for persisting to a save file.
	pub fn save_ram(&self) -> &[u8] {
		&self.ram
	}

	/// Overwrites the save RAM with externally loaded save data. The data
	/// is truncated or zero-padded to the cartridge's RAM size.
	pub fn load_save_ram(&mut self, data: &[u8]) {
		let len = self.ram.len().min(data.len());
		self.ram[..len].copy_from_slice(&data[..len]);
	}

	/// Reads from the switchable ROM region (`0x0000..=0x7FFF`).
	pub fn read_rom(&self, address: u16) -> u8 {
		match self.mapper {
			MapperKind::NoMapper => self.rom.get(address as usize).copied().unwrap_or(0xFF),
			MapperKind::Mbc1 => {
				let bank = if address < 0x4000 {
					if self.mbc1.ram_banking_mode {
						0
					} else {
						((self.mbc1.bank2 as usize) << 5) % self.rom_banks().max(1)
					}
				} else {
					self.mbc1.rom_bank_index(self.rom_banks())
				};
				let offset = bank * ROM_BANK_SIZE + (address as usize % ROM_BANK_SIZE);
				self.rom.get(offset).copied().unwrap_or(0xFF)
			}
		}
	}

	/// Handles a write into the ROM address space: for mapped cartridges
	/// this reconfigures bank-select registers rather than storing data.
	pub fn write_rom(&mut self, address: u16, value: u8) {
		match self.mapper {
			MapperKind::NoMapper => {}
			MapperKind::Mbc1 => match address {
				0x0000..=0x1FFF => {
					// Only the low nibble of the written byte is checked.
					self.mbc1.ram_enabled = value & 0x0F == 0x0A;
				}
				0x2000..=0x3FFF => {
					// The zero check happens on the raw write, before masking:
					// writing 0x20 (masks to 0x00) must NOT be rewritten to bank
					// 1, only a literal value of 0 is (the "ROM bank 0 rewrite"
					// quirk).
					self.mbc1.rom_bank = if value == 0 { 1 } else { value & 0x1F };
				}
				0x4000..=0x5FFF => {
					self.mbc1.bank2 = value & 0x03;
				}
				0x6000..=0x7FFF => {
					self.mbc1.ram_banking_mode = value & 0x01 != 0;
				}
				_ => {}
			},
		}
	}

	/// Reads from the switchable cartridge-RAM region (`0xA000..=0xBFFF`).
	pub fn read_ram(&self, address: u16) -> u8 {
		if self.ram.is_empty() {
			return 0xFF;
		}

		let enabled = match self.mapper {
			MapperKind::NoMapper => true,
			MapperKind::Mbc1 => self.mbc1.ram_enabled,
		};
		if !enabled {
			return 0xFF;
		}

		let bank = match self.mapper {
			MapperKind::NoMapper => 0,
			MapperKind::Mbc1 => self.mbc1.ram_bank_index(),
		};
		let offset = bank * RAM_BANK_SIZE + (address as usize % RAM_BANK_SIZE);
		self.ram.get(offset % self.ram.len().max(1)).copied().unwrap_or(0xFF)
	}

	/// Writes to the switchable cartridge-RAM region.
	pub fn write_ram(&mut self, address: u16, value: u8) {
		if self.ram.is_empty() {
			return;
		}

		let enabled = match self.mapper {
			MapperKind::NoMapper => true,
			MapperKind::Mbc1 => self.mbc1.ram_enabled,
		};
		if !enabled {
			return;
		}

		let bank = match self.mapper {
			MapperKind::NoMapper => 0,
			MapperKind::Mbc1 => self.mbc1.ram_bank_index(),
		};
		let len = self.ram.len();
		let offset = (bank * RAM_BANK_SIZE + (address as usize % RAM_BANK_SIZE)) % len.max(1);
		self.ram[offset] = value;
	}
}

fn ram_size_bytes(code: u8) -> usize {
	match code {
		0x00 => 0,
		0x01 => 2 * 1024,
		0x02 => 8 * 1024,
		0x03 => 32 * 1024,
		0x04 => 128 * 1024,
		0x05 => 64 * 1024,
		_ => 0,
	}
}
