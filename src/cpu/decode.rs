// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Gameboy cpu's opcode decoder.
//!
//! Opcodes are decomposed into the `x`/`y`/`z`/`p`/`q` fields of the
//! well-known `LR35902`/`Z80` bit layout (`xxyyyzzz`, with `p = y >> 1` and
//! `q = y & 1`) rather than dispatched through a 256-entry jump table: the
//! fan-out below mirrors the CPU manual's own opcode table, and the 11
//! illegal opcodes fall out of the decomposition as unmatched corners of
//! that table instead of needing to be listed by hand.

use log::trace;

use super::alu::{alu16, alu8};
use super::state::{Condition, R16Stack, R16, R8};
use super::Cpu;
use crate::bus::MemoryBus;
use crate::GameboyError;

/// Decodes and executes the instruction at `opcode`, returning its duration
/// in T-states. `opcode` has already been fetched and `PC` already advanced
/// past it (or not, if the halt bug applies) by [`Cpu::fetch_decode_execute`].
pub fn execute(cpu: &mut Cpu, bus: &mut MemoryBus, opcode: u8) -> Result<u32, GameboyError> {
	let x = opcode >> 6;
	let y = (opcode >> 3) & 7;
	let z = opcode & 7;
	let p = y >> 1;
	let q = y & 1;

	trace!(
		"pc={:#06x} op={:#04x} x={} y={} z={}",
		cpu.registers.pc.wrapping_sub(1),
		opcode,
		x,
		y,
		z
	);

	let cycles = match (x, z) {
		(0, 0) => block0_z0(cpu, bus, y),
		(0, 1) => block0_z1(cpu, bus, p, q),
		(0, 2) => block0_z2(cpu, bus, p, q),
		(0, 3) => block0_z3(cpu, p, q),
		(0, 4) => {
			let r = R8::from_index(y);
			let value = get_r8(cpu, bus, r);
			let result = alu8::inc(&mut cpu.registers.flags, value);
			set_r8(cpu, bus, r, result);
			if r == R8::HlIndirect { 12 } else { 4 }
		}
		(0, 5) => {
			let r = R8::from_index(y);
			let value = get_r8(cpu, bus, r);
			let result = alu8::dec(&mut cpu.registers.flags, value);
			set_r8(cpu, bus, r, result);
			if r == R8::HlIndirect { 12 } else { 4 }
		}
		(0, 6) => {
			let r = R8::from_index(y);
			let imm = cpu.fetch8(bus);
			set_r8(cpu, bus, r, imm);
			if r == R8::HlIndirect { 12 } else { 8 }
		}
		(0, 7) => block0_z7(cpu, y),
		(1, _) if y == 6 && z == 6 => {
			cpu.enter_halt(bus);
			4
		}
		(1, _) => {
			let dst = R8::from_index(y);
			let src = R8::from_index(z);
			let value = get_r8(cpu, bus, src);
			set_r8(cpu, bus, dst, value);
			if dst == R8::HlIndirect || src == R8::HlIndirect { 8 } else { 4 }
		}
		(2, _) => {
			let r = R8::from_index(z);
			let operand = get_r8(cpu, bus, r);
			apply_alu(cpu, y, operand);
			if r == R8::HlIndirect { 8 } else { 4 }
		}
		(3, 0) => block3_z0(cpu, bus, y),
		(3, 1) => block3_z1(cpu, bus, p, q),
		(3, 2) => block3_z2(cpu, bus, y),
		(3, 3) => return block3_z3(cpu, bus, opcode, y),
		(3, 4) => return block3_z4(cpu, bus, opcode, y),
		(3, 5) => return block3_z5(cpu, bus, opcode, p, q),
		(3, 6) => {
			let imm = cpu.fetch8(bus);
			apply_alu(cpu, y, imm);
			8
		}
		(3, 7) => {
			call(cpu, bus, (y as u16) * 8);
			16
		}
		_ => unreachable!("opcode {:#04x} fell through every (x, z) arm", opcode),
	};

	Ok(cycles)
}

fn get_r8(cpu: &Cpu, bus: &mut MemoryBus, r: R8) -> u8 {
	match r {
		R8::B => cpu.registers.b,
		R8::C => cpu.registers.c,
		R8::D => cpu.registers.d,
		R8::E => cpu.registers.e,
		R8::H => cpu.registers.h,
		R8::L => cpu.registers.l,
		R8::HlIndirect => bus.read8(cpu.registers.hl()),
		R8::A => cpu.registers.a,
	}
}

fn set_r8(cpu: &mut Cpu, bus: &mut MemoryBus, r: R8, value: u8) {
	match r {
		R8::B => cpu.registers.b = value,
		R8::C => cpu.registers.c = value,
		R8::D => cpu.registers.d = value,
		R8::E => cpu.registers.e = value,
		R8::H => cpu.registers.h = value,
		R8::L => cpu.registers.l = value,
		R8::HlIndirect => bus.write8(cpu.registers.hl(), value),
		R8::A => cpu.registers.a = value,
	}
}

fn get_r16(cpu: &Cpu, r: R16) -> u16 {
	match r {
		R16::Bc => cpu.registers.bc(),
		R16::De => cpu.registers.de(),
		R16::Hl => cpu.registers.hl(),
		R16::Sp => cpu.registers.sp,
	}
}

fn set_r16(cpu: &mut Cpu, r: R16, value: u16) {
	match r {
		R16::Bc => cpu.registers.set_bc(value),
		R16::De => cpu.registers.set_de(value),
		R16::Hl => cpu.registers.set_hl(value),
		R16::Sp => cpu.registers.sp = value,
	}
}

fn get_r16_stack(cpu: &Cpu, r: R16Stack) -> u16 {
	match r {
		R16Stack::Bc => cpu.registers.bc(),
		R16Stack::De => cpu.registers.de(),
		R16Stack::Hl => cpu.registers.hl(),
		R16Stack::Af => cpu.registers.af(),
	}
}

fn set_r16_stack(cpu: &mut Cpu, r: R16Stack, value: u16) {
	match r {
		R16Stack::Bc => cpu.registers.set_bc(value),
		R16Stack::De => cpu.registers.set_de(value),
		R16Stack::Hl => cpu.registers.set_hl(value),
		R16Stack::Af => cpu.registers.set_af(value),
	}
}

/// Applies `alu[y] A, operand`, per the CPU manual's `ADD/ADC/SUB/SBC/AND/
/// XOR/OR/CP` ordering. `CP` discards its result, leaving `A` untouched.
fn apply_alu(cpu: &mut Cpu, y: u8, operand: u8) {
	let a = cpu.registers.a;
	let flags = &mut cpu.registers.flags;
	let result = match y {
		0 => Some(alu8::add(flags, a, operand)),
		1 => Some(alu8::adc(flags, a, operand)),
		2 => Some(alu8::sub(flags, a, operand)),
		3 => Some(alu8::sbc(flags, a, operand)),
		4 => Some(alu8::and(flags, a, operand)),
		5 => Some(alu8::xor(flags, a, operand)),
		6 => Some(alu8::or(flags, a, operand)),
		_ => {
			alu8::cp(flags, a, operand);
			None
		}
	};
	if let Some(result) = result {
		cpu.registers.a = result;
	}
}

fn push(cpu: &mut Cpu, bus: &mut MemoryBus, value: u16) {
	cpu.registers.sp = cpu.registers.sp.wrapping_sub(2);
	let sp = cpu.registers.sp;
	bus.write16_stack(sp.wrapping_add(1), value);
}

fn pop(cpu: &mut Cpu, bus: &mut MemoryBus) -> u16 {
	let sp = cpu.registers.sp;
	let value = bus.read16(sp);
	cpu.registers.sp = sp.wrapping_add(2);
	value
}

fn call(cpu: &mut Cpu, bus: &mut MemoryBus, target: u16) {
	let pc = cpu.registers.pc;
	push(cpu, bus, pc);
	cpu.registers.pc = target;
}

fn ret(cpu: &mut Cpu, bus: &mut MemoryBus) {
	cpu.registers.pc = pop(cpu, bus);
}

/// `NOP` / `LD (nn),SP` / `STOP` / `JR d` / `JR cc,d`.
fn block0_z0(cpu: &mut Cpu, bus: &mut MemoryBus, y: u8) -> u32 {
	match y {
		0 => 4,
		1 => {
			let address = cpu.fetch16(bus);
			bus.write16(address, cpu.registers.sp);
			20
		}
		2 => {
			cpu.enter_stop();
			let _ = cpu.fetch8(bus); // STOP's mandated (and ignored) second byte
			4
		}
		3 => {
			let offset = cpu.fetch8(bus) as i8;
			cpu.registers.pc = cpu.registers.pc.wrapping_add(offset as i16 as u16);
			12
		}
		4..=7 => {
			let offset = cpu.fetch8(bus) as i8;
			if Condition::from_index(y - 4).evaluate(cpu.registers.flags) {
				cpu.registers.pc = cpu.registers.pc.wrapping_add(offset as i16 as u16);
				12
			} else {
				8
			}
		}
		_ => unreachable!(),
	}
}

/// `LD rp[p],nn` / `ADD HL,rp[p]`.
fn block0_z1(cpu: &mut Cpu, bus: &mut MemoryBus, p: u8, q: u8) -> u32 {
	let r = R16::from_index(p);
	if q == 0 {
		let imm = cpu.fetch16(bus);
		set_r16(cpu, r, imm);
		12
	} else {
		let rhs = get_r16(cpu, r);
		let hl = cpu.registers.hl();
		let result = alu16::add_hl(&mut cpu.registers.flags, hl, rhs);
		cpu.registers.set_hl(result);
		8
	}
}

/// `LD (BC/DE/HLI/HLD),A` / `LD A,(BC/DE/HLI/HLD)`.
fn block0_z2(cpu: &mut Cpu, bus: &mut MemoryBus, p: u8, q: u8) -> u32 {
	match (p, q) {
		(0, 0) => bus.write8(cpu.registers.bc(), cpu.registers.a),
		(1, 0) => bus.write8(cpu.registers.de(), cpu.registers.a),
		(2, 0) => {
			bus.write8(cpu.registers.hl(), cpu.registers.a);
			cpu.registers.set_hl(cpu.registers.hl().wrapping_add(1));
		}
		(3, 0) => {
			bus.write8(cpu.registers.hl(), cpu.registers.a);
			cpu.registers.set_hl(cpu.registers.hl().wrapping_sub(1));
		}
		(0, _) => cpu.registers.a = bus.read8(cpu.registers.bc()),
		(1, _) => cpu.registers.a = bus.read8(cpu.registers.de()),
		(2, _) => {
			cpu.registers.a = bus.read8(cpu.registers.hl());
			cpu.registers.set_hl(cpu.registers.hl().wrapping_add(1));
		}
		(3, _) => {
			cpu.registers.a = bus.read8(cpu.registers.hl());
			cpu.registers.set_hl(cpu.registers.hl().wrapping_sub(1));
		}
		_ => unreachable!(),
	}
	8
}

/// `INC rp[p]` / `DEC rp[p]`.
fn block0_z3(cpu: &mut Cpu, p: u8, q: u8) -> u32 {
	let r = R16::from_index(p);
	let value = get_r16(cpu, r);
	let result = if q == 0 { value.wrapping_add(1) } else { value.wrapping_sub(1) };
	set_r16(cpu, r, result);
	8
}

/// The 8 non-prefixed accumulator/flag operations: `RLCA`, `RRCA`, `RLA`,
/// `RRA`, `DAA`, `CPL`, `SCF`, `CCF`.
fn block0_z7(cpu: &mut Cpu, y: u8) -> u32 {
	let a = cpu.registers.a;
	let result = match y {
		0 => alu8::accumulator::rlca(&mut cpu.registers.flags, a),
		1 => alu8::accumulator::rrca(&mut cpu.registers.flags, a),
		2 => alu8::accumulator::rla(&mut cpu.registers.flags, a),
		3 => alu8::accumulator::rra(&mut cpu.registers.flags, a),
		4 => alu8::daa(&mut cpu.registers.flags, a),
		5 => alu8::cpl(&mut cpu.registers.flags, a),
		6 => {
			cpu.registers.flags.n = false;
			cpu.registers.flags.h = false;
			cpu.registers.flags.c = true;
			a
		}
		_ => {
			cpu.registers.flags.n = false;
			cpu.registers.flags.h = false;
			cpu.registers.flags.c = !cpu.registers.flags.c;
			a
		}
	};
	cpu.registers.a = result;
	4
}

/// `RET cc` / `LDH (n),A` / `ADD SP,e` / `LDH A,(n)` / `LD HL,SP+e`.
fn block3_z0(cpu: &mut Cpu, bus: &mut MemoryBus, y: u8) -> u32 {
	match y {
		0..=3 => {
			if Condition::from_index(y).evaluate(cpu.registers.flags) {
				ret(cpu, bus);
				20
			} else {
				8
			}
		}
		4 => {
			let offset = cpu.fetch8(bus);
			bus.write8(0xFF00 + offset as u16, cpu.registers.a);
			12
		}
		5 => {
			let offset = cpu.fetch8(bus) as i8;
			let sp = cpu.registers.sp;
			cpu.registers.sp = alu16::add_sp_signed(&mut cpu.registers.flags, sp, offset);
			16
		}
		6 => {
			let offset = cpu.fetch8(bus);
			cpu.registers.a = bus.read8(0xFF00 + offset as u16);
			12
		}
		_ => {
			let offset = cpu.fetch8(bus) as i8;
			let sp = cpu.registers.sp;
			let result = alu16::add_sp_signed(&mut cpu.registers.flags, sp, offset);
			cpu.registers.set_hl(result);
			12
		}
	}
}

/// `POP rp2[p]` / `RET` / `RETI` / `JP HL` / `LD SP,HL`.
fn block3_z1(cpu: &mut Cpu, bus: &mut MemoryBus, p: u8, q: u8) -> u32 {
	if q == 0 {
		let value = pop(cpu, bus);
		set_r16_stack(cpu, R16Stack::from_index(p), value);
		12
	} else {
		match p {
			0 => {
				ret(cpu, bus);
				16
			}
			1 => {
				ret(cpu, bus);
				cpu.ime = true; // RETI: IME takes effect immediately, no EI-style delay.
				16
			}
			2 => {
				cpu.registers.pc = cpu.registers.hl();
				4
			}
			_ => {
				cpu.registers.sp = cpu.registers.hl();
				8
			}
		}
	}
}

/// `JP cc,nn` / `LDH (C),A` / `LD (nn),A` / `LDH A,(C)` / `LD A,(nn)`.
fn block3_z2(cpu: &mut Cpu, bus: &mut MemoryBus, y: u8) -> u32 {
	match y {
		0..=3 => {
			let target = cpu.fetch16(bus);
			if Condition::from_index(y).evaluate(cpu.registers.flags) {
				cpu.registers.pc = target;
				16
			} else {
				12
			}
		}
		4 => {
			bus.write8(0xFF00 + cpu.registers.c as u16, cpu.registers.a);
			8
		}
		5 => {
			let address = cpu.fetch16(bus);
			bus.write8(address, cpu.registers.a);
			16
		}
		6 => {
			cpu.registers.a = bus.read8(0xFF00 + cpu.registers.c as u16);
			8
		}
		_ => {
			let address = cpu.fetch16(bus);
			cpu.registers.a = bus.read8(address);
			16
		}
	}
}

/// `JP nn` / the `CB` prefix / `DI` / `EI`. `y` in `2..=5` is the illegal
/// (former `IN`/`OUT`/`EX`) corner of this column.
fn block3_z3(cpu: &mut Cpu, bus: &mut MemoryBus, opcode: u8, y: u8) -> Result<u32, GameboyError> {
	let cycles = match y {
		0 => {
			cpu.registers.pc = cpu.fetch16(bus);
			16
		}
		1 => {
			let cb_opcode = cpu.fetch8(bus);
			execute_cb(cpu, bus, cb_opcode)
		}
		6 => {
			cpu.set_ime_delayed(false);
			4
		}
		7 => {
			cpu.set_ime_delayed(true);
			4
		}
		_ => return Err(GameboyError::IllegalOpcode(opcode)),
	};
	Ok(cycles)
}

/// `CALL cc,nn`. `y` in `4..=7` is the illegal corner of this column.
fn block3_z4(cpu: &mut Cpu, bus: &mut MemoryBus, opcode: u8, y: u8) -> Result<u32, GameboyError> {
	if y > 3 {
		return Err(GameboyError::IllegalOpcode(opcode));
	}
	let target = cpu.fetch16(bus);
	let cycles = if Condition::from_index(y).evaluate(cpu.registers.flags) {
		call(cpu, bus, target);
		24
	} else {
		12
	};
	Ok(cycles)
}

/// `PUSH rp2[p]` / `CALL nn`. `p` in `1..=3` of the `q=1` column is illegal.
fn block3_z5(
	cpu: &mut Cpu,
	bus: &mut MemoryBus,
	opcode: u8,
	p: u8,
	q: u8,
) -> Result<u32, GameboyError> {
	if q == 0 {
		let value = get_r16_stack(cpu, R16Stack::from_index(p));
		push(cpu, bus, value);
		Ok(16)
	} else if p == 0 {
		let target = cpu.fetch16(bus);
		call(cpu, bus, target);
		Ok(24)
	} else {
		Err(GameboyError::IllegalOpcode(opcode))
	}
}

/// The `CB`-prefixed table: `RLC/RRC/RL/RR/SLA/SRA/SWAP/SRL r8`, `BIT b,r8`,
/// `RES b,r8`, `SET b,r8`. None of these opcodes are illegal.
fn execute_cb(cpu: &mut Cpu, bus: &mut MemoryBus, opcode: u8) -> u32 {
	let x = opcode >> 6;
	let y = (opcode >> 3) & 7;
	let z = opcode & 7;
	let r = R8::from_index(z);
	let is_hl = r == R8::HlIndirect;

	match x {
		0 => {
			let value = get_r8(cpu, bus, r);
			let flags = &mut cpu.registers.flags;
			let result = match y {
				0 => alu8::rlc(flags, value),
				1 => alu8::rrc(flags, value),
				2 => alu8::rl(flags, value),
				3 => alu8::rr(flags, value),
				4 => alu8::sla(flags, value),
				5 => alu8::sra(flags, value),
				6 => alu8::swap(flags, value),
				_ => alu8::srl(flags, value),
			};
			set_r8(cpu, bus, r, result);
			if is_hl { 16 } else { 8 }
		}
		1 => {
			let value = get_r8(cpu, bus, r);
			alu8::bit(&mut cpu.registers.flags, value, y);
			if is_hl { 12 } else { 8 }
		}
		2 => {
			let value = get_r8(cpu, bus, r);
			set_r8(cpu, bus, r, alu8::res_bit(value, y));
			if is_hl { 16 } else { 8 }
		}
		_ => {
			let value = get_r8(cpu, bus, r);
			set_r8(cpu, bus, r, alu8::set_bit(value, y));
			if is_hl { 16 } else { 8 }
		}
	}
}

#[cfg(test)]
mod tests {
	use super::super::tests::new_test_cpu;
	use crate::GameboyError;

	fn load(bus: &mut crate::bus::MemoryBus, program: &[u8]) {
		for (i, &byte) in program.iter().enumerate() {
			bus.write8(0xC000 + i as u16, byte);
		}
	}

	#[test]
	fn ld_b_immediate_then_ld_a_b() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		load(&mut bus, &[0x06, 0x42, 0x78]); // LD B,0x42; LD A,B

		assert_eq!(cpu.step(&mut bus).unwrap(), 8);
		assert_eq!(cpu.registers.b, 0x42);
		assert_eq!(cpu.step(&mut bus).unwrap(), 4);
		assert_eq!(cpu.registers.a, 0x42);
	}

	#[test]
	fn add_hl_indirect_operand() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		cpu.registers.set_hl(0xC010);
		bus.write8(0xC010, 0x05);
		cpu.registers.a = 0x03;
		load(&mut bus, &[0x86]); // ADD A,(HL)

		assert_eq!(cpu.step(&mut bus).unwrap(), 8);
		assert_eq!(cpu.registers.a, 0x08);
	}

	#[test]
	fn jr_nz_takes_branch_when_not_zero() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		cpu.registers.flags.z = false;
		load(&mut bus, &[0x20, 0x05]); // JR NZ,+5

		let cycles = cpu.step(&mut bus).unwrap();
		assert_eq!(cycles, 12);
		assert_eq!(cpu.registers.pc, 0xC000 + 2 + 5);
	}

	#[test]
	fn push_pop_round_trips_through_the_stack() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		cpu.registers.sp = 0xFFFE;
		cpu.registers.set_bc(0xBEEF);
		load(&mut bus, &[0xC5, 0xD1]); // PUSH BC; POP DE

		cpu.step(&mut bus).unwrap();
		assert_eq!(cpu.registers.sp, 0xFFFC);
		cpu.step(&mut bus).unwrap();
		assert_eq!(cpu.registers.de(), 0xBEEF);
		assert_eq!(cpu.registers.sp, 0xFFFE);
	}

	#[test]
	fn cb_bit_instruction_reads_hl_indirect() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		cpu.registers.set_hl(0xC010);
		bus.write8(0xC010, 0b0000_0100);
		load(&mut bus, &[0xCB, 0x56]); // BIT 2,(HL)

		let cycles = cpu.step(&mut bus).unwrap();
		assert_eq!(cycles, 12);
		assert!(!cpu.registers.flags.z);
	}

	#[test]
	fn illegal_opcode_is_reported_not_panicked() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		load(&mut bus, &[0xD3]);

		assert_eq!(cpu.step(&mut bus), Err(GameboyError::IllegalOpcode(0xD3)));
	}

	#[test]
	fn call_and_ret_round_trip() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		cpu.registers.sp = 0xFFFE;
		load(&mut bus, &[0xCD, 0x10, 0xC0]); // CALL 0xC010
		bus.write8(0xC010, 0xC9); // RET

		cpu.step(&mut bus).unwrap();
		assert_eq!(cpu.registers.pc, 0xC010);
		cpu.step(&mut bus).unwrap();
		assert_eq!(cpu.registers.pc, 0xC003);
	}
}
