// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! HyperLogLog values in the StarRocks serialization format.
//!
//! Layout: a type byte, then
//! - EMPTY: nothing;
//! - EXPLICIT: u8 count + count * u64 hash;
//! - SPARSE: u32 count + count * (u16 register index, u8 register value);
//! - FULL: all 16384 registers.

use std::collections::BTreeSet;

const HLL_DATA_EMPTY: u8 = 0;
const HLL_DATA_EXPLICIT: u8 = 1;
const HLL_DATA_SPARSE: u8 = 2;
const HLL_DATA_FULL: u8 = 3;

const HLL_COLUMN_PRECISION: usize = 14;
const HLL_REGISTERS_COUNT: usize = 16 * 1024;
const HLL_SPARSE_THRESHOLD: usize = 4096;
const HLL_EXPLICIT_INT64_NUM: usize = 160;
/// Largest rank a register can hold with 14 index bits.
const HLL_MAX_REGISTER_VALUE: u8 = (64 - HLL_COLUMN_PRECISION + 1) as u8;

const MURMUR_PRIME: u64 = 0xc6a4_a793_5bd1_e995;
const MURMUR_SEED: u32 = 0xadc8_3b19;

#[derive(Clone, Debug, PartialEq)]
enum HllData {
    Empty,
    Explicit(BTreeSet<u64>),
    Registers(Box<[u8; HLL_REGISTERS_COUNT]>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct HyperLogLog {
    data: HllData,
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self {
            data: HllData::Empty,
        }
    }
}

impl HyperLogLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.data, HllData::Empty)
    }

    /// Add a pre-hashed value. A zero hash carries no information and is ignored.
    pub fn update(&mut self, hash_value: u64) {
        if hash_value == 0 {
            return;
        }
        match &mut self.data {
            HllData::Empty => {
                self.data = HllData::Explicit(BTreeSet::from([hash_value]));
            }
            HllData::Explicit(hashes) => {
                hashes.insert(hash_value);
                if hashes.len() > HLL_EXPLICIT_INT64_NUM {
                    let mut registers = Box::new([0u8; HLL_REGISTERS_COUNT]);
                    for hash in hashes.iter() {
                        update_register(&mut registers, *hash);
                    }
                    self.data = HllData::Registers(registers);
                }
            }
            HllData::Registers(registers) => update_register(registers, hash_value),
        }
    }

    pub fn update_with_bytes(&mut self, data: &[u8]) {
        self.update(murmur_hash64a(data, MURMUR_SEED));
    }

    pub fn estimate_cardinality(&self) -> i64 {
        match &self.data {
            HllData::Empty => 0,
            HllData::Explicit(hashes) => hashes.len() as i64,
            HllData::Registers(registers) => estimate_from_registers(registers),
        }
    }

    /// Decode a serialized value. Lengths must match exactly.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, String> {
        let Some((&type_code, payload)) = bytes.split_first() else {
            return Err("hll payload is empty".to_string());
        };
        let data = match type_code {
            HLL_DATA_EMPTY => {
                if !payload.is_empty() {
                    return Err(format!(
                        "hll EMPTY payload length mismatch: expected=1 actual={}",
                        bytes.len()
                    ));
                }
                HllData::Empty
            }
            HLL_DATA_EXPLICIT => {
                let Some((&count, hashes)) = payload.split_first() else {
                    return Err("hll EXPLICIT payload is missing its count".to_string());
                };
                let count = count as usize;
                if hashes.len() != count * 8 {
                    return Err(format!(
                        "hll EXPLICIT payload length mismatch: expected={} actual={}",
                        2 + count * 8,
                        bytes.len()
                    ));
                }
                let mut out = BTreeSet::new();
                for chunk in hashes.chunks_exact(8) {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    out.insert(u64::from_le_bytes(raw));
                }
                if out.is_empty() {
                    HllData::Empty
                } else {
                    HllData::Explicit(out)
                }
            }
            HLL_DATA_SPARSE => {
                let count = payload
                    .get(0..4)
                    .and_then(|b| b.try_into().ok())
                    .map(u32::from_le_bytes)
                    .ok_or_else(|| "hll SPARSE payload is missing its count".to_string())?
                    as usize;
                let entries = &payload[4..];
                if entries.len() != count * 3 {
                    return Err(format!(
                        "hll SPARSE payload length mismatch: expected={} actual={}",
                        5 + count * 3,
                        bytes.len()
                    ));
                }
                let mut registers = Box::new([0u8; HLL_REGISTERS_COUNT]);
                for (entry, raw) in entries.chunks_exact(3).enumerate() {
                    let idx = u16::from_le_bytes([raw[0], raw[1]]) as usize;
                    if idx >= HLL_REGISTERS_COUNT {
                        return Err(format!(
                            "hll SPARSE entry {entry} register index out of range: {idx}"
                        ));
                    }
                    registers[idx] = checked_register_value(raw[2])?;
                }
                HllData::Registers(registers)
            }
            HLL_DATA_FULL => {
                if payload.len() != HLL_REGISTERS_COUNT {
                    return Err(format!(
                        "hll FULL payload length mismatch: expected={} actual={}",
                        1 + HLL_REGISTERS_COUNT,
                        bytes.len()
                    ));
                }
                let mut registers = Box::new([0u8; HLL_REGISTERS_COUNT]);
                for (idx, value) in payload.iter().enumerate() {
                    registers[idx] = checked_register_value(*value)?;
                }
                HllData::Registers(registers)
            }
            other => return Err(format!("hll unsupported payload type code: {other}")),
        };
        Ok(Self { data })
    }

    pub fn serialize(&self) -> Vec<u8> {
        match &self.data {
            HllData::Empty => vec![HLL_DATA_EMPTY],
            HllData::Explicit(hashes) => {
                let mut out = Vec::with_capacity(2 + hashes.len() * 8);
                out.push(HLL_DATA_EXPLICIT);
                out.push(hashes.len() as u8);
                for hash in hashes {
                    out.extend_from_slice(&hash.to_le_bytes());
                }
                out
            }
            HllData::Registers(registers) => {
                let non_zero = registers.iter().filter(|v| **v > 0).count();
                if non_zero > HLL_SPARSE_THRESHOLD {
                    let mut out = Vec::with_capacity(1 + HLL_REGISTERS_COUNT);
                    out.push(HLL_DATA_FULL);
                    out.extend_from_slice(&registers[..]);
                    return out;
                }
                let mut out = Vec::with_capacity(5 + non_zero * 3);
                out.push(HLL_DATA_SPARSE);
                out.extend_from_slice(&(non_zero as u32).to_le_bytes());
                for (idx, value) in registers.iter().enumerate() {
                    if *value > 0 {
                        out.extend_from_slice(&(idx as u16).to_le_bytes());
                        out.push(*value);
                    }
                }
                out
            }
        }
    }
}

fn checked_register_value(value: u8) -> Result<u8, String> {
    if value > HLL_MAX_REGISTER_VALUE {
        return Err(format!(
            "hll register value out of range: {value} > {HLL_MAX_REGISTER_VALUE}"
        ));
    }
    Ok(value)
}

fn update_register(registers: &mut [u8; HLL_REGISTERS_COUNT], hash_value: u64) {
    let idx = (hash_value % HLL_REGISTERS_COUNT as u64) as usize;
    let mut shifted = hash_value >> HLL_COLUMN_PRECISION;
    shifted |= 1_u64 << (64 - HLL_COLUMN_PRECISION);
    let rank = shifted.trailing_zeros() as u8 + 1;
    if registers[idx] < rank {
        registers[idx] = rank;
    }
}

fn estimate_from_registers(registers: &[u8; HLL_REGISTERS_COUNT]) -> i64 {
    let num_streams = HLL_REGISTERS_COUNT as f64;
    let alpha = 0.7213 / (1.0 + 1.079 / num_streams);

    let mut harmonic_mean = 0.0f64;
    let mut zero_registers = 0usize;
    for register in registers.iter() {
        harmonic_mean += 2_f64.powi(-(*register as i32));
        if *register == 0 {
            zero_registers += 1;
        }
    }

    let mut estimate = alpha * num_streams * num_streams / harmonic_mean;
    if estimate <= num_streams * 2.5 && zero_registers != 0 {
        estimate = num_streams * (num_streams / zero_registers as f64).ln();
    } else if estimate < 72_000.0 {
        // Bias correction for 16K registers, same polynomial as be/src/types/hll.cpp.
        let bias = 5.9119e-18 * estimate.powi(4) - 1.4253e-12 * estimate.powi(3)
            + 1.2940e-7 * estimate.powi(2)
            - 5.2921e-3 * estimate
            + 83.3216;
        estimate -= estimate * (bias / 100.0);
    }

    estimate.max(0.0).round() as i64
}

pub fn murmur_hash64a(data: &[u8], seed: u32) -> u64 {
    let r: u32 = 47;
    let mut h = (seed as u64) ^ (data.len() as u64).wrapping_mul(MURMUR_PRIME);

    let mut blocks = data.chunks_exact(8);
    for block in blocks.by_ref() {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(block);
        let mut k = u64::from_le_bytes(raw);
        k = k.wrapping_mul(MURMUR_PRIME);
        k ^= k >> r;
        k = k.wrapping_mul(MURMUR_PRIME);
        h ^= k;
        h = h.wrapping_mul(MURMUR_PRIME);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        for (idx, byte) in tail.iter().enumerate() {
            h ^= (*byte as u64) << (idx * 8);
        }
        h = h.wrapping_mul(MURMUR_PRIME);
    }

    h ^= h >> r;
    h = h.wrapping_mul(MURMUR_PRIME);
    h ^= h >> r;
    h
}
