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
//! BITMAP values.
//!
//! Two byte layouts exist. The wire layout is what the offline transform job
//! writes into the staged files (StarRocks `BitmapValue::serialize`): a type
//! byte followed by a single value, a fixed-width set or roaring payloads.
//! The storage layout is the compact one kept inside segment columns: a type
//! byte followed by a single value or a varint-encoded set.

use std::collections::BTreeMap;
use std::io::Cursor;

use roaring::{RoaringBitmap, RoaringTreemap};

const BITMAP_TYPE_EMPTY: u8 = 0;
const BITMAP_TYPE_SINGLE32: u8 = 1;
const BITMAP_TYPE_BITMAP32: u8 = 2;
const BITMAP_TYPE_SINGLE64: u8 = 3;
const BITMAP_TYPE_BITMAP64: u8 = 4;
const BITMAP_TYPE_SET: u8 = 10;
const BITMAP_TYPE_BITMAP32_SERIV2: u8 = 12;
const BITMAP_TYPE_BITMAP64_SERIV2: u8 = 13;

/// Sets up to this size are written as a plain value list on the wire.
const WIRE_SET_MAX_SIZE: usize = 32;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BitmapValue {
    values: RoaringTreemap,
}

impl BitmapValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = u64>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, value: u64) -> bool {
        self.values.insert(value)
    }

    pub fn contains(&self, value: u64) -> bool {
        self.values.contains(value)
    }

    pub fn cardinality(&self) -> u64 {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.values.iter()
    }

    fn single(&self) -> Option<u64> {
        if self.values.len() == 1 {
            self.values.iter().next()
        } else {
            None
        }
    }

    /// Decode the wire layout. Every byte must be consumed.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, String> {
        let Some((&type_code, payload)) = bytes.split_first() else {
            return Err("bitmap payload is empty".to_string());
        };
        match type_code {
            BITMAP_TYPE_EMPTY => {
                expect_len("EMPTY", payload, 0)?;
                Ok(Self::new())
            }
            BITMAP_TYPE_SINGLE32 => {
                expect_len("SINGLE32", payload, 4)?;
                Ok(Self::from_values([u64::from(read_u32_le(payload, 0)?)]))
            }
            BITMAP_TYPE_SINGLE64 => {
                expect_len("SINGLE64", payload, 8)?;
                Ok(Self::from_values([read_u64_le(payload, 0)?]))
            }
            BITMAP_TYPE_SET => {
                let count = read_u32_le(payload, 0)? as usize;
                let required = 4usize.saturating_add(count.saturating_mul(8));
                expect_len("SET", payload, required)?;
                let mut out = Self::new();
                for idx in 0..count {
                    out.insert(read_u64_le(payload, 4 + idx * 8)?);
                }
                Ok(out)
            }
            BITMAP_TYPE_BITMAP32 | BITMAP_TYPE_BITMAP32_SERIV2 => {
                let (bitmap, consumed) = decode_roaring32(payload)?;
                if consumed != payload.len() {
                    return Err(format!(
                        "bitmap BITMAP32 payload has trailing bytes: consumed={} len={}",
                        consumed,
                        payload.len()
                    ));
                }
                Ok(Self::from_values(bitmap.iter().map(u64::from)))
            }
            BITMAP_TYPE_BITMAP64 | BITMAP_TYPE_BITMAP64_SERIV2 => decode_bitmap64(payload),
            other => Err(format!("bitmap unsupported payload type code: {other}")),
        }
    }

    /// Encode in the wire layout.
    pub fn serialize(&self) -> Result<Vec<u8>, String> {
        if self.is_empty() {
            return Ok(vec![BITMAP_TYPE_EMPTY]);
        }
        if let Some(value) = self.single() {
            return Ok(encode_single(value));
        }
        let len = self.values.len() as usize;
        if len <= WIRE_SET_MAX_SIZE {
            let mut out = Vec::with_capacity(1 + 4 + len * 8);
            out.push(BITMAP_TYPE_SET);
            out.extend_from_slice(&(len as u32).to_le_bytes());
            for value in self.iter() {
                out.extend_from_slice(&value.to_le_bytes());
            }
            return Ok(out);
        }

        let mut buckets: BTreeMap<u32, RoaringBitmap> = BTreeMap::new();
        for value in self.iter() {
            buckets
                .entry((value >> 32) as u32)
                .or_default()
                .insert(value as u32);
        }
        if buckets.len() == 1
            && let Some(low) = buckets.get(&0)
        {
            let mut out = vec![BITMAP_TYPE_BITMAP32];
            low.serialize_into(&mut out)
                .map_err(|e| format!("bitmap encode roaring32 payload failed: {e}"))?;
            return Ok(out);
        }

        let mut out = vec![BITMAP_TYPE_BITMAP64];
        encode_varint_u64(buckets.len() as u64, &mut out);
        for (high, bitmap) in &buckets {
            out.extend_from_slice(&high.to_le_bytes());
            bitmap
                .serialize_into(&mut out)
                .map_err(|e| format!("bitmap encode roaring64 bucket {high} failed: {e}"))?;
        }
        Ok(out)
    }

    /// Encode in the storage layout used inside segment columns.
    pub fn to_storage_bytes(&self) -> Result<Vec<u8>, String> {
        if self.is_empty() {
            return Ok(vec![BITMAP_TYPE_EMPTY]);
        }
        if let Some(value) = self.single() {
            return Ok(encode_single(value));
        }
        let count = u32::try_from(self.values.len())
            .map_err(|_| format!("bitmap value count overflow: {}", self.values.len()))?;
        let mut out = Vec::with_capacity(5 + count as usize * 2);
        out.push(BITMAP_TYPE_SET);
        out.extend_from_slice(&count.to_le_bytes());
        for value in self.iter() {
            encode_varint_u64(value, &mut out);
        }
        Ok(out)
    }

    pub fn from_storage_bytes(bytes: &[u8]) -> Result<Self, String> {
        let Some((&type_code, payload)) = bytes.split_first() else {
            return Err("bitmap storage payload is empty".to_string());
        };
        match type_code {
            BITMAP_TYPE_EMPTY | BITMAP_TYPE_SINGLE32 | BITMAP_TYPE_SINGLE64 => {
                Self::deserialize(bytes)
            }
            BITMAP_TYPE_SET => {
                let count = read_u32_le(payload, 0)? as usize;
                let mut offset = 4usize;
                let mut out = Self::new();
                for idx in 0..count {
                    let (value, consumed) = decode_varint_u64(&payload[offset..]).map_err(|e| {
                        format!("bitmap storage SET value failed at entry {idx}: {e}")
                    })?;
                    offset += consumed;
                    out.insert(value);
                }
                if offset != payload.len() {
                    return Err(format!(
                        "bitmap storage SET payload has trailing bytes: offset={} len={}",
                        offset,
                        payload.len()
                    ));
                }
                Ok(out)
            }
            other => Err(format!("bitmap storage unsupported type code: {other}")),
        }
    }
}

fn encode_single(value: u64) -> Vec<u8> {
    if let Ok(v32) = u32::try_from(value) {
        let mut out = Vec::with_capacity(5);
        out.push(BITMAP_TYPE_SINGLE32);
        out.extend_from_slice(&v32.to_le_bytes());
        return out;
    }
    let mut out = Vec::with_capacity(9);
    out.push(BITMAP_TYPE_SINGLE64);
    out.extend_from_slice(&value.to_le_bytes());
    out
}

fn expect_len(layout: &str, payload: &[u8], expected: usize) -> Result<(), String> {
    if payload.len() != expected {
        return Err(format!(
            "bitmap {layout} payload length mismatch: expected={} actual={}",
            expected + 1,
            payload.len() + 1
        ));
    }
    Ok(())
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32, String> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| format!("bitmap payload truncated reading u32 at offset {offset}"))
}

fn read_u64_le(bytes: &[u8], offset: usize) -> Result<u64, String> {
    bytes
        .get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| format!("bitmap payload truncated reading u64 at offset {offset}"))
}

fn encode_varint_u64(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn decode_varint_u64(bytes: &[u8]) -> Result<(u64, usize), String> {
    let mut out = 0u64;
    let mut shift = 0u32;
    for (idx, byte) in bytes.iter().enumerate() {
        out |= u64::from(byte & 0x7f) << shift;
        if (byte & 0x80) == 0 {
            return Ok((out, idx + 1));
        }
        shift += 7;
        if shift > 63 {
            return Err("varint overflow".to_string());
        }
    }
    Err("varint reached end of payload".to_string())
}

fn decode_roaring32(bytes: &[u8]) -> Result<(RoaringBitmap, usize), String> {
    if bytes.is_empty() {
        return Err("bitmap roaring32 payload is empty".to_string());
    }
    let mut cursor = Cursor::new(bytes);
    let bitmap = RoaringBitmap::deserialize_from(&mut cursor)
        .map_err(|e| format!("bitmap decode roaring32 payload failed: {e}"))?;
    let consumed = usize::try_from(cursor.position())
        .map_err(|_| "bitmap decode roaring32 payload length overflow".to_string())?;
    Ok((bitmap, consumed))
}

fn decode_bitmap64(payload: &[u8]) -> Result<BitmapValue, String> {
    let (map_size, consumed) = decode_varint_u64(payload)
        .map_err(|e| format!("bitmap BITMAP64 map size: {e}"))?;
    let mut offset = consumed;
    let mut out = BitmapValue::new();
    for idx in 0..map_size {
        let high = read_u32_le(payload, offset)
            .map_err(|e| format!("bitmap BITMAP64 entry {idx}: {e}"))?;
        offset += 4;
        let (bitmap, used) = decode_roaring32(&payload[offset..])
            .map_err(|e| format!("bitmap BITMAP64 entry {idx}: {e}"))?;
        offset += used;
        for low in bitmap.iter() {
            out.insert((u64::from(high) << 32) | u64::from(low));
        }
    }
    if offset != payload.len() {
        return Err(format!(
            "bitmap BITMAP64 payload has trailing bytes: offset={} len={}",
            offset,
            payload.len()
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_then_back(values: &[u64]) -> BitmapValue {
        let original = BitmapValue::from_values(values.iter().copied());
        let bytes = original.serialize().expect("serialize");
        let decoded = BitmapValue::deserialize(&bytes).expect("deserialize");
        assert_eq!(decoded, original);
        decoded
    }

    #[test]
    fn wire_layout_covers_every_shape() {
        assert!(wire_then_back(&[]).is_empty());
        assert!(wire_then_back(&[7]).contains(7));
        assert!(wire_then_back(&[u64::MAX]).contains(u64::MAX));
        assert_eq!(wire_then_back(&[1, 5, 9]).cardinality(), 3);
        let dense: Vec<u64> = (0..1000).collect();
        assert_eq!(wire_then_back(&dense).cardinality(), 1000);
        let wide: Vec<u64> = (0..100).map(|v| v << 33).collect();
        let decoded = wire_then_back(&wide);
        assert!(decoded.contains(99 << 33));
        assert!(!decoded.contains(1));
    }

    #[test]
    fn storage_layout_round_trip() {
        let values = BitmapValue::from_values([3, 300, 1 << 40]);
        let bytes = values.to_storage_bytes().expect("encode");
        assert_eq!(bytes[0], BITMAP_TYPE_SET);
        assert_eq!(BitmapValue::from_storage_bytes(&bytes).expect("decode"), values);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(BitmapValue::deserialize(&[]).is_err());
        assert!(BitmapValue::deserialize(&[BITMAP_TYPE_SINGLE32, 1, 2]).is_err());
        assert!(BitmapValue::deserialize(&[BITMAP_TYPE_EMPTY, 0]).is_err());
        // SET claims two values but carries one.
        let mut set = vec![BITMAP_TYPE_SET];
        set.extend_from_slice(&2u32.to_le_bytes());
        set.extend_from_slice(&1u64.to_le_bytes());
        assert!(BitmapValue::deserialize(&set).is_err());
        assert!(BitmapValue::deserialize(&[BITMAP_TYPE_BITMAP32, 0xff, 0xff]).is_err());
        assert!(BitmapValue::deserialize(&[99]).is_err());
    }

    #[test]
    fn rejects_trailing_bytes_after_roaring_payload() {
        let values = BitmapValue::from_values(0..100);
        let mut bytes = values.serialize().expect("serialize");
        assert_eq!(bytes[0], BITMAP_TYPE_BITMAP32);
        bytes.push(0);
        let err = BitmapValue::deserialize(&bytes).expect_err("expected trailing error");
        assert!(err.contains("trailing"), "err={err}");
    }
}
