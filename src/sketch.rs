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

use std::fmt;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;

use byteorder::BE;
use byteorder::LE;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::MIN_K;
use crate::error::Error;
use crate::serialization::COMPAT_DOUBLE;
use crate::serialization::COMPAT_FLOAT;
use crate::serialization::COMPAT_SERIAL_VERSION;
use crate::serialization::DATA_START;
use crate::serialization::EMPTY_SIZE_BYTES;
use crate::serialization::FLAG_IS_EMPTY;
use crate::serialization::FLAG_REVERSE_MERGE;
use crate::serialization::PREAMBLE_LONGS_EMPTY;
use crate::serialization::PREAMBLE_LONGS_NON_EMPTY;
use crate::serialization::SERIAL_VERSION;
use crate::serialization::SKETCH_TYPE;

const USE_ALTERNATING_SORT: bool = true;
const USE_TWO_LEVEL_COMPRESSION: bool = true;
const USE_WEIGHT_LIMIT: bool = true;
const BUFFER_MULTIPLIER: usize = 5;

/// Trait implemented by value types supported by [`TDigest`].
pub(crate) trait DigestValue: Copy + PartialOrd + fmt::Debug + fmt::Display {
    /// Serialized size of one value in bytes.
    const SERIALIZED_SIZE: usize;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;

    /// Returns true if the value is NaN.
    fn is_nan(self) -> bool;

    /// Write a single value in the native little-endian layout.
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()>;

    /// Read a single value from the native little-endian layout.
    fn read_le<R: Read>(reader: &mut R) -> io::Result<Self>;
}

impl DigestValue for f64 {
    const SERIALIZED_SIZE: usize = 8;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }

    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_f64::<LE>(self)
    }

    fn read_le<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_f64::<LE>()
    }
}

impl DigestValue for f32 {
    const SERIALIZED_SIZE: usize = 4;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }

    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_f32::<LE>(self)
    }

    fn read_le<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_f32::<LE>()
    }
}

/// T-Digest sketch for estimating quantiles and ranks.
///
/// See the [crate documentation](crate) for more details.
#[allow(private_bounds)]
#[derive(Debug, Clone, PartialEq)]
pub struct TDigest<F: DigestValue> {
    k: u16,
    internal_k: u16,

    reverse_merge: bool,
    min: F,
    max: F,

    compressed: Vec<Centroid<F>>,
    compressed_weight: u64,
    buffer: Vec<Centroid<F>>,
    buffered_weight: u64,
    buffer_capacity: usize,
}

impl<F: DigestValue> Default for TDigest<F> {
    fn default() -> Self {
        TDigest::new(crate::DEFAULT_K)
    }
}

#[allow(private_bounds)]
impl<F: DigestValue> TDigest<F> {
    /// Creates a digest with the given compression parameter k.
    ///
    /// # Panics
    ///
    /// If k is less than [`MIN_K`](crate::MIN_K).
    ///
    /// # Examples
    ///
    /// ```
    /// # use tdigest::TDigest;
    /// let digest = TDigest::<f64>::new(100);
    /// assert_eq!(digest.k(), 100);
    /// ```
    pub fn new(k: u16) -> Self {
        assert!(k >= MIN_K, "k must be at least {MIN_K}, got {k}");
        Self::make(
            k,
            false,
            F::from_f64(f64::INFINITY),
            F::from_f64(f64::NEG_INFINITY),
            Vec::new(),
            0,
            Vec::new(),
            0,
        )
    }

    /// Returns the compression parameter this digest was configured with.
    pub fn k(&self) -> u16 {
        self.k
    }

    /// Returns true if the digest has not seen any data.
    pub fn is_empty(&self) -> bool {
        self.compressed.is_empty() && self.buffer.is_empty()
    }

    /// Returns total weight: the number of updates plus all merged-in weights.
    pub fn total_weight(&self) -> u64 {
        self.compressed_weight + self.buffered_weight
    }

    /// Returns the number of retained centroids, buffered ones included.
    pub fn num_retained(&self) -> usize {
        self.compressed.len() + self.buffer.len()
    }

    /// Returns the smallest value seen by the digest.
    pub fn min_value(&self) -> Option<F> {
        if self.is_empty() { None } else { Some(self.min) }
    }

    /// Returns the largest value seen by the digest.
    pub fn max_value(&self) -> Option<F> {
        if self.is_empty() { None } else { Some(self.max) }
    }

    /// Updates the digest with the given value (NaN values are ignored).
    pub fn update(&mut self, value: F) {
        self.append_buffered(value, 1);
    }

    /// Merges another digest into this one, consuming it.
    ///
    /// The other digest's centroids are staged in this digest's buffer and
    /// integrated immediately.
    pub fn merge(&mut self, other: TDigest<F>) {
        if other.is_empty() {
            return;
        }
        let TDigest {
            min,
            max,
            compressed,
            compressed_weight,
            buffer,
            buffered_weight,
            ..
        } = other;
        self.buffer.reserve(compressed.len() + buffer.len());
        self.buffer.extend(compressed);
        self.buffer.extend(buffer);
        self.buffered_weight += compressed_weight + buffered_weight;
        if min < self.min {
            self.min = min;
        }
        if self.max < max {
            self.max = max;
        }
        self.merge_buffered(self.internal_k);
    }

    /// Integrates all buffered centroids.
    ///
    /// The forced merge runs at k-scale rather than the larger internal
    /// scale used by automatic merges, so this is also the pass that reduces
    /// a two-level digest to its target centroid count. Does nothing when
    /// the buffer is already empty.
    pub fn compress(&mut self) {
        self.merge_buffered(self.k);
    }

    /// Returns an approximation of the normalized rank of the given value,
    /// or `None` if the digest is empty.
    ///
    /// # Panics
    ///
    /// If value is NaN.
    pub fn rank(&mut self, value: F) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        assert!(!value.is_nan(), "rank is undefined for NaN");
        self.compress();

        if value < self.min {
            return Some(0.0);
        }
        if self.max < value {
            return Some(1.0);
        }
        // one centroid can only result from a single value or all-equal values
        if self.compressed.len() == 1 {
            return Some(0.5);
        }

        let total_weight = self.compressed_weight as f64;
        let value = value.to_f64();
        let min = self.min.to_f64();
        let max = self.max.to_f64();

        let first = self.compressed[0];
        let first_mean = first.mean.to_f64();
        if value < first_mean {
            if value == min {
                return Some(0.5 / total_weight);
            }
            // min itself accounts for one unit of weight below the band
            let fraction = (value - min) / (first_mean - min);
            return Some((1.0 + fraction * (first.weight as f64 / 2.0 - 1.0)) / total_weight);
        }
        let last = self.compressed[self.compressed.len() - 1];
        let last_mean = last.mean.to_f64();
        if value > last_mean {
            if value == max {
                return Some(1.0 - 0.5 / total_weight);
            }
            let fraction = (max - value) / (max - last_mean);
            return Some(1.0 - (1.0 + fraction * (last.weight as f64 / 2.0 - 1.0)) / total_weight);
        }

        // bracket the value: lower is the leftmost centroid it falls into,
        // upper the rightmost, so runs of equal means collapse to one band
        let mut lower = self.compressed.partition_point(|c| c.mean.to_f64() < value);
        let mut upper = self.compressed.partition_point(|c| c.mean.to_f64() <= value);
        if value < self.compressed[lower].mean.to_f64() {
            lower -= 1;
        }
        if upper == self.compressed.len() || self.compressed[upper - 1].mean.to_f64() >= value {
            upper -= 1;
        }

        let mut weight_below = 0.0;
        for centroid in &self.compressed[..lower] {
            weight_below += centroid.weight as f64;
        }
        weight_below += self.compressed[lower].weight as f64 / 2.0;

        let mut weight_delta = 0.0;
        for centroid in &self.compressed[lower..upper] {
            weight_delta += centroid.weight as f64;
        }
        weight_delta -= self.compressed[lower].weight as f64 / 2.0;
        weight_delta += self.compressed[upper].weight as f64 / 2.0;

        let lower_mean = self.compressed[lower].mean.to_f64();
        let upper_mean = self.compressed[upper].mean.to_f64();
        if upper_mean > lower_mean {
            let fraction = (value - lower_mean) / (upper_mean - lower_mean);
            return Some((weight_below + weight_delta * fraction) / total_weight);
        }
        Some((weight_below + weight_delta / 2.0) / total_weight)
    }

    /// Returns an approximation of the value at the given normalized rank,
    /// or `None` if the digest is empty.
    ///
    /// # Panics
    ///
    /// If rank is not in [0.0, 1.0].
    pub fn quantile(&mut self, rank: f64) -> Option<F> {
        assert!(
            (0.0..=1.0).contains(&rank),
            "rank must be in [0.0, 1.0], got {rank}"
        );
        if self.is_empty() {
            return None;
        }
        self.compress();
        if self.compressed.len() == 1 {
            return Some(self.compressed[0].mean);
        }

        let total_weight = self.compressed_weight as f64;
        let num_centroids = self.compressed.len();
        let weight = rank * total_weight;
        if weight < 1.0 {
            return Some(self.min);
        }
        if weight > total_weight - 1.0 {
            return Some(self.max);
        }
        let min = self.min.to_f64();
        let max = self.max.to_f64();

        // a heavy first centroid pins the left end of the band to min
        let first_weight = self.compressed[0].weight as f64;
        if first_weight > 1.0 && weight < first_weight / 2.0 {
            let first_mean = self.compressed[0].mean.to_f64();
            return Some(F::from_f64(
                min + (weight - 1.0) / (first_weight / 2.0 - 1.0) * (first_mean - min),
            ));
        }
        let last_weight = self.compressed[num_centroids - 1].weight as f64;
        if last_weight > 1.0 && total_weight - weight < last_weight / 2.0 {
            let last_mean = self.compressed[num_centroids - 1].mean.to_f64();
            return Some(F::from_f64(
                max - (total_weight - weight - 1.0) / (last_weight / 2.0 - 1.0) * (max - last_mean),
            ));
        }

        let mut weight_so_far = first_weight / 2.0;
        for i in 0..(num_centroids - 1) {
            let dw = (self.compressed[i].weight + self.compressed[i + 1].weight) as f64 / 2.0;
            if weight_so_far + dw > weight {
                // the target weight is between centroids i and i+1
                let mut left_weight = 0.0;
                if self.compressed[i].weight == 1 {
                    if weight - weight_so_far < 0.5 {
                        return Some(self.compressed[i].mean);
                    }
                    left_weight = 0.5;
                }
                let mut right_weight = 0.0;
                if self.compressed[i + 1].weight == 1 {
                    if weight_so_far + dw - weight <= 0.5 {
                        return Some(self.compressed[i + 1].mean);
                    }
                    right_weight = 0.5;
                }
                let w1 = weight - weight_so_far - left_weight;
                let w2 = weight_so_far + dw - weight - right_weight;
                return Some(F::from_f64(weighted_average(
                    self.compressed[i].mean.to_f64(),
                    w2,
                    self.compressed[i + 1].mean.to_f64(),
                    w1,
                )));
            }
            weight_so_far += dw;
        }

        // above the midpoint of the last centroid
        let last_mean = self.compressed[num_centroids - 1].mean.to_f64();
        let w1 = weight - (total_weight - last_weight / 2.0);
        let w2 = last_weight / 2.0 - w1;
        Some(F::from_f64(weighted_average(last_mean, w2, max, w1)))
    }

    /// Renders a human readable summary of the digest, optionally listing
    /// every retained centroid.
    pub fn to_string(&self, include_centroids: bool) -> String {
        let mut out = String::new();
        out.push_str("### t-Digest summary:\n");
        out.push_str(&format!("   k             : {}\n", self.k));
        out.push_str(&format!("   internal k    : {}\n", self.internal_k));
        out.push_str(&format!("   centroids     : {}\n", self.compressed.len()));
        out.push_str(&format!("   buffered      : {}\n", self.buffer.len()));
        out.push_str(&format!("   total weight  : {}\n", self.total_weight()));
        out.push_str(&format!("   reverse merge : {}\n", self.reverse_merge));
        if !self.is_empty() {
            out.push_str(&format!("   min           : {}\n", self.min));
            out.push_str(&format!("   max           : {}\n", self.max));
        }
        out.push_str("### end summary\n");
        if include_centroids {
            out.push_str("### centroids:\n");
            for (i, centroid) in self.compressed.iter().enumerate() {
                out.push_str(&format!(
                    "   {i}: mean {}, weight {}\n",
                    centroid.mean, centroid.weight
                ));
            }
            out.push_str("### end centroids\n");
        }
        out
    }

    /// Appends a centroid to the buffer, integrating first if it is full.
    pub(crate) fn append_buffered(&mut self, mean: F, weight: u64) {
        if mean.is_nan() || weight == 0 {
            return;
        }
        if self.buffer.len() >= self.buffer_capacity {
            self.merge_buffered(self.internal_k);
        }
        self.buffer.push(Centroid { mean, weight });
        self.buffered_weight += weight;
        if mean < self.min {
            self.min = mean;
        }
        if self.max < mean {
            self.max = mean;
        }
    }

    pub(crate) fn into_centroids(self) -> Vec<Centroid<F>> {
        self.compressed
    }

    /// Integrates the buffer into the compressed array under the scale
    /// function's weight bound for the given compression.
    fn merge_buffered(&mut self, compression: u16) {
        if self.buffer.is_empty() {
            return;
        }
        let reverse = USE_ALTERNATING_SORT && self.reverse_merge;
        self.buffer.extend(self.compressed.drain(..));
        if reverse {
            self.buffer.sort_by(|a, b| centroid_cmp(b, a));
        } else {
            self.buffer.sort_by(centroid_cmp);
        }
        self.compressed_weight += self.buffered_weight;
        self.buffered_weight = 0;

        let total_weight = self.compressed_weight as f64;
        let normalizer = scale_function::normalizer(f64::from(compression), total_weight);
        let mut q_limit =
            scale_function::q(scale_function::k(0.0, normalizer) + 1.0, normalizer);

        let len = self.buffer.len();
        let mut num_merged = 1;
        self.compressed.push(self.buffer[0]);
        let mut weight_so_far = 0.0;
        for i in 1..len {
            let incoming = self.buffer[i];
            let current = self.compressed[num_merged - 1];
            let proposed_weight = (current.weight + incoming.weight) as f64;
            let merge_into_current = if i == 1 || i == len - 1 {
                // the extreme clusters stay unmerged so singleton tails survive
                false
            } else if incoming.mean == current.mean {
                true
            } else if USE_WEIGHT_LIMIT {
                let q0 = weight_so_far / total_weight;
                let q2 = (weight_so_far + proposed_weight) / total_weight;
                proposed_weight
                    <= total_weight
                        * scale_function::max(q0, normalizer)
                            .min(scale_function::max(q2, normalizer))
            } else {
                weight_so_far + proposed_weight <= total_weight * q_limit
            };
            if merge_into_current {
                self.compressed[num_merged - 1].add(incoming);
            } else {
                weight_so_far += current.weight as f64;
                if !USE_WEIGHT_LIMIT {
                    q_limit = scale_function::q(
                        scale_function::k(weight_so_far / total_weight, normalizer) + 1.0,
                        normalizer,
                    );
                }
                self.compressed.push(incoming);
                num_merged += 1;
            }
        }
        self.buffer.clear();

        if reverse {
            self.compressed.reverse();
        }
        if self.compressed[0].mean < self.min {
            self.min = self.compressed[0].mean;
        }
        let last_mean = self.compressed[num_merged - 1].mean;
        if self.max < last_mean {
            self.max = last_mean;
        }
        if USE_ALTERNATING_SORT {
            self.reverse_merge = !self.reverse_merge;
        }
    }

    fn make(
        k: u16,
        reverse_merge: bool,
        min: F,
        max: F,
        compressed: Vec<Centroid<F>>,
        compressed_weight: u64,
        buffer: Vec<Centroid<F>>,
        buffered_weight: u64,
    ) -> Self {
        let fudge = if USE_WEIGHT_LIMIT {
            if k < 30 { 30 } else { 10 }
        } else {
            0
        };
        let mut centroids_capacity = k as usize * 2 + fudge;
        let mut buffer_capacity = BUFFER_MULTIPLIER * centroids_capacity;
        let scale = if USE_TWO_LEVEL_COMPRESSION {
            (buffer_capacity as f64 / centroids_capacity as f64 - 1.0).max(1.0)
        } else {
            1.0
        };
        let internal_k =
            ((scale.sqrt() * f64::from(k)).ceil() as u32).min(u32::from(u16::MAX)) as u16;
        if centroids_capacity < internal_k as usize + fudge {
            centroids_capacity = internal_k as usize + fudge;
        }
        if buffer_capacity < 2 * centroids_capacity {
            buffer_capacity = 2 * centroids_capacity;
        }

        let mut compressed = compressed;
        compressed.reserve(centroids_capacity.saturating_sub(compressed.len()));
        let mut buffer = buffer;
        buffer.reserve(buffer_capacity.saturating_sub(buffer.len()));

        TDigest {
            k,
            internal_k,
            reverse_merge,
            min,
            max,
            compressed,
            compressed_weight,
            buffer,
            buffered_weight,
            buffer_capacity,
        }
    }
}

// Serialization.
//
// Native layout is little-endian: preamble longs, serial version, sketch
// type, flags, k, reserved, then for a non-empty digest the centroid count,
// buffered count (always 0), total weight, min, max, all means in ascending
// order and all weights in the same order.
#[allow(private_bounds)]
impl<F: DigestValue> TDigest<F> {
    /// Serializes this digest to bytes, preceded by a zeroed header of the
    /// requested size for the caller's own use.
    pub fn serialize(&mut self, header_size: usize) -> Result<Vec<u8>, Error> {
        self.compress();
        let size = self.serialized_size_bytes();
        let total = header_size.checked_add(size).ok_or_else(|| {
            Error::capacity(format!(
                "serialized size overflows: header {header_size} plus digest {size}"
            ))
        })?;
        let mut bytes = Vec::with_capacity(total);
        bytes.resize(header_size, 0);
        self.write_digest(&mut bytes)?;
        Ok(bytes)
    }

    /// Serializes this digest into the given stream.
    pub fn serialize_into<W: Write>(&mut self, writer: &mut W) -> Result<(), Error> {
        self.compress();
        self.write_digest(writer)
    }

    /// Deserializes a digest from bytes.
    ///
    /// Also accepts the big-endian format of the t-digest reference
    /// implementation, selected by its sketch type byte (1 for the
    /// double-precision layout, 2 for the single-precision one). A digest
    /// read that way serializes in the native format from then on.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Self::deserialize_from(&mut Cursor::new(bytes))
    }

    /// Deserializes a digest from the given stream.
    pub fn deserialize_from<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let preamble_longs = reader
            .read_u8()
            .map_err(|e| Error::read_failed("preamble_longs", e))?;
        let serial_version = reader
            .read_u8()
            .map_err(|e| Error::read_failed("serial_version", e))?;
        let sketch_type = reader
            .read_u8()
            .map_err(|e| Error::read_failed("sketch_type", e))?;
        if sketch_type != SKETCH_TYPE {
            if (sketch_type == COMPAT_DOUBLE || sketch_type == COMPAT_FLOAT)
                && serial_version == COMPAT_SERIAL_VERSION
            {
                return Self::deserialize_compat(reader, sketch_type);
            }
            return Err(Error::invalid_sketch_type(SKETCH_TYPE, sketch_type));
        }
        if serial_version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                SERIAL_VERSION,
                serial_version,
            ));
        }
        let flags = reader.read_u8().map_err(|e| Error::read_failed("flags", e))?;
        let k = reader
            .read_u16::<LE>()
            .map_err(|e| Error::read_failed("k", e))?;
        let _reserved = reader
            .read_u16::<LE>()
            .map_err(|e| Error::read_failed("reserved", e))?;
        if k < MIN_K {
            return Err(Error::deserial(format!(
                "k must be at least {MIN_K}, got {k}"
            )));
        }
        let is_empty = (flags & FLAG_IS_EMPTY) != 0;
        let reverse_merge = (flags & FLAG_REVERSE_MERGE) != 0;
        let expected_preamble_longs = if is_empty {
            PREAMBLE_LONGS_EMPTY
        } else {
            PREAMBLE_LONGS_NON_EMPTY
        };
        if preamble_longs != expected_preamble_longs {
            return Err(Error::invalid_preamble_longs(
                expected_preamble_longs,
                preamble_longs,
            ));
        }
        if is_empty {
            return Ok(Self::make(
                k,
                reverse_merge,
                F::from_f64(f64::INFINITY),
                F::from_f64(f64::NEG_INFINITY),
                Vec::new(),
                0,
                Vec::new(),
                0,
            ));
        }

        let num_centroids = reader
            .read_u32::<LE>()
            .map_err(|e| Error::read_failed("num_centroids", e))?
            as usize;
        let num_buffered = reader
            .read_u32::<LE>()
            .map_err(|e| Error::read_failed("num_buffered", e))?;
        if num_buffered != 0 {
            return Err(Error::deserial(format!(
                "buffered count must be 0 on the wire, got {num_buffered}"
            )));
        }
        if num_centroids == 0 {
            return Err(Error::deserial(
                "a non-empty digest must have at least one centroid",
            ));
        }
        let declared_weight = reader
            .read_u64::<LE>()
            .map_err(|e| Error::read_failed("total_weight", e))?;
        let min = F::read_le(reader).map_err(|e| Error::read_failed("min", e))?;
        let max = F::read_le(reader).map_err(|e| Error::read_failed("max", e))?;
        if min.is_nan() || max.is_nan() || max < min {
            return Err(Error::deserial("min/max range is invalid"));
        }

        // preallocation is capped; a lying count runs out of input instead
        let mut means = Vec::with_capacity(num_centroids.min(4096));
        let mut previous = f64::NEG_INFINITY;
        for _ in 0..num_centroids {
            let mean = F::read_le(reader).map_err(|e| Error::read_failed("mean", e))?;
            if mean.is_nan() || mean.to_f64() < previous {
                return Err(Error::deserial("centroid means must be sorted and not NaN"));
            }
            previous = mean.to_f64();
            means.push(mean);
        }
        let mut centroids = Vec::with_capacity(means.len());
        let mut total_weight: u64 = 0;
        for mean in means {
            let weight = reader
                .read_u64::<LE>()
                .map_err(|e| Error::read_failed("weight", e))?;
            if weight == 0 {
                return Err(Error::deserial("centroid weight must be at least 1"));
            }
            total_weight = total_weight
                .checked_add(weight)
                .ok_or_else(|| Error::deserial("total weight overflows"))?;
            centroids.push(Centroid { mean, weight });
        }
        if total_weight != declared_weight {
            return Err(Error::deserial(format!(
                "declared total weight {declared_weight} does not match centroid weights {total_weight}"
            )));
        }
        Ok(Self::make(
            k,
            reverse_merge,
            min,
            max,
            centroids,
            total_weight,
            Vec::new(),
            0,
        ))
    }

    /// Reads the big-endian layout of the reference implementation. Both
    /// precisions can be read into either digest type; centroid weights are
    /// stored as floating point there and truncate to integers here.
    fn deserialize_compat<R: Read>(reader: &mut R, sketch_type: u8) -> Result<Self, Error> {
        let _unused = reader
            .read_u8()
            .map_err(|e| Error::read_failed("compat unused", e))?;
        let min = reader
            .read_f64::<BE>()
            .map_err(|e| Error::read_failed("compat min", e))?;
        let max = reader
            .read_f64::<BE>()
            .map_err(|e| Error::read_failed("compat max", e))?;
        let compression = if sketch_type == COMPAT_DOUBLE {
            reader
                .read_f64::<BE>()
                .map_err(|e| Error::read_failed("compat compression", e))?
        } else {
            f64::from(
                reader
                    .read_f32::<BE>()
                    .map_err(|e| Error::read_failed("compat compression", e))?,
            )
        };
        if !compression.is_finite()
            || compression < f64::from(MIN_K)
            || compression > f64::from(u16::MAX)
        {
            return Err(Error::deserial(format!(
                "compression out of range: {compression}"
            )));
        }
        let k = compression as u16;
        let num_centroids = reader
            .read_u32::<BE>()
            .map_err(|e| Error::read_failed("compat num_centroids", e))?
            as usize;
        if num_centroids == 0 {
            return Ok(TDigest::new(k));
        }
        if min.is_nan() || max.is_nan() || max < min {
            return Err(Error::deserial("min/max range is invalid"));
        }

        let mut centroids = Vec::with_capacity(num_centroids.min(4096));
        let mut total_weight: u64 = 0;
        let mut previous = f64::NEG_INFINITY;
        for _ in 0..num_centroids {
            let (weight, mean) = if sketch_type == COMPAT_DOUBLE {
                (
                    reader
                        .read_f64::<BE>()
                        .map_err(|e| Error::read_failed("compat weight", e))?,
                    reader
                        .read_f64::<BE>()
                        .map_err(|e| Error::read_failed("compat mean", e))?,
                )
            } else {
                (
                    f64::from(
                        reader
                            .read_f32::<BE>()
                            .map_err(|e| Error::read_failed("compat weight", e))?,
                    ),
                    f64::from(
                        reader
                            .read_f32::<BE>()
                            .map_err(|e| Error::read_failed("compat mean", e))?,
                    ),
                )
            };
            if mean.is_nan() || mean < previous {
                return Err(Error::deserial("centroid means must be sorted and not NaN"));
            }
            if weight.is_nan() || weight < 1.0 {
                return Err(Error::deserial("centroid weight must be at least 1"));
            }
            previous = mean;
            total_weight = total_weight
                .checked_add(weight as u64)
                .ok_or_else(|| Error::deserial("total weight overflows"))?;
            centroids.push(Centroid {
                mean: F::from_f64(mean),
                weight: weight as u64,
            });
        }
        Ok(Self::make(
            k,
            false,
            F::from_f64(min),
            F::from_f64(max),
            centroids,
            total_weight,
            Vec::new(),
            0,
        ))
    }

    fn serialized_size_bytes(&self) -> usize {
        if self.is_empty() {
            return EMPTY_SIZE_BYTES;
        }
        DATA_START + (2 + self.compressed.len()) * F::SERIALIZED_SIZE + self.compressed.len() * 8
    }

    fn write_digest<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        debug_assert!(self.buffer.is_empty(), "buffer must be drained first");
        let num_centroids = u32::try_from(self.compressed.len()).map_err(|_| {
            Error::capacity(format!(
                "too many centroids to serialize: {}",
                self.compressed.len()
            ))
        })?;

        let is_empty = self.is_empty();
        let preamble_longs = if is_empty {
            PREAMBLE_LONGS_EMPTY
        } else {
            PREAMBLE_LONGS_NON_EMPTY
        };
        let mut flags = 0;
        if is_empty {
            flags |= FLAG_IS_EMPTY;
        }
        if self.reverse_merge {
            flags |= FLAG_REVERSE_MERGE;
        }

        writer.write_u8(preamble_longs).map_err(Error::write_failed)?;
        writer.write_u8(SERIAL_VERSION).map_err(Error::write_failed)?;
        writer.write_u8(SKETCH_TYPE).map_err(Error::write_failed)?;
        writer.write_u8(flags).map_err(Error::write_failed)?;
        writer.write_u16::<LE>(self.k).map_err(Error::write_failed)?;
        writer.write_u16::<LE>(0).map_err(Error::write_failed)?; // reserved
        if is_empty {
            return Ok(());
        }

        writer
            .write_u32::<LE>(num_centroids)
            .map_err(Error::write_failed)?;
        writer.write_u32::<LE>(0).map_err(Error::write_failed)?; // buffered count
        writer
            .write_u64::<LE>(self.compressed_weight)
            .map_err(Error::write_failed)?;
        self.min.write_le(writer).map_err(Error::write_failed)?;
        self.max.write_le(writer).map_err(Error::write_failed)?;
        for centroid in &self.compressed {
            centroid.mean.write_le(writer).map_err(Error::write_failed)?;
        }
        for centroid in &self.compressed {
            writer
                .write_u64::<LE>(centroid.weight)
                .map_err(Error::write_failed)?;
        }
        Ok(())
    }
}

fn centroid_cmp<F: DigestValue>(a: &Centroid<F>, b: &Centroid<F>) -> std::cmp::Ordering {
    match a.mean.partial_cmp(&b.mean) {
        Some(order) => order,
        None => unreachable!("NaN values should never be present in centroids"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Centroid<F> {
    pub(crate) mean: F,
    pub(crate) weight: u64,
}

impl<F: DigestValue> Centroid<F> {
    fn add(&mut self, other: Centroid<F>) {
        let total_weight = self.weight + other.weight;
        // incremental form, immune to cancellation when the means are close
        let mean = self.mean.to_f64()
            + (other.weight as f64) * (other.mean.to_f64() - self.mean.to_f64())
                / (total_weight as f64);
        self.mean = F::from_f64(mean);
        self.weight = total_weight;
    }
}

/// Generates cluster sizes proportional to `q*(1-q)`.
///
/// The use of a normalizing function results in a strictly bounded number of
/// clusters no matter how many samples.
///
/// Corresponds to K_2 in the reference implementation
mod scale_function {
    const Q_EPSILON: f64 = 1e-15;

    /// Cluster index for a normalized rank.
    pub(super) fn k(q: f64, normalizer: f64) -> f64 {
        let q = q.clamp(Q_EPSILON, 1.0 - Q_EPSILON);
        (q / (1.0 - q)).ln() * normalizer
    }

    /// Normalized rank at a cluster index.
    pub(super) fn q(k: f64, normalizer: f64) -> f64 {
        let w = (k / normalizer).exp();
        w / (1.0 + w)
    }

    /// Maximum fraction of total weight a cluster near rank `q` may absorb.
    pub(super) fn max(q: f64, normalizer: f64) -> f64 {
        q * (1.0 - q) / normalizer
    }

    pub(super) fn normalizer(compression: f64, n: f64) -> f64 {
        compression / z(compression, n)
    }

    pub(super) fn z(compression: f64, n: f64) -> f64 {
        4.0 * (n / compression).ln() + 24.0
    }
}

fn weighted_average(x1: f64, w1: f64, x2: f64, w2: f64) -> f64 {
    x1 + (x2 - x1) * w2 / (w1 + w2)
}
