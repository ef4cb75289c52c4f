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

//! Binary serialization format constants for the t-Digest sketch.
//!
//! The native layout is little-endian. A digest always drains its buffer
//! before writing, so the on-wire buffered count is zero.

/// Preamble longs for an empty digest.
pub const PREAMBLE_LONGS_EMPTY: u8 = 1;
/// Preamble longs for a non-empty digest.
pub const PREAMBLE_LONGS_NON_EMPTY: u8 = 2;

/// Serialization version of the native format.
pub const SERIAL_VERSION: u8 = 1;

/// Sketch type byte of the native format.
pub const SKETCH_TYPE: u8 = 20;

/// Sketch type byte of the reference implementation's double-precision
/// format (big-endian payload).
pub const COMPAT_DOUBLE: u8 = 1;
/// Sketch type byte of the reference implementation's single-precision
/// format (big-endian payload).
pub const COMPAT_FLOAT: u8 = 2;
/// Serial version byte of the compat formats, which predate versioning.
pub const COMPAT_SERIAL_VERSION: u8 = 0;

/// Flag indicating the digest is empty.
pub const FLAG_IS_EMPTY: u8 = 1 << 0;
/// Flag carrying the alternating-sort direction of the next compression.
pub const FLAG_REVERSE_MERGE: u8 = 1 << 1;

/// Serialized size of an empty digest in bytes: the preamble only.
pub const EMPTY_SIZE_BYTES: usize = 8;
/// Offset of the centroid data section for a non-empty digest: preamble,
/// centroid count (u32), buffered count (u32), total weight (u64).
pub const DATA_START: usize = 24;
