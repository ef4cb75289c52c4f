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

//! t-Digest sketch for estimating quantiles and ranks.
//!
//! The t-Digest is a streaming, mergeable summary of a sequence of
//! floating-point values with bounded memory and high accuracy near the
//! tails of the distribution. Values are clustered into centroids whose
//! sizes are bounded by a scale function proportional to `q*(1-q)`, which
//! keeps the extreme clusters small (down to singletons) and lets the
//! middle of the distribution coarsen. See "Computing Extremely Accurate
//! Quantiles Using t-Digests" by Dunning and Ertl.
//!
//! The digest supports single-value updates, digest-to-digest merging,
//! rank and quantile queries, and a little-endian binary format (serial
//! version 1, sketch type 20). The big-endian format of the t-digest
//! reference implementation can also be read.
//!
//! A single digest must not be mutated concurrently; for parallel
//! ingestion, build one digest per thread and merge them at a join point.
//!
//! # Usage
//!
//! ```rust
//! # use tdigest::TDigest;
//! let mut digest = TDigest::new(100);
//! for i in 1..=1000 {
//!     digest.update(i as f64);
//! }
//! let median = digest.quantile(0.5).unwrap();
//! assert!(median > 450.0 && median < 550.0);
//! let rank = digest.rank(900.0).unwrap();
//! assert!(rank > 0.85 && rank < 0.95);
//! ```

pub mod error;

mod iter;
mod serialization;
mod sketch;

pub use self::iter::TDigestIntoIter;
pub use self::sketch::TDigest;

/// Default value of parameter k.
pub const DEFAULT_K: u16 = 100;
/// Minimum value of parameter k.
pub const MIN_K: u16 = 10;
