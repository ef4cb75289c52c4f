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

use crate::sketch::Centroid;
use crate::sketch::DigestValue;
use crate::sketch::TDigest;

impl<F: DigestValue> IntoIterator for TDigest<F> {
    type Item = (F, u64);
    type IntoIter = TDigestIntoIter<F>;

    fn into_iter(mut self) -> Self::IntoIter {
        // integrate the buffer so the iteration covers all data
        self.compress();
        TDigestIntoIter {
            centroids: self.into_centroids(),
            index: 0,
        }
    }
}

/// Iterator over the centroids of a TDigest as `(mean, weight)` pairs,
/// in ascending order of mean.
#[allow(private_bounds)]
pub struct TDigestIntoIter<F: DigestValue> {
    centroids: Vec<Centroid<F>>,
    index: usize,
}

impl<F: DigestValue> Iterator for TDigestIntoIter<F> {
    type Item = (F, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index < self.centroids.len() {
            let centroid = self.centroids[self.index];
            self.index += 1;
            Some((centroid.mean, centroid.weight))
        } else {
            None
        }
    }
}

impl<F: DigestValue> FromIterator<(F, u64)> for TDigest<F> {
    fn from_iter<I: IntoIterator<Item = (F, u64)>>(iter: I) -> Self {
        let mut digest = TDigest::default();
        for (mean, weight) in iter {
            digest.append_buffered(mean, weight);
        }
        digest
    }
}
