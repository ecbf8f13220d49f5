//! Running median over a small bounded domain of integer values.
//!
//! Every value ever inserted lands in a histogram bucket. Instead of keeping the
//! values themselves, the tracker remembers which bucket currently holds the
//! median and where inside that bucket the median sits. Each bucket of `f`
//! values is given `2f` positions so that half steps (the median falling between
//! two neighbouring values) stay in integer arithmetic.
//!
//! Taking `2 2 2 3 3 3 3 4 5 5 6` as an example, the histogram is
//! `[0, 0, 3, 4, 1, 2, 1]`, the median bucket is `3` and the cursor sits on the
//! fifth of the eight positions of that bucket.
//!
//! A value above the median nudges the cursor up by one position, a value below
//! nudges it down. When the cursor lands exactly on the upper edge of its
//! bucket the median is the average of this bucket and the next non-empty one;
//! when it moves past an edge the median moves to the neighbouring non-empty
//! bucket. Updates are O(1) except for the scan to that neighbour, which is
//! bounded by the histogram width rather than by the number of values seen.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// A median value stored at twice its magnitude so that `.5` results stay integral.
///
/// Serialised as its decimal value (`2.5`), not the doubled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct HalfValue(u16);

impl HalfValue {
    /// Builds a value from its doubled representation.
    #[must_use]
    pub const fn from_halves(halves: u16) -> Self {
        Self(halves)
    }

    /// Builds the value `whole.0`.
    #[must_use]
    pub const fn whole(whole: u8) -> Self {
        Self(whole as u16 * 2)
    }

    /// Returns the doubled representation.
    #[must_use]
    pub const fn halves(self) -> u16 {
        self.0
    }

    /// Returns the value as a float, for reporting.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 2.0
    }

    fn from_bucket(bucket: usize) -> Self {
        Self::from_pair(bucket, bucket)
    }

    fn from_pair(low: usize, high: usize) -> Self {
        // Buckets never exceed the u8 unique-count domain, so the sum fits.
        Self((low + high) as u16)
    }
}

impl From<HalfValue> for f64 {
    fn from(value: HalfValue) -> Self {
        value.as_f64()
    }
}

impl TryFrom<f64> for HalfValue {
    type Error = TallyError;

    fn try_from(value: f64) -> Result<Self> {
        let halves = value * 2.0;
        if halves.fract() != 0.0 || !(0.0..=f64::from(u16::MAX)).contains(&halves) {
            return Err(TallyError::Serialization(format!(
                "{value} is not a non-negative multiple of 0.5"
            )));
        }
        Ok(Self(halves as u16))
    }
}

impl fmt::Display for HalfValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fraction = if self.0 % 2 == 0 { 0 } else { 5 };
        write!(f, "{}.{}", self.0 / 2, fraction)
    }
}

/// Scan direction used by [`next_non_empty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards larger bucket indices.
    Up,
    /// Towards smaller bucket indices.
    Down,
}

/// Returns the first bucket at or beyond `from` (in `direction`) holding at least one value.
#[must_use]
pub fn next_non_empty(histogram: &[u64], from: usize, direction: Direction) -> Option<usize> {
    match direction {
        Direction::Up => histogram
            .iter()
            .enumerate()
            .skip(from)
            .find(|&(_, &count)| count != 0)
            .map(|(idx, _)| idx),
        Direction::Down => {
            let upper = from.checked_add(1)?.min(histogram.len());
            histogram[..upper].iter().rposition(|&count| count != 0)
        }
    }
}

/// Position of the running median within the histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedianState {
    /// Bucket the median currently occupies (the lower one when between two buckets).
    pub median_idx: usize,
    /// Doubled-scale cursor inside the median bucket, in `1..=2 * histogram[median_idx]`.
    pub group_idx: u64,
}

/// Incremental running-median tracker over values in `0..=max_value`.
#[derive(Debug, Clone)]
pub struct RunningMedian {
    histogram: Vec<u64>,
    state: Option<MedianState>,
    records: u64,
    current: Option<HalfValue>,
}

impl RunningMedian {
    /// Creates an empty tracker accepting values in `0..=max_value`.
    #[must_use]
    pub fn new(max_value: usize) -> Self {
        Self {
            histogram: vec![0; max_value + 1],
            state: None,
            records: 0,
            current: None,
        }
    }

    /// Largest value accepted by [`RunningMedian::insert`].
    #[must_use]
    pub fn max_value(&self) -> usize {
        self.histogram.len() - 1
    }

    /// Per-value counts observed so far.
    #[must_use]
    pub fn histogram(&self) -> &[u64] {
        &self.histogram
    }

    /// Number of values inserted so far.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Current cursor position, `None` before the first insertion.
    #[must_use]
    pub fn state(&self) -> Option<MedianState> {
        self.state
    }

    /// Median after the most recent insertion.
    #[must_use]
    pub fn current(&self) -> Option<HalfValue> {
        self.current
    }

    /// Inserts `value` and returns the median of every value inserted so far.
    ///
    /// Values above [`RunningMedian::max_value`] are rejected without modifying the tracker.
    pub fn insert(&mut self, value: usize) -> Result<HalfValue> {
        let max = self.max_value();
        if value > max {
            return Err(TallyError::CountOutOfRange { value, max });
        }
        self.histogram[value] += 1;
        self.records += 1;

        let median = match self.state {
            None => {
                self.state = Some(MedianState {
                    median_idx: value,
                    group_idx: 1,
                });
                HalfValue::from_bucket(value)
            }
            Some(state) => self.advance(state, value)?,
        };
        self.current = Some(median);
        Ok(median)
    }

    /// Inserts every value in order, appending one median per value to `out`.
    pub fn extend<I>(&mut self, values: I, out: &mut Vec<HalfValue>) -> Result<()>
    where
        I: IntoIterator<Item = usize>,
    {
        let values = values.into_iter();
        out.reserve(values.size_hint().0);
        for value in values {
            out.push(self.insert(value)?);
        }
        Ok(())
    }

    fn advance(&mut self, state: MedianState, value: usize) -> Result<HalfValue> {
        let MedianState {
            median_idx,
            mut group_idx,
        } = state;
        let span = 2 * self.histogram[median_idx];

        let median = if value > median_idx {
            group_idx += 1;
            if group_idx < span {
                HalfValue::from_bucket(median_idx)
            } else {
                let next = self.neighbour(median_idx + 1, Direction::Up)?;
                if group_idx == span {
                    // Cursor sits on the upper edge; it moves once the edge is crossed.
                    self.state = Some(MedianState {
                        median_idx,
                        group_idx,
                    });
                    return Ok(HalfValue::from_pair(median_idx, next));
                }
                self.state = Some(MedianState {
                    median_idx: next,
                    group_idx: 1,
                });
                return Ok(HalfValue::from_bucket(next));
            }
        } else if value < median_idx {
            group_idx -= 1;
            if group_idx > 0 {
                HalfValue::from_bucket(median_idx)
            } else {
                let prev = self.neighbour(median_idx - 1, Direction::Down)?;
                self.state = Some(MedianState {
                    median_idx: prev,
                    group_idx: 2 * self.histogram[prev],
                });
                return Ok(HalfValue::from_pair(prev, median_idx));
            }
        } else {
            group_idx += 1;
            HalfValue::from_bucket(median_idx)
        };

        self.state = Some(MedianState {
            median_idx,
            group_idx,
        });
        Ok(median)
    }

    fn neighbour(&self, from: usize, direction: Direction) -> Result<usize> {
        // The value that pushed the cursor across the edge lives in that direction,
        // so a non-empty bucket always exists.
        next_non_empty(&self.histogram, from, direction).ok_or_else(|| {
            TallyError::Internal(format!(
                "no non-empty histogram bucket {direction:?} from {from}"
            ))
        })
    }
}
