//! Multi-granularity resampling of a partitioned series.
//!
//! Each granularity is derived in three explicit steps: build the non-empty
//! buckets, enumerate the bucket extent, then apply the fill policy as a
//! scan over that extent. Nothing depends on hashing or wall-clock time, so
//! the same series always yields the same buckets.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use ohlcv_core::config::ResampleConfig;
use ohlcv_core::{
    day_range_ns, Error, Extent, FillPolicy, Granularity, PartitionedSeries, ResampledBucket,
    Result, Symbol, TimestampNs,
};

use crate::bucket::BucketBuilder;

/// Buckets of one symbol at one granularity, ascending by start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResampledSeries {
    pub symbol: Symbol,
    pub day: NaiveDate,
    pub granularity: Granularity,
    pub buckets: Vec<ResampledBucket>,
}

impl ResampledSeries {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }
}

/// Derives coarser series from a partition.
#[derive(Debug, Clone)]
pub struct Resampler {
    granularities: Vec<Granularity>,
    fill_policy: FillPolicy,
    extent: Extent,
}

impl Resampler {
    /// Granularities are deduplicated and ordered finest first.
    pub fn new(granularities: &[Granularity], fill_policy: FillPolicy, extent: Extent) -> Self {
        let granularities: BTreeSet<Granularity> = granularities.iter().copied().collect();
        Self {
            granularities: granularities.into_iter().collect(),
            fill_policy,
            extent,
        }
    }

    pub fn from_config(config: &ResampleConfig) -> Self {
        Self::new(&config.granularities, config.fill_policy, config.extent)
    }

    pub fn granularities(&self) -> &[Granularity] {
        &self.granularities
    }

    pub fn fill_policy(&self) -> FillPolicy {
        self.fill_policy
    }

    /// One series per granularity, finest first.
    ///
    /// An empty partition yields an empty series for every granularity.
    /// Under [`FillPolicy::ForwardFill`], an empty first bucket in the extent
    /// fails with [`Error::InsufficientSeedData`].
    pub fn resample(&self, series: &PartitionedSeries) -> Result<Vec<ResampledSeries>> {
        self.granularities
            .iter()
            .map(|&granularity| {
                let buckets = resample_granularity(series, granularity, self.fill_policy, self.extent)?;
                debug!(
                    symbol = %series.symbol(),
                    day = %series.day(),
                    %granularity,
                    buckets = buckets.len(),
                    "resampled"
                );
                Ok(ResampledSeries {
                    symbol: series.symbol().clone(),
                    day: series.day(),
                    granularity,
                    buckets,
                })
            })
            .collect()
    }
}

/// Resample `series` at a single granularity.
pub fn resample_granularity(
    series: &PartitionedSeries,
    granularity: Granularity,
    fill_policy: FillPolicy,
    extent: Extent,
) -> Result<Vec<ResampledBucket>> {
    if series.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = BucketBuilder::new(granularity);
    builder.add_records(series.records());
    let observed = builder.finish(series.symbol());

    match fill_policy {
        FillPolicy::Drop => Ok(observed.into_values().collect()),
        FillPolicy::ForwardFill => {
            let starts = bucket_extent(series, granularity, extent)?;
            forward_fill(series.symbol(), granularity, &starts, observed)
        }
    }
}

/// Every bucket start the output must cover, ascending.
pub fn bucket_extent(
    series: &PartitionedSeries,
    granularity: Granularity,
    extent: Extent,
) -> Result<Vec<TimestampNs>> {
    let width = granularity.duration_ns();
    let (first, last) = match extent {
        Extent::Observed => match series.time_extent() {
            Some((first, last)) => (granularity.bucket_start(first), granularity.bucket_start(last)),
            None => return Ok(Vec::new()),
        },
        Extent::Day => {
            let (start, end) = day_range_ns(series.day())?;
            (granularity.bucket_start(start), granularity.bucket_start(end - 1))
        }
    };
    let count = ((last - first) / width + 1) as usize;
    Ok((0..count).map(|i| first + i as i64 * width).collect())
}

/// Emit one bucket per start, carrying the previous close into gaps.
pub fn forward_fill(
    symbol: &Symbol,
    granularity: Granularity,
    starts: &[TimestampNs],
    mut observed: BTreeMap<TimestampNs, ResampledBucket>,
) -> Result<Vec<ResampledBucket>> {
    let mut out = Vec::with_capacity(starts.len());
    let mut carry: Option<f64> = None;
    for &start in starts {
        let bucket = match observed.remove(&start) {
            Some(bucket) => bucket,
            None => {
                let close = carry.ok_or_else(|| Error::InsufficientSeedData {
                    symbol: symbol.to_string(),
                    granularity: granularity.to_string(),
                })?;
                ResampledBucket {
                    symbol: symbol.clone(),
                    granularity,
                    bucket_start: start,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 0,
                }
            }
        };
        carry = Some(bucket.close);
        out.push(bucket);
    }
    if !observed.is_empty() {
        return Err(Error::invalid_series(format!(
            "{symbol} at {granularity}: {} buckets fall outside the extent",
            observed.len()
        )));
    }
    Ok(out)
}
