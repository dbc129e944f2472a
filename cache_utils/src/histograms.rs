use core::cmp::min;
use core::ops::Index;

/// Latency histogram with `N` buckets of `WIDTH` cycles each.
///
/// Times past the last bucket are counted in the last bucket, so the total
/// always equals the number of samples added.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticHistogram<const WIDTH: u64, const N: usize> {
    data: [u32; N],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramCumSumItem {
    pub count: u32,
    pub cumulative_count: u32,
}

#[derive(Debug, Clone)]
pub struct StaticHistogramCumSum<const WIDTH: u64, const N: usize> {
    data: [HistogramCumSumItem; N],
}

impl<const WIDTH: u64, const N: usize> StaticHistogram<WIDTH, N> {
    pub fn empty() -> Self {
        Self { data: [0; N] }
    }

    pub fn bucket_of(time: u64) -> usize {
        min(N as u64 - 1, time / WIDTH) as usize
    }

    pub fn bucket_start(bucket: usize) -> u64 {
        bucket as u64 * WIDTH
    }

    pub fn add(&mut self, time: u64) {
        self.data[Self::bucket_of(time)] += 1;
    }

    pub fn total(&self) -> u32 {
        self.data.iter().sum()
    }

    /// Bucket holding the most samples, lowest one on ties.
    pub fn mode(&self) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (i, &count) in self.data.iter().enumerate() {
            if count > 0 && best.map_or(true, |(_, c)| count > c) {
                best = Some((i, count));
            }
        }
        best.map(|(i, _)| i)
    }

    /// First bucket with more than `noise` samples.
    pub fn first_above(&self, noise: u32) -> Option<usize> {
        self.data.iter().position(|&count| count > noise)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.data
            .iter()
            .enumerate()
            .map(|(i, &count)| (Self::bucket_start(i), count))
    }
}

impl<const WIDTH: u64, const N: usize> Default for StaticHistogram<WIDTH, N> {
    fn default() -> Self {
        StaticHistogram::empty()
    }
}

impl<const WIDTH: u64, const N: usize> Index<usize> for StaticHistogram<WIDTH, N> {
    type Output = u32;

    fn index(&self, bucket: usize) -> &Self::Output {
        &self.data[bucket]
    }
}

impl<const WIDTH: u64, const N: usize> From<&StaticHistogram<WIDTH, N>>
    for StaticHistogramCumSum<WIDTH, N>
{
    fn from(value: &StaticHistogram<WIDTH, N>) -> Self {
        let mut cumul = 0;
        let mut r = Self {
            data: [HistogramCumSumItem {
                count: 0,
                cumulative_count: 0,
            }; N],
        };
        for (i, &count) in value.data.iter().enumerate() {
            cumul += count;
            r.data[i] = HistogramCumSumItem {
                count,
                cumulative_count: cumul,
            };
        }
        r
    }
}

impl<const WIDTH: u64, const N: usize> Index<usize> for StaticHistogramCumSum<WIDTH, N> {
    type Output = HistogramCumSumItem;

    fn index(&self, bucket: usize) -> &Self::Output {
        &self.data[bucket]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Hist = StaticHistogram<5, 10>;

    #[test]
    fn overflow_lands_in_last_bucket() {
        let mut h = Hist::empty();
        h.add(0);
        h.add(4);
        h.add(5);
        h.add(10_000);
        assert_eq!(h[0], 2);
        assert_eq!(h[1], 1);
        assert_eq!(h[9], 1);
        assert_eq!(h.total(), 4);
    }

    #[test]
    fn mode_and_first_above() {
        let mut h = Hist::empty();
        assert_eq!(h.mode(), None);
        for t in [12, 13, 14, 31, 32] {
            h.add(t);
        }
        assert_eq!(h.mode(), Some(2));
        assert_eq!(h.first_above(1), Some(2));
        assert_eq!(h.first_above(0), Some(2));
        assert_eq!(Hist::bucket_start(6), 30);
    }

    #[test]
    fn cumulative_sum() {
        let mut h = Hist::empty();
        for t in [0, 7, 8, 21] {
            h.add(t);
        }
        let c = StaticHistogramCumSum::from(&h);
        assert_eq!(c[0].cumulative_count, 1);
        assert_eq!(c[1].count, 2);
        assert_eq!(c[4].cumulative_count, 4);
        assert_eq!(c[9].cumulative_count, 4);
    }
}
