use anyhow::{bail, Result};

/// A modulo shard of the record id space: owns every id with
/// `id mod count == key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Partition {
    key: u32,
    count: u32,
}

impl Partition {
    pub fn new(key: u32, count: u32) -> Result<Self> {
        if count == 0 {
            bail!("Partition count must be at least 1");
        }
        if key >= count {
            bail!("Partition key {} out of range for {} partitions", key, count);
        }
        Ok(Self { key, count })
    }

    /// Every partition of a `count`-way split.
    pub fn all(count: u32) -> Result<Vec<Self>> {
        (0..count.max(1))
            .map(|key| Self::new(key, count))
            .collect()
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn owns(&self, record_id: i64) -> bool {
        record_id.rem_euclid(self.count as i64) == self.key as i64
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.key, self.count)
    }
}
