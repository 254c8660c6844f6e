use std::{
    borrow::Borrow,
    hash::{DefaultHasher, Hash, Hasher},
    marker::PhantomData,
};

/// A fixed table of async mutexes; a key locks the partition it hashes to.
///
/// Two keys may share a partition, in which case they serialize against each
/// other. Holding a guard across `.await` points is fine.
pub struct AsyncPartitionedMutex<K, V = (), H = DefaultHasher>
where
    K: Hash + Eq,
    H: Hasher + Default,
{
    partitions: Box<[tokio::sync::Mutex<V>]>,
    _hasher: PhantomData<H>,
    _key: PhantomData<fn(&K)>,
}

pub const DEFAULT_NUM_PARTITIONS: usize = 16 * 16;

impl<K, V, H> AsyncPartitionedMutex<K, V, H>
where
    K: Hash + Eq,
    H: Hasher + Default,
    V: Clone,
{
    pub fn new(default_value: V) -> Self {
        Self::with_partitions(DEFAULT_NUM_PARTITIONS, default_value)
    }

    pub fn with_partitions(num_partitions: usize, default_value: V) -> Self {
        let partitions = (0..num_partitions.max(1))
            .map(|_| tokio::sync::Mutex::new(default_value.clone()))
            .collect::<Vec<_>>();
        Self {
            partitions: partitions.into_boxed_slice(),
            _hasher: PhantomData,
            _key: PhantomData,
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    fn partition<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        let mut hasher = H::default();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    pub async fn lock<Q>(&self, key: &Q) -> tokio::sync::MutexGuard<'_, V>
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.partitions[self.partition(key)].lock().await
    }
}
