use crate::error::ConfigurationError;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the bytes of `identity`.
pub fn fnv1a_32(identity: &str) -> u32 {
    identity.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Routes identities to a fixed, ordered set of shards.
///
/// The topology is fixed for the life of the router. Routing is `hash mod n`,
/// so changing the number of shards remaps most identities.
#[derive(Debug)]
pub struct ShardRouter<S> {
    shards: Vec<S>,
}

impl<S> ShardRouter<S> {
    /// # Errors
    ///
    /// Returns [`ConfigurationError::EmptyTopology`] if `shards` is empty.
    pub fn new(shards: Vec<S>) -> Result<Self, ConfigurationError> {
        if shards.is_empty() {
            return Err(ConfigurationError::EmptyTopology);
        }
        Ok(Self { shards })
    }

    /// The index of the shard owning `identity`.
    #[inline]
    pub fn select(&self, identity: &str) -> usize {
        // u32 -> usize is lossless on every supported target
        fnv1a_32(identity) as usize % self.shards.len()
    }

    /// The shard owning `identity`.
    #[inline]
    pub fn shard(&self, identity: &str) -> &S {
        &self.shards[self.select(identity)]
    }

    pub fn shards(&self) -> &[S] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Always `false`; an empty router cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}
