use std::fmt;

use crate::error::CoreError;
use crate::model::Deal;

/// BLAKE3 digest over the MessagePack encoding of an ordered deal list.
/// Two replicas with equal fingerprints are byte-equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicaFingerprint([u8; 32]);

impl ReplicaFingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ReplicaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicaFingerprint({:02x}{:02x}{:02x}{:02x})", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

pub fn fingerprint(deals: &[Deal]) -> Result<ReplicaFingerprint, CoreError> {
    let bytes = rmp_serde::to_vec(deals).map_err(|e| CoreError::Serialization(e.to_string()))?;
    Ok(ReplicaFingerprint(*blake3::hash(&bytes).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::ids::{ActorId, DealId};
    use crate::model::NewDeal;

    #[test]
    fn fingerprint_tracks_content() {
        let deal = Deal::from_new(DealId::new(), NewDeal::new("North Yard"), ActorId::new(), Timestamp::from_millis(3));
        let a = fingerprint(std::slice::from_ref(&deal)).unwrap();
        let b = fingerprint(&[deal.clone()]).unwrap();
        assert_eq!(a, b);

        let mut renamed = deal;
        renamed.name.push('!');
        assert_ne!(a, fingerprint(&[renamed]).unwrap());
    }
}
