//! Pluggable proof verification for deployments that finalize messages with
//! light-client proofs instead of validator attestations

use crate::MessageId;

/// External proof-verification capability. The bridge treats the proof as
/// opaque bytes; choosing a scheme is up to the implementation.
pub trait ProofVerifier: Send + Sync {
    fn verify_proof(&self, message_id: &MessageId, proof: &[u8]) -> bool;
}

impl<F> ProofVerifier for F
where
    F: Fn(&MessageId, &[u8]) -> bool + Send + Sync,
{
    fn verify_proof(&self, message_id: &MessageId, proof: &[u8]) -> bool {
        self(message_id, proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_verifier() {
        let verifier = |id: &MessageId, proof: &[u8]| proof == id.as_bytes();
        let id = MessageId([5; 32]);
        assert!(verifier.verify_proof(&id, &[5; 32]));
        assert!(!verifier.verify_proof(&id, b"forged"));
    }
}
