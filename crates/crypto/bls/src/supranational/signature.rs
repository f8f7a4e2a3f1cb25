use blst::{
    BLST_ERROR,
    min_pk::{
        AggregateSignature as BlstAggregateSignature, PublicKey as BlstPublicKey,
        Signature as BlstSignature,
    },
};
use ssz_types::FixedVector;

use crate::{
    PublicKey,
    constants::DST,
    errors::BLSError,
    signature::BLSSignature,
    traits::{Aggregatable, Verifiable},
};

impl BLSSignature {
    pub fn to_blst_signature(&self) -> Result<BlstSignature, BLSError> {
        BlstSignature::from_bytes(self.to_bytes()).map_err(|_| BLSError::InvalidSignature)
    }
}

impl From<BlstSignature> for BLSSignature {
    fn from(value: BlstSignature) -> Self {
        BLSSignature {
            inner: FixedVector::from(value.to_bytes().to_vec()),
        }
    }
}

fn to_blst_public_keys(public_keys: &[&PublicKey]) -> Result<Vec<BlstPublicKey>, BLSError> {
    public_keys
        .iter()
        .map(|public_key| public_key.to_blst_public_key())
        .collect()
}

impl Verifiable for BLSSignature {
    type Error = BLSError;

    fn verify(&self, public_key: &PublicKey, message: &[u8]) -> Result<bool, BLSError> {
        let signature = self.to_blst_signature()?;
        let public_key = public_key.to_blst_public_key()?;

        Ok(
            signature.verify(true, message, DST, &[], &public_key, false)
                == BLST_ERROR::BLST_SUCCESS,
        )
    }

    fn fast_aggregate_verify<'a, P>(
        &self,
        public_keys: P,
        message: &[u8],
    ) -> Result<bool, BLSError>
    where
        P: AsRef<[&'a PublicKey]>,
    {
        let public_keys = public_keys.as_ref();
        if public_keys.is_empty() {
            return Ok(false);
        }
        let signature = self.to_blst_signature()?;
        let public_keys = to_blst_public_keys(public_keys)?;

        Ok(signature.fast_aggregate_verify(
            true,
            message,
            DST,
            &public_keys.iter().collect::<Vec<_>>(),
        ) == BLST_ERROR::BLST_SUCCESS)
    }

    fn aggregate_verify(
        &self,
        public_keys: &[&PublicKey],
        messages: &[&[u8]],
    ) -> Result<bool, BLSError> {
        if public_keys.is_empty() || public_keys.len() != messages.len() {
            return Ok(false);
        }
        let signature = self.to_blst_signature()?;
        let public_keys = to_blst_public_keys(public_keys)?;

        Ok(signature.aggregate_verify(
            true,
            messages,
            DST,
            &public_keys.iter().collect::<Vec<_>>(),
            false,
        ) == BLST_ERROR::BLST_SUCCESS)
    }
}

impl Aggregatable<BLSSignature> for BLSSignature {
    type Error = BLSError;

    fn aggregate(signatures: &[&BLSSignature]) -> Result<BLSSignature, BLSError> {
        if signatures.is_empty() {
            return Err(BLSError::EmptyAggregation);
        }
        let signatures = signatures
            .iter()
            .map(|signature| signature.to_blst_signature())
            .collect::<Result<Vec<_>, _>>()?;
        let aggregate_signature =
            BlstAggregateSignature::aggregate(&signatures.iter().collect::<Vec<_>>(), true)
                .map_err(|err| BLSError::BlstError(format!("{err:?}")))?;
        Ok(BLSSignature::from(aggregate_signature.to_signature()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{PrivateKey, traits::Signable};

    fn keypair(seed: u8) -> (PrivateKey, PublicKey) {
        let private_key = PrivateKey::key_gen(&[seed; 32]).unwrap();
        let public_key = private_key.public_key().unwrap();
        (private_key, public_key)
    }

    #[test]
    fn test_sign_and_verify() {
        let (private_key, public_key) = keypair(1);
        let signature = private_key.sign(b"attest").unwrap();

        assert!(signature.verify(&public_key, b"attest").unwrap());
        assert!(!signature.verify(&public_key, b"other").unwrap());

        let (_, other_public_key) = keypair(2);
        assert!(!signature.verify(&other_public_key, b"attest").unwrap());
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(8)]
    fn test_fast_aggregate_verify(#[case] signers: u8) {
        let message = b"same message for everyone";
        let keys = (1..=signers).map(keypair).collect::<Vec<_>>();
        let signatures = keys
            .iter()
            .map(|(private_key, _)| private_key.sign(message).unwrap())
            .collect::<Vec<_>>();
        let aggregate =
            BLSSignature::aggregate(&signatures.iter().collect::<Vec<_>>()).unwrap();
        let public_keys = keys.iter().map(|(_, public_key)| public_key).collect::<Vec<_>>();

        assert!(aggregate.fast_aggregate_verify(&public_keys, message).unwrap());
        assert!(
            !aggregate
                .fast_aggregate_verify(&public_keys[1..], message)
                .unwrap()
        );
    }

    #[test]
    fn test_aggregate_verify_distinct_messages() {
        let (key_1, public_key_1) = keypair(4);
        let (key_2, public_key_2) = keypair(5);
        let signature_1 = key_1.sign(b"first").unwrap();
        let signature_2 = key_2.sign(b"second").unwrap();
        let aggregate = BLSSignature::aggregate(&[&signature_1, &signature_2]).unwrap();

        assert!(
            aggregate
                .aggregate_verify(&[&public_key_1, &public_key_2], &[b"first".as_slice(), b"second".as_slice()])
                .unwrap()
        );
        assert!(
            !aggregate
                .aggregate_verify(&[&public_key_1, &public_key_2], &[b"second".as_slice(), b"first".as_slice()])
                .unwrap()
        );
    }

    #[test]
    fn test_empty_inputs() {
        let (private_key, _) = keypair(6);
        let signature = private_key.sign(b"message").unwrap();
        assert!(
            !signature
                .fast_aggregate_verify(Vec::<&PublicKey>::new(), b"message")
                .unwrap()
        );
        assert_eq!(
            BLSSignature::aggregate(&[]),
            Err(BLSError::EmptyAggregation)
        );
    }

    #[test]
    fn test_zero_signature_is_rejected() {
        let (_, public_key) = keypair(7);
        assert_eq!(
            BLSSignature::default().verify(&public_key, b"message"),
            Err(BLSError::InvalidSignature)
        );
    }
}
