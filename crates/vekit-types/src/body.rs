//! Transaction body and signed-transaction wire codec.
//!
//! Wire format: `RLP([chainTag, blockRef, expiration, clauses, gasPriceCoef, gas,
//! dependsOn, nonce, reserved, signature])`. The unsigned body is the same list
//! without the trailing signature.
//!
//! `reserved` is a list whose first item is the feature bitmap; it is empty when no
//! feature is set. Hashes are blake2b-256.
//!
//! The signature is 65 bytes (`r || s || yParity`) for a self-paid transaction
//! and 130 bytes (`origin || sponsor`) for a delegated one.

use alloy_primitives::{Address, Bytes, Signature, B256, U256};
use alloy_rlp::{BufMut, Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use blake2::{digest::consts::U32, Blake2b, Digest};

use crate::{error::CodecError, ids::TxId};

/// secp256k1 signature: r(32) || s(32) || yParity(1).
pub const SIG_LEN: usize = 65;

/// Feature bit marking a transaction whose gas is paid by a sponsor.
pub const FEATURE_DELEGATED: u64 = 1;

/// Blake2b with a 32-byte digest.
pub fn blake2b256(data: &[u8]) -> B256 {
    B256::from_slice(&Blake2b::<U32>::digest(data))
}

/// Clause as it appears on the wire (no comment or ABI metadata).
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct RawClause {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBody {
    pub chain_tag: u8,
    pub block_ref: u64,
    pub expiration: u32,
    pub clauses: Vec<RawClause>,
    pub gas_price_coef: u8,
    pub gas: u64,
    pub depends_on: Bytes,
    pub nonce: u64,
    pub reserved: Vec<u64>,
}

impl TransactionBody {
    pub fn is_delegated(&self) -> bool {
        self.reserved
            .first()
            .is_some_and(|features| features & FEATURE_DELEGATED != 0)
    }

    pub fn signing_hash(&self) -> B256 {
        blake2b256(&alloy_rlp::encode(self))
    }

    /// Hash the sponsor signs for a delegated transaction sent by `origin`.
    /// Also the transaction id once `origin` is known.
    pub fn delegation_hash(&self, origin: Address) -> B256 {
        let mut preimage = Vec::with_capacity(32 + 20);
        preimage.extend_from_slice(self.signing_hash().as_slice());
        preimage.extend_from_slice(origin.as_slice());
        blake2b256(&preimage)
    }

    fn fields_length(&self) -> usize {
        self.chain_tag.length()
            + self.block_ref.length()
            + self.expiration.length()
            + self.clauses.length()
            + self.gas_price_coef.length()
            + self.gas.length()
            + self.depends_on.length()
            + self.nonce.length()
            + self.reserved.length()
    }

    fn encode_fields(&self, out: &mut dyn BufMut) {
        self.chain_tag.encode(out);
        self.block_ref.encode(out);
        self.expiration.encode(out);
        self.clauses.encode(out);
        self.gas_price_coef.encode(out);
        self.gas.encode(out);
        self.depends_on.encode(out);
        self.nonce.encode(out);
        self.reserved.encode(out);
    }

    fn decode_fields(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        Ok(Self {
            chain_tag: Decodable::decode(buf)?,
            block_ref: Decodable::decode(buf)?,
            expiration: Decodable::decode(buf)?,
            clauses: Decodable::decode(buf)?,
            gas_price_coef: Decodable::decode(buf)?,
            gas: Decodable::decode(buf)?,
            depends_on: Decodable::decode(buf)?,
            nonce: Decodable::decode(buf)?,
            reserved: Decodable::decode(buf)?,
        })
    }
}

impl Encodable for TransactionBody {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.fields_length(),
        }
        .encode(out);
        self.encode_fields(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.fields_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for TransactionBody {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut payload = Header::decode_bytes(buf, true)?;
        let body = Self::decode_fields(&mut payload)?;
        if !payload.is_empty() {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: 0,
                got: payload.len(),
            });
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub body: TransactionBody,
    pub signature: Bytes,
}

impl SignedTransaction {
    pub fn new(body: TransactionBody, signature: impl Into<Bytes>) -> Self {
        Self {
            body,
            signature: signature.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload_length = self.body.fields_length() + self.signature.length();
        let mut out =
            Vec::with_capacity(payload_length + alloy_rlp::length_of_length(payload_length));
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.body.encode_fields(&mut out);
        self.signature.encode(&mut out);
        out
    }

    pub fn encode_hex(&self) -> String {
        format!("0x{}", hex::encode(self.encode()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let rlp = |err: alloy_rlp::Error| CodecError::Rlp(err.to_string());
        let mut buf = bytes;
        let mut payload = Header::decode_bytes(&mut buf, true).map_err(rlp)?;
        if !buf.is_empty() {
            return Err(CodecError::Rlp(format!("{} trailing bytes", buf.len())));
        }
        let body = TransactionBody::decode_fields(&mut payload).map_err(rlp)?;
        let signature = Bytes::decode(&mut payload).map_err(rlp)?;
        if !payload.is_empty() {
            return Err(CodecError::Rlp("unexpected fields after signature".to_string()));
        }
        // A delegated body may carry only the origin signature until the sponsor co-signs.
        let len = signature.len();
        if !(len == SIG_LEN || (body.is_delegated() && len == 2 * SIG_LEN)) {
            return Err(CodecError::SignatureLength(len));
        }
        Ok(Self { body, signature })
    }

    pub fn is_fully_signed(&self) -> bool {
        let expected = if self.body.is_delegated() {
            2 * SIG_LEN
        } else {
            SIG_LEN
        };
        self.signature.len() == expected
    }

    pub fn origin(&self) -> Result<Address, CodecError> {
        let sig = self
            .signature
            .get(..SIG_LEN)
            .ok_or(CodecError::SignatureLength(self.signature.len()))?;
        recover(sig, &self.body.signing_hash())
    }

    /// Sponsor address for a delegated transaction; `None` when self-paid.
    pub fn delegator(&self) -> Result<Option<Address>, CodecError> {
        if !self.body.is_delegated() {
            return Ok(None);
        }
        let origin = self.origin()?;
        let sig = self
            .signature
            .get(SIG_LEN..2 * SIG_LEN)
            .ok_or(CodecError::SignatureLength(self.signature.len()))?;
        recover(sig, &self.body.delegation_hash(origin)).map(Some)
    }

    pub fn id(&self) -> Result<TxId, CodecError> {
        Ok(self.body.delegation_hash(self.origin()?).into())
    }
}

/// Encodes an alloy signature as `r || s || yParity` with parity 0/1.
pub fn signature_bytes(signature: &Signature) -> [u8; SIG_LEN] {
    let mut out = signature.as_bytes();
    out[64] = u8::from(signature.v());
    out
}

fn recover(sig_bytes: &[u8], prehash: &B256) -> Result<Address, CodecError> {
    let sig = Signature::from_bytes_and_parity(&sig_bytes[..64], sig_bytes[64] != 0);
    sig.recover_address_from_prehash(prehash)
        .map_err(|err| CodecError::Recovery(err.to_string()))
}
