//! # Value Objects
//!
//! Immutable request values: hashes, chain selectors, block ids, ranges
//! and transaction filters.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::errors::StreamerError;

/// Block height (genesis is 0).
pub type BlockHeight = u64;

/// 32-byte hash in internal byte order.
///
/// Hex rendering uses the node's display order (byte-reversed), which is
/// what block explorers and the full node RPC print.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

/// Block hash.
pub type BlockHash = Hash32;

/// Transaction id.
pub type TxId = Hash32;

impl Hash32 {
    /// All-zero hash (parent of genesis).
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    /// Wrap raw internal-order bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Internal-order bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a display-order hex string.
    pub fn from_display_hex(s: &str) -> Result<Self, StreamerError> {
        let mut bytes = hex::decode(s)
            .map_err(|e| StreamerError::InvalidArgument(format!("bad hash hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(StreamerError::InvalidArgument(format!(
                "hash must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        bytes.reverse();
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    /// Render as display-order hex.
    pub fn to_display_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_display_hex())
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_display_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash32::from_display_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for byte fields carried as plain hex.
pub mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Variable-length byte strings.
    pub mod bytes {
        use super::*;

        /// Serialize bytes as hex.
        pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&hex::encode(value))
        }

        /// Deserialize bytes from hex.
        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
            let s = String::deserialize(deserializer)?;
            hex::decode(s).map_err(serde::de::Error::custom)
        }
    }

    /// Fixed 32-byte fields (nullifiers, commitments, keys).
    pub mod array32 {
        use super::*;

        /// Serialize a 32-byte array as hex.
        pub fn serialize<S: Serializer>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&hex::encode(value))
        }

        /// Deserialize a 32-byte array from hex.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<[u8; 32], D::Error> {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
            <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
        }
    }
}

/// Network served by a full node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network.
    #[default]
    Main,
    /// Public test network.
    Test,
    /// Local regression-test network.
    Regtest,
}

impl Network {
    /// Chain name as reported by the node.
    pub fn chain_name(&self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Test => "test",
            Network::Regtest => "regtest",
        }
    }

    /// Height at which Sapling activated on this network.
    pub fn sapling_activation_height(&self) -> BlockHeight {
        match self {
            Network::Main => 419_200,
            Network::Test => 280_000,
            Network::Regtest => 1,
        }
    }
}

impl FromStr for Network {
    type Err = StreamerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            "regtest" => Ok(Network::Regtest),
            other => Err(StreamerError::InvalidArgument(format!(
                "unknown network: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.chain_name())
    }
}

/// Which chain a call targets. An unset network matches any.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSpec {
    /// Requested network, if the caller cares.
    pub network: Option<Network>,
}

impl ChainSpec {
    /// Chain pinned to one network.
    pub fn for_network(network: Network) -> Self {
        Self {
            network: Some(network),
        }
    }

    /// Check the requested chain against the network this server fronts.
    pub fn check(&self, served: Network) -> Result<(), StreamerError> {
        match self.network {
            Some(requested) if requested != served => Err(StreamerError::InvalidArgument(format!(
                "chain {} requested, server fronts {}",
                requested, served
            ))),
            _ => Ok(()),
        }
    }
}

/// Reference to a block by height and/or hash.
///
/// With both set, the hash wins on ambiguity and the height is the
/// fast-path lookup key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockId {
    /// Block height.
    pub height: Option<BlockHeight>,
    /// Block hash.
    pub hash: Option<BlockHash>,
}

impl BlockId {
    /// Reference by height only.
    pub fn at_height(height: BlockHeight) -> Self {
        Self {
            height: Some(height),
            hash: None,
        }
    }

    /// Reference by hash only.
    pub fn with_hash(hash: BlockHash) -> Self {
        Self {
            height: None,
            hash: Some(hash),
        }
    }

    /// Reference by both height and hash.
    pub fn exact(height: BlockHeight, hash: BlockHash) -> Self {
        Self {
            height: Some(height),
            hash: Some(hash),
        }
    }

    /// At least one of height or hash must be present.
    pub fn validate(&self) -> Result<(), StreamerError> {
        if self.height.is_none() && self.hash.is_none() {
            return Err(StreamerError::InvalidArgument(
                "block id needs a height or a hash".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.height, self.hash) {
            (Some(h), Some(hash)) => write!(f, "{}@{}", hash, h),
            (Some(h), None) => write!(f, "height {}", h),
            (None, Some(hash)) => write!(f, "hash {}", hash),
            (None, None) => f.write_str("<empty block id>"),
        }
    }
}

/// Inclusive, direction-aware block range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    /// First block to emit.
    pub start: BlockId,
    /// Last block to emit. May be below `start` for descending order.
    pub end: BlockId,
}

impl BlockRange {
    /// Range between two heights.
    pub fn heights(start: BlockHeight, end: BlockHeight) -> Self {
        Self {
            start: BlockId::at_height(start),
            end: BlockId::at_height(end),
        }
    }
}

/// Traversal order of a range stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// start <= end
    Ascending,
    /// start > end
    Descending,
}

impl Direction {
    /// Direction implied by two resolved heights.
    pub fn between(start: BlockHeight, end: BlockHeight) -> Self {
        if start <= end {
            Direction::Ascending
        } else {
            Direction::Descending
        }
    }

    /// Height after `current`, or `None` once `last` has been reached.
    pub fn next(&self, current: BlockHeight, last: BlockHeight) -> Option<BlockHeight> {
        if current == last {
            return None;
        }
        match self {
            Direction::Ascending => current.checked_add(1),
            Direction::Descending => current.checked_sub(1),
        }
    }
}

/// Range after resolution and clamping against the tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedRange {
    /// First height to emit.
    pub start: BlockHeight,
    /// Last height to emit.
    pub end: BlockHeight,
    /// Traversal order.
    pub direction: Direction,
}

impl ResolvedRange {
    /// Number of heights the range covers.
    pub fn len(&self) -> u64 {
        self.start.abs_diff(self.end) + 1
    }

    /// A resolved range always holds at least one height.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Reference to a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxFilter {
    /// By transaction id.
    Hash(TxId),
    /// By position inside a block.
    Position {
        /// Containing block.
        block: BlockId,
        /// Index within the block's transaction list.
        index: u32,
    },
}

/// UTXO query over one or more transparent addresses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetAddressUtxosArg {
    /// Addresses to collect outputs for.
    pub addresses: Vec<String>,
    /// Skip outputs mined below this height.
    pub start_height: BlockHeight,
    /// Cap on returned outputs, 0 for no cap.
    pub max_entries: u32,
}

impl GetAddressUtxosArg {
    /// At least one address, none blank.
    pub fn validate(&self) -> Result<(), StreamerError> {
        if self.addresses.is_empty() {
            return Err(StreamerError::InvalidArgument(
                "at least one address is required".to_string(),
            ));
        }
        if self.addresses.iter().any(|a| a.trim().is_empty()) {
            return Err(StreamerError::InvalidArgument(
                "addresses must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Transactions touching one transparent address within a height range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparentAddressBlockFilter {
    /// Queried address.
    pub address: String,
    /// Inclusive height range; both ends need a height.
    pub range: BlockRange,
}

impl TransparentAddressBlockFilter {
    /// Validated `(start, end)` heights, ascending.
    pub fn heights(&self) -> Result<(BlockHeight, BlockHeight), StreamerError> {
        if self.address.trim().is_empty() {
            return Err(StreamerError::InvalidArgument(
                "address must not be blank".to_string(),
            ));
        }
        let (Some(start), Some(end)) = (self.range.start.height, self.range.end.height) else {
            return Err(StreamerError::InvalidRange(
                "address range needs start and end heights".to_string(),
            ));
        };
        if start > end {
            return Err(StreamerError::InvalidRange(format!(
                "address range {}..{} is empty",
                start, end
            )));
        }
        Ok((start, end))
    }
}

/// How the node adapter addresses a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockLookup {
    /// By height on the node's current best chain.
    Height(BlockHeight),
    /// By hash, on any branch the node still knows.
    Hash(BlockHash),
}

impl fmt::Display for BlockLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockLookup::Height(h) => write!(f, "height {}", h),
            BlockLookup::Hash(hash) => write!(f, "hash {}", hash),
        }
    }
}

/// Best block known to the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// Tip height.
    pub height: BlockHeight,
    /// Tip hash.
    pub hash: BlockHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_display_is_byte_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = Hash32(bytes);
        let shown = hash.to_display_hex();
        assert!(shown.ends_with("ab"));
        assert_eq!(Hash32::from_display_hex(&shown).unwrap(), hash);
    }

    #[test]
    fn test_hash_rejects_wrong_length() {
        assert!(Hash32::from_display_hex("abcd").is_err());
        assert!(Hash32::from_display_hex("zz").is_err());
    }

    #[test]
    fn test_hash_serializes_as_display_hex() {
        let hash = Hash32([1u8; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
    }

    #[test]
    fn test_empty_block_id_is_invalid() {
        assert!(BlockId::default().validate().is_err());
        assert!(BlockId::at_height(0).validate().is_ok());
        assert!(BlockId::with_hash(Hash32::ZERO).validate().is_ok());
    }

    #[test]
    fn test_direction_next_stops_at_last() {
        assert_eq!(Direction::Ascending.next(5, 7), Some(6));
        assert_eq!(Direction::Ascending.next(7, 7), None);
        assert_eq!(Direction::Descending.next(7, 5), Some(6));
        assert_eq!(Direction::Descending.next(5, 5), None);
    }

    #[test]
    fn test_resolved_range_len() {
        let asc = ResolvedRange {
            start: 100,
            end: 102,
            direction: Direction::Ascending,
        };
        let desc = ResolvedRange {
            start: 102,
            end: 100,
            direction: Direction::Descending,
        };
        assert_eq!(asc.len(), 3);
        assert_eq!(desc.len(), 3);
    }

    #[test]
    fn test_chain_spec_check() {
        assert!(ChainSpec::default().check(Network::Main).is_ok());
        assert!(ChainSpec::for_network(Network::Main).check(Network::Main).is_ok());
        assert!(ChainSpec::for_network(Network::Test).check(Network::Main).is_err());
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Main);
        assert_eq!("TEST".parse::<Network>().unwrap(), Network::Test);
        assert!("moon".parse::<Network>().is_err());
    }

    #[test]
    fn test_tx_filter_json_shape() {
        let filter = TxFilter::Position {
            block: BlockId::at_height(10),
            index: 2,
        };
        let json = serde_json::to_value(filter).unwrap();
        assert_eq!(json["position"]["index"], 2);
        assert_eq!(json["position"]["block"]["height"], 10);
    }

    #[test]
    fn test_utxo_arg_needs_addresses() {
        assert!(GetAddressUtxosArg::default().validate().is_err());
        let blank = GetAddressUtxosArg {
            addresses: vec!["tmA".into(), "  ".into()],
            ..Default::default()
        };
        assert!(blank.validate().is_err());
        let arg: GetAddressUtxosArg = serde_json::from_str(r#"{"addresses": ["tmA"]}"#).unwrap();
        assert!(arg.validate().is_ok());
        assert_eq!(arg.max_entries, 0);
    }

    #[test]
    fn test_address_filter_heights() {
        let filter = |start, end| TransparentAddressBlockFilter {
            address: "tmA".into(),
            range: BlockRange::heights(start, end),
        };
        assert_eq!(filter(3, 9).heights().unwrap(), (3, 9));
        assert!(matches!(
            filter(9, 3).heights(),
            Err(StreamerError::InvalidRange(_))
        ));
        let open_ended = TransparentAddressBlockFilter {
            address: "tmA".into(),
            range: BlockRange {
                start: BlockId::at_height(1),
                end: BlockId::default(),
            },
        };
        assert!(matches!(
            open_ended.heights(),
            Err(StreamerError::InvalidRange(_))
        ));
    }
}
