use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::Error;

/// Destination chain known to this deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    pub name: String,
    /// Accepts a number or a decimal/`0x` string, since TOML integers stop at `i64::MAX`.
    #[serde(deserialize_with = "deserialize_selector")]
    pub chain_selector: u64,
    pub numeric_chain_id: u64,
    pub rpc_url: String,
}

impl ChainDescriptor {
    pub fn new(name: &str, chain_selector: u64, numeric_chain_id: u64, rpc_url: &str) -> Self {
        Self {
            name: name.to_uppercase(),
            chain_selector,
            numeric_chain_id,
            rpc_url: rpc_url.to_string(),
        }
    }
}

/// Parses a selector written in decimal or as `0x` hex.
pub fn parse_selector(input: &str) -> Result<u64, Error> {
    let trimmed = input.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|e| Error::Config(format!("Invalid chain selector {}: {}", input, e)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Number(u64),
    Text(String),
}

fn deserialize_selector<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match SelectorRepr::deserialize(deserializer)? {
        SelectorRepr::Number(selector) => Ok(selector),
        SelectorRepr::Text(text) => parse_selector(&text).map_err(serde::de::Error::custom),
    }
}

/// Built-in CCIP chain selectors.
const BUILTIN_CHAINS: &[(&str, u64, u64, &str)] = &[
    ("ETHEREUM", 5_009_297_550_715_157_269, 1, "https://eth.llamarpc.com"),
    ("SEPOLIA", 16_015_286_601_757_825_753, 11_155_111, "https://rpc.sepolia.org"),
    ("BASE", 15_971_525_489_660_198_786, 8453, "https://mainnet.base.org"),
    ("BASE_SEPOLIA", 10_344_971_235_874_465_080, 84532, "https://sepolia.base.org"),
    ("POLYGON", 4_051_577_828_743_386_545, 137, "https://polygon-rpc.com"),
    ("ARBITRUM", 4_949_039_107_694_359_620, 42161, "https://arb1.arbitrum.io/rpc"),
    ("OPTIMISM", 3_734_403_246_176_062_136, 10, "https://mainnet.optimism.io"),
    // "CITREA" in ASCII
    ("CITREA", 0x4349_5452_4541, 5115, "https://rpc.testnet.citrea.xyz"),
];

/// Immutable name <-> selector map. Built once at startup and shared behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: Vec<ChainDescriptor>,
    by_name: HashMap<String, usize>,
    by_selector: HashMap<u64, usize>,
}

impl ChainRegistry {
    /// Builds a registry, rejecting duplicate names or selectors.
    pub fn new(chains: impl IntoIterator<Item = ChainDescriptor>) -> Result<Self, Error> {
        let mut registry = Self::default();
        for chain in chains {
            let name = chain.name.to_uppercase();
            if registry.by_name.contains_key(&name) {
                return Err(Error::Config(format!("Duplicate chain name: {}", name)));
            }
            if registry.by_selector.contains_key(&chain.chain_selector) {
                return Err(Error::Config(format!(
                    "Duplicate chain selector: {}",
                    chain.chain_selector
                )));
            }
            let index = registry.chains.len();
            registry.by_name.insert(name.clone(), index);
            registry.by_selector.insert(chain.chain_selector, index);
            registry.chains.push(ChainDescriptor { name, ..chain });
        }
        Ok(registry)
    }

    pub fn builtin() -> Self {
        let chains = BUILTIN_CHAINS
            .iter()
            .map(|(name, selector, chain_id, rpc)| ChainDescriptor::new(name, *selector, *chain_id, rpc));
        // the built-in table has no duplicates
        Self::new(chains).unwrap_or_default()
    }

    /// Built-in chains overlaid with `extra`; an extra entry with a built-in name replaces it.
    pub fn with_overrides(extra: impl IntoIterator<Item = ChainDescriptor>) -> Result<Self, Error> {
        let extra: Vec<ChainDescriptor> = extra.into_iter().collect();
        let overridden: Vec<String> = extra.iter().map(|c| c.name.to_uppercase()).collect();
        let chains = Self::builtin()
            .chains
            .into_iter()
            .filter(|c| !overridden.contains(&c.name))
            .chain(extra);
        Self::new(chains)
    }

    pub fn resolve_by_name(&self, name: &str) -> Option<&ChainDescriptor> {
        self.by_name
            .get(&name.to_uppercase())
            .map(|&index| &self.chains[index])
    }

    pub fn resolve_by_selector(&self, selector: u64) -> Option<&ChainDescriptor> {
        self.by_selector
            .get(&selector)
            .map(|&index| &self.chains[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_round_trip() {
        let registry = ChainRegistry::builtin();
        assert_eq!(registry.len(), BUILTIN_CHAINS.len());

        for (name, ..) in BUILTIN_CHAINS {
            let chain = registry.resolve_by_name(name).unwrap();
            let back = registry.resolve_by_selector(chain.chain_selector).unwrap();
            assert_eq!(&back.name, name);
        }
    }

    #[test]
    fn test_known_selectors() {
        let registry = ChainRegistry::builtin();

        let sepolia = registry.resolve_by_selector(16015286601757825753).unwrap();
        assert_eq!(sepolia.name, "SEPOLIA");
        assert_eq!(sepolia.numeric_chain_id, 11155111);

        let base = registry.resolve_by_selector(15971525489660198786).unwrap();
        assert_eq!(base.name, "BASE");
        assert_eq!(base.numeric_chain_id, 8453);

        let citrea = registry.resolve_by_name("CITREA").unwrap();
        assert_eq!(citrea.chain_selector.to_be_bytes()[2..], *b"CITREA");
    }

    #[test]
    fn test_unknown_chain_is_none() {
        let registry = ChainRegistry::builtin();
        assert!(registry.resolve_by_name("SOLANA").is_none());
        assert!(registry.resolve_by_selector(42).is_none());
    }

    #[test]
    fn test_name_lookup_ignores_case() {
        let registry = ChainRegistry::builtin();
        assert_eq!(registry.resolve_by_name("base_sepolia").unwrap().numeric_chain_id, 84532);
    }

    #[test]
    fn test_duplicates_rejected() {
        let result = ChainRegistry::new(vec![
            ChainDescriptor::new("A", 1, 1, "http://a"),
            ChainDescriptor::new("B", 1, 2, "http://b"),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));

        let result = ChainRegistry::new(vec![
            ChainDescriptor::new("A", 1, 1, "http://a"),
            ChainDescriptor::new("a", 2, 2, "http://b"),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_overrides_replace_builtin() {
        let registry = ChainRegistry::with_overrides(vec![
            ChainDescriptor::new("sepolia", 16015286601757825753, 11155111, "http://localhost:8545"),
            ChainDescriptor::new("LOCAL", 7, 31337, "http://localhost:8546"),
        ])
        .unwrap();

        assert_eq!(registry.len(), BUILTIN_CHAINS.len() + 1);
        assert_eq!(registry.resolve_by_name("SEPOLIA").unwrap().rpc_url, "http://localhost:8545");
        assert_eq!(registry.resolve_by_selector(7).unwrap().name, "LOCAL");
    }

    #[test]
    fn test_parse_selector() {
        assert_eq!(parse_selector("16015286601757825753").unwrap(), 16015286601757825753);
        assert_eq!(parse_selector("0xdda641cfe44aff82").unwrap(), 15971525489660198786);
        assert!(parse_selector("CITREA").is_err());

        let chain: ChainDescriptor = serde_json::from_str(
            r#"{"name": "BASE", "chain_selector": "0xdda641cfe44aff82", "numeric_chain_id": 8453, "rpc_url": "http://b"}"#,
        )
        .unwrap();
        assert_eq!(chain.chain_selector, 15971525489660198786);
    }
}
