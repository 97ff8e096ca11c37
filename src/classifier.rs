use crate::error::{MonitorError, Result};
use crate::rpc::ChainClient;
use alloy::primitives::{Address, U256};
use serde_json::json;

// EIP-1967 Implementation Slot: keccak-256 hash of "eip1967.proxy.implementation" - 1
pub const IMPL_SLOT: [u8; 32] = [
    0x36, 0x08, 0x94, 0xa1, 0x3b, 0xa1, 0xa3, 0x21, 0x06, 0x67, 0xc8, 0x28, 0x2d, 0x02, 0x2d, 0x73,
    0x29, 0x30, 0xf0, 0x87, 0x3e, 0x30, 0x73, 0x31, 0x7a, 0x6e, 0x1d, 0x10, 0x90, 0xd0, 0x1f, 0x0c,
];

// EIP-1167 minimal proxy runtime prefix.
const MINIMAL_PROXY_PATTERN: &[u8] = &[0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];

const DELEGATECALL: u8 = 0xf4;

// View-call selectors used for metadata extraction.
const SEL_NAME: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
const SEL_SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const SEL_DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
const SEL_TOTAL_SUPPLY: [u8; 4] = [0x18, 0x16, 0x0d, 0xdd];
const SEL_TOKEN0: [u8; 4] = [0x0d, 0xfe, 0x16, 0x81];
const SEL_TOKEN1: [u8; 4] = [0xd2, 0x12, 0x20, 0xa7];

const ERC20_SELECTORS: &[[u8; 4]] = &[
    [0x18, 0x16, 0x0d, 0xdd], // totalSupply()
    [0x70, 0xa0, 0x82, 0x31], // balanceOf(address)
    [0xa9, 0x05, 0x9c, 0xbb], // transfer(address,uint256)
    [0x09, 0x5e, 0xa7, 0xb3], // approve(address,uint256)
    [0xdd, 0x62, 0xed, 0x3e], // allowance(address,address)
    [0x23, 0xb8, 0x72, 0xdd], // transferFrom(address,address,uint256)
];

const ERC721_SELECTORS: &[[u8; 4]] = &[
    [0x70, 0xa0, 0x82, 0x31], // balanceOf(address)
    [0x63, 0x52, 0x21, 0x1e], // ownerOf(uint256)
    [0x42, 0x84, 0x2e, 0x0e], // safeTransferFrom(address,address,uint256)
    [0x23, 0xb8, 0x72, 0xdd], // transferFrom(address,address,uint256)
    [0x09, 0x5e, 0xa7, 0xb3], // approve(address,uint256)
    [0xa2, 0x2c, 0xb4, 0x65], // setApprovalForAll(address,bool)
];

const ERC1155_SELECTORS: &[[u8; 4]] = &[
    [0x00, 0xfd, 0xd5, 0x8e], // balanceOf(address,uint256)
    [0x4e, 0x12, 0x73, 0xf4], // balanceOfBatch(address[],uint256[])
    [0xf2, 0x42, 0x43, 0x2a], // safeTransferFrom(address,address,uint256,uint256,bytes)
    [0x2e, 0xb2, 0xc2, 0xd6], // safeBatchTransferFrom(address,address,uint256[],uint256[],bytes)
    [0xa2, 0x2c, 0xb4, 0x65], // setApprovalForAll(address,bool)
];

const ROUTER_SELECTORS: &[[u8; 4]] = &[
    [0x38, 0xed, 0x17, 0x39], // swapExactTokensForTokens
    [0xfb, 0x3b, 0xdb, 0x41], // swapETHForExactTokens
    [0x7f, 0xf3, 0x6a, 0xb5], // swapExactETHForTokens
    [0xe8, 0xe3, 0x37, 0x00], // addLiquidity
    [0x02, 0x75, 0x1c, 0xec], // removeLiquidity
];

const POOL_SELECTORS: &[[u8; 4]] = &[
    [0x0d, 0xfe, 0x16, 0x81], // token0()
    [0xd2, 0x12, 0x20, 0xa7], // token1()
];

const STAKING_SELECTORS: &[[u8; 4]] = &[
    [0xa6, 0x94, 0xfc, 0x3a], // stake(uint256)
    [0x2e, 0x1a, 0x7d, 0x4d], // withdraw(uint256)
    [0x3d, 0x18, 0xb9, 0x12], // getReward()
    [0xe9, 0xfa, 0xd8, 0xee], // exit()
    [0x8b, 0x87, 0x63, 0x47], // earned(address)
    [0x70, 0x89, 0x7b, 0x23], // rewardRate()
];

const MULTISIG_SELECTORS: &[[u8; 4]] = &[
    [0xc6, 0x42, 0x74, 0x74], // submitTransaction
    [0xc0, 0x1a, 0x8c, 0x84], // confirmTransaction
    [0x20, 0xea, 0x8d, 0x86], // revokeConfirmation
    [0xee, 0x22, 0x61, 0x0b], // executeTransaction
    [0x02, 0x5e, 0x7c, 0x27], // owners(uint256)
    [0x54, 0x74, 0x15, 0x25], // required()
];

const TIMELOCK_SELECTORS: &[[u8; 4]] = &[
    [0x3a, 0x66, 0xf9, 0x01], // queueTransaction
    [0x59, 0x1f, 0xcd, 0xfe], // executeTransaction
    [0xc1, 0xa2, 0x87, 0xe2], // cancelTransaction
    [0x7d, 0x64, 0x5f, 0xab], // setPendingAdmin
    [0x26, 0x78, 0x22, 0x47], // acceptAdmin
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContractKind {
    Erc20,
    Erc721,
    Erc1155,
    Router,
    Pool,
    Proxy,
    Staking,
    Multisig,
    Timelock,
    Unknown,
    Error,
}

impl ContractKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractKind::Erc20 => "ERC20",
            ContractKind::Erc721 => "ERC721",
            ContractKind::Erc1155 => "ERC1155",
            ContractKind::Router => "Router",
            ContractKind::Pool => "Pool",
            ContractKind::Proxy => "Proxy",
            ContractKind::Staking => "Staking",
            ContractKind::Multisig => "Multisig",
            ContractKind::Timelock => "Timelock",
            ContractKind::Unknown => "Unknown",
            ContractKind::Error => "Error",
        }
    }
}

/// Candidate interfaces in tie-break order. Equal confidence resolves to the
/// earlier entry. Proxy carries no selector set; it is matched structurally.
const CANDIDATES: &[(ContractKind, &[[u8; 4]], usize)] = &[
    (ContractKind::Erc20, ERC20_SELECTORS, 5),
    (ContractKind::Erc721, ERC721_SELECTORS, 4),
    (ContractKind::Erc1155, ERC1155_SELECTORS, 2),
    (ContractKind::Router, ROUTER_SELECTORS, 2),
    (ContractKind::Pool, POOL_SELECTORS, 2),
    (ContractKind::Proxy, &[], 1),
    (ContractKind::Staking, STAKING_SELECTORS, 2),
    (ContractKind::Multisig, MULTISIG_SELECTORS, 3),
    (ContractKind::Timelock, TIMELOCK_SELECTORS, 2),
];

#[derive(Debug, Clone, PartialEq)]
pub enum ContractMetadata {
    Token {
        name: Option<String>,
        symbol: Option<String>,
        decimals: Option<u8>,
        /// Raw u256 rendered as a decimal string.
        total_supply: Option<String>,
    },
    Nft {
        name: Option<String>,
        symbol: Option<String>,
        total_supply: Option<String>,
    },
    Pool {
        token0: Option<Address>,
        token1: Option<Address>,
    },
    None,
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub primary: ContractKind,
    pub all: Vec<ContractKind>,
    pub confidence: f64,
    pub bytecode_size: usize,
    pub metadata: ContractMetadata,
}

impl Classification {
    /// The `Error` tag: only a failed bytecode fetch produces it.
    pub fn error() -> Self {
        Self {
            primary: ContractKind::Error,
            all: vec![ContractKind::Error],
            confidence: 0.0,
            bytecode_size: 0,
            metadata: ContractMetadata::None,
        }
    }

    fn unknown(bytecode_size: usize) -> Self {
        Self {
            primary: ContractKind::Unknown,
            all: vec![ContractKind::Unknown],
            confidence: 0.0,
            bytecode_size,
            metadata: ContractMetadata::None,
        }
    }

    /// JSON bag persisted in the `contract_info` column. Typed at this
    /// boundary, opaque in transit.
    pub fn to_info_json(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("type".into(), json!(self.primary.as_str()));
        obj.insert(
            "all_types".into(),
            json!(self.all.iter().map(|k| k.as_str()).collect::<Vec<_>>()),
        );
        obj.insert("confidence".into(), json!(self.confidence));
        obj.insert("bytecode_size".into(), json!(self.bytecode_size));
        match &self.metadata {
            ContractMetadata::Token {
                name,
                symbol,
                decimals,
                total_supply,
            } => {
                obj.insert("token_name".into(), json!(name));
                obj.insert("token_symbol".into(), json!(symbol));
                obj.insert("token_decimals".into(), json!(decimals));
                obj.insert("total_supply".into(), json!(total_supply));
            }
            ContractMetadata::Nft {
                name,
                symbol,
                total_supply,
            } => {
                obj.insert("nft_name".into(), json!(name));
                obj.insert("nft_symbol".into(), json!(symbol));
                obj.insert("nft_total_supply".into(), json!(total_supply));
            }
            ContractMetadata::Pool { token0, token1 } => {
                obj.insert(
                    "pool_token0".into(),
                    json!(token0.map(|a| format!("{a:#x}"))),
                );
                obj.insert(
                    "pool_token1".into(),
                    json!(token1.map(|a| format!("{a:#x}"))),
                );
            }
            ContractMetadata::None => {}
        }
        serde_json::Value::Object(obj).to_string()
    }

    /// One-line log summary.
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("Type: {}", self.primary.as_str()),
            format!("Confidence: {:.0}%", self.confidence * 100.0),
        ];
        if self.all.len() > 1 {
            parts.push(format!(
                "All Types: {}",
                self.all
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        match &self.metadata {
            ContractMetadata::Token { name, symbol, .. } => {
                parts.push(format!(
                    "Token: {} ({})",
                    name.as_deref().unwrap_or("N/A"),
                    symbol.as_deref().unwrap_or("?")
                ));
            }
            ContractMetadata::Nft { name, symbol, .. } => {
                parts.push(format!(
                    "NFT: {} ({})",
                    name.as_deref().unwrap_or("N/A"),
                    symbol.as_deref().unwrap_or("?")
                ));
            }
            ContractMetadata::Pool {
                token0: Some(t0),
                token1: Some(t1),
            } => {
                parts.push(format!("Pool: {t0:#x}/{t1:#x}"));
            }
            _ => {}
        }
        parts.join(" | ")
    }
}

fn contains_selector(bytecode: &[u8], selector: &[u8; 4]) -> bool {
    bytecode.windows(4).any(|w| w == selector)
}

fn contains_pattern(bytecode: &[u8], pattern: &[u8]) -> bool {
    !pattern.is_empty() && bytecode.windows(pattern.len()).any(|w| w == pattern)
}

fn is_proxy_bytecode(bytecode: &[u8]) -> bool {
    if contains_pattern(bytecode, &IMPL_SLOT) || contains_pattern(bytecode, MINIMAL_PROXY_PATTERN) {
        return true;
    }
    bytecode.iter().take(32).any(|b| *b == DELEGATECALL)
}

/// Pure bytecode analysis: match the selector tables, score candidates, pick
/// the primary type. Confidence is matched/required clipped to 1.0.
pub fn analyze_bytecode(bytecode: &[u8]) -> Classification {
    if bytecode.is_empty() {
        return Classification::unknown(0);
    }

    let mut all = Vec::new();
    let mut best: Option<(ContractKind, f64)> = None;
    for (kind, selectors, required) in CANDIDATES {
        let confidence = if *kind == ContractKind::Proxy {
            if !is_proxy_bytecode(bytecode) {
                continue;
            }
            1.0
        } else {
            let matched = selectors
                .iter()
                .filter(|sel| contains_selector(bytecode, sel))
                .count();
            if matched < *required {
                continue;
            }
            (matched as f64 / *required as f64).min(1.0)
        };
        all.push(*kind);
        // Strict comparison keeps the earlier (tie-break) candidate on equal
        // confidence.
        if best.map(|(_, c)| confidence > c).unwrap_or(true) {
            best = Some((*kind, confidence));
        }
    }

    match best {
        Some((primary, confidence)) => Classification {
            primary,
            all,
            confidence,
            bytecode_size: bytecode.len(),
            metadata: ContractMetadata::None,
        },
        None => Classification::unknown(bytecode.len()),
    }
}

// ---------------------------------------------------------------------------
// Tolerant ABI decoding for metadata view calls
// ---------------------------------------------------------------------------

fn decode_u256(ret: &[u8]) -> Option<U256> {
    if ret.len() < 32 {
        return None;
    }
    Some(U256::from_be_slice(&ret[..32]))
}

fn decode_u8(ret: &[u8]) -> Option<u8> {
    let value = decode_u256(ret)?;
    u8::try_from(value).ok()
}

fn decode_address(ret: &[u8]) -> Option<Address> {
    if ret.len() < 32 || ret[..12].iter().any(|b| *b != 0) {
        return None;
    }
    let addr = Address::from_slice(&ret[12..32]);
    (!addr.is_zero()).then_some(addr)
}

/// Decode a solidity `string` return: standard dynamic encoding first, then
/// the legacy bytes32 form some early tokens use.
fn decode_string(ret: &[u8]) -> Option<String> {
    if ret.len() >= 64 {
        let offset: usize = usize::try_from(decode_u256(ret)?).ok()?;
        if let Some(len_word) = ret.get(offset..offset.checked_add(32)?) {
            let len: usize = usize::try_from(U256::from_be_slice(len_word)).ok()?;
            let start = offset.checked_add(32)?;
            let end = start.checked_add(len)?;
            if let Some(raw) = ret.get(start..end) {
                let text = String::from_utf8_lossy(raw).trim_matches('\0').to_string();
                return (!text.is_empty()).then_some(text);
            }
        }
    }
    if ret.len() == 32 {
        let text = String::from_utf8_lossy(ret).trim_matches('\0').to_string();
        return (!text.is_empty()).then_some(text);
    }
    None
}

pub struct ContractClassifier;

impl ContractClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a contract: bytecode fetch, selector scan, then metadata view
    /// calls for the primary type. Only a failed bytecode fetch errors out;
    /// individual view-call failures leave their fields absent.
    pub async fn classify(&self, client: &ChainClient, address: Address) -> Result<Classification> {
        let bytecode = client.get_code(address).await.map_err(|err| {
            MonitorError::Classifier(format!("bytecode fetch failed for {address:#x}: {err}"))
        })?;

        let mut classification = analyze_bytecode(bytecode.as_ref());
        classification.metadata = match classification.primary {
            ContractKind::Erc20 => self.fetch_token_metadata(client, address).await,
            ContractKind::Erc721 => self.fetch_nft_metadata(client, address).await,
            ContractKind::Pool => self.fetch_pool_metadata(client, address).await,
            _ => ContractMetadata::None,
        };
        Ok(classification)
    }

    async fn call_view(
        &self,
        client: &ChainClient,
        address: Address,
        selector: [u8; 4],
    ) -> Option<Vec<u8>> {
        match client.eth_call(address, selector.to_vec()).await {
            Ok(ret) => Some(ret.to_vec()),
            Err(err) => {
                tracing::debug!(
                    "[{}] view call 0x{} on {:#x} failed: {}",
                    client.chain(),
                    hex::encode(selector),
                    address,
                    err
                );
                None
            }
        }
    }

    async fn fetch_token_metadata(
        &self,
        client: &ChainClient,
        address: Address,
    ) -> ContractMetadata {
        let name = self
            .call_view(client, address, SEL_NAME)
            .await
            .and_then(|ret| decode_string(&ret));
        let symbol = self
            .call_view(client, address, SEL_SYMBOL)
            .await
            .and_then(|ret| decode_string(&ret));
        let decimals = self
            .call_view(client, address, SEL_DECIMALS)
            .await
            .and_then(|ret| decode_u8(&ret));
        let total_supply = self
            .call_view(client, address, SEL_TOTAL_SUPPLY)
            .await
            .and_then(|ret| decode_u256(&ret))
            .map(|v| v.to_string());
        ContractMetadata::Token {
            name,
            symbol,
            decimals,
            total_supply,
        }
    }

    async fn fetch_nft_metadata(
        &self,
        client: &ChainClient,
        address: Address,
    ) -> ContractMetadata {
        let name = self
            .call_view(client, address, SEL_NAME)
            .await
            .and_then(|ret| decode_string(&ret));
        let symbol = self
            .call_view(client, address, SEL_SYMBOL)
            .await
            .and_then(|ret| decode_string(&ret));
        // totalSupply is optional for ERC721; absence is normal.
        let total_supply = self
            .call_view(client, address, SEL_TOTAL_SUPPLY)
            .await
            .and_then(|ret| decode_u256(&ret))
            .map(|v| v.to_string());
        ContractMetadata::Nft {
            name,
            symbol,
            total_supply,
        }
    }

    async fn fetch_pool_metadata(
        &self,
        client: &ChainClient,
        address: Address,
    ) -> ContractMetadata {
        let token0 = self
            .call_view(client, address, SEL_TOKEN0)
            .await
            .and_then(|ret| decode_address(&ret));
        let token1 = self
            .call_view(client, address, SEL_TOKEN1)
            .await
            .and_then(|ret| decode_address(&ret));
        ContractMetadata::Pool { token0, token1 }
    }
}

impl Default for ContractClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn bytecode_with(selectors: &[[u8; 4]]) -> Vec<u8> {
        // PUSH4 <selector> separators approximate a dispatch table.
        let mut code = vec![0x60, 0x80, 0x60, 0x40];
        for sel in selectors {
            code.push(0x63);
            code.extend_from_slice(sel);
            code.push(0x14);
        }
        code
    }

    #[test]
    fn test_empty_bytecode_is_unknown_with_zero_confidence() {
        let c = analyze_bytecode(&[]);
        assert_eq!(c.primary, ContractKind::Unknown);
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.bytecode_size, 0);
    }

    #[test]
    fn test_full_erc20_dispatch_scores_full_confidence() {
        let code = bytecode_with(ERC20_SELECTORS);
        let c = analyze_bytecode(&code);
        assert_eq!(c.primary, ContractKind::Erc20);
        assert!((c.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(c.bytecode_size, code.len());
    }

    #[test]
    fn test_erc20_below_minimum_is_not_a_candidate() {
        // 4 of 6 ERC20 selectors: below the >=5 contract.
        let code = bytecode_with(&ERC20_SELECTORS[..4]);
        let c = analyze_bytecode(&code);
        assert_ne!(c.primary, ContractKind::Erc20);
    }

    #[test]
    fn test_router_requires_any_two_of_named_five() {
        let code = bytecode_with(&[ROUTER_SELECTORS[0], ROUTER_SELECTORS[3]]);
        let c = analyze_bytecode(&code);
        assert_eq!(c.primary, ContractKind::Router);
        assert!((c.confidence - 1.0).abs() < f64::EPSILON);

        let code = bytecode_with(&[ROUTER_SELECTORS[0]]);
        assert_ne!(analyze_bytecode(&code).primary, ContractKind::Router);
    }

    #[test]
    fn test_pool_requires_both_token_accessors() {
        let both = bytecode_with(POOL_SELECTORS);
        assert_eq!(analyze_bytecode(&both).primary, ContractKind::Pool);

        let one = bytecode_with(&[SEL_TOKEN0]);
        assert_ne!(analyze_bytecode(&one).primary, ContractKind::Pool);
    }

    #[test]
    fn test_tie_break_prefers_erc20_over_erc721() {
        // Full dispatch for both standards at equal confidence.
        let mut selectors: Vec<[u8; 4]> = ERC20_SELECTORS.to_vec();
        selectors.extend_from_slice(ERC721_SELECTORS);
        let c = analyze_bytecode(&bytecode_with(&selectors));
        assert_eq!(c.primary, ContractKind::Erc20);
        assert!(c.all.contains(&ContractKind::Erc721));
    }

    #[test]
    fn test_proxy_detected_via_impl_slot_constant() {
        let mut code = bytecode_with(&[]);
        code.extend_from_slice(&IMPL_SLOT);
        let c = analyze_bytecode(&code);
        assert_eq!(c.primary, ContractKind::Proxy);
        assert!((c.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_proxy_detected_via_early_delegatecall_and_minimal_proxy() {
        let mut early = vec![0x36, 0x3d, DELEGATECALL];
        early.resize(64, 0x00);
        assert_eq!(analyze_bytecode(&early).primary, ContractKind::Proxy);

        // Delegatecall past the first 32 bytes is not proxy evidence.
        let mut late = vec![0x60; 40];
        late.push(DELEGATECALL);
        assert_ne!(analyze_bytecode(&late).primary, ContractKind::Proxy);

        let mut minimal = MINIMAL_PROXY_PATTERN.to_vec();
        minimal.resize(45, 0x00);
        assert_eq!(analyze_bytecode(&minimal).primary, ContractKind::Proxy);
    }

    #[test]
    fn test_decode_string_dynamic_and_bytes32_forms() {
        // Dynamic encoding: offset 0x20, len 3, "Foo".
        let mut ret = Vec::new();
        ret.extend_from_slice(&U256::from(32u64).to_be_bytes::<32>());
        ret.extend_from_slice(&U256::from(3u64).to_be_bytes::<32>());
        let mut chunk = [0u8; 32];
        chunk[..3].copy_from_slice(b"Foo");
        ret.extend_from_slice(&chunk);
        assert_eq!(decode_string(&ret).as_deref(), Some("Foo"));

        // Legacy bytes32 form.
        let mut legacy = [0u8; 32];
        legacy[..3].copy_from_slice(b"FOO");
        assert_eq!(decode_string(&legacy).as_deref(), Some("FOO"));

        assert_eq!(decode_string(&[]), None);
    }

    #[test]
    fn test_decode_address_rejects_non_address_words() {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(
            Address::from_str("0x00000000000000000000000000000000000000Cc")
                .unwrap()
                .as_slice(),
        );
        assert!(decode_address(&word).is_some());

        assert!(decode_address(&[0xff; 32]).is_none());
        assert!(decode_address(&[0u8; 32]).is_none());
        assert!(decode_address(&[0u8; 16]).is_none());
    }

    #[test]
    fn test_info_json_carries_token_fields() {
        let classification = Classification {
            primary: ContractKind::Erc20,
            all: vec![ContractKind::Erc20],
            confidence: 1.0,
            bytecode_size: 1234,
            metadata: ContractMetadata::Token {
                name: Some("Foo".into()),
                symbol: Some("FOO".into()),
                decimals: Some(18),
                total_supply: Some("1000000000000000000000000".into()),
            },
        };
        let parsed: serde_json::Value =
            serde_json::from_str(&classification.to_info_json()).unwrap();
        assert_eq!(parsed["type"], "ERC20");
        assert_eq!(parsed["token_symbol"], "FOO");
        assert_eq!(parsed["token_decimals"], 18);
        assert_eq!(parsed["total_supply"], "1000000000000000000000000");
        assert_eq!(parsed["bytecode_size"], 1234);
    }

    #[test]
    fn test_summary_line_format() {
        let classification = Classification {
            primary: ContractKind::Pool,
            all: vec![ContractKind::Pool],
            confidence: 1.0,
            bytecode_size: 100,
            metadata: ContractMetadata::Pool {
                token0: Some(
                    Address::from_str("0x00000000000000000000000000000000000000Cc").unwrap(),
                ),
                token1: Some(
                    Address::from_str("0x00000000000000000000000000000000000000Dd").unwrap(),
                ),
            },
        };
        let line = classification.summary();
        assert!(line.starts_with("Type: Pool | Confidence: 100%"));
        assert!(line.contains("Pool: 0x"));
    }
}
