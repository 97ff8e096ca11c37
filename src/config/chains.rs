const ETHEREUM_RPC_URLS: &[&str] = &[
    "https://eth.llamarpc.com",
    "https://rpc.ankr.com/eth",
    "https://ethereum.publicnode.com",
    "https://1rpc.io/eth",
    "https://eth.drpc.org",
];

const ARBITRUM_RPC_URLS: &[&str] = &[
    "https://arbitrum.llamarpc.com",
    "https://rpc.ankr.com/arbitrum",
    "https://arbitrum.publicnode.com",
    "https://1rpc.io/arb",
    "https://arb1.arbitrum.io/rpc",
];

const BASE_RPC_URLS: &[&str] = &[
    "https://base.llamarpc.com",
    "https://rpc.ankr.com/base",
    "https://base.publicnode.com",
    "https://1rpc.io/base",
    "https://mainnet.base.org",
];

const OPTIMISM_RPC_URLS: &[&str] = &[
    "https://optimism.llamarpc.com",
    "https://rpc.ankr.com/optimism",
    "https://optimism.publicnode.com",
    "https://1rpc.io/op",
    "https://mainnet.optimism.io",
];

const POLYGON_RPC_URLS: &[&str] = &[
    "https://polygon.llamarpc.com",
    "https://rpc.ankr.com/polygon",
    "https://polygon.publicnode.com",
    "https://1rpc.io/matic",
    "https://polygon-rpc.com",
];

const BSC_RPC_URLS: &[&str] = &[
    "https://bsc.llamarpc.com",
    "https://rpc.ankr.com/bsc",
    "https://bsc.publicnode.com",
    "https://1rpc.io/bnb",
    "https://bsc-dataseed.binance.org",
];

const AVALANCHE_RPC_URLS: &[&str] = &[
    "https://avalanche.publicnode.com",
    "https://rpc.ankr.com/avalanche",
    "https://1rpc.io/avax/c",
    "https://api.avax.network/ext/bc/C/rpc",
];

const BLAST_RPC_URLS: &[&str] = &[
    "https://rpc.ankr.com/blast",
    "https://blast.publicnode.com",
    "https://rpc.blast.io",
];

const LINEA_RPC_URLS: &[&str] = &[
    "https://rpc.linea.build",
    "https://linea.publicnode.com",
    "https://1rpc.io/linea",
];

/// Networks monitored when no explicit selection is given.
pub const DEFAULT_NETWORKS: &[&str] = &[
    "ethereum",
    "arbitrum",
    "base",
    "optimism",
    "polygon",
    "bsc",
    "avalanche",
    "blast",
    "linea",
];

/// Chains the registry knows about but that do not speak the EVM JSON-RPC
/// surface this monitor requires. Selecting one logs a warning and skips it.
pub const NON_EVM_NETWORKS: &[&str] = &["bitcoin", "solana", "ton", "tron"];

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub rpc_urls: Vec<String>,
}

impl ChainConfig {
    /// Look up the built-in registry entry for a network name.
    /// Returns `None` for unknown or non-EVM networks.
    pub fn get(name: &str) -> Option<Self> {
        let urls = match name {
            "ethereum" => ETHEREUM_RPC_URLS,
            "arbitrum" => ARBITRUM_RPC_URLS,
            "base" => BASE_RPC_URLS,
            "optimism" => OPTIMISM_RPC_URLS,
            "polygon" => POLYGON_RPC_URLS,
            "bsc" => BSC_RPC_URLS,
            "avalanche" => AVALANCHE_RPC_URLS,
            "blast" => BLAST_RPC_URLS,
            "linea" => LINEA_RPC_URLS,
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            rpc_urls: urls.iter().map(|url| (*url).to_string()).collect(),
        })
    }

    pub fn is_non_evm(name: &str) -> bool {
        NON_EVM_NETWORKS.contains(&name)
    }

    /// Every EVM network the registry can serve, in default order.
    pub fn all_evm_networks() -> Vec<String> {
        DEFAULT_NETWORKS.iter().map(|n| (*n).to_string()).collect()
    }
}
