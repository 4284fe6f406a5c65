use walletd_primitives::Network;

/// Lookahead applied to accounts created without an explicit override.
pub const DEFAULT_LOOKAHEAD: u32 = 200;

/// Upper bound on per-account lookahead.
pub const MAX_LOOKAHEAD: u32 = 1_000;

/// Default false positive rate for the shared watch filter.
pub const DEFAULT_FILTER_RATE: f64 = 0.0001;

#[derive(Clone, Debug)]
pub struct WalletConfig {
    pub wallet_id: String,
    pub network: Network,
    /// Default lookahead for new accounts; individual accounts may override
    /// at creation time.
    pub lookahead: u32,
    pub filter_rate: f64,
    pub filter_tweak: u32,
}

impl WalletConfig {
    pub fn new(wallet_id: impl Into<String>, network: Network) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            network,
            lookahead: DEFAULT_LOOKAHEAD,
            filter_rate: DEFAULT_FILTER_RATE,
            filter_tweak: 0,
        }
    }

    pub fn with_lookahead(mut self, lookahead: u32) -> Self {
        self.lookahead = lookahead;
        self
    }
}
