//! Fixture feed used when no live upstream is configured.

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::error::FetchError;
use crate::pipeline::types::{FeedSource, RawRecord, SourceKind};

/// `(source_id, sender, content, minutes_ago)`
type Fixture = (&'static str, &'static str, &'static str, i64);

const TELEGRAM_FIXTURES: &[Fixture] = &[
    ("tg_001", "Alice Crypto", "Hey! The new token launch is looking great. When can we expect the whitepaper?", 30),
    ("tg_002", "Bob Investor", "URGENT: There's a critical bug in the smart contract. Need immediate attention!", 15),
    ("tg_003", "Charlie Dev", "The frontend is broken, users can't connect their wallets. This is urgent!", 5),
    ("tg_004", "Diana Community", "Thanks for the AMA yesterday! The community loved it.", 120),
    ("tg_005", "Eve Partner", "Important partnership discussion - can we schedule a call this week?", 60),
    ("tg_006", "DeFi Founder", "Need urgent audit for my Uniswap fork! Can you help?", 45),
    ("tg_007", "NFT Creator", "How does Aave's lending protocol work? Looking to integrate similar features.", 20),
    ("tg_008", "LayerZero Dev", "Interested in cross-chain integration like LayerZero. Any advice?", 10),
];

const TWITTER_FIXTURES: &[Fixture] = &[
    ("tw_001", "@crypto_enthusiast", "Great project! When is the next token launch? 🚀", 25),
    ("tw_002", "@defi_analyst", "URGENT: Found a potential security vulnerability in your smart contract. DM me ASAP!", 10),
    ("tw_003", "@blockchain_dev", "The dApp is down! Users are complaining on Discord.", 3),
    ("tw_004", "@web3_investor", "Love the new features! The UI is much better now. 👏", 60),
    ("tw_005", "@aave_user", "How does Aave compare to Compound? Looking for insights!", 15),
    ("tw_006", "@karak_dev", "Karak's restaking design is amazing, would love your take on ours", 12),
];

const TWITTER_FEED_FIXTURES: &[Fixture] = &[
    ("feed_001", "uniswap", "Uniswap v4 hooks are live on mainnet", 90),
    ("feed_002", "aave", "Aave announces a partnership with a major DeFi protocol", 45),
];

/// Deterministic records for one channel. Timestamps are relative to the
/// moment of the fetch.
#[derive(Debug, Clone)]
pub struct MockFeed {
    name: String,
    kind: SourceKind,
}

impl MockFeed {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            name: format!("{kind}:mock"),
            kind,
        }
    }

    fn fixtures(&self) -> &'static [Fixture] {
        match self.kind {
            SourceKind::Telegram => TELEGRAM_FIXTURES,
            SourceKind::Twitter => TWITTER_FIXTURES,
            SourceKind::TwitterFeed => TWITTER_FEED_FIXTURES,
            SourceKind::System => &[],
        }
    }
}

#[async_trait]
impl FeedSource for MockFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, FetchError> {
        let now = Utc::now();
        Ok(self
            .fixtures()
            .iter()
            .map(|(id, sender, content, minutes_ago)| {
                RawRecord::new(*id, *sender, *content, now - Duration::minutes(*minutes_ago))
            })
            .collect())
    }
}
