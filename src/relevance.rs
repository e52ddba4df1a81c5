// src/relevance.rs
//! Topical relevance gate: one ordered rule table evaluated by a single
//! engine, shared by the feed filter and the generated-post validator.
//!
//! Evaluation order (short-circuiting):
//! 1. hard-exclusion terms reject unconditionally;
//! 2. strict on-topic keywords accept;
//! 3. political markers without a strict keyword reject;
//! 4. >= 2 distinct general keywords accept;
//! 5. one general keyword + a financial/tech context keyword accepts;
//! 6. otherwise reject.
//!
//! Matching is case-insensitive substring search throughout; no tokenization
//! or stemming. Empty text always rejects.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub const DEFAULT_RULES_CONFIG_PATH: &str = "config/relevance_rules.toml";
pub const ENV_RULES_CONFIG_PATH: &str = "RELEVANCE_RULES_PATH";

/// Rule categories, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Any match rejects immediately, regardless of everything else.
    Exclude,
    /// Marks the text as provisionally political; vetoes non-strict accepts.
    Political,
    /// Unambiguous on-topic evidence; a single match accepts.
    Strict,
    /// Lower-confidence terms needing corroboration (count or context).
    General,
    /// Financial context corroborating a general keyword.
    Financial,
    /// Technology context corroborating a general keyword.
    Tech,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceRule {
    pub category: RuleCategory,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RulesRoot {
    rules: Vec<RelevanceRule>,
}

/// Compiled rule table. Terms are lowercased once at build time.
#[derive(Debug, Clone)]
pub struct RelevanceEngine {
    exclude: Vec<String>,
    political: Vec<String>,
    strict: Vec<String>,
    general: Vec<String>,
    financial: Vec<String>,
    tech: Vec<String>,
}

impl RelevanceEngine {
    /// Load from $RELEVANCE_RULES_PATH / config/relevance_rules.toml when the
    /// file exists, otherwise fall back to the built-in rule set.
    pub fn from_toml_or_builtin() -> Self {
        let path = std::env::var(ENV_RULES_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_RULES_CONFIG_PATH));
        match fs::read_to_string(&path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(eng) => {
                    tracing::info!(path = %path.display(), "loaded relevance rules");
                    eng
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = ?e, "bad rules file, using builtin rules");
                    Self::builtin()
                }
            },
            Err(_) => Self::builtin(),
        }
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let root: RulesRoot = toml::from_str(toml_str)?;
        Ok(Self::from_rules(&root.rules))
    }

    pub fn from_rules(rules: &[RelevanceRule]) -> Self {
        let mut eng = Self {
            exclude: Vec::new(),
            political: Vec::new(),
            strict: Vec::new(),
            general: Vec::new(),
            financial: Vec::new(),
            tech: Vec::new(),
        };
        for rule in rules {
            let bucket = match rule.category {
                RuleCategory::Exclude => &mut eng.exclude,
                RuleCategory::Political => &mut eng.political,
                RuleCategory::Strict => &mut eng.strict,
                RuleCategory::General => &mut eng.general,
                RuleCategory::Financial => &mut eng.financial,
                RuleCategory::Tech => &mut eng.tech,
            };
            bucket.extend(
                rule.terms
                    .iter()
                    .map(|t| t.to_lowercase())
                    .filter(|t| !t.trim().is_empty()),
            );
        }
        eng
    }

    /// Default rule table covering the TON/crypto beat.
    pub fn builtin() -> Self {
        Self::from_rules(&[
            RelevanceRule {
                category: RuleCategory::Exclude,
                terms: str_terms(&["ukrain", "zelensky", "zelenskiy"]),
            },
            RelevanceRule {
                category: RuleCategory::Political,
                terms: str_terms(&[
                    "geopolitic",
                    "russia",
                    "united states",
                    "washington",
                    "china",
                    "taiwan",
                    " war ",
                    "sanction",
                    "diplomacy",
                    "president",
                    "government",
                    "minister",
                    "parliament",
                    "election",
                    "referendum",
                    "nato",
                    "european union",
                    "venezuela",
                    "iran",
                    "israel",
                    "palestine",
                    "greenland",
                    "south korea",
                    "turkey",
                    "maduro",
                    "xi jinping",
                    "trump",
                    "biden",
                ]),
            },
            RelevanceRule {
                category: RuleCategory::Strict,
                terms: str_terms(&[
                    "crypto",
                    "blockchain",
                    "bitcoin",
                    "btc",
                    "ethereum",
                    " eth ",
                    "toncoin",
                    "the open network",
                    " ton ",
                    "usdt",
                    "tether",
                    "usdc",
                    "binance",
                    "solana",
                    "cardano",
                    "ripple",
                    "xrp",
                    "dogecoin",
                    "doge",
                    "shiba inu",
                    "polygon",
                    "avalanche",
                    "polkadot",
                    "chainlink",
                    "uniswap",
                    "litecoin",
                    "stellar",
                    "cosmos",
                    "near protocol",
                    "arbitrum",
                    "optimism",
                    "celestia",
                    "injective",
                    "defi",
                    "nft",
                    "staking",
                    "mining",
                    "satoshi",
                    "gas fee",
                    "smart contract",
                    "dapp",
                    " dao ",
                    "web3",
                    "metaverse",
                    "gamefi",
                    "yield farming",
                    " dex ",
                    " cex ",
                    "hodl",
                    "stablecoin",
                    "memecoin",
                    "airdrop",
                ]),
            },
            RelevanceRule {
                category: RuleCategory::General,
                terms: str_terms(&["token", "coin", "altcoin", "liquidity"]),
            },
            RelevanceRule {
                category: RuleCategory::Financial,
                terms: str_terms(&[
                    "price", "rate", "rally", "fall", "invest", "exchange", "trading", "market cap",
                ]),
            },
            RelevanceRule {
                category: RuleCategory::Tech,
                terms: str_terms(&["technology", "protocol", "network", "mainnet", "testnet"]),
            },
        ])
    }

    /// Pure relevance decision. Deterministic; side effects are diagnostics only.
    pub fn is_relevant(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        // Pad so boundary-sensitive terms like " ton " match at the edges too.
        let haystack = format!(" {} ", text.to_lowercase());

        if let Some(term) = first_match(&self.exclude, &haystack) {
            debug!(target: "relevance", %term, "rejected: hard exclusion");
            return false;
        }

        if let Some(term) = first_match(&self.strict, &haystack) {
            debug!(target: "relevance", %term, "accepted: strict keyword");
            return true;
        }

        if let Some(term) = first_match(&self.political, &haystack) {
            debug!(target: "relevance", %term, "rejected: political without strict keyword");
            return false;
        }

        let found_general: Vec<&str> = self
            .general
            .iter()
            .filter(|t| haystack.contains(t.as_str()))
            .map(|t| t.as_str())
            .collect();

        if found_general.len() >= 2 {
            debug!(target: "relevance", count = found_general.len(), "accepted: general keyword count");
            return true;
        }

        if !found_general.is_empty()
            && (first_match(&self.financial, &haystack).is_some()
                || first_match(&self.tech, &haystack).is_some())
        {
            debug!(target: "relevance", term = found_general[0], "accepted: general keyword with context");
            return true;
        }

        false
    }
}

fn first_match<'a>(terms: &'a [String], haystack: &str) -> Option<&'a str> {
    terms
        .iter()
        .find(|t| haystack.contains(t.as_str()))
        .map(|t| t.as_str())
}

fn str_terms(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|t| t.to_string()).collect()
}
