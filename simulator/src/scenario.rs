//! Simulation scenarios.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
///
/// Asset references are token codes, or `NATIVE`. Amounts are human
/// decimal strings in the asset's own precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Declare and register a fungible asset.
    ListAsset {
        code: String,
        decimals: u8,
        price: i128,
        price_decimals: u8,
    },
    /// Move an asset's price.
    SetPrice {
        asset: String,
        price: i128,
        decimals: u8,
    },
    /// Credit a user's wallet outside the bank.
    Fund {
        user: String,
        asset: String,
        amount: String,
    },
    /// Deposit into the bank.
    Deposit {
        user: String,
        asset: String,
        amount: String,
        expect: Expect,
    },
    /// Withdraw from the bank.
    Withdraw {
        user: String,
        asset: String,
        amount: String,
        expect: Expect,
    },
    /// Withdraw while the payout tries to withdraw again.
    ReentrantWithdraw {
        user: String,
        asset: String,
        amount: String,
    },
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Expected outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expect {
    /// The operation succeeds.
    Success,
    /// The operation fails with this error code.
    Failure { code: String },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// Stored balance, at ledger precision, equals.
    BalanceEquals {
        user: String,
        asset: String,
        normalized: u64,
    },
    /// Remaining capacity, in human reference units, equals.
    AvailableCapacity { amount: String },
    /// Global revaluation fails with this error code.
    ValuationFails { code: String },
}

/// Names accepted by [`Scenario::load`].
pub const SCENARIOS: [&str; 5] = [
    "normalization",
    "bank-cap",
    "withdrawal-ceiling",
    "invalid-price",
    "reentrancy",
];

fn deposit(user: &str, asset: &str, amount: &str, expect: Expect) -> ScenarioStep {
    ScenarioStep::Deposit {
        user: user.to_string(),
        asset: asset.to_string(),
        amount: amount.to_string(),
        expect,
    }
}

fn withdraw(user: &str, asset: &str, amount: &str, expect: Expect) -> ScenarioStep {
    ScenarioStep::Withdraw {
        user: user.to_string(),
        asset: asset.to_string(),
        amount: amount.to_string(),
        expect,
    }
}

fn fails(code: &str) -> Expect {
    Expect::Failure {
        code: code.to_string(),
    }
}

fn balance(user: &str, asset: &str, normalized: u64) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::BalanceEquals {
            user: user.to_string(),
            asset: asset.to_string(),
            normalized,
        },
    }
}

fn capacity(amount: &str) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::AvailableCapacity {
            amount: amount.to_string(),
        },
    }
}

impl Scenario {
    /// Load a built-in scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "normalization" => Ok(Self::normalization()),
            "bank-cap" => Ok(Self::bank_cap()),
            "withdrawal-ceiling" => Ok(Self::withdrawal_ceiling()),
            "invalid-price" => Ok(Self::invalid_price()),
            "reentrancy" => Ok(Self::reentrancy()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Load a scenario from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid scenario {}", path.display()))
    }

    /// An 8-decimal asset is stored at 6 decimals; dust below the ledger
    /// unit is dropped on deposit and refused on withdrawal.
    fn normalization() -> Self {
        Self {
            name: "normalization".to_string(),
            description: "Deposit of an 8-decimal asset is stored at ledger precision".to_string(),
            steps: vec![
                ScenarioStep::ListAsset {
                    code: "WBTC".to_string(),
                    decimals: 8,
                    price: 3_000_00000000,
                    price_decimals: 8,
                },
                ScenarioStep::Fund {
                    user: "alice".to_string(),
                    asset: "WBTC".to_string(),
                    amount: "2".to_string(),
                },
                deposit("alice", "WBTC", "1", Expect::Success),
                balance("alice", "WBTC", 1_000_000),
                deposit("alice", "WBTC", "0.00000001", Expect::Success),
                balance("alice", "WBTC", 1_000_000),
                withdraw("alice", "WBTC", "0.00000099", fails("ZERO_AMOUNT")),
                withdraw("alice", "WBTC", "0.5", Expect::Success),
                balance("alice", "WBTC", 500_000),
            ],
        }
    }

    /// Deposits worth 49999 fill the cap of 50000 to within one unit.
    fn bank_cap() -> Self {
        Self {
            name: "bank-cap".to_string(),
            description: "A deposit past the global capacity reports what is left".to_string(),
            steps: vec![
                deposit("alice", "NATIVE", "49999", Expect::Success),
                deposit("bob", "NATIVE", "2", fails("BANK_CAP_EXCEEDED")),
                capacity("1"),
                deposit("bob", "NATIVE", "1", Expect::Success),
                capacity("0"),
                balance("bob", "NATIVE", 1_000_000),
            ],
        }
    }

    /// One unit of UNIT is worth exactly one reference unit, so the
    /// ceiling can be tested at its exact boundary.
    fn withdrawal_ceiling() -> Self {
        Self {
            name: "withdrawal-ceiling".to_string(),
            description: "The per-withdrawal ceiling is inclusive".to_string(),
            steps: vec![
                ScenarioStep::ListAsset {
                    code: "UNIT".to_string(),
                    decimals: 0,
                    price: 1,
                    price_decimals: 18,
                },
                ScenarioStep::Fund {
                    user: "alice".to_string(),
                    asset: "UNIT".to_string(),
                    amount: "20000000000000000000000".to_string(),
                },
                deposit("alice", "UNIT", "20000000000000000000000", Expect::Success),
                withdraw("alice", "UNIT", "5000000000000000000000", Expect::Success),
                withdraw(
                    "alice",
                    "UNIT",
                    "5000000000000000000001",
                    fails("WITHDRAWAL_THRESHOLD_EXCEEDED"),
                ),
            ],
        }
    }

    /// A zero price blocks deposits, withdrawals and revaluation alike.
    fn invalid_price() -> Self {
        Self {
            name: "invalid-price".to_string(),
            description: "A zero price blocks every valuation of the asset".to_string(),
            steps: vec![
                deposit("alice", "NATIVE", "10", Expect::Success),
                ScenarioStep::SetPrice {
                    asset: "NATIVE".to_string(),
                    price: 0,
                    decimals: 8,
                },
                deposit("alice", "NATIVE", "1", fails("INVALID_PRICE_DATA")),
                withdraw("alice", "NATIVE", "1", fails("INVALID_PRICE_DATA")),
                ScenarioStep::Assert {
                    condition: AssertCondition::ValuationFails {
                        code: "INVALID_PRICE_DATA".to_string(),
                    },
                },
                ScenarioStep::SetPrice {
                    asset: "NATIVE".to_string(),
                    price: 1_00000000,
                    decimals: 8,
                },
                withdraw("alice", "NATIVE", "1", Expect::Success),
                balance("alice", "NATIVE", 9_000_000),
            ],
        }
    }

    /// The nested call made from the payout sees the debited balance and
    /// is refused.
    fn reentrancy() -> Self {
        Self {
            name: "reentrancy".to_string(),
            description: "A withdrawal re-entered from its own payout cannot double-spend"
                .to_string(),
            steps: vec![
                deposit("alice", "NATIVE", "3", Expect::Success),
                ScenarioStep::ReentrantWithdraw {
                    user: "alice".to_string(),
                    asset: "NATIVE".to_string(),
                    amount: "2".to_string(),
                },
                balance("alice", "NATIVE", 1_000_000),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_named_scenario_loads() {
        for name in SCENARIOS {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("unknown").is_err());
    }

    #[test]
    fn test_scenario_json_round_trip() {
        let scenario = Scenario::load("bank-cap").unwrap();
        let json = serde_json::to_string(&scenario).unwrap();
        let parsed: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.steps.len(), scenario.steps.len());
    }
}
