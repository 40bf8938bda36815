use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NormalBalance {
    Debit,
    Credit,
}

/// Top-level classification of a chart-of-accounts entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub fn normal_balance(self) -> NormalBalance {
        match self {
            AccountType::Asset | AccountType::Expense => NormalBalance::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => {
                NormalBalance::Credit
            }
        }
    }

    /// Signed balance of an account of this type given its movement totals.
    pub fn balance(self, debit: Decimal, credit: Decimal) -> Decimal {
        match self.normal_balance() {
            NormalBalance::Debit => debit - credit,
            NormalBalance::Credit => credit - debit,
        }
    }

    /// Conventional leading digit of account codes of this type.
    pub fn code_prefix(self) -> char {
        match self {
            AccountType::Asset => '1',
            AccountType::Liability => '2',
            AccountType::Equity => '3',
            AccountType::Revenue => '4',
            AccountType::Expense => '5',
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.chars().next()? {
            '1' => Some(AccountType::Asset),
            '2' => Some(AccountType::Liability),
            '3' => Some(AccountType::Equity),
            '4' => Some(AccountType::Revenue),
            '5' | '6' => Some(AccountType::Expense),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn credit_normal_accounts_grow_with_credits() {
        let balance = AccountType::Revenue.balance(Decimal::new(100, 0), Decimal::new(350, 0));
        assert_eq!(balance, Decimal::new(250, 0));
        assert_eq!(AccountType::Asset.normal_balance(), NormalBalance::Debit);
    }

    #[test]
    fn code_prefix_round_trips_through_from_code() {
        for kind in [
            AccountType::Asset,
            AccountType::Liability,
            AccountType::Equity,
            AccountType::Revenue,
            AccountType::Expense,
        ] {
            let code = format!("{}100", kind.code_prefix());
            assert_eq!(AccountType::from_code(&code), Some(kind));
        }
        assert_eq!(AccountType::from_code("9000"), None);
        assert_eq!(AccountType::from_code(""), None);
    }
}
