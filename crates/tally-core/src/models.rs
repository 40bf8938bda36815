use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::standards::AccountType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub parent_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Aggregation accounts only roll up children and cannot carry journal lines.
    #[serde(default = "default_true")]
    pub allows_movements: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostCenter {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThirdPartyKind {
    Customer,
    Supplier,
    Employee,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThirdParty {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub kind: ThirdPartyKind,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub payment_term_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentTerm {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub days: i64,
    #[serde(default)]
    pub discount_pct: Decimal,
    #[serde(default)]
    pub discount_days: i64,
}

impl PaymentTerm {
    /// `None` when the term pushes the date out of the representable range.
    pub fn due_date(&self, issued_on: NaiveDate) -> Option<NaiveDate> {
        issued_on.checked_add_signed(chrono::TimeDelta::try_days(self.days)?)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JournalEntryStatus {
    Draft,
    Posted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalLine {
    pub account_id: Uuid,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    pub cost_center_id: Option<Uuid>,
    pub third_party_id: Option<Uuid>,
    pub description: Option<String>,
}

impl JournalLine {
    pub fn debit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: amount,
            credit: Decimal::ZERO,
            cost_center_id: None,
            third_party_id: None,
            description: None,
        }
    }

    pub fn credit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: Decimal::ZERO,
            credit: amount,
            cost_center_id: None,
            third_party_id: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalError {
    #[error("journal entry has no lines")]
    Empty,
    #[error("line {index} must carry either a debit or a credit, not both")]
    MixedLine { index: usize },
    #[error("line {index} has a negative amount")]
    NegativeAmount { index: usize },
    #[error("journal entry is unbalanced: debits {debits} != credits {credits}")]
    Unbalanced { debits: Decimal, credits: Decimal },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub id: Uuid,
    pub number: Option<String>,
    pub date: NaiveDate,
    pub description: String,
    pub status: JournalEntryStatus,
    pub lines: Vec<JournalLine>,
    pub created_at: Option<DateTime<Utc>>,
}

impl JournalEntry {
    pub fn draft(date: NaiveDate, description: impl Into<String>, lines: Vec<JournalLine>) -> Self {
        Self {
            id: Uuid::new_v4(),
            number: None,
            date,
            description: description.into(),
            status: JournalEntryStatus::Draft,
            lines,
            created_at: None,
        }
    }

    pub fn total_debits(&self) -> Decimal {
        self.lines.iter().map(|line| line.debit).sum()
    }

    pub fn total_credits(&self) -> Decimal {
        self.lines.iter().map(|line| line.credit).sum()
    }

    pub fn validate(&self) -> Result<(), JournalError> {
        if self.lines.is_empty() {
            return Err(JournalError::Empty);
        }

        for (index, line) in self.lines.iter().enumerate() {
            if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO {
                return Err(JournalError::NegativeAmount { index });
            }
            if !line.debit.is_zero() && !line.credit.is_zero() {
                return Err(JournalError::MixedLine { index });
            }
        }

        let debits = self.total_debits();
        let credits = self.total_credits();
        if debits != credits {
            return Err(JournalError::Unbalanced { debits, credits });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
}

impl InvoiceLine {
    pub fn subtotal(&self) -> Decimal {
        (self.quantity * self.unit_price).round_dp(2)
    }

    pub fn tax(&self) -> Decimal {
        (self.subtotal() * self.tax_rate).round_dp(2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: Uuid,
    pub number: String,
    pub third_party_id: Uuid,
    pub payment_term_id: Option<Uuid>,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: String,
    pub status: InvoiceStatus,
    pub lines: Vec<InvoiceLine>,
}

impl Invoice {
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(InvoiceLine::subtotal).sum()
    }

    pub fn tax_total(&self) -> Decimal {
        self.lines.iter().map(InvoiceLine::tax).sum()
    }

    pub fn total(&self) -> Decimal {
        self.subtotal() + self.tax_total()
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 31).expect("valid date")
    }

    #[test]
    fn balanced_entry_validates() {
        let cash = Uuid::new_v4();
        let revenue = Uuid::new_v4();
        let entry = JournalEntry::draft(
            date(),
            "Invoice posted",
            vec![
                JournalLine::debit(cash, Decimal::new(12050, 2)),
                JournalLine::credit(revenue, Decimal::new(12050, 2)),
            ],
        );

        assert_eq!(entry.validate(), Ok(()));
        assert_eq!(entry.total_debits(), Decimal::new(12050, 2));
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let entry = JournalEntry::draft(
            date(),
            "Broken",
            vec![
                JournalLine::debit(Uuid::new_v4(), Decimal::new(100, 0)),
                JournalLine::credit(Uuid::new_v4(), Decimal::new(90, 0)),
            ],
        );

        assert_eq!(
            entry.validate(),
            Err(JournalError::Unbalanced {
                debits: Decimal::new(100, 0),
                credits: Decimal::new(90, 0),
            })
        );
    }

    #[test]
    fn empty_and_mixed_lines_are_rejected() {
        let empty = JournalEntry::draft(date(), "Empty", Vec::new());
        assert_eq!(empty.validate(), Err(JournalError::Empty));

        let mut line = JournalLine::debit(Uuid::new_v4(), Decimal::ONE);
        line.credit = Decimal::ONE;
        let mixed = JournalEntry::draft(date(), "Mixed", vec![line]);
        assert_eq!(mixed.validate(), Err(JournalError::MixedLine { index: 0 }));
    }

    #[test]
    fn invoice_totals_include_tax() {
        let invoice = Invoice {
            id: Uuid::new_v4(),
            number: "F-0001".to_string(),
            third_party_id: Uuid::new_v4(),
            payment_term_id: None,
            issue_date: date(),
            due_date: None,
            currency: "EUR".to_string(),
            status: InvoiceStatus::Draft,
            lines: vec![InvoiceLine {
                description: "Consulting".to_string(),
                quantity: Decimal::new(3, 0),
                unit_price: Decimal::new(10000, 2),
                tax_rate: Decimal::new(21, 2),
            }],
        };

        assert_eq!(invoice.subtotal(), Decimal::new(30000, 2));
        assert_eq!(invoice.tax_total(), Decimal::new(6300, 2));
        assert_eq!(invoice.total(), Decimal::new(36300, 2));
    }

    #[test]
    fn payment_term_due_date_adds_days() {
        let mut term = PaymentTerm {
            id: Uuid::new_v4(),
            code: "NET30".to_string(),
            name: "Net 30".to_string(),
            days: 30,
            discount_pct: Decimal::ZERO,
            discount_days: 0,
        };
        assert_eq!(term.due_date(date()), NaiveDate::from_ymd_opt(2026, 4, 30));

        term.days = i64::MAX;
        assert_eq!(term.due_date(date()), None);
        term.days = 400_000_000;
        assert_eq!(term.due_date(date()), None);
    }
}
