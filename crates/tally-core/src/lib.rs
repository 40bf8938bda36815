pub mod events;
pub mod models;
pub mod standards;

pub use events::{LedgerEvent, LedgerEventKind};
pub use models::{
    Account, CostCenter, Invoice, InvoiceLine, InvoiceStatus, JournalEntry, JournalEntryStatus,
    JournalError, JournalLine, PaymentTerm, ThirdParty, ThirdPartyKind,
};
pub use standards::{AccountType, NormalBalance};
