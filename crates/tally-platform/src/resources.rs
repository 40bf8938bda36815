use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tally_core::{
    Account, CostCenter, Invoice, JournalEntry, LedgerEvent, LedgerEventKind, PaymentTerm,
    ThirdParty,
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::client::{ApiClient, ApiError};

/// A record exposed by the backend as a paginated CRUD collection.
pub trait Resource: Serialize + DeserializeOwned + Send + Sync {
    const PATH: &'static str;
    const NAME: &'static str;

    fn id(&self) -> Uuid;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Event announcing a change to the record, for resources other views track.
    fn change_event(_id: Uuid, _kind: LedgerEventKind) -> Option<LedgerEvent> {
        None
    }
}

impl Resource for Account {
    const PATH: &'static str = "accounts";
    const NAME: &'static str = "account";

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("account code is required".to_string());
        }
        match tally_core::AccountType::from_code(&self.code) {
            Some(kind) if kind != self.account_type => Err(format!(
                "account code {} does not belong to {:?} accounts",
                self.code, self.account_type
            )),
            _ => Ok(()),
        }
    }
}

impl Resource for JournalEntry {
    const PATH: &'static str = "journal-entries";
    const NAME: &'static str = "journal entry";

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), String> {
        JournalEntry::validate(self).map_err(|err| err.to_string())
    }

    fn change_event(id: Uuid, kind: LedgerEventKind) -> Option<LedgerEvent> {
        Some(LedgerEvent::JournalEntryChanged { id, kind })
    }
}

impl Resource for CostCenter {
    const PATH: &'static str = "cost-centers";
    const NAME: &'static str = "cost center";

    fn id(&self) -> Uuid {
        self.id
    }

    fn change_event(id: Uuid, kind: LedgerEventKind) -> Option<LedgerEvent> {
        Some(LedgerEvent::CostCenterChanged { id, kind })
    }
}

impl Resource for ThirdParty {
    const PATH: &'static str = "third-parties";
    const NAME: &'static str = "third party";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Resource for PaymentTerm {
    const PATH: &'static str = "payment-terms";
    const NAME: &'static str = "payment term";

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), String> {
        if self.days < 0 || self.discount_days < 0 {
            return Err("payment term days cannot be negative".to_string());
        }
        if self.discount_days > self.days {
            return Err("discount period cannot exceed the payment term".to_string());
        }
        if self.due_date(chrono::Utc::now().date_naive()).is_none() {
            return Err(format!("payment term of {} days is out of range", self.days));
        }
        Ok(())
    }
}

impl Resource for Invoice {
    const PATH: &'static str = "invoices";
    const NAME: &'static str = "invoice";

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), String> {
        if self.lines.is_empty() {
            return Err("invoice has no lines".to_string());
        }
        Ok(())
    }
}

/// One page of a collection. The backend contract names the list `items`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.page_size))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) < self.total_pages()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
            search: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("invalid {resource}: {message}")]
    Invalid {
        resource: &'static str,
        message: String,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Clone)]
pub struct ResourceClient {
    api: ApiClient,
    events: EventBus<LedgerEvent>,
}

impl ResourceClient {
    pub fn new(api: ApiClient, events: EventBus<LedgerEvent>) -> Self {
        Self { api, events }
    }

    pub async fn list<T: Resource>(&self, request: &PageRequest) -> Result<Page<T>, ResourceError> {
        let page = request.page.to_string();
        let page_size = request.page_size.to_string();
        let mut query = vec![("page", page.as_str()), ("page_size", page_size.as_str())];
        if let Some(search) = request.search.as_deref() {
            query.push(("search", search));
        }

        Ok(self.api.get_json(&[T::PATH], &query).await?)
    }

    pub async fn get<T: Resource>(&self, id: Uuid) -> Result<T, ResourceError> {
        let id = id.to_string();
        Ok(self.api.get_json(&[T::PATH, id.as_str()], &[]).await?)
    }

    pub async fn create<T: Resource>(&self, record: &T) -> Result<T, ResourceError> {
        validate(record)?;
        let created: T = self.api.post_json(&[T::PATH], record).await?;
        info!(resource = T::NAME, id = %created.id(), "created");
        self.announce::<T>(created.id(), LedgerEventKind::Created);
        Ok(created)
    }

    pub async fn update<T: Resource>(&self, record: &T) -> Result<T, ResourceError> {
        validate(record)?;
        let id = record.id().to_string();
        let updated: T = self.api.put_json(&[T::PATH, id.as_str()], record).await?;
        info!(resource = T::NAME, id = %updated.id(), "updated");
        self.announce::<T>(updated.id(), LedgerEventKind::Updated);
        Ok(updated)
    }

    pub async fn delete<T: Resource>(&self, id: Uuid) -> Result<(), ResourceError> {
        self.api.delete(&[T::PATH, id.to_string().as_str()]).await?;
        info!(resource = T::NAME, %id, "deleted");
        self.announce::<T>(id, LedgerEventKind::Deleted);
        Ok(())
    }

    fn announce<T: Resource>(&self, id: Uuid, kind: LedgerEventKind) {
        if let Some(event) = T::change_event(id, kind) {
            self.events.publish(event);
        }
    }
}

fn validate<T: Resource>(record: &T) -> Result<(), ResourceError> {
    record.validate().map_err(|message| ResourceError::Invalid {
        resource: T::NAME,
        message,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tally_core::AccountType;

    use super::*;

    #[test]
    fn page_requires_items_key() {
        let ok: Page<u32> = serde_json::from_value(json!({
            "items": [1, 2], "total": 2, "page": 1, "page_size": 50
        }))
        .unwrap();
        assert_eq!(ok.items, vec![1, 2]);

        let drifted = serde_json::from_value::<Page<u32>>(json!({
            "data": [1, 2], "total": 2, "page": 1, "page_size": 50
        }));
        assert!(drifted.is_err());
    }

    #[test]
    fn page_counts() {
        let page = Page::<u32> {
            items: Vec::new(),
            total: 101,
            page: 2,
            page_size: 50,
        };
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());
    }

    #[test]
    fn account_code_must_match_type() {
        let mut account = Account {
            id: Uuid::new_v4(),
            code: "4000".to_string(),
            name: "Sales".to_string(),
            account_type: AccountType::Revenue,
            parent_id: None,
            is_active: true,
            allows_movements: true,
            description: None,
        };
        assert!(Resource::validate(&account).is_ok());

        account.account_type = AccountType::Asset;
        assert!(Resource::validate(&account).is_err());
    }

    #[test]
    fn payment_term_days_must_yield_a_due_date() {
        let mut term = PaymentTerm {
            id: Uuid::new_v4(),
            code: "NET30".to_string(),
            name: "Net 30".to_string(),
            days: 30,
            discount_pct: rust_decimal::Decimal::ZERO,
            discount_days: 10,
        };
        assert!(Resource::validate(&term).is_ok());

        term.days = i64::MAX;
        assert_eq!(
            Resource::validate(&term).unwrap_err(),
            format!("payment term of {} days is out of range", i64::MAX)
        );

        term.days = 5;
        assert!(Resource::validate(&term).is_err());
    }

    #[test]
    fn only_tracked_resources_emit_events() {
        let id = Uuid::new_v4();
        assert_eq!(
            <CostCenter as Resource>::change_event(id, LedgerEventKind::Deleted),
            Some(LedgerEvent::CostCenterChanged {
                id,
                kind: LedgerEventKind::Deleted
            })
        );
        assert!(<ThirdParty as Resource>::change_event(id, LedgerEventKind::Created).is_none());
    }
}
