use chronicle::{AggregateRoot, AggregateStore, LoadError, SaveError, WriteContext};
use chronicle_serde::json::JsonEncoder;
use chronicle_sql::SqlEventLog;

use crate::domain::{self, Account};

type Store = AggregateStore<SqlEventLog<JsonEncoder>, JsonEncoder>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Domain(#[from] domain::Error),
    #[error(transparent)]
    Load(#[from] LoadError<chronicle_sql::Error>),
    #[error(transparent)]
    Save(#[from] SaveError<chronicle_sql::Error>),
}

/// Thin read-write facade over `AggregateStore`, one method per use case.
///
/// Transfers are deliberately two separate saves against two separate
/// streams rather than one atomic operation: cross-stream transactions
/// are out of scope, so a transfer that fails between the withdrawal and
/// the deposit leaves the withdrawal committed. A real deployment would
/// reconcile this with a compensating projection; this demo only logs it.
#[derive(Clone)]
pub struct Application {
    store: Store,
}

impl Application {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn open_account(&self, id: &str, holder: &str, initial_balance: i64) -> Result<(), Error> {
        let mut root = self.new_account(id);
        domain::open(&mut root, holder, initial_balance)?;
        self.store.save(&root, WriteContext::default()).await?;
        Ok(())
    }

    pub async fn deposit(&self, id: &str, amount: i64) -> Result<(), Error> {
        let mut root = self.store.by_id::<Account>(id).await?;
        domain::deposit(&mut root, amount)?;
        self.store.save(&root, WriteContext::default()).await?;
        Ok(())
    }

    pub async fn withdraw(&self, id: &str, amount: i64) -> Result<(), Error> {
        let mut root = self.store.by_id::<Account>(id).await?;
        domain::withdraw(&mut root, amount)?;
        self.store.save(&root, WriteContext::default()).await?;
        Ok(())
    }

    pub async fn close_account(&self, id: &str) -> Result<(), Error> {
        let mut root = self.store.by_id::<Account>(id).await?;
        domain::close(&mut root)?;
        self.store.save(&root, WriteContext::default()).await?;
        Ok(())
    }

    pub async fn transfer(&self, from_id: &str, to_id: &str, amount: i64) -> Result<(), Error> {
        let correlation_id = chronicle::EventId::new();

        let mut sender = self.store.by_id::<Account>(from_id).await?;
        domain::withdraw(&mut sender, amount)?;
        self.store
            .save(&sender, WriteContext::default().with_correlation_id(correlation_id))
            .await?;

        let mut beneficiary = self.store.by_id::<Account>(to_id).await?;
        domain::deposit(&mut beneficiary, amount)?;
        self.store
            .save(&beneficiary, WriteContext::default().with_correlation_id(correlation_id))
            .await?;

        Ok(())
    }

    pub async fn balance(&self, id: &str) -> Result<i64, Error> {
        let root = self.store.by_id::<Account>(id).await?;
        Ok(root.state().balance())
    }

    fn new_account(&self, id: &str) -> AggregateRoot<Account> {
        let mut root = AggregateRoot::new(id);
        root.rehydrate(std::iter::empty())
            .expect("rehydrating zero events cannot fail");
        root
    }
}
