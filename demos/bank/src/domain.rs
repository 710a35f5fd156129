use chronicle::{AggregateRoot, DomainEvent, HandlerTable, Reducer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, DomainEvent)]
pub struct AccountOpened {
    pub holder: String,
    pub initial_balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, DomainEvent)]
pub struct AmountDeposited {
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, DomainEvent)]
pub struct AmountWithdrawn {
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, DomainEvent)]
pub struct AccountClosed;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("account is already open")]
    AlreadyOpened,
    #[error("account not found")]
    NotOpened,
    #[error("account is closed")]
    Closed,
}

/// Aggregate state for a single bank account. Holds no identity of its
/// own — `AggregateRoot<Account>` supplies id/version/uncommitted — only
/// the fields domain methods below read and mutate.
#[derive(Default, Debug)]
pub struct Account {
    holder: String,
    balance: i64,
    opened: bool,
    closed: bool,
}

impl Account {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }
}

impl Reducer for Account {
    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
            .on::<AccountOpened, _>(|a, e| {
                a.holder = e.holder.clone();
                a.balance = e.initial_balance;
                a.opened = true;
            })
            .on::<AmountDeposited, _>(|a, e| a.balance += e.amount)
            .on::<AmountWithdrawn, _>(|a, e| a.balance -= e.amount)
            .on::<AccountClosed, _>(|a, _| a.closed = true)
    }
}

fn ensure_open(state: &Account) -> Result<(), Error> {
    if !state.opened {
        return Err(Error::NotOpened);
    }
    if state.closed {
        return Err(Error::Closed);
    }
    Ok(())
}

pub fn open(root: &mut AggregateRoot<Account>, holder: impl Into<String>, initial_balance: i64) -> Result<(), Error> {
    if root.state().opened {
        return Err(Error::AlreadyOpened);
    }
    if initial_balance < 0 {
        return Err(Error::InvalidAmount);
    }
    root.apply(AccountOpened {
        holder: holder.into(),
        initial_balance,
    })
    .expect("AccountOpened is registered with Account::handlers");
    Ok(())
}

pub fn deposit(root: &mut AggregateRoot<Account>, amount: i64) -> Result<(), Error> {
    ensure_open(root.state())?;
    if amount <= 0 {
        return Err(Error::InvalidAmount);
    }
    root.apply(AmountDeposited { amount })
        .expect("AmountDeposited is registered with Account::handlers");
    Ok(())
}

pub fn withdraw(root: &mut AggregateRoot<Account>, amount: i64) -> Result<(), Error> {
    ensure_open(root.state())?;
    if amount <= 0 {
        return Err(Error::InvalidAmount);
    }
    if root.state().balance < amount {
        return Err(Error::InsufficientBalance);
    }
    root.apply(AmountWithdrawn { amount })
        .expect("AmountWithdrawn is registered with Account::handlers");
    Ok(())
}

pub fn close(root: &mut AggregateRoot<Account>) -> Result<(), Error> {
    ensure_open(root.state())?;
    root.apply(AccountClosed)
        .expect("AccountClosed is registered with Account::handlers");
    Ok(())
}
