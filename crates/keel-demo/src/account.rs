//! Sample `Account` aggregate: open, deposit, withdraw.

use std::sync::LazyLock;

use keel_core::aggregate::{Aggregate, AggregateRoot};
use keel_core::command::Command;
use keel_core::error::DomainError;
use keel_core::event::EventType;
use keel_core::handler::HandlerTable;
use serde::{Deserialize, Serialize};

/// Event tags of the `Account` aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountEvent {
    Opened,
    Deposited,
    Withdrawn,
}

impl EventType for AccountEvent {
    const ALL: &'static [Self] = &[Self::Opened, Self::Deposited, Self::Withdrawn];

    fn name(self) -> &'static str {
        match self {
            Self::Opened => "account.opened",
            Self::Deposited => "account.deposited",
            Self::Withdrawn => "account.withdrawn",
        }
    }
}

/// Payload of `account.opened`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub owner: String,
}

/// Payload of `account.deposited` and `account.withdrawn`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmountMoved {
    /// Amount in minor units.
    pub amount: u64,
}

/// Account state folded from its history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub owner: Option<String>,
    /// Balance in minor units.
    pub balance: u64,
    pub transactions: u32,
}

impl Account {
    fn on_opened(&mut self, payload: AccountOpened) {
        self.owner = Some(payload.owner);
    }

    fn on_deposited(&mut self, payload: AmountMoved) {
        self.balance = self.balance.saturating_add(payload.amount);
        self.transactions += 1;
    }

    fn on_withdrawn(&mut self, payload: AmountMoved) {
        self.balance = self.balance.saturating_sub(payload.amount);
        self.transactions += 1;
    }
}

impl Aggregate for Account {
    const KIND: &'static str = "account";
    type EventType = AccountEvent;

    fn handlers() -> &'static HandlerTable<Self> {
        static HANDLERS: LazyLock<HandlerTable<Account>> = LazyLock::new(|| {
            HandlerTable::new()
                .on(AccountEvent::Opened, Account::on_opened)
                .on(AccountEvent::Deposited, Account::on_deposited)
                .on(AccountEvent::Withdrawn, Account::on_withdrawn)
        });
        &HANDLERS
    }

    fn capture_state(&self) -> Result<serde_json::Value, DomainError> {
        serde_json::to_value(self)
            .map_err(|e| DomainError::Infrastructure(format!("account capture failed: {e}")))
    }

    fn restore_state(state: serde_json::Value) -> Result<Self, DomainError> {
        serde_json::from_value(state)
            .map_err(|e| DomainError::Infrastructure(format!("account restore failed: {e}")))
    }
}

/// Command to open an account.
#[derive(Debug, Clone)]
pub struct OpenAccount {
    pub command_id: String,
    pub owner: String,
}

/// Command to deposit or withdraw an amount.
#[derive(Debug, Clone)]
pub struct MoveFunds {
    pub command_id: String,
    pub amount: u64,
}

impl Command for OpenAccount {
    fn command_type(&self) -> &'static str {
        "account.open"
    }

    fn command_id(&self) -> &str {
        &self.command_id
    }
}

impl Command for MoveFunds {
    fn command_type(&self) -> &'static str {
        "account.move_funds"
    }

    fn command_id(&self) -> &str {
        &self.command_id
    }
}

/// Opens the account. Opening an open account is a no-op.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a blank owner.
pub fn open_account(
    root: &mut AggregateRoot<Account>,
    command: &OpenAccount,
) -> Result<(), DomainError> {
    root.execute(command, |root, command| {
        if command.owner.trim().is_empty() {
            return Err(DomainError::Validation("account owner must not be empty".into()));
        }
        if root.state().owner.is_some() {
            return Ok(());
        }
        root.raise(AccountEvent::Opened, &AccountOpened {
            owner: command.owner.clone(),
        })
    })
}

/// Deposits `command.amount`.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the account is not open or the amount
/// is zero.
pub fn deposit(root: &mut AggregateRoot<Account>, command: &MoveFunds) -> Result<(), DomainError> {
    root.execute(command, |root, command| {
        ensure_movable(root, command)?;
        root.raise(AccountEvent::Deposited, &AmountMoved {
            amount: command.amount,
        })
    })
}

/// Withdraws `command.amount`.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the account is not open, the amount
/// is zero, or the balance does not cover it.
pub fn withdraw(root: &mut AggregateRoot<Account>, command: &MoveFunds) -> Result<(), DomainError> {
    root.execute(command, |root, command| {
        ensure_movable(root, command)?;
        if command.amount > root.state().balance {
            return Err(DomainError::Validation(format!(
                "insufficient funds: balance {}, requested {}",
                root.state().balance,
                command.amount
            )));
        }
        root.raise(AccountEvent::Withdrawn, &AmountMoved {
            amount: command.amount,
        })
    })
}

fn ensure_movable(root: &AggregateRoot<Account>, command: &MoveFunds) -> Result<(), DomainError> {
    if root.state().owner.is_none() {
        return Err(DomainError::Validation(format!(
            "account {} is not open",
            root.aggregate_id()
        )));
    }
    if command.amount == 0 {
        return Err(DomainError::Validation("amount must be positive".into()));
    }
    Ok(())
}
