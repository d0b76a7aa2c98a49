//! Account balances. Orthogonal to consensus; serialized behind its own
//! lock, independent of the chain lock.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::crypto::Address;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account {0} can not be found in the ledger")]
    UnknownAccount(Address),
    #[error("account {from} does not have sufficient funds to transfer {amount}")]
    InsufficientFunds { from: Address, amount: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
    pub balance: u64,
}

#[derive(Default)]
pub struct Ledger {
    accounts: RwLock<HashMap<Address, Account>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or resets) an account with a zero balance.
    pub fn create_account(&self, address: Address) -> Account {
        let account = Account { address, balance: 0 };
        self.accounts.write().insert(address, account);
        account
    }

    pub fn account(&self, address: &Address) -> Result<Account, LedgerError> {
        self.accounts
            .read()
            .get(address)
            .copied()
            .ok_or(LedgerError::UnknownAccount(*address))
    }

    pub fn balance(&self, address: &Address) -> Result<u64, LedgerError> {
        self.account(address).map(|a| a.balance)
    }

    /// Test/bootstrap helper: credits an account, creating it if needed.
    pub fn credit(&self, address: Address, amount: u64) {
        let mut accounts = self.accounts.write();
        let account = accounts.entry(address).or_insert(Account { address, balance: 0 });
        account.balance = account.balance.saturating_add(amount);
    }

    /// Moves `amount` between accounts; the recipient is created on
    /// demand, the sender must exist and have sufficient funds.
    pub fn transfer(&self, from: Address, to: Address, amount: u64) -> Result<(), LedgerError> {
        let mut accounts = self.accounts.write();

        let sender = accounts.get(&from).ok_or(LedgerError::UnknownAccount(from))?;
        if sender.balance < amount {
            return Err(LedgerError::InsufficientFunds { from, amount });
        }

        if let Some(sender) = accounts.get_mut(&from) {
            sender.balance -= amount;
        }
        let recipient = accounts.entry(to).or_insert(Account { address: to, balance: 0 });
        recipient.balance += amount;

        Ok(())
    }
}
