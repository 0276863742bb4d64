//! # Summary
//!
//! Toy money-transfer workload for the mutual exclusion engine. Each process
//! owns one account; while holding the critical section it moves random
//! amounts to random peers, which credit them on receipt.

use rand::Rng;
use serde_derive::{Deserialize, Serialize};

/// Balance every account starts with.
pub const INITIAL_BALANCE: u64 = 1000;

/// Smallest and largest transfer, inclusive.
pub const TRANSFER_RANGE: (u64, u64) = (10, 99);

/// Transfers made per critical section.
pub const TRANSFERS_PER_ROUND: usize = 2;

/// Money in transit from one account to another.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Deposit {
    pub amount: u64,
}

#[derive(Clone, Debug)]
pub struct Account {
    id: usize,
    count: usize,
    balance: u64,
}

impl Account {
    pub fn new(id: usize, count: usize) -> Self {
        Account {
            id,
            count,
            balance: INITIAL_BALANCE,
        }
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn deposit(&mut self, deposit: Deposit) {
        self.balance += deposit.amount;
    }

    /// Debits a random amount for a random peer.
    ///
    /// Returns `None` when there is nobody to pay or the balance cannot
    /// cover the drawn amount.
    pub fn transfer<R: Rng>(&mut self, rng: &mut R) -> Option<(usize, Deposit)> {
        if self.count < 2 {
            return None
        }
        let mut to = rng.gen_range(0..self.count - 1);
        if to >= self.id {
            to += 1;
        }
        let amount = rng.gen_range(TRANSFER_RANGE.0..=TRANSFER_RANGE.1);
        if amount > self.balance {
            return None
        }
        self.balance -= amount;
        Some((to, Deposit { amount }))
    }
}

#[cfg(test)]
mod tests {

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn transfers_go_to_peers_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for id in 0..4 {
            let mut account = Account::new(id, 4);
            for _ in 0..10 {
                let before = account.balance();
                let (to, deposit) = account.transfer(&mut rng).unwrap();
                assert_ne!(to, id);
                assert!(to < 4);
                assert!(deposit.amount >= TRANSFER_RANGE.0 && deposit.amount <= TRANSFER_RANGE.1);
                assert_eq!(account.balance(), before - deposit.amount);
            }
        }
    }

    #[test]
    fn money_is_conserved() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut accounts = (0..3).map(|id| Account::new(id, 3)).collect::<Vec<_>>();
        for round in 0..30 {
            if let Some((to, deposit)) = accounts[round % 3].transfer(&mut rng) {
                accounts[to].deposit(deposit);
            }
        }
        let total = accounts.iter().map(Account::balance).sum::<u64>();
        assert_eq!(total, 3 * INITIAL_BALANCE);
    }

    #[test]
    fn lone_or_broke_accounts_do_not_transfer() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(Account::new(0, 1).transfer(&mut rng).is_none());

        let mut broke = Account::new(0, 2);
        broke.balance = 5;
        assert!(broke.transfer(&mut rng).is_none());
        assert_eq!(broke.balance(), 5);
    }
}
