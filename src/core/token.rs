//! Token ledgers.
//!
//! The engine mints, burns and moves the debt token (USDD) through the
//! [`TokenLedger`] trait. [`InMemoryTokenLedger`] is the reference
//! implementation used by tests and simulations; the same type serves the
//! reward token (DEFT) used by the staking side-ledger.
//!
//! Ordinary transfers to protocol-internal addresses are refused. The
//! protocol itself moves tokens in and out of its pools through the
//! privileged `send_to_pool` / `return_from_pool` calls.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::utils::constants::DEFAULT_MAX_EVENTS;
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::{add, sub};

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN LEDGER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// A mintable, burnable balance ledger
pub trait TokenLedger {
    /// Balance of `account`
    fn balance_of(&self, account: &Address) -> U256;

    /// Total supply
    fn total_supply(&self) -> U256;

    /// Create `amount` tokens for `to`
    fn mint(&mut self, to: Address, amount: U256) -> Result<()>;

    /// Destroy `amount` tokens held by `from`
    fn burn(&mut self, from: Address, amount: U256) -> Result<()>;

    /// User transfer; rejects protocol-internal recipients
    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<()>;

    /// Protocol move of a user's tokens into a pool
    fn send_to_pool(&mut self, from: Address, pool: Address, amount: U256) -> Result<()>;

    /// Protocol move of a pool's tokens to a user
    fn return_from_pool(&mut self, pool: Address, to: Address, amount: U256) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Type of token operation for event logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenOperation {
    /// New tokens created
    Mint,
    /// Tokens destroyed
    Burn,
    /// Transfer between accounts
    Transfer,
}

/// Record of a token operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    /// Type of operation
    pub operation: TokenOperation,
    /// Sender (None for mint)
    pub from: Option<Address>,
    /// Recipient (None for burn)
    pub to: Option<Address>,
    /// Amount moved
    pub amount: U256,
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Balance ledger kept in memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryTokenLedger {
    /// Token name
    pub name: String,
    /// Token symbol
    pub symbol: String,
    /// Total supply
    total_supply: U256,
    /// Balances by address
    balances: BTreeMap<Address, U256>,
    /// Addresses that ordinary transfers may not target
    protected: BTreeSet<Address>,
    /// Recent events
    events: Vec<TokenEvent>,
    /// Maximum events to keep in memory
    max_events: usize,
}

impl InMemoryTokenLedger {
    /// Create an empty ledger
    pub fn new(name: &str, symbol: &str) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            total_supply: U256::zero(),
            balances: BTreeMap::new(),
            protected: BTreeSet::new(),
            events: Vec::new(),
            max_events: DEFAULT_MAX_EVENTS,
        }
    }

    /// The USDD debt token, protecting the given protocol addresses
    pub fn usdd(protected: impl IntoIterator<Item = Address>) -> Self {
        Self::new("USDD Stablecoin", "USDD").with_protected(protected)
    }

    /// The DEFT reward token, protecting the given protocol addresses
    pub fn deft(protected: impl IntoIterator<Item = Address>) -> Self {
        Self::new("DEFT", "DEFT").with_protected(protected)
    }

    /// Add addresses to the transfer blacklist
    pub fn with_protected(mut self, protected: impl IntoIterator<Item = Address>) -> Self {
        self.protected.extend(protected);
        self
    }

    /// Whether `address` is on the transfer blacklist
    pub fn is_protected(&self, address: &Address) -> bool {
        self.protected.contains(address)
    }

    /// Number of addresses holding a balance
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    /// Verify supply invariant (total_supply == sum of all balances)
    pub fn verify_supply_invariant(&self) -> bool {
        let sum = self
            .balances
            .values()
            .fold(U256::zero(), |acc, b| acc.saturating_add(*b));
        sum == self.total_supply
    }

    /// Get recent events
    pub fn recent_events(&self) -> &[TokenEvent] {
        &self.events
    }

    /// Hash of supply and balances, stable across runs
    pub fn state_hash(&self) -> Hash {
        let mut data = Vec::new();
        let mut word = [0u8; 32];
        self.total_supply.to_big_endian(&mut word);
        data.extend_from_slice(&word);

        for (address, balance) in &self.balances {
            data.extend_from_slice(address.as_bytes());
            balance.to_big_endian(&mut word);
            data.extend_from_slice(&word);
        }

        Hash::sha256(&data)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    fn credit(&mut self, to: Address, amount: U256) -> Result<()> {
        let balance = add(self.balance_of(&to), amount)?;
        self.balances.insert(to, balance);
        Ok(())
    }

    fn debit(&mut self, from: Address, amount: U256) -> Result<()> {
        let available = self.balance_of(&from);
        if available < amount {
            return Err(Error::InsufficientBalance {
                required: amount,
                available,
            });
        }
        let remaining = available - amount;
        if remaining.is_zero() {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, remaining);
        }
        Ok(())
    }

    fn move_tokens(&mut self, from: Address, to: Address, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        if from == to {
            return Ok(());
        }
        // Check the credit side before debiting so a failure leaves no trace
        add(self.balance_of(&to), amount)?;
        self.debit(from, amount)?;
        self.credit(to, amount)?;
        self.add_event(TokenEvent {
            operation: TokenOperation::Transfer,
            from: Some(from),
            to: Some(to),
            amount,
        });
        Ok(())
    }

    fn add_event(&mut self, event: TokenEvent) {
        self.events.push(event);
        if self.events.len() > self.max_events {
            self.events.drain(0..self.events.len() - self.max_events);
        }
    }
}

impl TokenLedger for InMemoryTokenLedger {
    fn balance_of(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    fn total_supply(&self) -> U256 {
        self.total_supply
    }

    fn mint(&mut self, to: Address, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        let new_supply = add(self.total_supply, amount)?;
        self.credit(to, amount)?;
        self.total_supply = new_supply;
        self.add_event(TokenEvent {
            operation: TokenOperation::Mint,
            from: None,
            to: Some(to),
            amount,
        });
        Ok(())
    }

    fn burn(&mut self, from: Address, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        self.debit(from, amount)?;
        self.total_supply = sub(self.total_supply, amount)?;
        self.add_event(TokenEvent {
            operation: TokenOperation::Burn,
            from: Some(from),
            to: None,
            amount,
        });
        Ok(())
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<()> {
        if to.is_zero() || self.is_protected(&to) {
            return Err(Error::ProtectedRecipient(to));
        }
        self.move_tokens(from, to, amount)
    }

    fn send_to_pool(&mut self, from: Address, pool: Address, amount: U256) -> Result<()> {
        self.move_tokens(from, pool, amount)
    }

    fn return_from_pool(&mut self, pool: Address, to: Address, amount: U256) -> Result<()> {
        self.move_tokens(pool, to, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::math::to_wad;

    fn alice() -> Address {
        Address::from_label("alice")
    }

    fn bob() -> Address {
        Address::from_label("bob")
    }

    fn pool() -> Address {
        Address::from_label("pool")
    }

    #[test]
    fn test_mint() {
        let mut token = InMemoryTokenLedger::usdd([pool()]);
        token.mint(alice(), to_wad(100)).unwrap();
        assert_eq!(token.balance_of(&alice()), to_wad(100));
        assert_eq!(token.total_supply(), to_wad(100));
        assert!(matches!(token.mint(alice(), U256::zero()), Err(Error::ZeroAmount)));
    }

    #[test]
    fn test_burn_insufficient_balance() {
        let mut token = InMemoryTokenLedger::usdd([pool()]);
        token.mint(alice(), to_wad(10)).unwrap();
        let err = token.burn(alice(), to_wad(11)).unwrap_err();
        assert_eq!(
            err,
            Error::InsufficientBalance { required: to_wad(11), available: to_wad(10) }
        );
        assert_eq!(token.total_supply(), to_wad(10));

        token.burn(alice(), to_wad(10)).unwrap();
        assert_eq!(token.holder_count(), 0);
    }

    #[test]
    fn test_transfer_rejects_protected_recipient() {
        let mut token = InMemoryTokenLedger::usdd([pool()]);
        token.mint(alice(), to_wad(10)).unwrap();

        assert!(matches!(
            token.transfer(alice(), pool(), to_wad(1)),
            Err(Error::ProtectedRecipient(_))
        ));
        assert!(token.transfer(alice(), Address::ZERO, to_wad(1)).is_err());

        token.transfer(alice(), bob(), to_wad(4)).unwrap();
        assert_eq!(token.balance_of(&bob()), to_wad(4));
        assert_eq!(token.balance_of(&alice()), to_wad(6));
    }

    #[test]
    fn test_pool_moves_bypass_blacklist() {
        let mut token = InMemoryTokenLedger::usdd([pool()]);
        token.mint(alice(), to_wad(10)).unwrap();
        token.send_to_pool(alice(), pool(), to_wad(7)).unwrap();
        assert_eq!(token.balance_of(&pool()), to_wad(7));

        token.return_from_pool(pool(), bob(), to_wad(3)).unwrap();
        assert_eq!(token.balance_of(&bob()), to_wad(3));
        assert!(token.return_from_pool(pool(), bob(), to_wad(5)).is_err());
        assert!(token.verify_supply_invariant());
    }

    #[test]
    fn test_reward_token_instance() {
        let staking = Address::from_label("staking");
        let mut deft = InMemoryTokenLedger::deft([staking]);
        deft.mint(alice(), to_wad(5)).unwrap();
        assert_eq!(deft.symbol, "DEFT");
        assert!(deft.transfer(alice(), staking, to_wad(1)).is_err());
        deft.send_to_pool(alice(), staking, to_wad(1)).unwrap();
        assert_eq!(deft.balance_of(&staking), to_wad(1));
    }

    #[test]
    fn test_event_log_bounded() {
        let mut token = InMemoryTokenLedger::usdd([]);
        token.max_events = 3;
        for _ in 0..5 {
            token.mint(alice(), to_wad(1)).unwrap();
        }
        assert_eq!(token.recent_events().len(), 3);
    }

    #[test]
    fn test_state_hash_deterministic() {
        let mut a = InMemoryTokenLedger::usdd([]);
        let mut b = InMemoryTokenLedger::usdd([]);
        a.mint(alice(), to_wad(1)).unwrap();
        a.mint(bob(), to_wad(2)).unwrap();
        b.mint(bob(), to_wad(2)).unwrap();
        b.mint(alice(), to_wad(1)).unwrap();
        assert_eq!(a.state_hash(), b.state_hash());

        b.burn(alice(), to_wad(1)).unwrap();
        assert_ne!(a.state_hash(), b.state_hash());
    }
}
