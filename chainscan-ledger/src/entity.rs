//! Entity handles: views into an open chain identified by their keys.
//!
//! A handle is only ever built for a key that was checked against the chain's
//! bound, and the chain is immutable, so record lookups through a handle
//! cannot miss.
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::access::TxLocation;
use crate::chain::Chain;
use crate::record::{AddressKey, AddressRecord, AddressType, BlockRecord, InputRecord, OutputRecord};

macro_rules! entity_identity {
    ($ty:ident { $($field:ident),+ }) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                $(self.$field == other.$field &&)+ self.chain == other.chain
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.chain.descriptor().hash(state);
                $(self.$field.hash(state);)+
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($field), &self.$field))+
                    .finish()
            }
        }
    };
}

#[derive(Clone)]
pub struct Block {
    chain: Chain,
    height: u64,
}

entity_identity!(Block { height });

impl Block {
    pub(crate) fn new(chain: Chain, height: u64) -> Self {
        Self { chain, height }
    }

    fn record(&self) -> &BlockRecord {
        self.chain
            .access()
            .block(self.height)
            .expect("block handle outside the ledger bound")
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn hash(&self) -> &str {
        &self.record().hash
    }

    pub fn time(&self) -> u64 {
        self.record().time
    }

    pub fn tx_count(&self) -> usize {
        self.record().txes.len()
    }

    pub fn first_tx_index(&self) -> u64 {
        self.chain
            .access()
            .first_tx_index(self.height)
            .expect("block handle outside the ledger bound")
    }

    pub fn txes(&self) -> impl Iterator<Item = Tx> + '_ {
        let first = self.first_tx_index();
        (0..self.tx_count() as u64)
            .map(move |offset| Tx::new(self.chain.clone(), first + offset, self.height))
    }

    pub fn tx(&self, position: usize) -> Option<Tx> {
        (position < self.tx_count()).then(|| {
            Tx::new(
                self.chain.clone(),
                self.first_tx_index() + position as u64,
                self.height,
            )
        })
    }

    pub fn previous(&self) -> Option<Block> {
        self.height
            .checked_sub(1)
            .map(|height| Block::new(self.chain.clone(), height))
    }
}

#[derive(Clone)]
pub struct Tx {
    chain: Chain,
    index: u64,
    block_height: u64,
}

entity_identity!(Tx { index });

impl Tx {
    pub(crate) fn new(chain: Chain, index: u64, block_height: u64) -> Self {
        Self {
            chain,
            index,
            block_height,
        }
    }

    fn location(&self) -> TxLocation<'_> {
        self.chain
            .access()
            .tx(self.index)
            .expect("transaction handle outside the ledger bound")
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn hash(&self) -> &str {
        &self.location().record.hash
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    pub fn block(&self) -> Block {
        Block::new(self.chain.clone(), self.block_height)
    }

    pub fn is_coinbase(&self) -> bool {
        self.location().record.inputs.is_empty()
    }

    pub fn input_count(&self) -> usize {
        self.location().record.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.location().record.outputs.len()
    }

    pub fn inputs(&self) -> impl Iterator<Item = Input> + '_ {
        (0..self.input_count() as u32).map(move |i| Input::new(self.chain.clone(), self.index, i))
    }

    pub fn outputs(&self) -> impl Iterator<Item = Output> + '_ {
        (0..self.output_count() as u32)
            .map(move |i| Output::new(self.chain.clone(), self.index, i))
    }

    pub fn output_value(&self) -> u64 {
        self.location().record.outputs.iter().map(|o| o.value).sum()
    }

    pub fn input_value(&self) -> u64 {
        self.inputs().map(|input| input.value()).sum()
    }

    /// Zero for coinbase transactions.
    pub fn fee(&self) -> u64 {
        if self.is_coinbase() {
            return 0;
        }
        self.input_value().saturating_sub(self.output_value())
    }
}

#[derive(Clone)]
pub struct Output {
    chain: Chain,
    tx_index: u64,
    index: u32,
}

entity_identity!(Output { tx_index, index });

impl Output {
    pub(crate) fn new(chain: Chain, tx_index: u64, index: u32) -> Self {
        Self {
            chain,
            tx_index,
            index,
        }
    }

    fn record(&self) -> &OutputRecord {
        self.chain
            .access()
            .tx(self.tx_index)
            .and_then(|location| location.record.outputs.get(self.index as usize))
            .expect("output handle outside the ledger bound")
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn tx_index(&self) -> u64 {
        self.tx_index
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn value(&self) -> u64 {
        self.record().value
    }

    pub fn address(&self) -> Address {
        Address::new(self.chain.clone(), self.record().address.key())
    }

    pub fn tx(&self) -> Tx {
        self.chain
            .transaction_at(self.tx_index)
            .expect("output handle outside the ledger bound")
    }
}

#[derive(Clone)]
pub struct Input {
    chain: Chain,
    tx_index: u64,
    index: u32,
}

entity_identity!(Input { tx_index, index });

impl Input {
    pub(crate) fn new(chain: Chain, tx_index: u64, index: u32) -> Self {
        Self {
            chain,
            tx_index,
            index,
        }
    }

    fn record(&self) -> InputRecord {
        self.chain
            .access()
            .tx(self.tx_index)
            .and_then(|location| location.record.inputs.get(self.index as usize).copied())
            .expect("input handle outside the ledger bound")
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn tx_index(&self) -> u64 {
        self.tx_index
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// The output this input spends. Stores only accept inputs spending
    /// outputs of earlier transactions, so the output is always in bound.
    pub fn spent_output(&self) -> Output {
        let record = self.record();
        Output::new(self.chain.clone(), record.tx_index, record.output_index)
    }

    pub fn value(&self) -> u64 {
        self.spent_output().value()
    }

    pub fn address(&self) -> Address {
        self.spent_output().address()
    }

    pub fn tx(&self) -> Tx {
        self.chain
            .transaction_at(self.tx_index)
            .expect("input handle outside the ledger bound")
    }
}

#[derive(Clone)]
pub struct Address {
    chain: Chain,
    key: AddressKey,
}

entity_identity!(Address { key });

impl Address {
    pub(crate) fn new(chain: Chain, key: AddressKey) -> Self {
        Self { chain, key }
    }

    fn record(&self) -> &AddressRecord {
        self.chain
            .access()
            .address(self.key)
            .expect("address handle for an unknown address")
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn key(&self) -> AddressKey {
        self.key
    }

    pub fn address_num(&self) -> u32 {
        self.key.num
    }

    pub fn address_type(&self) -> AddressType {
        self.key.address_type
    }

    /// The address a script-hash address wraps, when known.
    pub fn wrapped(&self) -> Option<Address> {
        let inner = self.record().wraps?;
        self.chain
            .access()
            .address(inner)
            .map(|_| Address::new(self.chain.clone(), inner))
    }

    pub fn equiv(&self, script_equiv: bool) -> EquivAddress {
        let members = self
            .chain
            .access()
            .equiv_class(self.key, script_equiv)
            .unwrap_or_else(|| vec![self.key]);
        EquivAddress {
            chain: self.chain.clone(),
            members,
            script_equiv,
        }
    }
}

/// A set of addresses treated as one owner.
#[derive(Clone)]
pub struct EquivAddress {
    chain: Chain,
    members: Vec<AddressKey>,
    script_equiv: bool,
}

entity_identity!(EquivAddress { members, script_equiv });

impl EquivAddress {
    /// An arbitrary set of addresses of `chain`. Sets built this way need not
    /// be a complete equivalence class.
    pub fn from_addresses(
        chain: &Chain,
        addresses: impl IntoIterator<Item = Address>,
        script_equiv: bool,
    ) -> Self {
        let mut members: Vec<AddressKey> = addresses.into_iter().map(|a| a.key).collect();
        members.sort();
        members.dedup();
        Self {
            chain: chain.clone(),
            members,
            script_equiv,
        }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn is_script_equiv(&self) -> bool {
        self.script_equiv
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.members
            .iter()
            .map(move |key| Address::new(self.chain.clone(), *key))
    }

    /// Lowest member; enough to rebuild a complete class.
    pub fn sample(&self) -> Option<Address> {
        self.members
            .first()
            .map(|key| Address::new(self.chain.clone(), *key))
    }

    pub fn contains(&self, address: &Address) -> bool {
        address.chain == self.chain && self.members.binary_search(&address.key).is_ok()
    }

    /// Whether this set is exactly the class its sample belongs to.
    pub fn is_complete_class(&self) -> bool {
        match self.sample() {
            Some(sample) => sample.equiv(self.script_equiv).members == self.members,
            None => false,
        }
    }
}

/// Every kind of ledger entity a computation can hand back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entity {
    Block(Block),
    Tx(Tx),
    Output(Output),
    Input(Input),
    Address(Address),
    EquivAddress(EquivAddress),
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Block(_) => "block",
            Entity::Tx(_) => "tx",
            Entity::Output(_) => "output",
            Entity::Input(_) => "input",
            Entity::Address(_) => "address",
            Entity::EquivAddress(_) => "equiv_address",
        }
    }

    pub fn chain(&self) -> &Chain {
        match self {
            Entity::Block(e) => e.chain(),
            Entity::Tx(e) => e.chain(),
            Entity::Output(e) => e.chain(),
            Entity::Input(e) => e.chain(),
            Entity::Address(e) => e.chain(),
            Entity::EquivAddress(e) => e.chain(),
        }
    }
}

macro_rules! entity_from {
    ($($ty:ident),+) => {
        $(impl From<$ty> for Entity {
            fn from(value: $ty) -> Self {
                Entity::$ty(value)
            }
        })+
    };
}

entity_from!(Block, Tx, Output, Input, Address, EquivAddress);

#[cfg(test)]
mod tests {
    use crate::fixtures::{coinbase_index, FEE};
    use crate::record::AddressType;
    use crate::test_support::sample_store;

    #[test]
    fn transactions_know_their_block_and_fee() {
        let (_dir, chain) = sample_store(4);
        let block = chain.block_at(3).unwrap();
        let txes: Vec<_> = block.txes().collect();
        assert_eq!(txes.len(), 2);
        assert!(txes[0].is_coinbase());
        assert_eq!(txes[0].index(), coinbase_index(3));
        assert_eq!(txes[0].fee(), 0);
        assert_eq!(txes[1].fee(), FEE);
        assert_eq!(txes[1].block(), block);
    }

    #[test]
    fn inputs_resolve_the_outputs_they_spend() {
        let (_dir, chain) = sample_store(3);
        let input = chain.input_at(2, 0).unwrap();
        let spent = input.spent_output();
        assert_eq!(spent, chain.output_at(coinbase_index(0), 0).unwrap());
        assert_eq!(input.value(), spent.value());
        assert_eq!(input.tx(), chain.transaction_at(2).unwrap());
    }

    #[test]
    fn equivalent_addresses_share_a_class() {
        let (_dir, chain) = sample_store(10);
        let pkh = chain.address_at(3, AddressType::PubkeyHash).unwrap();
        let class = pkh.equiv(false);
        assert!(class.len() >= 2);
        assert!(class.contains(&chain.address_at(3, AddressType::Pubkey).unwrap()));
        assert!(class.is_complete_class());

        let wrapper = chain.address_at(3, AddressType::ScriptHash).unwrap();
        assert_eq!(
            wrapper.wrapped().unwrap().address_type(),
            AddressType::WitnessPubkeyHash
        );
        let script_class = wrapper.equiv(true);
        assert!(script_class.contains(&pkh));
        assert_eq!(script_class, pkh.equiv(true));
    }
}
