//! ABI surface of the safe factory and the safe contract.
//!
//! The human-readable signatures match the deployed bytecode; selectors and
//! the creation event topic are derived from them.

use std::sync::OnceLock;

use ethers::abi::{self, parse_abi, Abi, Function, RawLog, Token};
use ethers::types::{Address, Bytes, Log, H256, U256};

use crate::types::OWNER_COUNT;

const FACTORY_SIGNATURES: &[&str] = &[
    "event SaveCreated(address save, address[3] owners)",
    "function createSave(address[3] owners) payable returns (address)",
];

const SAFE_SIGNATURES: &[&str] = &[
    "function owners(uint256) view returns (address)",
    "function txs(uint256) view returns (address to, uint256 amount, bool executed, uint8 confirms)",
    "function confirmed(uint256,address) view returns (bool)",
    "function createTx(address to, uint256 amount) returns (uint256)",
    "function confirmTx(uint256 id)",
    "function executeTx(uint256 id)",
];

pub fn factory_abi() -> &'static Abi {
    static ABI: OnceLock<Abi> = OnceLock::new();
    ABI.get_or_init(|| parse_abi(FACTORY_SIGNATURES).expect("static factory ABI"))
}

pub fn safe_abi() -> &'static Abi {
    static ABI: OnceLock<Abi> = OnceLock::new();
    ABI.get_or_init(|| parse_abi(SAFE_SIGNATURES).expect("static safe ABI"))
}

fn function(abi: &'static Abi, name: &str) -> &'static Function {
    abi.function(name).expect("function present in static ABI")
}

/// Topic 0 of `SaveCreated(address,address[3])`.
pub fn safe_created_topic() -> H256 {
    factory_abi()
        .event("SaveCreated")
        .expect("event present in static ABI")
        .signature()
}

/// Decoded `SaveCreated` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafeCreated {
    pub safe: Address,
    pub owners: [Address; OWNER_COUNT],
}

impl SafeCreated {
    pub fn has_owner(&self, who: &Address) -> bool {
        self.owners.iter().any(|o| o == who)
    }
}

/// One slot of the safe's transaction table as returned by `txs(i)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxRecord {
    pub to: Address,
    pub amount: U256,
    pub executed: bool,
    pub confirms: u8,
}

fn encode(function: &Function, tokens: &[Token]) -> Bytes {
    // Token shapes are fixed by the callers below.
    function
        .encode_input(tokens)
        .map(Bytes::from)
        .unwrap_or_default()
}

fn owners_token(owners: &[Address; OWNER_COUNT]) -> Token {
    Token::FixedArray(owners.iter().copied().map(Token::Address).collect())
}

pub fn u256_to_u64(value: U256) -> Option<u64> {
    (value.bits() <= 64).then(|| value.low_u64())
}

// Factory calls

pub fn encode_create_save(owners: &[Address; OWNER_COUNT]) -> Bytes {
    encode(function(factory_abi(), "createSave"), &[owners_token(owners)])
}

pub fn decode_create_save_output(data: &[u8]) -> Option<Address> {
    let tokens = function(factory_abi(), "createSave").decode_output(data).ok()?;
    tokens.into_iter().next()?.into_address()
}

/// Decode a `SaveCreated` log. Returns `None` for any other log shape.
pub fn parse_safe_created(log: &Log) -> Option<SafeCreated> {
    if log.topics.first() != Some(&safe_created_topic()) {
        return None;
    }
    let event = factory_abi().event("SaveCreated").ok()?;
    let parsed = event
        .parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })
        .ok()?;

    let mut safe = None;
    let mut owners = None;
    for param in parsed.params {
        match (param.name.as_str(), param.value) {
            ("save", Token::Address(a)) => safe = Some(a),
            ("owners", Token::FixedArray(items)) => {
                let addrs: Vec<Address> =
                    items.into_iter().filter_map(Token::into_address).collect();
                owners = <[Address; OWNER_COUNT]>::try_from(addrs).ok();
            }
            _ => {}
        }
    }
    Some(SafeCreated {
        safe: safe?,
        owners: owners?,
    })
}

/// First `SaveCreated` emitted by `factory` among a receipt's logs.
pub fn find_safe_created(logs: &[Log], factory: Address) -> Option<SafeCreated> {
    logs.iter()
        .filter(|l| l.address == factory)
        .find_map(parse_safe_created)
}

/// Encode `SaveCreated` the way the factory emits it.
pub fn encode_safe_created(event: &SafeCreated) -> (Vec<H256>, Bytes) {
    let data = abi::encode(&[Token::Address(event.safe), owners_token(&event.owners)]);
    (vec![safe_created_topic()], Bytes::from(data))
}

// Safe calls

pub fn encode_owners(index: u64) -> Bytes {
    encode(function(safe_abi(), "owners"), &[Token::Uint(index.into())])
}

pub fn decode_address_output(data: &[u8]) -> Option<Address> {
    let tokens = function(safe_abi(), "owners").decode_output(data).ok()?;
    tokens.into_iter().next()?.into_address()
}

pub fn encode_txs(index: u64) -> Bytes {
    encode(function(safe_abi(), "txs"), &[Token::Uint(index.into())])
}

pub fn decode_txs_output(data: &[u8]) -> Option<TxRecord> {
    let mut tokens = function(safe_abi(), "txs").decode_output(data).ok()?.into_iter();
    let to = tokens.next()?.into_address()?;
    let amount = tokens.next()?.into_uint()?;
    let executed = tokens.next()?.into_bool()?;
    let confirms = tokens.next()?.into_uint()?;
    Some(TxRecord {
        to,
        amount,
        executed,
        confirms: u256_to_u64(confirms)?.min(u8::MAX as u64) as u8,
    })
}

pub fn encode_confirmed(id: u64, owner: Address) -> Bytes {
    encode(
        function(safe_abi(), "confirmed"),
        &[Token::Uint(id.into()), Token::Address(owner)],
    )
}

pub fn decode_bool_output(data: &[u8]) -> Option<bool> {
    let tokens = function(safe_abi(), "confirmed").decode_output(data).ok()?;
    tokens.into_iter().next()?.into_bool()
}

pub fn encode_create_tx(to: Address, amount: U256) -> Bytes {
    encode(
        function(safe_abi(), "createTx"),
        &[Token::Address(to), Token::Uint(amount)],
    )
}

pub fn decode_create_tx_output(data: &[u8]) -> Option<u64> {
    let tokens = function(safe_abi(), "createTx").decode_output(data).ok()?;
    u256_to_u64(tokens.into_iter().next()?.into_uint()?)
}

pub fn encode_confirm_tx(id: u64) -> Bytes {
    encode(function(safe_abi(), "confirmTx"), &[Token::Uint(id.into())])
}

pub fn encode_execute_tx(id: u64) -> Bytes {
    encode(function(safe_abi(), "executeTx"), &[Token::Uint(id.into())])
}

/// A decoded call against either contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateSave([Address; OWNER_COUNT]),
    Owners(u64),
    Txs(u64),
    Confirmed(u64, Address),
    CreateTx(Address, U256),
    ConfirmTx(u64),
    ExecuteTx(u64),
}

/// Decode calldata by selector.
pub fn decode_call(data: &[u8]) -> Option<Call> {
    if data.len() < 4 {
        return None;
    }
    let (selector, args) = data.split_at(4);
    let all = factory_abi().functions().chain(safe_abi().functions());
    let func = all.into_iter().find(|f| f.short_signature() == selector)?;
    let mut tokens = func.decode_input(args).ok()?.into_iter();

    let uint = |t: Option<Token>| t.and_then(Token::into_uint).and_then(u256_to_u64);
    let call = match func.name.as_str() {
        "createSave" => {
            let items = tokens.next()?.into_fixed_array()?;
            let owners: Vec<Address> = items.into_iter().filter_map(Token::into_address).collect();
            Call::CreateSave(<[Address; OWNER_COUNT]>::try_from(owners).ok()?)
        }
        "owners" => Call::Owners(uint(tokens.next())?),
        "txs" => Call::Txs(uint(tokens.next())?),
        "confirmed" => {
            let id = uint(tokens.next())?;
            Call::Confirmed(id, tokens.next()?.into_address()?)
        }
        "createTx" => {
            let to = tokens.next()?.into_address()?;
            Call::CreateTx(to, tokens.next()?.into_uint()?)
        }
        "confirmTx" => Call::ConfirmTx(uint(tokens.next())?),
        "executeTx" => Call::ExecuteTx(uint(tokens.next())?),
        _ => return None,
    };
    Some(call)
}

/// ABI-encode return values for a call, as a node would.
pub fn encode_output(tokens: &[Token]) -> Bytes {
    Bytes::from(abi::encode(tokens))
}
