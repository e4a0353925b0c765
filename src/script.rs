//! Script execution engine for pay-to-public-key-hash spending
//!
//! Scripts are sequences of typed tokens: one of a closed set of opcodes, or
//! an opaque data push. Execution concatenates the unlocking script and the
//! locking script and runs them left to right over a stack of byte strings:
//!
//! 1. Initialize stack S = ∅
//! 2. For each token t in unlocking ‖ locking:
//!    - Data(d): push d
//!    - Op(op): execute op against S; any failure aborts the whole script
//! 3. Succeed iff every token executed and S = ∅ afterwards
//!
//! Execution has no side effects outside its own stack, so a failed run
//! leaves nothing observable behind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::*;
use crate::crypto::hash160;
use crate::types::ByteString;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Dup,
    Hash160,
    EqualVerify,
    CheckSig,
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Dup => "OP_DUP",
            Opcode::Hash160 => "OP_HASH160",
            Opcode::EqualVerify => "OP_EQUALVERIFY",
            Opcode::CheckSig => "OP_CHECKSIG",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Opcode {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OP_DUP" => Ok(Opcode::Dup),
            "OP_HASH160" => Ok(Opcode::Hash160),
            "OP_EQUALVERIFY" => Ok(Opcode::EqualVerify),
            "OP_CHECKSIG" => Ok(Opcode::CheckSig),
            other => Err(ScriptError::UnknownOpcode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Token {
    Op(Opcode),
    Data(ByteString),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("stack underflow at {0}")]
    StackUnderflow(Opcode),

    #[error("OP_EQUALVERIFY operands differ")]
    EqualVerifyFailed,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("stack overflow")]
    StackOverflow,

    #[error("script exceeds the token limit")]
    TooManyTokens,

    #[error("{0} items left on the stack")]
    UncleanStack(usize),

    #[error("unknown opcode {0}")]
    UnknownOpcode(String),

    #[error("malformed data token {0}")]
    MalformedToken(String),
}

/// Verifies the signature consumed by `OP_CHECKSIG`.
///
/// The message being signed depends on the spending transaction and on the
/// public key popped from the stack, so the engine delegates to the caller.
pub trait SignatureChecker {
    fn check_signature(&self, signature: &[u8], pubkey: &[u8]) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Script(pub Vec<Token>);

impl Script {
    pub fn new(tokens: Vec<Token>) -> Self {
        Script(tokens)
    }

    /// `OP_DUP OP_HASH160 <pubkeyHash> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn p2pkh_locking(pubkey_hash: &[u8; 20]) -> Self {
        Script(vec![
            Token::Op(Opcode::Dup),
            Token::Op(Opcode::Hash160),
            Token::Data(pubkey_hash.to_vec()),
            Token::Op(Opcode::EqualVerify),
            Token::Op(Opcode::CheckSig),
        ])
    }

    /// `<signature> <publicKey>`
    pub fn p2pkh_unlocking(signature: Vec<u8>, pubkey: Vec<u8>) -> Self {
        Script(vec![Token::Data(signature), Token::Data(pubkey)])
    }

    /// The bare public key placed in an input while its signature hash is computed
    pub fn pubkey_placeholder(pubkey: Vec<u8>) -> Self {
        Script(vec![Token::Data(pubkey)])
    }

    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The public-key hash embedded in a P2PKH locking script
    pub fn embedded_pubkey_hash(&self) -> Option<&[u8]> {
        match self.0.as_slice() {
            [
                Token::Op(Opcode::Dup),
                Token::Op(Opcode::Hash160),
                Token::Data(hash),
                Token::Op(Opcode::EqualVerify),
                Token::Op(Opcode::CheckSig),
            ] => Some(hash.as_slice()),
            _ => None,
        }
    }

    /// True if this is a P2PKH locking script paying `pubkey_hash`
    pub fn pays_to(&self, pubkey_hash: &[u8; 20]) -> bool {
        self.embedded_pubkey_hash() == Some(&pubkey_hash[..])
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match token {
                Token::Op(op) => f.write_str(op.name())?,
                Token::Data(data) => f.write_str(&hex::encode(data))?,
            }
        }
        Ok(())
    }
}

impl FromStr for Script {
    type Err = ScriptError;

    /// Parse the text form: `OP_*` words are opcodes, anything else must be hex data
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = Vec::new();
        for word in s.split_whitespace() {
            if word.starts_with("OP_") {
                tokens.push(Token::Op(word.parse()?));
            } else {
                let data = hex::decode(word).map_err(|_| ScriptError::MalformedToken(word.to_string()))?;
                tokens.push(Token::Data(data));
            }
        }
        Ok(Script(tokens))
    }
}

/// Run `unlocking ‖ locking` and report the first failure, if any
pub fn execute(unlocking: &Script, locking: &Script, checker: &dyn SignatureChecker) -> Result<(), ScriptError> {
    if unlocking.0.len() + locking.0.len() > MAX_SCRIPT_TOKENS {
        return Err(ScriptError::TooManyTokens);
    }

    let mut stack: Vec<ByteString> = Vec::new();
    for token in unlocking.0.iter().chain(locking.0.iter()) {
        if stack.len() >= MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow);
        }
        match token {
            Token::Data(data) => stack.push(data.clone()),
            Token::Op(op) => execute_opcode(*op, &mut stack, checker)?,
        }
    }

    if !stack.is_empty() {
        return Err(ScriptError::UncleanStack(stack.len()));
    }
    Ok(())
}

/// Boolean form of [`execute`]
pub fn verify_script(unlocking: &Script, locking: &Script, checker: &dyn SignatureChecker) -> bool {
    execute(unlocking, locking, checker).is_ok()
}

fn execute_opcode(op: Opcode, stack: &mut Vec<ByteString>, checker: &dyn SignatureChecker) -> Result<(), ScriptError> {
    match op {
        Opcode::Dup => {
            let top = stack.last().cloned().ok_or(ScriptError::StackUnderflow(op))?;
            stack.push(top);
        }

        Opcode::Hash160 => {
            let top = stack.pop().ok_or(ScriptError::StackUnderflow(op))?;
            stack.push(hash160(&top).to_vec());
        }

        Opcode::EqualVerify => {
            let (a, b) = pop_two(stack, op)?;
            if a != b {
                return Err(ScriptError::EqualVerifyFailed);
            }
        }

        Opcode::CheckSig => {
            let (pubkey, signature) = pop_two(stack, op)?;
            if !checker.check_signature(&signature, &pubkey) {
                return Err(ScriptError::SignatureInvalid);
            }
        }
    }
    Ok(())
}

/// Pop the top item, then the one beneath it
fn pop_two(stack: &mut Vec<ByteString>, op: Opcode) -> Result<(ByteString, ByteString), ScriptError> {
    if stack.len() < 2 {
        return Err(ScriptError::StackUnderflow(op));
    }
    let top = stack.pop().ok_or(ScriptError::StackUnderflow(op))?;
    let second = stack.pop().ok_or(ScriptError::StackUnderflow(op))?;
    Ok((top, second))
}
