//! Two-node demonstration: alice mines genesis, pays bob, mines the payment,
//! and bob catches up through the sync protocol.
//!
//! Usage: `simnet [ALICE.json BOB.json]`. Without arguments both nodes run
//! in memory at a low difficulty.

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledger_sim::{spawn_node, Command, Network, NodeConfig, Operator, COIN};

const DIFFICULTY_BITS: u32 = 12;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let network = Arc::new(Network::new());

    let (alice, bob) = load_configs()?;
    info!(alice = %alice.name, bob = %bob.name, bits = alice.difficulty_bits, "starting nodes");

    let (alice_id, _) = spawn_node(alice, Arc::clone(&network)).context("starting alice")?;
    let (bob_id, _) = spawn_node(bob, Arc::clone(&network)).context("starting bob")?;

    let operator = Operator::new(&network);
    let bob_address = operator.call(bob_id, Command::ListAddress)?.output;

    let reply = operator.call(
        alice_id,
        Command::CreateTx {
            to: vec![bob_address.clone()],
            amounts: vec![10 * COIN],
            fee: COIN / 20,
        },
    )?;
    if !reply.ok {
        bail!("payment rejected: {}", reply.output);
    }
    info!(tx = %reply.output, "alice paid bob");

    let reply = operator.call(alice_id, Command::CreateBlock)?;
    if !reply.ok {
        bail!("block rejected: {}", reply.output);
    }
    info!(hash = %reply.output, "alice mined a block");

    while operator.call(bob_id, Command::GetBestHeight)?.output != "1" {
        thread::sleep(Duration::from_millis(100));
    }

    let alice_address = operator.call(alice_id, Command::ListAddress)?.output;
    for (name, node, address) in [("alice", alice_id, &alice_address), ("bob", bob_id, &bob_address)] {
        let balance = operator.call(node, Command::GetBalance { address: address.clone() })?;
        println!("{name}: {}", balance.output);
    }
    println!("{}", operator.call(bob_id, Command::PrintBlocks)?.output);
    Ok(())
}

fn load_configs() -> Result<(NodeConfig, NodeConfig)> {
    let paths: Vec<String> = env::args().skip(1).collect();
    match paths.as_slice() {
        [] => {
            let mut alice = NodeConfig::named("alice");
            alice.difficulty_bits = DIFFICULTY_BITS;
            alice.create_genesis = true;
            let mut bob = NodeConfig::named("bob");
            bob.difficulty_bits = DIFFICULTY_BITS;
            Ok((alice, bob))
        }
        [alice, bob] => {
            let alice = NodeConfig::from_json_file(alice).with_context(|| format!("loading {}", alice))?;
            let bob = NodeConfig::from_json_file(bob).with_context(|| format!("loading {}", bob))?;
            if alice.difficulty_bits != bob.difficulty_bits {
                bail!(
                    "nodes disagree on difficulty: {} vs {} bits",
                    alice.difficulty_bits,
                    bob.difficulty_bits
                );
            }
            Ok((alice, bob))
        }
        _ => bail!("usage: simnet [ALICE.json BOB.json]"),
    }
}
